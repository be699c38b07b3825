//! Chunked JSON / GeoJSON stream reader.
//!
//! Pulls array elements one at a time from a byte stream and groups them
//! into chunks of at most `chunk_size` objects. The document is never
//! buffered as a whole: the reader holds one element's raw bytes plus the
//! current chunk of parsed objects.
//!
//! ## Layouts
//!
//! - [`Format::Json`]: the outermost value must be an array of objects.
//! - [`Format::GeoJson`]: the outermost value must be an object with a
//!   `features` key whose value is an array of objects. Every other member
//!   of the top-level object, before or after `features`, is skipped
//!   without being parsed.
//!
//! ## Scanning
//!
//! A small state machine walks the bytes, tracking string literals and
//! escapes so that brackets inside strings are ignored. The bytes of one
//! element are captured from its opening `{` to the matching `}` and then
//! decoded with `serde_json`.
//!
//! ## Peeking
//!
//! [`peek_objects`] reads a bounded sample through a recording reader and
//! hands back a [`Replay`] reader that yields the recorded bytes followed by
//! the untouched remainder, so a later full pass sees the whole document.

use std::io::{BufRead, BufReader, Chain, Cursor, Read};

use serde_json::{Map, Value};

use crate::error::{ImportError, Result};
use crate::models::Format;

/// A raw parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// Default number of objects per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Reader returned by [`peek_objects`]: peeked bytes, then the rest.
pub type Replay<R> = Chain<Cursor<Vec<u8>>, R>;

// ============================================================================
// Scanner: byte cursor with offset tracking
// ============================================================================

struct Scanner<R> {
    inner: BufReader<R>,
    offset: u64,
}

impl<R: Read> Scanner<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            offset: 0,
        }
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.inner.consume(1);
        self.offset += 1;
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let b = self.peek()?;
        if b.is_some() {
            self.bump();
        }
        Ok(b)
    }

    /// Skip whitespace and return the next significant byte without
    /// consuming it.
    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\n' | b'\r' | b'\t') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn malformed(&self, message: impl Into<String>) -> ImportError {
        ImportError::Malformed {
            offset: self.offset,
            message: message.into(),
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        match self.skip_whitespace()? {
            Some(b) if b == byte => {
                self.bump();
                Ok(())
            }
            other => Err(self.malformed(format!(
                "expected {:?}, got {}",
                byte as char,
                describe(other)
            ))),
        }
    }

    /// Consume a string literal whose opening quote is the next byte and
    /// return its decoded contents.
    fn read_string(&mut self) -> Result<String> {
        let mut raw = Vec::new();
        self.consume_string(Some(&mut raw))?;
        serde_json::from_slice(&raw).map_err(|e| self.malformed(e.to_string()))
    }

    /// Consume a string literal (opening quote next), optionally copying
    /// its raw bytes, quotes included.
    fn consume_string(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<()> {
        let mut escaped = false;
        let mut first = true;
        loop {
            let b = self
                .next_byte()?
                .ok_or_else(|| self.malformed("unexpected end of input inside string"))?;
            if let Some(buf) = sink.as_deref_mut() {
                buf.push(b);
            }
            if first {
                first = false;
                continue;
            }
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                return Ok(());
            }
        }
    }

    /// Consume an object or array (opening bracket next) up to its matching
    /// closing bracket, optionally copying the raw bytes.
    fn consume_compound(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<()> {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        loop {
            let b = self
                .next_byte()?
                .ok_or_else(|| self.malformed("unexpected end of input inside value"))?;
            if let Some(buf) = sink.as_deref_mut() {
                buf.push(b);
            }
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.malformed("unbalanced brackets"))?;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Skip one JSON value of any kind without decoding it.
    fn skip_value(&mut self) -> Result<()> {
        match self.skip_whitespace()? {
            Some(b'{' | b'[') => self.consume_compound(None),
            Some(b'"') => self.read_string().map(drop),
            Some(_) => {
                // Scalar: runs until a delimiter, then must be a valid literal.
                let mut raw = Vec::new();
                while let Some(b) = self.peek()? {
                    if matches!(b, b',' | b'}' | b']' | b' ' | b'\n' | b'\r' | b'\t') {
                        break;
                    }
                    raw.push(b);
                    self.bump();
                }
                serde_json::from_slice::<Value>(&raw).map(drop).map_err(|_| {
                    self.malformed(format!(
                        "invalid literal {:?}",
                        String::from_utf8_lossy(&raw)
                    ))
                })
            }
            None => Err(self.malformed("unexpected end of input, expected a value")),
        }
    }
}

fn describe(b: Option<u8>) -> String {
    match b {
        Some(b) => format!("{:?}", b as char),
        None => "end of input".to_string(),
    }
}

// ============================================================================
// ChunkReader
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Not yet positioned inside the array.
    Unopened,
    /// Inside the array; `first` until the first element is read.
    InArray { first: bool },
    /// Array closed, or a fatal error was returned.
    Finished,
}

/// Lazy, finite, non-restartable iterator over chunks of array elements.
///
/// Errors are fatal: after yielding an `Err`, the iterator is exhausted.
pub struct ChunkReader<R> {
    scanner: Scanner<R>,
    format: Format,
    chunk_size: usize,
    state: ReaderState,
    index: u64,
    element: Vec<u8>,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R, format: Format, chunk_size: usize) -> Self {
        Self {
            scanner: Scanner::new(reader),
            format,
            chunk_size: chunk_size.max(1),
            state: ReaderState::Unopened,
            index: 0,
            element: Vec::new(),
        }
    }

    /// Number of elements read so far.
    pub fn elements_read(&self) -> u64 {
        self.index
    }

    /// Position the reader just inside the element array. Called lazily by
    /// the first `next()`; calling it early surfaces structural errors
    /// before any chunk is requested.
    pub fn open(&mut self) -> Result<()> {
        if self.state != ReaderState::Unopened {
            return Ok(());
        }
        let opened = match self.format {
            Format::Json => self.open_array(),
            Format::GeoJson => self.seek_features(),
        };
        match opened {
            Ok(()) => {
                self.state = ReaderState::InArray { first: true };
                Ok(())
            }
            Err(e) => {
                self.state = ReaderState::Finished;
                Err(e)
            }
        }
    }

    fn open_array(&mut self) -> Result<()> {
        match self.scanner.skip_whitespace()? {
            Some(b'[') => {
                self.scanner.bump();
                Ok(())
            }
            other => Err(ImportError::ExpectedArrayStart {
                found: describe(other),
            }),
        }
    }

    /// Walk the members of the top-level object until the `features` key,
    /// skipping every other member's value.
    fn seek_features(&mut self) -> Result<()> {
        match self.scanner.skip_whitespace()? {
            Some(b'{') => self.scanner.bump(),
            _ => return Err(ImportError::FeaturesNotFound),
        }
        loop {
            match self.scanner.skip_whitespace()? {
                Some(b'"') => {}
                Some(b'}') | None => return Err(ImportError::FeaturesNotFound),
                other => {
                    return Err(self
                        .scanner
                        .malformed(format!("expected object key, got {}", describe(other))))
                }
            }
            let key = self.scanner.read_string()?;
            self.scanner.expect(b':')?;
            if key == "features" {
                return self.open_array();
            }
            self.scanner.skip_value()?;
            match self.scanner.skip_whitespace()? {
                Some(b',') => self.scanner.bump(),
                Some(b'}') | None => return Err(ImportError::FeaturesNotFound),
                other => {
                    return Err(self.scanner.malformed(format!(
                        "expected ',' or '}}', got {}",
                        describe(other)
                    )))
                }
            }
        }
    }

    fn next_object(&mut self) -> Result<Option<JsonObject>> {
        let first = match self.state {
            ReaderState::InArray { first } => first,
            _ => return Ok(None),
        };

        let mut next = self.scanner.skip_whitespace()?;
        if first {
            if next == Some(b']') {
                self.scanner.bump();
                self.state = ReaderState::Finished;
                return Ok(None);
            }
        } else {
            match next {
                Some(b',') => {
                    self.scanner.bump();
                    next = self.scanner.skip_whitespace()?;
                    if next == Some(b']') {
                        return Err(self.scanner.malformed("trailing comma in array"));
                    }
                }
                Some(b']') => {
                    self.scanner.bump();
                    self.state = ReaderState::Finished;
                    return Ok(None);
                }
                other => {
                    return Err(self.scanner.malformed(format!(
                        "expected ',' or ']', got {}",
                        describe(other)
                    )))
                }
            }
        }

        match next {
            Some(b'{') => {}
            Some(_) => return Err(ImportError::NotAnObject { index: self.index }),
            None => return Err(self.scanner.malformed("unexpected end of input in array")),
        }

        self.element.clear();
        self.scanner.consume_compound(Some(&mut self.element))?;
        let obj: JsonObject =
            serde_json::from_slice(&self.element).map_err(|source| ImportError::Decode {
                index: self.index,
                source,
            })?;
        self.state = ReaderState::InArray { first: false };
        self.index += 1;
        Ok(Some(obj))
    }

    /// Recover the underlying reader. Bytes already buffered internally are
    /// lost; wrap the source in a recorder if they matter.
    pub fn into_inner(self) -> R {
        self.scanner.inner.into_inner()
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Vec<JsonObject>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReaderState::Finished {
            return None;
        }
        if let Err(e) = self.open() {
            return Some(Err(e));
        }

        let mut chunk = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        while chunk.len() < self.chunk_size {
            match self.next_object() {
                Ok(Some(obj)) => chunk.push(obj),
                Ok(None) => break,
                Err(e) => {
                    self.state = ReaderState::Finished;
                    return Some(Err(e));
                }
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

// ============================================================================
// Peek with replay
// ============================================================================

/// Reader adapter that keeps a copy of every byte it hands out.
struct Recording<R> {
    inner: R,
    recorded: Vec<u8>,
}

impl<R: Read> Read for Recording<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.recorded.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Read up to `limit` objects from the start of `reader` without losing
/// them: the returned [`Replay`] yields every byte that was consumed,
/// followed by the rest of the stream.
pub fn peek_objects<R: Read>(
    reader: R,
    format: Format,
    limit: usize,
) -> Result<(Vec<JsonObject>, Replay<R>)> {
    let recording = Recording {
        inner: reader,
        recorded: Vec::new(),
    };
    let mut chunks = ChunkReader::new(recording, format, limit);
    let sample = match chunks.next() {
        Some(Ok(objects)) => objects,
        Some(Err(e)) => return Err(e),
        None => Vec::new(),
    };
    let Recording { inner, recorded } = chunks.into_inner();
    Ok((sample, Cursor::new(recorded).chain(inner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(input: &str, format: Format, size: usize) -> Vec<Result<Vec<JsonObject>>> {
        ChunkReader::new(input.as_bytes(), format, size).collect()
    }

    fn sizes(input: &str, format: Format, size: usize) -> Vec<usize> {
        chunks(input, format, size)
            .into_iter()
            .map(|c| c.unwrap().len())
            .collect()
    }

    #[test]
    fn json_array_groups_into_chunks() {
        let input = r#"[{"a":1},{"a":2},{"a":3},{"a":4},{"a":5}]"#;
        assert_eq!(sizes(input, Format::Json, 2), vec![2, 2, 1]);
        assert_eq!(sizes(input, Format::Json, 5), vec![5]);
        assert_eq!(sizes(input, Format::Json, 1000), vec![5]);
    }

    #[test]
    fn empty_array_yields_no_chunks() {
        assert!(chunks("  [ ]  ", Format::Json, 10).is_empty());
    }

    #[test]
    fn strings_with_brackets_and_escapes() {
        let input = r#"[{"s":"a}]\"[{"},{"t":"\\"}]"#;
        let got: Vec<_> = chunks(input, Format::Json, 10);
        let objs = got.into_iter().next().unwrap().unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0]["s"], "a}]\"[{");
        assert_eq!(objs[1]["t"], "\\");
    }

    #[test]
    fn json_requires_array_start() {
        let got = chunks(r#"{"a":1}"#, Format::Json, 10);
        assert_eq!(got.len(), 1);
        assert!(matches!(
            got[0],
            Err(ImportError::ExpectedArrayStart { .. })
        ));
    }

    #[test]
    fn non_object_element_is_fatal() {
        let got = chunks(r#"[{"a":1}, 2, {"a":3}]"#, Format::Json, 10);
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], Err(ImportError::NotAnObject { index: 1 })));
    }

    #[test]
    fn decode_error_aborts_without_partial_chunk() {
        let got = chunks(r#"[{"a":1},{"a":tru}]"#, Format::Json, 10);
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0], Err(ImportError::Decode { index: 1, .. })));
    }

    #[test]
    fn earlier_chunks_survive_later_error() {
        let got = chunks(r#"[{"a":1},{"a":2},{"a":"#, Format::Json, 2);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].as_ref().unwrap().len(), 2);
        assert!(matches!(got[1], Err(ImportError::Malformed { .. })));
    }

    #[test]
    fn trailing_comma_is_malformed() {
        let got = chunks(r#"[{"a":1},]"#, Format::Json, 10);
        assert!(matches!(got[0], Err(ImportError::Malformed { .. })));
    }

    #[test]
    fn geojson_skips_to_features() {
        let input = r#"{
            "type": "FeatureCollection",
            "name": "with \"features\" inside",
            "crs": {"properties": {"features": [1, 2]}},
            "bbox": [0, 0, 1, 1],
            "count": 2,
            "features": [
                {"type":"Feature","geometry":null,"properties":{"n":1}},
                {"type":"Feature","geometry":null,"properties":{"n":2}}
            ],
            "trailing": true
        }"#;
        let got = chunks(input, Format::GeoJson, 10);
        assert_eq!(got.len(), 1);
        let objs = got.into_iter().next().unwrap().unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[1]["properties"]["n"], 2);
    }

    #[test]
    fn geojson_without_features_is_structural() {
        let got = chunks(r#"{"type":"FeatureCollection"}"#, Format::GeoJson, 10);
        assert!(matches!(got[0], Err(ImportError::FeaturesNotFound)));

        let got = chunks(r#"[{"type":"Feature"}]"#, Format::GeoJson, 10);
        assert!(matches!(got[0], Err(ImportError::FeaturesNotFound)));
    }

    #[test]
    fn geojson_skipped_members_must_be_valid_literals() {
        for input in [
            r#"{"type": tru, "features": []}"#,
            r#"{"count": 1.2.3, "features": []}"#,
            r#"{"flag": nul, "features": []}"#,
        ] {
            let got = chunks(input, Format::GeoJson, 10);
            assert_eq!(got.len(), 1, "{input}");
            assert!(matches!(got[0], Err(ImportError::Malformed { .. })), "{input}");
        }

        let got = chunks(
            r#"{"a": true, "b": null, "c": -1.5e3, "features": []}"#,
            Format::GeoJson,
            10,
        );
        assert!(got.is_empty());
    }

    #[test]
    fn geojson_features_must_be_array() {
        let got = chunks(r#"{"features": {"a": 1}}"#, Format::GeoJson, 10);
        assert_eq!(got.len(), 1);
        assert!(matches!(
            got[0],
            Err(ImportError::ExpectedArrayStart { .. })
        ));
    }

    #[test]
    fn open_surfaces_errors_early() {
        let mut reader = ChunkReader::new("nope".as_bytes(), Format::Json, 10);
        assert!(reader.open().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn peek_replays_consumed_bytes() {
        let input: String = {
            let items: Vec<String> = (0..50).map(|i| format!(r#"{{"n":{}}}"#, i)).collect();
            format!("[{}]", items.join(","))
        };
        let (sample, replay) = peek_objects(input.as_bytes(), Format::Json, 3).unwrap();
        assert_eq!(sample.len(), 3);
        assert_eq!(sample[2]["n"], 2);

        let all: Vec<JsonObject> = ChunkReader::new(replay, Format::Json, 7)
            .flat_map(|c| c.unwrap())
            .collect();
        assert_eq!(all.len(), 50);
        assert_eq!(all[0]["n"], 0);
        assert_eq!(all[49]["n"], 49);
    }

    #[test]
    fn peek_on_short_input_returns_everything() {
        let input = r#"{"type":"FeatureCollection","features":[{"properties":{"a":1}}]}"#;
        let (sample, replay) = peek_objects(input.as_bytes(), Format::GeoJson, 100).unwrap();
        assert_eq!(sample.len(), 1);
        let again: Vec<_> = ChunkReader::new(replay, Format::GeoJson, 100).collect();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].as_ref().unwrap().len(), 1);
    }
}

//! Import progress reporting.
//!
//! Renders [`ImportEvent`]s on **stderr** so stdout stays parseable for
//! scripts: either a human-friendly line per chunk or one JSON object per
//! line.

use std::io::Write;

use cms_import_core::progress::{ImportEvent, ImportProgress, NoProgress};

/// Human-friendly progress: "import points.geojson  chunk 3  3,000 items".
pub struct StderrProgress {
    label: String,
}

impl StderrProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ImportProgress for StderrProgress {
    fn report(&self, event: &ImportEvent) {
        let line = match event {
            ImportEvent::SchemaInferred { fields } => {
                let keys: Vec<&str> = fields.iter().map(|k| k.as_str()).collect();
                format!("import {}  new fields: {}\n", self.label, keys.join(", "))
            }
            ImportEvent::ChunkCommitted { chunk, total, .. } => {
                format!(
                    "import {}  chunk {}  {} items\n",
                    self.label,
                    chunk,
                    format_number(*total)
                )
            }
            ImportEvent::Finished { total, .. } => {
                format!("import {}  done  {} items\n", self.label, format_number(*total))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress {
    label: String,
}

impl JsonProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ImportProgress for JsonProgress {
    fn report(&self, event: &ImportEvent) {
        let obj = match event {
            ImportEvent::SchemaInferred { fields } => serde_json::json!({
                "event": "schema",
                "source": self.label,
                "fields": fields,
            }),
            ImportEvent::ChunkCommitted {
                chunk,
                items,
                total,
            } => serde_json::json!({
                "event": "progress",
                "source": self.label,
                "chunk": chunk,
                "items": items,
                "total": total,
            }),
            ImportEvent::Finished {
                total,
                inserted,
                updated,
                ignored,
            } => serde_json::json!({
                "event": "finished",
                "source": self.label,
                "total": total,
                "inserted": inserted,
                "updated": updated,
                "ignored": ignored,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self, label: &str) -> Box<dyn ImportProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new(label)),
            ProgressMode::Json => Box::new(JsonProgress::new(label)),
        }
    }
}

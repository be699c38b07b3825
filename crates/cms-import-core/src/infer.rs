//! Schema field inference.
//!
//! Looks at a small sample of input objects and proposes one new field per
//! key the schema does not know yet. Only scalar values are considered:
//! nulls, arrays and nested objects never produce a field.
//!
//! Guessing is per value; when a key shows different guesses across the
//! sample, `integer` and `number` widen to `number` and every other mix
//! widens to `text`.

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::models::{Field, FieldType, Key, Schema};
use crate::stream::JsonObject;
use crate::value::parse_date;

/// Description stamped on fields created by inference.
pub const INFERRED_FIELD_DESCRIPTION: &str = "auto created by json/geoJson import";

/// A proposed field, before it is added to a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct GuessedField {
    pub name: String,
    pub key: Key,
    pub field_type: FieldType,
}

/// Propose fields for keys found in `sample` that `schema` lacks, in
/// first-seen order. In GeoJSON mode each sample object is a feature and
/// only its `properties` object is inspected.
pub fn guess_fields(schema: &Schema, sample: &[JsonObject], geojson: bool) -> Vec<GuessedField> {
    let mut guessed: Vec<GuessedField> = Vec::new();

    for obj in sample {
        let props = if geojson {
            match obj.get("properties") {
                Some(Value::Object(p)) => p,
                _ => continue,
            }
        } else {
            obj
        };

        for (k, v) in props {
            if k == "id" || schema.has_field_by_key(k) {
                continue;
            }
            let Some(field_type) = guess_type(v) else {
                continue;
            };
            let Some(key) = Key::new(k.as_str()) else {
                debug!(key = %k, "skipping key with invalid syntax");
                continue;
            };
            match guessed.iter_mut().find(|g| g.key == key) {
                Some(existing) => {
                    existing.field_type = widen(&existing.field_type, &field_type);
                }
                None => guessed.push(GuessedField {
                    name: k.clone(),
                    key,
                    field_type,
                }),
            }
        }
    }

    guessed
}

/// Append guessed fields to `schema` and return the created fields.
///
/// Fails with `DuplicateFieldKey` if a key is already taken; the schema
/// keeps any fields appended before the failure, so callers should only
/// persist it on success.
pub fn append_fields(schema: &mut Schema, guessed: Vec<GuessedField>) -> Result<Vec<Field>> {
    let mut created = Vec::with_capacity(guessed.len());
    for g in guessed {
        let field = Field::new(g.name, g.key, g.field_type)
            .with_description(INFERRED_FIELD_DESCRIPTION);
        schema.add_field(field.clone())?;
        created.push(field);
    }
    Ok(created)
}

fn guess_type(v: &Value) -> Option<FieldType> {
    match v {
        Value::Bool(_) => Some(FieldType::Bool),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
        Value::Number(_) => Some(FieldType::Number),
        Value::String(s) => Some(guess_string(s)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn guess_string(s: &str) -> FieldType {
    if parse_date(s).is_some() {
        return FieldType::Date;
    }
    match url::Url::parse(s) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => FieldType::Url,
        _ => FieldType::Text,
    }
}

fn widen(a: &FieldType, b: &FieldType) -> FieldType {
    match (a, b) {
        _ if a == b => a.clone(),
        (FieldType::Integer, FieldType::Number) | (FieldType::Number, FieldType::Integer) => {
            FieldType::Number
        }
        _ => FieldType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;
    use crate::models::{ProjectId, SchemaId, WorkspaceId};
    use serde_json::json;

    fn objects(v: Value) -> Vec<JsonObject> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_object().unwrap().clone())
            .collect()
    }

    fn empty_schema() -> Schema {
        Schema::new(SchemaId::new(), WorkspaceId::new(), ProjectId::new())
    }

    fn summary(g: &[GuessedField]) -> Vec<(&str, &'static str)> {
        g.iter()
            .map(|g| (g.key.as_str(), g.field_type.name()))
            .collect()
    }

    #[test]
    fn guesses_scalar_types_in_first_seen_order() {
        let sample = objects(json!([{
            "id": "ignored",
            "title": "Tokyo",
            "count": 3,
            "ratio": 0.5,
            "open": true,
            "since": "2024-01-31",
            "seen": "2024-01-31T10:00:00+09:00",
            "site": "https://example.com/a",
            "mail": "mailto:someone@example.com",
            "tags": ["a"],
            "nested": {"a": 1},
            "nothing": null
        }]));
        let got = guess_fields(&empty_schema(), &sample, false);
        assert_eq!(
            summary(&got),
            vec![
                ("title", "text"),
                ("count", "integer"),
                ("ratio", "number"),
                ("open", "bool"),
                ("since", "date"),
                ("seen", "date"),
                ("site", "url"),
                ("mail", "text"),
            ]
        );
        assert_eq!(got[0].name, "title");
    }

    #[test]
    fn conflicting_guesses_widen() {
        let sample = objects(json!([
            {"n": 1, "mixed": 1, "flag": true},
            {"n": 2.5, "mixed": "x", "flag": null}
        ]));
        let got = guess_fields(&empty_schema(), &sample, false);
        assert_eq!(
            summary(&got),
            vec![("n", "number"), ("mixed", "text"), ("flag", "bool")]
        );
    }

    #[test]
    fn skips_existing_and_invalid_keys() {
        let mut schema = empty_schema();
        schema
            .add_field(Field::new("Title", Key::new("title").unwrap(), FieldType::Text))
            .unwrap();
        let sample = objects(json!([{"title": "x", "bad key": 1, "ok": 2}]));
        let got = guess_fields(&schema, &sample, false);
        assert_eq!(summary(&got), vec![("ok", "integer")]);
    }

    #[test]
    fn geojson_reads_properties_only() {
        let sample = objects(json!([
            {"type": "Feature", "geometry": {"type": "Point"}, "properties": {"name": "a"}},
            {"type": "Feature", "properties": null},
            {"type": "Feature", "properties": {"pop": 10}}
        ]));
        let got = guess_fields(&empty_schema(), &sample, true);
        assert_eq!(summary(&got), vec![("name", "text"), ("pop", "integer")]);
    }

    #[test]
    fn append_fields_stamps_description() {
        let mut schema = empty_schema();
        let sample = objects(json!([{"a": 1, "b": "x"}]));
        let guessed = guess_fields(&schema, &sample, false);
        let created = append_fields(&mut schema, guessed).unwrap();
        assert_eq!(created.len(), 2);
        assert!(created
            .iter()
            .all(|f| f.description == INFERRED_FIELD_DESCRIPTION));
        assert_eq!(schema.fields().len(), 2);
    }

    #[test]
    fn append_fields_rejects_collision() {
        let mut schema = empty_schema();
        schema
            .add_field(Field::new("A", Key::new("a").unwrap(), FieldType::Text))
            .unwrap();
        let guessed = vec![GuessedField {
            name: "a".into(),
            key: Key::new("a").unwrap(),
            field_type: FieldType::Integer,
        }];
        let err = append_fields(&mut schema, guessed).unwrap_err();
        assert!(matches!(err, ImportError::DuplicateFieldKey(_)));
    }
}

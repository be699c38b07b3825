//! Run-scoped result accumulator.

use serde::Serialize;

use crate::models::Field;

/// Counters for one import run plus the fields inference created.
///
/// The counters only move forward through the `item_*` methods, so
/// `total == inserted + updated + ignored` always holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    total: u64,
    inserted: u64,
    updated: u64,
    ignored: u64,
    new_fields: Vec<Field>,
}

impl ImportResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_inserted(&mut self) {
        self.total += 1;
        self.inserted += 1;
    }

    pub fn item_updated(&mut self) {
        self.total += 1;
        self.updated += 1;
    }

    pub fn item_skipped(&mut self) {
        self.total += 1;
        self.ignored += 1;
    }

    pub fn field_added(&mut self, field: Field) {
        self.new_fields.push(field);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    pub fn updated(&self) -> u64 {
        self.updated
    }

    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    pub fn new_fields(&self) -> &[Field] {
        &self.new_fields
    }

    pub fn response(&self) -> ImportResponse {
        ImportResponse {
            total: self.total,
            inserted: self.inserted,
            updated: self.updated,
            ignored: self.ignored,
            new_fields: self.new_fields.clone(),
        }
    }
}

/// Caller-facing summary of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub total: u64,
    pub inserted: u64,
    pub updated: u64,
    pub ignored: u64,
    pub new_fields: Vec<Field>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_keep_total_in_sync() {
        let mut r = ImportResult::new();
        r.item_inserted();
        r.item_inserted();
        r.item_updated();
        r.item_skipped();
        assert_eq!(r.total(), 4);
        assert_eq!(r.total(), r.inserted() + r.updated() + r.ignored());
    }

    #[test]
    fn response_serializes_camel_case() {
        let r = ImportResult::new();
        let json = serde_json::to_value(r.response()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"total":0,"inserted":0,"updated":0,"ignored":0,"newFields":[]})
        );
    }
}

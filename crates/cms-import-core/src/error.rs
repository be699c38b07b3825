//! Error taxonomy for the import pipeline.
//!
//! Every failure that stops a run is an [`ImportError`]. Its [`ErrorKind`]
//! tells the caller which class of failure it was:
//!
//! | Kind | Examples | Effect |
//! |------|----------|--------|
//! | `Structural` | malformed stream, invalid field key | run aborts, nothing committed by the failing stage |
//! | `Validation` | unique violation, metadata mismatch | current chunk rolled back, run aborts |
//! | `Authorization` | operation denied | current chunk rolled back, run aborts |
//! | `Store` | persistence failure | current chunk rolled back, run aborts |
//!
//! Elements that are skipped (a GeoJSON feature without `properties`) never
//! produce an error; they are reported as `None` by the assembler.

use thiserror::Error;

use crate::models::ItemId;
use crate::value::ValueError;

/// Broad class of an [`ImportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structural,
    Validation,
    Authorization,
    Store,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("error reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON at byte {offset}: {message}")]
    Malformed { offset: u64, message: String },

    #[error("expected array start, got {found}")]
    ExpectedArrayStart { found: String },

    #[error("no \"features\" array found in the FeatureCollection")]
    FeaturesNotFound,

    #[error("array element {index} is not a JSON object")]
    NotAnObject { index: u64 },

    #[error("error decoding JSON object {index}: {source}")]
    Decode {
        index: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid field key: {0:?}")]
    InvalidFieldKey(String),

    #[error("a geometry field is required for GeoJSON import")]
    GeometryFieldMissing,

    #[error("geometry field {0:?} does not resolve to a geometry field of the schema")]
    InvalidGeometryField(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("field key {0:?} already exists in the schema")]
    DuplicateFieldKey(String),

    #[error("invalid value for field {key:?}: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: ValueError,
    },

    #[error("value {value} of unique field {key:?} is already used by item {conflicting}")]
    UniqueViolation {
        key: String,
        value: String,
        conflicting: ItemId,
    },

    #[error("required field {0:?} has no value")]
    RequiredFieldMissing(String),

    #[error("metadata item mismatch for item {item}")]
    MetadataMismatch { item: ItemId },

    #[error("item {target} referenced by field {key:?} was not found")]
    ReferenceNotFound { key: String, target: ItemId },

    #[error("item {0} belongs to another schema")]
    ForeignItem(ItemId),

    #[error("operator has neither a user nor an integration")]
    InvalidOperator,

    #[error("operation denied")]
    OperationDenied,

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        use ImportError::*;
        match self {
            Io(_)
            | Malformed { .. }
            | ExpectedArrayStart { .. }
            | FeaturesNotFound
            | NotAnObject { .. }
            | Decode { .. }
            | InvalidFieldKey(_)
            | GeometryFieldMissing
            | InvalidGeometryField(_)
            | NotFound { .. } => ErrorKind::Structural,
            DuplicateFieldKey(_)
            | InvalidValue { .. }
            | UniqueViolation { .. }
            | RequiredFieldMissing(_)
            | MetadataMismatch { .. }
            | ReferenceNotFound { .. }
            | ForeignItem(_) => ErrorKind::Validation,
            InvalidOperator | OperationDenied => ErrorKind::Authorization,
            Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ImportError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ImportError::FeaturesNotFound.kind(), ErrorKind::Structural);
        assert_eq!(
            ImportError::InvalidFieldKey("a b".into()).kind(),
            ErrorKind::Structural
        );
        assert_eq!(
            ImportError::MetadataMismatch {
                item: ItemId::new()
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(ImportError::OperationDenied.kind(), ErrorKind::Authorization);
        assert_eq!(
            ImportError::from(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Store
        );
    }
}

//! Turns raw input objects into import item parameters.
//!
//! An [`ImportItemParam`] is the transient, not-yet-validated form of one
//! item: an optional id, an optional metadata item id, and the raw values
//! keyed by field. Value conversion and validation happen later, in the
//! batch committer.

use serde_json::Value;

use crate::error::{ImportError, Result};
use crate::models::{Field, FieldId, ItemGroupId, ItemId, Key, Schema};
use crate::stream::JsonObject;

/// One raw value bound to a field by id and/or key.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFieldParam {
    pub field: Option<FieldId>,
    pub key: Option<Key>,
    pub value: Value,
    pub group: Option<ItemGroupId>,
}

impl ItemFieldParam {
    pub fn by_key(key: Key, value: Value) -> Self {
        Self {
            field: None,
            key: Some(key),
            value,
            group: None,
        }
    }
}

/// One item to import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportItemParam {
    pub item_id: Option<ItemId>,
    pub metadata_id: Option<ItemId>,
    pub fields: Vec<ItemFieldParam>,
}

/// How raw objects are laid out in the input.
#[derive(Debug, Clone, Copy)]
pub enum RecordLayout<'a> {
    /// Every key of the object is an item field.
    Flat,
    /// A GeoJSON feature: `geometry` goes to the given field and the item
    /// fields come from `properties`.
    Feature { geometry: &'a Field },
}

/// Resolve the geometry field for a GeoJSON run by id or key.
///
/// The field must exist and be geometry-typed.
pub fn resolve_geometry_field<'s>(schema: &'s Schema, name: Option<&str>) -> Result<&'s Field> {
    let name = name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ImportError::GeometryFieldMissing)?;
    if !Key::is_valid(name) {
        return Err(ImportError::InvalidGeometryField(name.to_string()));
    }
    schema
        .field_by_id_or_key(FieldId::parse(name), Some(name))
        .filter(|f| f.is_geometry())
        .ok_or_else(|| ImportError::InvalidGeometryField(name.to_string()))
}

/// Assemble one object. Returns `Ok(None)` for a GeoJSON feature whose
/// `properties` is missing or not an object; such features are skipped and
/// not counted.
pub fn assemble_item(obj: &JsonObject, layout: &RecordLayout<'_>) -> Result<Option<ImportItemParam>> {
    let mut param = ImportItemParam::default();

    let props = match layout {
        RecordLayout::Flat => obj,
        RecordLayout::Feature { geometry } => {
            if let Some(g) = obj.get("geometry").filter(|g| !g.is_null()) {
                param.fields.push(ItemFieldParam {
                    field: Some(geometry.id),
                    key: Some(geometry.key.clone()),
                    value: Value::String(g.to_string()),
                    group: None,
                });
            }
            match obj.get("properties") {
                Some(Value::Object(p)) => p,
                _ => return Ok(None),
            }
        }
    };

    for (k, v) in props {
        if k == "id" {
            param.item_id = v.as_str().and_then(ItemId::parse);
            continue;
        }
        let key = Key::new(k.as_str()).ok_or_else(|| ImportError::InvalidFieldKey(k.clone()))?;
        param.fields.push(ItemFieldParam::by_key(key, v.clone()));
    }

    Ok(Some(param))
}

/// Assemble every object of a chunk, dropping skipped features.
pub fn assemble_chunk(chunk: &[JsonObject], layout: &RecordLayout<'_>) -> Result<Vec<ImportItemParam>> {
    let mut params = Vec::with_capacity(chunk.len());
    for obj in chunk {
        if let Some(p) = assemble_item(obj, layout)? {
            params.push(p);
        }
    }
    Ok(params)
}

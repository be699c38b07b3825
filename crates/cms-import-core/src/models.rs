//! Core data models for the import pipeline.
//!
//! Identifiers, field keys, schemas, models, projects, items, and the
//! operator identity that an import runs on behalf of. These types are
//! serialized as-is by the store backends (camelCase JSON).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ImportError;
use crate::value::FieldValue;

/// Error returned when parsing an identifier from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid id: {0:?}")]
pub struct InvalidId(pub String);

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id, returning `None` for empty, nil, or malformed input.
            pub fn parse(s: &str) -> Option<Self> {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                match Uuid::parse_str(s) {
                    Ok(u) if !u.is_nil() => Some(Self(u)),
                    _ => None,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s).ok_or_else(|| InvalidId(s.to_string()))
            }
        }
    };
}

define_id!(WorkspaceId);
define_id!(ProjectId);
define_id!(ModelId);
define_id!(SchemaId);
define_id!(FieldId);
define_id!(ItemId);
define_id!(
    /// Identifies one instance of a group field's nested values within an item.
    ItemGroupId
);
define_id!(UserId);
define_id!(IntegrationId);
define_id!(AssetId);

// ═══════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════

/// URL-safe field key: ASCII letters, digits, `_` and `-`, 1 to 64 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

impl Key {
    pub const MAX_LEN: usize = 64;

    pub fn new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    pub fn is_valid(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= Self::MAX_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Key {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if Key::is_valid(&s) {
            Ok(Key(s))
        } else {
            Err(format!("invalid key: {:?}", s))
        }
    }
}

impl From<Key> for String {
    fn from(k: Key) -> Self {
        k.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Import options
// ═══════════════════════════════════════════════════════════════════════

/// Input document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// A top-level JSON array of objects.
    Json,
    /// A GeoJSON `FeatureCollection`; items come from its `features` array.
    GeoJson,
}

impl Format {
    /// Infer the format from a file extension. Unknown or missing
    /// extensions yield `None`.
    pub fn from_extension(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "geojson" => Some(Format::GeoJson),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::GeoJson => "geojson",
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "geojson" => Ok(Format::GeoJson),
            other => Err(format!(
                "unknown format: '{}'. Must be json or geojson.",
                other
            )),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict-resolution strategy, fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Insert,
    Update,
    Upsert,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Insert => "insert",
            Strategy::Update => "update",
            Strategy::Upsert => "upsert",
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Strategy::Insert),
            "update" => Ok(Strategy::Update),
            "upsert" => Ok(Strategy::Upsert),
            other => Err(format!(
                "unknown strategy: '{}'. Must be insert, update, or upsert.",
                other
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Schema
// ═══════════════════════════════════════════════════════════════════════

/// Type tag of a schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldType {
    Text,
    TextArea,
    Markdown,
    Integer,
    Number,
    Bool,
    Date,
    Url,
    Select {
        values: Vec<String>,
    },
    Geometry,
    Reference {
        model: ModelId,
        #[serde(default, rename = "correspondingField")]
        corresponding_field: Option<FieldId>,
    },
    Group {
        schema: SchemaId,
    },
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::TextArea => "textArea",
            FieldType::Markdown => "markdown",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::Url => "url",
            FieldType::Select { .. } => "select",
            FieldType::Geometry => "geometry",
            FieldType::Reference { .. } => "reference",
            FieldType::Group { .. } => "group",
        }
    }
}

/// A typed, keyed slot in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default)]
    pub id: FieldId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub key: Key,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, key: Key, field_type: FieldType) -> Self {
        Self {
            id: FieldId::new(),
            name: name.into(),
            description: String::new(),
            key,
            field_type,
            multiple: false,
            required: false,
            unique: false,
            default_value: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self.field_type, FieldType::Geometry)
    }
}

/// Ordered set of field definitions. Field keys are unique within a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: SchemaId,
    pub workspace: WorkspaceId,
    pub project: ProjectId,
    #[serde(default)]
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(id: SchemaId, workspace: WorkspaceId, project: ProjectId) -> Self {
        Self {
            id,
            workspace,
            project,
            fields: Vec::new(),
        }
    }

    /// Build a schema from a list of fields, rejecting duplicate keys.
    pub fn with_fields(
        id: SchemaId,
        workspace: WorkspaceId,
        project: ProjectId,
        fields: Vec<Field>,
    ) -> Result<Self, ImportError> {
        let mut schema = Self::new(id, workspace, project);
        for f in fields {
            schema.add_field(f)?;
        }
        Ok(schema)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_key(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key.as_str() == key)
    }

    pub fn has_field_by_key(&self, key: &str) -> bool {
        self.field_by_key(key).is_some()
    }

    /// Look up a field by id first, falling back to key.
    pub fn field_by_id_or_key(&self, id: Option<FieldId>, key: Option<&str>) -> Option<&Field> {
        id.and_then(|id| self.field(id))
            .or_else(|| key.and_then(|k| self.field_by_key(k)))
    }

    /// Append a field. Fails with [`ImportError::DuplicateFieldKey`] when
    /// the key is already taken.
    pub fn add_field(&mut self, field: Field) -> Result<(), ImportError> {
        if self.has_field_by_key(field.key.as_str()) {
            return Err(ImportError::DuplicateFieldKey(field.key.to_string()));
        }
        self.fields.push(field);
        Ok(())
    }

    /// Check the key-uniqueness invariant, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), ImportError> {
        let mut seen = HashSet::new();
        for f in &self.fields {
            if !seen.insert(f.key.as_str()) {
                return Err(ImportError::DuplicateFieldKey(f.key.to_string()));
            }
        }
        Ok(())
    }

    /// Sub-schema ids referenced by group fields.
    pub fn group_schema_ids(&self) -> Vec<SchemaId> {
        self.fields
            .iter()
            .filter_map(|f| match f.field_type {
                FieldType::Group { schema } => Some(schema),
                _ => None,
            })
            .collect()
    }
}

/// A schema together with the group sub-schemas its fields point at.
#[derive(Debug, Clone)]
pub struct SchemaPackage {
    pub schema: Schema,
    groups: HashMap<SchemaId, Schema>,
}

impl SchemaPackage {
    pub fn new(schema: Schema, groups: Vec<Schema>) -> Self {
        Self {
            schema,
            groups: groups.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn group(&self, id: SchemaId) -> Option<&Schema> {
        self.groups.get(&id)
    }

    /// Find a field in any group sub-schema, returning the group schema id
    /// alongside the field.
    pub fn group_field_by_id_or_key(
        &self,
        id: Option<FieldId>,
        key: Option<&str>,
    ) -> Option<(SchemaId, &Field)> {
        self.groups
            .values()
            .find_map(|s| s.field_by_id_or_key(id, key).map(|f| (s.id, f)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Project / Model
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub workspace: WorkspaceId,
    pub name: String,
}

/// A content type binding a primary schema and an optional metadata schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: ModelId,
    pub project: ProjectId,
    pub key: Key,
    pub name: String,
    pub schema: SchemaId,
    #[serde(default)]
    pub metadata: Option<SchemaId>,
}

// ═══════════════════════════════════════════════════════════════════════
// Item
// ═══════════════════════════════════════════════════════════════════════

/// Who created or last updated an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Actor {
    User(UserId),
    Integration(IntegrationId),
}

/// `user:<uuid>` or `integration:<uuid>`.
impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::Integration(id) => write!(f, "integration:{id}"),
        }
    }
}

/// Values of one field (optionally inside one group instance) of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemField {
    pub field: FieldId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<ItemGroupId>,
    pub value: Vec<FieldValue>,
}

impl ItemField {
    pub fn new(field: FieldId, group: Option<ItemGroupId>, value: Vec<FieldValue>) -> Self {
        Self {
            field,
            group,
            value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// One persisted content record conforming to a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub schema: SchemaId,
    pub model: ModelId,
    pub project: ProjectId,
    #[serde(default)]
    pub is_metadata: bool,
    #[serde(default)]
    pub fields: Vec<ItemField>,
    #[serde(default)]
    pub metadata_item: Option<ItemId>,
    #[serde(default)]
    pub original_item: Option<ItemId>,
    pub created_by: Actor,
    #[serde(default)]
    pub updated_by: Option<Actor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1 and increases with every update.
    pub version: u64,
}

impl Item {
    pub fn new(id: ItemId, schema: &Schema, model: ModelId, created_by: Actor) -> Self {
        let now = Utc::now();
        Self {
            id,
            schema: schema.id,
            model,
            project: schema.project,
            is_metadata: false,
            fields: Vec::new(),
            metadata_item: None,
            original_item: None,
            created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn field(&self, field: FieldId, group: Option<ItemGroupId>) -> Option<&ItemField> {
        self.fields
            .iter()
            .find(|f| f.field == field && f.group == group)
    }

    /// Values of a top-level (non-group) field.
    pub fn values(&self, field: FieldId) -> &[FieldValue] {
        self.field(field, None)
            .map(|f| f.value.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_value(&self, field: FieldId, canonical: &str) -> bool {
        self.values(field).iter().any(|v| v.canonical() == canonical)
    }

    /// Item ids referenced from a top-level reference field.
    pub fn references(&self, field: FieldId) -> Vec<ItemId> {
        self.values(field)
            .iter()
            .filter_map(FieldValue::as_reference)
            .collect()
    }

    /// Replace the values of each given field (matched by field and group),
    /// appending fields the item did not have yet.
    pub fn update_fields(&mut self, fields: Vec<ItemField>) {
        for nf in fields {
            match self
                .fields
                .iter_mut()
                .find(|f| f.field == nf.field && f.group == nf.group)
            {
                Some(existing) => existing.value = nf.value,
                None => self.fields.push(nf),
            }
        }
    }

    pub fn set_field(&mut self, field: FieldId, value: Vec<FieldValue>) {
        self.update_fields(vec![ItemField::new(field, None, value)]);
    }

    /// Drop a reference to `target` from a top-level field, if present.
    pub fn remove_reference(&mut self, field: FieldId, target: ItemId) -> bool {
        let Some(f) = self
            .fields
            .iter_mut()
            .find(|f| f.field == field && f.group.is_none())
        else {
            return false;
        };
        let before = f.value.len();
        f.value.retain(|v| v.as_reference() != Some(target));
        before != f.value.len()
    }

    /// Stamp the updater identity and bump the version.
    pub fn touch(&mut self, actor: Actor) {
        self.stamp(actor);
        self.version += 1;
    }

    /// Stamp the updater identity, keeping the version.
    pub fn stamp(&mut self, actor: Actor) {
        self.updated_by = Some(actor);
        self.updated_at = Utc::now();
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Operator
// ═══════════════════════════════════════════════════════════════════════

/// Access level of a user or integration in a workspace. Readers may not
/// import; writers may insert and update what they created; maintainers
/// may update anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
    Maintainer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Maintainer => "maintainer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reader" => Ok(Role::Reader),
            "writer" => Ok(Role::Writer),
            "maintainer" => Ok(Role::Maintainer),
            other => Err(format!(
                "unknown role: '{}'. Must be reader, writer, or maintainer.",
                other
            )),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user or integration with a role in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub actor: Actor,
    pub role: Role,
}

/// The identity an import runs on behalf of, with its workspace access.
#[derive(Debug, Clone, Default)]
pub struct Operator {
    pub user: Option<UserId>,
    pub integration: Option<IntegrationId>,
    pub writable_workspaces: HashSet<WorkspaceId>,
    pub maintaining_workspaces: HashSet<WorkspaceId>,
}

impl Operator {
    pub fn user(id: UserId) -> Self {
        Self {
            user: Some(id),
            ..Default::default()
        }
    }

    pub fn integration(id: IntegrationId) -> Self {
        Self {
            integration: Some(id),
            ..Default::default()
        }
    }

    pub fn with_writable(mut self, workspace: WorkspaceId) -> Self {
        self.writable_workspaces.insert(workspace);
        self
    }

    /// Maintainers may write to the workspace and update any item in it.
    pub fn with_maintainer(mut self, workspace: WorkspaceId) -> Self {
        self.writable_workspaces.insert(workspace);
        self.maintaining_workspaces.insert(workspace);
        self
    }

    /// Grant the access `role` carries in `workspace`.
    pub fn with_role(self, workspace: WorkspaceId, role: Role) -> Self {
        match role {
            Role::Reader => self,
            Role::Writer => self.with_writable(workspace),
            Role::Maintainer => self.with_maintainer(workspace),
        }
    }

    /// Every identity the operator carries.
    pub fn actors(&self) -> Vec<Actor> {
        self.user
            .map(Actor::User)
            .into_iter()
            .chain(self.integration.map(Actor::Integration))
            .collect()
    }

    /// The identity stamped on created and updated items. A user takes
    /// precedence over an integration.
    pub fn actor(&self) -> Option<Actor> {
        self.user
            .map(Actor::User)
            .or_else(|| self.integration.map(Actor::Integration))
    }

    pub fn is_writable_workspace(&self, workspace: WorkspaceId) -> bool {
        self.writable_workspaces.contains(&workspace)
    }

    /// Whether the operator may update `item`, which lives in `workspace`.
    pub fn can_update(&self, item: &Item, workspace: WorkspaceId) -> bool {
        if self.maintaining_workspaces.contains(&workspace) {
            return true;
        }
        if !self.is_writable_workspace(workspace) {
            return false;
        }
        match item.created_by {
            Actor::User(u) => self.user == Some(u),
            Actor::Integration(i) => self.integration == Some(i),
        }
    }
}

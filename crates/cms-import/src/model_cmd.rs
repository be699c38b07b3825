//! `cms-import model apply`: create or replace a project with its schemas
//! and models from a JSON definition file.
//!
//! ```json
//! {
//!   "project": { "id": "…", "workspace": "…", "name": "City data" },
//!   "schemas": [
//!     { "id": "…", "workspace": "…", "project": "…",
//!       "fields": [ { "id": "…", "name": "Name", "key": "name", "type": "text", "unique": true } ] }
//!   ],
//!   "models": [
//!     { "id": "…", "project": "…", "key": "places", "name": "Places", "schema": "…" }
//!   ],
//!   "members": [
//!     { "actor": { "kind": "user", "id": "…" }, "role": "maintainer" }
//!   ]
//! }
//! ```
//!
//! Field ids should be fixed in the file so that reference and group
//! fields can point at them across re-applies. Members are granted their
//! role in the project's workspace; imports check it.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use cms_import_core::models::{FieldType, Member, Model, Project, Schema, SchemaId};
use cms_import_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
pub struct ModelDefinition {
    pub project: Project,
    #[serde(default)]
    pub schemas: Vec<Schema>,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl ModelDefinition {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse model definition")
    }

    /// Check that every schema is well-formed and that models and group
    /// fields only point at schemas defined in the file.
    pub fn validate(&self) -> Result<()> {
        let defined: HashSet<SchemaId> = self.schemas.iter().map(|s| s.id).collect();

        for schema in &self.schemas {
            schema
                .validate()
                .with_context(|| format!("schema {}", schema.id))?;
            if schema.project != self.project.id {
                bail!("schema {} belongs to another project", schema.id);
            }
            if schema.workspace != self.project.workspace {
                bail!("schema {} belongs to another workspace", schema.id);
            }
            for field in schema.fields() {
                if let FieldType::Group { schema: group } = field.field_type {
                    if !defined.contains(&group) {
                        bail!("group field {} points at unknown schema {}", field.key, group);
                    }
                }
            }
        }

        let mut keys = HashSet::new();
        for model in &self.models {
            if model.project != self.project.id {
                bail!("model {} belongs to another project", model.key);
            }
            if !keys.insert(model.key.as_str()) {
                bail!("duplicate model key: {}", model.key);
            }
            for id in std::iter::once(model.schema).chain(model.metadata) {
                if !defined.contains(&id) {
                    bail!("model {} points at unknown schema {}", model.key, id);
                }
            }
        }

        let mut actors = HashSet::new();
        for member in &self.members {
            if !actors.insert(member.actor) {
                bail!("duplicate member: {}", member.actor);
            }
        }
        Ok(())
    }

    pub async fn apply(&self, store: &dyn Store) -> Result<()> {
        store.save_project(&self.project).await?;
        for schema in &self.schemas {
            store.save_schema(schema).await?;
        }
        for model in &self.models {
            store.save_model(model).await?;
        }
        for member in &self.members {
            store.save_member(self.project.workspace, member).await?;
        }
        info!(
            project = %self.project.id,
            schemas = self.schemas.len(),
            models = self.models.len(),
            members = self.members.len(),
            "model definition applied"
        );
        Ok(())
    }
}

/// CLI entry point for `cms-import model apply <definition.json>`.
pub async fn run_apply(config: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model definition {}", path.display()))?;
    let definition = ModelDefinition::from_json(&raw)?;
    definition.validate()?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    definition.apply(&store).await?;
    pool.close().await;

    println!(
        "applied project {} ({} schemas, {} models, {} members)",
        definition.project.id,
        definition.schemas.len(),
        definition.models.len(),
        definition.members.len()
    );
    for model in &definition.models {
        println!("  model {}  {}", model.key, model.id);
    }
    for member in &definition.members {
        println!("  member {}  {}", member.actor, member.role);
    }
    Ok(())
}

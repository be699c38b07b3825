//! Storage abstraction for the import pipeline.
//!
//! The [`Store`] trait covers the repository lookups the orchestrator needs
//! (projects, models, schemas) and opens [`StoreTransaction`]s through which
//! the batch committer reads and writes items. Every chunk is committed
//! through exactly one transaction.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`find_project`](Store::find_project) | Load a project by id |
//! | [`find_model`](Store::find_model) | Load a model by id |
//! | [`find_schema`](Store::find_schema) | Load a schema by id |
//! | [`find_item`](Store::find_item) | Load one committed item |
//! | [`count_items`](Store::count_items) | Count committed items of a schema |
//! | [`list_item_ids`](Store::list_item_ids) | Ids of committed items of a schema |
//! | [`save_project`](Store::save_project) | Insert or replace a project |
//! | [`save_model`](Store::save_model) | Insert or replace a model |
//! | [`save_schema`](Store::save_schema) | Insert or replace a schema |
//! | [`find_role`](Store::find_role) | Role of a user or integration in a workspace |
//! | [`save_member`](Store::save_member) | Insert or replace a workspace member |
//! | [`begin`](Store::begin) | Open a transaction |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Actor, FieldId, Item, ItemId, Member, Model, ModelId, Project, ProjectId, Role, Schema,
    SchemaId, WorkspaceId,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>>;

    async fn find_model(&self, id: ModelId) -> Result<Option<Model>>;

    async fn find_schema(&self, id: SchemaId) -> Result<Option<Schema>>;

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>>;

    async fn count_items(&self, schema: SchemaId) -> Result<u64>;

    /// Up to `limit` ids of committed items of `schema`, oldest first.
    async fn list_item_ids(&self, schema: SchemaId, limit: usize) -> Result<Vec<ItemId>>;

    async fn save_project(&self, project: &Project) -> Result<()>;

    async fn save_model(&self, model: &Model) -> Result<()>;

    async fn save_schema(&self, schema: &Schema) -> Result<()>;

    /// `None` when `actor` is not a member of `workspace`.
    async fn find_role(&self, workspace: WorkspaceId, actor: Actor) -> Result<Option<Role>>;

    async fn save_member(&self, workspace: WorkspaceId, member: &Member) -> Result<()>;

    /// Open a transaction. Writes become visible only after
    /// [`StoreTransaction::commit`]; dropping the transaction discards them.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Item reads and writes scoped to one transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Load the items with the given ids. Missing ids are left out.
    async fn find_items_by_ids(&mut self, ids: &[ItemId]) -> Result<Vec<Item>>;

    /// Ids of items of `schema` whose top-level `field` holds a value with
    /// the given canonical form.
    async fn find_item_ids_by_value(
        &mut self,
        schema: SchemaId,
        field: FieldId,
        canonical: &str,
    ) -> Result<Vec<ItemId>>;

    /// Insert or replace every item.
    async fn save_all(&mut self, items: &[Item]) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

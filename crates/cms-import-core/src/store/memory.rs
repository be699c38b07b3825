//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`s behind one `std::sync::RwLock`. A transaction stages its
//! writes locally and applies them all under a single write lock on commit,
//! so concurrent readers never see half a chunk.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Actor, FieldId, Item, ItemId, Member, Model, ModelId, Project, ProjectId, Role, Schema,
    SchemaId, WorkspaceId,
};

use super::{Store, StoreTransaction};

#[derive(Default)]
struct MemoryState {
    projects: HashMap<ProjectId, Project>,
    models: HashMap<ModelId, Model>,
    schemas: HashMap<SchemaId, Schema>,
    items: HashMap<ItemId, Item>,
    members: HashMap<(WorkspaceId, Actor), Role>,
}

/// In-memory store for tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of all committed items, in no particular order.
    pub fn items(&self) -> Vec<Item> {
        self.read().items.values().cloned().collect()
    }

    /// Seed committed items directly, bypassing transactions.
    pub fn insert_items(&self, items: impl IntoIterator<Item = Item>) {
        let mut state = self.write();
        for item in items {
            state.items.insert(item.id, item);
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>> {
        Ok(self.read().projects.get(&id).cloned())
    }

    async fn find_model(&self, id: ModelId) -> Result<Option<Model>> {
        Ok(self.read().models.get(&id).cloned())
    }

    async fn find_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        Ok(self.read().schemas.get(&id).cloned())
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.read().items.get(&id).cloned())
    }

    async fn count_items(&self, schema: SchemaId) -> Result<u64> {
        Ok(self
            .read()
            .items
            .values()
            .filter(|i| i.schema == schema)
            .count() as u64)
    }

    async fn list_item_ids(&self, schema: SchemaId, limit: usize) -> Result<Vec<ItemId>> {
        let state = self.read();
        let mut items: Vec<&Item> = state.items.values().filter(|i| i.schema == schema).collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items.into_iter().take(limit).map(|i| i.id).collect())
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        self.write().projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn save_model(&self, model: &Model) -> Result<()> {
        self.write().models.insert(model.id, model.clone());
        Ok(())
    }

    async fn save_schema(&self, schema: &Schema) -> Result<()> {
        self.write().schemas.insert(schema.id, schema.clone());
        Ok(())
    }

    async fn find_role(&self, workspace: WorkspaceId, actor: Actor) -> Result<Option<Role>> {
        Ok(self.read().members.get(&(workspace, actor)).copied())
    }

    async fn save_member(&self, workspace: WorkspaceId, member: &Member) -> Result<()> {
        self.write()
            .members
            .insert((workspace, member.actor), member.role);
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: HashMap::new(),
        }))
    }
}

struct MemoryTransaction {
    store: InMemoryStore,
    staged: HashMap<ItemId, Item>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_items_by_ids(&mut self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let state = self.store.read();
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.get(id).or_else(|| state.items.get(id)))
            .cloned()
            .collect())
    }

    async fn find_item_ids_by_value(
        &mut self,
        schema: SchemaId,
        field: FieldId,
        canonical: &str,
    ) -> Result<Vec<ItemId>> {
        let state = self.store.read();
        let committed = state
            .items
            .values()
            .filter(|i| !self.staged.contains_key(&i.id));
        Ok(committed
            .chain(self.staged.values())
            .filter(|i| i.schema == schema && i.has_value(field, canonical))
            .map(|i| i.id)
            .collect())
    }

    async fn save_all(&mut self, items: &[Item]) -> Result<()> {
        for item in items {
            self.staged.insert(item.id, item.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { store, staged } = *self;
        store.write().items.extend(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Actor, UserId, WorkspaceId};

    fn item(schema: &Schema) -> Item {
        Item::new(ItemId::new(), schema, ModelId::new(), Actor::User(UserId::new()))
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = InMemoryStore::new();
        let schema = Schema::new(SchemaId::new(), WorkspaceId::new(), ProjectId::new());
        let a = item(&schema);
        {
            let mut tx = store.begin().await.unwrap();
            tx.save_all(&[a.clone()]).await.unwrap();
            assert_eq!(tx.find_items_by_ids(&[a.id]).await.unwrap().len(), 1);
        }
        assert!(store.items().is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.save_all(&[a.clone()]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.find_item(a.id).await.unwrap(), Some(a));
        assert_eq!(store.count_items(schema.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn members_are_scoped_to_workspace() {
        let store = InMemoryStore::new();
        let ws = WorkspaceId::new();
        let actor = Actor::User(UserId::new());
        store
            .save_member(ws, &Member { actor, role: Role::Writer })
            .await
            .unwrap();
        assert_eq!(store.find_role(ws, actor).await.unwrap(), Some(Role::Writer));
        assert_eq!(store.find_role(WorkspaceId::new(), actor).await.unwrap(), None);
        assert_eq!(
            store.find_role(ws, Actor::User(UserId::new())).await.unwrap(),
            None
        );
    }
}

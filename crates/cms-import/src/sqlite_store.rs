//! SQLite-backed [`Store`] implementation.
//!
//! Projects, models, schemas and items are stored as JSON bodies next to the
//! columns needed to query them. Every top-level item value is mirrored into
//! `item_values` in its canonical form so unique-field checks are an index
//! lookup instead of a scan of item bodies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};

use cms_import_core::models::{
    Actor, FieldId, Item, ItemId, Member, Model, ModelId, Project, ProjectId, Role, Schema,
    SchemaId, WorkspaceId,
};
use cms_import_core::store::{Store, StoreTransaction};

/// SQLite's default bound-parameter limit is 999; stay well below it.
const ID_BATCH: usize = 500;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_body<T: DeserializeOwned + Send>(
        &self,
        table: &str,
        id: String,
    ) -> Result<Option<T>> {
        let row = sqlx::query(&format!("SELECT body_json FROM {table} WHERE id = ?"))
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("body_json");
                let value = serde_json::from_str(&body)
                    .with_context(|| format!("corrupt {table} row {id}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>> {
        self.find_body("projects", id.to_string()).await
    }

    async fn find_model(&self, id: ModelId) -> Result<Option<Model>> {
        self.find_body("models", id.to_string()).await
    }

    async fn find_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        self.find_body("schemas", id.to_string()).await
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>> {
        self.find_body("items", id.to_string()).await
    }

    async fn count_items(&self, schema: SchemaId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM items WHERE schema_id = ?")
            .bind(schema.to_string())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("cnt");
        Ok(count.max(0) as u64)
    }

    async fn list_item_ids(&self, schema: SchemaId, limit: usize) -> Result<Vec<ItemId>> {
        let rows = sqlx::query("SELECT id FROM items WHERE schema_id = ? ORDER BY rowid LIMIT ?")
            .bind(schema.to_string())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.get("id");
                ItemId::parse(&raw).with_context(|| format!("corrupt item id: {raw}"))
            })
            .collect()
    }

    async fn save_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, workspace_id, body_json)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                body_json = excluded.body_json
            "#,
        )
        .bind(project.id.to_string())
        .bind(project.workspace.to_string())
        .bind(serde_json::to_string(project)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_model(&self, model: &Model) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO models (id, project_id, key, body_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                key = excluded.key,
                body_json = excluded.body_json
            "#,
        )
        .bind(model.id.to_string())
        .bind(model.project.to_string())
        .bind(model.key.as_str())
        .bind(serde_json::to_string(model)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_schema(&self, schema: &Schema) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schemas (id, workspace_id, project_id, body_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                project_id = excluded.project_id,
                body_json = excluded.body_json
            "#,
        )
        .bind(schema.id.to_string())
        .bind(schema.workspace.to_string())
        .bind(schema.project.to_string())
        .bind(serde_json::to_string(schema)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_role(&self, workspace: WorkspaceId, actor: Actor) -> Result<Option<Role>> {
        let row = sqlx::query("SELECT role FROM members WHERE workspace_id = ? AND actor = ?")
            .bind(workspace.to_string())
            .bind(actor.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("role");
                let role = raw
                    .parse::<Role>()
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("corrupt members row {workspace}/{actor}"))?;
                Ok(Some(role))
            }
            None => Ok(None),
        }
    }

    async fn save_member(&self, workspace: WorkspaceId, member: &Member) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO members (workspace_id, actor, role)
            VALUES (?, ?, ?)
            ON CONFLICT(workspace_id, actor) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(workspace.to_string())
        .bind(member.actor.to_string())
        .bind(member.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

/// One SQLite transaction. Dropping it without [`commit`](StoreTransaction::commit)
/// rolls back.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn find_items_by_ids(&mut self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let mut items = Vec::with_capacity(ids.len());

        for batch in ids.chunks(ID_BATCH) {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT body_json FROM items WHERE id IN (");
            let mut separated = qb.separated(", ");
            for id in batch {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&mut *self.tx).await?;
            for row in rows {
                let body: String = row.get("body_json");
                items.push(serde_json::from_str(&body).context("corrupt item row")?);
            }
        }

        Ok(items)
    }

    async fn find_item_ids_by_value(
        &mut self,
        schema: SchemaId,
        field: FieldId,
        canonical: &str,
    ) -> Result<Vec<ItemId>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT item_id FROM item_values
            WHERE schema_id = ? AND field_id = ? AND value = ?
            "#,
        )
        .bind(schema.to_string())
        .bind(field.to_string())
        .bind(canonical)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.get("item_id");
                ItemId::parse(&raw)
                    .with_context(|| format!("corrupt item id in item_values: {raw}"))
            })
            .collect()
    }

    async fn save_all(&mut self, items: &[Item]) -> Result<()> {
        for item in items {
            let id = item.id.to_string();
            let schema_id = item.schema.to_string();

            sqlx::query(
                r#"
                INSERT INTO items (id, schema_id, model_id, project_id, version, updated_at, body_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    schema_id = excluded.schema_id,
                    model_id = excluded.model_id,
                    project_id = excluded.project_id,
                    version = excluded.version,
                    updated_at = excluded.updated_at,
                    body_json = excluded.body_json
                "#,
            )
            .bind(&id)
            .bind(&schema_id)
            .bind(item.model.to_string())
            .bind(item.project.to_string())
            .bind(item.version as i64)
            .bind(item.updated_at.timestamp())
            .bind(serde_json::to_string(item)?)
            .execute(&mut *self.tx)
            .await?;

            sqlx::query("DELETE FROM item_values WHERE item_id = ?")
                .bind(&id)
                .execute(&mut *self.tx)
                .await?;

            for f in item.fields.iter().filter(|f| f.group.is_none()) {
                let field_id = f.field.to_string();
                for v in &f.value {
                    sqlx::query(
                        "INSERT INTO item_values (item_id, schema_id, field_id, value) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&id)
                    .bind(&schema_id)
                    .bind(&field_id)
                    .bind(v.canonical())
                    .execute(&mut *self.tx)
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

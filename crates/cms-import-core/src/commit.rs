//! Batch committer: applies one chunk of item params inside one transaction.
//!
//! For every candidate the committer decides insert / update / ignore from
//! the run's [`Strategy`], checks permissions, links metadata items,
//! converts and validates field values, maintains two-way references, and
//! stages the result. All staged items are written with one `save_all`.
//!
//! Any error returned from [`commit_chunk`] means the caller must drop the
//! transaction without committing. The accumulator passed in is updated as
//! items are processed, so callers hand in a scratch copy and keep it only
//! when the transaction commits.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::assemble::{ImportItemParam, ItemFieldParam};
use crate::error::{ImportError, Result};
use crate::models::{
    Actor, Field, FieldId, FieldType, Item, ItemField, ItemId, Model, Operator, Project,
    SchemaPackage, Strategy,
};
use crate::result::ImportResult;
use crate::store::StoreTransaction;
use crate::value::{self, FieldValue};

/// Everything about the run a chunk commit needs to know.
#[derive(Debug, Clone, Copy)]
pub struct ChunkContext<'a> {
    pub project: &'a Project,
    pub model: &'a Model,
    /// Target schema (primary or metadata) plus its group sub-schemas.
    pub schema: &'a SchemaPackage,
    pub strategy: Strategy,
    pub operator: &'a Operator,
}

impl ChunkContext<'_> {
    fn is_metadata(&self) -> bool {
        self.model.metadata == Some(self.schema.schema.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Insert,
    Update,
}

fn decide(strategy: Strategy, exists: bool) -> Option<Action> {
    match (strategy, exists) {
        (Strategy::Insert, true) | (Strategy::Update, false) => None,
        (Strategy::Insert, false) | (Strategy::Upsert, false) => Some(Action::Insert),
        (Strategy::Update, true) | (Strategy::Upsert, true) => Some(Action::Update),
    }
}

/// Items written by this chunk, deduplicated by id. A later write of the
/// same id replaces the earlier one in place.
#[derive(Default)]
struct Staged {
    items: Vec<Item>,
    index: HashMap<ItemId, usize>,
}

impl Staged {
    fn get(&self, id: ItemId) -> Option<&Item> {
        self.index.get(&id).map(|&i| &self.items[i])
    }

    fn put(&mut self, item: Item) {
        match self.index.get(&item.id) {
            Some(&i) => self.items[i] = item,
            None => {
                self.index.insert(item.id, self.items.len());
                self.items.push(item);
            }
        }
    }
}

/// Values of unique fields claimed by items of this chunk.
#[derive(Default)]
struct UniqueIndex {
    owners: HashMap<(FieldId, String), ItemId>,
    claimed: HashMap<(FieldId, ItemId), Vec<String>>,
}

impl UniqueIndex {
    fn owner(&self, field: FieldId, canonical: &str) -> Option<ItemId> {
        self.owners.get(&(field, canonical.to_string())).copied()
    }

    fn claim(&mut self, field: FieldId, item: ItemId, values: Vec<String>) {
        if let Some(previous) = self.claimed.remove(&(field, item)) {
            for v in previous {
                self.owners.remove(&(field, v));
            }
        }
        for v in &values {
            self.owners.insert((field, v.clone()), item);
        }
        self.claimed.insert((field, item), values);
    }
}

struct Committer<'c, 'a> {
    tx: &'c mut dyn StoreTransaction,
    ctx: &'c ChunkContext<'a>,
    actor: Actor,
    staged: Staged,
    unique: UniqueIndex,
    old_items: HashMap<ItemId, Item>,
    old_meta: HashMap<ItemId, Item>,
    /// Items whose version already moved in this chunk.
    versioned: HashSet<ItemId>,
}

/// Apply one chunk. Returns the number of items handed to `save_all`,
/// linked metadata items and reference partners included.
pub async fn commit_chunk(
    tx: &mut dyn StoreTransaction,
    ctx: &ChunkContext<'_>,
    items: Vec<ImportItemParam>,
    res: &mut ImportResult,
) -> Result<usize> {
    let actor = ctx.operator.actor().ok_or(ImportError::InvalidOperator)?;

    let ids: Vec<ItemId> = items.iter().filter_map(|p| p.item_id).collect();
    let old_items = by_id(tx.find_items_by_ids(&ids).await?);
    let meta_ids: Vec<ItemId> = items.iter().filter_map(|p| p.metadata_id).collect();
    let old_meta = if meta_ids.is_empty() {
        HashMap::new()
    } else {
        by_id(tx.find_items_by_ids(&meta_ids).await?)
    };

    let mut committer = Committer {
        tx,
        ctx,
        actor,
        staged: Staged::default(),
        unique: UniqueIndex::default(),
        old_items,
        old_meta,
        versioned: HashSet::new(),
    };

    let count_items = !ctx.is_metadata();
    for param in items {
        let outcome = committer.apply(param).await?;
        if !count_items {
            continue;
        }
        match outcome {
            None => res.item_skipped(),
            Some(Action::Insert) => res.item_inserted(),
            Some(Action::Update) => res.item_updated(),
        }
    }

    let Committer { tx, staged, .. } = committer;
    debug!(items = staged.items.len(), "saving chunk");
    tx.save_all(&staged.items).await?;
    Ok(staged.items.len())
}

fn by_id(items: Vec<Item>) -> HashMap<ItemId, Item> {
    items.into_iter().map(|i| (i.id, i)).collect()
}

impl Committer<'_, '_> {
    /// Stamp an update on `item`. The version moves at most once per chunk,
    /// however many times the item is written.
    fn touch(&mut self, item: &mut Item) {
        if self.versioned.insert(item.id) {
            item.touch(self.actor);
        } else {
            item.stamp(self.actor);
        }
    }

    /// Current version of an item as seen by this chunk: staged first, then
    /// the prefetched map, then the transaction.
    async fn load(&mut self, id: ItemId) -> Result<Option<Item>> {
        if let Some(item) = self.staged.get(id) {
            return Ok(Some(item.clone()));
        }
        if let Some(item) = self.old_items.get(&id).or_else(|| self.old_meta.get(&id)) {
            return Ok(Some(item.clone()));
        }
        Ok(self.tx.find_items_by_ids(&[id]).await?.into_iter().next())
    }

    async fn apply(&mut self, param: ImportItemParam) -> Result<Option<Action>> {
        let ctx = self.ctx;
        let schema = &ctx.schema.schema;
        let workspace = ctx.project.workspace;

        let existing = match param.item_id {
            Some(id) => match self.staged.get(id) {
                Some(item) => Some(item.clone()),
                None => self.old_items.get(&id).cloned(),
            },
            None => None,
        };
        if let Some(old) = &existing {
            if old.schema != schema.id {
                return Err(ImportError::ForeignItem(old.id));
            }
        }

        let Some(action) = decide(ctx.strategy, existing.is_some()) else {
            return Ok(None);
        };

        let (mut item, old_fields) = match (action, existing) {
            (Action::Update, Some(mut old)) => {
                if !ctx.operator.can_update(&old, workspace) {
                    return Err(ImportError::OperationDenied);
                }
                let old_fields = old.fields.clone();
                self.touch(&mut old);
                (old, old_fields)
            }
            _ => {
                // Inserted items never take the id from the input.
                let mut item = Item::new(ItemId::new(), schema, ctx.model.id, self.actor);
                item.is_metadata = ctx.is_metadata();
                self.versioned.insert(item.id);
                (item, Vec::new())
            }
        };

        if let Some(meta_id) = param.metadata_id {
            self.link_metadata(&mut item, meta_id).await?;
        }

        let (direct, other): (Vec<ItemFieldParam>, Vec<ItemFieldParam>) =
            param.fields.into_iter().partition(|p| {
                p.group.is_none()
                    && schema
                        .field_by_id_or_key(p.field, p.key.as_ref().map(|k| k.as_str()))
                        .is_some()
            });

        let mut fields = Vec::with_capacity(direct.len());
        let mut touched = HashSet::new();
        for p in direct {
            let Some(field) = schema.field_by_id_or_key(p.field, p.key.as_ref().map(|k| k.as_str()))
            else {
                continue;
            };
            let values = resolve_values(field, &p.value)?;
            touched.insert(field.id);
            fields.push(ItemField::new(field.id, None, values));
        }

        if action == Action::Insert {
            for field in schema.fields() {
                if touched.contains(&field.id) {
                    continue;
                }
                if let Some(default) = &field.default_value {
                    let values = resolve_values(field, default)?;
                    touched.insert(field.id);
                    fields.push(ItemField::new(field.id, None, values));
                }
            }
        }

        self.check_unique(item.id, &fields).await?;
        item.update_fields(fields);

        let group_fields = self.resolve_group_fields(&item, other)?;
        item.update_fields(group_fields);

        for field in schema.fields().iter().filter(|f| f.required) {
            let checked = action == Action::Insert || touched.contains(&field.id);
            if checked && item.values(field.id).is_empty() {
                return Err(ImportError::RequiredFieldMissing(field.key.to_string()));
            }
        }

        self.handle_references(&mut item, &old_fields, &touched).await?;

        self.staged.put(item);
        Ok(Some(action))
    }

    async fn link_metadata(&mut self, item: &mut Item, meta_id: ItemId) -> Result<()> {
        let item_id = item.id;
        let mismatch = || ImportError::MetadataMismatch { item: item_id };
        let Some(mut meta) = self.load(meta_id).await? else {
            return Err(mismatch());
        };
        if self.ctx.model.metadata != Some(meta.schema) {
            return Err(mismatch());
        }
        if item.metadata_item.is_some_and(|m| m != meta_id) {
            return Err(mismatch());
        }
        if meta.original_item.is_some_and(|o| o != item.id) {
            return Err(mismatch());
        }
        item.metadata_item = Some(meta_id);
        if meta.original_item.is_none() {
            meta.original_item = Some(item.id);
            self.touch(&mut meta);
        }
        self.staged.put(meta);
        Ok(())
    }

    async fn check_unique(&mut self, item_id: ItemId, fields: &[ItemField]) -> Result<()> {
        let ctx = self.ctx;
        let schema = &ctx.schema.schema;
        for f in fields {
            let Some(field) = schema.field(f.field).filter(|d| d.unique) else {
                continue;
            };
            let values: Vec<String> = f.value.iter().map(FieldValue::canonical).collect();
            for canonical in &values {
                if let Some(owner) = self.unique.owner(field.id, canonical) {
                    if owner != item_id {
                        return Err(unique_violation(field, canonical, owner));
                    }
                }
                let found = self
                    .tx
                    .find_item_ids_by_value(schema.id, field.id, canonical)
                    .await?;
                for other in found {
                    if other == item_id {
                        continue;
                    }
                    // Another item of this chunk may have moved off the value.
                    if let Some(staged) = self.staged.get(other) {
                        if !staged.has_value(field.id, canonical) {
                            continue;
                        }
                    }
                    return Err(unique_violation(field, canonical, other));
                }
            }
            self.unique.claim(field.id, item_id, values);
        }
        Ok(())
    }

    /// Resolve params that target group sub-schema fields. A param is kept
    /// only when its group instance exists on the item; everything else is
    /// ignored.
    fn resolve_group_fields(&self, item: &Item, params: Vec<ItemFieldParam>) -> Result<Vec<ItemField>> {
        let package = self.ctx.schema;
        let mut out = Vec::new();
        for p in params {
            let Some(group) = p.group else {
                debug!(key = ?p.key, "ignoring param that matches no field");
                continue;
            };
            let Some((group_schema, field)) =
                package.group_field_by_id_or_key(p.field, p.key.as_ref().map(|k| k.as_str()))
            else {
                debug!(key = ?p.key, "ignoring group param that matches no field");
                continue;
            };
            let instance_exists = package.schema.fields().iter().any(|gf| {
                matches!(gf.field_type, FieldType::Group { schema } if schema == group_schema)
                    && item
                        .values(gf.id)
                        .iter()
                        .any(|v| v.as_group() == Some(group))
            });
            if !instance_exists {
                debug!(%group, "ignoring param for unknown group instance");
                continue;
            }
            let values = resolve_values(field, &p.value)?;
            out.push(ItemField::new(field.id, Some(group), values));
        }
        Ok(out)
    }

    async fn handle_references(
        &mut self,
        item: &mut Item,
        old_fields: &[ItemField],
        touched: &HashSet<FieldId>,
    ) -> Result<()> {
        let ctx = self.ctx;
        for field in ctx.schema.schema.fields() {
            let FieldType::Reference {
                model,
                corresponding_field,
            } = field.field_type
            else {
                continue;
            };
            if !touched.contains(&field.id) {
                continue;
            }

            let new_refs = item.references(field.id);
            let old_refs: Vec<ItemId> = old_fields
                .iter()
                .find(|f| f.field == field.id && f.group.is_none())
                .map(|f| f.value.iter().filter_map(FieldValue::as_reference).collect())
                .unwrap_or_default();

            for &target_id in &new_refs {
                let target = self
                    .load(target_id)
                    .await?
                    .filter(|t| t.model == model)
                    .ok_or_else(|| ImportError::ReferenceNotFound {
                        key: field.key.to_string(),
                        target: target_id,
                    })?;

                let Some(cf) = corresponding_field else {
                    continue;
                };
                if old_refs.contains(&target_id) {
                    continue;
                }
                self.attach(item, field, cf, target).await?;
            }

            let Some(cf) = corresponding_field else {
                continue;
            };
            for &removed in old_refs.iter().filter(|r| !new_refs.contains(r)) {
                if let Some(mut target) = self.load(removed).await? {
                    if target.remove_reference(cf, item.id) {
                        self.touch(&mut target);
                        self.staged.put(target);
                    }
                }
            }
        }
        Ok(())
    }

    /// Point `target`'s corresponding field back at `item`, detaching the
    /// item it pointed at before.
    async fn attach(&mut self, item: &Item, field: &Field, cf: FieldId, mut target: Item) -> Result<()> {
        for partner_id in target.references(cf) {
            if partner_id == item.id {
                continue;
            }
            if let Some(mut partner) = self.load(partner_id).await? {
                if partner.remove_reference(field.id, target.id) {
                    self.touch(&mut partner);
                    self.staged.put(partner);
                }
            }
        }
        target.set_field(cf, vec![FieldValue::Reference(item.id)]);
        self.touch(&mut target);
        self.staged.put(target);
        Ok(())
    }
}

fn resolve_values(field: &Field, raw: &serde_json::Value) -> Result<Vec<FieldValue>> {
    value::resolve(field, raw).map_err(|source| ImportError::InvalidValue {
        key: field.key.to_string(),
        source,
    })
}

fn unique_violation(field: &Field, canonical: &str, conflicting: ItemId) -> ImportError {
    ImportError::UniqueViolation {
        key: field.key.to_string(),
        value: canonical.to_string(),
        conflicting,
    }
}

//! Item and model retrieval by ID.
//!
//! # Usage
//!
//! ```bash
//! # Print an item as JSON
//! cms-import item get 550e8400-e29b-41d4-a716-446655440000
//!
//! # Show a model, its schema fields, and how many items it holds
//! cms-import model show 7d1f0c1e-8a7b-4d2c-9a51-2f1c3e0a9b44
//!
//! # List item ids of a model, oldest first
//! cms-import item list --model 7d1f0c1e-8a7b-4d2c-9a51-2f1c3e0a9b44 --limit 20
//! ```

use anyhow::{bail, Context, Result};

use cms_import_core::models::{Item, ItemId, ModelId};
use cms_import_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

fn parse_id<T: std::str::FromStr>(kind: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .ok()
        .with_context(|| format!("invalid {kind} id: {raw}"))
}

/// Fetch one committed item.
pub async fn get_item(config: &Config, id: &str) -> Result<Item> {
    let id: ItemId = parse_id("item", id)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let result = store.find_item(id).await?;
    pool.close().await;

    match result {
        Some(item) => Ok(item),
        None => bail!("item not found: {}", id),
    }
}

/// CLI entry point for `cms-import item get <id>`.
pub async fn run_get_item(config: &Config, id: &str) -> Result<()> {
    let item = get_item(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

/// CLI entry point for `cms-import item list --model <id>`. Prints one
/// `<id>  v<version>` line per item.
pub async fn run_list_items(config: &Config, model: &str, limit: usize) -> Result<()> {
    let model: ModelId = parse_id("model", model)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let Some(model) = store.find_model(model).await? else {
        pool.close().await;
        bail!("model not found: {}", model);
    };
    let mut items = Vec::new();
    for id in store.list_item_ids(model.schema, limit).await? {
        if let Some(item) = store.find_item(id).await? {
            items.push(item);
        }
    }
    pool.close().await;

    for item in &items {
        println!("{}  v{}", item.id, item.version);
    }
    Ok(())
}

/// CLI entry point for `cms-import model show <id>`.
pub async fn run_show_model(config: &Config, id: &str) -> Result<()> {
    let id: ModelId = parse_id("model", id)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let Some(model) = store.find_model(id).await? else {
        pool.close().await;
        bail!("model not found: {}", id);
    };
    let schema = store.find_schema(model.schema).await?;
    let count = match &schema {
        Some(s) => store.count_items(s.id).await?,
        None => 0,
    };
    pool.close().await;

    println!("--- Model ---");
    println!("id:       {}", model.id);
    println!("key:      {}", model.key);
    println!("name:     {}", model.name);
    println!("project:  {}", model.project);
    println!("schema:   {}", model.schema);
    if let Some(meta) = model.metadata {
        println!("metadata: {}", meta);
    }
    println!("items:    {}", count);
    println!();

    match schema {
        Some(schema) => {
            println!("--- Fields ({}) ---", schema.fields().len());
            for f in schema.fields() {
                let mut flags = Vec::new();
                if f.required {
                    flags.push("required");
                }
                if f.unique {
                    flags.push("unique");
                }
                if f.multiple {
                    flags.push("multiple");
                }
                println!(
                    "{:<24} {:<10} {}",
                    f.key.as_str(),
                    f.field_type.name(),
                    flags.join(",")
                );
            }
        }
        None => println!("(schema {} missing)", model.schema),
    }

    Ok(())
}

//! `cms-import import`: load a JSON or GeoJSON file into a model.
//!
//! ```bash
//! cms-import import ./points.geojson --model <MODEL_ID> \
//!     --strategy upsert --geometry-field location --mutate-schema
//! ```
//!
//! The file is streamed and committed in chunks of `import.chunk_size`
//! objects. When a chunk fails, earlier chunks stay committed; the command
//! prints the counts reached so far and exits non-zero.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

use cms_import_core::models::{Format, IntegrationId, ModelId, Operator, Strategy, UserId};
use cms_import_core::store::Store;
use cms_import_core::{run_import, ImportParams, ImportResponse};

use crate::config::Config;
use crate::db;
use crate::progress::{format_number, ProgressMode};
use crate::sqlite_store::SqliteStore;

/// Options of one `import` invocation, as parsed from the command line.
#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub model: ModelId,
    pub format: Option<Format>,
    pub strategy: Strategy,
    pub geometry_field: Option<String>,
    pub mutate_schema: bool,
    pub metadata: bool,
    pub user: Option<UserId>,
    pub integration: Option<IntegrationId>,
}

/// Build the operator for a command line or job run from the identities
/// given. It carries no workspace access until [`with_workspace_roles`].
pub fn operator_for(user: Option<UserId>, integration: Option<IntegrationId>) -> Operator {
    Operator {
        user,
        integration,
        ..Default::default()
    }
}

/// Grant `operator` the roles its identities hold in the workspace of the
/// model's schema. Identities that are not members get no access, so the
/// import is denied.
pub async fn with_workspace_roles(
    store: &dyn Store,
    model: ModelId,
    mut operator: Operator,
) -> Result<Operator> {
    let Some(model) = store.find_model(model).await? else {
        // The import itself reports the missing model.
        return Ok(operator);
    };
    let Some(schema) = store.find_schema(model.schema).await? else {
        return Ok(operator);
    };
    for actor in operator.actors() {
        match store.find_role(schema.workspace, actor).await? {
            Some(role) => {
                debug!(%actor, %role, workspace = %schema.workspace, "workspace role");
                operator = operator.with_role(schema.workspace, role);
            }
            None => debug!(%actor, workspace = %schema.workspace, "not a workspace member"),
        }
    }
    Ok(operator)
}

/// Resolve the input format from the flag, falling back to the extension.
pub fn resolve_format(path: &Path, flag: Option<Format>) -> Result<Format> {
    match flag.or_else(|| Format::from_extension(path)) {
        Some(f) => Ok(f),
        None => bail!(
            "cannot tell the format of {} from its extension; pass --format json|geojson",
            path.display()
        ),
    }
}

/// CLI entry point for `cms-import import <file>`.
pub async fn run_import_cmd(
    config: &Config,
    path: &Path,
    args: ImportArgs,
    progress: ProgressMode,
) -> Result<()> {
    let format = resolve_format(path, args.format)?;
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let operator =
        with_workspace_roles(&store, args.model, operator_for(args.user, args.integration))
            .await?;

    let mut params = ImportParams::new(args.model, format, args.strategy);
    params.geometry_field = args.geometry_field;
    params.mutate_schema = args.mutate_schema;
    params.metadata = args.metadata;
    params.chunk_size = config.import.chunk_size;
    params.inference_sample_size = config.import.inference_sample_size;

    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let reporter = progress.reporter(&label);

    let outcome = run_import(&store, file, &params, &operator, reporter.as_ref()).await;
    pool.close().await;

    println!("import {}", path.display());
    print_response(&outcome.response);

    match outcome.error {
        None => {
            println!("ok");
            Ok(())
        }
        Some(e) => bail!(
            "import stopped after {} items ({}): {}",
            format_number(outcome.response.total),
            outcome.state,
            e
        ),
    }
}

pub(crate) fn print_response(r: &ImportResponse) {
    println!("  total:      {}", format_number(r.total));
    println!("  inserted:   {}", format_number(r.inserted));
    println!("  updated:    {}", format_number(r.updated));
    println!("  ignored:    {}", format_number(r.ignored));
    if !r.new_fields.is_empty() {
        let keys: Vec<&str> = r.new_fields.iter().map(|f| f.key.as_str()).collect();
        println!("  new fields: {}", keys.join(", "));
    }
}

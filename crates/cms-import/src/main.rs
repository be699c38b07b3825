//! # cms-import CLI
//!
//! The `cms-import` binary loads large JSON and GeoJSON documents into
//! content models stored in SQLite.
//!
//! ## Usage
//!
//! ```bash
//! cms-import --config ./config/cms-import.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cms-import init` | Create the SQLite database and run schema migrations |
//! | `cms-import model apply <file>` | Create or replace a project, its schemas and models |
//! | `cms-import model show <id>` | Show a model, its fields and item count |
//! | `cms-import import <file> --model <id>` | Import a JSON or GeoJSON file |
//! | `cms-import job trigger ...` | Queue an import of an asset and wait for it |
//! | `cms-import job run <payload>` | Run a serialized import job payload |
//! | `cms-import item get <id>` | Print an item as JSON |
//! | `cms-import item list --model <id>` | List item ids of a model |
//!
//! ## Examples
//!
//! ```bash
//! cms-import init
//! cms-import model apply ./models/city.json
//! cms-import import ./data/places.json --model <MODEL_ID> --user <USER_ID> --strategy upsert
//! cms-import import ./data/parks.geojson --model <MODEL_ID> --user <USER_ID> \
//!     --geometry-field location --mutate-schema
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cms_import::config;
use cms_import::get;
use cms_import::import_cmd::{self, ImportArgs};
use cms_import::jobs;
use cms_import::logging;
use cms_import::migrate;
use cms_import::model_cmd;
use cms_import::progress::ProgressMode;
use cms_import_core::job::ImportJobPayload;
use cms_import_core::models::{AssetId, Format, IntegrationId, ModelId, Strategy, UserId};

/// Streaming JSON/GeoJSON bulk import for a headless CMS.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "cms-import",
    about = "Streaming JSON/GeoJSON bulk item import for a headless CMS",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cms-import.toml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// multiple times is safe.
    Init,

    /// Manage models and their schemas.
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Import a JSON array or GeoJSON FeatureCollection into a model.
    ///
    /// The file is streamed and committed chunk by chunk. If a chunk fails,
    /// earlier chunks stay committed and the command exits non-zero.
    Import {
        /// Path to the input file.
        file: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Input format. Defaults to the file extension.
        #[arg(long)]
        format: Option<Format>,

        /// Import into the model's metadata schema.
        #[arg(long)]
        metadata: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Background import jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Read items.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
}

/// Options shared by `import` and `job trigger`.
#[derive(clap::Args)]
struct TargetArgs {
    /// Target model id.
    #[arg(long)]
    model: ModelId,

    /// Conflict strategy: `insert`, `update`, or `upsert`.
    #[arg(long, default_value = "insert")]
    strategy: Strategy,

    /// Id or key of the geometry field (GeoJSON only).
    #[arg(long)]
    geometry_field: Option<String>,

    /// Add schema fields for unknown keys before importing.
    #[arg(long)]
    mutate_schema: bool,

    /// Act as this user. Its role in the model's workspace decides what the
    /// import may do.
    #[arg(long, required_unless_present = "integration")]
    user: Option<UserId>,

    /// Act as this integration.
    #[arg(long)]
    integration: Option<IntegrationId>,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Create or replace a project with its schemas and models.
    Apply {
        /// Path to the JSON model definition.
        file: PathBuf,
    },
    /// Show a model, its schema fields, and its item count.
    Show {
        /// Model UUID.
        id: String,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Queue an import of an asset from `[assets].dir` and wait for it.
    Trigger {
        /// Asset id.
        #[arg(long)]
        asset: AssetId,

        #[command(flatten)]
        target: TargetArgs,

        /// Asset format.
        #[arg(long)]
        format: Format,
    },
    /// Run a serialized job payload (JSON) in the foreground.
    Run {
        /// Path to the payload file.
        payload: PathBuf,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Print an item as JSON.
    Get {
        /// Item UUID.
        id: String,
    },
    /// List item ids of a model, oldest first.
    List {
        /// Model UUID.
        #[arg(long)]
        model: String,

        /// Maximum number of items.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging, cli.verbose);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Model { action } => match action {
            ModelAction::Apply { file } => model_cmd::run_apply(&cfg, &file).await?,
            ModelAction::Show { id } => get::run_show_model(&cfg, &id).await?,
        },
        Commands::Import {
            file,
            target,
            format,
            metadata,
            progress,
        } => {
            let args = ImportArgs {
                model: target.model,
                format,
                strategy: target.strategy,
                geometry_field: target.geometry_field,
                mutate_schema: target.mutate_schema,
                metadata,
                user: target.user,
                integration: target.integration,
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            import_cmd::run_import_cmd(&cfg, &file, args, progress).await?;
        }
        Commands::Job { action } => match action {
            JobAction::Trigger {
                asset,
                target,
                format,
            } => {
                let operator = import_cmd::operator_for(target.user, target.integration);
                let payload = ImportJobPayload {
                    model_id: target.model,
                    asset_id: asset,
                    format,
                    geometry_field_key: target.geometry_field,
                    strategy: target.strategy,
                    mutate_schema: target.mutate_schema,
                    user_id: operator.user,
                    integration_id: operator.integration,
                };
                jobs::run_job_trigger(&cfg, payload).await?;
            }
            JobAction::Run { payload } => jobs::run_job_file(&cfg, &payload).await?,
        },
        Commands::Item { action } => match action {
            ItemAction::Get { id } => get::run_get_item(&cfg, &id).await?,
            ItemAction::List { model, limit } => get::run_list_items(&cfg, &model, limit).await?,
        },
    }

    Ok(())
}

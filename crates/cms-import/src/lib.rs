//! # cms-import
//!
//! **Streaming JSON/GeoJSON bulk item import for a headless CMS.**
//!
//! This crate is the application layer around [`cms_import_core`]: a SQLite
//! store, TOML configuration, logging, progress rendering, a tokio-backed job
//! dispatcher, and the `cms-import` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ JSON /     │──▶│ cms-import-core          │──▶│  SQLite  │
//! │ GeoJSON    │   │ stream → assemble →      │   │  (sqlx)  │
//! │ file/asset │   │ commit (per chunk tx)    │   └──────────┘
//! └────────────┘   └──────────────────────────┘
//!        ▲                      ▲
//!        │                      │
//!   ┌─────────┐          ┌─────────────┐
//!   │   CLI   │          │ job worker  │
//!   └─────────┘          └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | [`store::Store`] over SQLite |
//! | [`model_cmd`] | `model apply`: project, schema and model definitions |
//! | [`import_cmd`] | `import`: run an import from a file |
//! | [`jobs`] | Asset resolver, tokio job dispatcher, and worker |
//! | [`get`] | `item get` and `model show` |
//! | [`progress`] | Human and JSON progress on stderr |
//!
//! ## Configuration
//!
//! Configured via a TOML file (default: `config/cms-import.toml`). See
//! [`config`] for all options and [`config::load_config`] for validation
//! rules.

pub mod config;
pub mod db;
pub mod get;
pub mod import_cmd;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod model_cmd;
pub mod progress;
pub mod sqlite_store;

pub use cms_import_core::store;

//! # CMS Import Core
//!
//! Runtime-agnostic logic for the bulk item import pipeline: domain models,
//! the streaming chunk reader, schema inference, record assembly, the batch
//! committer, and the store abstraction it commits through.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Persistence is
//! reached only through the [`store::Store`] trait; the SQLite backend and
//! the CLI live in the `cms-import` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌─────────┐
//! │  Reader  │──▶│ Inference │──▶│  Chunked  │──▶│ Assembler │──▶│ Commit  │
//! │ (bytes)  │   │ (peek, opt)│  │  stream   │   │ per object│   │per chunk│
//! └──────────┘   └───────────┘   └───────────┘   └───────────┘   └────┬────┘
//!                                                                     ▼
//!                                                              ┌────────────┐
//!                                                              │ Store (tx) │
//!                                                              └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Ids, keys, schemas, models, items, operator |
//! | [`value`] | Field value resolver: raw JSON → typed field values |
//! | [`stream`] | Chunked JSON / GeoJSON stream reader and replaying peek |
//! | [`infer`] | Schema field inference from a peeked sample |
//! | [`assemble`] | Raw object → [`assemble::ImportItemParam`] |
//! | [`commit`] | Per-chunk batch committer |
//! | [`result`] | Run-scoped result accumulator |
//! | [`import`] | Import orchestrator and run state machine |
//! | [`job`] | Deferred import job payload and dispatch |
//! | [`progress`] | Progress event sink |
//! | [`store`] | Store and transaction traits, in-memory store |
//! | [`error`] | Error taxonomy |

pub mod assemble;
pub mod commit;
pub mod error;
pub mod import;
pub mod infer;
pub mod job;
pub mod models;
pub mod progress;
pub mod result;
pub mod store;
pub mod stream;
pub mod value;

pub use error::{ErrorKind, ImportError};
pub use import::{run_import, ImportOutcome, ImportParams, ImportState};
pub use result::{ImportResponse, ImportResult};

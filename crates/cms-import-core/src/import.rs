//! Import orchestrator.
//!
//! [`run_import`] drives one run through its states:
//!
//! ```text
//! Idle ─▶ InferringSchema? ─▶ Streaming ◀─▶ Committing ─▶ Done
//!   │            │                │             │
//!   └────────────┴────────────────┴─────────────┴──────▶ Aborted
//! ```
//!
//! Chunks are pulled and committed strictly one after another. Each chunk
//! gets its own transaction; a failing chunk is rolled back and ends the
//! run, while chunks committed before it stay committed. The returned
//! [`ImportOutcome`] always carries the counters as of the last committed
//! chunk, plus the error that stopped the run, if any.

use std::fmt;
use std::io::Read;

use tracing::{debug, info, warn};

use crate::assemble::{assemble_chunk, resolve_geometry_field, RecordLayout};
use crate::commit::{commit_chunk, ChunkContext};
use crate::error::{ImportError, Result};
use crate::infer::{append_fields, guess_fields};
use crate::models::{Format, ModelId, Operator, Schema, SchemaPackage, Strategy};
use crate::progress::{ImportEvent, ImportProgress};
use crate::result::{ImportResponse, ImportResult};
use crate::store::Store;
use crate::stream::{peek_objects, ChunkReader, JsonObject, DEFAULT_CHUNK_SIZE};

/// Default number of objects inspected by schema inference.
pub const DEFAULT_INFERENCE_SAMPLE_SIZE: usize = 100;

/// Options for one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportParams {
    pub model: ModelId,
    pub format: Format,
    pub strategy: Strategy,
    /// Id or key of the geometry field. Required for GeoJSON.
    pub geometry_field: Option<String>,
    /// Append fields for unknown keys before importing.
    pub mutate_schema: bool,
    /// Import into the model's metadata schema instead of its primary one.
    pub metadata: bool,
    pub chunk_size: usize,
    pub inference_sample_size: usize,
}

impl ImportParams {
    pub fn new(model: ModelId, format: Format, strategy: Strategy) -> Self {
        Self {
            model,
            format,
            strategy,
            geometry_field: None,
            mutate_schema: false,
            metadata: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            inference_sample_size: DEFAULT_INFERENCE_SAMPLE_SIZE,
        }
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    InferringSchema,
    Streaming,
    Committing,
    Done,
    Aborted,
}

impl ImportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportState::Idle => "idle",
            ImportState::InferringSchema => "inferring_schema",
            ImportState::Streaming => "streaming",
            ImportState::Committing => "committing",
            ImportState::Done => "done",
            ImportState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a run produced: the response as of the last committed chunk and
/// the error that ended the run early, if any.
#[derive(Debug)]
pub struct ImportOutcome {
    pub response: ImportResponse,
    pub error: Option<ImportError>,
    pub state: ImportState,
}

impl ImportOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Drop the partial response on failure.
    pub fn into_result(self) -> Result<ImportResponse> {
        match self.error {
            None => Ok(self.response),
            Some(e) => Err(e),
        }
    }
}

struct Run {
    model: ModelId,
    state: ImportState,
    result: ImportResult,
    chunks: u64,
}

impl Run {
    fn transition(&mut self, to: ImportState) {
        debug!(model = %self.model, from = %self.state, to = %to, "import state");
        self.state = to;
    }
}

/// Import every object of `reader` into the model named by `params`.
///
/// Never panics on bad input: every failure ends up in
/// [`ImportOutcome::error`].
pub async fn run_import<'r, R: Read + Send + 'r>(
    store: &dyn Store,
    reader: R,
    params: &ImportParams,
    operator: &Operator,
    progress: &dyn ImportProgress,
) -> ImportOutcome {
    let mut run = Run {
        model: params.model,
        state: ImportState::Idle,
        result: ImportResult::new(),
        chunks: 0,
    };
    info!(
        model = %params.model,
        format = %params.format,
        strategy = %params.strategy,
        mutate_schema = params.mutate_schema,
        "import started"
    );

    let error = match run.execute(store, reader, params, operator, progress).await {
        Ok(()) => {
            run.transition(ImportState::Done);
            info!(
                model = %params.model,
                chunks = run.chunks,
                total = run.result.total(),
                inserted = run.result.inserted(),
                updated = run.result.updated(),
                ignored = run.result.ignored(),
                "import finished"
            );
            progress.report(&ImportEvent::Finished {
                total: run.result.total(),
                inserted: run.result.inserted(),
                updated: run.result.updated(),
                ignored: run.result.ignored(),
            });
            None
        }
        Err(e) => {
            warn!(
                model = %params.model,
                state = %run.state,
                kind = ?e.kind(),
                chunks = run.chunks,
                error = %e,
                "import aborted"
            );
            run.transition(ImportState::Aborted);
            Some(e)
        }
    };

    ImportOutcome {
        response: run.result.response(),
        error,
        state: run.state,
    }
}

impl Run {
    async fn execute<'r, R: Read + Send + 'r>(
        &mut self,
        store: &dyn Store,
        reader: R,
        params: &ImportParams,
        operator: &Operator,
        progress: &dyn ImportProgress,
    ) -> Result<()> {
        if operator.actor().is_none() {
            return Err(ImportError::InvalidOperator);
        }

        let model = store
            .find_model(params.model)
            .await?
            .ok_or_else(|| ImportError::not_found("model", params.model))?;
        let schema_id = if params.metadata {
            model
                .metadata
                .ok_or_else(|| ImportError::not_found("metadata schema of model", model.id))?
        } else {
            model.schema
        };
        let mut schema = store
            .find_schema(schema_id)
            .await?
            .ok_or_else(|| ImportError::not_found("schema", schema_id))?;

        if !operator.is_writable_workspace(schema.workspace) {
            return Err(ImportError::OperationDenied);
        }

        let project = store
            .find_project(schema.project)
            .await?
            .ok_or_else(|| ImportError::not_found("project", schema.project))?;

        // Inference only adds scalar fields, so the geometry field can be
        // checked before the schema changes.
        let geometry = match params.format {
            Format::GeoJson => {
                Some(resolve_geometry_field(&schema, params.geometry_field.as_deref())?.id)
            }
            Format::Json => None,
        };

        let source: Box<dyn Read + Send + 'r> = if params.mutate_schema {
            self.transition(ImportState::InferringSchema);
            let (sample, replay) =
                peek_objects(reader, params.format, params.inference_sample_size.max(1))?;
            self.infer_schema(store, &mut schema, &sample, params.format, progress)
                .await?;
            Box::new(replay)
        } else {
            Box::new(reader)
        };

        let mut groups = Vec::new();
        for id in schema.group_schema_ids() {
            let group = store
                .find_schema(id)
                .await?
                .ok_or_else(|| ImportError::not_found("group schema", id))?;
            groups.push(group);
        }
        let package = SchemaPackage::new(schema, groups);

        let layout = match geometry {
            Some(id) => RecordLayout::Feature {
                geometry: package
                    .schema
                    .field(id)
                    .ok_or(ImportError::GeometryFieldMissing)?,
            },
            None => RecordLayout::Flat,
        };
        let ctx = ChunkContext {
            project: &project,
            model: &model,
            schema: &package,
            strategy: params.strategy,
            operator,
        };

        self.transition(ImportState::Streaming);
        for chunk in ChunkReader::new(source, params.format, params.chunk_size) {
            let chunk = chunk?;
            let items = assemble_chunk(&chunk, &layout)?;
            self.chunks += 1;
            if items.is_empty() {
                debug!(chunk = self.chunks, "chunk has no items, skipping commit");
                continue;
            }

            self.transition(ImportState::Committing);
            let count = items.len();
            let mut scratch = self.result.clone();
            let mut tx = store.begin().await?;
            let saved = commit_chunk(tx.as_mut(), &ctx, items, &mut scratch).await?;
            tx.commit().await?;
            self.result = scratch;

            info!(
                chunk = self.chunks,
                items = count,
                saved,
                total = self.result.total(),
                "chunk committed"
            );
            progress.report(&ImportEvent::ChunkCommitted {
                chunk: self.chunks,
                items: count,
                total: self.result.total(),
            });
            self.transition(ImportState::Streaming);
        }
        Ok(())
    }

    async fn infer_schema(
        &mut self,
        store: &dyn Store,
        schema: &mut Schema,
        sample: &[JsonObject],
        format: Format,
        progress: &dyn ImportProgress,
    ) -> Result<()> {
        let guessed = guess_fields(schema, sample, format == Format::GeoJson);
        if guessed.is_empty() {
            debug!(schema = %schema.id, sampled = sample.len(), "no new fields inferred");
            return Ok(());
        }
        let created = append_fields(schema, guessed)?;
        store.save_schema(schema).await?;
        info!(schema = %schema.id, fields = created.len(), "schema updated with inferred fields");

        progress.report(&ImportEvent::SchemaInferred {
            fields: created.iter().map(|f| f.key.clone()).collect(),
        });
        for f in created {
            self.result.field_added(f);
        }
        Ok(())
    }
}

//! Background import jobs.
//!
//! [`TokioDispatcher`] implements [`JobDispatcher`] by spawning each job on
//! the tokio runtime. The spawned task resolves the asset through a
//! [`DirAssetResolver`] and runs the import with an [`ImportWorker`]. Nobody
//! awaits a job's result; the outcome is logged.
//!
//! ```bash
//! # Queue an import of an uploaded asset and wait for the worker to drain
//! cms-import job trigger --asset <ASSET_ID> --model <MODEL_ID> --format geojson \
//!     --geometry-field location
//!
//! # Run a serialized payload directly
//! cms-import job run ./job.json
//! ```

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use cms_import_core::job::{trigger_import_job, AssetResolver, ImportJobPayload, JobDispatcher};
use cms_import_core::models::{AssetId, Operator};
use cms_import_core::progress::NoProgress;
use cms_import_core::store::Store;
use cms_import_core::{run_import, ImportResponse};

use crate::config::Config;
use crate::db;
use crate::import_cmd::{operator_for, print_response, with_workspace_roles};
use crate::sqlite_store::SqliteStore;

/// Resolves assets to files under a directory: `<dir>/<id>`, then
/// `<dir>/<id>.json`, then `<dir>/<id>.geojson`.
pub struct DirAssetResolver {
    dir: PathBuf,
}

impl DirAssetResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, asset: AssetId) -> Option<PathBuf> {
        let id = asset.to_string();
        [id.clone(), format!("{id}.json"), format!("{id}.geojson")]
            .into_iter()
            .map(|name| self.dir.join(name))
            .find(|p| p.is_file())
    }
}

impl AssetResolver for DirAssetResolver {
    fn open(&self, asset: AssetId) -> Result<Box<dyn Read + Send>> {
        let Some(path) = self.path_of(asset) else {
            bail!("asset {} not found in {}", asset, self.dir.display());
        };
        let file =
            File::open(&path).with_context(|| format!("Failed to open asset {}", path.display()))?;
        Ok(Box::new(file))
    }
}

/// The identity a payload carries, without any workspace access yet.
fn payload_operator(payload: &ImportJobPayload) -> Operator {
    operator_for(payload.user_id, payload.integration_id)
}

/// Runs import jobs against a store.
pub struct ImportWorker {
    store: Arc<dyn Store>,
    assets: Arc<dyn AssetResolver>,
    chunk_size: usize,
    inference_sample_size: usize,
}

impl ImportWorker {
    pub fn new(store: Arc<dyn Store>, assets: Arc<dyn AssetResolver>, config: &Config) -> Self {
        Self {
            store,
            assets,
            chunk_size: config.import.chunk_size,
            inference_sample_size: config.import.inference_sample_size,
        }
    }

    /// Execute one job. The payload's identity acts with the role it holds
    /// in the model's workspace; a payload without identity is rejected by
    /// the import.
    pub async fn run(&self, payload: &ImportJobPayload) -> Result<ImportResponse> {
        let reader = self.assets.open(payload.asset_id)?;

        let operator =
            with_workspace_roles(self.store.as_ref(), payload.model_id, payload_operator(payload))
                .await?;

        let params = payload.params(self.chunk_size, self.inference_sample_size);
        let outcome = run_import(
            self.store.as_ref(),
            reader,
            &params,
            &operator,
            &NoProgress,
        )
        .await;

        match outcome.error {
            None => Ok(outcome.response),
            Some(e) => Err(anyhow::Error::new(e).context(format!(
                "import job stopped after {} items",
                outcome.response.total
            ))),
        }
    }

    /// Execute one job and log its outcome instead of returning it.
    pub async fn run_logged(&self, payload: &ImportJobPayload) {
        match self.run(payload).await {
            Ok(r) => info!(
                asset = %payload.asset_id,
                model = %payload.model_id,
                total = r.total,
                inserted = r.inserted,
                updated = r.updated,
                ignored = r.ignored,
                new_fields = r.new_fields.len(),
                "import job finished"
            ),
            Err(e) => warn!(
                asset = %payload.asset_id,
                model = %payload.model_id,
                error = %format!("{e:#}"),
                "import job failed"
            ),
        }
    }
}

/// Spawns each dispatched job as a tokio task.
pub struct TokioDispatcher {
    worker: Arc<ImportWorker>,
    tasks: Mutex<JoinSet<()>>,
}

impl TokioDispatcher {
    pub fn new(worker: Arc<ImportWorker>) -> Self {
        Self {
            worker,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Wait for every spawned job to finish. Used before the process exits.
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "import job task did not complete");
            }
        }
    }
}

#[async_trait]
impl JobDispatcher for TokioDispatcher {
    async fn dispatch(&self, payload: ImportJobPayload) -> Result<()> {
        let worker = Arc::clone(&self.worker);
        self.tasks.lock().await.spawn(async move {
            worker.run_logged(&payload).await;
        });
        Ok(())
    }
}

/// CLI entry point for `cms-import job run <payload.json>`.
pub async fn run_job_file(config: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job payload {}", path.display()))?;
    let payload = ImportJobPayload::from_json(&raw)?;

    let pool = db::connect(config).await?;
    let worker = ImportWorker::new(
        Arc::new(SqliteStore::new(pool.clone())),
        Arc::new(DirAssetResolver::new(&config.assets.dir)),
        config,
    );
    let result = worker.run(&payload).await;
    pool.close().await;

    let response = result?;
    println!("job {}", payload.asset_id);
    print_response(&response);
    println!("ok");
    Ok(())
}

/// CLI entry point for `cms-import job trigger`: dispatch through the tokio
/// dispatcher, then wait for the worker so the process does not exit early.
pub async fn run_job_trigger(config: &Config, payload: ImportJobPayload) -> Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));
    let worker = Arc::new(ImportWorker::new(
        store,
        Arc::new(DirAssetResolver::new(&config.assets.dir)),
        config,
    ));
    let dispatcher = TokioDispatcher::new(worker);

    trigger_import_job(
        Some(&dispatcher as &dyn JobDispatcher),
        payload.asset_id,
        payload.model_id,
        payload.format,
        payload.strategy,
        payload.geometry_field_key.clone(),
        payload.mutate_schema,
        &payload_operator(&payload),
    )
    .await?;
    println!("job queued: {}", payload.to_json()?);

    dispatcher.drain().await;
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig};
    use cms_import_core::models::{
        Actor, Field, FieldType, Format, Key, Member, Model, ModelId, Project, ProjectId, Role,
        Schema, SchemaId, Strategy, UserId, WorkspaceId,
    };
    use cms_import_core::ImportError;
    use cms_import_core::store::memory::InMemoryStore;

    fn config() -> Config {
        Config {
            db: DbConfig {
                path: PathBuf::from("unused.sqlite"),
            },
            import: Default::default(),
            assets: Default::default(),
            logging: Default::default(),
        }
    }

    struct Seeded {
        workspace: WorkspaceId,
        model: ModelId,
        user: UserId,
    }

    /// A model whose workspace has one writer.
    async fn seed(store: &InMemoryStore) -> Seeded {
        let ws = WorkspaceId::new();
        let project = Project {
            id: ProjectId::new(),
            workspace: ws,
            name: "p".into(),
        };
        let schema = Schema::with_fields(
            SchemaId::new(),
            ws,
            project.id,
            vec![Field::new("Name", Key::new("name").unwrap(), FieldType::Text)],
        )
        .unwrap();
        let model = Model {
            id: ModelId::new(),
            project: project.id,
            key: Key::new("places").unwrap(),
            name: "Places".into(),
            schema: schema.id,
            metadata: None,
        };
        store.save_project(&project).await.unwrap();
        store.save_schema(&schema).await.unwrap();
        store.save_model(&model).await.unwrap();
        let user = UserId::new();
        store
            .save_member(ws, &Member { actor: Actor::User(user), role: Role::Writer })
            .await
            .unwrap();
        Seeded {
            workspace: ws,
            model: model.id,
            user,
        }
    }

    fn payload(seeded: &Seeded, asset: AssetId) -> ImportJobPayload {
        ImportJobPayload {
            model_id: seeded.model,
            asset_id: asset,
            format: Format::Json,
            geometry_field_key: None,
            strategy: Strategy::Insert,
            mutate_schema: false,
            user_id: Some(seeded.user),
            integration_id: None,
        }
    }

    fn worker(store: &InMemoryStore, dir: &Path) -> ImportWorker {
        ImportWorker::new(
            Arc::new(store.clone()),
            Arc::new(DirAssetResolver::new(dir)),
            &config(),
        )
    }

    fn denied(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::OperationDenied)
        )
    }

    #[test]
    fn resolver_tries_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let asset = AssetId::new();
        let resolver = DirAssetResolver::new(dir.path());
        assert!(resolver.path_of(asset).is_none());
        assert!(resolver.open(asset).is_err());

        let path = dir.path().join(format!("{asset}.geojson"));
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(resolver.path_of(asset), Some(path));
    }

    #[tokio::test]
    async fn dispatched_job_imports_asset() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let seeded = seed(&store).await;
        let asset = AssetId::new();
        std::fs::write(
            dir.path().join(format!("{asset}.json")),
            r#"[{"name":"a"},{"name":"b"}]"#,
        )
        .unwrap();

        let dispatcher = TokioDispatcher::new(Arc::new(worker(&store, dir.path())));
        dispatcher.dispatch(payload(&seeded, asset)).await.unwrap();
        dispatcher.drain().await;

        assert_eq!(store.items().len(), 2);
    }

    #[tokio::test]
    async fn job_without_identity_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let seeded = seed(&store).await;
        let asset = AssetId::new();
        std::fs::write(dir.path().join(asset.to_string()), "[]").unwrap();

        let worker = worker(&store, dir.path());
        let mut p = payload(&seeded, asset);
        p.user_id = None;
        assert!(worker.run(&p).await.is_err());

        p.user_id = Some(seeded.user);
        let r = worker.run(&p).await.unwrap();
        assert_eq!(r.total, 0);
    }

    #[tokio::test]
    async fn job_identity_needs_workspace_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let seeded = seed(&store).await;
        let asset = AssetId::new();
        std::fs::write(dir.path().join(asset.to_string()), r#"[{"name":"a"}]"#).unwrap();

        let mut p = payload(&seeded, asset);
        p.user_id = Some(UserId::new());
        let err = worker(&store, dir.path()).run(&p).await.unwrap_err();
        assert!(denied(&err), "{err:#}");
        assert!(store.items().is_empty());
    }

    #[tokio::test]
    async fn writer_cannot_update_items_of_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let seeded = seed(&store).await;
        let worker = worker(&store, dir.path());

        let first = AssetId::new();
        std::fs::write(dir.path().join(first.to_string()), r#"[{"name":"a"}]"#).unwrap();
        worker.run(&payload(&seeded, first)).await.unwrap();
        let id = store.items()[0].id;

        let other = UserId::new();
        store
            .save_member(
                seeded.workspace,
                &Member { actor: Actor::User(other), role: Role::Writer },
            )
            .await
            .unwrap();
        let second = AssetId::new();
        std::fs::write(
            dir.path().join(second.to_string()),
            format!(r#"[{{"id":"{id}","name":"b"}}]"#),
        )
        .unwrap();
        let mut p = payload(&seeded, second);
        p.strategy = Strategy::Update;
        p.user_id = Some(other);
        let err = worker.run(&p).await.unwrap_err();
        assert!(denied(&err), "{err:#}");

        // The creator may update its own item.
        p.user_id = Some(seeded.user);
        let r = worker.run(&p).await.unwrap();
        assert_eq!(r.updated, 1);
    }
}

//! Deferred import jobs.
//!
//! Instead of importing inline, a caller can hand an [`ImportJobPayload`] to
//! a [`JobDispatcher`], which schedules the run for later. The worker that
//! picks the job up opens the asset through an [`AssetResolver`] and calls
//! [`run_import`](crate::run_import); nobody waits on the result, so the
//! outcome is only logged.

use std::io::Read;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ImportError, Result};
use crate::import::ImportParams;
use crate::models::{AssetId, Format, IntegrationId, ModelId, Operator, Strategy, UserId};

/// Everything a worker needs to run an import later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobPayload {
    pub model_id: ModelId,
    pub asset_id: AssetId,
    pub format: Format,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_field_key: Option<String>,
    pub strategy: Strategy,
    #[serde(default)]
    pub mutate_schema: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<IntegrationId>,
}

impl ImportJobPayload {
    /// Import parameters for this job. Chunking options come from the
    /// worker's configuration.
    pub fn params(&self, chunk_size: usize, inference_sample_size: usize) -> ImportParams {
        let mut params = ImportParams::new(self.model_id, self.format, self.strategy);
        params.geometry_field = self.geometry_field_key.clone();
        params.mutate_schema = self.mutate_schema;
        params.chunk_size = chunk_size;
        params.inference_sample_size = inference_sample_size;
        params
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("failed to encode import job payload")
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("failed to decode import job payload")
    }
}

/// Schedules import jobs for asynchronous execution.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, payload: ImportJobPayload) -> anyhow::Result<()>;
}

/// Resolves an asset id to its bytes.
pub trait AssetResolver: Send + Sync {
    fn open(&self, asset: AssetId) -> anyhow::Result<Box<dyn Read + Send>>;
}

/// Schedule an import of `asset` into `model`.
///
/// The operator must carry a user or an integration; that identity travels
/// with the payload. Without a dispatcher the request is logged and dropped.
#[allow(clippy::too_many_arguments)]
pub async fn trigger_import_job(
    dispatcher: Option<&dyn JobDispatcher>,
    asset: AssetId,
    model: ModelId,
    format: Format,
    strategy: Strategy,
    geometry_field_key: Option<String>,
    mutate_schema: bool,
    operator: &Operator,
) -> Result<()> {
    if operator.actor().is_none() {
        return Err(ImportError::InvalidOperator);
    }

    let Some(dispatcher) = dispatcher else {
        info!(%asset, %model, "import skipped because no job dispatcher is configured");
        return Ok(());
    };

    let payload = ImportJobPayload {
        model_id: model,
        asset_id: asset,
        format,
        geometry_field_key,
        strategy,
        mutate_schema,
        user_id: operator.user,
        integration_id: operator.integration,
    };
    dispatcher
        .dispatch(payload)
        .await
        .context("failed to trigger import job")?;

    info!(%asset, %model, "import job triggered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ImportJobPayload>>);

    #[async_trait]
    impl JobDispatcher for Recorder {
        async fn dispatch(&self, payload: ImportJobPayload) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn trigger_requires_identity() {
        let recorder = Recorder::default();
        let err = trigger_import_job(
            Some(&recorder as &dyn JobDispatcher),
            AssetId::new(),
            ModelId::new(),
            Format::Json,
            Strategy::Insert,
            None,
            false,
            &Operator::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::InvalidOperator));
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_without_dispatcher_is_a_no_op() {
        let op = Operator::user(UserId::new());
        trigger_import_job(
            None,
            AssetId::new(),
            ModelId::new(),
            Format::Json,
            Strategy::Insert,
            None,
            false,
            &op,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn trigger_carries_operator_identity() {
        let recorder = Recorder::default();
        let integration = IntegrationId::new();
        let asset = AssetId::new();
        trigger_import_job(
            Some(&recorder as &dyn JobDispatcher),
            asset,
            ModelId::new(),
            Format::GeoJson,
            Strategy::Upsert,
            Some("geo".into()),
            true,
            &Operator::integration(integration),
        )
        .await
        .unwrap();
        let sent = recorder.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].asset_id, asset);
        assert_eq!(sent[0].integration_id, Some(integration));
        assert_eq!(sent[0].user_id, None);
    }

    #[test]
    fn payload_json_is_camel_case() {
        let p = ImportJobPayload {
            model_id: ModelId::new(),
            asset_id: AssetId::new(),
            format: Format::GeoJson,
            geometry_field_key: Some("geo".into()),
            strategy: Strategy::Upsert,
            mutate_schema: true,
            user_id: Some(UserId::new()),
            integration_id: None,
        };
        let v: serde_json::Value = serde_json::from_str(&p.to_json().unwrap()).unwrap();
        assert_eq!(v["format"], "geojson");
        assert_eq!(v["strategy"], "upsert");
        assert_eq!(v["geometryFieldKey"], "geo");
        assert_eq!(v["mutateSchema"], true);
        assert!(v.get("integrationId").is_none());
        assert_eq!(ImportJobPayload::from_json(&p.to_json().unwrap()).unwrap(), p);
    }
}

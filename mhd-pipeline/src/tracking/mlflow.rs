//! MLflow tracking server client
//!
//! Speaks the MLflow REST API (`/api/2.0/mlflow/...`). Text documents are
//! stored as run tags (`text.<name>`), truncated to the server's tag limit.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{RunRecord, RunStatus, Tracker};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ModelVersion, Stage};

const API_PREFIX: &str = "api/2.0/mlflow";
const USER_AGENT: &str = "mhd-pipeline/0.1.0";
const MAX_TAG_VALUE: usize = 5000;

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    run_name: Option<String>,
    status: String,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RunData {
    #[serde(default)]
    metrics: Vec<KeyValue>,
    #[serde(default)]
    params: Vec<KeyValue>,
    #[serde(default)]
    tags: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
    #[serde(default)]
    data: RunData,
}

#[derive(Debug, Deserialize)]
struct RawModelVersion {
    name: String,
    version: String,
    #[serde(default)]
    run_id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    current_stage: Option<String>,
}

impl RawModelVersion {
    fn into_model_version(self) -> PipelineResult<ModelVersion> {
        let stage_name = self.current_stage.unwrap_or_else(|| "None".to_string());
        let stage = Stage::parse(&stage_name)
            .ok_or_else(|| PipelineError::Registry(format!("Unknown stage: {}", stage_name)))?;
        Ok(ModelVersion {
            name: self.name,
            version: self.version,
            run_id: self.run_id,
            source: self.source,
            stage,
        })
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn millis_to_ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn run_record(run: Run) -> PipelineResult<RunRecord> {
    let status = RunStatus::parse(&run.info.status).unwrap_or(RunStatus::Failed);
    let tags: BTreeMap<String, String> = run
        .data
        .tags
        .iter()
        .map(|kv| (kv.key.clone(), value_to_string(&kv.value)))
        .collect();
    let run_name = run
        .info
        .run_name
        .clone()
        .or_else(|| tags.get("mlflow.runName").cloned())
        .unwrap_or_default();

    let mut metrics = BTreeMap::new();
    for kv in &run.data.metrics {
        let value = kv.value.as_f64().ok_or_else(|| {
            PipelineError::Tracking(format!("Non-numeric metric {}: {}", kv.key, kv.value))
        })?;
        metrics.insert(kv.key.clone(), value);
    }

    Ok(RunRecord {
        run_id: run.info.run_id,
        run_name,
        status,
        params: run
            .data
            .params
            .iter()
            .map(|kv| (kv.key.clone(), value_to_string(&kv.value)))
            .collect(),
        metrics,
        tags,
        started_at: millis_to_ts(run.info.start_time),
        ended_at: millis_to_ts(run.info.end_time),
    })
}

fn key_values<V: ToString>(map: &BTreeMap<String, V>) -> Vec<Value> {
    map.iter()
        .map(|(k, v)| json!({ "key": k, "value": v.to_string() }))
        .collect()
}

/// Cut `text` to at most `max` bytes on a char boundary
fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// REST client for one experiment on an MLflow server
pub struct MlflowTracker {
    http_client: reqwest::Client,
    base_url: String,
    experiment: String,
    experiment_id: OnceCell<String>,
}

impl MlflowTracker {
    pub fn new(tracking_uri: &str, experiment: &str) -> PipelineResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: tracking_uri.trim_end_matches('/').to_string(),
            experiment: experiment.to_string(),
            experiment_id: OnceCell::new(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, endpoint)
    }

    /// Decode a response, mapping non-success statuses to tracking errors.
    /// 404s come back as `Ok(None)`.
    async fn decode(response: reqwest::Response, endpoint: &str) -> PipelineResult<Option<Value>> {
        let status = response.status();
        if status == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Tracking(format!(
                "{} returned {}: {}",
                endpoint,
                status.as_u16(),
                error_text
            )));
        }
        Ok(Some(response.json().await?))
    }

    async fn post(&self, endpoint: &str, body: Value) -> PipelineResult<Option<Value>> {
        tracing::debug!(endpoint, "MLflow POST");
        let response = self.http_client.post(self.url(endpoint)).json(&body).send().await?;
        Self::decode(response, endpoint).await
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> PipelineResult<Option<Value>> {
        tracing::debug!(endpoint, "MLflow GET");
        let response = self.http_client.get(self.url(endpoint)).query(query).send().await?;
        Self::decode(response, endpoint).await
    }

    async fn post_required(&self, endpoint: &str, body: Value) -> PipelineResult<Value> {
        self.post(endpoint, body)
            .await?
            .ok_or_else(|| PipelineError::Tracking(format!("{} returned 404", endpoint)))
    }

    /// Experiment id, creating the experiment on first use
    async fn experiment_id(&self) -> PipelineResult<&str> {
        let id = self
            .experiment_id
            .get_or_try_init(|| self.resolve_experiment())
            .await?;
        Ok(id.as_str())
    }

    async fn resolve_experiment(&self) -> PipelineResult<String> {
        let found = self
            .get("experiments/get-by-name", &[("experiment_name", self.experiment.as_str())])
            .await?;
        if let Some(id) = found.as_ref().and_then(|v| v["experiment"]["experiment_id"].as_str()) {
            return Ok(id.to_string());
        }

        let created = self
            .post_required("experiments/create", json!({ "name": self.experiment }))
            .await?;
        let id = created["experiment_id"].as_str().ok_or_else(|| {
            PipelineError::Tracking("experiments/create returned no experiment_id".into())
        })?;
        tracing::info!(experiment = %self.experiment, experiment_id = %id, "Created MLflow experiment");
        Ok(id.to_string())
    }

    async fn log_batch(&self, run_id: &str, body: Value) -> PipelineResult<()> {
        let mut body = body;
        body["run_id"] = json!(run_id);
        self.post_required("runs/log-batch", body).await?;
        Ok(())
    }

    fn parse_version(value: &Value, endpoint: &str) -> PipelineResult<ModelVersion> {
        let raw: RawModelVersion = serde_json::from_value(value["model_version"].clone())
            .map_err(|e| PipelineError::Registry(format!("{} response unreadable: {}", endpoint, e)))?;
        raw.into_model_version()
    }
}

#[async_trait]
impl Tracker for MlflowTracker {
    async fn start_run(&self, run_name: &str, tags: &BTreeMap<String, String>) -> PipelineResult<String> {
        let experiment_id = self.experiment_id().await?;
        let response = self
            .post_required(
                "runs/create",
                json!({
                    "experiment_id": experiment_id,
                    "run_name": run_name,
                    "start_time": Utc::now().timestamp_millis(),
                    "tags": key_values(tags),
                }),
            )
            .await?;
        let run_id = response["run"]["info"]["run_id"]
            .as_str()
            .ok_or_else(|| PipelineError::Tracking("runs/create returned no run_id".into()))?;
        tracing::debug!(run_id = %run_id, run_name, "Started MLflow run");
        Ok(run_id.to_string())
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> PipelineResult<()> {
        self.log_batch(run_id, json!({ "params": key_values(params) })).await
    }

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> PipelineResult<()> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<Value> = metrics
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v, "timestamp": timestamp, "step": 0 }))
            .collect();
        self.log_batch(run_id, json!({ "metrics": metrics })).await
    }

    async fn set_tags(&self, run_id: &str, tags: &BTreeMap<String, String>) -> PipelineResult<()> {
        self.log_batch(run_id, json!({ "tags": key_values(tags) })).await
    }

    async fn log_text(&self, run_id: &str, name: &str, text: &str) -> PipelineResult<()> {
        let tags = BTreeMap::from([(
            format!("text.{}", name),
            truncate_utf8(text, MAX_TAG_VALUE).to_string(),
        )]);
        self.set_tags(run_id, &tags).await
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> PipelineResult<()> {
        self.post_required(
            "runs/update",
            json!({
                "run_id": run_id,
                "status": status.as_str(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> PipelineResult<Option<RunRecord>> {
        let Some(response) = self.get("runs/get", &[("run_id", run_id)]).await? else {
            return Ok(None);
        };
        let run: Run = serde_json::from_value(response["run"].clone())?;
        run_record(run).map(Some)
    }

    async fn ensure_registered_model(&self, name: &str) -> PipelineResult<()> {
        if self.get("registered-models/get", &[("name", name)]).await?.is_some() {
            return Ok(());
        }
        let response = self
            .http_client
            .post(self.url("registered-models/create"))
            .json(&json!({ "name": name }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(model = %name, "Registered model created");
            return Ok(());
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        // lost a race with another creator
        if body["error_code"] == "RESOURCE_ALREADY_EXISTS" {
            return Ok(());
        }
        Err(PipelineError::Registry(format!(
            "registered-models/create returned {}: {}",
            status.as_u16(),
            body
        )))
    }

    async fn create_model_version(&self, name: &str, source: &str, run_id: &str) -> PipelineResult<ModelVersion> {
        let response = self
            .post_required(
                "model-versions/create",
                json!({ "name": name, "source": source, "run_id": run_id }),
            )
            .await?;
        Self::parse_version(&response, "model-versions/create")
    }

    async fn transition_stage(
        &self,
        name: &str,
        version: &str,
        stage: Stage,
        archive_existing: bool,
    ) -> PipelineResult<ModelVersion> {
        let response = self
            .post_required(
                "model-versions/transition-stage",
                json!({
                    "name": name,
                    "version": version,
                    "stage": stage.as_str(),
                    "archive_existing_versions": archive_existing,
                }),
            )
            .await?;
        Self::parse_version(&response, "model-versions/transition-stage")
    }

    async fn latest_version(&self, name: &str, stage: Stage) -> PipelineResult<Option<ModelVersion>> {
        let Some(response) = self
            .post(
                "registered-models/get-latest-versions",
                json!({ "name": name, "stages": [stage.as_str()] }),
            )
            .await?
        else {
            return Ok(None);
        };

        let raw: Vec<RawModelVersion> = match response.get("model_versions") {
            Some(list) => serde_json::from_value(list.clone())?,
            None => Vec::new(),
        };
        let mut versions = raw
            .into_iter()
            .map(RawModelVersion::into_model_version)
            .collect::<PipelineResult<Vec<_>>>()?;
        versions.sort_by_key(|v| v.version.parse::<u64>().unwrap_or(0));
        Ok(versions.pop())
    }
}

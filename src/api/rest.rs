//! Scheduler-extender HTTP handlers, wired up with `axum`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::pipeline::FilterPipeline;
use crate::types::{Node, Pod};
use crate::VERSION;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FilterPipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scheduler/predicates", post(predicates))
        .route("/scheduler/priorities", post(priorities))
        .route("/version", get(version))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ExtenderArgs {
    #[serde(rename = "Pod")]
    pod: Pod,
    #[serde(rename = "Nodes")]
    nodes: NodeList,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct NodeList {
    items: Vec<Node>,
}

#[derive(Debug, Default, Serialize)]
struct ExtenderFilterResult {
    /// `null` (not an empty array) when the request never reached a
    /// placement decision, e.g. a malformed body (§7, `Malformed` row).
    #[serde(rename = "Nodes")]
    nodes: Option<NodeList>,
    /// `null` alongside `nodes` for the same reason; an empty-but-present
    /// map is reserved for "evaluated, nothing failed."
    #[serde(rename = "FailedNodes")]
    failed_nodes: Option<HashMap<String, String>>,
    #[serde(rename = "Error")]
    error: String,
}

#[derive(Debug, Serialize)]
struct HostPriority {
    #[serde(rename = "Host")]
    host: String,
    #[serde(rename = "Score")]
    score: i64,
}

/// `POST /scheduler/predicates`: the filter phase (§4.7). Decode failures
/// and pipeline errors are reported inside the `Error` field of a 200
/// response, per the extender protocol's convention of never using a
/// non-200 status for an evaluation outcome.
async fn predicates(State(state): State<AppState>, body: axum::body::Bytes) -> Json<ExtenderFilterResult> {
    let args: ExtenderArgs = match serde_json::from_slice(&body) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, "malformed ExtenderArgs payload");
            return Json(ExtenderFilterResult { error: format!("malformed request: {e}"), ..Default::default() });
        }
    };

    match state.pipeline.run(&args.pod, args.nodes.items).await {
        Ok(result) => {
            if let Some(patched) = &result.patched_pod {
                tracing::info!(pod = %patched.name(), "pod patched with placement annotations");
            }
            Json(ExtenderFilterResult {
                nodes: Some(NodeList { items: result.accepted_nodes }),
                failed_nodes: Some(result.failed_reasons),
                error: String::new(),
            })
        }
        Err(e) => {
            error!(error = %e, "predicate evaluation failed");
            Json(ExtenderFilterResult { error: e.to_string(), ..Default::default() })
        }
    }
}

/// `POST /scheduler/priorities`: optional secondary scoring pass, run only
/// on whatever the filter phase already accepted.
async fn priorities(State(state): State<AppState>, body: axum::body::Bytes) -> Json<Vec<HostPriority>> {
    let args: ExtenderArgs = match serde_json::from_slice(&body) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, "malformed ExtenderArgs payload for priorities");
            return Json(Vec::new());
        }
    };

    match state.pipeline.priorities(&args.pod, args.nodes.items).await {
        Ok(scored) => Json(scored.into_iter().map(|(host, score)| HostPriority { host, score }).collect()),
        Err(e) => {
            error!(error = %e, "priority evaluation failed");
            Json(Vec::new())
        }
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": VERSION }))
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InformerCache;
    use crate::quota::QuotaStore;
    use crate::types::{ObjectMeta, PodSpec, PodStatus};

    fn empty_pod() -> Pod {
        Pod {
            metadata: ObjectMeta { name: "p".to_string(), namespace: "ns".to_string(), ..Default::default() },
            spec: PodSpec::default(),
            status: PodStatus::default(),
        }
    }

    fn test_state() -> AppState {
        let quota = Arc::new(QuotaStore::new());
        quota.set_all(HashMap::new(), "0".to_string());
        let cluster = Arc::new(InformerCache::new());
        let pipeline = Arc::new(FilterPipeline::new(
            quota,
            cluster,
            crate::pipeline::LabelKeys::default(),
            std::time::Duration::from_micros(1),
        ));
        AppState { pipeline }
    }

    #[tokio::test]
    async fn predicates_passes_through_non_gpu_pod() {
        let state = test_state();
        let body = serde_json::to_vec(&serde_json::json!({
            "Pod": empty_pod(),
            "Nodes": { "items": [] },
        }))
        .unwrap();
        let result = predicates(State(state), axum::body::Bytes::from(body)).await;
        assert!(result.0.error.is_empty());
    }

    #[tokio::test]
    async fn predicates_reports_malformed_body_via_error_field() {
        let state = test_state();
        let result = predicates(State(state), axum::body::Bytes::from_static(b"not json")).await;
        assert!(!result.0.error.is_empty());
        assert!(result.0.nodes.is_none());
        assert!(result.0.failed_nodes.is_none());
    }

    #[tokio::test]
    async fn malformed_body_serializes_nodes_and_failed_nodes_as_null() {
        let state = test_state();
        let result = predicates(State(state), axum::body::Bytes::from_static(b"not json")).await;
        let value = serde_json::to_value(&result.0).unwrap();
        assert!(value["Nodes"].is_null());
        assert!(value["FailedNodes"].is_null());
    }

    #[tokio::test]
    async fn version_reports_crate_version() {
        let result = version().await;
        assert_eq!(result.0["version"], VERSION);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        assert_eq!(health().await, "ok");
    }
}

//! Cluster status endpoints.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use fleet_common::{
    ActiveMaster, ClusterReport, ClusterStatus, FileStatusReport, LastSync, NodeInfo,
};

use super::ApiError;
use crate::cluster::{FileStatusQuery, NodeQuery};
use crate::state::AppState;

/// Enabled and running flags
pub async fn get_status(State(state): State<AppState>) -> Json<ClusterStatus> {
    Json(state.cluster_status())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodesParams {
    update_bindings: bool,
    localhost: bool,
}

/// Every configured node, with the active master elected
pub async fn get_nodes(
    State(state): State<AppState>,
    Query(params): Query<NodesParams>,
) -> Result<Json<ClusterReport>, ApiError> {
    let query = NodeQuery {
        update_bindings: params.update_bindings,
        include_localhost: params.localhost,
    };
    let report = state.coordinator()?.get_nodes(query).await?;
    Ok(Json(report))
}

pub async fn get_local_node(State(state): State<AppState>) -> Result<Json<NodeInfo>, ApiError> {
    Ok(Json(state.coordinator()?.get_node().await?))
}

pub async fn get_master(State(state): State<AppState>) -> Result<Json<ActiveMaster>, ApiError> {
    Ok(Json(state.coordinator()?.active_master().await?))
}

/// Comma-separated filters
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilesParams {
    files: Option<String>,
    managers: Option<String>,
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// `{manager -> {status -> [filenames]}}`
pub async fn get_files(
    State(state): State<AppState>,
    Query(params): Query<FilesParams>,
) -> Result<Json<FileStatusReport>, ApiError> {
    let query = FileStatusQuery {
        files: split_list(params.files),
        managers: split_list(params.managers),
    };
    Ok(Json(state.coordinator()?.file_status(&query).await?))
}

pub async fn get_last_sync(
    State(state): State<AppState>,
) -> Result<Json<Option<LastSync>>, ApiError> {
    Ok(Json(state.coordinator()?.last_sync().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Coordinator;
    use crate::cluster::store::fake::{self, FakeState};
    use crate::cluster::tests::cluster;
    use crate::config::AppConfig;
    use crate::routes::create_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fleet_common::NodeType;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn disabled_state(run_dir: &std::path::Path) -> AppState {
        AppState {
            config: Arc::new(AppConfig {
                run_dir: run_dir.to_path_buf(),
                ..Default::default()
            }),
            coordinator: None,
        }
    }

    fn enabled_state(store: &fake::FakeStore) -> AppState {
        let coordinator = Coordinator::new(
            cluster("node01", NodeType::Master, vec!["10.9.9.9".into()]),
            store.store.clone(),
            Duration::from_secs(2),
            HashSet::from(["10.9.9.9".to_string()]),
        )
        .unwrap();
        AppState {
            config: Arc::new(AppConfig::default()),
            coordinator: Some(Arc::new(coordinator)),
        }
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(disabled_state(dir.path()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_disabled_cluster() {
        let dir = tempfile::tempdir().unwrap();

        let (status, body) = get(disabled_state(dir.path()), "/cluster/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"enabled": "no", "running": "no"}));

        let (status, body) = get(disabled_state(dir.path()), "/cluster/nodes").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("disabled"));
        assert_eq!(body["code"], 500);
    }

    #[tokio::test]
    async fn test_local_node_and_master() {
        let store = fake::spawn(FakeState {
            names: HashMap::from([("node01".to_string(), "10.9.9.9".to_string())]),
            active: Some("node01".into()),
            ..Default::default()
        });

        let (status, body) = get(enabled_state(&store), "/cluster/nodes/local").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"node": "node01", "cluster": "fleet", "type": "master-active"})
        );

        let (_, body) = get(enabled_state(&store), "/cluster/master").await;
        assert_eq!(body, serde_json::json!({"name": "node01", "url": "10.9.9.9"}));
    }

    #[tokio::test]
    async fn test_nodes_with_localhost() {
        let store = fake::spawn(FakeState::default());
        let (status, body) = get(enabled_state(&store), "/cluster/nodes?localhost=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalItems"], 1);
        assert_eq!(body["items"][0]["node"], "node01");
        assert_eq!(body["items"][0]["localhost"], true);
    }

    #[tokio::test]
    async fn test_files_rejects_bad_manager() {
        let store = fake::spawn(FakeState::default());
        let uri = "/cluster/files?managers=10.0.0.2,bad%21name";
        let (status, body) = get(enabled_state(&store), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("managers"));
    }

    #[tokio::test]
    async fn test_last_sync() {
        let store = fake::spawn(FakeState::default());
        let (status, body) = get(enabled_state(&store), "/cluster/last-sync").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());

        let store = fake::spawn(FakeState {
            last_sync: Some("1700000000 1.25".into()),
            ..Default::default()
        });
        let (_, body) = get(enabled_state(&store), "/cluster/last-sync").await;
        assert_eq!(body["duration"], 1.25);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("a, b,,c".into())), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }
}

use axum::extract::{Path, State};
use axum::Json;
use chrono::Duration as ChronoDuration;
use serde::Deserialize;

use crate::error::{MeshError, MeshResult};
use crate::model::{BootstrapToken, Cluster, TokenKind};
use crate::store::SharedStore;
use crate::token;

/// Administrative convenience surface (spec.md §4.10): cluster and token
/// lifecycle is "administrative" per spec.md §3, with no path named in §6
/// to drive it. Shaped after the teacher's `/api/mesh/keys` GET/POST pair.
#[derive(Debug, Deserialize)]
pub struct CreateClusterRequest {
    pub cluster_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub owner_tenant: Option<String>,
    #[serde(default)]
    pub max_streams: Option<u64>,
    #[serde(default)]
    pub max_bandwidth_bps: Option<u64>,
}

fn default_true() -> bool {
    true
}

pub async fn create_cluster(
    State(store): State<SharedStore>,
    Json(req): Json<CreateClusterRequest>,
) -> MeshResult<Json<Cluster>> {
    let mut clusters = store.clusters.lock().await;
    if clusters.contains_key(&req.cluster_id) {
        return Err(MeshError::InvalidRequest(format!(
            "cluster {} already exists",
            req.cluster_id
        )));
    }

    let cluster = Cluster {
        cluster_id: req.cluster_id.clone(),
        name: req.name,
        active: req.active,
        is_default: req.is_default,
        owner_tenant: req.owner_tenant,
        max_streams: req.max_streams,
        current_streams: 0,
        max_bandwidth_bps: req.max_bandwidth_bps,
        current_bandwidth_bps: 0,
    };
    clusters.insert(req.cluster_id, cluster.clone());

    Ok(Json(cluster))
}

pub async fn list_clusters(State(store): State<SharedStore>) -> Json<Vec<Cluster>> {
    let clusters = store.clusters.lock().await;
    let mut list: Vec<Cluster> = clusters.values().cloned().collect();
    list.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
    Json(list)
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub kind: TokenKind,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub expected_client_addr: Option<String>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

fn default_ttl_seconds() -> i64 {
    3600
}

pub async fn create_token(
    State(store): State<SharedStore>,
    Json(req): Json<CreateTokenRequest>,
) -> MeshResult<Json<BootstrapToken>> {
    let token = token::create(
        &store,
        req.kind,
        req.tenant_id,
        req.cluster_id,
        req.expected_client_addr,
        req.usage_limit,
        ChronoDuration::seconds(req.ttl_seconds),
    )
    .await?;

    Ok(Json(token))
}

pub async fn revoke_token(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
) -> MeshResult<()> {
    if token::revoke(&store, &id).await {
        Ok(())
    } else {
        Err(MeshError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn creating_duplicate_cluster_id_is_invalid_request() {
        let store: SharedStore = Store::new_shared();
        let req = CreateClusterRequest {
            cluster_id: "default".into(),
            name: "default".into(),
            active: true,
            is_default: false,
            owner_tenant: None,
            max_streams: None,
            max_bandwidth_bps: None,
        };
        let err = create_cluster(State(store), Json(req)).await.unwrap_err();
        assert!(matches!(err, MeshError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn revoking_unknown_token_is_not_found() {
        let store: SharedStore = Store::new_shared();
        let err = revoke_token(State(store), Path("missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::NotFound(_)));
    }
}

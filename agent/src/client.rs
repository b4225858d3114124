use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{BootstrapRequest, BootstrapResponse, SyncMeshRequest, SyncMeshResponse};

/// Mirrors the server's error kinds (spec.md §7) just enough for the
/// reconciler to branch on `NotFound` vs. everything else.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server reported NotFound: {0}")]
    NotFound(String),
    #[error("request failed: {0}")]
    Other(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

/// Seam between `Reconciler` and the network, mirroring `OverlayManager`'s
/// trait abstraction over `wg-quick` — lets the sync cycle be driven by a
/// fake in tests instead of a live `mesh-control-server`.
#[async_trait]
pub trait MeshClient: Send + Sync {
    async fn sync_mesh(&self, req: &SyncMeshRequest) -> Result<SyncMeshResponse, ClientError>;

    async fn bootstrap_infrastructure_node(
        &self,
        req: &BootstrapRequest,
    ) -> Result<BootstrapResponse, ClientError>;
}

/// Thin async RPC client to `mesh-control-server`, bounded by the caller's
/// sync-timeout (spec.md §4.3 step 2 — "with the sync timeout").
pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ControlClient { http, base_url })
    }

    async fn post<Req: serde::Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Other(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.message)
                .unwrap_or_else(|_| "not found".to_string());
            return Err(ClientError::NotFound(message));
        }

        if !resp.status().is_success() {
            let text = resp
                .json::<ErrorBody>()
                .await
                .map(|b| format!("{}: {}", b.kind, b.message))
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(ClientError::Other(text));
        }

        resp.json::<Resp>()
            .await
            .map_err(|e| ClientError::Other(e.to_string()))
    }
}

#[async_trait]
impl MeshClient for ControlClient {
    async fn sync_mesh(&self, req: &SyncMeshRequest) -> Result<SyncMeshResponse, ClientError> {
        self.post("/rpc/sync-mesh", req).await
    }

    async fn bootstrap_infrastructure_node(
        &self,
        req: &BootstrapRequest,
    ) -> Result<BootstrapResponse, ClientError> {
        self.post("/rpc/bootstrap-infrastructure-node", req).await
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::client::{ClientError, ControlClient, MeshClient};
use crate::config::AgentConfig;
use crate::dns::{self, RecordTable};
use crate::model::{BootstrapRequest, OverlayConfig, SyncMeshRequest, SyncMeshResponse};
use crate::overlay::{self, OverlayManager};

/// Guarded mutable state for one reconciler (spec.md §5: "the reconciler
/// holds a mutex around the last applied overlay config cell"). Bundled
/// into a single lock, mirroring the teacher's one-`Mutex`-per-struct
/// `ControllerState` pattern rather than several independent locks.
struct ReconcilerState {
    node_id: String,
    last_applied: Option<OverlayConfig>,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    started: bool,
}

/// Generic over `MeshClient` the way `OverlayManager` is over the overlay
/// tunnel — the production binary always instantiates `Reconciler<ControlClient>`,
/// tests instantiate `Reconciler<FakeClient>` to drive the sync cycle without
/// a live server.
pub struct Reconciler<C: MeshClient = ControlClient> {
    config: AgentConfig,
    overlay: Arc<dyn OverlayManager>,
    dns_table: Arc<tokio::sync::RwLock<RecordTable>>,
    client: C,
    state: Mutex<ReconcilerState>,
}

impl Reconciler<ControlClient> {
    pub fn new(
        config: AgentConfig,
        node_id: String,
        overlay: Arc<dyn OverlayManager>,
        dns_table: Arc<tokio::sync::RwLock<RecordTable>>,
    ) -> anyhow::Result<Self> {
        let client = ControlClient::new(config.control_server_url.clone(), config.sync_timeout)?;
        Ok(Reconciler::with_client(config, node_id, overlay, dns_table, client))
    }
}

impl<C: MeshClient> Reconciler<C> {
    pub fn with_client(
        config: AgentConfig,
        node_id: String,
        overlay: Arc<dyn OverlayManager>,
        dns_table: Arc<tokio::sync::RwLock<RecordTable>>,
        client: C,
    ) -> Self {
        Reconciler {
            config,
            overlay,
            dns_table,
            client,
            state: Mutex::new(ReconcilerState {
                node_id,
                last_applied: None,
                consecutive_failures: 0,
                last_success: None,
                started: true,
            }),
        }
    }

    /// Health predicate (spec.md §4.3): started, failures bounded, and a
    /// recent success if one has ever happened.
    pub async fn is_healthy(&self) -> bool {
        let state = self.state.lock().await;
        if !state.started || state.consecutive_failures > 3 {
            return false;
        }
        match state.last_success {
            Some(t) => t.elapsed() < Duration::from_secs(300),
            None => true,
        }
    }

    /// Runs one full sync cycle (spec.md §4.3). Every early return below
    /// corresponds to a numbered failure branch in the spec.
    pub async fn run_cycle(&self) {
        let public_key = match self.overlay.get_public_key() {
            Ok(pk) => pk,
            Err(e) => {
                error!(error = %e, "failed to read overlay public key");
                self.record_failure().await;
                return;
            }
        };

        let node_id = { self.state.lock().await.node_id.clone() };

        let sync_req = SyncMeshRequest {
            node_id: node_id.clone(),
            public_key: Some(public_key.clone()),
            listen_port: Some(self.config.listen_port),
        };

        let sync_result = self.client.sync_mesh(&sync_req).await;

        let response = match sync_result {
            Ok(resp) => resp,
            Err(ClientError::NotFound(_)) => {
                match self.recover_via_bootstrap(&public_key).await {
                    Some(resp) => resp,
                    None => {
                        self.clear_dns("node not found").await;
                        self.record_failure().await;
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "sync-mesh RPC failed");
                self.record_failure().await;
                return;
            }
        };

        let private_key = match self.overlay.get_private_key() {
            Ok(pk) => pk,
            Err(e) => {
                error!(error = %e, "failed to read overlay private key");
                self.record_failure().await;
                return;
            }
        };

        let overlay_cfg = OverlayConfig {
            private_key,
            address: response.overlay_addr.clone(),
            listen_port: response.overlay_port,
            peers: response.peers.clone(),
        };
        let dns_records = build_dns_records(&response);

        if let Err(e) = self.overlay.apply(&overlay_cfg) {
            error!(error = %e, "overlay apply failed");
            self.record_failure().await;
            return;
        }

        if let Err(e) = dns::update_records(&self.dns_table, dns_records).await {
            error!(error = %e, "dns update failed, rolling back overlay");
            self.rollback().await;
            self.record_failure().await;
            return;
        }

        let mut state = self.state.lock().await;
        state.last_applied = Some(overlay_cfg);
        state.consecutive_failures = 0;
        state.last_success = Some(Instant::now());
    }

    /// Step 3 bootstrap-retry-once path: bootstrap, adopt the returned
    /// node_id in memory only (see DESIGN.md open-question resolution),
    /// then retry `SyncMesh` exactly once.
    async fn recover_via_bootstrap(&self, public_key: &str) -> Option<SyncMeshResponse> {
        let token = self.config.bootstrap_token.clone()?;

        let current_node_id = { self.state.lock().await.node_id.clone() };
        let bootstrap_req = BootstrapRequest {
            token,
            node_type: self.config.node_type,
            node_id: Some(current_node_id.clone()),
            hostname: self.config.node_name.clone(),
            external_addr: self.config.external_addr.clone(),
            internal_addr: self.config.internal_addr.clone(),
            target_cluster: None,
        };

        let bootstrap_resp = match self.client.bootstrap_infrastructure_node(&bootstrap_req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "bootstrap-infrastructure-node failed");
                return None;
            }
        };

        if bootstrap_resp.node_id != current_node_id {
            warn!(
                previous = %current_node_id,
                assigned = %bootstrap_resp.node_id,
                "server assigned a different node id; adopting in memory"
            );
            self.state.lock().await.node_id = bootstrap_resp.node_id.clone();
        }

        let retry_req = SyncMeshRequest {
            node_id: bootstrap_resp.node_id,
            public_key: Some(public_key.to_string()),
            listen_port: Some(self.config.listen_port),
        };

        match self.client.sync_mesh(&retry_req).await {
            Ok(resp) => Some(resp),
            Err(e) => {
                warn!(error = %e, "post-bootstrap sync retry failed");
                None
            }
        }
    }

    async fn rollback(&self) {
        let previous = { self.state.lock().await.last_applied.clone() };
        if let Some(cfg) = previous {
            if let Err(e) = self.overlay.apply(&cfg) {
                error!(error = %e, "rollback apply also failed");
            }
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
    }

    async fn clear_dns(&self, reason: &str) {
        info!(reason, "clearing local mesh DNS");
        if let Err(e) = dns::update_records(&self.dns_table, HashMap::new()).await {
            error!(error = %e, "failed to clear dns records");
        }
    }
}

/// Builds the DNS record map for one cycle (spec.md §4.3 step 5): peer
/// names map to their first allowed-IP with the mask stripped; service
/// endpoints append under their own key, which may legitimately collide
/// with a peer name (open question in spec.md §9 — preserved, not
/// silently resolved: see DESIGN.md).
fn build_dns_records(response: &SyncMeshResponse) -> HashMap<String, Vec<String>> {
    let mut records: HashMap<String, Vec<String>> = HashMap::new();

    for peer in &response.peers {
        if peer.name.is_empty() {
            continue;
        }
        if let Some(first) = peer.allowed_ips.first() {
            records
                .entry(peer.name.clone())
                .or_default()
                .push(overlay::strip_mask(first).to_string());
        }
    }

    for (service_name, addrs) in &response.service_endpoints {
        records
            .entry(service_name.clone())
            .or_default()
            .extend(addrs.iter().cloned());
    }

    records
}

use chrono::Utc;
use rand::RngCore;
use tracing::warn;

use crate::error::{MeshError, MeshResult};
use crate::model::{Node, NodeFingerprint, NodeStatus, NodeType};
use crate::store::Store;
use crate::token::{self, check_expected_addr};
use crate::wire::{BootstrapRequest, BootstrapResponse};

/// `BootstrapInfrastructureNode` (spec.md §4.8).
pub async fn bootstrap_infrastructure_node(
    store: &Store,
    req: BootstrapRequest,
    observed_client_addr: Option<&str>,
) -> MeshResult<BootstrapResponse> {
    // Step 1/2 — validate the token (row-locked inside `token::validate`),
    // check expiry and expected-client-address.
    let token = token::validate(store, &req.token).await?;

    if let Some(expected) = &token.expected_client_addr {
        let observed = observed_client_addr.unwrap_or("");
        if !check_expected_addr(expected, observed) {
            return Err(MeshError::PermissionDenied(
                "client address does not match token binding".to_string(),
            ));
        }
    }

    // Step 3 — resolve target cluster: token binding > caller's request >
    // first active cluster by name.
    let resolved_cluster_id = match (&token.cluster_id, &req.target_cluster) {
        (Some(bound), Some(requested)) => {
            // Step 4 — token bound to a cluster but caller asked for a
            // different one.
            if bound != requested {
                return Err(MeshError::PermissionDenied(
                    "token is bound to a different cluster".to_string(),
                ));
            }
            bound.clone()
        }
        (Some(bound), None) => bound.clone(),
        (None, Some(requested)) => requested.clone(),
        (None, None) => {
            let cluster = store
                .first_active_cluster()
                .await
                .ok_or_else(|| MeshError::Unavailable("no active cluster available".to_string()))?;
            cluster.cluster_id
        }
    };

    // Step 5 — choose node identifier.
    let node_id = req
        .node_id
        .clone()
        .unwrap_or_else(|| synthesize_node_id(req.node_type));

    // Step 6 — idempotency.
    {
        let nodes = store.nodes.lock().await;
        if let Some(existing) = nodes.get(&node_id) {
            if existing.cluster_id == resolved_cluster_id {
                // Reuse: consume the token and return success without
                // mutating the node row again.
                drop(nodes);
                token::consume(store, &req.token).await?;
                return Ok(BootstrapResponse {
                    node_id,
                    tenant_id: token.tenant_id,
                    cluster_id: resolved_cluster_id,
                });
            } else {
                return Err(MeshError::FailedPrecondition(format!(
                    "node {node_id} already exists in cluster {}",
                    existing.cluster_id
                )));
            }
        }
    }

    // Step 7 — insert the node row, fingerprint facts.
    let node = Node {
        node_id: node_id.clone(),
        cluster_id: resolved_cluster_id.clone(),
        node_type: req.node_type,
        hostname: req.hostname.clone(),
        external_addr: req.external_addr.clone(),
        internal_addr: req.internal_addr.clone(),
        overlay_addr: None,
        public_key: None,
        listen_port: None,
        status: NodeStatus::Active,
        last_heartbeat: Some(Utc::now()),
    };
    store.nodes.lock().await.insert(node_id.clone(), node);

    if let Some(fp) = &req.fingerprint {
        let fingerprint = NodeFingerprint {
            tenant_id: token.tenant_id.clone(),
            node_id: node_id.clone(),
            machine_id_hash: fp.machine_id_hash.clone(),
            mac_set_hash: fp.mac_set_hash.clone(),
            observed_peers: fp.observed_peers.clone(),
            attributes: fp.attributes.clone(),
        };
        store
            .fingerprints
            .lock()
            .await
            .insert(node_id.clone(), fingerprint);
    }

    // Step 8 — consume the token only after every validation has passed.
    token::consume(store, &req.token).await?;

    // Step 9 is implicit: this function either returns Ok (everything
    // above committed) or Err (nothing after the failing step persisted).

    // Step 10 — best-effort out-of-band DNS-sync refresh notification.
    notify_dns_refresh(req.node_type, &node_id);

    Ok(BootstrapResponse {
        node_id,
        tenant_id: token.tenant_id,
        cluster_id: resolved_cluster_id,
    })
}

fn synthesize_node_id(node_type: NodeType) -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", node_type.id_prefix(), hex)
}

/// Fire-and-forget refresh of the DNS-sync collaborator (spec.md §4.8 step
/// 10). Failure here never fails the RPC — it is logged and dropped.
fn notify_dns_refresh(node_type: NodeType, node_id: &str) {
    let node_id = node_id.to_string();
    tokio::spawn(async move {
        let fut = async {
            tracing::debug!(%node_id, ?node_type, "requesting best-effort DNS-sync refresh");
        };
        if tokio::time::timeout(std::time::Duration::from_secs(2), fut)
            .await
            .is_err()
        {
            warn!(%node_id, "DNS-sync refresh notification timed out");
        }
    });
}

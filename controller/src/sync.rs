use std::collections::HashMap;

use chrono::Utc;

use crate::error::{MeshError, MeshResult};
use crate::model::{NodeStatus, ServiceInstance};
use crate::store::Store;
use crate::wire::{PeerInfo, SyncMeshRequest, SyncMeshResponse};

const DEFAULT_LISTEN_PORT: u16 = 51820;
const PEER_KEEPALIVE_SECS: u32 = 25;

/// `SyncMesh` (spec.md §4.7): computes a node's desired overlay state.
pub async fn sync_mesh(store: &Store, req: SyncMeshRequest) -> MeshResult<SyncMeshResponse> {
    // Step 1 — lookup, NotFound for absent or inactive (treated identically;
    // the agent will attempt bootstrap either way).
    let cluster_id = {
        let nodes = store.nodes.lock().await;
        let node = nodes
            .get(&req.node_id)
            .ok_or_else(|| MeshError::NotFound(req.node_id.clone()))?;
        if node.status != NodeStatus::Active {
            return Err(MeshError::NotFound(req.node_id.clone()));
        }
        node.cluster_id.clone()
    };

    // Step 2 — update public_key/listen_port if supplied; always stamp
    // last_heartbeat. Step 3 — allocate an overlay address if missing.
    let needs_allocation = {
        let mut nodes = store.nodes.lock().await;
        let node = nodes
            .get_mut(&req.node_id)
            .ok_or_else(|| MeshError::NotFound(req.node_id.clone()))?;

        if let Some(pk) = &req.public_key {
            if !pk.is_empty() {
                node.public_key = Some(pk.clone());
            }
        }
        if let Some(port) = req.listen_port {
            if port > 0 {
                node.listen_port = Some(port);
            }
        }
        node.last_heartbeat = Some(Utc::now());

        node.overlay_addr.is_none()
    };

    if needs_allocation {
        store.allocate_overlay_address(&req.node_id).await?;
    }

    let (overlay_addr, overlay_port) = {
        let nodes = store.nodes.lock().await;
        let node = nodes
            .get(&req.node_id)
            .ok_or_else(|| MeshError::Internal("node vanished after allocation".to_string()))?;
        let addr = node
            .overlay_addr
            .clone()
            .ok_or_else(|| MeshError::Internal("overlay address missing after allocation".to_string()))?;
        let port = req
            .listen_port
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_LISTEN_PORT);
        (addr, port)
    };

    // Step 4 — peers: same cluster, active, keyed, addressed nodes.
    let peers = {
        let nodes = store.nodes.lock().await;
        let mut peers = Vec::new();
        for peer in nodes.values() {
            if peer.node_id == req.node_id {
                continue;
            }
            if peer.cluster_id != cluster_id || !peer.is_eligible_peer() {
                continue;
            }
            let Some(host) = peer.endpoint_host() else {
                continue;
            };
            let peer_overlay = peer
                .overlay_addr
                .as_deref()
                .expect("is_eligible_peer guarantees overlay_addr");
            let port = peer.listen_port.filter(|p| *p > 0).unwrap_or(DEFAULT_LISTEN_PORT);

            peers.push(PeerInfo {
                name: peer.hostname.clone().unwrap_or_else(|| peer.node_id.clone()),
                public_key: peer
                    .public_key
                    .clone()
                    .expect("is_eligible_peer guarantees public_key"),
                endpoint: format_endpoint(host, port),
                allowed_ips: vec![format!("{}/32", peer_overlay)],
                keepalive: PEER_KEEPALIVE_SECS,
            });
        }
        peers
    };

    // Step 5 — service-endpoint aliases.
    let service_endpoints = {
        let services = store.services.lock().await;
        let nodes = store.nodes.lock().await;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();

        for svc in services.values() {
            if svc.cluster_id != cluster_id || !svc.status.counts_as_live() {
                continue;
            }
            let Some(node) = nodes.get(&svc.node_id) else {
                continue;
            };
            let Some(addr) = &node.overlay_addr else {
                continue;
            };
            map.entry(svc.service_id.clone()).or_default().push(addr.clone());
        }

        map
    };

    Ok(SyncMeshResponse {
        overlay_addr,
        overlay_port,
        peers,
        service_endpoints,
    })
}

fn format_endpoint(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[allow(dead_code)]
fn service_is_live(svc: &ServiceInstance) -> bool {
    svc.status.counts_as_live()
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Mirrors `mesh-control-server`'s `NodeType` (spec.md §3) — wire-compatible
/// but deliberately a separate type, since the agent and server are
/// independent binaries with no shared library crate.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Edge,
    Infrastructure,
}

#[derive(Debug, Serialize)]
pub struct SyncMeshRequest {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PeerInfo {
    pub name: String,
    pub public_key: String,
    pub endpoint: String,
    pub allowed_ips: Vec<String>,
    pub keepalive: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncMeshResponse {
    pub overlay_addr: String,
    pub overlay_port: u16,
    pub peers: Vec<PeerInfo>,
    pub service_endpoints: HashMap<String, Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct BootstrapRequest {
    pub token: String,
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cluster: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapResponse {
    pub node_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub cluster_id: String,
}

/// A fully resolved overlay configuration, ready to hand to an
/// `OverlayManager::apply` (spec.md §4.1, §4.3 step 5).
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub private_key: String,
    pub address: String,
    pub listen_port: u16,
    pub peers: Vec<PeerInfo>,
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::NodeType;

/// `SyncMesh` request (spec.md §6): `{node_id, public_key?, listen_port?}`.
#[derive(Debug, Deserialize)]
pub struct SyncMeshRequest {
    pub node_id: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
}

#[derive(Debug, Serialize, Clone)]
pub struct PeerInfo {
    pub name: String,
    pub public_key: String,
    /// "host:port"
    pub endpoint: String,
    pub allowed_ips: Vec<String>,
    pub keepalive: u32,
}

/// `SyncMesh` response (spec.md §6).
#[derive(Debug, Serialize)]
pub struct SyncMeshResponse {
    pub overlay_addr: String,
    pub overlay_port: u16,
    pub peers: Vec<PeerInfo>,
    pub service_endpoints: HashMap<String, Vec<String>>,
}

/// `BootstrapInfrastructureNode` request (spec.md §6).
#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    pub token: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub external_addr: Option<String>,
    #[serde(default)]
    pub internal_addr: Option<String>,
    #[serde(default)]
    pub target_cluster: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<FingerprintPayload>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FingerprintPayload {
    #[serde(default)]
    pub machine_id_hash: Option<String>,
    #[serde(default)]
    pub mac_set_hash: Vec<String>,
    #[serde(default)]
    pub observed_peers: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// `BootstrapInfrastructureNode` response (spec.md §6).
#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    pub node_id: String,
    pub tenant_id: Option<String>,
    pub cluster_id: String,
}

/// Service registration request (spec.md §4.9).
#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub token: String,
    pub service_id: String,
    /// The node this service instance runs on (joined against in
    /// `SyncMesh` step 5 to resolve the instance's overlay address).
    pub node_id: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub advertise_host: String,
    pub port: u16,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub health_endpoint: Option<String>,
}

fn default_protocol() -> String {
    "http".to_string()
}

#[derive(Debug, Serialize)]
pub struct RegisterServiceResponse {
    pub instance_id: String,
}

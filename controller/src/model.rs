use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A node's lifecycle status. Nodes are never hard-deleted; `Inactive` is
/// the only way a node stops being eligible for peering (spec.md §3, §4.7).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Edge,
    Infrastructure,
}

impl NodeType {
    pub fn id_prefix(self) -> &'static str {
        match self {
            NodeType::Edge => "edge",
            NodeType::Infrastructure => "node",
        }
    }
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Edge
    }
}

/// A node enrolled into exactly one cluster. Once assigned, `overlay_addr`
/// is immutable for the node's lifetime (spec.md §3).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Node {
    pub node_id: String,
    pub cluster_id: String,
    pub node_type: NodeType,
    pub hostname: Option<String>,
    pub external_addr: Option<String>,
    pub internal_addr: Option<String>,
    pub overlay_addr: Option<String>,
    pub public_key: Option<String>,
    pub listen_port: Option<u16>,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Node {
    pub fn is_eligible_peer(&self) -> bool {
        self.status == NodeStatus::Active
            && self.public_key.is_some()
            && self.overlay_addr.is_some()
    }

    pub fn endpoint_host(&self) -> Option<&str> {
        self.external_addr
            .as_deref()
            .or(self.internal_addr.as_deref())
    }
}

/// A named cluster of nodes. At most one cluster is ever the global default
/// (spec.md §3); that flag is informational here and not otherwise enforced
/// by this store (administrative responsibility).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Cluster {
    pub cluster_id: String,
    pub name: String,
    pub active: bool,
    pub is_default: bool,
    pub owner_tenant: Option<String>,
    pub max_streams: Option<u64>,
    pub current_streams: u64,
    pub max_bandwidth_bps: Option<u64>,
    pub current_bandwidth_bps: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    EdgeNode,
    InfrastructureNode,
    Service,
}

/// A bootstrap credential. Validity is the predicate in spec.md §4.5:
/// `expires_at > now ∧ ((usage_limit IS NULL ∧ used_at IS NULL) ∨
/// (usage_limit IS NOT NULL ∧ usage_count < usage_limit))`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BootstrapToken {
    pub id: String,
    pub secret: String,
    pub kind: TokenKind,
    pub tenant_id: Option<String>,
    pub cluster_id: Option<String>,
    /// Either a single IP ("203.0.113.9") or CIDR ("203.0.113.0/24").
    pub expected_client_addr: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub used_at: Option<DateTime<Utc>>,
}

impl BootstrapToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.expires_at <= now {
            return false;
        }
        match self.usage_limit {
            None => self.used_at.is_none(),
            Some(limit) => self.usage_count < limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Starting,
    Stopped,
    Active,
}

impl ServiceStatus {
    pub fn counts_as_live(self) -> bool {
        matches!(self, ServiceStatus::Running | ServiceStatus::Active)
    }
}

/// Uniqueness key for a service instance: (service, cluster, protocol, port)
/// (spec.md §3, §4.9).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub service_id: String,
    pub cluster_id: String,
    pub protocol: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_id: String,
    pub cluster_id: String,
    pub node_id: String,
    pub protocol: String,
    pub advertise_host: String,
    pub port: u16,
    pub version: Option<String>,
    pub status: ServiceStatus,
    pub health_status: String,
    pub health_endpoint: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            service_id: self.service_id.clone(),
            cluster_id: self.cluster_id.clone(),
            protocol: self.protocol.clone(),
            port: self.port,
        }
    }
}

/// Re-identifies a returning node without re-enrolling (spec.md §3).
/// Never used to authorize anything by itself — it is a hint only.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NodeFingerprint {
    pub tenant_id: Option<String>,
    pub node_id: String,
    pub machine_id_hash: Option<String>,
    pub mac_set_hash: Vec<String>,
    pub observed_peers: Vec<String>,
    pub attributes: HashMap<String, String>,
}

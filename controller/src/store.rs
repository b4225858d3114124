use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{MeshError, MeshResult};
use crate::model::{BootstrapToken, Cluster, Node, NodeFingerprint, ServiceInstance};

/// Overlay address pool (spec.md §4.6): a fixed private IPv4 space,
/// monotonically assigned, never reused.
pub const POOL_BASE: Ipv4Addr = Ipv4Addr::new(10, 200, 0, 0);
pub const POOL_PREFIX_LEN: u32 = 16;
pub const POOL_FIRST: Ipv4Addr = Ipv4Addr::new(10, 200, 0, 1);

/// Stand-in for the transactional store (spec.md §1 scopes the real SQL
/// engine out; this treats it as "a transactional KV with row locks and
/// advisory locks"). Each table is guarded by its own mutex; holding a
/// table's lock across a read-modify-write models a row lock held for the
/// duration of a transaction. `allocator_lock` is the one *advisory* lock,
/// named and scoped exactly as spec.md §4.6/§5 describes: held only by the
/// overlay allocator, serializing any two concurrent allocations.
///
/// Mirrors the teacher's `ControllerState` (`controller/src/main.rs`): one
/// `Mutex`-guarded struct with a `HashMap` per concern, shared via `Arc`.
#[derive(Debug)]
pub struct Store {
    pub clusters: Mutex<HashMap<String, Cluster>>,
    pub tokens: Mutex<HashMap<String, BootstrapToken>>,
    pub nodes: Mutex<HashMap<String, Node>>,
    pub services: Mutex<HashMap<String, ServiceInstance>>,
    pub fingerprints: Mutex<HashMap<String, NodeFingerprint>>,
    pub allocator_lock: Mutex<()>,
}

pub type SharedStore = Arc<Store>;

impl Default for Store {
    fn default() -> Self {
        let mut clusters = HashMap::new();
        clusters.insert(
            "default".to_string(),
            Cluster {
                cluster_id: "default".to_string(),
                name: "default".to_string(),
                active: true,
                is_default: true,
                owner_tenant: None,
                max_streams: None,
                current_streams: 0,
                max_bandwidth_bps: None,
                current_bandwidth_bps: 0,
            },
        );

        Store {
            clusters: Mutex::new(clusters),
            tokens: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            fingerprints: Mutex::new(HashMap::new()),
            allocator_lock: Mutex::new(()),
        }
    }
}

impl Store {
    pub fn new_shared() -> SharedStore {
        Arc::new(Store::default())
    }

    /// The first active cluster ordered by name, used as the bootstrap
    /// fallback target (spec.md §4.8 step 3).
    pub async fn first_active_cluster(&self) -> Option<Cluster> {
        let clusters = self.clusters.lock().await;
        let mut candidates: Vec<&Cluster> = clusters.values().filter(|c| c.active).collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.first().map(|c| (*c).clone())
    }

    /// Allocates the next unused /32 under the advisory lock (spec.md §4.6):
    /// begin "transaction" → acquire advisory lock → select max assigned →
    /// write to the node row → release on drop (commit). Addresses are
    /// never reused; the pool is monotonic.
    pub async fn allocate_overlay_address(&self, node_id: &str) -> MeshResult<Ipv4Addr> {
        let _advisory = self.allocator_lock.lock().await;
        let mut nodes = self.nodes.lock().await;

        let max_assigned = nodes
            .values()
            .filter_map(|n| n.overlay_addr.as_deref())
            .filter_map(|a| a.parse::<Ipv4Addr>().ok())
            .max();

        let candidate = match max_assigned {
            Some(addr) => next_address(addr)?,
            None => POOL_FIRST,
        };

        if !pool_contains(candidate) {
            return Err(MeshError::ResourceExhausted("PoolExhausted".to_string()));
        }

        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| MeshError::Internal("node vanished during allocation".to_string()))?;
        node.overlay_addr = Some(candidate.to_string());

        Ok(candidate)
    }
}

fn pool_contains(addr: Ipv4Addr) -> bool {
    let base = u32::from(POOL_BASE);
    let mask = u32::MAX << (32 - POOL_PREFIX_LEN);
    (u32::from(addr) & mask) == (base & mask)
}

fn next_address(addr: Ipv4Addr) -> MeshResult<Ipv4Addr> {
    let next = u32::from(addr)
        .checked_add(1)
        .ok_or_else(|| MeshError::ResourceExhausted("PoolExhausted".to_string()))?;
    Ok(Ipv4Addr::from(next))
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_allocation_is_pool_first_address() {
        let store = Store::default();
        store.nodes.lock().await.insert(
            "n1".into(),
            Node {
                node_id: "n1".into(),
                cluster_id: "default".into(),
                node_type: crate::model::NodeType::Edge,
                hostname: None,
                external_addr: None,
                internal_addr: None,
                overlay_addr: None,
                public_key: None,
                listen_port: None,
                status: crate::model::NodeStatus::Active,
                last_heartbeat: None,
            },
        );

        let addr = store.allocate_overlay_address("n1").await.unwrap();
        assert_eq!(addr, POOL_FIRST);
    }

    #[tokio::test]
    async fn allocation_is_monotonic_and_never_reused() {
        let store = Store::default();
        for id in ["n1", "n2", "n3"] {
            store.nodes.lock().await.insert(
                id.into(),
                Node {
                    node_id: id.into(),
                    cluster_id: "default".into(),
                    node_type: crate::model::NodeType::Edge,
                    hostname: None,
                    external_addr: None,
                    internal_addr: None,
                    overlay_addr: None,
                    public_key: None,
                    listen_port: None,
                    status: crate::model::NodeStatus::Active,
                    last_heartbeat: None,
                },
            );
        }

        let a1 = store.allocate_overlay_address("n1").await.unwrap();
        let a2 = store.allocate_overlay_address("n2").await.unwrap();
        let a3 = store.allocate_overlay_address("n3").await.unwrap();

        assert_eq!(a1, Ipv4Addr::new(10, 200, 0, 1));
        assert_eq!(a2, Ipv4Addr::new(10, 200, 0, 2));
        assert_eq!(a3, Ipv4Addr::new(10, 200, 0, 3));
    }

    #[tokio::test]
    async fn concurrent_allocations_are_pairwise_distinct() {
        let store = Arc::new(Store::default());
        let ids: Vec<String> = (0..16).map(|i| format!("n{i}")).collect();
        for id in &ids {
            store.nodes.lock().await.insert(
                id.clone(),
                Node {
                    node_id: id.clone(),
                    cluster_id: "default".into(),
                    node_type: crate::model::NodeType::Edge,
                    hostname: None,
                    external_addr: None,
                    internal_addr: None,
                    overlay_addr: None,
                    public_key: None,
                    listen_port: None,
                    status: crate::model::NodeStatus::Active,
                    last_heartbeat: None,
                },
            );
        }

        let mut handles = Vec::new();
        for id in ids {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.allocate_overlay_address(&id).await.unwrap() },
            ));
        }

        let mut addrs = Vec::new();
        for h in handles {
            addrs.push(h.await.unwrap());
        }

        let mut unique = addrs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), addrs.len(), "addresses must be pairwise distinct");
        assert!(addrs.iter().all(|a| pool_contains(*a)));
    }
}

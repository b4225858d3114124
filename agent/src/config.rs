use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::NodeType;

/// Agent configuration (spec.md §4.3). Every field has a documented
/// default so the agent starts with no configuration beyond a server URL.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub control_server_url: String,
    pub sync_interval: Duration,
    pub sync_timeout: Duration,
    pub overlay_interface: String,
    pub bootstrap_token: Option<String>,
    pub identity_path: PathBuf,
    pub private_key_path: PathBuf,
    pub external_addr: Option<String>,
    pub internal_addr: Option<String>,
    pub listen_port: u16,
    pub node_type: NodeType,
    pub node_name: Option<String>,
}

impl AgentConfig {
    /// Loads configuration from the environment, the way the teacher's
    /// agent reads `JUNKNAS_*` variables with hardcoded fallbacks.
    pub fn from_env() -> anyhow::Result<Self> {
        let control_server_url = env::var("MESH_CONTROL_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8443".to_string());

        let sync_interval = Duration::from_secs(env_u64("MESH_SYNC_INTERVAL_SECS", 30));
        let sync_timeout = Duration::from_secs(env_u64("MESH_SYNC_TIMEOUT_SECS", 10));

        let overlay_interface =
            env::var("MESH_OVERLAY_INTERFACE").unwrap_or_else(|_| "wg0".to_string());

        let bootstrap_token = env::var("MESH_BOOTSTRAP_TOKEN").ok();

        let state_dir = state_dir()?;
        let identity_path =
            env::var("MESH_IDENTITY_PATH").map(PathBuf::from).unwrap_or_else(|_| state_dir.join("node-identity"));
        let private_key_path = env::var("MESH_PRIVATE_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| state_dir.join("overlay.key"));

        let external_addr = env::var("MESH_EXTERNAL_ADDR").ok();
        let internal_addr = env::var("MESH_INTERNAL_ADDR").ok();
        let listen_port = env::var("MESH_LISTEN_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(51820);

        let node_type = match env::var("MESH_NODE_TYPE").ok().as_deref() {
            Some("infrastructure") => NodeType::Infrastructure,
            _ => NodeType::Edge,
        };

        let node_name = env::var("MESH_NODE_NAME")
            .ok()
            .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()));

        Ok(AgentConfig {
            control_server_url,
            sync_interval,
            sync_timeout,
            overlay_interface,
            bootstrap_token,
            identity_path,
            private_key_path,
            external_addr,
            internal_addr,
            listen_port,
            node_type,
            node_name,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn state_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = env::var("MESH_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("no local data directory"))?;
    Ok(base.join("mesh-agent"))
}

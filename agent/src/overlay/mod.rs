pub mod keys;

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::AgentError;
use crate::model::OverlayConfig;

/// Agent-side overlay tunnel capability (spec.md §4.1), abstracted away
/// from any specific kernel driver or `wg`/`ip` tooling — the contract is
/// `Init`/`Apply`/key access only.
pub trait OverlayManager: Send + Sync {
    fn init(&self) -> Result<(), AgentError>;
    fn apply(&self, cfg: &OverlayConfig) -> Result<(), AgentError>;
    fn get_public_key(&self) -> Result<String, AgentError>;
    fn get_private_key(&self) -> Result<String, AgentError>;
}

/// Production `OverlayManager`: renders a `wg-quick`-style config file and
/// reloads the interface via `wg-quick down`/`up`, generalizing the
/// teacher's `controller::wireguard::render` / `write_and_reload` /
/// `restart_interface` to the agent side and to a single peer-replacing
/// node config instead of a hub config.
pub struct FileOverlayManager {
    interface: String,
    config_path: PathBuf,
    private_key_path: PathBuf,
    /// Guards `Init` and key generation against each other (spec.md §4.1:
    /// "generation is atomic against concurrent Init") — without it, two
    /// concurrent first-run calls could each see the key file absent and
    /// generate and persist two different keys.
    key_lock: Mutex<()>,
}

impl FileOverlayManager {
    pub fn new(interface: String, config_path: PathBuf, private_key_path: PathBuf) -> Self {
        FileOverlayManager {
            interface,
            config_path,
            private_key_path,
            key_lock: Mutex::new(()),
        }
    }
}

impl OverlayManager for FileOverlayManager {
    fn init(&self) -> Result<(), AgentError> {
        let _guard = self.key_lock.lock().unwrap();

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AgentError::Platform(format!("creating config dir: {e}")))?;
        }
        if !self.config_path.exists() {
            fs::write(&self.config_path, "")
                .map_err(|e| AgentError::Platform(format!("creating config file: {e}")))?;
        }
        Ok(())
    }

    fn apply(&self, cfg: &OverlayConfig) -> Result<(), AgentError> {
        validate(cfg)?;

        let contents = render(&self.interface, cfg);

        if let Ok(existing) = fs::read_to_string(&self.config_path) {
            if existing == contents {
                info!(interface = %self.interface, "overlay config unchanged, skipping reload");
                return Ok(());
            }
        }

        fs::write(&self.config_path, &contents)
            .map_err(|e| AgentError::Platform(format!("writing overlay config: {e}")))?;

        restart_interface(&self.interface);
        Ok(())
    }

    fn get_public_key(&self) -> Result<String, AgentError> {
        let private_key = self.get_private_key()?;
        keys::public_key_from_private(&private_key)
            .map_err(|e| AgentError::Platform(format!("deriving public key: {e}")))
    }

    fn get_private_key(&self) -> Result<String, AgentError> {
        let _guard = self.key_lock.lock().unwrap();
        keys::load_or_generate(&self.private_key_path)
            .map_err(|e| AgentError::Platform(format!("loading private key: {e}")))
    }
}

/// Validation per spec.md §4.1: malformed peer (empty public key, empty
/// allowed-IPs, negative keepalive — `u32` makes that unrepresentable, so
/// only the remaining checks apply), non-positive listen port, blank
/// private key or address.
fn validate(cfg: &OverlayConfig) -> Result<(), AgentError> {
    if cfg.private_key.trim().is_empty() {
        return Err(AgentError::ConfigInvalid("blank private key".to_string()));
    }
    if cfg.address.trim().is_empty() {
        return Err(AgentError::ConfigInvalid("blank address".to_string()));
    }
    if cfg.listen_port == 0 {
        return Err(AgentError::ConfigInvalid(
            "listen port must be positive".to_string(),
        ));
    }
    for peer in &cfg.peers {
        if peer.public_key.trim().is_empty() {
            return Err(AgentError::ConfigInvalid(format!(
                "peer {} has an empty public key",
                peer.name
            )));
        }
        if peer.allowed_ips.is_empty() {
            return Err(AgentError::ConfigInvalid(format!(
                "peer {} has an empty allowed-IP list",
                peer.name
            )));
        }
    }
    Ok(())
}

fn render(interface: &str, cfg: &OverlayConfig) -> String {
    let mut lines = vec!["[Interface]".to_string()];
    lines.push(format!("PrivateKey = {}", cfg.private_key));
    lines.push(format!("ListenPort = {}", cfg.listen_port));
    lines.push(format!("Address = {}/32", cfg.address));
    let _ = interface;

    let mut peers = cfg.peers.clone();
    peers.sort_by(|a, b| a.public_key.cmp(&b.public_key));

    for peer in peers {
        lines.push(String::new());
        lines.push("[Peer]".to_string());
        lines.push(format!("PublicKey = {}", peer.public_key));
        lines.push(format!("AllowedIPs = {}", peer.allowed_ips.join(", ")));
        lines.push(format!("Endpoint = {}", peer.endpoint));
        lines.push(format!("PersistentKeepalive = {}", peer.keepalive));
    }

    lines.join("\n") + "\n"
}

fn restart_interface(interface: &str) {
    if let Err(e) = Command::new("wg-quick").arg("down").arg(interface).status() {
        warn!("wg-quick down {} failed: {}", interface, e);
    }
    if let Err(e) = Command::new("wg-quick").arg("up").arg(interface).status() {
        warn!("wg-quick up {} failed: {}", interface, e);
    }
}

/// Strips a `/NN` mask suffix, used when building DNS records from
/// allowed-IPs (spec.md §4.3 step 5: "first-allowed-ip-with-mask-stripped").
pub fn strip_mask(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr)
}

pub fn is_parseable_address(addr: &str) -> bool {
    addr.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeerInfo;

    fn valid_cfg() -> OverlayConfig {
        OverlayConfig {
            private_key: "priv".into(),
            address: "10.200.0.5".into(),
            listen_port: 51820,
            peers: vec![PeerInfo {
                name: "peer-a".into(),
                public_key: "pub-a".into(),
                endpoint: "198.51.100.2:51820".into(),
                allowed_ips: vec!["10.200.0.6/32".into()],
                keepalive: 25,
            }],
        }
    }

    #[test]
    fn rejects_blank_private_key() {
        let mut cfg = valid_cfg();
        cfg.private_key = "   ".into();
        assert!(matches!(validate(&cfg), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_non_positive_listen_port() {
        let mut cfg = valid_cfg();
        cfg.listen_port = 0;
        assert!(matches!(validate(&cfg), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_peer_with_empty_public_key() {
        let mut cfg = valid_cfg();
        cfg.peers[0].public_key = "".into();
        assert!(matches!(validate(&cfg), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_peer_with_empty_allowed_ips() {
        let mut cfg = valid_cfg();
        cfg.peers[0].allowed_ips.clear();
        assert!(matches!(validate(&cfg), Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn strip_mask_removes_suffix() {
        assert_eq!(strip_mask("10.200.0.6/32"), "10.200.0.6");
        assert_eq!(strip_mask("10.200.0.6"), "10.200.0.6");
    }
}

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// Generates a base64-encoded x25519 keypair (spec.md §4.1 "GetPublicKey" /
/// "GetPrivateKey"). Mirrors the teacher's
/// `controller::wireguard::generate_ephemeral_keypair`.
pub fn generate_keypair() -> (String, String) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (STANDARD.encode(secret.to_bytes()), STANDARD.encode(public.to_bytes()))
}

pub fn public_key_from_private(private_key_b64: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(private_key_b64)
        .context("decoding private key")?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("private key is not 32 bytes"))?;
    let secret = StaticSecret::from(arr);
    let public = PublicKey::from(&secret);
    Ok(STANDARD.encode(public.to_bytes()))
}

/// Loads the persisted private key, generating and persisting a new one on
/// first run (spec.md §6 "Overlay private key": one line, file mode 0600).
pub fn load_or_generate(path: &Path) -> Result<String> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading overlay private key {}", path.display()))?;
        return Ok(raw.trim().to_string());
    }

    let (private_key, _public_key) = generate_keypair();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{private_key}\n"))
        .with_context(|| format!("writing overlay private key {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(private_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_is_deterministic_from_private_key() {
        let (private_key, public_key) = generate_keypair();
        assert_eq!(public_key_from_private(&private_key).unwrap(), public_key);
    }
}

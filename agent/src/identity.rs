use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Node identity: loaded from disk if present, else derived from the
/// hostname and persisted (spec.md §4.4, §6 "Persisted state"). One line,
/// plain text, trimmed on read. Directory mode 0700, file mode 0600.
pub fn load_or_generate(path: &Path, node_name_hint: Option<&str>) -> Result<String> {
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading node identity file {}", path.display()))?;
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
        // A zero-byte or whitespace-only file (e.g. left over from an
        // interrupted write) is treated as absent, not as an empty identity.
    }

    let hostname_part = node_name_hint
        .map(|s| s.to_string())
        .unwrap_or_else(|| "node".to_string());
    let node_id = format!("{}-{}", hostname_part, Uuid::new_v4());

    persist(path, &node_id)?;
    Ok(node_id)
}

/// Overwrites the on-disk identity file with a server-assigned id. Used
/// only when the implementer chooses option (a) of the identity-adoption
/// open question (see DESIGN.md) — not called by the default reconciler
/// path, which only adopts the new id in memory.
pub fn persist(path: &Path, node_id: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating identity directory {}", parent.display()))?;
        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
    }

    fs::write(path, format!("{node_id}\n"))
        .with_context(|| format!("writing node identity file {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::TempDir;

    #[test]
    fn generates_and_persists_identity_on_first_run() {
        let dir = TempDir::new();
        let path = dir.path().join("sub").join("node-identity");

        let id = load_or_generate(&path, Some("edge-a")).unwrap();
        assert!(id.starts_with("edge-a-"));
        assert!(path.exists());

        let reloaded = load_or_generate(&path, Some("edge-a")).unwrap();
        assert_eq!(id, reloaded);
    }

    #[test]
    fn trims_whitespace_on_read() {
        let dir = TempDir::new();
        let path = dir.path().join("node-identity");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "node-existing\n\n").unwrap();

        let id = load_or_generate(&path, None).unwrap();
        assert_eq!(id, "node-existing");
    }

    #[test]
    fn empty_file_is_treated_as_absent_and_regenerated() {
        let dir = TempDir::new();
        let path = dir.path().join("node-identity");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "   \n").unwrap();

        let id = load_or_generate(&path, Some("edge-a")).unwrap();
        assert!(id.starts_with("edge-a-"));

        let reloaded = fs::read_to_string(&path).unwrap();
        assert_eq!(reloaded.trim(), id);
    }

    /// Minimal temp-dir helper so this module's tests don't reach for an
    /// external crate; cleans itself up via `Drop`.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let dir = std::env::temp_dir().join(format!("mesh-agent-test-{}", uuid::Uuid::new_v4()));
                std::fs::create_dir_all(&dir).unwrap();
                TempDir(dir)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }
}

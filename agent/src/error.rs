use thiserror::Error;

/// Local failure kinds that are distinct from the server's `MeshError`
/// kinds (spec.md §7): these never cross the wire, they only drive the
/// reconciler's retry/rollback decisions.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Local overlay config rejected before any side effect — never
    /// retried silently; surfaced to the operator via `tracing::error!`.
    #[error("overlay config invalid: {0}")]
    ConfigInvalid(String),
    /// The platform-specific driver refused to apply a config.
    #[error("overlay platform error: {0}")]
    Platform(String),
    /// DNS record validation rejected before any state change.
    #[error("dns update invalid: {0}")]
    InvalidName(String),
    #[error("dns update invalid: {0}")]
    EmptyAddress(String),
    #[error("dns update invalid: {0}")]
    InvalidAddress(String),
}

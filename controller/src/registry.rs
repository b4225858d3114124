use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{MeshError, MeshResult};
use crate::model::{BootstrapToken, ServiceInstance, ServiceKey, ServiceStatus};
use crate::store::Store;
use crate::token;
use crate::wire::{RegisterServiceRequest, RegisterServiceResponse};

const STALE_HEALTH_CHECK: Duration = Duration::minutes(10);

/// `BootstrapService` / service registry (spec.md §4.9).
pub async fn register_service(
    store: &Store,
    req: RegisterServiceRequest,
) -> MeshResult<RegisterServiceResponse> {
    // Validate without consuming — consumption happens only after every
    // other validation has passed (spec.md §4.9).
    let tok = token::validate(store, &req.token).await?;
    let cluster_id = resolve_cluster(store, &tok, req.cluster_id.as_deref()).await?;

    let key = ServiceKey {
        service_id: req.service_id.clone(),
        cluster_id: cluster_id.clone(),
        protocol: req.protocol.clone(),
        port: req.port,
    };

    // Compute the mutation plan without applying it yet, so a failed token
    // consumption below leaves the service table untouched too.
    let now = Utc::now();
    let services = store.services.lock().await;
    let existing_id = services
        .values()
        .find(|s| s.key() == key)
        .map(|s| s.instance_id.clone());
    let preserved_started_at = existing_id
        .as_ref()
        .and_then(|id| services.get(id))
        .and_then(|s| s.started_at);
    drop(services);

    // Token consumption must happen after all validations (spec.md §4.9):
    // if this fails (race loser), nothing below executes.
    token::consume(store, &req.token)
        .await
        .map_err(|_| MeshError::Unauthenticated("AlreadyUsed".to_string()))?;

    let instance_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut services = store.services.lock().await;
    services.insert(
        instance_id.clone(),
        ServiceInstance {
            instance_id: instance_id.clone(),
            service_id: req.service_id.clone(),
            cluster_id: cluster_id.clone(),
            node_id: req.node_id.clone(),
            protocol: req.protocol.clone(),
            advertise_host: req.advertise_host.clone(),
            port: req.port,
            version: req.version.clone(),
            status: ServiceStatus::Running,
            health_status: "unknown".to_string(),
            health_endpoint: req.health_endpoint.clone(),
            started_at: Some(preserved_started_at.unwrap_or(now)),
            last_health_check: None,
        },
    );

    // Garbage-collect ghosts: any other instance of the same service+cluster
    // whose last health check is null, stale, or whose (host, protocol,
    // port) collides with the instance we just wrote.
    let cutoff = now - STALE_HEALTH_CHECK;
    for (id, inst) in services.iter_mut() {
        if *id == instance_id {
            continue;
        }
        if inst.service_id != req.service_id || inst.cluster_id != cluster_id {
            continue;
        }

        let stale = inst.last_health_check.map(|t| t < cutoff).unwrap_or(true);
        let collides = inst.advertise_host == req.advertise_host
            && inst.protocol == req.protocol
            && inst.port == req.port;

        if stale || collides {
            inst.status = ServiceStatus::Stopped;
        }
    }

    Ok(RegisterServiceResponse { instance_id })
}

/// Cluster resolution for service registration (spec.md §4.9): token
/// binding takes precedence, then the caller's explicit cluster, then a
/// single active cluster fallback — an error (not a silent pick) if more
/// than one cluster is active and none was specified.
async fn resolve_cluster(
    store: &Store,
    token: &BootstrapToken,
    explicit: Option<&str>,
) -> MeshResult<String> {
    if let Some(bound) = &token.cluster_id {
        return Ok(bound.clone());
    }
    if let Some(explicit) = explicit {
        return Ok(explicit.to_string());
    }

    let clusters = store.clusters.lock().await;
    let actives: Vec<&crate::model::Cluster> = clusters.values().filter(|c| c.active).collect();
    match actives.len() {
        0 => Err(MeshError::Unavailable("no active cluster available".to_string())),
        1 => Ok(actives[0].cluster_id.clone()),
        _ => Err(MeshError::InvalidRequest(
            "multiple active clusters; cluster_id is required".to_string(),
        )),
    }
}

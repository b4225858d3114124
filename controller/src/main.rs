use std::env;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod admin;
mod bootstrap;
mod error;
mod model;
mod registry;
mod store;
mod sync;
mod token;
mod wire;

use error::MeshResult;
use store::{SharedStore, Store};
use wire::{
    BootstrapRequest, BootstrapResponse, RegisterServiceRequest, RegisterServiceResponse,
    SyncMeshRequest, SyncMeshResponse,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store: SharedStore = Store::new_shared();

    let api_port: u16 = env::var("MESH_CONTROL_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8443);

    let app = Router::new()
        .route("/rpc/sync-mesh", post(rpc_sync_mesh))
        .route(
            "/rpc/bootstrap-infrastructure-node",
            post(rpc_bootstrap_infrastructure_node),
        )
        .route("/rpc/register-service", post(rpc_register_service))
        .route(
            "/admin/clusters",
            get(admin::list_clusters).post(admin::create_cluster),
        )
        .route("/admin/tokens", post(admin::create_token))
        .route("/admin/tokens/:id", delete(admin::revoke_token))
        .with_state(store)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{}", api_port).parse()?;
    info!("mesh-control-server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn rpc_sync_mesh(
    State(store): State<SharedStore>,
    Json(req): Json<SyncMeshRequest>,
) -> MeshResult<Json<SyncMeshResponse>> {
    let resp = sync::sync_mesh(&store, req).await?;
    Ok(Json(resp))
}

async fn rpc_bootstrap_infrastructure_node(
    State(store): State<SharedStore>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<BootstrapRequest>,
) -> MeshResult<Json<BootstrapResponse>> {
    let observed = addr.ip().to_string();
    let resp = bootstrap::bootstrap_infrastructure_node(&store, req, Some(observed.as_str())).await?;
    Ok(Json(resp))
}

async fn rpc_register_service(
    State(store): State<SharedStore>,
    Json(req): Json<RegisterServiceRequest>,
) -> MeshResult<Json<RegisterServiceResponse>> {
    let resp = registry::register_service(&store, req).await?;
    Ok(Json(resp))
}

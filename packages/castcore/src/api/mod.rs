//! HTTP API layer.
//!
//! Thin handlers that delegate to the services wired up in [`crate::bootstrap`];
//! this module provides router construction and server startup.

use std::sync::Arc;

use thiserror::Error;

use crate::block_source::SharedBlockSource;
use crate::context::NetworkContext;
use crate::device::registry::DeviceRegistry;
use crate::device::upnp::UpnpNotifyRegistry;
use crate::device::web::WebDeviceRegistry;
use crate::session::manager::SessionManager;
use crate::session::table::SessionTable;

pub mod http;
pub mod stream;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub block_source: SharedBlockSource,
    pub session_table: Arc<SessionTable>,
    pub session_manager: Arc<SessionManager>,
    pub devices: Arc<DeviceRegistry>,
    pub network: NetworkContext,
    pub block_size: u64,
    /// Always present: UPnP discovery is an always-on finder.
    pub upnp_notify_registry: Arc<UpnpNotifyRegistry>,
    /// Only present when the `web` pseudo-device is configured.
    pub web_registry: Option<Arc<WebDeviceRegistry>>,
}

/// Starts the HTTP server on the configured listen address.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::new(
        state.network.listen_host().parse().unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        state.network.listen_port(),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_port = listener.local_addr()?.port();
    state.network.set_listen_port(bound_port);

    log::info!("listening on http://{}:{}", state.network.listen_host(), bound_port);
    let app = http::create_router(state);

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}

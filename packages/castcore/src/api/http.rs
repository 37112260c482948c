//! Router assembly: wires handlers to paths and merges each device finder's
//! auxiliary routes (UPnP GENA notifications, web pseudo-device register/poll)
//! onto the shared router.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, MethodFilter};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::stream::{probe_stub, stream_handler, StreamDeps};
use crate::api::AppState;
use crate::block_source::BlockSource;

pub fn create_router(state: AppState) -> Router {
    let stream_deps = StreamDeps {
        block_source: state.block_source.clone(),
        session_table: state.session_table.clone(),
        block_size: state.block_size,
    };

    let stream_routes = Router::new()
        .route(
            "/stream/{message_id}/{token}",
            get(stream_handler).options(probe_stub).put(probe_stub),
        )
        .with_state(stream_deps);

    let health_routes = Router::new()
        .route("/healthcheck", get(healthcheck))
        .with_state(state.block_source.clone());

    let mut router = Router::new().merge(stream_routes).merge(health_routes);

    router = router.merge(
        Router::new()
            .route(
                "/upnp/notify/{local_token}",
                on(MethodFilter::try_from(Method::from_bytes(b"NOTIFY").unwrap()).unwrap(), upnp_notify),
            )
            .with_state(state.upnp_notify_registry.clone()),
    );

    if let Some(web_registry) = state.web_registry.clone() {
        router = router.merge(
            Router::new()
                .route("/web/api/register/{password}", get(crate::device::web::register_device))
                .route("/web/api/poll/{remote_token}", get(crate::device::web::poll_device))
                .with_state(web_registry),
        );
    }

    router.layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive())
}

async fn healthcheck(State(block_source): State<crate::block_source::SharedBlockSource>) -> Response {
    match block_source.health_check().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "gone").into_response(),
    }
}

/// `NOTIFY /upnp/notify/{local_token}` — GENA event delivery from a
/// subscribed AVTransport renderer.
async fn upnp_notify(
    State(registry): State<std::sync::Arc<crate::device::upnp::UpnpNotifyRegistry>>,
    Path(local_token): Path<String>,
    body: String,
) -> Response {
    match registry.handle_notify(&local_token, &body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

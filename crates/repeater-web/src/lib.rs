//! # repeater-web
//!
//! Configuration web page for the repeater.
//!
//! This crate provides:
//! - `GET /`: the configuration page, or the unlock form while locked
//! - Query parameters on that request as configuration changes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repeater_web::serve;
//!
//! let engine = event_loop.handle();
//! serve("0.0.0.0:80".parse()?, engine).await?;
//! ```

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{debug, info};

use repeater_protocol::WebRequest;
use repeater_server::{EngineHandle, WebOutcome};

/// Create the router. Handlers need `ConnectInfo<SocketAddr>`.
pub fn create_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/", get(config_handler))
        .with_state(engine)
}

/// Serve the page on `addr` until the listener fails.
pub async fn serve(
    addr: SocketAddr,
    engine: EngineHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Web config listening on {}", addr);
    axum::serve(
        listener,
        create_router(engine).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Handler for `GET /`.
///
/// Query parameters run as web-origin commands before the page is built,
/// so the page already shows their effect.
async fn config_handler(
    State(engine): State<EngineHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let request = WebRequest::from_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if !request.is_empty() {
        debug!("Web request from {peer} with {} command(s)", request.commands.len());
    }

    match engine.web(peer.ip(), request).await {
        Some(WebOutcome::Page(page)) => (
            [(header::CACHE_CONTROL, "no-store")],
            Html(page),
        )
            .into_response(),
        Some(WebOutcome::Denied) => StatusCode::FORBIDDEN.into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use repeater_core::config::LOCAL_ACCESS;
    use repeater_core::sim::SimPlatform;
    use repeater_core::store::REQUIRED_SECTORS;
    use repeater_core::{Capabilities, MemoryFlash, Repeater};
    use repeater_server::EventLoop;
    use tower::ServiceExt;

    fn start_engine(config_access: u8) -> EngineHandle {
        let mut repeater = Repeater::boot(
            SimPlatform::new(),
            MemoryFlash::new(REQUIRED_SECTORS),
            Capabilities::all(),
        );
        repeater.state.config.config_access = config_access;
        let event_loop = EventLoop::new(repeater);
        let handle = event_loop.handle();
        tokio::spawn(event_loop.run());
        handle
    }

    fn app(engine: EngineHandle, peer: [u8; 4]) -> Router {
        create_router(engine).layer(MockConnectInfo(SocketAddr::from((peer, 40000))))
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_page_shows_current_settings() {
        let engine = start_engine(LOCAL_ACCESS);
        let (status, body) = fetch(app(engine, [192, 168, 4, 2]), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("name='ap_ssid' value='Den Trai Tim'"));
        assert!(body.contains("name='network' value='192.168.4.0'"));
    }

    #[tokio::test]
    async fn test_query_changes_settings() {
        let engine = start_engine(LOCAL_ACCESS);
        let (status, body) = fetch(
            app(engine.clone(), [192, 168, 4, 2]),
            "/?ap_ssid=Attic%2520AP&ap_open=wpa2",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("name='ap_ssid' value='Attic AP'"));
        assert!(body.contains("<option value='wpa2' selected>"));
    }

    #[tokio::test]
    async fn test_remote_peer_is_forbidden() {
        let engine = start_engine(LOCAL_ACCESS);
        let (status, _) = fetch(app(engine, [10, 0, 0, 7]), "/?ssid=evil").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_locked_device_serves_unlock_form() {
        let engine = start_engine(LOCAL_ACCESS);
        let (_, body) = fetch(app(engine.clone(), [192, 168, 4, 2]), "/?lock=l").await;
        assert!(body.contains("name='unlock_password'"));

        let (_, body) = fetch(app(engine.clone(), [192, 168, 4, 2]), "/?ssid=other").await;
        assert!(!body.contains("name='ssid'"));

        let (_, body) = fetch(
            app(engine, [192, 168, 4, 2]),
            "/?unlock_password=password",
        )
        .await;
        assert!(body.contains("name='ssid' value='ssid'"));
    }
}

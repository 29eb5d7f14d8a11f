//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing) and echo the request ID on
//!   every non-101 response
//! - Hold the hot-reloadable [`ProxyState`] behind an `ArcSwap`
//! - Dispatch each request to preflight, upgrade or forward handling
//! - Serve over plain TCP or TLS with graceful shutdown
//!
//! # Data Flow
//! ```text
//! Request ──▶ SetRequestId ──▶ Trace ──▶ proxy_handler
//!                                          │
//!             ┌───────────────┬────────────┴─────────────┐
//!             ▼               ▼                          ▼
//!         Preflight     UpstreamPlan ─ None ─▶ usage   Error
//!             │           │       │                      │
//!             │        upgrade  forward                  │
//!             ▼           ▼       ▼                      ▼
//!          HeaderPolicy::finalize (CORS, strip) ◀─────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::request_id::SetRequestIdLayer;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{request_id, RequestKind, UpstreamPlan, UuidRequestId, X_REQUEST_ID};
use crate::http::{forward, response, websocket};
use crate::observability::metrics;
use crate::routing::SandboxHostMatcher;
use crate::security::HeaderPolicy;

/// How long TLS connections get to drain after shutdown is triggered.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a request needs that is derived from configuration.
///
/// Rebuilt on every reload and swapped in atomically; in-flight requests
/// keep the snapshot they started with.
#[derive(Debug)]
pub struct ProxyState {
    pub config: ProxyConfig,
    pub matcher: SandboxHostMatcher,
    pub headers: HeaderPolicy,
}

impl ProxyState {
    pub fn from_config(config: ProxyConfig) -> Self {
        let matcher = SandboxHostMatcher::new(&config.upstream.sandbox_host_marker);
        let headers = HeaderPolicy::from_config(&config.cors, &config.security);
        Self {
            config,
            matcher,
            headers,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<ArcSwap<ProxyState>>,
    /// Client for plain requests; follows redirects.
    pub http_client: reqwest::Client,
    /// HTTP/1.1-only client for upgrade handshakes; never follows redirects.
    pub upgrade_client: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP server for the sandbox VNC proxy.
pub struct HttpServer {
    router: Router,
    shared: Arc<ArcSwap<ProxyState>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Client settings (connect timeout, redirect limit) are fixed here and
    /// are not affected by later reloads.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);

        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.upstream.max_redirects))
            .build()?;

        let upgrade_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .http1_only()
            .build()?;

        let shared = Arc::new(ArcSwap::from_pointee(ProxyState::from_config(config)));
        let state = AppState {
            shared: shared.clone(),
            http_client,
            upgrade_client,
        };

        Ok(Self {
            router: Self::build_router(state),
            shared,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// The configured router, for serving it elsewhere or driving it in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Replace the active configuration.
    pub fn apply_config(&self, config: ProxyConfig) {
        apply_config(&self.shared, config);
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(watch_config(self.shared.clone(), config_updates, shutdown.resubscribe()));

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS termination on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        tokio::spawn(watch_config(self.shared.clone(), config_updates, shutdown.resubscribe()));

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received, draining connections");
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Per-request span. Records the path only; the query may carry the token.
fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

fn apply_config(shared: &ArcSwap<ProxyState>, config: ProxyConfig) {
    tracing::info!(
        marker = %config.upstream.sandbox_host_marker,
        scheme = %config.upstream.scheme,
        rewrite_enabled = config.rewrite.enabled,
        "Applying new configuration"
    );
    shared.store(Arc::new(ProxyState::from_config(config)));
}

async fn watch_config(
    shared: Arc<ArcSwap<ProxyState>>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => apply_config(&shared, config),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Main proxy handler.
async fn proxy_handler(State(app): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let state = app.shared.load_full();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let kind = RequestKind::classify(&method, request.headers());

    let mut response = match dispatch(&app, &state, kind, request, &request_id).await {
        Ok(response) => response,
        Err(err) => {
            match &err {
                ProxyError::InvalidTarget(_) => {
                    tracing::warn!(
                        request_id = %request_id,
                        error = %err,
                        "Rejected request target"
                    )
                }
                ProxyError::HandshakeRejected { status, .. } => {
                    tracing::warn!(
                        request_id = %request_id,
                        status = %status,
                        "Upstream rejected WebSocket upgrade"
                    )
                }
                _ => tracing::error!(
                    request_id = %request_id,
                    kind = kind.as_str(),
                    error = %err,
                    "Proxy request failed"
                ),
            }
            err.into_response()
        }
    };

    state.headers.finalize(&mut response);
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
    }
    metrics::record_request(method.as_str(), response.status().as_u16(), kind.as_str(), start);
    response
}

async fn dispatch(
    app: &AppState,
    state: &ProxyState,
    kind: RequestKind,
    request: Request<Body>,
    request_id: &str,
) -> Result<Response, ProxyError> {
    if kind == RequestKind::Preflight {
        return Ok(state.headers.preflight());
    }

    let (parts, body) = request.into_parts();
    let Some(plan) = UpstreamPlan::from_parts(&parts, state)? else {
        return Ok(response::usage());
    };

    tracing::info!(
        request_id = %request_id,
        method = %parts.method,
        kind = kind.as_str(),
        host = %plan.target.host,
        path = %plan.target.path,
        from_referer = plan.target.from_referer,
        token = ?plan.token,
        token_source = plan.token_source.map(|s| s.as_str()),
        "Proxying request"
    );

    let request = Request::from_parts(parts, body);
    match kind {
        RequestKind::Upgrade => {
            let request_id = request_id.to_string();
            websocket::forward_upgrade(&app.upgrade_client, state, &plan, request, request_id).await
        }
        _ => forward::forward_http(&app.http_client, state, &plan, request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        HttpServer::new(ProxyConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn root_serves_usage_with_cors() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn options_is_answered_locally() {
        let response = server()
            .router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/6080-abc.proxy.daytona.works/vnc.html")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-methods"],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
    }

    #[tokio::test]
    async fn invalid_host_is_400() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/user@evil.example/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn reload_swaps_header_policy() {
        let server = server();
        let mut config = ProxyConfig::default();
        config.cors.allow_origin = "https://dashboard.example".into();
        config.cors.preflight_status = 200;
        server.apply_config(config);

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "https://dashboard.example");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_span_omits_query() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let response = server()
            .router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/6080-abc.proxy.daytona.works/vnc.html?token=SUPERSECRETTOKEN")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("path=/6080-abc.proxy.daytona.works/vnc.html"), "{output}");
        assert!(!output.contains("SUPERSECRETTOKEN"), "{output}");
    }
}

//! Reference RPC/HTTP server built from a [`ServerOption`] list.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{oneshot, watch, Semaphore};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::lifecycle::Shutdown;
use crate::modules::TlsMaterial;
use crate::server::options::{Endpoint, ResourceLimits, ServerConfig, ServerOption};
use crate::server::rate_limit::{rate_limit_middleware, RateLimiter, RateScope};
use crate::server::{gateway, Server, ServerError};

/// Longest time a graceful stop waits for in-flight requests.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub struct RpcServer {
    config: ServerConfig,
    router: Router,
    drain_timeout: Duration,
    started: AtomicBool,
    graceful: Shutdown,
    force: Shutdown,
    stopped: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RpcServer {
    pub fn new(options: Vec<ServerOption>) -> Result<Self, ServerError> {
        let config = ServerConfig::from_options(options)?;
        let router = build_router(&config)?;
        let (stopped, _) = watch::channel(false);
        Ok(Self {
            config,
            router,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            started: AtomicBool::new(false),
            graceful: Shutdown::new(),
            force: Shutdown::new(),
            stopped,
            local_addr: Mutex::new(None),
        })
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bound TCP address, once the server is listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_addr(&self, addr: SocketAddr) {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }

    async fn serve_tcp(&self, addr: SocketAddr, ready: oneshot::Sender<()>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                address: addr.to_string(),
                source,
            })?;
        let local = listener.local_addr()?;
        self.record_addr(local);
        tracing::info!(address = %local, "RPC server listening");
        let _ = ready.send(());

        let mut graceful = self.graceful.subscribe();
        let mut force = self.force.subscribe();
        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.recv().await })
            .into_future();

        tokio::select! {
            result = serve => result.map_err(ServerError::Io),
            _ = force.recv() => {
                tracing::warn!(address = %local, "RPC server forced to stop");
                Ok(())
            }
        }
    }

    async fn serve_unix(&self, path: &Path, ready: oneshot::Sender<()>) -> Result<(), ServerError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
            address: path.display().to_string(),
            source,
        })?;
        tracing::info!(socket = %path.display(), "RPC server listening");
        let _ = ready.send(());

        let mut graceful = self.graceful.subscribe();
        let mut force = self.force.subscribe();
        let serve = axum::serve(listener, self.router.clone().into_make_service())
            .with_graceful_shutdown(async move { graceful.recv().await })
            .into_future();

        let result = tokio::select! {
            result = serve => result.map_err(ServerError::Io),
            _ = force.recv() => {
                tracing::warn!(socket = %path.display(), "RPC server forced to stop");
                Ok(())
            }
        };
        let _ = std::fs::remove_file(path);
        result
    }

    async fn serve_tls(
        &self,
        addr: SocketAddr,
        material: &TlsMaterial,
        ready: oneshot::Sender<()>,
    ) -> Result<(), ServerError> {
        if !material.custom_cas.is_empty() || !material.auth_cas.is_empty() {
            tracing::warn!("custom and client authentication CAs are not enforced by the RPC server");
        }
        let tls = RustlsConfig::from_pem(material.certificate.clone(), material.private_key.clone())
            .await
            .map_err(ServerError::Tls)?;
        let handle = axum_server::Handle::new();
        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum_server::bind_rustls(addr, tls)
            .handle(handle.clone())
            .serve(app);
        tokio::pin!(serve);

        let listening = tokio::select! {
            bound = handle.listening() => Ok(bound),
            result = &mut serve => Err(result),
        };
        let local = match listening {
            Ok(Some(local)) => local,
            Ok(None) => return Err(bind_failure(addr, serve.await)),
            Err(result) => return Err(bind_failure(addr, result)),
        };
        self.record_addr(local);
        tracing::info!(address = %local, tls = true, "RPC server listening");
        let _ = ready.send(());

        let mut graceful = self.graceful.subscribe();
        let mut force = self.force.subscribe();
        tokio::select! {
            result = &mut serve => return result.map_err(ServerError::Io),
            _ = graceful.recv() => handle.graceful_shutdown(Some(self.drain_timeout)),
        }
        tokio::select! {
            result = &mut serve => return result.map_err(ServerError::Io),
            _ = force.recv() => handle.shutdown(),
        }
        serve.await.map_err(ServerError::Io)
    }
}

/// Error for a TLS listener that finished before it was bound.
fn bind_failure(addr: SocketAddr, result: std::io::Result<()>) -> ServerError {
    match result {
        Err(source) => ServerError::Bind {
            address: addr.to_string(),
            source,
        },
        Ok(()) => ServerError::Config("TLS listener closed before binding".to_string()),
    }
}

impl Server for RpcServer {
    async fn start(&self, ready: oneshot::Sender<()>) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        let result = match (&self.config.endpoint, &self.config.tls) {
            (Endpoint::Tcp { ip, port }, None) => {
                self.serve_tcp(SocketAddr::new(*ip, *port), ready).await
            }
            (Endpoint::Tcp { ip, port }, Some(material)) => {
                self.serve_tls(SocketAddr::new(*ip, *port), material, ready)
                    .await
            }
            (Endpoint::Unix(path), _) => self.serve_unix(path, ready).await,
        };
        self.stopped.send_replace(true);
        tracing::info!("RPC server stopped");
        result
    }

    async fn stop(&self, graceful: bool) -> Result<(), ServerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut stopped = self.stopped.subscribe();
        if !graceful {
            self.force.trigger();
            let _ = stopped.wait_for(|s| *s).await;
            return Ok(());
        }

        self.graceful.trigger();
        let drained = tokio::time::timeout(self.drain_timeout, stopped.wait_for(|s| *s))
            .await
            .is_ok();
        if drained {
            return Ok(());
        }
        tracing::warn!(timeout = ?self.drain_timeout, "drain timeout reached, forcing stop");
        self.force.trigger();
        let _ = stopped.wait_for(|s| *s).await;
        Err(ServerError::DrainTimeout(self.drain_timeout))
    }
}

fn build_router(config: &ServerConfig) -> Result<Router, ServerError> {
    let mut router = Router::new();
    for service in &config.services {
        tracing::debug!(service = %service.name, "mounting service");
        router = router.merge(service.router.clone());
    }

    if config.reflection {
        let listing = serde_json::json!({
            "services": config
                .services
                .iter()
                .map(|s| serde_json::json!({ "name": s.name, "methods": s.methods }))
                .collect::<Vec<_>>(),
        });
        router = router.route("/reflection", get(move || async move { Json(listing) }));
    }

    if let Some(gateway) = &config.gateway {
        router = gateway::apply(router, gateway)?;
    }

    let limits = config.limits.unwrap_or_default();
    if config.input_validation {
        router = router.layer(middleware::from_fn_with_state(
            limits.max_body_bytes,
            validate_input,
        ));
    }
    if let Some(limits) = config.limits {
        router = apply_limits(router, limits);
    }

    router = router
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    if config.panic_recovery {
        router = router.layer(CatchPanicLayer::new());
    }
    Ok(router)
}

fn apply_limits(router: Router, limits: ResourceLimits) -> Router {
    let mut router = router.layer(DefaultBodyLimit::max(limits.max_body_bytes));
    if limits.rate > 0 {
        let limiter = Arc::new(RateLimiter::new(RateScope::Global, limits.rate, limits.rate));
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }
    if limits.max_concurrent > 0 {
        let permits = Arc::new(Semaphore::new(limits.max_concurrent as usize));
        router = router.layer(middleware::from_fn_with_state(permits, limit_concurrency));
    }
    router
}

/// Queue requests beyond the concurrency limit until a slot frees up.
async fn limit_concurrency(State(permits): State<Arc<Semaphore>>, request: Request<Body>, next: Next) -> Response {
    let Ok(_permit) = permits.acquire_owned().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    next.run(request).await
}

/// Reject request bodies that are not well-formed JSON.
async fn validate_input(State(limit): State<usize>, request: Request<Body>, next: Next) -> Response {
    if !matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        return next.run(request).await;
    }
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected an application/json body").into_response();
    }

    let (parts, body) = request.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, limit).await else {
        return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
    };
    if serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
        return (StatusCode::BAD_REQUEST, "malformed JSON body").into_response();
    }
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{EchoHandler, ServiceHandler};
    use tower::ServiceExt;

    fn options(extra: Vec<ServerOption>) -> Vec<ServerOption> {
        let mut options = vec![
            ServerOption::PanicRecovery,
            ServerOption::Port(0),
            ServerOption::ServiceProvider(EchoHandler::new().service()),
        ];
        options.extend(extra);
        options
    }

    #[tokio::test]
    async fn reflection_lists_services() {
        let server = RpcServer::new(options(vec![ServerOption::Reflection])).unwrap();
        let response = server
            .router
            .clone()
            .oneshot(axum::http::Request::get("/reflection").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let listing: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(listing["services"][0]["name"], "echo.v1");
    }

    #[tokio::test]
    async fn input_validation_rejects_non_json() {
        let server = RpcServer::new(options(vec![ServerOption::InputValidation])).unwrap();
        let response = server
            .router
            .clone()
            .oneshot(
                axum::http::Request::post("/v1/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = server
            .router
            .clone()
            .oneshot(
                axum::http::Request::post("/v1/echo")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let server = RpcServer::new(options(Vec::new())).unwrap();
        let response = server
            .router
            .clone()
            .oneshot(axum::http::Request::get("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn start_signals_ready_and_stop_drains() {
        let server = Arc::new(RpcServer::new(options(Vec::new())).unwrap());
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = server.clone();
        let task = tokio::spawn(async move { running.start(ready_tx).await });

        ready_rx.await.unwrap();
        assert!(server.local_addr().is_some());

        server.stop(true).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let server = Arc::new(RpcServer::new(options(Vec::new())).unwrap());
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = server.clone();
        let task = tokio::spawn(async move { running.start(ready_tx).await });
        ready_rx.await.unwrap();

        let (again, _) = oneshot::channel();
        assert!(matches!(server.start(again).await, Err(ServerError::AlreadyStarted)));

        server.stop(false).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn graceful_stop_is_bounded_by_the_drain_timeout() {
        let slow = crate::handler::ServiceDescriptor {
            name: "slow.v1".to_string(),
            methods: vec!["GET /slow".to_string()],
            router: Router::new().route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    "done"
                }),
            ),
        };
        let server = Arc::new(
            RpcServer::new(vec![ServerOption::Port(0), ServerOption::ServiceProvider(slow)])
                .unwrap()
                .with_drain_timeout(Duration::from_millis(200)),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = server.clone();
        let task = tokio::spawn(async move { running.start(ready_tx).await });
        ready_rx.await.unwrap();

        let url = format!("http://{}/slow", server.local_addr().unwrap());
        let in_flight = tokio::spawn(async move { reqwest::get(url).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = server.stop(true).await.unwrap_err();
        assert!(matches!(err, ServerError::DrainTimeout(d) if d == Duration::from_millis(200)));
        task.await.unwrap().unwrap();
        in_flight.abort();
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let server = RpcServer::new(options(Vec::new())).unwrap();
        server.stop(true).await.unwrap();
    }
}

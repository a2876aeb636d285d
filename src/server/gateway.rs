//! HTTP gateway middleware chain.
//!
//! Each [`Middleware`] maps onto a tower-http layer or a local middleware
//! function. Layers are applied in reverse so the first chain entry ends up
//! outermost.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer, ExposeHeaders};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::CompressionLevel;

use crate::build_info::{VersionInfo, APP_VERSION_HEADER, BUILD_CODE_HEADER};
use crate::observability::metrics;
use crate::server::options::{CorsOptions, GatewayConfig, Middleware, OtelOptions};
use crate::server::rate_limit::{rate_limit_middleware, ClientAddr, RateLimiter, RateScope};
use crate::server::ServerError;

/// Name of the gateway that served a request, stored as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayName(pub String);

/// Request headers selected by the metadata middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata(pub BTreeMap<String, String>);

/// Wrap `router` with the gateway configuration.
pub fn apply(router: Router, gateway: &GatewayConfig) -> Result<Router, ServerError> {
    let mut router = router;
    // innermost, so it sees the body before compression
    if let Some(media_type) = gateway.pretty_json.clone() {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(media_type),
            pretty_json,
        ));
    }
    for entry in gateway.middleware.iter().rev() {
        router = apply_middleware(router, entry)?;
    }
    let name = GatewayName(gateway.handler_name.clone());
    Ok(router.layer(middleware::from_fn_with_state(name, tag_gateway)))
}

fn apply_middleware(router: Router, entry: &Middleware) -> Result<Router, ServerError> {
    let router = match entry {
        Middleware::ProxyHeaders => router.layer(middleware::from_fn(proxy_headers)),
        Middleware::Gzip(level) => {
            let level = i32::try_from(*level)
                .map_err(|_| ServerError::Config(format!("invalid gzip level {level}")))?;
            router.layer(CompressionLayer::new().quality(CompressionLevel::Precise(level)))
        }
        Middleware::Headers(headers) => {
            let mut router = router;
            for (name, value) in headers {
                let (name, value) = header_pair(name, value)?;
                router = router.layer(SetResponseHeaderLayer::overriding(name, value));
            }
            router
        }
        Middleware::Metadata(options) => {
            let names = options
                .headers
                .iter()
                .map(|h| {
                    HeaderName::from_bytes(h.as_bytes())
                        .map_err(|_| ServerError::Config(format!("invalid metadata header '{h}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            router.layer(middleware::from_fn_with_state(Arc::new(names), metadata))
        }
        Middleware::Cors(options) => router.layer(cors_layer(options)?),
        Middleware::Otel(options) => {
            let trace_header = if options.trace_header.is_empty() {
                None
            } else {
                Some(HeaderName::from_bytes(options.trace_header.as_bytes()).map_err(|_| {
                    ServerError::Config(format!("invalid trace header '{}'", options.trace_header))
                })?)
            };
            let state = Arc::new(OtelState {
                options: options.clone(),
                trace_header,
            });
            router.layer(middleware::from_fn_with_state(state, observe))
        }
        Middleware::Hsts(options) => {
            let value = HeaderValue::from_str(&options.header_value())
                .map_err(|_| ServerError::Config("invalid HSTS settings".to_string()))?;
            router.layer(SetResponseHeaderLayer::if_not_present(
                header::STRICT_TRANSPORT_SECURITY,
                value,
            ))
        }
        Middleware::RateLimit { limit, burst } => {
            let limiter = Arc::new(RateLimiter::new(RateScope::PerClient, *limit, *burst));
            router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        }
        Middleware::PanicRecovery => router.layer(CatchPanicLayer::new()),
        Middleware::BuildInfo(info) => build_info_layers(router, info)?,
    };
    Ok(router)
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ServerError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ServerError::Config(format!("invalid header name '{name}'")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| ServerError::Config(format!("invalid value for header '{name}'")))?;
    Ok((header_name, header_value))
}

fn build_info_layers(router: Router, info: &VersionInfo) -> Result<Router, ServerError> {
    let (code_name, code) = header_pair(BUILD_CODE_HEADER, &info.build_code)?;
    let (version_name, version) = header_pair(APP_VERSION_HEADER, &info.version)?;
    Ok(router
        .layer(SetResponseHeaderLayer::overriding(code_name, code))
        .layer(SetResponseHeaderLayer::overriding(version_name, version)))
}

fn cors_layer(options: &CorsOptions) -> Result<CorsLayer, ServerError> {
    let wildcard = |values: &[String]| values.iter().any(|v| v == "*");
    let invalid = |what: &str, value: &str| ServerError::Config(format!("invalid CORS {what} '{value}'"));

    let mut layer = CorsLayer::new().allow_credentials(options.allow_credentials);

    // Credentialed requests can't use a literal wildcard, so mirror the request instead.
    layer = if wildcard(&options.allowed_origins) {
        if options.allow_credentials {
            layer.allow_origin(AllowOrigin::mirror_request())
        } else {
            layer.allow_origin(AllowOrigin::any())
        }
    } else {
        let origins = options
            .allowed_origins
            .iter()
            .map(|o| HeaderValue::from_str(o).map_err(|_| invalid("origin", o)))
            .collect::<Result<Vec<_>, _>>()?;
        layer.allow_origin(AllowOrigin::list(origins))
    };

    let methods = if options.allowed_methods.is_empty() {
        vec![Method::GET, Method::POST, Method::HEAD]
    } else {
        options
            .allowed_methods
            .iter()
            .map(|m| Method::from_bytes(m.to_uppercase().as_bytes()).map_err(|_| invalid("method", m)))
            .collect::<Result<Vec<_>, _>>()?
    };
    layer = layer.allow_methods(methods);

    if wildcard(&options.allowed_headers) {
        layer = if options.allow_credentials {
            layer.allow_headers(AllowHeaders::mirror_request())
        } else {
            layer.allow_headers(AllowHeaders::any())
        };
    } else if !options.allowed_headers.is_empty() {
        let headers = options
            .allowed_headers
            .iter()
            .map(|h| HeaderName::from_bytes(h.as_bytes()).map_err(|_| invalid("header", h)))
            .collect::<Result<Vec<_>, _>>()?;
        layer = layer.allow_headers(AllowHeaders::list(headers));
    }

    let exposed: Vec<HeaderName> = options
        .exposed_headers
        .iter()
        .filter(|h| h.as_str() != "*")
        .map(|h| HeaderName::from_bytes(h.as_bytes()).map_err(|_| invalid("header", h)))
        .collect::<Result<_, _>>()?;
    if !exposed.is_empty() {
        layer = layer.expose_headers(ExposeHeaders::list(exposed));
    }

    if options.max_age > 0 {
        layer = layer.max_age(Duration::from_secs(options.max_age));
    }
    Ok(layer)
}

async fn tag_gateway(State(name): State<GatewayName>, mut request: Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(name);
    next.run(request).await
}

/// Resolve the client address from proxy headers.
async fn proxy_headers(mut request: Request<Body>, next: Next) -> Response {
    if let Some(ip) = forwarded_ip(request.headers()) {
        request.extensions_mut().insert(ClientAddr(ip));
    }
    next.run(request).await
}

fn forwarded_ip(headers: &axum::http::HeaderMap) -> Option<IpAddr> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(value) = text("x-forwarded-for") {
        if let Some(ip) = value.split(',').next().and_then(|s| s.trim().parse().ok()) {
            return Some(ip);
        }
    }
    if let Some(ip) = text("x-real-ip").and_then(|s| s.trim().parse().ok()) {
        return Some(ip);
    }
    // Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"
    text("forwarded").and_then(|value| {
        value
            .split([';', ','])
            .filter_map(|part| part.trim().strip_prefix("for="))
            .map(|v| v.trim_matches('"'))
            .find_map(|v| {
                let host = v
                    .strip_prefix('[')
                    .and_then(|rest| rest.split(']').next())
                    .unwrap_or(v);
                host.parse().ok().or_else(|| {
                    host.rsplit_once(':').and_then(|(ip, _)| ip.parse().ok())
                })
            })
    })
}

async fn metadata(
    State(names): State<Arc<Vec<HeaderName>>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let values = names
        .iter()
        .filter_map(|name| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    request.extensions_mut().insert(RequestMetadata(values));
    next.run(request).await
}

struct OtelState {
    options: OtelOptions,
    trace_header: Option<HeaderName>,
}

/// Request metrics and optional network event logging.
async fn observe(State(state): State<Arc<OtelState>>, request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if state.options.omit_paths.iter().any(|p| p == &path) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().to_string();
    let handler = request
        .extensions()
        .get::<GatewayName>()
        .map(|g| g.0.clone())
        .unwrap_or_default();
    let request_id = request.headers().get("x-request-id").cloned();
    if state.options.network_events {
        let size = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("0");
        tracing::debug!(method = %method, path = %path, bytes = size, "request received");
    }

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    metrics::record_request(&handler, &method, status, start);
    if state.options.network_events {
        tracing::debug!(status, elapsed = ?start.elapsed(), "response sent");
    }
    if let (Some(name), Some(id)) = (&state.trace_header, request_id) {
        response.headers_mut().insert(name.clone(), id);
    }
    response
}

/// Re-encode JSON responses with indentation when the client asks for
/// `media_type`.
async fn pretty_json(State(media_type): State<Arc<String>>, request: Request<Body>, next: Next) -> Response {
    let wants_pretty = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(media_type.as_str()));
    let response = next.run(request).await;
    if !wants_pretty {
        return response;
    }

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to buffer response body");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let pretty = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|value| serde_json::to_vec_pretty(&value).ok());
    match pretty {
        Some(pretty) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(pretty))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

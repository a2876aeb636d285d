//! Echo service handler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::handler::{HandlerError, ServiceDescriptor, ServiceHandler};

pub const SERVICE_NAME: &str = "echo.v1";

#[derive(Debug, Default)]
struct EchoState {
    closed: AtomicBool,
    reloads: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EchoRequest {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EchoResponse {
    pub result: String,
}

/// Returns every message it receives.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler {
    state: Arc<EchoState>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reloads(&self) -> u64 {
        self.state.reloads.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

async fn ping() -> Json<StatusResponse> {
    Json(StatusResponse { ok: true })
}

async fn ready(State(state): State<Arc<EchoState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        ok: !state.closed.load(Ordering::SeqCst),
    })
}

async fn echo(Json(request): Json<EchoRequest>) -> Json<EchoResponse> {
    tracing::debug!(len = request.value.len(), "echo request");
    Json(EchoResponse {
        result: format!("you said: {}", request.value),
    })
}

impl ServiceHandler for EchoHandler {
    fn service(&self) -> ServiceDescriptor {
        let router = Router::new()
            .route("/v1/ping", get(ping))
            .route("/v1/ready", get(ready))
            .route("/v1/echo", post(echo))
            .with_state(self.state.clone());
        ServiceDescriptor {
            name: SERVICE_NAME.to_string(),
            methods: vec![
                "GET /v1/ping".to_string(),
                "GET /v1/ready".to_string(),
                "POST /v1/echo".to_string(),
            ],
            router,
        }
    }

    fn reload(&self) -> Result<(), HandlerError> {
        let count = self.state.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(reloads = count, "service handler reloaded");
        Ok(())
    }

    fn close(&self) -> Result<(), HandlerError> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Err(HandlerError::Close("handler already closed".to_string()));
        }
        Ok(())
    }
}

//! The reference server and the full stack, exercised over real sockets.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use echo_service::build_info::{build_details, APP_VERSION_HEADER};
use echo_service::handler::{EchoHandler, ServiceHandler};
use echo_service::lifecycle::{LifecycleState, Orchestrator, StandardAssembly};
use echo_service::server::{
    GatewayOption, Middleware, ResourceLimits, RpcServer, Server, ServerOption,
};

mod common;
use common::{free_port, registry, settings_with, wait_for_state};

async fn spawn_server(options: Vec<ServerOption>) -> (Arc<RpcServer>, tokio::task::JoinHandle<()>) {
    let server = Arc::new(RpcServer::new(options).unwrap());
    let (ready_tx, ready_rx) = oneshot::channel();
    let running = server.clone();
    let task = tokio::spawn(async move {
        running.start(ready_tx).await.unwrap();
    });
    ready_rx.await.unwrap();
    (server, task)
}

#[tokio::test]
async fn serves_the_handler_through_the_gateway() {
    let (server, task) = spawn_server(vec![
        ServerOption::PanicRecovery,
        ServerOption::Port(0),
        ServerOption::HttpGateway(vec![GatewayOption::HandlerName("http-gateway".into())]),
        ServerOption::HttpGatewayOptions(vec![GatewayOption::Middleware(Middleware::BuildInfo(
            build_details(),
        ))]),
        ServerOption::ServiceProvider(EchoHandler::new().service()),
    ])
    .await;
    let base = format!("http://{}", server.local_addr().unwrap());
    let client = reqwest::Client::new();

    let ping = client.get(format!("{base}/v1/ping")).send().await.unwrap();
    assert_eq!(ping.status(), 200);
    assert_eq!(
        ping.headers().get(APP_VERSION_HEADER).unwrap(),
        env!("CARGO_PKG_VERSION")
    );
    assert!(ping.headers().contains_key("x-request-id"));

    let echo: Value = client
        .post(format!("{base}/v1/echo"))
        .json(&json!({ "value": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echo["result"], "you said: hello");

    server.stop(true).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn global_rate_limit_rejects_excess_requests() {
    let limits = ResourceLimits {
        rate: 1,
        ..Default::default()
    };
    let (server, task) = spawn_server(vec![
        ServerOption::Port(0),
        ServerOption::ResourceLimits(limits),
        ServerOption::ServiceProvider(EchoHandler::new().service()),
    ])
    .await;
    let url = format!("http://{}/v1/ping", server.local_addr().unwrap());

    let first = reqwest::get(&url).await.unwrap();
    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 429);

    server.stop(false).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn stopped_server_refuses_connections() {
    let (server, task) = spawn_server(vec![
        ServerOption::Port(0),
        ServerOption::ServiceProvider(EchoHandler::new().service()),
    ])
    .await;
    let url = format!("http://{}/v1/ping", server.local_addr().unwrap());

    server.stop(true).await.unwrap();
    task.await.unwrap();
    let refused = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn full_stack_serves_until_closed() {
    let port = free_port();
    let (_dir, _path, settings) =
        settings_with(&format!("[rpc]\nport = {port}\n\n[rpc.http]\nenabled = true\n"));
    let orchestrator = Orchestrator::new(StandardAssembly, registry(), settings);
    let handle = orchestrator.handle();
    let mut state = orchestrator.subscribe_state();
    let run = tokio::spawn(orchestrator.run());
    wait_for_state(&mut state, LifecycleState::Running).await;

    let ready: Value = reqwest::get(format!("http://127.0.0.1:{port}/v1/ready"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["ok"], true);

    handle.close();
    run.await.unwrap().unwrap();
    assert!(reqwest::get(format!("http://127.0.0.1:{port}/v1/ping"))
        .await
        .is_err());
}

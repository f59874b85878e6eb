//! End-to-end flows through the `Server` surface: lifecycle gating, dispatch,
//! completion, and drain behavior.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::{EchoEngine, Server, ServerConfig};

fn value(json: &str) -> serde_json::Value {
    serde_json::from_str(json).expect("every returned string is well-formed JSON")
}

#[tokio::test]
async fn test_happy_path_matches_contract() {
    let server = Server::new("model=test").unwrap();

    let health = value(&server.json_rpc("GET", "/health", "", "").await);
    assert_eq!(health["status"], "success");
    assert_eq!(health["payload"]["ok"], true);

    let completion = value(&server.get_completion(r#"{"prompt":"warm little fire"}"#).await);
    assert_eq!(completion["status"], "success");
    assert_eq!(completion["payload"]["text"], "warm little fire");

    let invalid = value(&server.get_completion(r#"{"prompt":""}"#).await);
    assert_eq!(invalid["status"], "error");
    assert_eq!(invalid["error_kind"], "invalid_request");

    server.shutdown().await;

    let after = value(&server.get_completion(r#"{"prompt":"hi"}"#).await);
    assert_eq!(after["error_kind"], "not_initialized");
    let after = value(&server.json_rpc("GET", "/health", "", "").await);
    assert_eq!(after["error_kind"], "not_initialized");
}

#[tokio::test]
async fn test_bad_command_rejected() {
    let err = Server::new("model=test frobnicate=9").err().unwrap();
    assert_eq!(err.kind(), "bad_command");
    assert_eq!(err.init_status(), 1);
}

#[tokio::test]
async fn test_drain_terminates_running_jobs() {
    // Slow engine so jobs are still running when shutdown starts; short
    // drain timeout so the test exercises the force-cancel path.
    let config = ServerConfig::parse("model=test drain_timeout_ms=50 max_concurrency=4").unwrap();
    let server = Server::with_engine(
        config,
        Arc::new(EchoEngine::new(Duration::from_millis(40))),
    );

    let mut job_ids = Vec::new();
    for _ in 0..3 {
        let accepted = value(
            &server
                .json_rpc(
                    "POST",
                    "/jobs",
                    "",
                    r#"{"prompt":"a b c d e f g h i j k l m n o p"}"#,
                )
                .await,
        );
        assert_eq!(accepted["payload"]["accepted"], true);
        job_ids.push(accepted["payload"]["job_id"].as_str().unwrap().to_string());
    }
    assert_eq!(server.context().jobs.non_terminal_count().await, 3);

    server.shutdown().await;

    // Drain returned with nothing left in flight and the registry released.
    assert_eq!(server.context().jobs.non_terminal_count().await, 0);
    assert_eq!(server.context().jobs.len().await, 0);

    let after = value(&server.json_rpc("GET", &format!("/jobs/{}", job_ids[0]), "", "").await);
    assert_eq!(after["error_kind"], "not_initialized");
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let server = Server::new("model=test").unwrap();
    server.shutdown().await;
    server.shutdown().await;
    let after = value(&server.json_rpc("GET", "/health", "", "").await);
    assert_eq!(after["error_kind"], "not_initialized");
}

#[tokio::test]
async fn test_graceful_drain_waits_for_fast_jobs() {
    let config = ServerConfig::parse("model=test drain_timeout_ms=5000").unwrap();
    let server = Server::with_engine(config, Arc::new(EchoEngine::new(Duration::from_millis(5))));

    let accepted = value(
        &server
            .json_rpc("POST", "/jobs", "", r#"{"prompt":"one two three"}"#)
            .await,
    );
    assert_eq!(accepted["payload"]["accepted"], true);

    // Jobs finish well inside the drain budget; shutdown should not need to
    // force-cancel anything.
    server.shutdown().await;
    assert_eq!(server.context().jobs.len().await, 0);
}

#[tokio::test]
async fn test_job_registered_at_shutdown_edge_is_swept() {
    let config = ServerConfig::parse("model=test drain_timeout_ms=30").unwrap();
    let server = Arc::new(Server::with_engine(
        config,
        Arc::new(EchoEngine::new(Duration::ZERO)),
    ));
    let ctx = Arc::clone(server.context());

    // A request that passed its lifecycle check while Ready but registers
    // its job only once shutdown is already waiting on the lifecycle lock.
    let guard = ctx.lifecycle.read().await;
    guard.check_ready().unwrap();
    let shutdown = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let _cancel_rx = ctx.jobs.create("edge", false).await;
    drop(guard);

    shutdown.await.unwrap();
    // The straggler was force-cancelled and swept; nothing survives into
    // the Stopped server.
    assert_eq!(server.context().jobs.len().await, 0);
    assert_eq!(server.context().jobs.non_terminal_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_calls_once_ready() {
    let server = Arc::new(Server::new("model=test max_concurrency=8").unwrap());
    let mut handles = Vec::new();
    for i in 0..8 {
        let server = Arc::clone(&server);
        handles.push(tokio::spawn(async move {
            let body = format!(r#"{{"prompt":"request number {}"}}"#, i);
            value(&server.get_completion(&body).await)
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(
            result["payload"]["text"],
            format!("request number {}", i)
        );
    }
}

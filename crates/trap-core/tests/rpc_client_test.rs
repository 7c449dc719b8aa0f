//! HTTP-level gateway client tests: envelope handling, bearer auth,
//! semantic errors, and the backoff circuit.

use std::time::Duration;

use trap_core::config::GatewayConfig;
use trap_core::rpc::{ChatSendRequest, ChatSendStatus, Gateway, OpenclawRpc, RpcError};

fn client(server: &mockito::ServerGuard, token: Option<&str>) -> OpenclawRpc {
    let config = GatewayConfig::new(server.url(), token.map(str::to_owned));
    OpenclawRpc::new(&config, Duration::from_secs(2)).unwrap()
}

fn send_request() -> ChatSendRequest {
    ChatSendRequest {
        session_key: "workloop:dev:aaaaaaaa-0000-0000-0000-000000000001".into(),
        message: "go".into(),
        model: Some("moonshot/kimi-for-coding".into()),
        thinking: None,
        timeout_seconds: Some(1800),
        idempotency_key: "idem-1".into(),
    }
}

#[tokio::test]
async fn chat_send_roundtrip_with_bearer_auth() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/rpc")
        .match_header("authorization", "Bearer sekrit")
        .with_status(200)
        .with_body(
            r#"{"type":"res","id":"00000000-0000-0000-0000-000000000000","ok":true,
               "payload":{"runId":"r-1","status":"started"}}"#,
        )
        .create_async()
        .await;

    let client = client(&server, Some("sekrit"));
    let response = client.chat_send(&send_request()).await.unwrap();
    assert_eq!(response.run_id, "r-1");
    assert_eq!(response.status, ChatSendStatus::Started);
    mock.assert_async().await;
}

#[tokio::test]
async fn semantic_error_surfaces_without_arming_backoff() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/rpc")
        .with_status(200)
        .with_body(
            r#"{"type":"res","id":"00000000-0000-0000-0000-000000000000","ok":false,
               "error":"unknown session"}"#,
        )
        .expect(2)
        .create_async()
        .await;

    let client = client(&server, None);
    let err = client.chat_abort("workloop:dev:x").await.unwrap_err();
    assert!(matches!(err, RpcError::Gateway(ref m) if m == "unknown session"));
    assert!(!client.backoff().is_open());

    // The next call still goes to the network.
    let err = client.chat_abort("workloop:dev:x").await.unwrap_err();
    assert!(matches!(err, RpcError::Gateway(_)));
}

#[tokio::test]
async fn a_500_opens_the_circuit_and_later_calls_stay_local() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/rpc")
        .with_status(500)
        .with_body("boom")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, None);
    let err = client.chat_abort("workloop:dev:x").await.unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
    assert_eq!(client.backoff().consecutive_failures(), 1);

    // The armed window answers every further call locally; the mock's
    // expect(1) proves no second request reached the network. (The
    // widening 5/10/20/40/60 ladder itself is covered by the backoff
    // unit tests, where failures can be recorded without real waits.)
    for _ in 0..3 {
        let err = client.chat_abort("workloop:dev:x").await.unwrap_err();
        assert!(matches!(err, RpcError::Unavailable));
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn success_resets_consecutive_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/rpc")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, None);
    let _ = client.chat_abort("workloop:dev:x").await;
    assert_eq!(client.backoff().consecutive_failures(), 1);
    assert!(client.backoff().is_open());

    // Replace the failing mock with a healthy endpoint.
    server.reset_async().await;
    server
        .mock("POST", "/rpc")
        .with_status(200)
        .with_body(
            r#"{"type":"res","id":"00000000-0000-0000-0000-000000000000","ok":true,
               "payload":null}"#,
        )
        .create_async()
        .await;

    // Let the armed window lapse by resetting, as a recovered gateway
    // would after its window expires.
    client.backoff().record_success();
    client.chat_abort("workloop:dev:x").await.unwrap();
    assert_eq!(client.backoff().consecutive_failures(), 0);
    assert!(!client.backoff().is_open());
}

#[tokio::test]
async fn retry_after_pins_the_window() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/rpc")
        .with_status(503)
        .with_header("Retry-After", "30")
        .expect(1)
        .create_async()
        .await;

    let client = client(&server, None);
    let err = client.chat_abort("workloop:dev:x").await.unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
    // 30 + 1 seconds: far longer than the 5 s first ladder rung.
    assert!(client.backoff().is_open());

    let err = client.chat_abort("workloop:dev:x").await.unwrap_err();
    assert!(matches!(err, RpcError::Unavailable));
}

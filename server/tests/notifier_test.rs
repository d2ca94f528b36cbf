//! Integration tests for hook notification delivery.
//!
//! The notifier must forward well-formed hook payloads and must report,
//! not raise, every failure so the calling tool is never blocked.

use std::time::{Duration, Instant};

use livemark_server::notifier::{notify, Notifier, NotifierError, NotifyOutcome};
use livemark_core::SessionRecord;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test Helpers
// =============================================================================

const WRITE_HOOK: &str = r##"{
    "session_id": "session-42",
    "tool_name": "Write",
    "hook_event_name": "PreToolUse",
    "cwd": "/home/me/project",
    "tool_input": { "file_path": "docs/plan.md", "content": "# plan" }
}"##;

async fn accepting_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    server
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_hook_payload_is_posted_as_session_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .and(body_partial_json(json!({
            "filePath": "/home/me/project/docs/plan.md",
            "actorId": "session-42",
            "toolName": "Write",
            "hookEventName": "PreToolUse"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = Notifier::new(server.uri()).unwrap();
    let outcome = notify(WRITE_HOOK.as_bytes(), &notifier).await;

    assert_eq!(outcome, NotifyOutcome::Sent);
}

#[tokio::test]
async fn test_payload_without_file_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let notifier = Notifier::new(server.uri()).unwrap();
    let bash = br#"{"session_id":"s","tool_name":"Bash","tool_input":{"command":"ls"}}"#;

    assert_eq!(notify(bash, &notifier).await, NotifyOutcome::Ignored);
    assert_eq!(notify(b"not json at all", &notifier).await, NotifyOutcome::Ignored);
}

// =============================================================================
// Failure reporting
// =============================================================================

#[tokio::test]
async fn test_rejection_is_reported_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string(r#"{"error":"outside","code":"outside_boundary"}"#),
        )
        .mount(&server)
        .await;

    let notifier = Notifier::new(server.uri()).unwrap();
    assert_eq!(
        notify(WRITE_HOOK.as_bytes(), &notifier).await,
        NotifyOutcome::Failed
    );

    let record = SessionRecord::new("/etc/passwd".into(), "s");
    match notifier.send(&record).await {
        Err(NotifierError::Rejected { status, message }) => {
            assert_eq!(status, 403);
            assert!(message.contains("outside_boundary"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_server_fails_fast() {
    // Bind and drop a listener to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let notifier = Notifier::new(format!("http://127.0.0.1:{port}")).unwrap();

    let started = Instant::now();
    let outcome = notify(WRITE_HOOK.as_bytes(), &notifier).await;

    assert_eq!(outcome, NotifyOutcome::Failed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_trailing_slash_in_server_url() {
    let server = accepting_server().await;
    let notifier = Notifier::new(format!("{}/", server.uri())).unwrap();

    assert_eq!(
        notify(WRITE_HOOK.as_bytes(), &notifier).await,
        NotifyOutcome::Sent
    );
}

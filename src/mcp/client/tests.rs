use super::*;
use crate::utils::test_utils::{paging_server, wait_for_lines, MockServer};
use serde_json::json;
use std::time::Instant;

fn fast_options() -> SessionOptions {
    SessionOptions {
        request_timeout: Duration::from_secs(5),
        handshake_timeout: Duration::from_secs(10),
        notification_tx: None,
    }
}

async fn connect_mock(mock: &MockServer) -> ProtocolSession {
    ProtocolSession::connect(&mock.config, fast_options())
        .await
        .expect("mock server should connect")
}

#[test]
fn session_state_names() {
    assert_eq!(SessionState::Handshaking.to_string(), "handshaking");
    assert!(SessionState::Failed.is_terminal());
    assert!(!SessionState::Ready.is_terminal());
}

#[cfg(unix)]
#[tokio::test]
async fn handshake_discovers_tools_across_pages() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;

    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_ready());
    let details = session.server_details().expect("server details");
    assert_eq!(details.protocol_version, "2025-11-25");
    assert_eq!(details.server_info.name, "mock");
    assert!(details.capabilities.tools.is_some());

    let names: Vec<String> = session.tools().await.into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["echo".to_string(), "fail".to_string()]);
    assert_eq!(session.pending_requests().await, 0);

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[cfg(unix)]
#[tokio::test]
async fn request_ids_strictly_increase() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        let result = session.send_request("echo", None).await.expect("echo");
        ids.push(result["id"].as_u64().expect("numeric id"));
    }

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
    // initialize and two tools/list pages used 1..=3
    assert!(ids[0] > 3, "{ids:?}");
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;

    let (slow, fast) = tokio::join!(
        session.send_request("slow", None),
        session.send_request("fast", None)
    );

    assert_eq!(slow.expect("slow")["which"], "slow");
    assert_eq!(fast.expect("fast")["which"], "fast");
    assert_eq!(session.pending_requests().await, 0);
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_removes_pending_entry_and_ignores_late_response() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;

    let err = session
        .send_request_with_timeout("slow", None, Duration::from_millis(200))
        .await
        .expect_err("request should time out");
    match err {
        McpError::Timeout { ref method, after } => {
            assert_eq!(method, "slow");
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_protocol_error());
    assert_eq!(session.pending_requests().await, 0);

    // let the late response arrive; it must be dropped without effect
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(session.pending_requests().await, 0);
    assert!(session.is_ready());
    let result = session.send_request("fast", None).await.expect("fast");
    assert_eq!(result["which"], "fast");
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn rpc_errors_surface_code_and_message() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;

    let err = session
        .send_request("fails", None)
        .await
        .expect_err("server returns an error");
    match err {
        McpError::Rpc { code, message, .. } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "nope");
        }
        other => panic!("unexpected error: {other}"),
    }
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn call_tool_classifies_is_error() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;

    let ok = session
        .call_tool("echo", json!({"text": "hi"}))
        .await
        .expect("echo call");
    assert_eq!(ok.as_array().map(Vec::len), Some(1));
    assert_eq!(ok[0]["type"], "text");
    assert_eq!(ok[0]["text"], "ok");

    let err = session
        .call_tool("fail", Value::Null)
        .await
        .expect_err("fail call");
    assert!(matches!(err, McpError::ToolFailed(ref message) if message == "boom"));

    let err = session
        .call_tool("echo", json!(["not", "an", "object"]))
        .await
        .expect_err("array arguments are rejected");
    assert!(matches!(err, McpError::InvalidArguments { ref tool, .. } if tool == "echo"));
    assert_eq!(tool_call_count(&mock), 2);
    session.close().await;
}

fn tool_call_count(mock: &MockServer) -> usize {
    mock.received_method("tools/call").len()
}

async fn wait_for_pending(session: &ProtocolSession, expected: usize) {
    for _ in 0..200 {
        if session.pending_requests().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(unix)]
#[tokio::test]
async fn aborted_request_releases_its_pending_entry() {
    let mock = MockServer::new("mock");
    let session = Arc::new(connect_mock(&mock).await);

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_request("never", None).await })
    };
    wait_for_pending(&session, 1).await;
    assert_eq!(session.pending_requests().await, 1);

    waiting.abort();
    assert!(waiting.await.is_err_and(|err| err.is_cancelled()));
    wait_for_pending(&session, 0).await;
    assert_eq!(session.pending_requests().await, 0);

    let dropped = tokio::time::timeout(
        Duration::from_millis(100),
        session.send_request("never", None),
    )
    .await;
    assert!(dropped.is_err(), "outer timeout drops the request future");
    wait_for_pending(&session, 0).await;
    assert_eq!(session.pending_requests().await, 0);
    assert!(session.is_ready());
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn repeated_cursor_ends_tool_paging() {
    let mock = MockServer::with_script(
        "pager",
        &paging_server(
            r#"{"tools":[{"name":"first","inputSchema":{"type":"object"}}],"nextCursor":"again"}"#,
            r#"{"tools":[{"name":"second","inputSchema":{"type":"object"}}],"nextCursor":"again"}"#,
        ),
    );
    let session = tokio::time::timeout(Duration::from_secs(10), connect_mock(&mock))
        .await
        .expect("paging must terminate");

    let names: Vec<String> = session.tools().await.into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(mock.received_method("tools/list").len(), 2);
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn empty_page_with_cursor_ends_tool_paging() {
    let mock = MockServer::with_script(
        "pager",
        &paging_server(
            r#"{"tools":[],"nextCursor":"x"}"#,
            r#"{"tools":[],"nextCursor":"y"}"#,
        ),
    );
    let session = tokio::time::timeout(Duration::from_secs(10), connect_mock(&mock))
        .await
        .expect("paging must terminate");

    assert!(session.tools().await.is_empty());
    assert_eq!(mock.received_method("tools/list").len(), 1);
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn close_rejects_pending_requests() {
    let mock = MockServer::new("mock");
    let session = Arc::new(connect_mock(&mock).await);

    let waiting = {
        let session = session.clone();
        tokio::spawn(async move { session.send_request("never", None).await })
    };
    for _ in 0..200 {
        if session.pending_requests().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.pending_requests().await, 1);

    let started = Instant::now();
    session.close().await;
    let outcome = waiting.await.expect("task joins");
    assert!(matches!(outcome, Err(McpError::ConnectionClosed { ref server }) if server == "mock"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), SessionState::Closed);

    let err = session
        .send_request("echo", None)
        .await
        .expect_err("closed session rejects requests");
    assert!(matches!(err, McpError::ConnectionClosed { .. }));
    assert!(matches!(
        session.call_tool("echo", json!({})).await,
        Err(McpError::NotReady {
            state: SessionState::Closed,
            ..
        })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn server_exit_after_ready_closes_session() {
    let mock = MockServer::new("mock");
    let session = connect_mock(&mock).await;
    let mut state = session.subscribe_state();

    session.notify("quit", None).await.expect("send quit");
    let closed = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == SessionState::Closed),
    )
    .await
    .is_ok_and(|observed| observed.is_ok());
    assert!(closed, "session should observe EOF");
    assert_eq!(session.pending_requests().await, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn server_requests_are_answered_and_notifications_forwarded() {
    let mock = MockServer::new("mock");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = ProtocolSession::connect(&mock.config, fast_options().with_notifications(tx))
        .await
        .expect("connect");

    let boot = rx.recv().await.expect("log notification");
    assert_eq!(boot.server_id, "mock");
    assert_eq!(boot.method, "notifications/message");

    session
        .send_request("trigger_requests", None)
        .await
        .expect("trigger");

    let replies = wait_for_lines(&mock.replies_path(), 2).await;
    let ping: Value = serde_json::from_str(
        replies
            .iter()
            .find(|line| line.contains("srv-1"))
            .expect("ping reply"),
    )
    .expect("ping reply json");
    assert_eq!(ping["result"], json!({}));
    let unsupported: Value = serde_json::from_str(
        replies
            .iter()
            .find(|line| line.contains("srv-2"))
            .expect("sampling reply"),
    )
    .expect("sampling reply json");
    assert_eq!(unsupported["error"]["code"], -32601);

    let changed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notification in time")
        .expect("notification");
    assert_eq!(changed.method, "notifications/tools/list_changed");
    assert_eq!(session.pending_requests().await, 0);
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn exit_during_handshake_fails_fast() {
    let mock = MockServer::with_script("dies", "#!/bin/sh\nexit 3\n");
    let started = Instant::now();

    let err = ProtocolSession::connect(&mock.config, fast_options())
        .await
        .expect_err("handshake should fail");

    assert!(matches!(err, McpError::Handshake { ref server, .. } if server == "dies"));
    assert!(err.is_connection_error());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[tokio::test]
async fn failed_handshake_never_reports_closed() {
    let mock = MockServer::with_script("dies", "#!/bin/sh\nexit 3\n");
    let options = fast_options();
    let session = ProtocolSession::launch(&mock.config, &options).expect("spawn");
    let mut state = session.subscribe_state();

    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            seen.push(current);
            if current.is_terminal() {
                break;
            }
        }
        seen
    });

    let err = session
        .handshake(&mock.config, &options)
        .await
        .expect_err("handshake should fail");
    assert!(matches!(err, McpError::Handshake { .. }));
    assert_eq!(session.state(), SessionState::Failed);

    let seen = tokio::time::timeout(Duration::from_secs(5), observer)
        .await
        .expect("observer finishes")
        .expect("observer joins");
    assert!(!seen.contains(&SessionState::Closed), "{seen:?}");
    assert_eq!(seen.last(), Some(&SessionState::Failed));

    // closing again keeps the terminal state
    session.close().await;
    assert_eq!(session.state(), SessionState::Failed);
}

#[cfg(unix)]
#[tokio::test]
async fn silent_server_hits_handshake_timeout() {
    let mock = MockServer::with_script("silent", "#!/bin/sh\ncat > /dev/null\n");
    let options = SessionOptions {
        handshake_timeout: Duration::from_millis(300),
        ..fast_options()
    };

    let err = ProtocolSession::connect(&mock.config, options)
        .await
        .expect_err("handshake should time out");
    assert!(matches!(err, McpError::Handshake { .. }));
}

#[tokio::test]
async fn spawn_failure_is_a_connection_error() {
    let config = McpServerConfig::new("ghost", "/nonexistent/kestrel-mcp-server");

    let err = ProtocolSession::connect(&config, fast_options())
        .await
        .expect_err("spawn should fail");

    assert!(matches!(err, McpError::Spawn { ref server, .. } if server == "ghost"));
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn missing_required_env_fails_before_spawning() {
    let mut config = McpServerConfig::new("github", "/nonexistent/kestrel-mcp-server");
    config.required_env_vars = vec!["KESTREL_TEST_SURELY_UNSET_VARIABLE".to_string()];

    let err = ProtocolSession::connect(&config, fast_options())
        .await
        .expect_err("env validation should fail");

    match err {
        McpError::MissingEnv { server, vars } => {
            assert_eq!(server, "github");
            assert_eq!(vars, vec!["KESTREL_TEST_SURELY_UNSET_VARIABLE".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

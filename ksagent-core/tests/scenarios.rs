//! End-to-end command scenarios against the default action table

mod common;

use std::time::Duration;

use common::{Client, cluster, output, router};
use ksagent_core::{CloseReason, SessionConfig, SessionEvent, SessionInput};
use serde_json::{Value, json};

// ==================== One-shot Tests ====================

#[tokio::test]
async fn pod_list_returns_pods() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let response = client.call("pod", "list", json!({"namespace": "default"})).await;
    assert!(response.success);
    let names: Vec<&str> = response
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|pod| pod["metadata"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["web-0", "web-1"]);
}

#[tokio::test]
async fn unsupported_pairs_fail_and_connection_continues() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    for (resource, action) in [("event", "delete"), ("gadget", "list"), ("pod", "explode")] {
        let response = client.call(resource, action, Value::Null).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("unsupported action"));
    }

    assert!(client.call("event", "list", Value::Null).await.success);
}

#[tokio::test]
async fn upstream_errors_are_passed_through() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let response = client
        .call("deployment", "get", json!({"namespace": "default", "name": "api"}))
        .await;
    assert_eq!(
        response.error.as_deref(),
        Some("deployment \"default/api\" not found")
    );
}

// ==================== Exec Tests ====================

#[tokio::test]
async fn exec_open_returns_session_id() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let response = client
        .call("pod", "exec", json!({"container": "app", "cmd": ["sh"]}))
        .await;
    assert!(response.success);
    let session_id = response.data["sessionId"].as_str().unwrap();
    assert!(!session_id.is_empty());
    assert_eq!(router.sessions().session_count().await, 1);
}

#[tokio::test]
async fn stdin_reaches_the_process() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open("pod", "exec", json!({"container": "app", "cmd": ["sh"]}))
        .await;
    let response = client
        .call("pod", "stdin", json!({"sessionId": session_id, "bytes": "ls\n"}))
        .await;
    assert!(response.success);
    assert!(response.error.is_none());

    let (id, seq, event) = client.next_event().await;
    assert_eq!(id, session_id);
    assert_eq!(seq, 0);
    assert_eq!(event, output("ls\n"));
}

#[tokio::test]
async fn stdin_burst_larger_than_process_buffer_is_echoed() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open("pod", "exec", json!({"container": "app", "cmd": ["sh"]}))
        .await;
    for n in 0..40 {
        router
            .sessions()
            .route(
                "conn-1",
                &session_id,
                SessionInput::Stdin(format!("line {}\n", n).into_bytes()),
            )
            .await
            .unwrap();
    }

    for n in 0..40 {
        let (id, seq, event) = client.next_event().await;
        assert_eq!(id, session_id);
        assert_eq!(seq, n);
        assert_eq!(event, output(&format!("line {}\n", n)));
    }
}

#[tokio::test]
async fn stdin_to_unknown_session_is_not_found() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let response = client
        .call("pod", "stdin", json!({"sessionId": "nope", "bytes": "ls\n"}))
        .await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("session not found"));
}

#[tokio::test]
async fn stdin_eof_ends_exec_session() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open("pod", "exec", json!({"name": "web-0", "container": "app", "cmd": ["cat"]}))
        .await;
    client
        .call("pod", "stdin", json!({"sessionId": session_id, "bytes": "bye", "eof": true}))
        .await;

    assert_eq!(client.next_event().await.2, output("bye"));
    let (_, seq, event) = client.next_event().await;
    assert_eq!(seq, 1);
    assert_eq!(
        event,
        SessionEvent::Closed {
            reason: CloseReason::Completed,
            error: None
        }
    );
    assert_eq!(router.sessions().session_count().await, 0);
    assert_eq!(cluster.teardowns(), 1);
}

#[tokio::test]
async fn exited_process_reports_completion() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open("pod", "exec", json!({"container": "app", "cmd": ["echo", "hello"]}))
        .await;

    assert_eq!(client.next_event().await, (session_id.clone(), 0, output("hello\n")));
    let (id, _, event) = client.next_event().await;
    assert_eq!(id, session_id);
    assert!(matches!(
        event,
        SessionEvent::Closed {
            reason: CloseReason::Completed,
            ..
        }
    ));

    // Gone once ended; stdin now fails
    let response = client
        .call("pod", "stdin", json!({"sessionId": session_id, "bytes": "x"}))
        .await;
    assert_eq!(response.error.as_deref(), Some("session not found"));
}

#[tokio::test]
async fn idle_exec_session_times_out() {
    let cluster = cluster();
    let sessions = SessionConfig {
        exec_idle_timeout_ms: 50,
        ..SessionConfig::default()
    };
    let router = router(&cluster, sessions);
    let mut client = Client::connect(&router, "conn-1");

    client
        .open("pod", "exec", json!({"container": "app", "cmd": ["sh"]}))
        .await;

    let (_, seq, event) = client.next_event().await;
    assert_eq!(seq, 0);
    assert_eq!(
        event,
        SessionEvent::Closed {
            reason: CloseReason::IdleTimeout,
            error: None
        }
    );
    assert_eq!(router.sessions().session_count().await, 0);
    assert_eq!(cluster.active_streams(), 0);
}

#[tokio::test]
async fn exec_with_empty_command_is_rejected() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let response = client
        .call("pod", "exec", json!({"container": "app", "cmd": []}))
        .await;
    assert_eq!(
        response.error.as_deref(),
        Some("invalid payload: `cmd` must not be empty")
    );
    assert_eq!(router.sessions().session_count().await, 0);
}

// ==================== Log Tests ====================

#[tokio::test]
async fn closing_log_halts_delivery() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open("pod", "openLog", json!({"namespace": "default", "name": "web-0"}))
        .await;
    assert_eq!(client.next_event().await.2, output("booting\n"));
    assert_eq!(client.next_event().await.2, output("ready\n"));

    let response = client
        .call("pod", "closeLog", json!({"sessionId": session_id}))
        .await;
    assert!(response.success);
    assert_eq!(cluster.teardowns(), 1);

    cluster
        .append_log(Some("default"), "web-0", "app", "after close")
        .await;
    client.expect_silence(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn close_unknown_log_is_not_found() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let response = client
        .call("pod", "closeLog", json!({"sessionId": "xyz"}))
        .await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("session not found"));
}

#[tokio::test]
async fn close_log_rejects_other_session_kinds() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let watch_id = client
        .open("watch", "get", json!({"resource": "deployment"}))
        .await;
    let response = client
        .call("pod", "closeLog", json!({"sessionId": watch_id}))
        .await;
    assert_eq!(response.error.as_deref(), Some("session not found"));
    assert_eq!(router.sessions().session_count().await, 1);

    let response = client
        .call("watch", "delete", json!({"sessionId": watch_id}))
        .await;
    assert!(response.success);
    assert_eq!(router.sessions().session_count().await, 0);
}

#[tokio::test]
async fn log_tail_limits_backlog() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open(
            "pod",
            "openLog",
            json!({"namespace": "default", "name": "web-0", "container": "app", "tailLines": 1}),
        )
        .await;
    assert_eq!(client.next_event().await, (session_id, 0, output("ready\n")));
}

// ==================== Watch Tests ====================

#[tokio::test]
async fn watch_streams_changes() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    let session_id = client
        .open("watch", "get", json!({"resource": "deployment", "namespace": "default"}))
        .await;
    let response = client
        .call(
            "deployment",
            "update_obj",
            json!({"namespace": "default", "name": "web", "object": {"spec": {"replicas": 4}}}),
        )
        .await;
    assert!(response.success);

    let (id, seq, event) = client.next_event().await;
    assert_eq!(id, session_id);
    assert_eq!(seq, 0);
    match event {
        SessionEvent::Event { data } => {
            assert_eq!(data["type"], "MODIFIED");
            assert_eq!(data["object"]["spec"]["replicas"], 4);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn failed_watch_open_is_discarded() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    cluster
        .fail_streams(Some(ksagent_core::ClusterError::Api(
            "watch is forbidden".to_string(),
        )))
        .await;
    let response = client
        .call("watch", "get", json!({"resource": "pod"}))
        .await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("watch is forbidden"));
    assert_eq!(router.sessions().session_count().await, 0);

    cluster.fail_streams(None).await;
    client.open("watch", "get", json!({"resource": "pod"})).await;
    assert_eq!(cluster.watch_subscriptions(), 1);
}

// ==================== Connection Tests ====================

#[tokio::test]
async fn dropping_connection_tears_down_every_session() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut client = Client::connect(&router, "conn-1");

    client
        .open("pod", "exec", json!({"container": "app", "cmd": ["sh"]}))
        .await;
    client
        .open("pod", "openLog", json!({"namespace": "default", "name": "web-1"}))
        .await;
    client
        .open("watch", "get", json!({"resource": "pod"}))
        .await;
    assert_eq!(cluster.active_streams(), 3);

    assert_eq!(router.sessions().drop_connection("conn-1").await, 3);
    assert_eq!(cluster.teardowns(), 3);
    assert_eq!(cluster.active_streams(), 0);
    assert_eq!(router.sessions().session_count().await, 0);

    assert_eq!(router.sessions().drop_connection("conn-1").await, 0);
    assert_eq!(cluster.teardowns(), 3);
}

#[tokio::test]
async fn sessions_are_private_to_their_connection() {
    let cluster = cluster();
    let router = router(&cluster, SessionConfig::default());
    let mut owner = Client::connect(&router, "conn-a");
    let mut other = Client::connect(&router, "conn-b");

    let session_id = owner
        .open("pod", "exec", json!({"container": "app", "cmd": ["sh"]}))
        .await;

    let response = other
        .call("pod", "stdin", json!({"sessionId": session_id, "bytes": "ls\n"}))
        .await;
    assert_eq!(response.error.as_deref(), Some("session not found"));

    assert_eq!(router.sessions().drop_connection("conn-b").await, 0);
    assert_eq!(router.sessions().session_count().await, 1);
}

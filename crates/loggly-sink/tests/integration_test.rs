// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use loggly_sink::{
    DiagnosticSink, EventLevel, LogEntry, LogglySink, SinkConfig, SinkError, SinkState,
};
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, timeout, Duration, Instant};

const BULK_PATH: &str = "/bulk/token-123/tag/LogglyTest/";

#[derive(Debug, Default)]
struct RecordingDiagnostics {
    faults: Mutex<Vec<String>>,
}

impl DiagnosticSink for RecordingDiagnostics {
    fn report_fault(&self, message: &str) {
        self.faults
            .lock()
            .expect("diagnostics lock poisoned")
            .push(message.to_string());
    }
}

impl RecordingDiagnostics {
    fn faults(&self) -> Vec<String> {
        self.faults.lock().expect("diagnostics lock poisoned").clone()
    }
}

fn config(server_url: &str) -> SinkConfig {
    SinkConfig {
        tag: Some("LogglyTest".to_string()),
        buffering_interval: Duration::from_secs(3600),
        ..SinkConfig::new("TestInstance", server_url, "token-123")
    }
}

fn start_sink(config: SinkConfig) -> (LogglySink, Arc<RecordingDiagnostics>) {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let sink = LogglySink::with_diagnostics(config, diagnostics.clone())
        .expect("failed to create sink");
    (sink, diagnostics)
}

fn entry(event_id: i32) -> LogEntry {
    LogEntry::new(event_id, EventLevel::Informational, format!("entry {event_id}"))
        .with_event_name("Request")
        .with_payload(["path", "status"], [json!("/health"), json!(200)])
}

#[tokio::test]
async fn completed_sink_ships_buffered_entries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", BULK_PATH)
        .match_header("content-type", "application/json")
        .match_body(Matcher::Regex(
            r#"^(\{"EventId":\d,"EventName":"Request",.*"InstanceName":"TestInstance",.*"Payload":\{"path":"/health","status":200\}\}\n){3}$"#
                .to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"response":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let (sink, diagnostics) = start_sink(config(&server.url()));
    for event_id in 1..=3 {
        assert!(sink.push(entry(event_id)));
    }
    sink.on_completed().await.expect("completion failed");

    mock.assert_async().await;
    assert!(diagnostics.faults().is_empty());
    assert_eq!(sink.state(), SinkState::Disposed);
}

#[tokio::test]
async fn flattened_payload_is_sent_as_top_level_keys() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", BULK_PATH)
        .match_body(Matcher::Regex(
            r#""Payload_path":"/health","Payload_status":200\}\n$"#.to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"response":"OK"}"#)
        .expect(1)
        .create_async()
        .await;

    let (sink, _) = start_sink(SinkConfig {
        flatten_payload: true,
        ..config(&server.url())
    });
    sink.push(entry(1));
    sink.flush().await.expect("flush failed");

    mock.assert_async().await;
}

#[tokio::test]
async fn rejected_batch_is_discarded_and_reported() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", BULK_PATH)
        .with_status(400)
        .with_body(r#"{"response":"bad format"}"#)
        .expect(1)
        .create_async()
        .await;

    let (sink, diagnostics) = start_sink(config(&server.url()));
    for event_id in 1..=3 {
        sink.push(entry(event_id));
    }

    // The poison batch leaves the buffer, so the flush drains successfully.
    sink.flush().await.expect("flush failed");
    sink.flush().await.expect("second flush failed");

    mock.assert_async().await;
    let faults = diagnostics.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].contains("Discarded message:3"));
    assert!(faults[0].contains("bad format"));
}

#[tokio::test]
async fn server_error_keeps_batch_buffered() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", BULK_PATH)
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let (sink, diagnostics) = start_sink(config(&server.url()));
    for event_id in 1..=3 {
        sink.push(entry(event_id));
    }

    let err = sink.flush().await.expect_err("flush should not drain");
    assert!(err.is_flush_failed());
    failing.assert_async().await;
    assert!(diagnostics.faults().is_empty());

    failing.remove_async().await;
    let recovered = server
        .mock("POST", BULK_PATH)
        .match_body(Matcher::Regex(r#"^(\{"EventId":\d.*\}\n){3}$"#.to_string()))
        .with_status(200)
        .with_body(r#"{"response":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    sink.flush().await.expect("retained entries were not delivered");
    recovered.assert_async().await;
}

#[tokio::test]
async fn unparseable_ok_response_is_reported() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", BULK_PATH)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let (sink, diagnostics) = start_sink(config(&server.url()));
    sink.push(entry(1));

    let err = sink.flush().await.expect_err("flush should fail");
    assert!(matches!(err, SinkError::FlushFailed(_)));
    assert!(err.to_string().contains("maintenance"));

    let faults = diagnostics.faults();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].contains("maintenance"));

    // Completion swallows the failed flush.
    sink.on_completed().await.expect("completion failed");
    assert_eq!(sink.state(), SinkState::Disposed);
}

#[tokio::test]
async fn disposed_sink_sends_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let (sink, diagnostics) = start_sink(SinkConfig {
        buffering_interval: Duration::from_millis(50),
        ..config(&server.url())
    });
    sink.push(entry(1));
    sink.dispose();
    sink.dispose();

    assert!(!sink.push(entry(2)));
    sink.flush().await.expect("flush after dispose failed");
    sink.on_completed().await.expect("completion after dispose failed");
    sleep(Duration::from_millis(200)).await;

    mock.assert_async().await;
    assert!(diagnostics.faults().is_empty());
    assert_eq!(sink.state(), SinkState::Disposed);
}

#[tokio::test]
async fn count_threshold_triggers_publish_before_interval() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", BULK_PATH)
        .match_body(Matcher::Regex(r#"^(\{"EventId":\d.*\}\n){2}$"#.to_string()))
        .with_status(200)
        .with_body(r#"{"response":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let (sink, _) = start_sink(SinkConfig {
        buffering_count: 2,
        ..config(&server.url())
    });
    sink.push(entry(1));
    sink.push(entry(2));

    let delivered = timeout(Duration::from_secs(5), async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "threshold did not trigger a publish");
    sink.dispose();
}

#[tokio::test]
async fn completion_timeout_is_not_an_error() {
    // Accepts connections without ever answering.
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
    let url = format!("http://{}", listener.local_addr().expect("no local addr"));

    let (sink, diagnostics) = start_sink(SinkConfig {
        on_completed_timeout: Some(Duration::from_millis(200)),
        ..config(&url)
    });
    sink.push(entry(1));

    let started = Instant::now();
    sink.on_completed().await.expect("timeout should not be raised");

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(sink.state(), SinkState::Disposed);
    assert!(diagnostics.faults().is_empty());
}

#[tokio::test]
async fn dispose_cancels_in_flight_request() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
    let url = format!("http://{}", listener.local_addr().expect("no local addr"));

    let (sink, diagnostics) = start_sink(config(&url));
    sink.push(entry(1));

    let flush = tokio::spawn(sink.flush());
    sleep(Duration::from_millis(100)).await;
    sink.dispose();

    let result = timeout(Duration::from_secs(5), flush)
        .await
        .expect("in-flight request was not cancelled")
        .expect("flush task panicked");
    assert!(result.is_err());
    assert!(diagnostics.faults().is_empty());
}

#[tokio::test]
async fn failed_stream_still_flushes() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", BULK_PATH)
        .with_status(200)
        .with_body(r#"{"response":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let (sink, _) = start_sink(config(&server.url()));
    sink.push(entry(1));
    sink.push(None);

    let source_error: Value = json!({"error": "listener crashed"});
    sink.on_error(source_error.to_string())
        .await
        .expect("error completion failed");

    mock.assert_async().await;
    assert_eq!(sink.state(), SinkState::Disposed);
}

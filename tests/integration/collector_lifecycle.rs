//! Lifecycle tests for a single collector
//!
//! - Records reach the log once each, in order, as JSON lines
//! - Graceful shutdown drains everything already queued
//! - Shutdown is idempotent and terminal

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use shodan_alert_monitor::actors::state::CollectorState;

use crate::helpers::*;

#[tokio::test]
async fn test_two_alerts_logged_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![Session::records(vec![
        json!({"ip": "1.2.3.4"}),
        json!({"ip": "5.6.7.8"}),
    ])]));
    let mut collector = create_test_collector(source, &path, fast_tuning());

    collector.start().await.unwrap();
    wait_for_lines(&path, 2).await;
    let report = collector.shutdown().await;

    assert!(report.is_clean());

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines, vec![r#"{"ip":"1.2.3.4"}"#, r#"{"ip":"5.6.7.8"}"#]);
}

#[tokio::test]
async fn test_every_record_written_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let expected: Vec<_> = (0..300)
        .map(|n| json!({"seq": n, "port": 22, "data": format!("banner {n}")}))
        .collect();

    // split the records over several subscriptions with failures in between
    let source = Arc::new(ScriptedSource::new(vec![
        Session::records(expected[..100].to_vec()),
        Session::Fail("disconnect".to_string()),
        Session::records(expected[100..250].to_vec()),
        Session::Fail("rate limited".to_string()),
        Session::records(expected[250..].to_vec()),
    ]));
    let mut collector = create_test_collector(source, &path, fast_tuning());

    collector.start().await.unwrap();
    wait_for_lines(&path, expected.len()).await;
    collector.shutdown().await;

    assert_eq!(read_records(&path), expected);
}

#[tokio::test]
async fn test_shutdown_drains_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![]));
    let mut collector = create_test_collector(source, &path, fast_tuning());

    let backlog: Vec<_> = (0..1_000).map(|n| json!({"seq": n})).collect();
    for record in &backlog {
        collector.channel().send(record.clone()).unwrap();
    }

    collector.start().await.unwrap();
    let report = collector.shutdown().await;

    assert_eq!(report.undrained, 0);
    assert!(collector.channel().is_empty());
    assert_eq!(sequence_numbers(&read_records(&path)), (0..1_000).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_shutdown_twice_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![Session::records(vec![json!({"n": 1})])]));
    let mut collector = create_test_collector(source, &path, fast_tuning());

    collector.start().await.unwrap();
    wait_for_lines(&path, 1).await;

    let first = collector.shutdown().await;
    let second = collector.shutdown().await;

    assert!(first.fetcher.is_some());
    assert!(first.writer.is_some());
    assert!(second.fetcher.is_none());
    assert!(second.writer.is_none());
    assert_eq!(collector.state(), CollectorState::Stopped);
    assert_eq!(read_records(&path), vec![json!({"n": 1})]);
}

#[tokio::test]
async fn test_existing_log_is_appended_not_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");
    std::fs::write(&path, "{\"ip\":\"0.0.0.0\"}\n").unwrap();

    let source = Arc::new(ScriptedSource::new(vec![Session::records(vec![
        json!({"ip": "1.2.3.4"}),
    ])]));
    let mut collector = create_test_collector(source, &path, fast_tuning());

    collector.start().await.unwrap();
    wait_for_lines(&path, 2).await;
    collector.shutdown().await;

    assert_eq!(
        read_records(&path),
        vec![json!({"ip": "0.0.0.0"}), json!({"ip": "1.2.3.4"})]
    );
}

#[tokio::test]
async fn test_shutdown_is_prompt_while_idle() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![]));
    let mut collector = create_test_collector(source, &path, fast_tuning());
    collector.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let report = collector.shutdown().await;

    assert!(report.is_clean());
    assert!(started.elapsed() < Duration::from_millis(500));
}

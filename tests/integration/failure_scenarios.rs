//! Failure tests for the collector pipeline
//!
//! - Remote errors never stop the fetcher
//! - An idle writer keeps polling
//! - Workers that ignore cancellation are terminated
//! - Writer I/O errors surface to the controller and get supervised

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use shodan_alert_monitor::actors::state::{CollectorState, StopOutcome};
use shodan_alert_monitor::error::CollectorError;
use shodan_alert_monitor::stream::RemoteError;

use crate::helpers::*;

#[tokio::test]
async fn test_remote_error_mid_stream_keeps_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![
        Session::Items(vec![
            Ok(json!({"ip": "1.2.3.4"})),
            Err(RemoteError::Other("connection reset".to_string())),
        ]),
        Session::records(vec![json!({"ip": "5.6.7.8"})]),
    ]));
    let mut collector = create_test_collector(source.clone(), &path, fast_tuning());

    collector.start().await.unwrap();
    wait_for_lines(&path, 2).await;

    assert!(collector.is_healthy());
    assert!(source.opened() >= 2);

    collector.shutdown().await;
    assert_eq!(
        read_records(&path),
        vec![json!({"ip": "1.2.3.4"}), json!({"ip": "5.6.7.8"})]
    );
}

#[tokio::test]
async fn test_failing_subscriptions_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let mut sessions: Vec<_> = (0..5)
        .map(|n| Session::Fail(format!("HTTP 503 #{n}")))
        .collect();
    sessions.push(Session::records(vec![json!({"finally": true})]));

    let source = Arc::new(ScriptedSource::new(sessions));
    let mut collector = create_test_collector(source.clone(), &path, fast_tuning());

    collector.start().await.unwrap();
    wait_for_lines(&path, 1).await;
    collector.shutdown().await;

    assert!(source.opened() >= 6);
    assert_eq!(read_records(&path), vec![json!({"finally": true})]);
}

#[tokio::test]
async fn test_idle_writer_keeps_polling() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![]));
    let mut collector = create_test_collector(source, &path, fast_tuning());
    collector.start().await.unwrap();

    // pull_timeout is 10ms: this spans many empty pulls
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(collector.is_healthy());

    collector.channel().send(json!({"after": "idle"})).unwrap();
    wait_for_lines(&path, 1).await;

    assert!(collector.shutdown().await.is_clean());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stuck_fetcher_is_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(StuckSource {
        block_for: Duration::from_millis(800),
    });
    let mut collector = create_test_collector(source, &path, fast_tuning());
    collector.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let outcome = collector.stop_stream().await;

    assert_matches!(outcome, Some(StopOutcome::Forced));
    assert!(started.elapsed() < Duration::from_millis(700));

    let report = collector.shutdown().await;
    assert!(report.fetcher.is_none());
    assert_eq!(collector.state(), CollectorState::Stopped);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_writer_io_error_is_supervised() {
    // every write to /dev/full fails with ENOSPC
    let path = std::path::PathBuf::from("/dev/full");

    let source = Arc::new(ScriptedSource::new(vec![]));
    let mut collector = create_test_collector(source, &path, fast_tuning());
    collector.start().await.unwrap();

    collector.channel().send(json!({"lost": true})).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while collector.is_healthy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("writer should fail on a full device");

    collector.supervise().await.unwrap();
    assert!(collector.is_healthy());
    assert_eq!(collector.state(), CollectorState::Running);

    collector.shutdown().await;
}

#[tokio::test]
async fn test_stop_writer_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir, "out.log");

    let source = Arc::new(ScriptedSource::new(vec![]));
    let mut collector = create_test_collector(source, &path, fast_tuning());
    collector.start().await.unwrap();

    let outcome = collector.stop_writer().await;
    assert_matches!(outcome, Some(StopOutcome::Graceful));

    // a second stop has nothing left to stop
    assert!(collector.stop_writer().await.is_none());
    assert_eq!(collector.state(), CollectorState::Running);

    collector.shutdown().await;
}

#[tokio::test]
async fn test_unwritable_log_fails_start() {
    let dir = tempfile::tempdir().unwrap();

    let source = Arc::new(ScriptedSource::new(vec![]));
    let mut collector = create_test_collector(source.clone(), dir.path(), fast_tuning());

    let result = collector.start().await;
    assert_matches!(result, Err(CollectorError::Io { .. }));
    assert_eq!(source.opened(), 0, "no fetcher may start without a writer");
}

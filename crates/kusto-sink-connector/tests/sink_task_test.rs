//! Sink task integration tests: routing, error policy and commit reporting.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::RecordingIngestClient;
use kusto_sink_connector::{
    KustoSinkTask, SinkConnector, SinkError, SinkRecord, TopicPartition,
};
use serde_json::json;
use tempfile::TempDir;

fn config_map(dir: &TempDir, behavior: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(
        "kusto.tables.topics.mapping".to_string(),
        r#"[{"topic":"logs","db":"ops","table":"Logs","format":"csv"},
            {"topic":"clicks","db":"web","table":"Clicks","format":"multijson","mapping":"clicks_map"}]"#
            .to_string(),
    );
    map.insert("tempdir.path".to_string(), dir.path().display().to_string());
    map.insert("flush.interval.ms".to_string(), "0".to_string());
    map.insert("behavior.on.error".to_string(), behavior.to_string());
    map
}

async fn started_task(
    dir: &TempDir,
    behavior: &str,
    client: Arc<RecordingIngestClient>,
    partitions: &[TopicPartition],
) -> KustoSinkTask {
    let mut task = KustoSinkTask::new("kusto-sink-0", &config_map(dir, behavior), client).unwrap();
    task.start().await.unwrap();
    task.open(partitions).await.unwrap();
    task
}

async fn wait_for_offsets(
    task: &mut KustoSinkTask,
    expected: &HashMap<TopicPartition, u64>,
) {
    for _ in 0..500 {
        if &task.pre_commit().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "offsets never reached {:?}, last {:?}",
        expected,
        task.pre_commit().await
    );
}

#[tokio::test]
async fn test_put_routes_records_to_their_tables() {
    let dir = TempDir::new().unwrap();
    let client = RecordingIngestClient::new();
    let logs = TopicPartition::new("logs", 0);
    let clicks = TopicPartition::new("clicks", 1);
    let mut task = started_task(&dir, "fail", client.clone(), &[logs.clone(), clicks.clone()]).await;

    task.put(&[
        SinkRecord::new("logs", 0, 0, "GET /,200"),
        SinkRecord::new("clicks", 1, 7, json!({"btn": "buy"})),
        SinkRecord::new("logs", 0, 1, "GET /a,404"),
    ])
    .await
    .unwrap();

    let expected = HashMap::from([(logs, 2), (clicks, 8)]);
    wait_for_offsets(&mut task, &expected).await;

    let submissions = client.submissions();
    assert_eq!(submissions.len(), 3);
    let click = submissions
        .iter()
        .find(|s| s.properties.table == "Clicks")
        .unwrap();
    assert_eq!(click.text(), "{\"btn\":\"buy\"}\n");
    assert_eq!(
        click.properties.ingestion_mapping.as_ref().unwrap().reference,
        "clicks_map"
    );

    task.stop().await.unwrap();
}

#[tokio::test]
async fn test_record_error_fails_put_under_fail() {
    let dir = TempDir::new().unwrap();
    let logs = TopicPartition::new("logs", 0);
    let mut task = started_task(&dir, "fail", RecordingIngestClient::new(), &[logs]).await;

    let err = task
        .put(&[SinkRecord::new("logs", 0, 0, json!({"not": "csv"}))])
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::FormatMismatch { .. }));
    task.stop().await.unwrap();
}

#[tokio::test]
async fn test_record_error_skipped_under_ignore() {
    let dir = TempDir::new().unwrap();
    let client = RecordingIngestClient::new();
    let logs = TopicPartition::new("logs", 0);
    let mut task = started_task(&dir, "ignore", client.clone(), &[logs.clone()]).await;

    task.put(&[
        SinkRecord::new("logs", 0, 0, "a,1"),
        SinkRecord::new("logs", 0, 1, json!({"not": "csv"})),
        SinkRecord::new("logs", 0, 2, "c,3"),
    ])
    .await
    .unwrap();

    wait_for_offsets(&mut task, &HashMap::from([(logs, 3)])).await;
    let mut lines: Vec<String> = client.submissions().iter().map(|s| s.text()).collect();
    lines.sort();
    assert_eq!(lines, vec!["a,1\n".to_string(), "c,3\n".to_string()]);
    task.stop().await.unwrap();
}

#[tokio::test]
async fn test_ingestion_failure_fails_put_until_retried() {
    let dir = TempDir::new().unwrap();
    let client = RecordingIngestClient::failing_once(&[0]);
    let logs = TopicPartition::new("logs", 0);
    let mut task = started_task(&dir, "fail", client.clone(), &[logs.clone()]).await;

    task.put(&[SinkRecord::new("logs", 0, 0, "a,1")]).await.unwrap();

    let mut surfaced = None;
    for _ in 0..500 {
        if let Err(e) = task.flush().await {
            surfaced = Some(e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(surfaced, Some(SinkError::IngestionFailed { .. })));
    assert_eq!(task.failures().len(), 1);
    assert!(task.pre_commit().await.is_empty());

    // Still failing until resolved
    let err = task
        .put(&[SinkRecord::new("logs", 0, 1, "b,2")])
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::IngestionFailed { .. }));

    assert_eq!(task.retry_failures().await.unwrap(), 1);
    assert!(task.failures().is_empty());
    wait_for_offsets(&mut task, &HashMap::from([(logs, 1)])).await;
    task.stop().await.unwrap();
}

#[tokio::test]
async fn test_ingestion_failure_skipped_under_ignore() {
    let dir = TempDir::new().unwrap();
    let client = RecordingIngestClient::failing_once(&[0]);
    let logs = TopicPartition::new("logs", 0);
    let mut task = started_task(&dir, "ignore", client.clone(), &[logs.clone()]).await;

    task.put(&[
        SinkRecord::new("logs", 0, 0, "a,1"),
        SinkRecord::new("logs", 0, 1, "b,2"),
    ])
    .await
    .unwrap();

    wait_for_offsets(&mut task, &HashMap::from([(logs, 2)])).await;
    task.flush().await.unwrap();
    assert!(task.failures().is_empty());
    assert_eq!(client.count(), 1);
    task.stop().await.unwrap();
}

#[tokio::test]
async fn test_redelivered_offsets_skipped_under_ignore_and_fail_under_fail() {
    let dir = TempDir::new().unwrap();
    let logs = TopicPartition::new("logs", 0);

    let client = RecordingIngestClient::new();
    let mut task = started_task(&dir, "ignore", client.clone(), &[logs.clone()]).await;
    task.put(&[
        SinkRecord::new("logs", 0, 4, "a,1"),
        SinkRecord::new("logs", 0, 4, "a,1"),
        SinkRecord::new("logs", 0, 5, "b,2"),
    ])
    .await
    .unwrap();
    wait_for_offsets(&mut task, &HashMap::from([(logs.clone(), 6)])).await;
    assert_eq!(client.count(), 2);
    task.stop().await.unwrap();

    let other_dir = TempDir::new().unwrap();
    let mut task = started_task(&other_dir, "fail", RecordingIngestClient::new(), &[logs]).await;
    task.put(&[SinkRecord::new("logs", 0, 4, "a,1")]).await.unwrap();
    let err = task
        .put(&[SinkRecord::new("logs", 0, 4, "a,1")])
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::OffsetOutOfOrder { .. }));
    task.stop().await.unwrap();
}

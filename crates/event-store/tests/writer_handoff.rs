use devpipe_core_types::{CapturedEvent, EventType, SessionId};
use devpipe_event_store::{LogWriter, WriterMetrics};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn click(n: u64) -> CapturedEvent {
    CapturedEvent::now(
        EventType::UiClick,
        Some(SessionId::tab(0)),
        json!({"session_id": "tab-0", "n": n}),
    )
}

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn records_land_in_queue_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.jsonl");
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let metrics = WriterMetrics::default();
    let task = tokio::spawn(LogWriter::new(&path, metrics.clone()).run(rx, cancel.clone()));

    for n in 0..20 {
        tx.send(click(n)).unwrap();
    }
    cancel.cancel();
    let exit = task.await.unwrap();
    assert!(exit.outcome.is_ok());

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 20);
    for (n, line) in lines.iter().enumerate() {
        assert_eq!(line["type"], "UI_CLICK");
        assert_eq!(line["data"]["n"], n as u64);
        assert_eq!(line.as_object().unwrap().len(), 3);
    }
    assert_eq!(metrics.snapshot().lines_written, 20);
}

#[tokio::test]
async fn queue_moves_to_next_file_without_loss() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.jsonl");
    let second = dir.path().join("second.jsonl");
    let (tx, rx) = mpsc::unbounded_channel();
    let metrics = WriterMetrics::default();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(LogWriter::new(&first, metrics.clone()).run(rx, cancel.clone()));
    tx.send(click(1)).unwrap();
    cancel.cancel();
    let exit = task.await.unwrap();
    assert!(exit.outcome.is_ok());
    assert_eq!(exit.path, first);

    tx.send(click(2)).unwrap();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(
        LogWriter::new(&second, metrics.clone()).run(exit.receiver, cancel.clone()),
    );
    tx.send(click(3)).unwrap();
    drop(tx);
    let exit = task.await.unwrap();
    assert!(exit.outcome.is_ok());

    assert_eq!(read_lines(&first).len(), 1);
    let later: Vec<u64> = read_lines(&second)
        .iter()
        .map(|line| line["data"]["n"].as_u64().unwrap())
        .collect();
    assert_eq!(later, vec![2, 3]);
    assert_eq!(metrics.snapshot().files_opened, 2);
}

#[tokio::test]
async fn reopening_appends_instead_of_truncating() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("same.jsonl");
    for n in 0..2 {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(click(n)).unwrap();
        drop(tx);
        let exit = LogWriter::new(&path, WriterMetrics::default())
            .run(rx, CancellationToken::new())
            .await;
        assert!(exit.outcome.is_ok());
    }
    assert_eq!(read_lines(&path).len(), 2);
}

#[tokio::test]
async fn preamble_precedes_queued_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("start.jsonl");
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(click(7)).unwrap();
    drop(tx);

    let start = CapturedEvent::now(
        EventType::SessionStart,
        None,
        json!({"log_file": path.display().to_string()}),
    );
    let exit = LogWriter::new(&path, WriterMetrics::default())
        .with_preamble(start)
        .run(rx, CancellationToken::new())
        .await;
    assert!(exit.outcome.is_ok());

    let lines = read_lines(&path);
    assert_eq!(lines[0]["type"], "SESSION_START");
    assert_eq!(lines[1]["type"], "UI_CLICK");
}

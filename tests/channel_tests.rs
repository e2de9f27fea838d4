// Tests for the local reporting channel against an acknowledging listener

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use testpulse::config::{ChannelConfig, RunIdentity};
use testpulse::emitter::{ChannelEmitter, StatusEmitter};
use testpulse::emitter::channel::{EVENT_AUTH, EVENT_RUN_END, EVENT_RUN_START};
use testpulse::reducer::{CaseSpec, Outcome, Reducer, SuiteSegment};
use testpulse::time::ManualClock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Frames received, tagged with the connection they arrived on
type Received = Arc<Mutex<Vec<(usize, Value)>>>;

/// Acknowledge every frame. The first `drop_first` connections are closed
/// right after their first frame without an acknowledgement.
async fn fake_reporter(drop_first: usize) -> (u16, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received: Received = Arc::default();
    let frames = received.clone();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connection += 1;
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: Value = serde_json::from_str(&line).unwrap();
                frames.lock().unwrap().push((connection, frame.clone()));
                if connection <= drop_first {
                    break;
                }
                let ack = format!("{}\n", json!({"ack": frame["seq"]}));
                if write.write_all(ack.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });

    (port, received)
}

fn config(port: u16) -> ChannelConfig {
    ChannelConfig {
        port: Some(port),
        reconnect_attempts: 3,
        reconnect_delay_ms: 10,
        reconnect_delay_max_ms: 20,
        ack_timeout_ms: 2_000,
    }
}

fn run_one_case(emitter: Arc<dyn StatusEmitter>) -> String {
    let mut reducer = Reducer::new(RunIdentity::local(), Arc::new(ManualClock::new(0)), emitter);
    let run_id = reducer.identity().run_id.clone();
    let suite = reducer
        .suite_discovered(&[SuiteSegment::new("a.feature", "A")])
        .unwrap();
    reducer.case_start("c1", CaseSpec::new("works", "a.feature:works"), suite, 0);
    reducer.case_end("c1", Outcome::passed());
    reducer.run_end(Outcome::derived());
    run_id
}

#[tokio::test]
async fn test_frames_are_authenticated_sequenced_and_acknowledged() {
    // Arrange
    let (port, received) = fake_reporter(0).await;
    let emitter = Arc::new(ChannelEmitter::spawn("run-1".to_string(), config(port), 64));

    // Act
    run_one_case(emitter.clone());
    emitter.shutdown(Duration::from_secs(5)).await;

    // Assert
    let frames = received.lock().unwrap();
    let (_, auth) = &frames[0];
    assert_eq!(auth["event"], EVENT_AUTH);
    assert_eq!(auth["seq"], 0);
    assert_eq!(auth["data"]["runId"], "run-1");

    let events: Vec<&Value> = frames[1..].iter().map(|(_, f)| f).collect();
    assert_eq!(events[0]["event"], EVENT_RUN_START);
    assert_eq!(events.last().unwrap()["event"], EVENT_RUN_END);
    let seqs: Vec<u64> = events.iter().map(|f| f["seq"].as_u64().unwrap()).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert!(events.iter().any(|f| f["event"] == "case:status"));
    assert!(events.iter().any(|f| f["event"] == "suite:status"));
    assert_eq!(emitter.dropped(), 0);
}

#[tokio::test]
async fn test_reconnects_after_unacknowledged_auth() {
    // Arrange
    let (port, received) = fake_reporter(1).await;
    let emitter = Arc::new(ChannelEmitter::spawn("run-2".to_string(), config(port), 64));

    // Act
    run_one_case(emitter.clone());
    emitter.shutdown(Duration::from_secs(5)).await;

    // Assert
    let frames = received.lock().unwrap();
    assert_eq!(frames[0].0, 1);
    assert_eq!(frames[0].1["event"], EVENT_AUTH);
    let second: Vec<&Value> = frames.iter().filter(|(c, _)| *c == 2).map(|(_, f)| f).collect();
    assert_eq!(second[0]["event"], EVENT_AUTH);
    assert_eq!(second[1]["event"], EVENT_RUN_START);
    assert_eq!(second[1]["seq"], 1);
    assert_eq!(second.last().unwrap()["event"], EVENT_RUN_END);
}

#[tokio::test]
async fn test_unreachable_channel_discards_without_blocking() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let emitter = Arc::new(ChannelEmitter::spawn("run-3".to_string(), config(port), 64));

    // Act
    run_one_case(emitter.clone());
    let drained = tokio::time::timeout(
        Duration::from_secs(5),
        emitter.shutdown(Duration::from_secs(2)),
    )
    .await;

    // Assert
    assert!(drained.is_ok());
}

#[tokio::test]
async fn test_disabled_channel_is_inert() {
    // Arrange
    let emitter = Arc::new(ChannelEmitter::spawn(
        "run-4".to_string(),
        ChannelConfig::default(),
        64,
    ));

    // Act
    run_one_case(emitter.clone());
    let drained = tokio::time::timeout(
        Duration::from_secs(5),
        emitter.shutdown(Duration::from_secs(1)),
    )
    .await;

    // Assert
    assert!(drained.is_ok());
    assert_eq!(emitter.dropped(), 0);
}

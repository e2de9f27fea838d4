// Local reporting channel
//
// NDJSON over TCP to a reporter process on localhost. The connection starts
// with an auth frame carrying the run id; every frame carries a sequence
// number and is acknowledged with `{"ack": <seq>}` before the next one is
// sent. While disconnected the queue is not read, so pending messages keep
// their order until the connection is back. A frame in flight when the
// connection drops is not re-sent.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::StatusEmitter;
use crate::config::ChannelConfig;
use crate::state::{CaseStatusUpdate, RunResult, RunStatusInfo, SuiteStatusUpdate};

pub const EVENT_AUTH: &str = "auth";
pub const EVENT_RUN_START: &str = "run:start";
pub const EVENT_RUN_END: &str = "run:end";
pub const EVENT_CASE_STATUS: &str = "case:status";
pub const EVENT_SUITE_STATUS: &str = "suite:status";

/// One line on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub seq: u64,
    pub event: String,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
struct Ack {
    ack: u64,
}

#[derive(Debug)]
struct ChannelMessage {
    event: &'static str,
    data: Value,
}

struct Connection {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

pub struct ChannelEmitter {
    sender: Mutex<Option<mpsc::Sender<ChannelMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicUsize,
}

impl ChannelEmitter {
    /// Start the channel task. Must be called inside a tokio runtime.
    pub fn spawn(run_id: String, config: ChannelConfig, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = ChannelWorker {
            run_id,
            config,
            seq: 0,
        };
        let worker = tokio::spawn(worker.run(rx));
        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue<T: Serialize>(&self, event: &'static str, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize {} message: {}", event, e);
                return;
            }
        };
        let Ok(guard) = self.sender.lock() else {
            return;
        };
        let Some(sender) = guard.as_ref() else {
            debug!("Channel closed, discarding {}", event);
            return;
        };
        match sender.try_send(ChannelMessage { event, data }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Channel queue full, dropping {}", event);
            }
            Err(TrySendError::Closed(_)) => debug!("Channel closed, discarding {}", event),
        }
    }
}

impl StatusEmitter for ChannelEmitter {
    fn run_started(&self, info: &RunStatusInfo) {
        self.enqueue(EVENT_RUN_START, info);
    }

    fn run_finished(&self, run: &RunResult) {
        self.enqueue(EVENT_RUN_END, run);
    }

    fn case_status(&self, update: &CaseStatusUpdate) {
        self.enqueue(EVENT_CASE_STATUS, update);
    }

    fn suite_status(&self, update: &SuiteStatusUpdate) {
        self.enqueue(EVENT_SUITE_STATUS, update);
    }

    fn instance_status(&self, _info: &RunStatusInfo) {
        // the channel protocol has no instance status event
    }

    fn shutdown(&self, timeout: Duration) -> BoxFuture<'_, ()> {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        Box::pin(async move {
            let Some(worker) = worker else {
                return;
            };
            let abort = worker.abort_handle();
            if tokio::time::timeout(timeout, worker).await.is_err() {
                warn!("Timed out draining the reporting channel");
                abort.abort();
            }
        })
    }
}

struct ChannelWorker {
    run_id: String,
    config: ChannelConfig,
    seq: u64,
}

impl ChannelWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<ChannelMessage>) {
        let Some(port) = self.config.port else {
            rx.close();
            return;
        };

        loop {
            let Some(mut connection) = self.connect(port).await else {
                warn!(
                    "Reporting channel unavailable after {} attempts, discarding pending messages",
                    self.config.reconnect_attempts
                );
                rx.close();
                while rx.recv().await.is_some() {}
                return;
            };

            loop {
                let Some(message) = rx.recv().await else {
                    return;
                };
                self.seq += 1;
                let frame = Frame {
                    seq: self.seq,
                    event: message.event.to_string(),
                    data: message.data,
                };
                if let Err(e) = self.send(&mut connection, &frame).await {
                    warn!("Reporting channel lost while sending {}: {}", frame.event, e);
                    break;
                }
            }
        }
    }

    /// Connect and authenticate, retrying with a doubling, capped delay
    async fn connect(&self, port: u16) -> Option<Connection> {
        let attempts = self.config.reconnect_attempts.max(1);
        let max_delay = Duration::from_millis(self.config.reconnect_delay_max_ms);
        let mut delay = Duration::from_millis(self.config.reconnect_delay_ms).min(max_delay);

        for attempt in 1..=attempts {
            match self.open(port).await {
                Ok(connection) => {
                    debug!("Reporting channel connected on port {}", port);
                    return Some(connection);
                }
                Err(e) => debug!("Channel connect attempt {} failed: {}", attempt, e),
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
        None
    }

    async fn open(&self, port: u16) -> io::Result<Connection> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let (read, writer) = stream.into_split();
        let mut connection = Connection {
            reader: BufReader::new(read).lines(),
            writer,
        };
        let auth = Frame {
            seq: 0,
            event: EVENT_AUTH.to_string(),
            data: json!({ "runId": self.run_id }),
        };
        self.send(&mut connection, &auth).await?;
        Ok(connection)
    }

    async fn send(&self, connection: &mut Connection, frame: &Frame) -> io::Result<()> {
        let mut line = serde_json::to_string(frame).map_err(io::Error::other)?;
        line.push('\n');
        connection.writer.write_all(line.as_bytes()).await?;
        connection.writer.flush().await?;

        let ack_timeout = Duration::from_millis(self.config.ack_timeout_ms);
        loop {
            let next = tokio::time::timeout(ack_timeout, connection.reader.next_line())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "acknowledgement timed out"))??;
            let Some(reply) = next else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed by peer",
                ));
            };
            match serde_json::from_str::<Ack>(&reply) {
                Ok(ack) if ack.ack >= frame.seq => return Ok(()),
                Ok(_) => {}
                Err(_) => debug!("Ignoring unexpected channel reply: {}", reply),
            }
        }
    }
}

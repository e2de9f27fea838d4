// Emitter module - best-effort live status reporting
//
// Every call returns immediately. Transport failures are logged by the
// implementation and never reach the reducer.

pub mod channel;
pub mod http;
pub mod streaming;

pub use channel::ChannelEmitter;
pub use http::HttpEmitter;
pub use streaming::StreamingEmitter;

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, join_all};

use crate::config::ReporterConfig;
use crate::state::{CaseStatusUpdate, RunResult, RunStatusInfo, SuiteStatusUpdate};

/// Default bound of the queued emitters
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Sink for incremental status snapshots
pub trait StatusEmitter: Send + Sync {
    fn run_started(&self, info: &RunStatusInfo);

    /// Final tree of the run
    fn run_finished(&self, run: &RunResult);

    fn case_status(&self, update: &CaseStatusUpdate);

    fn suite_status(&self, update: &SuiteStatusUpdate);

    fn instance_status(&self, info: &RunStatusInfo);

    /// Wait, at most `timeout`, for queued messages to be delivered
    fn shutdown(&self, _timeout: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Emitter used when no collector is configured
pub struct NoopEmitter;

impl StatusEmitter for NoopEmitter {
    fn run_started(&self, _info: &RunStatusInfo) {}

    fn run_finished(&self, _run: &RunResult) {}

    fn case_status(&self, _update: &CaseStatusUpdate) {}

    fn suite_status(&self, _update: &SuiteStatusUpdate) {}

    fn instance_status(&self, _info: &RunStatusInfo) {}
}

/// Forwards every call to each inner emitter
#[derive(Default)]
pub struct MultiEmitter {
    emitters: Vec<Arc<dyn StatusEmitter>>,
}

impl MultiEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, emitter: Arc<dyn StatusEmitter>) {
        self.emitters.push(emitter);
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    /// Collapse to a single emitter, or `NoopEmitter` when empty
    pub fn into_emitter(mut self) -> Arc<dyn StatusEmitter> {
        match self.emitters.len() {
            0 => Arc::new(NoopEmitter),
            1 => self.emitters.remove(0),
            _ => Arc::new(self),
        }
    }
}

impl StatusEmitter for MultiEmitter {
    fn run_started(&self, info: &RunStatusInfo) {
        for emitter in &self.emitters {
            emitter.run_started(info);
        }
    }

    fn run_finished(&self, run: &RunResult) {
        for emitter in &self.emitters {
            emitter.run_finished(run);
        }
    }

    fn case_status(&self, update: &CaseStatusUpdate) {
        for emitter in &self.emitters {
            emitter.case_status(update);
        }
    }

    fn suite_status(&self, update: &SuiteStatusUpdate) {
        for emitter in &self.emitters {
            emitter.suite_status(update);
        }
    }

    fn instance_status(&self, info: &RunStatusInfo) {
        for emitter in &self.emitters {
            emitter.instance_status(info);
        }
    }

    fn shutdown(&self, timeout: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            join_all(self.emitters.iter().map(|e| e.shutdown(timeout))).await;
        })
    }
}

/// Remote emitters for a configuration: HTTP when a collector is set,
/// plus the local channel when a port is set. Must run inside a tokio runtime.
pub fn from_config(config: &ReporterConfig) -> MultiEmitter {
    let mut emitters = MultiEmitter::new();

    if let Some(collector) = &config.collector {
        match HttpEmitter::from_settings(collector, DEFAULT_QUEUE_CAPACITY) {
            Ok(emitter) => emitters.push(Arc::new(emitter)),
            Err(e) => tracing::warn!("Remote reporting disabled: {}", e),
        }
    }

    if config.channel.port.is_some() {
        let emitter = ChannelEmitter::spawn(
            config.identity.run_id.clone(),
            config.channel.clone(),
            DEFAULT_QUEUE_CAPACITY,
        );
        emitters.push(Arc::new(emitter));
    }

    emitters
}

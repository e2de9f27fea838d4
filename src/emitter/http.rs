// Queued HTTP emitter
//
// Calls are pushed onto a bounded queue and delivered in order by a single
// background task. A full queue drops the message.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::StatusEmitter;
use crate::client::{ApiClient, ApiError, RuntimeApi};
use crate::config::CollectorSettings;
use crate::state::{CaseStatusUpdate, RunResult, RunStatusInfo, SuiteStatusUpdate};

#[derive(Debug)]
enum RuntimeMessage {
    Instance(RunStatusInfo),
    Result(Box<RunResult>),
    Case(CaseStatusUpdate),
    Suite(SuiteStatusUpdate),
}

impl RuntimeMessage {
    fn describe(&self) -> &'static str {
        match self {
            RuntimeMessage::Instance(_) => "update run status",
            RuntimeMessage::Result(_) => "post test results",
            RuntimeMessage::Case(_) => "update case runtime status",
            RuntimeMessage::Suite(_) => "update suite runtime status",
        }
    }
}

pub struct HttpEmitter {
    sender: Mutex<Option<mpsc::Sender<RuntimeMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicUsize,
}

impl HttpEmitter {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(api: RuntimeApi, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(deliver(api, rx));
        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: &CollectorSettings, capacity: usize) -> Result<Self, ApiError> {
        let client = ApiClient::new(&settings.url, &settings.token, settings.auth)?;
        Ok(Self::spawn(RuntimeApi::from_client(client), capacity))
    }

    /// Messages discarded because the queue was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, message: RuntimeMessage) {
        let Ok(guard) = self.sender.lock() else {
            return;
        };
        let Some(sender) = guard.as_ref() else {
            debug!("Emitter closed, discarding {:?}", message.describe());
            return;
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Status queue full, dropping request to {}", message.describe());
            }
            Err(TrySendError::Closed(message)) => {
                debug!("Status queue closed, discarding {}", message.describe());
            }
        }
    }
}

async fn deliver(api: RuntimeApi, mut rx: mpsc::Receiver<RuntimeMessage>) {
    while let Some(message) = rx.recv().await {
        let result = match &message {
            RuntimeMessage::Instance(info) => api.update_instance_status(info).await,
            RuntimeMessage::Result(run) => api.add_instance_result(run).await,
            RuntimeMessage::Case(update) => api.update_case_status(update).await,
            RuntimeMessage::Suite(update) => api.update_suite_status(update).await,
        };
        if let Err(e) = result {
            warn!("Failed to {}: {}", message.describe(), e);
        }
    }
}

impl StatusEmitter for HttpEmitter {
    fn run_started(&self, info: &RunStatusInfo) {
        self.enqueue(RuntimeMessage::Instance(info.clone()));
    }

    fn run_finished(&self, run: &RunResult) {
        self.enqueue(RuntimeMessage::Result(Box::new(run.clone())));
    }

    fn case_status(&self, update: &CaseStatusUpdate) {
        self.enqueue(RuntimeMessage::Case(update.clone()));
    }

    fn suite_status(&self, update: &SuiteStatusUpdate) {
        self.enqueue(RuntimeMessage::Suite(update.clone()));
    }

    fn instance_status(&self, info: &RunStatusInfo) {
        self.enqueue(RuntimeMessage::Instance(info.clone()));
    }

    fn shutdown(&self, timeout: Duration) -> BoxFuture<'_, ()> {
        // closing the sender lets the worker drain and exit
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
                warn!("Timed out delivering queued status updates");
                abort.abort();
            }
        })
    }
}

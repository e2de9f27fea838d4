// Report module - consumers of the finished result tree

pub mod json;
pub mod junit;

pub use json::JsonSink;
pub use junit::JunitSink;

use std::sync::Arc;

use anyhow::Result;

use crate::emitter::StatusEmitter;
use crate::state::RunResult;

/// Receives the finished run exactly once
pub trait Sink: Send + Sync {
    fn on_run_end(&self, run: &RunResult) -> Result<()>;
}

/// Hands the final tree to a status emitter
pub struct EmitterSink {
    emitter: Arc<dyn StatusEmitter>,
}

impl EmitterSink {
    pub fn new(emitter: Arc<dyn StatusEmitter>) -> Self {
        Self { emitter }
    }
}

impl Sink for EmitterSink {
    fn on_run_end(&self, run: &RunResult) -> Result<()> {
        self.emitter.run_finished(run);
        Ok(())
    }
}

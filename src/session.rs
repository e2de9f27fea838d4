// Report session - one framework's event stream reduced into one run
//
// Owns the normalizer, the reducer and the sinks. Lines that fail to decode
// are skipped. When the stream ends without a run end event, the run is
// closed with a derived status so a tree is always produced.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, error, info};

use crate::config::ReporterConfig;
use crate::emitter::StatusEmitter;
use crate::normalizer::{Framework, LineNormalizer};
use crate::reducer::{Outcome, Reducer};
use crate::report::Sink;
use crate::state::RunResult;
use crate::time::{Clock, SystemClock};

/// How long `finish` waits for queued status messages
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ReportSession {
    normalizer: Box<dyn LineNormalizer>,
    reducer: Reducer,
    emitter: Arc<dyn StatusEmitter>,
    sinks: Vec<Box<dyn Sink>>,
    result: Option<RunResult>,
    skipped_lines: usize,
    shutdown_timeout: Duration,
}

impl ReportSession {
    /// Session on the system clock for a configured run
    pub fn new(framework: Framework, config: &ReporterConfig, emitter: Arc<dyn StatusEmitter>) -> Self {
        Self::with_clock(framework, config, emitter, Arc::new(SystemClock))
    }

    pub fn with_clock(
        framework: Framework,
        config: &ReporterConfig,
        emitter: Arc<dyn StatusEmitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut reducer = Reducer::new(config.identity.clone(), clock, emitter.clone());
        framework.apply_metadata(&mut reducer);
        Self {
            normalizer: framework.normalizer(),
            reducer,
            emitter,
            sinks: Vec::new(),
            result: None,
            skipped_lines: 0,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn framework(&self) -> Framework {
        self.normalizer.framework()
    }

    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    /// Lines that could not be decoded as events
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Feed one NDJSON line. Blank and undecodable lines are skipped.
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match self.normalizer.handle_line(&mut self.reducer, line) {
            Ok(result) => self.store(result),
            Err(e) => {
                self.skipped_lines += 1;
                debug!("Skipping undecodable event: {}", e);
            }
        }
    }

    /// Feed one already parsed event
    pub fn feed_value(&mut self, value: Value) -> Result<(), serde_json::Error> {
        let result = self.normalizer.handle_value(&mut self.reducer, value)?;
        self.store(result);
        Ok(())
    }

    fn store(&mut self, result: Option<RunResult>) {
        if let Some(run) = result {
            info!("Run {} finished: {:?}", run.run_id, run.status);
            self.result = Some(run);
        }
    }

    /// Feed every line of `reader` until EOF
    pub async fn read_from<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = LinesStream::new(BufReader::new(reader).lines());
        while let Some(line) = lines.next().await {
            let line = line.context("Failed to read event stream")?;
            self.feed_line(&line);
        }
        Ok(())
    }

    /// Close the run if needed, hand the tree to every sink and drain the emitter
    pub async fn finish(mut self) -> Result<RunResult> {
        let run = match self.result.take() {
            Some(run) => run,
            None => {
                debug!("Event stream ended before the run did");
                self.reducer
                    .run_end(Outcome::derived())
                    .context("Run was already finished without a result")?
            }
        };

        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.on_run_end(&run) {
                error!("Sink failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }

        self.emitter.shutdown(self.shutdown_timeout).await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(run),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, ReporterConfig};
    use crate::emitter::NoopEmitter;
    use crate::state::ResultStatus;
    use crate::time::ManualClock;

    fn session(framework: Framework) -> ReportSession {
        let config = ReporterConfig::from_lookup(FileConfig::default(), |_| None).unwrap();
        ReportSession::with_clock(
            framework,
            &config,
            Arc::new(NoopEmitter),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    #[tokio::test]
    async fn test_garbage_lines_are_skipped() {
        let mut session = session(Framework::Playwright);

        session.feed_line("not json");
        session.feed_line("");
        session.feed_line(r#"{"event":"unknownEvent"}"#);

        assert_eq!(session.skipped_lines(), 2);
        let run = session.finish().await.unwrap();
        assert_eq!(run.metadata["framework"], "Playwright");
        assert!(run.suites.is_empty());
    }

    #[tokio::test]
    async fn test_eof_closes_open_run() {
        let mut session = session(Framework::Mocha);
        let input = concat!(
            r#"{"event":"run:begin","totalTests":1}"#, "\n",
            r#"{"event":"mocha:suite:begin","suite":{"id":"r1","title":"","root":true,"file":"a.cy.js"}}"#, "\n",
            r#"{"event":"mocha:test:begin","test":{"id":"r2","title":"works","parent":"r1"}}"#, "\n",
        );

        session.read_from(input.as_bytes()).await.unwrap();
        assert!(!session.is_finished());
        let run = session.finish().await.unwrap();

        let case = run.all_cases()[0];
        assert_eq!(case.status, Some(ResultStatus::Failed));
        assert_eq!(run.status, Some(ResultStatus::Failed));
    }
}

use crate::state::{CaseStatusUpdate, RunResult, RunStatusInfo, SuiteStatusUpdate};
use crate::time::duration_between;
use serde_json::json;
use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::StatusEmitter;

/// Writes status transitions as NDJSON lines, stdout by default
pub struct StreamingEmitter {
    run_started: AtomicBool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl StreamingEmitter {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            run_started: AtomicBool::new(false),
            out: Mutex::new(out),
        }
    }

    fn emit(&self, event: &serde_json::Value) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Ok(s) = serde_json::to_string(event) {
            let _ = writeln!(out, "{}", s);
        }
        let _ = out.flush();
    }
}

impl StatusEmitter for StreamingEmitter {
    fn run_started(&self, info: &RunStatusInfo) {
        if self.run_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(&json!({
            "event": "run_start",
            "runId": info.run_id,
            "instanceId": info.instance_id,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn run_finished(&self, run: &RunResult) {
        let summary = run.summary();
        self.emit(&json!({
            "event": "run_end",
            "runId": run.run_id,
            "status": run.status,
            "summary": {
                "suites": summary.suites,
                "total": summary.cases.total,
                "passed": summary.cases.passed,
                "failed": summary.cases.failed,
                "skipped": summary.cases.skipped,
                "duration": summary.duration_ms
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn case_status(&self, update: &CaseStatusUpdate) {
        let mut event = json!({
            "event": "case_status",
            "caseId": update.id,
            "fqn": update.fqn,
            "runStatus": update.run_status,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        if let Some(status) = update.test_status {
            event["status"] = json!(status);
        }

        if let (Some(start), Some(end)) = (update.start_time, update.end_time) {
            event["duration"] = json!(duration_between(start, end));
        }

        if let Some(message) = update.failures.first().and_then(|f| f.message.as_ref()) {
            event["message"] = json!(message);
        }

        self.emit(&event);
    }

    fn suite_status(&self, update: &SuiteStatusUpdate) {
        self.emit(&json!({
            "event": "suite_status",
            "suiteId": update.id,
            "fqn": update.fqn,
            "status": update.test_status,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }

    fn instance_status(&self, info: &RunStatusInfo) {
        self.emit(&json!({
            "event": "instance_status",
            "status": info.status,
            "progress": info.progress,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunStatus;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_run_start_emitted_once() {
        let buffer = SharedBuffer::default();
        let emitter = StreamingEmitter::new(Box::new(buffer.clone()));
        let info = RunStatusInfo {
            run_id: "r".into(),
            instance_id: "i".into(),
            agent_id: "a".into(),
            account_id: None,
            user_id: None,
            status: RunStatus::Running,
            progress: 0.0,
            case: None,
        };

        emitter.run_started(&info);
        emitter.run_started(&info);

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["event"], "run_start");
        assert_eq!(event["runId"], "r");
    }
}

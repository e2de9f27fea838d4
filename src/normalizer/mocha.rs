// Mocha runner events, as forwarded by the Cypress browser bridge
//
// Suites are materialized on their first test, hook, or at their end when
// they stayed empty. Tests whose suite was not announced yet wait for it, and
// command logs that arrive before their test wait for the test.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use super::common::{deserialize_millis, strip_ansi};
use super::{Framework, Normalizer};
use crate::reducer::{
    AttachmentTarget, CaseSpec, Outcome, PendingAttachment, PendingBuffer, Reducer, StepParent,
    StepSpec, SuiteId, SuiteSegment,
};
use crate::state::{
    ASSERTION_ERROR, Attachment, AttachmentSubType, AttachmentType, FailureResult, GENERAL_ERROR,
    LogEntry, RunResult, StepType, TIMEOUT_ERROR,
};
use crate::utils::title_hash;

/// Only logs of this instrument become steps
pub const COMMAND_INSTRUMENT: &str = "command";

#[derive(Debug, Clone, Deserialize)]
pub struct MochaSuite {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default, deserialize_with = "deserialize_ref_id")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MochaTest {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_ref_id")]
    pub parent: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub current_retry: u32,
    #[serde(default)]
    pub state: Option<String>,
    /// `test` or `hook`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub wall_clock_started_at: Option<i64>,
    #[serde(default)]
    pub err: Option<MochaError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MochaHook {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_ref_id")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFrame {
    #[serde(default)]
    pub frame: Option<String>,
    #[serde(default)]
    pub relative_file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MochaError {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub code_frame: Option<CodeFrame>,
}

/// Cypress command log
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CypressLog {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub test_id: Option<String>,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub wall_clock_started_at: Option<i64>,
    #[serde(default)]
    pub err: Option<MochaError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotProps {
    pub path: String,
    #[serde(default)]
    pub test_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum MochaEvent {
    #[serde(rename = "run:begin", rename_all = "camelCase")]
    RunBegin {
        #[serde(default)]
        total_tests: Option<u32>,
        #[serde(default, deserialize_with = "deserialize_millis")]
        start_time: Option<i64>,
    },
    #[serde(rename = "mocha:suite:begin")]
    SuiteBegin { suite: MochaSuite },
    #[serde(rename = "mocha:suite:end")]
    SuiteEnd { suite: MochaSuite },
    #[serde(rename = "mocha:test:begin")]
    TestBegin { test: MochaTest },
    #[serde(rename = "mocha:test:fail")]
    TestFail {
        test: MochaTest,
        #[serde(default)]
        err: Option<MochaError>,
    },
    #[serde(rename = "mocha:test:pass")]
    TestPass { test: MochaTest },
    #[serde(rename = "mocha:test:pending")]
    TestPending { test: MochaTest },
    #[serde(rename = "mocha:test:end")]
    TestEnd { test: MochaTest },
    #[serde(rename = "mocha:hook:begin")]
    HookBegin { hook: MochaHook },
    #[serde(rename = "mocha:hook:end")]
    HookEnd { hook: MochaHook },
    #[serde(rename = "log:added")]
    LogAdded { log: CypressLog },
    #[serde(rename = "log:changed")]
    LogChanged { log: CypressLog },
    #[serde(rename = "screenshot")]
    Screenshot { props: ScreenshotProps },
    #[serde(rename = "console:log")]
    ConsoleLog {
        message: String,
        #[serde(default)]
        level: Option<String>,
    },
    #[serde(rename = "run:end", rename_all = "camelCase")]
    RunEnd {
        #[serde(default)]
        status: Option<String>,
        #[serde(default, deserialize_with = "deserialize_millis")]
        end_time: Option<i64>,
    },
}

#[derive(Debug, Clone)]
enum LogUpdate {
    Added(CypressLog),
    Changed(CypressLog),
}

#[derive(Default)]
pub struct MochaNormalizer {
    suites: HashMap<String, MochaSuite>,
    materialized: HashMap<String, SuiteId>,
    suite_stack: Vec<String>,
    pending_tests: PendingBuffer<String, MochaTest>,
    pending_logs: PendingBuffer<String, LogUpdate>,
    current_test: Option<String>,
    outcomes: HashMap<String, Outcome>,
    /// test id -> command log ids already closed
    finished_logs: HashMap<String, HashSet<String>>,
}

impl MochaNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn suite_path(&self, suite_id: &str) -> Vec<SuiteSegment> {
        let mut chain = Vec::new();
        let mut current = self.suites.get(suite_id);
        while let Some(suite) = current {
            chain.push(suite);
            current = suite.parent.as_ref().and_then(|p| self.suites.get(p));
        }
        chain.reverse();

        let mut file: Option<&str> = None;
        let mut path = Vec::new();
        for suite in chain {
            if let Some(f) = suite.file.as_deref() {
                file = Some(f);
            }
            let segment = if suite.root {
                match suite.file.as_deref() {
                    Some(f) => SuiteSegment::new(f, f),
                    None => continue,
                }
            } else {
                SuiteSegment::new(title_hash(&suite.title), &suite.title)
            };
            path.push(match file {
                Some(f) => segment.with_location(f),
                None => segment,
            });
        }
        path
    }

    fn materialize(&mut self, reducer: &mut Reducer, suite_id: &str) -> Option<SuiteId> {
        if let Some(id) = self.materialized.get(suite_id) {
            return Some(*id);
        }
        if !self.suites.contains_key(suite_id) {
            return None;
        }
        let path = self.suite_path(suite_id);
        let id = reducer.suite_discovered(&path)?;
        self.materialized.insert(suite_id.to_string(), id);
        Some(id)
    }

    fn on_suite_begin(&mut self, reducer: &mut Reducer, suite: MochaSuite) {
        let id = suite.id.clone();
        self.suite_stack.push(id.clone());
        self.suites.insert(id.clone(), suite);
        for test in self.pending_tests.take(&id) {
            self.start_test(reducer, test);
        }
    }

    fn on_suite_end(&mut self, reducer: &mut Reducer, suite: MochaSuite) {
        self.finish_current(reducer);
        self.suites.entry(suite.id.clone()).or_insert(suite.clone());
        // empty suites still appear, as skipped
        self.materialize(reducer, &suite.id);
        if let Some(pos) = self.suite_stack.iter().rposition(|id| *id == suite.id) {
            self.suite_stack.remove(pos);
        }
    }

    fn parent_of(&self, parent: &Option<String>) -> Option<String> {
        parent.clone().or_else(|| self.suite_stack.last().cloned())
    }

    fn on_test_begin(&mut self, reducer: &mut Reducer, test: MochaTest) {
        let Some(parent) = self.parent_of(&test.parent) else {
            debug!("Test {} has no suite", test.id);
            return;
        };
        if !self.suites.contains_key(&parent) {
            debug!("Test {} waits for suite {}", test.id, parent);
            self.pending_tests.push(parent, test);
            return;
        }
        self.start_test(reducer, test);
    }

    fn start_test(&mut self, reducer: &mut Reducer, test: MochaTest) {
        if self.current_test.as_deref() != Some(test.id.as_str()) {
            self.finish_current(reducer);
        }
        if reducer.is_case_in_flight(&test.id) {
            return;
        }
        let Some(parent) = self.parent_of(&test.parent) else {
            return;
        };
        let Some(suite) = self.materialize(reducer, &parent) else {
            debug!("Cannot resolve suite {} for test {}", parent, test.id);
            return;
        };
        let suite_fqn = reducer.suite_fqn(suite).unwrap_or_default();
        let mut spec = CaseSpec::new(&test.title, format!("{}#{}", suite_fqn, title_hash(&test.title)));
        let file = test
            .file
            .clone()
            .or_else(|| self.suites.get(&parent).and_then(|s| s.file.clone()));
        if let Some(file) = file {
            spec = spec.with_location(file);
        }
        if let Some(start) = test.wall_clock_started_at {
            spec = spec.started_at(start);
        }
        if reducer
            .case_start(&test.id, spec, suite, test.current_retry)
            .is_none()
        {
            return;
        }
        self.current_test = Some(test.id.clone());
        for update in self.pending_logs.take(&test.id) {
            self.apply_log(reducer, &test.id, update);
        }
    }

    /// End the current test if the runner never reported its end
    fn finish_current(&mut self, reducer: &mut Reducer) {
        let Some(test_id) = self.current_test.take() else {
            return;
        };
        if reducer.is_case_in_flight(&test_id) {
            let outcome = self.outcomes.remove(&test_id).unwrap_or_default();
            reducer.case_end(&test_id, outcome);
        }
        self.finished_logs.remove(&test_id);
    }

    fn on_test_fail(&mut self, reducer: &mut Reducer, test: MochaTest, err: Option<MochaError>) {
        let failure = err.or(test.err.clone()).map(|e| failure_from_error(&e));
        if test.kind.as_deref() == Some("hook") {
            let key = hook_key(&test.id);
            if reducer.has_open_step(&key) {
                reducer.step_end(&key, Outcome::failed(failure.clone()));
            }
            // a failing each-hook fails the test it ran for
            if let Some(current) = self.current_test.clone() {
                self.outcomes.insert(current, Outcome::failed(failure));
            }
            return;
        }
        if !reducer.is_case_in_flight(&test.id) {
            self.on_test_begin(reducer, test.clone());
        }
        self.outcomes.insert(test.id, Outcome::failed(failure));
    }

    fn on_test_pending(&mut self, reducer: &mut Reducer, test: MochaTest) {
        // pending tests never get a begin event
        if !reducer.is_case_in_flight(&test.id) {
            self.on_test_begin(reducer, test.clone());
        }
        self.outcomes.insert(test.id, Outcome::skipped());
    }

    fn on_test_end(&mut self, reducer: &mut Reducer, test: MochaTest) {
        let outcome = self.outcomes.remove(&test.id).unwrap_or_else(|| match test.state.as_deref() {
            Some("passed") => Outcome::passed(),
            Some("failed") => Outcome::failed(test.err.as_ref().map(failure_from_error)),
            Some("pending") => Outcome::skipped(),
            _ => Outcome::derived(),
        });
        reducer.case_end(&test.id, outcome);
        self.finished_logs.remove(&test.id);
        if self.current_test.as_deref() == Some(test.id.as_str()) {
            self.current_test = None;
        }
    }

    fn on_hook_begin(&mut self, reducer: &mut Reducer, hook: MochaHook) {
        let parent = match self.current_test.clone() {
            Some(test_id) if reducer.is_case_in_flight(&test_id) => StepParent::Case(test_id),
            _ => {
                let Some(suite_id) = self.parent_of(&hook.parent) else {
                    return;
                };
                let Some(suite) = self.materialize(reducer, &suite_id) else {
                    return;
                };
                StepParent::Suite(suite)
            }
        };
        reducer.step_start(&hook_key(&hook.id), parent, StepSpec::new(&hook.title, StepType::Hook));
    }

    fn on_log(&mut self, reducer: &mut Reducer, update: LogUpdate) {
        let log = match &update {
            LogUpdate::Added(log) | LogUpdate::Changed(log) => log,
        };
        if log.instrument.as_deref() != Some(COMMAND_INSTRUMENT) {
            return;
        }
        let Some(test_id) = log.test_id.clone().or_else(|| self.current_test.clone()) else {
            return;
        };
        if reducer.is_case_in_flight(&test_id) {
            self.apply_log(reducer, &test_id, update);
        } else {
            let evicted = self.pending_logs.push(test_id, update);
            if evicted > 0 {
                debug!("Dropped {} command log(s) of tests that never started", evicted);
            }
        }
    }

    fn apply_log(&mut self, reducer: &mut Reducer, test_id: &str, update: LogUpdate) {
        let log = match update {
            LogUpdate::Added(log) | LogUpdate::Changed(log) => log,
        };
        if self
            .finished_logs
            .get(test_id)
            .is_some_and(|logs| logs.contains(&log.id))
        {
            return;
        }
        let key = log_key(&log.id);
        if !reducer.has_open_step(&key) {
            let name = log.name.clone().unwrap_or_default();
            let step_type = if name == "assert" {
                StepType::Assertion
            } else {
                StepType::General
            };
            let title = match log.message.as_deref() {
                Some(message) if !message.is_empty() => format!("{} {}", name, strip_ansi(message)),
                _ => name,
            };
            let mut spec = StepSpec::new(title, step_type);
            if let Some(start) = log.wall_clock_started_at {
                spec = spec.started_at(start);
            }
            if reducer
                .step_start(&key, StepParent::Case(test_id.to_string()), spec)
                .is_none()
            {
                return;
            }
        }
        match log.state.as_deref() {
            Some("passed") => {
                reducer.step_end(&key, Outcome::passed());
                self.mark_finished(test_id, log.id);
            }
            Some("failed") => {
                let mut failure = log.err.as_ref().map(failure_from_error);
                if log.name.as_deref() == Some("assert")
                    && let Some(f) = failure.as_mut()
                {
                    f.kind = ASSERTION_ERROR.to_string();
                }
                reducer.step_end(&key, Outcome::failed(failure));
                self.mark_finished(test_id, log.id);
            }
            _ => {}
        }
    }

    fn mark_finished(&mut self, test_id: &str, log_id: String) {
        self.finished_logs
            .entry(test_id.to_string())
            .or_default()
            .insert(log_id);
    }

    fn on_screenshot(&mut self, reducer: &mut Reducer, props: ScreenshotProps) {
        let Some(test_id) = props.test_id.or_else(|| self.current_test.clone()) else {
            return;
        };
        let screenshot = Attachment::from_path(
            AttachmentType::Screenshot,
            AttachmentSubType::Screenshot,
            &props.path,
        );
        reducer.attach(AttachmentTarget::Case(test_id), PendingAttachment::File(screenshot));
    }

    fn on_run_end(&mut self, reducer: &mut Reducer, status: Option<String>, end: Option<i64>) -> Option<RunResult> {
        self.finish_current(reducer);
        let dropped = self.pending_tests.clear() + self.pending_logs.clear();
        if dropped > 0 {
            debug!("Discarding {} event(s) that never found their owner", dropped);
        }
        self.outcomes.clear();
        self.finished_logs.clear();
        let mut outcome = match status {
            Some(status) => Outcome::native(&status),
            None => Outcome::derived(),
        };
        if let Some(end) = end {
            outcome = outcome.at(end);
        }
        reducer.run_end(outcome)
    }
}

impl Normalizer for MochaNormalizer {
    type Event = MochaEvent;

    const FRAMEWORK: Framework = Framework::Mocha;

    fn handle(&mut self, reducer: &mut Reducer, event: MochaEvent) -> Option<RunResult> {
        match event {
            MochaEvent::RunBegin {
                total_tests,
                start_time,
            } => {
                if let Some(total) = total_tests {
                    reducer.set_total_cases(total);
                }
                match start_time {
                    Some(start) => reducer.on_run_start_at(start),
                    None => reducer.on_run_start(),
                }
            }
            MochaEvent::SuiteBegin { suite } => self.on_suite_begin(reducer, suite),
            MochaEvent::SuiteEnd { suite } => self.on_suite_end(reducer, suite),
            MochaEvent::TestBegin { test } => self.on_test_begin(reducer, test),
            MochaEvent::TestFail { test, err } => self.on_test_fail(reducer, test, err),
            MochaEvent::TestPass { test } => {
                self.outcomes.insert(test.id, Outcome::passed());
            }
            MochaEvent::TestPending { test } => self.on_test_pending(reducer, test),
            MochaEvent::TestEnd { test } => self.on_test_end(reducer, test),
            MochaEvent::HookBegin { hook } => self.on_hook_begin(reducer, hook),
            MochaEvent::HookEnd { hook } => reducer.step_end(&hook_key(&hook.id), Outcome::derived()),
            MochaEvent::LogAdded { log } => self.on_log(reducer, LogUpdate::Added(log)),
            MochaEvent::LogChanged { log } => self.on_log(reducer, LogUpdate::Changed(log)),
            MochaEvent::Screenshot { props } => self.on_screenshot(reducer, props),
            MochaEvent::ConsoleLog { message, level } => {
                if let Some(test_id) = &self.current_test {
                    let entry = LogEntry::new(reducer.now_millis(), level.as_deref(), message, "user");
                    reducer.case_log(test_id, entry);
                }
            }
            MochaEvent::RunEnd { status, end_time } => {
                return self.on_run_end(reducer, status, end_time);
            }
        }
        None
    }
}

fn hook_key(id: &str) -> String {
    format!("hook:{}", id)
}

fn log_key(id: &str) -> String {
    format!("log:{}", id)
}

fn failure_from_error(error: &MochaError) -> FailureResult {
    let message = error.message.as_deref().map(strip_ansi);
    let name = error.name.as_deref();
    let kind = if name == Some("AssertionError") {
        ASSERTION_ERROR
    } else if name.is_some_and(|n| n.contains("Timeout"))
        || message.as_deref().is_some_and(|m| m.starts_with("Timed out"))
    {
        TIMEOUT_ERROR
    } else {
        GENERAL_ERROR
    };
    let frame = error.code_frame.as_ref();
    FailureResult {
        subtype: error.name.clone(),
        message,
        stacktrace: error.stack.as_deref().map(strip_ansi),
        snippet: frame.and_then(|f| f.frame.clone()),
        location: frame.and_then(|f| {
            Some(format!(
                "{}:{}:{}",
                f.relative_file.as_deref()?,
                f.line.unwrap_or_default(),
                f.column.unwrap_or_default()
            ))
        }),
        ..FailureResult::new(kind)
    }
}

/// A parent reference, either an id or the serialized parent object
fn deserialize_ref_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) => Some(id),
        Some(Value::Object(map)) => map.get("id").and_then(value_to_id),
        _ => None,
    })
}

/// Cypress log ids are strings or numbers
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_id(&value).ok_or_else(|| serde::de::Error::custom("expected a string or numeric id"))
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parent_reference_forms() {
        let by_id: MochaTest =
            serde_json::from_value(json!({"id": "r2", "title": "t", "parent": "r1"})).unwrap();
        let by_object: MochaTest = serde_json::from_value(
            json!({"id": "r2", "title": "t", "parent": {"id": "r1", "title": "suite"}}),
        )
        .unwrap();
        assert_eq!(by_id.parent.as_deref(), Some("r1"));
        assert_eq!(by_object.parent.as_deref(), Some("r1"));
    }

    #[test]
    fn test_numeric_log_id() {
        let log: CypressLog =
            serde_json::from_value(json!({"id": 12, "instrument": "command", "name": "visit"}))
                .unwrap();
        assert_eq!(log.id, "12");
    }

    #[test]
    fn test_failure_from_error() {
        let assertion = MochaError {
            name: Some("AssertionError".into()),
            message: Some("expected true to be false".into()),
            code_frame: Some(CodeFrame {
                frame: Some("> 12 | expect(x)".into()),
                relative_file: Some("cypress/e2e/login.cy.js".into()),
                line: Some(12),
                column: Some(5),
            }),
            ..Default::default()
        };
        let failure = failure_from_error(&assertion);
        assert_eq!(failure.kind, ASSERTION_ERROR);
        assert_eq!(failure.location.as_deref(), Some("cypress/e2e/login.cy.js:12:5"));

        let timeout = MochaError {
            name: Some("CypressError".into()),
            message: Some("Timed out retrying after 4000ms".into()),
            ..Default::default()
        };
        assert_eq!(failure_from_error(&timeout).kind, TIMEOUT_ERROR);
    }

    #[test]
    fn test_finished_logs_released_per_test() {
        use crate::config::RunIdentity;
        use crate::emitter::NoopEmitter;
        use crate::normalizer::LineNormalizer;
        use crate::time::ManualClock;
        use std::sync::Arc;

        let mut reducer = Reducer::new(
            RunIdentity::local(),
            Arc::new(ManualClock::new(0)),
            Arc::new(NoopEmitter),
        );
        let mut normalizer = MochaNormalizer::new();
        let mut feed = |normalizer: &mut MochaNormalizer, event: Value| {
            normalizer.handle_value(&mut reducer, event).unwrap()
        };
        let suite = json!({"id": "r1", "title": "", "root": true, "file": "cypress/e2e/a.cy.js"});
        feed(&mut normalizer, json!({"event": "mocha:suite:begin", "suite": suite}));

        for t in 0..20 {
            let test = json!({"id": format!("t{t}"), "title": format!("test {t}"), "parent": "r1"});
            feed(&mut normalizer, json!({"event": "mocha:test:begin", "test": test}));
            for l in 0..5 {
                let log = json!({
                    "id": t * 10 + l, "testId": format!("t{t}"),
                    "instrument": "command", "name": "click", "state": "passed"
                });
                feed(&mut normalizer, json!({"event": "log:added", "log": log}));
            }
            assert_eq!(normalizer.finished_logs[&format!("t{t}")].len(), 5);
            if t % 2 == 0 {
                feed(&mut normalizer, json!({"event": "mocha:test:end", "test": test}));
                assert!(normalizer.finished_logs.is_empty());
            }
        }
        let run = feed(&mut normalizer, json!({"event": "run:end"}));

        assert!(run.is_some());
        assert!(normalizer.finished_logs.is_empty());
    }

    #[test]
    fn test_event_names() {
        let event: MochaEvent = serde_json::from_value(json!({
            "event": "mocha:suite:begin",
            "suite": {"id": "r1", "title": "", "root": true, "file": "cypress/e2e/a.cy.js"}
        }))
        .unwrap();
        assert!(matches!(event, MochaEvent::SuiteBegin { .. }));
    }
}

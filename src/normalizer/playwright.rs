// Playwright reporter events
//
// Playwright delivers each test's step tree only when the test ends, so
// steps are recorded as already completed. Suites are keyed by walking the
// suite chain: file suites by `<testDirName>\<relative path>`, titled suites
// by a title hash.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::common::{deserialize_millis, error_subtype, is_truthy, strip_ansi};
use super::{Framework, Normalizer};
use crate::reducer::{
    AttachmentTarget, CaseSpec, Outcome, PendingAttachment, Reducer, StepId, StepParent, StepSpec,
    SuiteId, SuiteSegment,
};
use crate::state::{
    ASSERT_ERROR, Attachment, AttachmentSubType, AttachmentType, FailureResult, GENERAL_ERROR,
    LogEntry, ResultStatus, RunResult, StepType, TIMEOUT_ERROR,
};
use crate::utils::{FileUtils, title_hash};

/// Step categories promoted to steps; everything else is dropped
pub const REPORTED_STEP_CATEGORIES: [&str; 4] = ["expect", "hook", "pw:api", "test.step"];

/// Failure reasons accepted by `setFailureReason`
pub const FAILURE_REASONS: [(&str, u32); 7] = [
    ("FlakyTest", 1),
    ("Environment", 2),
    ("RealDefect", 3),
    ("TestData", 4),
    ("Device", 5),
    ("Ambiguous", 6),
    ("ToInvestigate", 7),
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwConfig {
    #[serde(default)]
    pub root_dir: String,
    #[serde(default)]
    pub projects: Vec<PwProject>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwProject {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub test_dir: Option<String>,
    #[serde(rename = "use", default)]
    pub use_options: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PwLocation {
    pub file: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

/// One level of the suite chain, root first
#[derive(Debug, Clone, Deserialize)]
pub struct PwSuite {
    #[serde(default)]
    pub title: String,
    /// `root`, `project`, `file` or `describe`
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub location: Option<PwLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwTest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<PwLocation>,
    #[serde(default)]
    pub suites: Vec<PwSuite>,
    #[serde(default)]
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PwError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwAttachment {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwStep {
    pub title: String,
    pub category: String,
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub location: Option<PwLocation>,
    #[serde(default)]
    pub error: Option<PwError>,
    #[serde(default)]
    pub steps: Vec<PwStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PwTestResult {
    pub status: String,
    #[serde(default)]
    pub retry: u32,
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub error: Option<PwError>,
    #[serde(default)]
    pub attachments: Vec<PwAttachment>,
    #[serde(default)]
    pub steps: Vec<PwStep>,
}

/// Event written by the Playwright bridge reporter
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PlaywrightEvent {
    #[serde(rename_all = "camelCase")]
    Begin {
        #[serde(default)]
        config: PwConfig,
        #[serde(default)]
        total_tests: Option<u32>,
        #[serde(default, deserialize_with = "deserialize_millis")]
        start_time: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    TestBegin {
        test: PwTest,
        #[serde(default)]
        retry: u32,
        #[serde(default, deserialize_with = "deserialize_millis")]
        start_time: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    TestEnd { test_id: String, result: PwTestResult },
    #[serde(rename_all = "camelCase")]
    Stdout {
        chunk: String,
        #[serde(default)]
        test_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    End {
        status: String,
        #[serde(default, deserialize_with = "deserialize_millis")]
        end_time: Option<i64>,
    },
}

/// Helper message written to stdout by test code
#[derive(Debug, Deserialize)]
struct HelperMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Default)]
pub struct PlaywrightNormalizer {
    root_dir: String,
    /// project name -> test dir
    test_dirs: HashMap<String, String>,
    default_test_dir: Option<String>,
    project_options: HashMap<String, Map<String, Value>>,
    /// test id -> test dir, while the test runs
    running: HashMap<String, Option<String>>,
}

impl PlaywrightNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_begin(&mut self, reducer: &mut Reducer, config: PwConfig, total: Option<u32>, start: Option<i64>) {
        self.root_dir = if config.root_dir.is_empty() {
            String::new()
        } else {
            format!("{}/", config.root_dir.trim_end_matches(['/', '\\']))
        };
        for project in &config.projects {
            if let Some(dir) = &project.test_dir {
                self.test_dirs.insert(project.name.clone(), dir.clone());
            }
            self.project_options
                .insert(project.name.clone(), project.use_options.clone());
        }
        self.default_test_dir = config.projects.first().and_then(|p| p.test_dir.clone());

        if let Some(project) = config.projects.first() {
            let browser = project.use_options.get("browserName").and_then(Value::as_str);
            let channel = project.use_options.get("channel").cloned().unwrap_or(Value::Null);
            match browser {
                Some("chromium") => reducer.set_capability("browserName", channel),
                Some(name) => reducer.set_capability("browserName", name),
                None => {}
            }
        }
        if let Some(total) = total {
            reducer.set_total_cases(total);
        }
        match start {
            Some(start) => reducer.on_run_start_at(start),
            None => reducer.on_run_start(),
        }
    }

    fn test_dir(&self, test: &PwTest) -> Option<&str> {
        test.project_name
            .as_ref()
            .and_then(|name| self.test_dirs.get(name))
            .or(self.default_test_dir.as_ref())
            .map(String::as_str)
    }

    fn code_location(&self, location: &PwLocation, test_dir: Option<&str>) -> String {
        format!(
            "{}:{}:{}",
            relative_location(&location.file, test_dir),
            location.line,
            location.column
        )
    }

    fn suite_path(&self, test: &PwTest, test_dir: Option<&str>) -> Vec<SuiteSegment> {
        test.suites
            .iter()
            .filter(|suite| suite.location.is_some() && !suite.title.is_empty())
            .map(|suite| {
                let file = suite.location.as_ref().map(|l| l.file.as_str()).unwrap_or_default();
                let relative = relative_location(file, test_dir);
                let key = if suite.kind == "file" {
                    relative.clone()
                } else {
                    title_hash(&suite.title)
                };
                SuiteSegment::new(key, &suite.title).with_location(relative)
            })
            .collect()
    }

    fn on_test_begin(&mut self, reducer: &mut Reducer, test: PwTest, retry: u32, start: Option<i64>) {
        let test_dir = self.test_dir(&test).map(str::to_string);
        let path = self.suite_path(&test, test_dir.as_deref());
        let Some(suite) = reducer.suite_discovered(&path) else {
            debug!("Test {} has no reportable suite", test.id);
            return;
        };
        let leaf_is_describe = test
            .suites
            .iter()
            .rev()
            .find(|s| s.location.is_some() && !s.title.is_empty())
            .is_some_and(|s| s.kind != "file");
        if leaf_is_describe
            && let Some(options) = test.project_name.as_ref().and_then(|p| self.project_options.get(p))
        {
            apply_suite_attributes(reducer, suite, options);
        }

        let suite_fqn = reducer.suite_fqn(suite).unwrap_or_default().to_string();
        let mut spec = CaseSpec::new(&test.title, format!("{}#{}", suite_fqn, title_hash(&test.title)));
        if let Some(location) = &test.location {
            spec = spec.with_location(self.code_location(location, test_dir.as_deref()));
        }
        if let Some(start) = start {
            spec = spec.started_at(start);
        }
        if reducer.case_start(&test.id, spec, suite, retry).is_some() {
            self.running.insert(test.id, test_dir);
        }
    }

    fn on_test_end(&mut self, reducer: &mut Reducer, test_id: String, result: PwTestResult) {
        if !reducer.is_case_in_flight(&test_id) {
            debug!("Ignoring end of unknown test {}", test_id);
            return;
        }
        let status = ResultStatus::from_native(&result.status);

        for attachment in &result.attachments {
            if let Some(file) = case_attachment(attachment) {
                reducer.attach(AttachmentTarget::Case(test_id.clone()), PendingAttachment::File(file));
            }
        }

        let screenshot = if status.is_failed() {
            result
                .attachments
                .iter()
                .find(|a| a.name == "screenshot")
                .and_then(|a| a.path.clone())
        } else {
            None
        };
        let test_dir = self.running.remove(&test_id).flatten();
        for step in &result.steps {
            self.record_step(
                reducer,
                StepParent::Case(test_id.clone()),
                step,
                test_dir.as_deref(),
                screenshot.as_deref(),
            );
        }

        let mut outcome = Outcome::status(status);
        if status.is_failed()
            && let Some(error) = &result.error
        {
            let kind = if result.status == "timedOut" {
                TIMEOUT_ERROR
            } else {
                error_kind(error, false)
            };
            outcome = outcome.with_failure(self.failure(error, kind));
        }
        if let (Some(start), Some(duration)) = (result.start_time, result.duration) {
            outcome = outcome.at(start.saturating_add(duration));
        }
        reducer.case_end(&test_id, outcome);
    }

    fn record_step(
        &self,
        reducer: &mut Reducer,
        parent: StepParent,
        step: &PwStep,
        test_dir: Option<&str>,
        screenshot: Option<&str>,
    ) -> Option<StepId> {
        if !REPORTED_STEP_CATEGORIES.contains(&step.category.as_str()) {
            return None;
        }
        let mut spec = StepSpec::new(&step.title, step_type(&step.category));
        if let Some(location) = &step.location {
            spec = spec.with_location(self.code_location(location, test_dir));
        }
        let failed = step.error.is_some() || has_failed_child(step);
        let mut outcome = Outcome::status(if failed {
            ResultStatus::Failed
        } else {
            ResultStatus::Passed
        });
        if let Some(error) = &step.error {
            let kind = error_kind(error, step.category == "expect");
            outcome = outcome.with_failure(self.failure(error, kind));
        }
        let start = step.start_time.unwrap_or_else(|| reducer.now_millis());
        let id = reducer.record_step(parent, spec, start, step.duration, outcome)?;

        if step.error.is_some()
            && let Some(path) = screenshot
        {
            let file = Attachment::from_path(AttachmentType::Screenshot, AttachmentSubType::Screenshot, path);
            reducer.step_attachment(id, PendingAttachment::File(file));
        }

        // the screenshot belongs to the outermost failing step
        let child_screenshot = if step.error.is_some() { None } else { screenshot };
        for child in &step.steps {
            self.record_step(reducer, StepParent::Node(id), child, test_dir, child_screenshot);
        }
        Some(id)
    }

    fn failure(&self, error: &PwError, kind: &str) -> FailureResult {
        let message = error.message.as_deref().map(strip_ansi);
        let stack = error.stack.as_deref().map(strip_ansi).map(|stack| {
            let prefix = message
                .as_deref()
                .filter(|m| stack.starts_with(m))
                .map(str::len);
            match prefix {
                Some(len) if self.root_dir.is_empty() => stack[len..].to_string(),
                Some(len) => stack[len..].replace(&self.root_dir, ""),
                None => stack,
            }
        });
        FailureResult {
            subtype: Some(error_subtype(message.as_deref())),
            snippet: error.snippet.clone(),
            message,
            stacktrace: stack,
            ..FailureResult::new(kind)
        }
    }

    fn on_stdout(&mut self, reducer: &mut Reducer, chunk: String, test_id: Option<String>) {
        let Some(test_id) = test_id else {
            return;
        };
        match serde_json::from_str::<HelperMessage>(&chunk) {
            Ok(message) => self.on_helper_message(reducer, &test_id, message),
            Err(_) => {
                if !chunk.is_empty() {
                    let entry = LogEntry::new(reducer.now_millis(), None, chunk, "user");
                    reducer.case_log(&test_id, entry);
                }
            }
        }
    }

    fn on_helper_message(&mut self, reducer: &mut Reducer, test_id: &str, message: HelperMessage) {
        let data = &message.data;
        match message.kind.as_str() {
            "setFailureReason" => {
                if let Some(reason) = data.get("reason").and_then(failure_reason_id) {
                    reducer.case_failure_reason(test_id, reason);
                }
            }
            "addTestAttribute" => {
                let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
                let value = data.get("value").cloned().unwrap_or(Value::Null);
                if !name.is_empty() && is_truthy(&value) {
                    reducer.case_attribute(test_id, name, value);
                }
            }
            "addOutputData" => {
                let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
                let output = data.get("data").cloned().unwrap_or(Value::Null);
                if !name.is_empty() && is_truthy(&output) {
                    reducer.case_output_data(test_id, name, output);
                }
            }
            "addConsoleLog" => {
                let text = data.get("message").and_then(Value::as_str).unwrap_or_default();
                if !text.is_empty() {
                    let level = data.get("type").and_then(Value::as_str);
                    let entry = LogEntry::new(reducer.now_millis(), level, text, "browser");
                    reducer.case_log(test_id, entry);
                }
            }
            other => debug!("Ignoring helper message {}", other),
        }
    }
}

impl Normalizer for PlaywrightNormalizer {
    type Event = PlaywrightEvent;

    const FRAMEWORK: Framework = Framework::Playwright;

    fn handle(&mut self, reducer: &mut Reducer, event: PlaywrightEvent) -> Option<RunResult> {
        match event {
            PlaywrightEvent::Begin {
                config,
                total_tests,
                start_time,
            } => self.on_begin(reducer, config, total_tests, start_time),
            PlaywrightEvent::TestBegin {
                test,
                retry,
                start_time,
            } => self.on_test_begin(reducer, test, retry, start_time),
            PlaywrightEvent::TestEnd { test_id, result } => self.on_test_end(reducer, test_id, result),
            PlaywrightEvent::Stdout { chunk, test_id } => self.on_stdout(reducer, chunk, test_id),
            PlaywrightEvent::End { status, end_time } => {
                let mut outcome = Outcome::native(&status);
                if let Some(end) = end_time {
                    outcome = outcome.at(end);
                }
                return reducer.run_end(outcome);
            }
        }
        None
    }
}

/// `<testDirName>\<path relative to testDir>` with backslash separators
pub fn relative_location(file: &str, test_dir: Option<&str>) -> String {
    let Some(test_dir) = test_dir else {
        return file.to_string();
    };
    let file = FileUtils::normalize_path_separators(file);
    let test_dir = FileUtils::normalize_path_separators(test_dir);
    let test_dir = test_dir.trim_end_matches('/');
    let dir_name = test_dir.rsplit('/').next().unwrap_or_default();
    let relative = file
        .strip_prefix(test_dir)
        .map(|r| r.trim_start_matches('/'))
        .unwrap_or(file.as_str());
    std::iter::once(dir_name)
        .chain(relative.split('/'))
        .collect::<Vec<_>>()
        .join("\\")
}

fn step_type(category: &str) -> StepType {
    match category {
        "expect" => StepType::Assertion,
        "hook" => StepType::Hook,
        "test.step" => StepType::Transaction,
        _ => StepType::General,
    }
}

fn error_kind(error: &PwError, is_expect: bool) -> &'static str {
    if is_expect {
        ASSERT_ERROR
    } else if error
        .message
        .as_deref()
        .is_some_and(|m| m.starts_with("TimeoutError:"))
    {
        TIMEOUT_ERROR
    } else {
        GENERAL_ERROR
    }
}

fn has_failed_child(step: &PwStep) -> bool {
    step.steps
        .iter()
        .filter(|s| REPORTED_STEP_CATEGORIES.contains(&s.category.as_str()))
        .any(|s| s.error.is_some() || has_failed_child(s))
}

fn case_attachment(attachment: &PwAttachment) -> Option<Attachment> {
    let path = attachment.path.as_deref()?;
    match attachment.name.as_str() {
        "video" => Some(Attachment::from_path(
            AttachmentType::Video,
            AttachmentSubType::Screencast,
            path,
        )),
        "trace" => Some(Attachment::from_path(
            AttachmentType::Other,
            AttachmentSubType::PlaywrightTrace,
            path,
        )),
        _ => None,
    }
}

/// Reason id from its name or numeric value
pub fn failure_reason_id(reason: &Value) -> Option<u32> {
    match reason {
        Value::Number(n) => n
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .filter(|id| FAILURE_REASONS.iter().any(|(_, known)| known == id)),
        Value::String(name) => FAILURE_REASONS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id),
        _ => None,
    }
}

fn apply_suite_attributes(reducer: &mut Reducer, suite: SuiteId, options: &Map<String, Value>) {
    let browser = ["browserName", "defaultBrowserType", "channel"]
        .iter()
        .find_map(|key| options.get(*key).filter(|v| is_truthy(v)))
        .cloned()
        .unwrap_or(Value::Null);
    reducer.suite_attribute(suite, "pw", Value::Object(options.clone()));
    reducer.suite_attribute(suite, "browserName", browser);
    reducer.suite_attribute(
        suite,
        "resolution",
        options.get("viewport").cloned().unwrap_or(Value::Null),
    );
}

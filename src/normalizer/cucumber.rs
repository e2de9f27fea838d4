// Cucumber messages normalizer
//
// Feature files become suites keyed by URI, pickles become cases with fqn
// `uri:name`, and test steps become GHERKIN steps keyed per attempt as
// `testCaseStartedId:testStepId`.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::common::{NativeException, failure_from_exception};
use super::instrumentation::classify;
use super::{Framework, Normalizer};
use crate::reducer::{
    AttachmentTarget, CaseSpec, Outcome, Reducer, StepParent, StepSpec, SuiteId, SuiteSegment,
};
use crate::state::{
    FailureResult, GherkinKeyword, GherkinStepExtra, ResultStatus, RunResult, StepExtra, StepType,
};

pub const CUCUMBER_ERROR: &str = "CUCUMBER_ERROR";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Timestamp {
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i64,
}

impl Timestamp {
    pub fn millis(&self) -> i64 {
        self.seconds
            .saturating_mul(1000)
            .saturating_add(self.nanos / 1_000_000)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Location {
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GherkinDocument {
    pub uri: String,
    #[serde(default)]
    pub feature: Option<Feature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub children: Vec<FeatureChild>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureChild {
    #[serde(default)]
    pub scenario: Option<ScenarioDefinition>,
    #[serde(default)]
    pub background: Option<ScenarioDefinition>,
    #[serde(default)]
    pub rule: Option<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub children: Vec<FeatureChild>,
}

/// Scenario or background
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioDefinition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub steps: Vec<GherkinStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GherkinStep {
    #[serde(default)]
    pub id: Option<String>,
    pub location: Location,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pickle {
    pub id: String,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<PickleStep>,
    #[serde(default)]
    pub ast_node_ids: Vec<String>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickleStep {
    pub id: String,
    pub text: String,
    #[serde(rename = "type", default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub ast_node_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hook {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub pickle_id: String,
    #[serde(default)]
    pub test_steps: Vec<TestStep>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub id: String,
    #[serde(default)]
    pub pickle_step_id: Option<String>,
    #[serde(default)]
    pub hook_id: Option<String>,
    #[serde(default)]
    pub step_definition_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestRunStarted {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunFinished {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseStarted {
    pub id: String,
    pub test_case_id: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseFinished {
    pub test_case_started_id: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub result: Option<TestStepResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStepStarted {
    pub test_case_started_id: String,
    pub test_step_id: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStepFinished {
    pub test_case_started_id: String,
    pub test_step_id: String,
    pub test_step_result: TestStepResult,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestStepResult {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub exception: Option<NativeException>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CucumberAttachment {
    pub body: String,
    pub media_type: String,
    #[serde(default)]
    pub test_case_started_id: Option<String>,
    #[serde(default)]
    pub test_step_id: Option<String>,
}

/// One Cucumber message envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CucumberEnvelope {
    Meta(Value),
    Source(Value),
    GherkinDocument(GherkinDocument),
    Pickle(Pickle),
    StepDefinition(Value),
    Hook(Hook),
    ParameterType(Value),
    UndefinedParameterType(Value),
    TestRunStarted(TestRunStarted),
    TestCase(TestCase),
    TestCaseStarted(TestCaseStarted),
    TestStepStarted(TestStepStarted),
    TestStepFinished(TestStepFinished),
    Attachment(CucumberAttachment),
    TestCaseFinished(TestCaseFinished),
    TestRunHookStarted(Value),
    TestRunHookFinished(Value),
    TestRunFinished(TestRunFinished),
}

#[derive(Default)]
pub struct CucumberNormalizer {
    ast_lines: HashMap<String, u32>,
    pickles: HashMap<String, Pickle>,
    test_cases: HashMap<String, TestCase>,
    hooks: HashMap<String, Option<String>>,
    /// testCaseStartedId -> testCaseId, while the attempt runs
    started: HashMap<String, String>,
    /// Failures of steps not reported as steps, by attempt
    hidden_failures: HashMap<String, FailureResult>,
}

impl CucumberNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn step_key(started_id: &str, test_step_id: &str) -> String {
        format!("{}:{}", started_id, test_step_id)
    }

    fn on_gherkin_document(&mut self, reducer: &mut Reducer, document: GherkinDocument) {
        let Some(feature) = document.feature else {
            return;
        };
        index_lines(&feature.children, &mut self.ast_lines);
        reducer.suite_discovered(&[
            SuiteSegment::new(&document.uri, &feature.name).with_location(&document.uri)
        ]);
    }

    fn suite_for(&self, reducer: &mut Reducer, uri: &str) -> Option<SuiteId> {
        match reducer.suite_by_key(uri) {
            Some(id) => Some(id),
            None => reducer.suite_discovered(&[SuiteSegment::new(uri, uri).with_location(uri)]),
        }
    }

    fn case_spec(&self, pickle: &Pickle) -> CaseSpec {
        let line = pickle.locations.first().map(|l| l.line).or_else(|| {
            pickle
                .ast_node_ids
                .iter()
                .find_map(|id| self.ast_lines.get(id).copied())
        });
        let spec = CaseSpec::new(&pickle.name, format!("{}:{}", pickle.uri, pickle.name));
        match line {
            Some(line) => spec.with_location(format!("{}:{}", pickle.uri, line)),
            None => spec,
        }
    }

    fn on_test_case(&mut self, reducer: &mut Reducer, test_case: TestCase) {
        if let Some(pickle) = self.pickles.get(&test_case.pickle_id) {
            let spec = self.case_spec(pickle);
            if let Some(suite) = self.suite_for(reducer, &pickle.uri) {
                reducer.case_pending(&test_case.id, spec, suite);
            }
        }
        self.test_cases.insert(test_case.id.clone(), test_case);
    }

    fn on_test_case_started(&mut self, reducer: &mut Reducer, started: TestCaseStarted) {
        let start_time = started.timestamp.map(|t| t.millis());
        let case = reducer
            .case_start_pending(&started.id, &started.test_case_id, started.attempt, start_time)
            .or_else(|| {
                // testCase or pickle arrived late
                let test_case = self.test_cases.get(&started.test_case_id)?;
                let pickle = self.pickles.get(&test_case.pickle_id)?;
                let mut spec = self.case_spec(pickle);
                spec.start_time = start_time;
                let suite = self.suite_for(reducer, &pickle.uri)?;
                reducer.case_start(&started.id, spec, suite, started.attempt)
            });
        if case.is_none() {
            debug!("Cannot resolve test case {}", started.test_case_id);
            return;
        }
        self.started.insert(started.id, started.test_case_id);
    }

    fn step_spec(&self, started_id: &str, test_step_id: &str, reducer: &Reducer) -> Option<StepSpec> {
        let test_case = self.test_cases.get(self.started.get(started_id)?)?;
        let test_step = test_case.test_steps.iter().find(|s| s.id == test_step_id)?;

        if let Some(hook_id) = &test_step.hook_id {
            let name = self
                .hooks
                .get(hook_id)
                .cloned()
                .flatten()
                .unwrap_or_else(|| "Hook".to_string());
            return Some(StepSpec::new(name, StepType::Hook));
        }

        if test_step.step_definition_ids.is_empty() {
            return None;
        }
        let pickle = self.pickles.get(&test_case.pickle_id)?;
        let pickle_step = pickle
            .steps
            .iter()
            .find(|s| Some(&s.id) == test_step.pickle_step_id.as_ref())?;

        let case_fqn = reducer.case_fqn(started_id).unwrap_or_default();
        let mut spec = StepSpec::new(&pickle_step.text, StepType::Gherkin)
            .with_fqn(format!("{}:{}", case_fqn, pickle_step.text))
            .with_extra(StepExtra {
                gherkin: Some(GherkinStepExtra {
                    keyword: pickle_step
                        .step_type
                        .as_deref()
                        .and_then(GherkinKeyword::from_pickle_type),
                }),
                ..Default::default()
            });
        if let Some(line) = pickle_step
            .ast_node_ids
            .iter()
            .find_map(|id| self.ast_lines.get(id))
        {
            spec = spec.with_location(format!("{}:{}", pickle.uri, line));
        }
        Some(spec)
    }

    fn on_test_step_started(&mut self, reducer: &mut Reducer, event: TestStepStarted) {
        let Some(mut spec) = self.step_spec(&event.test_case_started_id, &event.test_step_id, reducer)
        else {
            return;
        };
        if let Some(ts) = event.timestamp {
            spec = spec.started_at(ts.millis());
        }
        let key = Self::step_key(&event.test_case_started_id, &event.test_step_id);
        reducer.step_start(
            &key,
            StepParent::Case(event.test_case_started_id.clone()),
            spec,
        );
    }

    fn on_test_step_finished(&mut self, reducer: &mut Reducer, event: TestStepFinished) {
        let result = &event.test_step_result;
        let status = ResultStatus::from_native(&result.status);
        let mut outcome = Outcome::status(status);
        if status.is_failed() {
            let failure = step_failure(result);
            outcome = outcome.with_failure(failure);
        }
        if let Some(ts) = event.timestamp {
            outcome = outcome.at(ts.millis());
        }

        let key = Self::step_key(&event.test_case_started_id, &event.test_step_id);
        if reducer.has_open_step(&key) {
            reducer.step_end(&key, outcome);
        } else if let Some(failure) = outcome.failure {
            // undefined or ambiguous steps are not reported but still fail the case
            self.hidden_failures
                .entry(event.test_case_started_id)
                .or_insert(failure);
        }
    }

    fn on_attachment(&mut self, reducer: &mut Reducer, attachment: CucumberAttachment) {
        let Some(started_id) = attachment.test_case_started_id else {
            debug!("Ignoring attachment outside of a test case");
            return;
        };
        let Some(pending) = classify(&attachment.media_type, &attachment.body) else {
            debug!("Ignoring unreadable {} attachment", attachment.media_type);
            return;
        };
        let target = match attachment.test_step_id {
            Some(step_id) => AttachmentTarget::Step {
                step: Self::step_key(&started_id, &step_id),
                case: started_id,
            },
            None => AttachmentTarget::Case(started_id),
        };
        reducer.attach(target, pending);
    }

    fn on_test_case_finished(&mut self, reducer: &mut Reducer, event: TestCaseFinished) {
        let started_id = event.test_case_started_id;
        self.started.remove(&started_id);
        let hidden = self.hidden_failures.remove(&started_id);

        let mut outcome = match (event.result, hidden) {
            (Some(result), hidden) => {
                let status = ResultStatus::from_native(&result.status);
                let has_details = result.exception.is_some()
                    || result.message.as_deref().is_some_and(|m| !m.is_empty());
                // an unreported undefined step fails the case whatever the summary says
                if !status.is_failed() && hidden.is_none() {
                    Outcome::status(status)
                } else if has_details {
                    Outcome::failed(Some(step_failure(&result)))
                } else {
                    Outcome::failed(Some(hidden.unwrap_or_else(|| step_failure(&result))))
                }
            }
            (None, Some(failure)) => Outcome::failed(Some(failure)),
            (None, None) => Outcome::derived(),
        };
        if let Some(ts) = event.timestamp {
            outcome = outcome.at(ts.millis());
        }
        reducer.case_end(&started_id, outcome);
    }

    fn on_test_run_finished(&mut self, reducer: &mut Reducer, event: TestRunFinished) -> Option<RunResult> {
        let mut outcome = match event.success {
            Some(false) => Outcome::failed(
                event
                    .message
                    .map(|m| FailureResult::with_message(CUCUMBER_ERROR, m)),
            ),
            _ => Outcome::derived(),
        };
        if let Some(ts) = event.timestamp {
            outcome = outcome.at(ts.millis());
        }
        self.started.clear();
        self.hidden_failures.clear();
        reducer.run_end(outcome)
    }
}

impl Normalizer for CucumberNormalizer {
    type Event = CucumberEnvelope;

    const FRAMEWORK: Framework = Framework::Cucumber;

    fn handle(&mut self, reducer: &mut Reducer, event: CucumberEnvelope) -> Option<RunResult> {
        match event {
            CucumberEnvelope::GherkinDocument(document) => {
                self.on_gherkin_document(reducer, document)
            }
            CucumberEnvelope::Pickle(pickle) => {
                self.pickles.insert(pickle.id.clone(), pickle);
            }
            CucumberEnvelope::Hook(hook) => {
                self.hooks.insert(hook.id, hook.name);
            }
            CucumberEnvelope::TestRunStarted(started) => match started.timestamp {
                Some(ts) => reducer.on_run_start_at(ts.millis()),
                None => reducer.on_run_start(),
            },
            CucumberEnvelope::TestCase(test_case) => self.on_test_case(reducer, test_case),
            CucumberEnvelope::TestCaseStarted(started) => self.on_test_case_started(reducer, started),
            CucumberEnvelope::TestStepStarted(event) => self.on_test_step_started(reducer, event),
            CucumberEnvelope::TestStepFinished(event) => self.on_test_step_finished(reducer, event),
            CucumberEnvelope::Attachment(attachment) => self.on_attachment(reducer, attachment),
            CucumberEnvelope::TestCaseFinished(event) => self.on_test_case_finished(reducer, event),
            CucumberEnvelope::TestRunFinished(event) => {
                return self.on_test_run_finished(reducer, event);
            }
            CucumberEnvelope::Meta(_)
            | CucumberEnvelope::Source(_)
            | CucumberEnvelope::StepDefinition(_)
            | CucumberEnvelope::ParameterType(_)
            | CucumberEnvelope::UndefinedParameterType(_)
            | CucumberEnvelope::TestRunHookStarted(_)
            | CucumberEnvelope::TestRunHookFinished(_) => {}
        }
        None
    }
}

fn index_lines(children: &[FeatureChild], lines: &mut HashMap<String, u32>) {
    for child in children {
        for definition in child.scenario.iter().chain(child.background.iter()) {
            if let (Some(id), Some(location)) = (&definition.id, definition.location) {
                lines.insert(id.clone(), location.line);
            }
            for step in &definition.steps {
                if let Some(id) = &step.id {
                    lines.insert(id.clone(), step.location.line);
                }
            }
        }
        if let Some(rule) = &child.rule {
            index_lines(&rule.children, lines);
        }
    }
}

fn step_failure(result: &TestStepResult) -> FailureResult {
    if let Some(exception) = &result.exception {
        return failure_from_exception(exception, CUCUMBER_ERROR);
    }
    match &result.message {
        Some(message) if !message.is_empty() => FailureResult::with_message(CUCUMBER_ERROR, message),
        _ => FailureResult::with_message(
            CUCUMBER_ERROR,
            format!("Step finished with status {}", result.status),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_millis_saturates() {
        let huge = Timestamp {
            seconds: 9_223_372_036_854_775,
            nanos: 999_000_000,
        };
        assert_eq!(huge.millis(), i64::MAX);
        let low = Timestamp {
            seconds: i64::MIN / 10,
            nanos: 0,
        };
        assert_eq!(low.millis(), i64::MIN);
    }

    #[test]
    fn test_envelope_variants() {
        let envelope: CucumberEnvelope = serde_json::from_value(json!({
            "testCaseStarted": {"id": "s1", "testCaseId": "tc1", "attempt": 1,
                "timestamp": {"seconds": 2, "nanos": 500000000}}
        }))
        .unwrap();
        match envelope {
            CucumberEnvelope::TestCaseStarted(started) => {
                assert_eq!(started.attempt, 1);
                assert_eq!(started.timestamp.unwrap().millis(), 2_500);
            }
            other => panic!("unexpected envelope {:?}", other),
        }

        let meta: CucumberEnvelope =
            serde_json::from_value(json!({"meta": {"protocolVersion": "24.0.0"}})).unwrap();
        assert!(matches!(meta, CucumberEnvelope::Meta(_)));
    }

    #[test]
    fn test_step_failure_prefers_exception() {
        let result = TestStepResult {
            status: "FAILED".into(),
            message: Some("boom".into()),
            exception: Some(NativeException {
                kind: Some("AssertionError".into()),
                message: Some("expected 1 to equal 2".into()),
                stack_trace: None,
            }),
        };
        let failure = step_failure(&result);
        assert_eq!(failure.kind, CUCUMBER_ERROR);
        assert_eq!(failure.subtype.as_deref(), Some("AssertionError"));

        let undefined = TestStepResult {
            status: "UNDEFINED".into(),
            message: None,
            exception: None,
        };
        assert_eq!(
            step_failure(&undefined).message.as_deref(),
            Some("Step finished with status UNDEFINED")
        );
    }

    #[test]
    fn test_index_lines_walks_rules() {
        let children: Vec<FeatureChild> = serde_json::from_value(json!([
            {"background": {"id": "bg", "location": {"line": 2}, "steps": [
                {"id": "b1", "location": {"line": 3}, "text": "a user"}]}},
            {"rule": {"children": [
                {"scenario": {"id": "sc", "location": {"line": 6}, "steps": [
                    {"id": "s1", "location": {"line": 7}, "text": "it works"}]}}
            ]}}
        ]))
        .unwrap();
        let mut lines = HashMap::new();
        index_lines(&children, &mut lines);
        assert_eq!(lines.get("b1"), Some(&3));
        assert_eq!(lines.get("sc"), Some(&6));
        assert_eq!(lines.get("s1"), Some(&7));
    }
}

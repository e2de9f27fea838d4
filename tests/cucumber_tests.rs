// Tests for the Cucumber messages normalizer - public API only

use std::sync::Arc;

use serde_json::{Value, json};
use testpulse::config::RunIdentity;
use testpulse::emitter::NoopEmitter;
use testpulse::normalizer::cucumber::CUCUMBER_ERROR;
use testpulse::normalizer::{CucumberNormalizer, LineNormalizer};
use testpulse::reducer::Reducer;
use testpulse::state::{GherkinKeyword, ResultStatus, RunResult, StepType};
use testpulse::time::ManualClock;

fn setup() -> (CucumberNormalizer, Reducer) {
    let reducer = Reducer::new(
        RunIdentity::local(),
        Arc::new(ManualClock::new(0)),
        Arc::new(NoopEmitter),
    );
    (CucumberNormalizer::new(), reducer)
}

fn ts(millis: i64) -> Value {
    json!({"seconds": millis / 1000, "nanos": (millis % 1000) * 1_000_000})
}

fn feed_all(
    normalizer: &mut CucumberNormalizer,
    reducer: &mut Reducer,
    messages: Vec<Value>,
) -> Option<RunResult> {
    let mut result = None;
    for message in messages {
        if let Some(run) = normalizer.handle_value(reducer, message).unwrap() {
            result = Some(run);
        }
    }
    result
}

fn login_definitions() -> Vec<Value> {
    vec![
        json!({"meta": {"protocolVersion": "24.0.0"}}),
        json!({"gherkinDocument": {
            "uri": "features/login.feature",
            "feature": {
                "name": "Login",
                "children": [{"scenario": {
                    "id": "sc1",
                    "location": {"line": 3},
                    "steps": [
                        {"id": "g1", "location": {"line": 4}, "text": "I open the login page"},
                        {"id": "g2", "location": {"line": 5}, "text": "the title is Login"}
                    ]
                }}]
            }
        }}),
        json!({"pickle": {
            "id": "p1",
            "uri": "features/login.feature",
            "name": "user can log in",
            "astNodeIds": ["sc1"],
            "steps": [
                {"id": "ps1", "text": "I open the login page", "type": "Action", "astNodeIds": ["g1"]},
                {"id": "ps2", "text": "the title is Login", "type": "Outcome", "astNodeIds": ["g2"]}
            ]
        }}),
        json!({"hook": {"id": "h1", "name": "open browser"}}),
        json!({"testCase": {
            "id": "tc1",
            "pickleId": "p1",
            "testSteps": [
                {"id": "ts0", "hookId": "h1"},
                {"id": "ts1", "pickleStepId": "ps1", "stepDefinitionIds": ["sd1"]},
                {"id": "ts2", "pickleStepId": "ps2", "stepDefinitionIds": ["sd2"]}
            ]
        }}),
    ]
}

fn step(started: &str, step: &str, status: &str, at: i64) -> Vec<Value> {
    vec![
        json!({"testStepStarted": {"testCaseStartedId": started, "testStepId": step, "timestamp": ts(at)}}),
        json!({"testStepFinished": {
            "testCaseStartedId": started,
            "testStepId": step,
            "testStepResult": {"status": status},
            "timestamp": ts(at + 10)
        }}),
    ]
}

#[test]
fn test_passing_scenario_builds_tree() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    messages.push(json!({"testRunStarted": {"timestamp": ts(1_000)}}));
    messages.push(json!({"testCaseStarted": {"id": "a1", "testCaseId": "tc1", "attempt": 0, "timestamp": ts(1_100)}}));
    messages.extend(step("a1", "ts0", "PASSED", 1_100));
    messages.extend(step("a1", "ts1", "PASSED", 1_200));
    messages.extend(step("a1", "ts2", "PASSED", 1_300));
    messages.push(json!({"testCaseFinished": {"testCaseStartedId": "a1", "timestamp": ts(1_400)}}));
    messages.push(json!({"testRunFinished": {"success": true, "timestamp": ts(1_500)}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    assert_eq!(run.status, Some(ResultStatus::Passed));
    assert_eq!(run.start_time, 1_000);
    assert_eq!(run.duration, Some(500));

    let suite = &run.suites[0];
    assert_eq!(suite.name, "Login");
    assert_eq!(suite.fqn, "features/login.feature");
    assert_eq!(suite.status, Some(ResultStatus::Passed));

    let case = &suite.cases[0];
    assert_eq!(case.fqn, "features/login.feature:user can log in");
    assert_eq!(case.location.as_deref(), Some("features/login.feature:3"));
    assert_eq!(case.duration, Some(300));

    assert_eq!(case.steps.len(), 3);
    assert_eq!(case.steps[0].step_type, StepType::Hook);
    assert_eq!(case.steps[0].name, "open browser");
    let gherkin = &case.steps[1];
    assert_eq!(gherkin.step_type, StepType::Gherkin);
    assert_eq!(gherkin.name, "I open the login page");
    assert_eq!(gherkin.location.as_deref(), Some("features/login.feature:4"));
    assert_eq!(
        gherkin.extra.as_ref().unwrap().gherkin.as_ref().unwrap().keyword,
        Some(GherkinKeyword::When)
    );
    assert_eq!(gherkin.duration, Some(10));
}

#[test]
fn test_failed_step_fails_case_and_feature() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    messages.push(json!({"testRunStarted": {"timestamp": ts(1_000)}}));
    messages.push(json!({"testCaseStarted": {"id": "a1", "testCaseId": "tc1", "attempt": 0, "timestamp": ts(1_000)}}));
    messages.extend(step("a1", "ts1", "PASSED", 1_000));
    messages.push(json!({"testStepStarted": {"testCaseStartedId": "a1", "testStepId": "ts2", "timestamp": ts(1_100)}}));
    messages.push(json!({"testStepFinished": {
        "testCaseStartedId": "a1",
        "testStepId": "ts2",
        "testStepResult": {
            "status": "FAILED",
            "message": "expected 'Home' to equal 'Login'",
            "exception": {"type": "AssertionError", "message": "expected 'Home' to equal 'Login'"}
        },
        "timestamp": ts(1_150)
    }}));
    messages.push(json!({"testCaseFinished": {"testCaseStartedId": "a1", "timestamp": ts(1_200)}}));
    messages.push(json!({"testRunFinished": {"success": false, "timestamp": ts(1_300)}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    let suite = &run.suites[0];
    assert_eq!(suite.status, Some(ResultStatus::Failed));
    let case = &suite.cases[0];
    assert_eq!(case.status, Some(ResultStatus::Failed));
    let failed = &case.steps[1];
    assert_eq!(failed.status, Some(ResultStatus::Failed));
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failure.kind, CUCUMBER_ERROR);
    assert_eq!(failure.subtype.as_deref(), Some("AssertionError"));
    assert_eq!(run.status, Some(ResultStatus::Failed));
}

#[test]
fn test_undefined_step_fails_case_without_step() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    messages.push(json!({"testCase": {
        "id": "tc2",
        "pickleId": "p1",
        "testSteps": [{"id": "u1", "pickleStepId": "ps1", "stepDefinitionIds": []}]
    }}));
    messages.push(json!({"testCaseStarted": {"id": "a2", "testCaseId": "tc2", "attempt": 0}}));
    messages.extend(step("a2", "u1", "UNDEFINED", 0));
    messages.push(json!({"testCaseFinished": {"testCaseStartedId": "a2"}}));
    messages.push(json!({"testRunFinished": {}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    let case = &run.suites[0].cases[0];
    assert!(case.steps.is_empty());
    assert_eq!(case.status, Some(ResultStatus::Failed));
    assert_eq!(
        case.failure.as_ref().unwrap().message.as_deref(),
        Some("Step finished with status UNDEFINED")
    );
}

#[test]
fn test_case_result_status_maps_natively() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    messages.push(json!({"testCase": {
        "id": "tc2",
        "pickleId": "p1",
        "testSteps": [{"id": "u1", "pickleStepId": "ps1", "stepDefinitionIds": []}]
    }}));
    messages.push(json!({"testCaseStarted": {"id": "a1", "testCaseId": "tc1", "attempt": 0}}));
    messages.extend(step("a1", "ts1", "SKIPPED", 0));
    messages.push(json!({"testCaseFinished": {
        "testCaseStartedId": "a1",
        "result": {"status": "SKIPPED"}
    }}));
    messages.push(json!({"testCaseStarted": {"id": "a2", "testCaseId": "tc2", "attempt": 0}}));
    messages.extend(step("a2", "u1", "UNDEFINED", 0));
    messages.push(json!({"testCaseFinished": {
        "testCaseStartedId": "a2",
        "result": {"status": "UNDEFINED"}
    }}));
    messages.push(json!({"testRunFinished": {}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    let cases = &run.suites[0].cases;
    assert_eq!(cases[0].status, Some(ResultStatus::Skipped));
    assert!(cases[0].failure.is_none());
    assert_eq!(cases[1].status, Some(ResultStatus::Failed));
    assert_eq!(
        cases[1].failure.as_ref().unwrap().message.as_deref(),
        Some("Step finished with status UNDEFINED")
    );
    assert_eq!(run.status, Some(ResultStatus::Failed));
}

#[test]
fn test_case_result_passed_keeps_hidden_step_failure() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    messages.push(json!({"testCase": {
        "id": "tc2",
        "pickleId": "p1",
        "testSteps": [{"id": "u1", "pickleStepId": "ps1", "stepDefinitionIds": []}]
    }}));
    messages.push(json!({"testCaseStarted": {"id": "a1", "testCaseId": "tc2", "attempt": 0}}));
    messages.extend(step("a1", "u1", "AMBIGUOUS", 0));
    messages.push(json!({"testCaseFinished": {
        "testCaseStartedId": "a1",
        "result": {"status": "PASSED"}
    }}));
    messages.push(json!({"testRunFinished": {}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    let case = &run.suites[0].cases[0];
    assert_eq!(case.status, Some(ResultStatus::Failed));
    assert_eq!(
        case.failure.as_ref().unwrap().message.as_deref(),
        Some("Step finished with status AMBIGUOUS")
    );
}

#[test]
fn test_retry_keeps_iteration() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    for (started, attempt, status) in [("a1", 0, "FAILED"), ("a2", 1, "PASSED")] {
        messages.push(json!({"testCaseStarted": {"id": started, "testCaseId": "tc1", "attempt": attempt}}));
        messages.extend(step(started, "ts1", status, 0));
        messages.push(json!({"testCaseFinished": {"testCaseStartedId": started}}));
    }
    messages.push(json!({"testRunFinished": {}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    let cases = &run.suites[0].cases;
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].iteration_num, 1);
    assert_eq!(cases[1].iteration_num, 1);
    assert_eq!(cases[1].re_run_count, 1);
    assert_eq!(cases[0].status, Some(ResultStatus::Failed));
    assert_eq!(cases[1].status, Some(ResultStatus::Passed));
}

#[test]
fn test_attachments_reach_step_and_case() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let mut messages = login_definitions();
    messages.push(json!({"testCaseStarted": {"id": "a1", "testCaseId": "tc1", "attempt": 0}}));
    // arrives before its step starts
    messages.push(json!({"attachment": {
        "body": "{\"type\":\"locator_action\",\"method\":\"click\",\"selector\":\"#login\",\"success\":true,\"start\":1,\"end\":2}",
        "mediaType": "application/json;x-origin=cloudbeat",
        "testCaseStartedId": "a1",
        "testStepId": "ts1"
    }}));
    messages.extend(step("a1", "ts1", "PASSED", 0));
    messages.push(json!({"attachment": {
        "body": "iVBORw0KGgo=",
        "mediaType": "image/png",
        "testCaseStartedId": "a1",
        "testStepId": "ts1"
    }}));
    messages.push(json!({"attachment": {
        "body": "plain log",
        "mediaType": "text/plain",
        "testCaseStartedId": "a1"
    }}));
    messages.push(json!({"testCaseFinished": {"testCaseStartedId": "a1"}}));
    messages.push(json!({"testRunFinished": {}}));

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, messages).unwrap();

    // Assert
    let case = &run.suites[0].cases[0];
    let step = &case.steps[0];
    assert_eq!(step.steps.len(), 1);
    assert_eq!(step.steps[0].name, "click \"#login\"");
    assert_eq!(step.screenshot.as_deref(), Some("iVBORw0KGgo="));
    assert_eq!(case.attachments.len(), 1);
    assert_eq!(case.attachments[0].content.as_deref(), Some("plain log"));
}

#[test]
fn test_unknown_messages_are_rejected() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();

    // Act
    let result = normalizer.handle_line(&mut reducer, r#"{"somethingNew": {}}"#);

    // Assert
    assert!(result.is_err());
    assert!(!reducer.is_started());
}

// Tests for the Mocha / Cypress event normalizer - public API only

use std::sync::Arc;

use serde_json::{Value, json};
use testpulse::config::RunIdentity;
use testpulse::emitter::NoopEmitter;
use testpulse::normalizer::{LineNormalizer, MochaNormalizer};
use testpulse::reducer::Reducer;
use testpulse::state::{
    ASSERTION_ERROR, AttachmentType, ResultStatus, RunResult, StepType, TIMEOUT_ERROR,
};
use testpulse::time::ManualClock;
use testpulse::utils::title_hash;

const SPEC_FILE: &str = "cypress/e2e/login.cy.js";

fn setup() -> (MochaNormalizer, Reducer) {
    let reducer = Reducer::new(
        RunIdentity::local(),
        Arc::new(ManualClock::new(0)),
        Arc::new(NoopEmitter),
    );
    (MochaNormalizer::new(), reducer)
}

fn feed_all(normalizer: &mut MochaNormalizer, reducer: &mut Reducer, events: Vec<Value>) -> Option<RunResult> {
    let mut result = None;
    for event in events {
        if let Some(run) = normalizer.handle_value(reducer, event).unwrap() {
            result = Some(run);
        }
    }
    result
}

fn root_suite() -> Value {
    json!({"id": "r1", "title": "", "root": true, "file": SPEC_FILE})
}

fn login_suite() -> Value {
    json!({"id": "r2", "title": "Login", "parent": "r1"})
}

fn test(id: &str, title: &str, parent: &str) -> Value {
    json!({"id": id, "title": title, "parent": parent, "file": SPEC_FILE, "currentRetry": 0})
}

fn command(id: u32, name: &str, message: &str, state: &str) -> Value {
    json!({
        "id": id,
        "testId": "r3",
        "instrument": "command",
        "name": name,
        "message": message,
        "state": state
    })
}

#[test]
fn test_cypress_run_builds_tree() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let events = vec![
        json!({"event": "run:begin", "totalTests": 1, "startTime": 1_000}),
        json!({"event": "mocha:suite:begin", "suite": root_suite()}),
        json!({"event": "mocha:suite:begin", "suite": login_suite()}),
        json!({"event": "mocha:test:begin", "test": test("r3", "shows an error", "r2")}),
        json!({"event": "mocha:hook:begin", "hook": {"id": "h1", "title": "\"before each\" hook", "parent": "r2"}}),
        json!({"event": "mocha:hook:end", "hook": {"id": "h1", "title": "\"before each\" hook", "parent": "r2"}}),
        json!({"event": "log:added", "log": command(1, "visit", "/login", "pending")}),
        json!({"event": "log:changed", "log": command(1, "visit", "/login", "passed")}),
        json!({"event": "log:changed", "log": command(1, "visit", "/login", "passed")}),
        json!({"event": "log:added", "log": {
            "id": 2,
            "testId": "r3",
            "instrument": "command",
            "name": "assert",
            "message": "expected **Welcome** to contain **Invalid**",
            "state": "failed",
            "err": {"name": "AssertionError", "message": "expected Welcome to contain Invalid"}
        }}),
        json!({"event": "log:added", "log": {"id": 3, "testId": "r3", "instrument": "route", "name": "xhr"}}),
        json!({"event": "console:log", "message": "page ready", "level": "info"}),
        json!({"event": "screenshot", "props": {"path": "/tmp/shots/failed.png", "testId": "r3"}}),
        json!({"event": "mocha:test:fail", "test": test("r3", "shows an error", "r2"),
            "err": {"name": "AssertionError", "message": "expected Welcome to contain Invalid"}}),
        json!({"event": "mocha:test:end", "test": test("r3", "shows an error", "r2")}),
        json!({"event": "mocha:suite:end", "suite": login_suite()}),
        json!({"event": "mocha:suite:end", "suite": root_suite()}),
        json!({"event": "run:end"}),
    ];

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, events).unwrap();

    // Assert
    assert_eq!(run.status, Some(ResultStatus::Failed));
    assert_eq!(run.total_cases, Some(1));

    let file_suite = &run.suites[0];
    assert_eq!(file_suite.fqn, SPEC_FILE);
    let login = &file_suite.suites[0];
    let login_fqn = format!("{}#{}", SPEC_FILE, title_hash("Login"));
    assert_eq!(login.fqn, login_fqn);
    assert_eq!(login.location.as_deref(), Some(SPEC_FILE));
    assert_eq!(login.status, Some(ResultStatus::Failed));

    let case = &login.cases[0];
    assert_eq!(case.fqn, format!("{}#{}", login_fqn, title_hash("shows an error")));
    assert_eq!(case.location.as_deref(), Some(SPEC_FILE));
    assert_eq!(case.status, Some(ResultStatus::Failed));

    let names: Vec<&str> = case.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "\"before each\" hook",
            "visit /login",
            "assert expected **Welcome** to contain **Invalid**"
        ]
    );
    assert_eq!(case.steps[0].step_type, StepType::Hook);
    assert_eq!(case.steps[1].status, Some(ResultStatus::Passed));
    let assertion = &case.steps[2];
    assert_eq!(assertion.step_type, StepType::Assertion);
    assert_eq!(assertion.failure.as_ref().unwrap().kind, ASSERTION_ERROR);

    assert_eq!(case.logs.len(), 1);
    assert_eq!(case.logs[0].msg, "page ready");
    assert_eq!(case.attachments.len(), 1);
    assert!(matches!(case.attachments[0].attachment_type, AttachmentType::Screenshot));
}

#[test]
fn test_events_wait_for_late_suite_and_test() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let events = vec![
        json!({"event": "mocha:suite:begin", "suite": root_suite()}),
        // log first, then a test whose suite is not announced yet
        json!({"event": "log:added", "log": command(7, "click", "#submit", "passed")}),
        json!({"event": "mocha:test:begin", "test": test("r3", "submits", "r2")}),
        json!({"event": "mocha:suite:begin", "suite": login_suite()}),
        json!({"event": "mocha:test:pass", "test": test("r3", "submits", "r2")}),
        json!({"event": "mocha:test:end", "test": test("r3", "submits", "r2")}),
        json!({"event": "mocha:suite:end", "suite": login_suite()}),
        json!({"event": "run:end"}),
    ];

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, events).unwrap();

    // Assert
    let case = run.all_cases()[0];
    assert_eq!(case.name, "submits");
    assert_eq!(case.status, Some(ResultStatus::Passed));
    assert_eq!(case.steps.len(), 1);
    assert_eq!(case.steps[0].name, "click #submit");
}

#[test]
fn test_empty_suite_is_skipped() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let empty = json!({"id": "r5", "title": "Nothing here", "parent": "r1"});
    let events = vec![
        json!({"event": "mocha:suite:begin", "suite": root_suite()}),
        json!({"event": "mocha:suite:begin", "suite": empty}),
        json!({"event": "mocha:suite:end", "suite": empty}),
        json!({"event": "mocha:suite:end", "suite": root_suite()}),
        json!({"event": "run:end"}),
    ];

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, events).unwrap();

    // Assert
    let suite = &run.suites[0].suites[0];
    assert_eq!(suite.name, "Nothing here");
    assert_eq!(suite.status, Some(ResultStatus::Skipped));
    assert_eq!(suite.start_time, suite.end_time.unwrap());
    assert_eq!(run.status, Some(ResultStatus::Skipped));
}

#[test]
fn test_pending_test_without_begin_is_skipped() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let events = vec![
        json!({"event": "mocha:suite:begin", "suite": root_suite()}),
        json!({"event": "mocha:suite:begin", "suite": login_suite()}),
        json!({"event": "mocha:test:pending", "test": test("r4", "is not ready", "r2")}),
        json!({"event": "mocha:suite:end", "suite": login_suite()}),
        json!({"event": "run:end"}),
    ];

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, events).unwrap();

    // Assert
    let case = run.all_cases()[0];
    assert_eq!(case.status, Some(ResultStatus::Skipped));
    assert!(reducer.is_finished());
}

#[test]
fn test_failing_hook_fails_current_test() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let hook = json!({"id": "h2", "title": "\"before each\" hook", "parent": "r2"});
    let events = vec![
        json!({"event": "mocha:suite:begin", "suite": root_suite()}),
        json!({"event": "mocha:suite:begin", "suite": login_suite()}),
        json!({"event": "mocha:test:begin", "test": test("r3", "loads", "r2")}),
        json!({"event": "mocha:hook:begin", "hook": hook}),
        json!({"event": "mocha:test:fail",
            "test": {"id": "h2", "title": "\"before each\" hook", "type": "hook", "parent": "r2"},
            "err": {"name": "CypressError", "message": "Timed out retrying after 4000ms"}}),
        json!({"event": "mocha:suite:end", "suite": login_suite()}),
        json!({"event": "run:end"}),
    ];

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, events).unwrap();

    // Assert
    let case = run.all_cases()[0];
    assert_eq!(case.status, Some(ResultStatus::Failed));
    let hook_step = &case.steps[0];
    assert_eq!(hook_step.status, Some(ResultStatus::Failed));
    assert_eq!(hook_step.failure.as_ref().unwrap().kind, TIMEOUT_ERROR);
}

#[test]
fn test_next_begin_closes_dangling_test() {
    // Arrange
    let (mut normalizer, mut reducer) = setup();
    let events = vec![
        json!({"event": "mocha:suite:begin", "suite": root_suite()}),
        json!({"event": "mocha:suite:begin", "suite": login_suite()}),
        json!({"event": "mocha:test:begin", "test": test("r3", "first", "r2")}),
        json!({"event": "mocha:test:pass", "test": test("r3", "first", "r2")}),
        json!({"event": "mocha:test:begin", "test": test("r4", "second", "r2")}),
        json!({"event": "mocha:test:end", "test": test("r4", "second", "r2")}),
        json!({"event": "run:end"}),
    ];

    // Act
    let run = feed_all(&mut normalizer, &mut reducer, events).unwrap();

    // Assert
    let cases = run.all_cases();
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0].name, "first");
    assert_eq!(cases[0].status, Some(ResultStatus::Passed));
    assert_eq!(cases[1].status, Some(ResultStatus::Passed));
    assert_eq!(reducer.metrics().cases.failed, 0);
}

// Reducer module - turns lifecycle events into the result tree
//
// The reducer owns every in-flight entity of one run. Normalizers call it
// synchronously; it never suspends and never fails on out-of-order input.

pub mod arena;
pub mod attachments;
pub mod buffer;

pub use arena::{CaseId, StepId, SuiteId};
pub use attachments::{
    AttachmentAdapter, AttachmentTarget, IgnoreInstrumentation, PendingAttachment,
};
pub use buffer::{DEFAULT_BUFFER_CAPACITY, PendingBuffer};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RunIdentity;
use crate::emitter::StatusEmitter;
use crate::normalizer::instrumentation::InstrumentationAdapter;
use crate::state::{
    Attachment, AttachmentSubType, AttachmentType, CaseResult, CaseStatusUpdate, FailureResult,
    LogEntry, OutputData, ResultStatus, RunMetrics, RunResult, RunStatus, RunStatusInfo,
    StepExtra, StepResult, StepType, SuiteResult, SuiteStatusUpdate,
};
use crate::time::{Clock, duration_between};
use crate::utils::generate_id;
use arena::{Arena, StepOwner};

/// One level of a suite path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteSegment {
    /// Structural key of this level, unique among its siblings
    pub key: String,
    pub name: String,
    pub location: Option<String>,
}

impl SuiteSegment {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseSpec {
    pub name: String,
    pub fqn: String,
    pub location: Option<String>,
    /// Native start time; the clock is used when absent
    pub start_time: Option<i64>,
}

impl CaseSpec {
    pub fn new(name: impl Into<String>, fqn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fqn: fqn.into(),
            location: None,
            start_time: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn started_at(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepSpec {
    pub name: String,
    pub step_type: StepType,
    pub fqn: Option<String>,
    pub location: Option<String>,
    pub extra: Option<StepExtra>,
    /// Native start time; the clock is used when absent
    pub start_time: Option<i64>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            step_type,
            ..Default::default()
        }
    }

    pub fn with_fqn(mut self, fqn: impl Into<String>) -> Self {
        self.fqn = Some(fqn.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_extra(mut self, extra: StepExtra) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn started_at(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    fn into_result(self, start_time: i64) -> StepResult {
        StepResult {
            id: generate_id(),
            name: self.name,
            step_type: self.step_type,
            fqn: self.fqn,
            location: self.location,
            start_time,
            end_time: None,
            duration: None,
            status: None,
            failure: None,
            screenshot: None,
            extra: self.extra,
            steps: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

/// Parent of a new step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepParent {
    /// In-flight case, by attempt id
    Case(String),
    /// Open (or recently closed) step, by native key
    Step(String),
    /// Suite-level hook
    Suite(SuiteId),
    /// Step recorded without a native key
    Node(StepId),
}

/// Terminal outcome reported for a step, case or run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// `None` derives the status from resolved children
    pub status: Option<ResultStatus>,
    pub failure: Option<FailureResult>,
    /// Native end time; the clock is used when absent
    pub end_time: Option<i64>,
}

impl Outcome {
    pub fn passed() -> Self {
        Self::status(ResultStatus::Passed)
    }

    pub fn skipped() -> Self {
        Self::status(ResultStatus::Skipped)
    }

    pub fn failed(failure: Option<FailureResult>) -> Self {
        Self {
            status: Some(ResultStatus::Failed),
            failure,
            end_time: None,
        }
    }

    pub fn status(status: ResultStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Status from a native string: passed, skipped, anything else fails
    pub fn native(status: &str) -> Self {
        Self::status(ResultStatus::from_native(status))
    }

    pub fn derived() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self, failure: FailureResult) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn at(mut self, end_time: i64) -> Self {
        self.end_time = Some(end_time);
        self
    }
}

#[derive(Debug, Default)]
struct RunState {
    start_time: Option<i64>,
    finished: bool,
    capabilities: BTreeMap<String, Value>,
    metadata: BTreeMap<String, Value>,
}

/// Stateful engine building one run's result tree
pub struct Reducer {
    identity: RunIdentity,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn StatusEmitter>,
    adapter: Box<dyn AttachmentAdapter>,
    arena: Arena,
    run: RunState,
    suite_keys: HashMap<String, SuiteId>,
    pending_cases: HashMap<String, (CaseSpec, SuiteId)>,
    in_flight: HashMap<String, CaseId>,
    open_steps: HashMap<String, StepId>,
    closed_steps: HashMap<String, StepId>,
    iterations: HashMap<String, u32>,
    step_attachments: PendingBuffer<(String, String), PendingAttachment>,
    case_attachments: PendingBuffer<String, PendingAttachment>,
    metrics: RunMetrics,
    order: u32,
}

impl Reducer {
    pub fn new(
        identity: RunIdentity,
        clock: Arc<dyn Clock>,
        emitter: Arc<dyn StatusEmitter>,
    ) -> Self {
        Self {
            identity,
            clock,
            emitter,
            adapter: Box::new(InstrumentationAdapter),
            arena: Arena::default(),
            run: RunState::default(),
            suite_keys: HashMap::new(),
            pending_cases: HashMap::new(),
            in_flight: HashMap::new(),
            open_steps: HashMap::new(),
            closed_steps: HashMap::new(),
            iterations: HashMap::new(),
            step_attachments: PendingBuffer::default(),
            case_attachments: PendingBuffer::default(),
            metrics: RunMetrics::default(),
            order: 0,
        }
    }

    pub fn with_adapter(mut self, adapter: Box<dyn AttachmentAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Cap on distinct attachment targets buffered at once
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.step_attachments = PendingBuffer::new(capacity);
        self.case_attachments = PendingBuffer::new(capacity);
        self
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn is_started(&self) -> bool {
        self.run.start_time.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.run.finished
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn open_step_count(&self) -> usize {
        self.open_steps.len()
    }

    /// Attachments waiting for an owner
    pub fn buffered_attachment_count(&self) -> usize {
        self.step_attachments.value_count() + self.case_attachments.value_count()
    }

    pub fn is_case_in_flight(&self, attempt_id: &str) -> bool {
        self.in_flight.contains_key(attempt_id)
    }

    pub fn has_open_step(&self, step_key: &str) -> bool {
        self.open_steps.contains_key(step_key)
    }

    pub fn case_fqn(&self, attempt_id: &str) -> Option<&str> {
        self.in_flight
            .get(attempt_id)
            .map(|id| self.arena.case(*id).result.fqn.as_str())
    }

    pub fn suite_by_key(&self, key: &str) -> Option<SuiteId> {
        self.suite_keys.get(key).copied()
    }

    pub fn suite_fqn(&self, suite: SuiteId) -> Option<&str> {
        self.arena
            .suites
            .get(suite.0)
            .map(|s| s.result.fqn.as_str())
    }

    /// Current time of the reducer clock
    pub fn now_millis(&self) -> i64 {
        self.now()
    }

    pub fn set_total_cases(&mut self, total: u32) {
        self.metrics.total_cases = Some(total);
    }

    pub fn set_capability(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.run.capabilities.insert(key.into(), value.into());
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.run.metadata.insert(key.into(), value.into());
    }

    /// Initialize the run. Repeated calls are ignored.
    pub fn on_run_start(&mut self) {
        let now = self.now();
        self.on_run_start_at(now);
    }

    /// Initialize the run with a native start time
    pub fn on_run_start_at(&mut self, start_time: i64) {
        if self.run.start_time.is_some() || self.run.finished {
            return;
        }
        self.run.start_time = Some(start_time);
        debug!("Run {} started", self.identity.run_id);
        self.emitter
            .run_started(&self.status_info(RunStatus::Running));
    }

    /// Materialize (or look up) the suite at `path`, creating ancestors first.
    /// The structural key of each level is its segment keys joined by `#`.
    pub fn suite_discovered(&mut self, path: &[SuiteSegment]) -> Option<SuiteId> {
        if self.run.finished {
            return None;
        }
        let mut parent: Option<SuiteId> = None;
        let mut key = String::new();
        for segment in path {
            if !key.is_empty() {
                key.push('#');
            }
            key.push_str(&segment.key);

            let id = match self.suite_keys.get(&key) {
                Some(id) => *id,
                None => {
                    let now = self.now();
                    let result = SuiteResult {
                        id: generate_id(),
                        name: segment.name.clone(),
                        fqn: key.clone(),
                        location: segment.location.clone(),
                        start_time: now,
                        end_time: Some(now),
                        duration: Some(0),
                        iteration_num: 1,
                        status: Some(ResultStatus::Skipped),
                        failure: None,
                        cases: Vec::new(),
                        suites: Vec::new(),
                        hooks: Vec::new(),
                        test_attributes: BTreeMap::new(),
                    };
                    let id = self.arena.add_suite(result, parent);
                    self.suite_keys.insert(key.clone(), id);
                    debug!("Suite discovered: {}", key);
                    id
                }
            };
            parent = Some(id);
        }
        parent
    }

    pub fn suite_attribute(&mut self, suite: SuiteId, name: impl Into<String>, value: Value) {
        if let Some(node) = self.arena.suites.get_mut(suite.0) {
            node.result.test_attributes.insert(name.into(), value);
        }
    }

    /// Register a case announced before it starts
    pub fn case_pending(&mut self, case_key: &str, spec: CaseSpec, suite: SuiteId) {
        if self.run.finished || suite.0 >= self.arena.suites.len() {
            return;
        }
        let (parent_id, parent_fqn, parent_name) = self.suite_parent_fields(suite);
        let update = CaseStatusUpdate {
            timestamp: self.now(),
            run_id: self.identity.run_id.clone(),
            instance_id: self.identity.instance_id.clone(),
            id: case_key.to_string(),
            fqn: spec.fqn.clone(),
            parent_fqn,
            parent_id,
            parent_name,
            name: spec.name.clone(),
            order: None,
            iteration_num: None,
            start_time: None,
            end_time: None,
            progress: None,
            run_status: RunStatus::Pending,
            test_status: None,
            re_run_count: None,
            failures: Vec::new(),
            framework: self.metadata_str("framework"),
            language: self.metadata_str("language"),
        };
        self.pending_cases
            .insert(case_key.to_string(), (spec, suite));
        self.emitter.case_status(&update);
    }

    /// Start a case registered with [`Reducer::case_pending`]
    pub fn case_start_pending(
        &mut self,
        attempt_id: &str,
        case_key: &str,
        attempt: u32,
        start_time: Option<i64>,
    ) -> Option<CaseId> {
        let Some((mut spec, suite)) = self.pending_cases.get(case_key).cloned() else {
            debug!("Ignoring start of unknown case {}", case_key);
            return None;
        };
        spec.start_time = start_time.or(spec.start_time);
        self.case_start(attempt_id, spec, suite, attempt)
    }

    /// Start one execution attempt of a case under `suite`.
    /// A second start for an attempt already in flight is ignored.
    pub fn case_start(
        &mut self,
        attempt_id: &str,
        spec: CaseSpec,
        suite: SuiteId,
        attempt: u32,
    ) -> Option<CaseId> {
        if self.run.finished || suite.0 >= self.arena.suites.len() {
            return None;
        }
        if let Some(id) = self.in_flight.get(attempt_id) {
            debug!("Ignoring duplicate start for attempt {}", attempt_id);
            return Some(*id);
        }
        let now = spec.start_time.unwrap_or_else(|| self.now());
        self.on_run_start_at(now);

        let iteration_num = self.next_iteration(&spec.fqn, attempt);
        self.order += 1;
        let result = CaseResult {
            id: generate_id(),
            fqn: spec.fqn,
            name: spec.name,
            location: spec.location,
            start_time: now,
            end_time: None,
            duration: None,
            iteration_num,
            order: Some(self.order),
            status: None,
            failure: None,
            failure_reason_id: None,
            re_run_count: attempt,
            context: None,
            logs: Vec::new(),
            steps: Vec::new(),
            test_attributes: BTreeMap::new(),
            attachments: Vec::new(),
        };
        let id = self.arena.add_case(result, suite, attempt_id);
        self.in_flight.insert(attempt_id.to_string(), id);

        for suite_id in self.arena.suite_path(suite) {
            let node = self.arena.suite_mut(suite_id);
            let first_case = node.result.status == Some(ResultStatus::Skipped);
            if first_case {
                node.result.status = Some(ResultStatus::Passed);
                node.result.start_time = now;
            } else if now < node.result.start_time {
                node.result.start_time = now;
            }
            let end = node.result.end_time.unwrap_or(now).max(node.result.start_time);
            node.result.end_time = Some(end);
            node.result.duration = Some(duration_between(node.result.start_time, end));
            if first_case {
                let update = self.suite_update(suite_id, RunStatus::Running);
                self.emitter.suite_status(&update);
            }
        }

        debug!("Case started: {} ({})", attempt_id, iteration_num);
        let update = self.case_update(id, RunStatus::Running);
        self.emitter.case_status(&update);
        Some(id)
    }

    /// Finish the in-flight attempt. Unknown attempts are ignored.
    pub fn case_end(&mut self, attempt_id: &str, outcome: Outcome) {
        let Some(id) = self.in_flight.remove(attempt_id) else {
            debug!("Ignoring end of unknown attempt {}", attempt_id);
            return;
        };
        self.finish_case(id, attempt_id, outcome, Outcome::skipped());
    }

    pub fn case_log(&mut self, attempt_id: &str, entry: LogEntry) {
        if let Some(case) = self.in_flight_case_mut(attempt_id) {
            case.logs.push(entry);
        }
    }

    pub fn case_attribute(&mut self, attempt_id: &str, name: impl Into<String>, value: Value) {
        if let Some(case) = self.in_flight_case_mut(attempt_id) {
            case.test_attributes.insert(name.into(), value);
        }
    }

    pub fn case_output_data(&mut self, attempt_id: &str, name: impl Into<String>, data: Value) {
        if let Some(case) = self.in_flight_case_mut(attempt_id) {
            case.context
                .get_or_insert_with(Default::default)
                .result_data
                .push(OutputData {
                    name: name.into(),
                    data,
                });
        }
    }

    pub fn case_failure_reason(&mut self, attempt_id: &str, reason_id: u32) {
        if let Some(case) = self.in_flight_case_mut(attempt_id) {
            case.failure_reason_id = Some(reason_id);
        }
    }

    /// Open a step under `parent`, keyed by its native identifier
    pub fn step_start(
        &mut self,
        step_key: &str,
        parent: StepParent,
        spec: StepSpec,
    ) -> Option<StepId> {
        if self.run.finished {
            return None;
        }
        if let Some(id) = self.open_steps.get(step_key) {
            debug!("Ignoring duplicate start for step {}", step_key);
            return Some(*id);
        }
        let Some(owner) = self.resolve_parent(&parent) else {
            debug!("Ignoring step {} with unknown parent {:?}", step_key, parent);
            return None;
        };
        let start = spec.start_time.unwrap_or_else(|| self.now());
        let id = self.arena.add_step(spec.into_result(start), owner, true);
        self.open_steps.insert(step_key.to_string(), id);
        Some(id)
    }

    /// Close an open step. Unknown keys are ignored.
    pub fn step_end(&mut self, step_key: &str, outcome: Outcome) {
        let Some(id) = self.open_steps.remove(step_key) else {
            debug!("Ignoring end of unknown step {}", step_key);
            return;
        };
        self.finish_step(id, Some(step_key), outcome);
    }

    /// Insert a step that already completed, e.g. from a replayed step tree
    pub fn record_step(
        &mut self,
        parent: StepParent,
        spec: StepSpec,
        start_time: i64,
        duration: i64,
        outcome: Outcome,
    ) -> Option<StepId> {
        if self.run.finished {
            return None;
        }
        let Some(owner) = self.resolve_parent(&parent) else {
            debug!("Ignoring recorded step with unknown parent {:?}", parent);
            return None;
        };
        let status = outcome.status.unwrap_or(ResultStatus::Passed);
        let end = start_time.saturating_add(duration.max(0));
        let mut result = spec.into_result(start_time);
        result.end_time = Some(end);
        result.duration = Some(duration_between(start_time, end));
        result.status = Some(status);
        if status.is_failed() {
            result.failure = outcome.failure;
        }
        let id = self.arena.add_step(result, owner, false);
        self.metrics.steps.record(Some(status));
        if status.is_failed() {
            self.mark_failed_upwards(id);
        }
        Some(id)
    }

    /// Attach to a step or case, buffering until the owner is known
    pub fn attach(&mut self, target: AttachmentTarget, attachment: PendingAttachment) {
        if self.run.finished {
            return;
        }
        match target {
            AttachmentTarget::Step { case, step } => {
                let owner = self
                    .open_steps
                    .get(&step)
                    .or_else(|| self.closed_steps.get(&step))
                    .copied();
                match owner {
                    Some(id) => self.apply_to_step(id, attachment),
                    None => {
                        let evicted = self.step_attachments.push((case, step), attachment);
                        self.record_dropped(evicted);
                    }
                }
            }
            AttachmentTarget::Case(attempt_id) => match self.in_flight.get(&attempt_id) {
                Some(id) => {
                    let id = *id;
                    self.apply_to_case(id, attachment);
                }
                None => {
                    let evicted = self.case_attachments.push(attempt_id, attachment);
                    self.record_dropped(evicted);
                }
            },
        }
    }

    /// Attach to a step already materialized, e.g. one from [`Reducer::record_step`]
    pub fn step_attachment(&mut self, step: StepId, attachment: PendingAttachment) {
        if self.run.finished || step.0 >= self.arena.steps.len() {
            return;
        }
        self.apply_to_step(step, attachment);
    }

    /// Finalize the run. Returns `None` when it was already finalized.
    pub fn run_end(&mut self, outcome: Outcome) -> Option<RunResult> {
        if self.run.finished {
            debug!("Ignoring duplicate run end");
            return None;
        }
        self.on_run_start();
        let now = self.now();

        let mut orphans: Vec<(String, CaseId)> = self.in_flight.drain().collect();
        orphans.sort_by_key(|(_, id)| *id);
        for (attempt_id, id) in orphans {
            warn!("Case {} did not finish before the run ended", attempt_id);
            let case_outcome =
                Outcome::failed(Some(FailureResult::incomplete("Case"))).at(now);
            let step_outcome =
                Outcome::failed(Some(FailureResult::incomplete("Step"))).at(now);
            self.finish_case(id, &attempt_id, case_outcome, step_outcome);
        }

        let mut open: Vec<StepId> = self.open_steps.drain().map(|(_, id)| id).collect();
        open.sort_by(|a, b| b.cmp(a));
        for id in open {
            let outcome = Outcome::failed(Some(FailureResult::incomplete("Step"))).at(now);
            self.finish_step(id, None, outcome);
        }

        let dropped = self.step_attachments.clear() + self.case_attachments.clear();
        self.record_dropped(dropped);
        self.pending_cases.clear();
        self.closed_steps.clear();

        let any_failed = outcome.status == Some(ResultStatus::Failed)
            || self
                .arena
                .suites
                .iter()
                .any(|s| s.result.status == Some(ResultStatus::Failed))
            || self
                .arena
                .cases
                .iter()
                .any(|c| c.result.status == Some(ResultStatus::Failed));
        let executed = self
            .arena
            .cases
            .iter()
            .any(|c| c.result.status == Some(ResultStatus::Passed));
        let status = if any_failed {
            ResultStatus::Failed
        } else if executed {
            ResultStatus::Passed
        } else {
            ResultStatus::Skipped
        };

        let start = self.run.start_time.unwrap_or(now);
        let end = outcome.end_time.unwrap_or(now).max(start);
        let run = RunResult {
            run_id: self.identity.run_id.clone(),
            instance_id: self.identity.instance_id.clone(),
            agent_id: self.identity.agent_id.clone(),
            account_id: self.identity.account_id,
            user_id: self.identity.user_id,
            location_id: self.identity.location_id.clone(),
            start_time: start,
            end_time: Some(end),
            duration: Some(duration_between(start, end)),
            status: Some(status),
            total_cases: self.metrics.total_cases,
            capabilities: std::mem::take(&mut self.run.capabilities),
            metadata: std::mem::take(&mut self.run.metadata),
            failure: outcome.failure.and_then(|f| f.message),
            suites: self.arena.assemble_roots(),
        };

        self.run.finished = true;
        self.arena = Arena::default();
        self.suite_keys.clear();
        self.iterations.clear();

        debug!("Run {} finished: {:?}", run.run_id, status);
        let mut info = self.status_info(RunStatus::Finished);
        info.progress = 100.0;
        self.emitter.instance_status(&info);
        self.emitter.run_finished(&run);
        Some(run)
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn record_dropped(&mut self, dropped: usize) {
        if dropped > 0 {
            debug!("Dropped {} unclaimed attachment(s)", dropped);
            self.metrics.dropped_attachments += dropped;
        }
    }

    /// Fresh executions advance the counter; retries reuse it
    fn next_iteration(&mut self, fqn: &str, attempt: u32) -> u32 {
        match self.iterations.get_mut(fqn) {
            Some(current) if attempt > 0 => *current,
            Some(current) => {
                *current += 1;
                *current
            }
            None => {
                self.iterations.insert(fqn.to_string(), 1);
                1
            }
        }
    }

    fn in_flight_case_mut(&mut self, attempt_id: &str) -> Option<&mut CaseResult> {
        match self.in_flight.get(attempt_id) {
            Some(id) => Some(&mut self.arena.case_mut(*id).result),
            None => {
                debug!("Ignoring data for unknown attempt {}", attempt_id);
                None
            }
        }
    }

    fn resolve_parent(&self, parent: &StepParent) -> Option<StepOwner> {
        match parent {
            StepParent::Case(attempt_id) => self.in_flight.get(attempt_id).map(|id| StepOwner::Case(*id)),
            StepParent::Step(key) => self
                .open_steps
                .get(key)
                .or_else(|| self.closed_steps.get(key))
                .map(|id| StepOwner::Step(*id)),
            StepParent::Suite(id) => (id.0 < self.arena.suites.len()).then_some(StepOwner::Suite(*id)),
            StepParent::Node(id) => (id.0 < self.arena.steps.len()).then_some(StepOwner::Step(*id)),
        }
    }

    fn attempt_of(&self, step: StepId) -> String {
        self.arena
            .step(step)
            .case
            .map(|case| self.arena.case(case).attempt_id.clone())
            .unwrap_or_default()
    }

    fn finish_step(&mut self, id: StepId, key: Option<&str>, outcome: Outcome) {
        let now = self.now();
        let children_failed = self
            .arena
            .step(id)
            .children
            .iter()
            .any(|child| self.arena.step_subtree_failed(*child));

        let node = self.arena.step_mut(id);
        let start = node.result.start_time;
        let end = outcome.end_time.unwrap_or(now).max(start);
        let status = match outcome.status {
            Some(ResultStatus::Failed) => ResultStatus::Failed,
            _ if children_failed => ResultStatus::Failed,
            Some(status) => status,
            None => ResultStatus::Passed,
        };
        node.result.end_time = Some(end);
        node.result.duration = Some(duration_between(start, end));
        node.result.status = Some(status);
        if status.is_failed() && outcome.failure.is_some() {
            node.result.failure = outcome.failure;
        }
        node.open = false;
        let has_case = node.case.is_some();
        self.metrics.steps.record(Some(status));

        if let Some(key) = key {
            let target = (self.attempt_of(id), key.to_string());
            for attachment in self.step_attachments.take(&target) {
                self.apply_to_step(id, attachment);
            }
            if has_case {
                self.closed_steps.insert(key.to_string(), id);
            }
        }

        if status.is_failed() {
            self.mark_failed_upwards(id);
        }
    }

    /// Propagate a failed step into closed ancestor steps and owning suites.
    /// Open ancestors and cases derive their status when they end.
    fn mark_failed_upwards(&mut self, id: StepId) {
        let mut current = self.arena.step(id).owner;
        loop {
            match current {
                StepOwner::Step(parent) => {
                    let node = self.arena.step_mut(parent);
                    if node.open {
                        return;
                    }
                    node.result.status = Some(ResultStatus::Failed);
                    current = node.owner;
                }
                StepOwner::Suite(suite) => {
                    for suite_id in self.arena.suite_path(suite) {
                        self.arena.suite_mut(suite_id).result.status =
                            Some(ResultStatus::Failed);
                    }
                    return;
                }
                StepOwner::Case(_) => return,
            }
        }
    }

    fn finish_case(&mut self, id: CaseId, attempt_id: &str, outcome: Outcome, open_steps: Outcome) {
        let start = self.arena.case(id).result.start_time;
        let end = outcome.end_time.unwrap_or_else(|| self.now()).max(start);

        let mut still_open: Vec<(String, StepId)> = self
            .open_steps
            .iter()
            .filter(|(_, step)| self.arena.step(**step).case == Some(id))
            .map(|(key, step)| (key.clone(), *step))
            .collect();
        // children were created after their parents
        still_open.sort_by(|a, b| b.1.cmp(&a.1));
        for (key, step) in still_open {
            self.open_steps.remove(&key);
            self.finish_step(step, Some(&key), open_steps.clone().at(end));
        }

        for attachment in self.case_attachments.take(&attempt_id.to_string()) {
            self.apply_to_case(id, attachment);
        }

        let steps_failed = {
            let case = self.arena.case(id);
            self.arena.any_step_failed(&case.steps)
        };
        let status = match outcome.status {
            _ if steps_failed => ResultStatus::Failed,
            Some(status) => status,
            None => ResultStatus::Passed,
        };

        let case = self.arena.case_mut(id);
        case.result.end_time = Some(end);
        case.result.duration = Some(duration_between(start, end));
        case.result.status = Some(status);
        if status.is_failed() && !steps_failed && outcome.failure.is_some() {
            case.result.failure = outcome.failure;
        }
        case.finished = true;
        let suite = case.suite;

        let dropped = self.step_attachments.retain(|(case, _)| case != attempt_id);
        self.record_dropped(dropped);
        self.closed_steps
            .retain(|_, step| self.arena.steps[step.0].case != Some(id));

        self.metrics.cases.record(Some(status));

        for suite_id in self.arena.suite_path(suite) {
            let node = self.arena.suite_mut(suite_id);
            let suite_end = node.result.end_time.unwrap_or(end).max(end);
            node.result.end_time = Some(suite_end);
            node.result.duration = Some(duration_between(node.result.start_time, suite_end));
            if status.is_failed() {
                node.result.status = Some(ResultStatus::Failed);
            }
            let update = self.suite_update(suite_id, RunStatus::Running);
            self.emitter.suite_status(&update);
        }

        debug!("Case finished: {} {:?}", attempt_id, status);
        let update = self.case_update(id, RunStatus::Finished);
        self.emitter.case_status(&update);
    }

    fn apply_to_step(&mut self, id: StepId, attachment: PendingAttachment) {
        match attachment {
            PendingAttachment::File(file) => self.arena.step_mut(id).result.attachments.push(file),
            PendingAttachment::Screenshot(content) => {
                self.arena.step_mut(id).result.screenshot = Some(content)
            }
            PendingAttachment::Instrumentation(payload) => {
                if let Some(step) = self.adapter.to_step(&payload) {
                    self.insert_converted(step, StepOwner::Step(id));
                }
            }
        }
    }

    fn apply_to_case(&mut self, id: CaseId, attachment: PendingAttachment) {
        match attachment {
            PendingAttachment::File(file) => self.arena.case_mut(id).result.attachments.push(file),
            PendingAttachment::Screenshot(content) => {
                let screenshot = Attachment::inline(
                    AttachmentType::Screenshot,
                    Some(AttachmentSubType::Screenshot),
                    "image/png",
                    content,
                );
                self.arena.case_mut(id).result.attachments.push(screenshot);
            }
            PendingAttachment::Instrumentation(payload) => {
                if let Some(step) = self.adapter.to_step(&payload) {
                    self.insert_converted(step, StepOwner::Case(id));
                }
            }
        }
    }

    fn insert_converted(&mut self, step: StepResult, owner: StepOwner) {
        let status = step.status;
        let id = self.arena.add_step(step, owner, false);
        self.metrics.steps.record(status);
        if status == Some(ResultStatus::Failed) {
            self.mark_failed_upwards(id);
        }
    }

    fn metadata_str(&self, key: &str) -> Option<String> {
        self.run
            .metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn suite_parent_fields(&self, suite: SuiteId) -> (Option<String>, Option<String>, Option<String>) {
        let node = self.arena.suite(suite);
        (
            Some(node.result.id.clone()),
            Some(node.result.fqn.clone()),
            Some(node.result.name.clone()),
        )
    }

    fn status_info(&self, status: RunStatus) -> RunStatusInfo {
        RunStatusInfo {
            run_id: self.identity.run_id.clone(),
            instance_id: self.identity.instance_id.clone(),
            agent_id: self.identity.agent_id.clone(),
            account_id: self.identity.account_id,
            user_id: self.identity.user_id,
            status,
            progress: self.metrics.progress(),
            case: None,
        }
    }

    fn case_update(&self, id: CaseId, run_status: RunStatus) -> CaseStatusUpdate {
        let node = self.arena.case(id);
        let case = &node.result;
        let (parent_id, parent_fqn, parent_name) = self.suite_parent_fields(node.suite);
        CaseStatusUpdate {
            timestamp: self.now(),
            run_id: self.identity.run_id.clone(),
            instance_id: self.identity.instance_id.clone(),
            id: case.id.clone(),
            fqn: case.fqn.clone(),
            parent_fqn,
            parent_id,
            parent_name,
            name: case.name.clone(),
            order: case.order,
            iteration_num: Some(case.iteration_num),
            start_time: Some(case.start_time),
            end_time: case.end_time,
            progress: Some(self.metrics.progress()),
            run_status,
            test_status: case.status,
            re_run_count: Some(case.re_run_count),
            failures: case.failure.iter().cloned().collect(),
            framework: self.metadata_str("framework"),
            language: self.metadata_str("language"),
        }
    }

    fn suite_update(&self, id: SuiteId, run_status: RunStatus) -> SuiteStatusUpdate {
        let node = self.arena.suite(id);
        let suite = &node.result;
        let (parent_id, parent_fqn, parent_name) = match node.parent {
            Some(parent) => self.suite_parent_fields(parent),
            None => (None, None, None),
        };
        SuiteStatusUpdate {
            timestamp: self.now(),
            run_id: self.identity.run_id.clone(),
            instance_id: self.identity.instance_id.clone(),
            id: suite.id.clone(),
            fqn: suite.fqn.clone(),
            parent_fqn,
            parent_id,
            parent_name,
            name: suite.name.clone(),
            start_time: Some(suite.start_time),
            end_time: suite.end_time,
            run_status,
            test_status: suite.status,
            failures: suite.failure.iter().cloned().collect(),
            framework: self.metadata_str("framework"),
            language: self.metadata_str("language"),
        }
    }
}

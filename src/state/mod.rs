// State module - result tree entities
// Pure data: run -> suite -> case -> step -> attachment/log

pub mod attachment;
pub mod case;
pub mod failure;
pub mod metrics;
pub mod run;
pub mod status;
pub mod step;
pub mod suite;
pub mod updates;

pub use attachment::{Attachment, AttachmentSubType, AttachmentType, LogEntry, UNKNOWN_LOG_LEVEL};
pub use case::{CaseContext, CaseResult, OutputData};
pub use failure::{
    ASSERT_ERROR, ASSERTION_ERROR, FailureResult, GENERAL_ERROR, INCOMPLETE_ERROR, TIMEOUT_ERROR,
};
pub use metrics::{RunMetrics, RunSummary, StatusCounts};
pub use run::RunResult;
pub use status::{ResultStatus, RunStatus, StepType};
pub use step::{
    AssertStepExtra, GherkinKeyword, GherkinStepExtra, StepExtra, StepResult, has_no_failed_steps,
};
pub use suite::SuiteResult;
pub use updates::{CaseProgress, CaseStatusUpdate, RunStatusInfo, SuiteStatusUpdate};

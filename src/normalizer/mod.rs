// Normalizer module - framework events to reducer calls
//
// Each framework delivers its own closed event type, read one JSON object
// per line. A normalizer keeps only the lookup state needed to turn native
// identifiers into reducer keys.

pub mod common;
pub mod cucumber;
pub mod instrumentation;
pub mod mocha;
pub mod playwright;

pub use cucumber::{CucumberEnvelope, CucumberNormalizer};
pub use instrumentation::InstrumentationAdapter;
pub use mocha::{MochaEvent, MochaNormalizer};
pub use playwright::{PlaywrightEvent, PlaywrightNormalizer};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::reducer::Reducer;
use crate::state::RunResult;

pub const LANGUAGE_JAVASCRIPT: &str = "JavaScript";

/// Supported test frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Framework {
    Cucumber,
    Playwright,
    /// Mocha event bridge, including Cypress command logs
    Mocha,
}

impl Framework {
    pub fn display_name(self) -> &'static str {
        match self {
            Framework::Cucumber => "Cucumber",
            Framework::Playwright => "Playwright",
            Framework::Mocha => "Cypress",
        }
    }

    pub fn normalizer(self) -> Box<dyn LineNormalizer> {
        match self {
            Framework::Cucumber => Box::new(CucumberNormalizer::new()),
            Framework::Playwright => Box::new(PlaywrightNormalizer::new()),
            Framework::Mocha => Box::new(MochaNormalizer::new()),
        }
    }

    /// Record run metadata for this framework
    pub fn apply_metadata(self, reducer: &mut Reducer) {
        reducer.set_metadata("framework", self.display_name());
        reducer.set_metadata("language", LANGUAGE_JAVASCRIPT);
        let identity = reducer.identity().clone();
        if let Some(user_id) = identity.user_id {
            reducer.set_metadata("executingUserId", user_id);
        }
        if let Some(account_id) = identity.account_id {
            reducer.set_metadata("accountId", account_id);
        }
    }
}

/// Translates one framework's events into reducer operations
pub trait Normalizer {
    type Event: DeserializeOwned;

    const FRAMEWORK: Framework;

    /// Apply one event. Returns the finished run when the event ended it.
    fn handle(&mut self, reducer: &mut Reducer, event: Self::Event) -> Option<RunResult>;
}

/// Object-safe view of a [`Normalizer`] fed with raw NDJSON lines
pub trait LineNormalizer: Send {
    fn framework(&self) -> Framework;

    fn handle_line(
        &mut self,
        reducer: &mut Reducer,
        line: &str,
    ) -> Result<Option<RunResult>, serde_json::Error>;

    fn handle_value(
        &mut self,
        reducer: &mut Reducer,
        value: Value,
    ) -> Result<Option<RunResult>, serde_json::Error>;
}

impl<N> LineNormalizer for N
where
    N: Normalizer + Send,
{
    fn framework(&self) -> Framework {
        N::FRAMEWORK
    }

    fn handle_line(
        &mut self,
        reducer: &mut Reducer,
        line: &str,
    ) -> Result<Option<RunResult>, serde_json::Error> {
        let event: N::Event = serde_json::from_str(line)?;
        Ok(self.handle(reducer, event))
    }

    fn handle_value(
        &mut self,
        reducer: &mut Reducer,
        value: Value,
    ) -> Result<Option<RunResult>, serde_json::Error> {
        let event: N::Event = serde_json::from_value(value)?;
        Ok(self.handle(reducer, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunIdentity;
    use crate::emitter::NoopEmitter;
    use crate::time::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_apply_metadata() {
        let mut identity = RunIdentity::local();
        identity.user_id = Some(7);
        let mut reducer = Reducer::new(identity, Arc::new(ManualClock::new(0)), Arc::new(NoopEmitter));

        Framework::Playwright.apply_metadata(&mut reducer);
        let run = reducer.run_end(crate::reducer::Outcome::derived()).unwrap();

        assert_eq!(run.metadata["framework"], "Playwright");
        assert_eq!(run.metadata["language"], "JavaScript");
        assert_eq!(run.metadata["executingUserId"], 7);
    }

    #[test]
    fn test_framework_normalizer_kind() {
        assert_eq!(Framework::Mocha.normalizer().framework(), Framework::Mocha);
        assert_eq!(Framework::Cucumber.display_name(), "Cucumber");
    }
}

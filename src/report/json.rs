// JSON sink - persists the result tree for the execution agent

use super::Sink;
use crate::state::RunResult;
use crate::utils::{FileUtils, RESULT_FILE_NAME};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writes `.CB_TEST_RESULTS.json` into the output directory
pub struct JsonSink {
    output_path: PathBuf,
}

impl JsonSink {
    /// Sink writing to an explicit file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Sink writing the fixed result file inside `dir` (cwd when `None`)
    pub fn in_dir(dir: Option<&Path>) -> Result<Self> {
        Ok(Self::new(FileUtils::result_file_path(dir)?))
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl Sink for JsonSink {
    fn on_run_end(&self, run: &RunResult) -> Result<()> {
        FileUtils::ensure_parent_dir(&self.output_path)?;
        let file = File::create(&self.output_path).with_context(|| {
            format!(
                "Failed to create {}: {}",
                RESULT_FILE_NAME,
                self.output_path.display()
            )
        })?;

        serde_json::to_writer_pretty(file, run).context("Failed to serialize run result to JSON")?;

        tracing::info!("Result written to {}", self.output_path.display());
        Ok(())
    }
}

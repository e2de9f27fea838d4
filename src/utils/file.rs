// Cross-platform file utilities for result persistence

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Fixed name of the persisted result tree inside the output directory
pub const RESULT_FILE_NAME: &str = ".CB_TEST_RESULTS.json";

/// File utilities for cross-platform operations
pub struct FileUtils;

impl FileUtils {
    /// Resolve the output directory against the current working directory and create it if absent.
    ///
    /// Without an explicit directory the current working directory is used.
    pub fn resolve_output_dir(output_dir: Option<&Path>) -> Result<PathBuf> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let dir = match output_dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => cwd.join(dir),
            None => return Ok(cwd),
        };

        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        }

        Ok(dir)
    }

    /// Path of the result file for the given output directory
    pub fn result_file_path(output_dir: Option<&Path>) -> Result<PathBuf> {
        Ok(Self::resolve_output_dir(output_dir)?.join(RESULT_FILE_NAME))
    }

    /// Make sure the parent directory of a file exists
    pub fn ensure_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }

    /// Last path component, used as an attachment file name
    pub fn file_name_from_path(path: &str) -> String {
        // Attachment paths may come from another OS than the one running the reporter
        path.rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(path)
            .to_string()
    }

    /// Normalize path separators (backslash to forward slash)
    pub fn normalize_path_separators(path: &str) -> String {
        path.replace('\\', "/")
    }
}

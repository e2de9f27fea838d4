// JUnit sink - outputs the result tree in JUnit XML format

use super::Sink;
use crate::state::{CaseResult, ResultStatus, RunResult, SuiteResult};
use crate::utils::FileUtils;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// JUnit sink
pub struct JunitSink {
    output_path: PathBuf,
    name: String,
}

impl JunitSink {
    /// Create new JUnit sink
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            name: env!("CARGO_PKG_NAME").to_string(),
        }
    }

    /// Name of the `<testsuites>` element
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Render the whole document
    pub fn render(&self, run: &RunResult) -> String {
        let summary = run.summary();

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuites name=\"{}\" time=\"{:.3}\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\">\n",
            escape(&self.name),
            seconds(run.duration),
            summary.cases.total,
            summary.cases.failed,
            summary.cases.skipped
        ));

        // Only leaves and suites holding cases get an element; JUnit has no nesting
        for suite in run.all_suites() {
            if suite.cases.is_empty() && !suite.suites.is_empty() {
                continue;
            }
            render_suite(&mut xml, suite);
        }

        xml.push_str("</testsuites>\n");
        xml
    }
}

fn render_suite(xml: &mut String, suite: &SuiteResult) {
    let failed = suite.cases.iter().filter(|c| c.is_failed()).count();
    let skipped = suite
        .cases
        .iter()
        .filter(|c| c.status == Some(ResultStatus::Skipped))
        .count();

    xml.push_str(&format!(
        "  <testsuite name=\"{}\" time=\"{:.3}\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\"",
        escape(&suite.name),
        seconds(suite.duration),
        suite.cases.len(),
        failed,
        skipped
    ));
    if let Some(location) = &suite.location {
        xml.push_str(&format!(" file=\"{}\"", escape(location)));
    }
    xml.push_str(">\n");

    for case in &suite.cases {
        render_case(xml, suite, case);
    }

    xml.push_str("  </testsuite>\n");
}

fn render_case(xml: &mut String, suite: &SuiteResult, case: &CaseResult) {
    xml.push_str(&format!(
        "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">\n",
        escape(&case.name),
        escape(&suite.fqn),
        seconds(case.duration)
    ));

    match case.status {
        Some(ResultStatus::Failed) => {
            let failure = case.failure.as_ref();
            let message = failure
                .and_then(|f| f.message.as_deref())
                .unwrap_or("Test failed");
            let kind = failure.map(|f| f.kind.as_str()).unwrap_or("Error");
            let body = failure
                .and_then(|f| f.stacktrace.as_deref())
                .unwrap_or(message);
            xml.push_str(&format!(
                "      <failure message=\"{}\" type=\"{}\">{}</failure>\n",
                escape(message),
                escape(kind),
                escape(body)
            ));
        }
        Some(ResultStatus::Skipped) => xml.push_str("      <skipped />\n"),
        _ => {}
    }

    if !case.logs.is_empty() {
        let out: Vec<String> = case
            .logs
            .iter()
            .map(|log| format!("[{}] {}", log.level, log.msg))
            .collect();
        xml.push_str(&format!(
            "      <system-out>{}</system-out>\n",
            escape(&out.join("\n"))
        ));
    }

    xml.push_str("    </testcase>\n");
}

fn seconds(duration_ms: Option<i64>) -> f64 {
    duration_ms.unwrap_or(0) as f64 / 1000.0
}

/// Simple XML escaping
pub fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

impl Sink for JunitSink {
    fn on_run_end(&self, run: &RunResult) -> Result<()> {
        let xml = self.render(run);

        FileUtils::ensure_parent_dir(&self.output_path)?;
        let mut file = File::create(&self.output_path).with_context(|| {
            format!(
                "Failed to create JUnit report file: {}",
                self.output_path.display()
            )
        })?;

        file.write_all(xml.as_bytes())
            .context("Failed to write JUnit XML content")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a < b & \"c\""), "a &lt; b &amp; &quot;c&quot;");
        assert_eq!(escape("it's"), "it&apos;s");
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(Some(1500)), 1.5);
        assert_eq!(seconds(None), 0.0);
    }
}

// Ingest command - reduce a native event stream into a result tree

use anyhow::{Context, Result};
use console::style;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::args::IngestArgs;
use crate::config::ReporterConfig;
use crate::emitter::{self, StreamingEmitter};
use crate::report::{JsonSink, JunitSink};
use crate::session::ReportSession;
use crate::state::{ResultStatus, RunResult};

use super::truncate_str;

const MAX_LISTED_FAILURES: usize = 10;

pub async fn handle_ingest(args: &IngestArgs, config: &ReporterConfig) -> Result<RunResult> {
    let mut emitters = emitter::from_config(config);
    if args.stream {
        emitters.push(Arc::new(StreamingEmitter::stdout()));
    }
    let emitter = emitters.into_emitter();

    let mut session = ReportSession::new(args.framework, config, emitter);

    let output_dir = args.output_dir.as_deref().or(config.output_dir.as_deref());
    let json = JsonSink::in_dir(output_dir)?;
    let result_path = json.output_path().to_path_buf();
    session.add_sink(Box::new(json));
    if let Some(junit) = &args.junit {
        session.add_sink(Box::new(JunitSink::new(junit.clone())));
    }

    info!(
        "Reading {} events from {}",
        args.framework.display_name(),
        args.input
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    );
    match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open event file: {}", path.display()))?;
            session.read_from(file).await?;
        }
        None => session.read_from(tokio::io::stdin()).await?,
    }

    let skipped = session.skipped_lines();
    if skipped > 0 {
        warn!("Skipped {} undecodable line(s)", skipped);
    }

    let run = session.finish().await?;

    // stdout carries the status stream when enabled
    let summary = render_summary(&run, &result_path.display().to_string());
    if args.stream {
        eprint!("{}", summary);
    } else {
        print!("{}", summary);
    }

    Ok(run)
}

fn render_summary(run: &RunResult, result_path: &str) -> String {
    let summary = run.summary();
    let mut out = String::new();

    out.push('\n');
    out.push_str(&format!("{}\n", "═".repeat(80)));
    let headline = match run.status {
        Some(ResultStatus::Failed) => style(format!(
            "❌ FAILED ({} failed, {} passed in {}ms)",
            summary.cases.failed, summary.cases.passed, summary.duration_ms
        ))
        .red()
        .bold(),
        Some(ResultStatus::Passed) => style(format!(
            "✅ PASSED ({} passed in {}ms)",
            summary.cases.passed, summary.duration_ms
        ))
        .green()
        .bold(),
        _ => style(format!("⏭️  SKIPPED ({} cases)", summary.cases.total)).yellow(),
    };
    out.push_str(&format!("{}\n", headline));
    out.push_str(&format!("{}\n", "─".repeat(80)));
    out.push_str("📊 Run Statistics:\n");
    out.push_str(&format!("   • Suites: {}\n", summary.suites));
    out.push_str(&format!(
        "   • Cases: {} ({} passed, {} failed, {} skipped)\n",
        summary.cases.total, summary.cases.passed, summary.cases.failed, summary.cases.skipped
    ));
    out.push_str(&format!(
        "   • Steps: {} ({} failed)\n",
        summary.steps.total, summary.steps.failed
    ));
    out.push_str(&format!("   • Pass rate: {:.1}%\n", summary.pass_rate()));

    let failed: Vec<_> = run.all_cases().into_iter().filter(|c| c.is_failed()).collect();
    if !failed.is_empty() {
        out.push_str("\n💥 Failed cases:\n");
        for case in failed.iter().take(MAX_LISTED_FAILURES) {
            let reason = case
                .failure
                .as_ref()
                .and_then(|f| f.message.as_deref())
                .unwrap_or("no failure details");
            out.push_str(&format!(
                "   • {} - {}\n",
                style(truncate_str(&case.fqn, 60)).bold(),
                truncate_str(reason.lines().next().unwrap_or_default(), 80)
            ));
        }
        if failed.len() > MAX_LISTED_FAILURES {
            out.push_str(&format!(
                "   … and {} more\n",
                failed.len() - MAX_LISTED_FAILURES
            ));
        }
    }

    out.push_str(&format!("\n📄 Result file: {}\n", result_path));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, ReporterConfig};
    use crate::normalizer::Framework;

    fn local_config(dir: &std::path::Path) -> ReporterConfig {
        let mut config = ReporterConfig::from_lookup(FileConfig::default(), |_| None).unwrap();
        config.output_dir = Some(dir.to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_ingest_writes_result_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("events.ndjson");
        std::fs::write(
            &input,
            concat!(
                r#"{"event":"run:begin","totalTests":1}"#, "\n",
                r#"{"event":"mocha:suite:begin","suite":{"id":"r1","title":"","root":true,"file":"a.cy.js"}}"#, "\n",
                r#"{"event":"mocha:test:begin","test":{"id":"r2","title":"opens","parent":"r1"}}"#, "\n",
                r#"{"event":"mocha:test:pass","test":{"id":"r2","title":"opens","parent":"r1"}}"#, "\n",
                r#"{"event":"mocha:test:end","test":{"id":"r2","title":"opens","parent":"r1"}}"#, "\n",
                r#"{"event":"run:end"}"#, "\n",
            ),
        )
        .unwrap();
        let args = IngestArgs {
            framework: Framework::Mocha,
            input: Some(input),
            output_dir: None,
            junit: Some(dir.path().join("junit.xml")),
            stream: false,
        };

        // Act
        let run = handle_ingest(&args, &local_config(dir.path())).await.unwrap();

        // Assert
        assert_eq!(run.status, Some(ResultStatus::Passed));
        let written = std::fs::read_to_string(dir.path().join(crate::utils::RESULT_FILE_NAME)).unwrap();
        let parsed: RunResult = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.run_id, run.run_id);
        assert!(dir.path().join("junit.xml").exists());
    }

    #[test]
    fn test_summary_lists_failures() {
        let run: RunResult = serde_json::from_value(serde_json::json!({
            "runId": "r", "instanceId": "i", "agentId": "a",
            "startTime": 0, "endTime": 10, "duration": 10, "status": "FAILED",
            "capabilities": {}, "metadata": {},
            "suites": [{
                "id": "s", "name": "S", "fqn": "S", "startTime": 0, "iterationNum": 1,
                "status": "FAILED",
                "cases": [{
                    "id": "c", "fqn": "S#c", "name": "c", "startTime": 0, "iterationNum": 1,
                    "reRunCount": 0, "status": "FAILED",
                    "failure": {"type": "GENERAL_ERROR", "message": "boom\nat line"}
                }]
            }]
        }))
        .unwrap();

        let text = render_summary(&run, "/tmp/x.json");

        assert!(text.contains("FAILED"));
        assert!(text.contains("S#c - boom"));
    }
}

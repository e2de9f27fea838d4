// Run-status command - print the live status of a remote run

use anyhow::{Context, Result};
use console::style;

use crate::cli::args::RunStatusArgs;
use crate::client::{RemoteRunStatus, RunsApi};

use super::truncate_str;

pub async fn handle_run_status(args: &RunStatusArgs) -> Result<()> {
    let api = RunsApi::new(&args.api_key, args.api_url.as_deref())?;
    let status = api.get_run_status(&args.run_id).await?;

    if args.is_json() {
        let rendered =
            serde_json::to_string_pretty(&status).context("Failed to render run status")?;
        println!("{}", rendered);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(())
}

fn render_status(status: &RemoteRunStatus) -> String {
    let mut out = String::new();
    let state = if status.is_finished() {
        style(status.status.as_str()).green()
    } else {
        style(status.status.as_str()).yellow()
    };
    out.push_str(&format!(
        "Run {} {} ({:.0}%)\n",
        style(&status.run_id).bold(),
        state,
        status.progress
    ));
    if let Some(name) = &status.run_name {
        out.push_str(&format!("  Name: {}\n", name));
    }
    if let (Some(start), Some(end)) = (status.start_millis(), status.end_millis()) {
        out.push_str(&format!("  Duration: {}ms\n", end.saturating_sub(start)));
    }

    for instance in &status.instances {
        let browser = instance.browser_name.as_deref().unwrap_or("-");
        out.push_str(&format!(
            "  Instance {} [{}] {} ({:.0}%)\n",
            instance.id, browser, instance.status, instance.progress
        ));
        for case in &instance.cases_status {
            out.push_str(&format!(
                "    {:>3}. {} passed={} failed={}\n",
                case.order,
                truncate_str(&case.name, 60),
                case.iterations_passed,
                case.iterations_failed
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_status() {
        let status: RemoteRunStatus = serde_json::from_value(serde_json::json!({
            "runId": "run-1",
            "status": "Running",
            "progress": 50.0,
            "startTime": "2024-01-01T00:00:00Z",
            "endTime": "2024-01-01T00:00:02Z",
            "instances": [{
                "id": "i-1", "runId": "run-1", "status": "Running", "progress": 50.0,
                "browserName": "chrome",
                "casesStatus": [{"id": 1, "name": "login", "order": 1, "progress": 1.0,
                                  "iterationsFailed": 0, "iterationsPassed": 1}]
            }]
        }))
        .unwrap();

        let text = render_status(&status);

        assert!(text.contains("run-1"));
        assert!(text.contains("Duration: 2000ms"));
        assert!(text.contains("login passed=1 failed=0"));
    }
}

// Fetch-result command - long-poll the collector for a run result

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::args::FetchResultArgs;
use crate::client::ResultApi;

pub async fn handle_fetch_result(args: &FetchResultArgs) -> Result<()> {
    let api = ResultApi::new(&args.api_key, args.api_url.as_deref())?;

    info!("Waiting for the result of run {}", args.run_id);
    let Some(result) = api.get_result_by_run_id(&args.run_id).await? else {
        anyhow::bail!("No result available for run {}", args.run_id);
    };

    let rendered = serde_json::to_string_pretty(&result).context("Failed to render result")?;
    println!("{}", rendered);

    if args.tags {
        let tags = api.get_result_cases_tags(&args.run_id).await?;
        for case in tags {
            println!("{}\t{}", case.fqn, case.tags.join(","));
        }
    }

    Ok(())
}

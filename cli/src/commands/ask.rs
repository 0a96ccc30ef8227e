use anyhow::{Context, Result};

use sct_retrieval::{FusionEngine, QueryResponse, SctConfig, SecondaryStatus};

use crate::cli::AskArgs;
use crate::setup;

pub async fn run(config: &SctConfig, args: AskArgs) -> Result<()> {
    let engine = FusionEngine::open(
        config,
        setup::embedding_provider(config),
        setup::generation_provider(config),
    )
    .await
    .context("failed to open indexes; run `sct embed` first")?;

    let response = engine
        .query(&args.question, args.followups)
        .await
        .context("failed to answer question")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}\n", response.answer);

    println!("Sources:");
    for result in &response.primary_context {
        println!("  [{:.3}] {}", result.score, result.unit_id);
    }
    match response.secondary_status {
        SecondaryStatus::Queried => {
            for result in &response.secondary_context {
                println!("  [{:.3}] {} (research)", result.score, result.unit_id);
            }
        }
        SecondaryStatus::Unavailable => println!("  binning research index unavailable"),
        SecondaryStatus::NotQueried => {}
    }

    if !response.followups.is_empty() {
        println!("\nFollow-up questions:");
        for (i, followup) in response.followups.iter().enumerate() {
            println!("  {}. {followup}", i + 1);
        }
    }
}

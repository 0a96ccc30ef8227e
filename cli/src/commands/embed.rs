use anyhow::{Context, Result};
use tracing::info;

use sct_embeddings::RefreshOutcome;
use sct_retrieval::{SctConfig, SourceConfig};

use crate::cli::{EmbedArgs, SourceSelection};
use crate::setup;

pub async fn run(config: &SctConfig, args: EmbedArgs) -> Result<()> {
    let sources: Vec<&SourceConfig> = match args.source {
        SourceSelection::Primary => vec![&config.sources.primary],
        SourceSelection::Secondary => vec![&config.sources.secondary],
        SourceSelection::All => vec![&config.sources.primary, &config.sources.secondary],
    };

    let pipeline = setup::pipeline(config);
    for source in sources {
        info!("Refreshing {} from {}", source.tag, source.path.display());
        let outcome = pipeline
            .refresh(&source.tag, &source.path, args.force)
            .await
            .with_context(|| format!("failed to refresh index {}", source.tag))?;

        match outcome {
            RefreshOutcome::UpToDate(record) => {
                println!(
                    "{}: up to date (generation {}, {} units)",
                    source.tag, record.generation, record.unit_count
                );
            }
            RefreshOutcome::Rebuilt(run) => {
                println!(
                    "{}: embedded {} units ({} resumed, {} degraded), generation {}",
                    source.tag,
                    run.records.len(),
                    run.resumed_from,
                    run.degraded_ids.len(),
                    run.fingerprint.generation
                );
                for id in &run.degraded_ids {
                    println!("  degraded: {id}");
                }
            }
        }
    }
    Ok(())
}

use anyhow::{Context, Result};

use sct_embeddings::{ChangeDetector, IndexStatus, IndexStore};
use sct_retrieval::SctConfig;

pub async fn run(config: &SctConfig) -> Result<()> {
    let store = IndexStore::new(&config.store_dir);
    let detector = ChangeDetector::new(store.clone());

    println!("store: {}", store.root().display());
    for source in [&config.sources.primary, &config.sources.secondary] {
        let status = match detector.status(&source.tag, &source.path).await {
            Ok(status) => status.to_string(),
            Err(err) => format!("unknown ({err})"),
        };
        let record = store
            .read_fingerprint(&source.tag)
            .await
            .with_context(|| format!("failed to read fingerprint for {}", source.tag))?;

        match record {
            Some(record) => println!(
                "{}: {status} (generation {}, {} units, dim {}, updated {})",
                source.tag,
                record.generation,
                record.unit_count,
                record.dimension,
                record.updated_at.to_rfc3339()
            ),
            None => println!("{}: {}", source.tag, IndexStatus::Missing),
        }
    }
    Ok(())
}

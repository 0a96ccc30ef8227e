use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use sct_corpus::{ChunkerConfig, KnowledgeUnit, TextChunker, write_units};
use sct_retrieval::SctConfig;

use crate::cli::ChunkArgs;

/// Cut extracted paper text into overlapping chunks and write them as the
/// secondary JSON-lines source, unless another output or tag is given.
pub fn run(config: &SctConfig, args: ChunkArgs) -> Result<()> {
    let chunker = TextChunker::new(ChunkerConfig {
        max_chars: args.max_chars,
        overlap: args.overlap,
    })?;
    let tag = args.tag.unwrap_or_else(|| config.sources.secondary.tag.clone());
    let output = args
        .output
        .unwrap_or_else(|| config.sources.secondary.path.clone());

    let units = chunk_files(&chunker, &args.inputs, &tag)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    write_units(&output, &units)?;

    println!(
        "{tag}: wrote {} chunks from {} documents to {}",
        units.len(),
        args.inputs.len(),
        output.display()
    );
    Ok(())
}

/// Chunk every input in order, naming each document by its file name.
fn chunk_files(
    chunker: &TextChunker,
    inputs: &[PathBuf],
    tag: &str,
) -> Result<Vec<KnowledgeUnit>> {
    let mut units = Vec::new();
    for input in inputs {
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?;
        let document = document_name(input);
        let chunks = chunker.chunk_document(&document, &text, tag);
        info!("Chunked {document} into {} units", chunks.len());
        units.extend(chunks);
    }
    Ok(units)
}

fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sct_corpus::SourceSnapshot;
    use tempfile::TempDir;

    #[test]
    fn test_chunked_papers_load_as_source() {
        let dir = TempDir::new().unwrap();
        let paper = dir.path().join("speed_bins.txt");
        std::fs::write(&paper, "Speed bins   are assigned\nat final test. ".repeat(10)).unwrap();
        let output = dir.path().join("out/paper_chunks.jsonl");

        let mut config = SctConfig::default();
        config.sources.secondary.path = output.clone();
        run(
            &config,
            ChunkArgs {
                inputs: vec![paper],
                output: None,
                tag: None,
                max_chars: 200,
                overlap: 50,
            },
        )
        .unwrap();

        let snapshot = SourceSnapshot::load("papers", &output).unwrap();
        assert_eq!(snapshot.units.len(), 3);
        assert_eq!(snapshot.units[0].id, "speed_bins.txt::chunk_0");
        assert!(snapshot.units[0].text.starts_with("Speed bins are assigned at final test."));
        assert_eq!(
            snapshot.units[2].metadata.get("source"),
            Some(&serde_json::Value::from("speed_bins.txt"))
        );
    }

    #[test]
    fn test_overlap_not_below_window_rejected() {
        let dir = TempDir::new().unwrap();
        let args = ChunkArgs {
            inputs: Vec::new(),
            output: Some(dir.path().join("chunks.jsonl")),
            tag: None,
            max_chars: 100,
            overlap: 100,
        };
        assert!(run(&SctConfig::default(), args).is_err());
        assert!(!dir.path().join("chunks.jsonl").exists());
    }

    #[test]
    fn test_missing_input_names_file() {
        let chunker = TextChunker::with_defaults();
        let err = chunk_files(&chunker, &[PathBuf::from("/nonexistent/a.txt")], "papers")
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/a.txt"));
    }
}

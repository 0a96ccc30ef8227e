use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "sct",
    version,
    about = "Build SCT knowledge indexes and answer semiconductor questions"
)]
pub struct Cli {
    /// TOML configuration file. A missing default file means built-in defaults.
    #[arg(long, global = true, env = "SCT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed sources whose content changed since the last commit.
    Embed(EmbedArgs),
    /// Show index freshness for every configured source.
    Status,
    /// Answer a question.
    Ask(AskArgs),
    /// Split extracted paper text into a JSON-lines source.
    Chunk(ChunkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EmbedArgs {
    #[arg(long, value_enum, default_value_t = SourceSelection::All)]
    pub source: SourceSelection,

    /// Re-embed even when the source is unchanged.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceSelection {
    Primary,
    Secondary,
    All,
}

#[derive(Args, Debug, Clone)]
pub struct AskArgs {
    pub question: String,

    /// Also suggest three follow-up questions.
    #[arg(long, default_value_t = false)]
    pub followups: bool,

    /// Print the full response as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ChunkArgs {
    /// Plain-text files, one per paper.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output file. Defaults to the configured secondary source.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Source tag for the units. Defaults to the secondary source tag.
    #[arg(long)]
    pub tag: Option<String>,

    #[arg(long, default_value_t = sct_corpus::chunker::DEFAULT_MAX_CHARS)]
    pub max_chars: usize,

    #[arg(long, default_value_t = sct_corpus::chunker::DEFAULT_OVERLAP)]
    pub overlap: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_embed_defaults() {
        let cli = Cli::try_parse_from(["sct", "embed"]).unwrap();
        match cli.command {
            Commands::Embed(args) => {
                assert_eq!(args.source, SourceSelection::All);
                assert!(!args.force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_ask_with_flags() {
        let cli = Cli::try_parse_from([
            "sct",
            "ask",
            "What is bin yield?",
            "--followups",
            "--json",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.question, "What is bin yield?");
                assert!(args.followups);
                assert!(args.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_chunk_defaults() {
        let cli = Cli::try_parse_from(["sct", "chunk", "a.txt", "b.txt", "-o", "out.jsonl"])
            .unwrap();
        match cli.command {
            Commands::Chunk(args) => {
                assert_eq!(args.inputs, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
                assert_eq!(args.output, Some(PathBuf::from("out.jsonl")));
                assert_eq!(args.tag, None);
                assert_eq!(args.max_chars, 1200);
                assert_eq!(args.overlap, 200);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["sct", "chunk"]).is_err());
    }

    #[test]
    fn test_unknown_source_rejected() {
        assert!(Cli::try_parse_from(["sct", "embed", "--source", "both"]).is_err());
    }
}

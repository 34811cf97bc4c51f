use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use campusrag::{config::StoreBackend, pipeline::DEFAULT_TOP_K};

#[derive(Debug, Parser)]
#[command(
    name = "campusrag",
    about = "Answer questions about campus life from scraped university sources"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Vector store backend (local or qdrant)
    #[arg(long, global = true)]
    pub backend: Option<StoreBackend>,

    /// Vector store collection name
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk, embed and store the latest export of each source
    Ingest(IngestArgs),
    /// Ask a question
    Query(QueryArgs),
    /// Show vector store and model statistics
    Stats(StatsArgs),
    /// Remove every stored chunk
    Clear(ClearArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Source names; each reads the newest file in <data dir>/raw/<source>/
    #[arg(conflicts_with = "file")]
    pub sources: Vec<String>,

    /// Ingest this JSON Lines file instead
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Source tag for records from --file that carry none [default: web]
    #[arg(long, requires = "file")]
    pub source: Option<String>,

    /// Hide the embedding progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The question to answer
    pub question: String,

    /// Number of sources to answer from
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_K)]
    pub count: usize,

    /// Only retrieve chunks from this source tag
    #[arg(short = 's', long)]
    pub source: Option<String>,

    /// Output the response as JSON
    #[arg(long)]
    pub json: bool,

    /// Add follow-up questions, related topics and a confidence estimate
    #[arg(long)]
    pub insights: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Clear --

#[derive(Debug, Parser)]
pub struct ClearArgs {
    /// Drop the whole collection instead of emptying it
    #[arg(long)]
    pub delete: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "campusrag",
            &mut std::io::stdout(),
        );
    }
}

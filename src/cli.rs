use std::path::PathBuf;

use askdoc::{Settings, retrieval::RetrieveParams, settings::EmbedderKind};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "askdoc",
    about = "Hybrid lexical and semantic retrieval over document chunks"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Embedding backend
    #[arg(long, value_enum, global = true)]
    pub embedder: Option<EmbedderKind>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index chunks from a JSON file
    Index(IndexArgs),
    /// Rank indexed chunks against a query
    Search(SearchArgs),
    /// Answer a question from the indexed chunks
    Ask(AskArgs),
    /// Remove chunks from every index
    Remove(RemoveArgs),
    /// Show index statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// JSON array of chunk records, or `-` for stdin
    pub file: PathBuf,

    /// Treat the file as the whole corpus and rebuild both indexes
    #[arg(long)]
    pub reindex_all: bool,

    /// Output the build report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Retrieval --

#[derive(Debug, Clone, Parser)]
pub struct RetrievalArgs {
    /// Lexical candidates to consider
    #[arg(long)]
    pub top_k_lexical: Option<usize>,

    /// Vector candidates to consider
    #[arg(long)]
    pub top_k_vector: Option<usize>,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Rerank fused candidates with the pairwise model
    #[arg(long)]
    pub rerank: bool,
}

impl RetrievalArgs {
    /// Flags override the configured defaults.
    pub fn params(&self, settings: &Settings) -> RetrieveParams {
        let defaults = settings.retrieve_params(self.rerank);
        RetrieveParams {
            top_k_lexical: self.top_k_lexical.unwrap_or(defaults.top_k_lexical),
            top_k_vector: self.top_k_vector.unwrap_or(defaults.top_k_vector),
            top_n: self.count.unwrap_or(defaults.top_n),
            rerank: self.rerank,
        }
    }
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// Output the answer and its context as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Remove --

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Chunk ids to remove
    #[arg(required = true)]
    pub chunk_ids: Vec<u64>,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
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
            "askdoc",
            &mut std::io::stdout(),
        );
    }
}

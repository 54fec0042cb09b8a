use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docrag",
    about = "Index PDFs into a local vector store and ask grounded questions"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

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
    /// Copy PDF files into the documents directory
    Add(AddArgs),
    /// Index documents that have not been indexed yet
    Index(IndexArgs),
    /// Semantic search over indexed chunks
    Search(SearchArgs),
    /// Answer a question from the indexed documents
    Ask(AskArgs),
    /// Show index statistics
    Stats(StatsArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Manage the ColBERT model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Show or change persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in config.redb
    Set {
        /// Model ID (HuggingFace) or local path
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show effective settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Store a setting
    Set { key: String, value: String },
    /// Remove a stored setting (revert to default)
    Unset { key: String },
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// PDF files to add
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Directory to index instead of the documents directory
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (default: the top_k setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Return nearest neighbours by similarity, without MMR reranking
    #[arg(long)]
    pub no_rerank: bool,

    /// MMR relevance weight (default: the mmr_lambda setting)
    #[arg(long)]
    pub lambda: Option<f32>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    /// Number of chunks to retrieve (default: the top_k setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output the answer and its sources as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
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
            "docrag",
            &mut std::io::stdout(),
        );
    }
}

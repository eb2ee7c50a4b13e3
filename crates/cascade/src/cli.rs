use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(version)]
#[command(about = "Cost-aware cascading query router")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write default configuration and knowledge base
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Route a single query and print its trace
    Route {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Print the sealed trace as JSON
        #[arg(long)]
        json: bool,

        /// Abandon the query after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Route one query per line from a file (or stdin)
    Batch {
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Queries routed at once
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Show recent traces
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// Show one trace in full
        #[arg(long)]
        id: Option<String>,
    },

    /// Routing distribution, latency and cost report
    Report {
        #[arg(long)]
        json: bool,
    },

    /// Print version information
    Version,
}

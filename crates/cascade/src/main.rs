mod cli;
mod commands;
mod settings;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => commands::init::run(force),
        Commands::Route {
            query,
            json,
            deadline_ms,
        } => commands::route::run(&query.join(" "), json, deadline_ms).await,
        Commands::Batch {
            file,
            concurrency,
            deadline_ms,
        } => commands::batch::run(file.as_deref(), concurrency, deadline_ms).await,
        Commands::History { limit, id } => commands::history::run(limit, id.as_deref()),
        Commands::Report { json } => commands::report::run(json),
        Commands::Version => commands::version::run(),
    }
}

//! Nova CLI - run notebook documents headlessly.

mod colors;
mod document;
mod output;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nova")]
#[command(about = "Evaluate Nova notebook documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a notebook document
    Run {
        /// Path to the notebook document (.json)
        document: PathBuf,

        /// Evaluate only the cell with this id
        #[arg(long)]
        cell: Option<u64>,

        /// Print engine events as JSON lines instead of a report
        #[arg(long)]
        json: bool,

        /// Directory for staging downloaded plugins
        #[arg(long)]
        plugin_dir: Option<PathBuf>,
    },

    /// List the built-in languages
    Languages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format nova-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(nova_err) = err.downcast_ref::<nova_core::Error>() {
            anyhow::anyhow!("{}", nova_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            document,
            cell,
            json,
            plugin_dir,
        } => {
            let options = run::RunOptions {
                cell,
                json,
                plugin_dir,
            };
            run::execute(&document, options).await.map_err(format_error)?;
        }

        Commands::Languages => output::print_languages(),
    }

    Ok(())
}

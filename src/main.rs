use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rust_sproc_analyzer::{analyze_path, AnalysisMode, AnalyzeOptions};

#[derive(Parser)]
#[command(name = "rust-sproc-analyzer")]
#[command(author, version, about = "Fast structural analyzer for T-SQL stored procedures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a .sql file (or a directory of them) into JSON documents
    Analyze {
        /// Path to a .sql file or a directory of .sql files
        #[arg(short, long)]
        input: PathBuf,

        /// Output .json file, or output directory when the input is a directory
        #[arg(short, long)]
        output: PathBuf,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,

        /// Only run structure, operation and rule analysis
        #[arg(short, long)]
        basic: bool,

        /// Procedure name (single-file mode; defaults to the header name or file stem)
        #[arg(short, long)]
        name: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "rust_sproc_analyzer=info"
    } else {
        "rust_sproc_analyzer=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            verbose,
            pretty,
            basic,
            name,
        } => {
            init_logging(verbose);

            let options = AnalyzeOptions {
                input_path: input,
                output_path: output,
                name,
                pretty,
                mode: if basic {
                    AnalysisMode::Basic
                } else {
                    AnalysisMode::Full
                },
            };

            analyze_path(&options)?;
        }
    }

    Ok(())
}

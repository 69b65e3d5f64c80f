//! CastorDB command-line interface.
//!
//! # Usage
//!
//! ```bash
//! # Start the interactive shell
//! castor --data-dir ./my-db
//!
//! # Execute a single command
//! castor -c "insert 1 apple"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use castor_engine::{Engine, EngineConfig};

mod commands;
mod repl;

use commands::{execute, Command, CommandOutcome};

/// The engine instantiation the CLI works with: 64-bit integer keys and
/// 16-byte text values.
pub(crate) type CliEngine = Engine<i64, castor_engine::FixedBytes<16>>;

/// CastorDB command-line interface
#[derive(Parser, Debug)]
#[command(
    name = "castor",
    version,
    about = "Command-line interface for CastorDB",
    long_about = "An interactive shell for a CastorDB database.\n\n\
                  Commands: insert <key> <value>, delete <key>, search <key>,\n\
                  print, stats, help, quit."
)]
struct Args {
    /// Data directory
    #[arg(short = 'd', long, default_value = "./castor-data", env = "CASTOR_DATA_DIR")]
    data_dir: PathBuf,

    /// Maximum keys per B+-tree node
    #[arg(long, default_value_t = 64)]
    max_keys: usize,

    /// Page cache capacity (pages)
    #[arg(long, default_value_t = 100)]
    cache_size: usize,

    /// Execute a single command and exit
    #[arg(short = 'c', long)]
    command: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = EngineConfig::with_data_dir(&args.data_dir);
    config.max_keys_per_node = args.max_keys;
    config.cache.max_cache_size = args.cache_size;

    let engine: CliEngine = Engine::open(config)
        .with_context(|| format!("failed to open database at {}", args.data_dir.display()))?;

    let code = if let Some(line) = &args.command {
        let command = Command::parse(line).map_err(anyhow::Error::msg)?;
        match execute(&engine, command)? {
            CommandOutcome::Continue(output) => {
                if !output.is_empty() {
                    println!("{output}");
                }
                ExitCode::SUCCESS
            }
            CommandOutcome::Quit => ExitCode::SUCCESS,
        }
    } else {
        repl::run(&engine)?
    };

    engine.close().context("failed to close database")?;
    Ok(code)
}

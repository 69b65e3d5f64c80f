//! The interactive shell.

use std::process::ExitCode;

use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use crate::commands::{execute, Command, CommandOutcome};
use crate::CliEngine;

const PROMPT: &str = "castor> ";

/// Runs the read-eval-print loop until `quit` or EOF.
pub fn run(engine: &CliEngine) -> anyhow::Result<ExitCode> {
    let mut editor = DefaultEditor::new().context("failed to initialise line editor")?;
    println!("CastorDB shell; type 'help' for commands.");

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                let command = match Command::parse(line) {
                    Ok(command) => command,
                    Err(message) => {
                        println!("{message}");
                        continue;
                    }
                };

                match execute(engine, command) {
                    Ok(CommandOutcome::Continue(output)) => {
                        if !output.is_empty() {
                            println!("{output}");
                        }
                    }
                    Ok(CommandOutcome::Quit) => break,
                    Err(e) => println!("error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                debug!("input closed, leaving shell");
                break;
            }
            Err(e) => return Err(e).context("line editor failure"),
        }
    }

    Ok(ExitCode::SUCCESS)
}

//! Command parsing and execution.

use castor_engine::{CastorResult, FixedBytes};

use crate::CliEngine;

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `insert <key> <value>`
    Insert {
        /// Integer key.
        key: i64,
        /// Value text (at most 16 bytes).
        value: String,
    },
    /// `delete <key>`
    Delete {
        /// Integer key.
        key: i64,
    },
    /// `search <key>`
    Search {
        /// Integer key.
        key: i64,
    },
    /// `print`
    Print,
    /// `stats`
    Stats,
    /// `help`
    Help,
    /// `quit` / `exit`
    Quit,
}

/// What the caller should do after executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Keep going; print this output.
    Continue(String),
    /// Leave the shell.
    Quit,
}

const HELP: &str = "\
commands:
  insert <key> <value>   store a value (integer key, text up to 16 bytes)
  delete <key>           remove a key
  search <key>           look a key up
  print                  dump the tree structure
  stats                  show engine statistics
  help                   show this help
  quit                   exit";

impl Command {
    /// Parses a command line.
    ///
    /// # Errors
    ///
    /// Returns a usage message for malformed input.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err("empty command; try 'help'".to_string());
        };

        match verb {
            "insert" => {
                let key = parse_key(parts.next())?;
                let value = parts.next().ok_or("usage: insert <key> <value>")?;
                expect_end(parts.next(), "insert <key> <value>")?;
                Ok(Self::Insert {
                    key,
                    value: value.to_string(),
                })
            }
            "delete" => {
                let key = parse_key(parts.next())?;
                expect_end(parts.next(), "delete <key>")?;
                Ok(Self::Delete { key })
            }
            "search" => {
                let key = parse_key(parts.next())?;
                expect_end(parts.next(), "search <key>")?;
                Ok(Self::Search { key })
            }
            "print" => Ok(Self::Print),
            "stats" => Ok(Self::Stats),
            "help" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{other}'; try 'help'")),
        }
    }
}

fn parse_key(token: Option<&str>) -> Result<i64, String> {
    let token = token.ok_or("missing key")?;
    token
        .parse()
        .map_err(|_| format!("key '{token}' is not an integer"))
}

fn expect_end(token: Option<&str>, usage: &str) -> Result<(), String> {
    match token {
        None => Ok(()),
        Some(_) => Err(format!("usage: {usage}")),
    }
}

/// Executes a command against the engine.
///
/// # Errors
///
/// Propagates engine failures; user-level misses (key not found) are
/// reported in the output text instead.
pub fn execute(engine: &CliEngine, command: Command) -> CastorResult<CommandOutcome> {
    let output = match command {
        Command::Insert { key, value } => {
            let value = FixedBytes::<16>::from_text(&value)?;
            engine.insert(key, value)?;
            format!("inserted {key}")
        }
        Command::Delete { key } => {
            if engine.delete(&key)? {
                format!("deleted {key}")
            } else {
                format!("key {key} not found")
            }
        }
        Command::Search { key } => match engine.search(&key)? {
            Some(value) => format!("{key} -> {}", value.as_text()),
            None => format!("key {key} not found"),
        },
        Command::Print => engine.dump_tree()?,
        Command::Stats => render_stats(engine)?,
        Command::Help => HELP.to_string(),
        Command::Quit => return Ok(CommandOutcome::Quit),
    };
    Ok(CommandOutcome::Continue(output))
}

fn render_stats(engine: &CliEngine) -> CastorResult<String> {
    let stats = engine.stats()?;
    Ok(format!(
        "tree      : height={} keys={} pages={}\n\
         store     : blobs={} ids={} keys={} bytes={} dedup_hits={}\n\
         cache     : size={} dirty={} hits={} misses={} evictions={}\n\
         writer    : written={} rejected={} depth={}\n\
         wal       : size={}B next_lsn={} checkpoint_lsn={} syncs={}\n\
         scheduler : executed={} failed={} healthy={}\n\
         checkpoint: completed={} failed={}",
        stats.tree.height,
        stats.tree.key_count,
        stats.tree.page_count,
        stats.store.unique_blobs,
        stats.store.assigned_ids,
        stats.store.total_keys,
        stats.store.total_data_bytes,
        stats.store.dedup_hits,
        stats.cached_pages,
        stats.dirty_pages,
        stats.cache.hits,
        stats.cache.misses,
        stats.cache.evictions,
        stats.writer.pages_written,
        stats.writer.rejected,
        stats.writer.queue_depth,
        stats.wal_size,
        stats.next_lsn,
        stats.last_checkpoint_lsn,
        stats.wal.syncs,
        stats.scheduler.total_executed,
        stats.scheduler.failed,
        stats.scheduler.is_healthy,
        stats.checkpoints.completed,
        stats.checkpoints.failed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use castor_engine::{Engine, EngineConfig};
    use tempfile::TempDir;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("insert 1 apple").unwrap(),
            Command::Insert {
                key: 1,
                value: "apple".to_string()
            }
        );
        assert_eq!(Command::parse("delete 2").unwrap(), Command::Delete { key: 2 });
        assert_eq!(Command::parse("search -5").unwrap(), Command::Search { key: -5 });
        assert_eq!(Command::parse("print").unwrap(), Command::Print);
        assert_eq!(Command::parse("stats").unwrap(), Command::Stats);
        assert_eq!(Command::parse("quit").unwrap(), Command::Quit);
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("insert").is_err());
        assert!(Command::parse("insert x apple").is_err());
        assert!(Command::parse("delete 1 2").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn test_execute_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine: CliEngine = Engine::open(EngineConfig::for_testing(dir.path())).unwrap();

        let out = execute(&engine, Command::parse("insert 1 apple").unwrap()).unwrap();
        assert_eq!(out, CommandOutcome::Continue("inserted 1".to_string()));

        let out = execute(&engine, Command::parse("search 1").unwrap()).unwrap();
        assert_eq!(out, CommandOutcome::Continue("1 -> apple".to_string()));

        let out = execute(&engine, Command::parse("delete 1").unwrap()).unwrap();
        assert_eq!(out, CommandOutcome::Continue("deleted 1".to_string()));

        let out = execute(&engine, Command::parse("search 1").unwrap()).unwrap();
        assert_eq!(out, CommandOutcome::Continue("key 1 not found".to_string()));

        assert_eq!(
            execute(&engine, Command::Quit).unwrap(),
            CommandOutcome::Quit
        );
        engine.close().unwrap();
    }

    #[test]
    fn test_oversized_value_rejected() {
        let dir = TempDir::new().unwrap();
        let engine: CliEngine = Engine::open(EngineConfig::for_testing(dir.path())).unwrap();

        let cmd = Command::Insert {
            key: 1,
            value: "a value that is far too long".to_string(),
        };
        assert!(execute(&engine, cmd).is_err());
        engine.close().unwrap();
    }
}

//! Command-line access to a MemBot memory database.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use membot_rs::config::MembotConfig;
use membot_rs::init_logging;
use membot_rs::memory::{
    DurableStore, Exchange, GatewaySettings, MemoryGateway, SearchOutcome, SqliteStore,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line options for the memory CLI.
#[derive(Debug, Parser)]
#[command(name = "membot", version, about = "Inspect and feed MemBot's tiered memory")]
struct Cli {
    /// Optional path to a membot.json5 config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Memory namespace override
    #[arg(long, global = true)]
    namespace: Option<String>,
    /// Conversation thread override
    #[arg(long, global = true)]
    thread: Option<String>,
    /// SQLite database path override
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Remember one user/assistant exchange
    Record {
        #[arg(long)]
        user: String,
        #[arg(long)]
        assistant: String,
    },
    /// Look up the first memory containing the query
    Search { query: String },
    /// Show the earliest remembered exchange
    First,
    /// Print stored memories, oldest first
    Dump {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the saved conversation history
    History,
    /// Show cache and store counters
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let settings = GatewaySettings::from(&config);

    let store: Arc<dyn DurableStore> = match config.memory.path.as_deref() {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("failed to open memory database at {path}"))?,
        ),
        None => {
            warn!("no memory path configured; using an in-memory database");
            Arc::new(SqliteStore::open_in_memory().context("failed to open in-memory database")?)
        }
    };

    let gateway = MemoryGateway::start(settings, store).await;
    let namespace = gateway.default_namespace().to_string();
    let outcome = run(&gateway, &namespace, cli.command).await;

    let report = gateway.shutdown().await;
    for (failed, err) in &report.failures {
        eprintln!("warning: final flush failed for {failed}: {err}");
    }
    if !report.history_saved {
        eprintln!("warning: conversation history was not saved");
    }
    outcome
}

/// Resolve the config file or layers, then apply CLI overrides.
fn load_config(cli: &Cli) -> anyhow::Result<MembotConfig> {
    let mut config = if let Some(path) = cli.config.as_ref() {
        MembotConfig::load_from_path(path).context("failed to load config")?
    } else {
        let cwd = std::env::current_dir().context("failed to resolve current working directory")?;
        let layered = MembotConfig::load_layered(&cwd).context("failed to load layered config")?;
        debug!("layered config loaded (layers={})", layered.layers.len());
        layered.config
    };
    if let Some(namespace) = cli.namespace.as_ref() {
        config.memory.namespace = namespace.clone();
    }
    if let Some(thread) = cli.thread.as_ref() {
        config.session.thread_id = thread.clone();
    }
    if let Some(db) = cli.db.as_ref() {
        config.memory.path = Some(db.to_string_lossy().to_string());
    }
    config.validate().context("invalid configuration")?;
    info!(
        "config resolved (namespace={}, thread_id={}, capacity={}, batch_threshold={})",
        config.memory.namespace,
        config.session.thread_id,
        config.memory.capacity,
        config.memory.batch_threshold
    );
    Ok(config)
}

async fn run(gateway: &MemoryGateway, namespace: &str, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Record { user, assistant } => {
            if user.trim().is_empty() {
                bail!("--user must not be empty");
            }
            let entry = gateway.record(namespace, &Exchange::new(user, assistant));
            println!("recorded #{} in {}: {}", entry.sequence, namespace, entry.original);
        }
        Command::Search { query } => print_outcome(&gateway.search(namespace, &query).await),
        Command::First => print_outcome(&gateway.recall_first_exchange(namespace).await),
        Command::Dump { limit } => {
            let entries = gateway
                .stored_entries(namespace, limit)
                .await
                .context("failed to read stored memories")?;
            if entries.is_empty() {
                println!("no stored memories in {namespace}");
            }
            for entry in entries {
                println!(
                    "{}\t{}\t{}",
                    entry.sequence,
                    entry.recorded_at.to_rfc3339(),
                    entry.original
                );
            }
        }
        Command::History => {
            let history = gateway.get_history(gateway.thread_id()).await;
            for message in history.messages() {
                println!("{}: {}", message.role.as_str(), message.content);
            }
        }
        Command::Stats => {
            let stats = gateway.stats(namespace).await;
            println!("namespace: {}", stats.namespace);
            println!("state: {:?}", stats.state);
            println!("resident: {}/{}", stats.resident, stats.capacity);
            println!("pending: {} (threshold {})", stats.pending, stats.batch_threshold);
            match stats.durable {
                Some(count) => println!("stored: {count}"),
                None => println!("stored: unavailable"),
            }
            println!("flusher: {}", if stats.flusher_running { "running" } else { "idle" });
        }
    }
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    match outcome {
        SearchOutcome::Found(hit) => println!("{} [{:?}]", hit.text(), hit.tier),
        SearchOutcome::NotFound => println!("no memory found"),
        SearchOutcome::Degraded { reason } => {
            println!("no memory found (store unavailable: {reason})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "membot", "search", "hi", "--namespace", "alice", "--db", "mem.db",
        ])
        .expect("parse");
        assert_eq!(cli.namespace.as_deref(), Some("alice"));
        assert_eq!(cli.db, Some(PathBuf::from("mem.db")));
        assert!(matches!(cli.command, Command::Search { ref query } if query == "hi"));
    }

    #[test]
    fn record_requires_both_sides() {
        assert!(Cli::try_parse_from(["membot", "record", "--user", "hi"]).is_err());
        let cli = Cli::try_parse_from(["membot", "record", "--user", "hi", "--assistant", "hello"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Record { ref user, ref assistant } if user == "hi" && assistant == "hello"
        ));
    }

    #[test]
    fn dump_limit_is_optional() {
        let cli = Cli::try_parse_from(["membot", "dump"]).expect("parse");
        assert!(matches!(cli.command, Command::Dump { limit: None }));
        let cli = Cli::try_parse_from(["membot", "dump", "--limit", "5"]).expect("parse");
        assert!(matches!(cli.command, Command::Dump { limit: Some(5) }));
    }
}

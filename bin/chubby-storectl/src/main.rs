//! chubby-storectl - storage directory inspection tool
//!
//! Opens a node's operation log, consensus metadata and namespaced store
//! directly from disk. Run it only while the node is stopped.

use anyhow::{Context, Result, bail};
use chubby_common::Config;
use chubby_storage::{ConsensusMeta, Database, LogEntry, LogOptions, OperationLog};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "chubby-storectl")]
#[command(about = "Inspect and maintain chubby node storage")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/chubby/storage.toml")]
    config: PathBuf,

    /// Storage root (overrides storage.data_dir)
    #[arg(long, env = "CHUBBY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Operation log
    Log {
        #[command(subcommand)]
        action: LogCommands,
    },
    /// Consensus metadata
    Meta {
        #[command(subcommand)]
        action: MetaCommands,
    },
    /// Namespaced key-value data
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
}

#[derive(Subcommand, Debug)]
enum LogCommands {
    /// Show length, last index and last term
    Info,
    /// Print entries
    Dump {
        /// First slot to print
        #[arg(long, default_value = "0")]
        from: i64,
        /// Maximum number of entries
        #[arg(long)]
        limit: Option<usize>,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Discard every entry after INDEX (-1 empties the log)
    Truncate {
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },
    /// Delete entries below INDEX and compact
    Gc { index: i64 },
}

#[derive(Subcommand, Debug)]
enum MetaCommands {
    /// Show current term, votes and root principal
    Show,
}

#[derive(Subcommand, Debug)]
enum DataCommands {
    /// Print a value
    Get { namespace: String, key: String },
    /// Set a value
    Put {
        namespace: String,
        key: String,
        value: String,
    },
    /// Remove a key
    Delete { namespace: String, key: String },
    /// List keys and values in order
    Scan {
        namespace: String,
        /// Start at the first key >= this one
        #[arg(long)]
        from: Option<String>,
    },
}

#[derive(Serialize)]
struct DumpLine<'a> {
    index: i64,
    #[serde(flatten)]
    entry: &'a LogEntry,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        Config::default()
    };

    // CLI takes precedence over the config file
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("Config file: {}", args.config.display());
    if !config.storage.data_dir.is_dir() {
        bail!(
            "storage directory {} does not exist",
            config.storage.data_dir.display()
        );
    }

    match args.command {
        Commands::Log { action } => run_log(&config, action),
        Commands::Meta { action } => run_meta(&config, action),
        Commands::Data { action } => run_data(&config, action),
    }
}

fn open_log(config: &Config) -> Result<OperationLog> {
    let storage = &config.storage;
    let options = LogOptions::with_config(storage.log_path(), &storage.log);
    Ok(OperationLog::open(&options)?)
}

fn run_log(config: &Config, action: LogCommands) -> Result<()> {
    let log = open_log(config)?;

    match action {
        LogCommands::Info => {
            let (last_index, last_term) = log.last_index_and_term();
            println!("Operation Log");
            println!("=============");
            println!("Path:       {}", log.path().display());
            println!("Length:     {}", log.length());
            println!("Last index: {last_index}");
            println!("Last term:  {last_term}");
        }
        LogCommands::Dump { from, limit, json } => {
            let end = match limit {
                Some(limit) => from.saturating_add(i64::try_from(limit)?),
                None => log.length(),
            };
            let end = end.min(log.length());
            for index in from.max(0)..end {
                let Some(entry) = log.read_slot(index)? else {
                    // Already garbage-collected
                    continue;
                };
                if json {
                    println!("{}", serde_json::to_string(&DumpLine { index, entry: &entry })?);
                } else {
                    println!(
                        "{:>8}  term={:<6} {:<7} user={:?} key={:?} value={:?}",
                        index,
                        entry.term,
                        format!("{:?}", entry.operation),
                        entry.user,
                        entry.key,
                        entry.value
                    );
                }
            }
        }
        LogCommands::Truncate { index } => {
            let before = log.length();
            log.truncate(index)?;
            info!("Truncated log from length {} to {}", before, log.length());
            println!("Log length: {} -> {}", before, log.length());
        }
        LogCommands::Gc { index } => {
            let removed = log.remove_slot_before(index)?;
            println!("Removed {removed} slots below {index}");
        }
    }
    Ok(())
}

fn run_meta(config: &Config, action: MetaCommands) -> Result<()> {
    let meta = ConsensusMeta::open(config.storage.meta_path())?;

    match action {
        MetaCommands::Show => {
            println!("Consensus Metadata");
            println!("==================");
            println!("Path:         {}", meta.dir().display());
            println!("Current term: {}", meta.read_current_term());
            match meta.read_root_info() {
                Ok(root) => println!("Root:         {}", root.name),
                Err(e) if e.is_not_found() => println!("Root:         (not set)"),
                Err(e) => return Err(e.into()),
            }

            let votes = meta.read_voted_for();
            println!();
            if votes.is_empty() {
                println!("No votes recorded");
            } else {
                println!("{:<12} {}", "TERM", "VOTED FOR");
                println!("{}", "-".repeat(40));
                for (term, server_id) in &votes {
                    println!("{term:<12} {server_id}");
                }
            }
        }
    }
    Ok(())
}

fn open_namespace(config: &Config, namespace: &str) -> Result<Database> {
    let storage = &config.storage;
    let db = Database::with_config(storage.data_path(), &storage.data)?;
    if !db.namespace_path(namespace).is_dir() {
        bail!(
            "namespace {namespace:?} does not exist in {}",
            db.path().display()
        );
    }
    db.open(namespace)?;
    Ok(db)
}

fn run_data(config: &Config, action: DataCommands) -> Result<()> {
    match action {
        DataCommands::Get { namespace, key } => {
            let db = open_namespace(config, &namespace)?;
            let value = db.get(&namespace, key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        DataCommands::Put {
            namespace,
            key,
            value,
        } => {
            let storage = &config.storage;
            let db: Database = Database::with_config(storage.data_path(), &storage.data)?;
            db.open(&namespace)?;
            db.put(&namespace, key.as_bytes(), value.as_bytes())?;
            info!("Set {:?} in namespace {:?}", key, namespace);
        }
        DataCommands::Delete { namespace, key } => {
            let db = open_namespace(config, &namespace)?;
            db.delete(&namespace, key.as_bytes())?;
            info!("Deleted {:?} from namespace {:?}", key, namespace);
        }
        DataCommands::Scan { namespace, from } => {
            let db = open_namespace(config, &namespace)?;
            let Some(mut it) = db.new_iterator(&namespace) else {
                bail!("namespace {namespace:?} is not open");
            };
            match &from {
                Some(key) => it.seek(key.as_bytes()),
                None => it.seek_to_first(),
            }
            let mut count = 0usize;
            while it.valid() {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(it.key()),
                    String::from_utf8_lossy(it.value())
                );
                count += 1;
                it.next();
            }
            it.status()?;
            debug!("Scanned {} keys", count);
        }
    }
    Ok(())
}

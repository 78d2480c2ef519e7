//! Command-line front end for the tinydb session manager.
//!
//! Each invocation resolves a stored connection, opens a session through
//! the registry, runs one command against it and prints the result as
//! pretty JSON on stdout. Logs go to stderr.
//!
//! # Security Guarantees
//! - Passwords are read from the connections file only, never from flags
//! - Connection targets are printed with credentials redacted

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tinydb_core::config::SessionConfig;
use tinydb_core::logging::init_logging;
use tinydb_core::models::CollectionPageOptions;
use tinydb_core::session::SessionRegistry;
use tinydb_core::store::{CONNECTIONS_FILE, ConnectionStore, JsonLinesStore, default_data_dir};
use tinydb_core::EngineDriver;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tinydb")]
#[command(about = "Browse and query databases through managed sessions")]
#[command(version)]
#[command(long_about = "
tinydb - database sessions from stored connections

Connections are read from a JSON-lines file, one connection per line:
  {\"_id\":\"c1\",\"engine\":\"mysql\",\"server\":\"localhost\",\"user\":\"root\",\"password\":\"...\"}

SUPPORTED ENGINES:
- SQLite (default feature)
- MySQL / MariaDB [if compiled with --features mysql]
- MongoDB [if compiled with --features mongodb]

EXAMPLES:
  tinydb connections
  tinydb structure c1 --database app
  tinydb query c1 --database app 'SELECT * FROM users'
  tinydb page c1 --database app --collection users --limit 20 --sort '{\"id\":-1}'
")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored connections
    Connections,
    /// Show the session status of a key
    Status(Target),
    /// Ping a session, opening it if needed
    Ping(Target),
    /// Print the structure of a database
    Structure(Target),
    /// Print the server version
    Version(Target),
    /// List databases visible to the connection
    Databases(Target),
    /// Execute one statement
    Query(QueryArgs),
    /// Read one page of a table or collection
    Page(PageArgs),
}

#[derive(Args)]
struct Target {
    /// Stored connection id
    #[arg(help = "Connection id from the connections file")]
    connection: String,

    /// Database name (engine default when omitted)
    #[arg(short, long, default_value = "")]
    database: String,
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    target: Target,

    /// Statement text (a JSON command document for MongoDB)
    statement: String,
}

#[derive(Args)]
struct PageArgs {
    #[command(flatten)]
    target: Target,

    /// Table or collection name
    #[arg(long)]
    collection: String,

    /// Rows to skip
    #[arg(long, default_value = "0")]
    skip: u64,

    /// Page size
    #[arg(long, default_value = "100")]
    limit: u32,

    /// Filter document as JSON (MongoDB only)
    #[arg(long)]
    filter: Option<String>,

    /// Sort specification as JSON, e.g. {"name":1}
    #[arg(long)]
    sort: Option<String>,
}

#[derive(Args)]
struct SessionArgs {
    /// Connections file
    #[arg(long, env = "TINYDB_CONNECTIONS", help = "Path of the connections file")]
    connections: Option<PathBuf>,

    /// Connect timeout in seconds
    #[arg(long, env = "TINYDB_CONNECT_TIMEOUT", default_value = "30")]
    connect_timeout: u64,

    /// Structure analysis timeout in seconds
    #[arg(long, env = "TINYDB_ANALYSIS_TIMEOUT", default_value = "120")]
    analysis_timeout: u64,

    /// Query timeout in seconds
    #[arg(long, env = "TINYDB_QUERY_TIMEOUT", default_value = "30")]
    query_timeout: u64,

    /// Maximum rows returned by one request
    #[arg(long, env = "TINYDB_MAX_ROWS", default_value = "1000")]
    max_rows: u32,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logs except errors")]
    quiet: bool,
}

impl SessionArgs {
    fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_analysis_timeout(Duration::from_secs(self.analysis_timeout))
            .with_query_timeout(Duration::from_secs(self.query_timeout))
            .with_max_rows(self.max_rows)
    }

    fn connections_path(&self) -> Result<PathBuf> {
        match &self.connections {
            Some(path) => Ok(path.clone()),
            None => default_data_dir()
                .map(|dir| dir.join(CONNECTIONS_FILE))
                .context("No home directory found; pass --connections"),
        }
    }
}

fn parse_json_arg(name: &str, raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    raw.map(|text| {
        serde_json::from_str(text).with_context(|| format!("--{} is not valid JSON", name))
    })
    .transpose()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    let path = cli.session.connections_path()?;
    debug!("Using connections file {}", path.display());
    let store = Arc::new(JsonLinesStore::new(path));

    if let Command::Connections = cli.command {
        return list_connections(store.as_ref()).await;
    }

    let config = cli.session.session_config();
    let registry = SessionRegistry::new(
        store,
        Arc::new(EngineDriver::new(config.clone())),
        config,
    )
    .context("Invalid session settings")?;

    let outcome = run(&registry, cli.command).await;
    registry.shutdown().await;
    outcome
}

async fn list_connections(store: &dyn ConnectionStore) -> Result<()> {
    let connections = store.list().await.context("Failed to read connections")?;
    let listing: Vec<serde_json::Value> = connections
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "engine": c.engine,
                "displayName": c.display_name,
                "target": c.to_string(),
            })
        })
        .collect();
    print_json(&listing)
}

async fn run(registry: &SessionRegistry, command: Command) -> Result<()> {
    match command {
        Command::Connections => Ok(()),
        Command::Status(target) => {
            let report = registry.status(&target.connection, &target.database).await;
            print_json(&report)
        }
        Command::Ping(target) => {
            let report = registry
                .ping(&target.connection, &target.database)
                .await
                .with_context(|| format!("Failed to ping {}", target.connection))?;
            print_json(&report)
        }
        Command::Structure(target) => {
            let session = registry
                .ensure_open(&target.connection, &target.database)
                .await
                .with_context(|| format!("Failed to open {}", target.connection))?;
            if session.status.is_error() {
                bail!(
                    "Session {} failed: {}",
                    session.key,
                    session.status.message.unwrap_or_default()
                );
            }
            info!("Structure of {} analysed at {:?}", session.key, session.analysed_time);
            print_json(&session.structure)
        }
        Command::Version(target) => {
            let version = registry
                .server_version(&target.connection, &target.database)
                .await
                .with_context(|| format!("Failed to open {}", target.connection))?;
            print_json(&version)
        }
        Command::Databases(target) => {
            let databases = registry
                .list_databases(&target.connection, &target.database)
                .await
                .context("Failed to list databases")?;
            print_json(&databases)
        }
        Command::Query(args) => {
            let result = registry
                .execute_query(&args.target.connection, &args.target.database, &args.statement)
                .await
                .context("Query failed")?;
            if result.truncated {
                info!("Result truncated to {} rows", result.rows.len());
            }
            print_json(&result)
        }
        Command::Page(args) => {
            let mut options = CollectionPageOptions::new(args.collection)
                .with_skip(args.skip)
                .with_limit(args.limit);
            if let Some(filter) = parse_json_arg("filter", args.filter.as_deref())? {
                options = options.with_filter(filter);
            }
            if let Some(sort) = parse_json_arg("sort", args.sort.as_deref())? {
                options = options.with_sort(sort);
            }
            let page = registry
                .collection_page(&args.target.connection, &args.target.database, options)
                .await
                .context("Failed to read page")?;
            print_json(&page)
        }
    }
}

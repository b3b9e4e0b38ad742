//! SQL Tools Service: entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use sqltools_batch::{BatchParser, ExecutionOptions, ParserOptions};
use sqltools_service::config::{self, resolve_log_file, HostOptions};
use sqltools_service::types::{
    query, DmpServerCapabilities, FeatureMetadata, ServerCapabilities, CAPABILITIES, EXIT,
    INITIALIZE, SERVICE_NAME, SERVICE_VERSION, SHUTDOWN, VERSION,
};
use sqltools_service::{
    Channel, JsonRpcHost, QueryExecutionService, ServiceHost, ServiceProvider,
    UnconnectedExecutorFactory,
};

#[derive(Parser)]
#[command(
    name = "sqltools-service",
    about = "JSON-RPC service host for SQL editor tooling",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory for log files. Implies --enable-logging.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write logs to a file instead of stderr.
    #[arg(long)]
    enable_logging: bool,

    /// Run handlers registered as parallel concurrently with the reader loop.
    #[arg(long)]
    parallel_message_processing: bool,

    /// Serve on a Unix domain socket at this path instead of stdio.
    #[arg(long)]
    pipe: Option<PathBuf>,

    /// Dispose finished queries left untouched for this many minutes.
    #[arg(long)]
    query_idle_minutes: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-RPC over stdio or --pipe (default).
    Serve,

    /// Print service capabilities as JSON.
    Info,

    /// Split a script into GO-separated batches and print them as JSON.
    Parse {
        /// Script to parse.
        file: PathBuf,

        /// Enable SQLCMD commands and $(variable) substitution.
        #[arg(long)]
        sqlcmd: bool,

        /// Predefine a SQLCMD variable (NAME=VALUE). Repeatable.
        #[arg(long = "var", value_parser = parse_variable)]
        variables: Vec<(String, String)>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   sqltools-service completions bash > ~/.local/share/bash-completion/completions/sqltools-service
    ///   sqltools-service completions zsh > ~/.zfunc/_sqltools-service
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn parse_variable(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

fn init_logging(cli: &Cli) -> anyhow::Result<Option<PathBuf>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    if !cli.enable_logging && cli.log_dir.is_none() {
        // stdout carries the protocol.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let path = resolve_log_file(cli.log_dir.as_deref());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(Some(path))
}

#[cfg(unix)]
async fn open_pipe(path: &Path) -> anyhow::Result<Channel> {
    Ok(Channel::accept_unix(path).await?)
}

#[cfg(not(unix))]
async fn open_pipe(path: &Path) -> anyhow::Result<Channel> {
    anyhow::bail!("--pipe {} is only supported on Unix platforms", path.display())
}

async fn serve(options: HostOptions) -> anyhow::Result<()> {
    let channel = match &options.pipe {
        Some(path) => open_pipe(path).await?,
        None => Channel::stdio(),
    };

    let host = JsonRpcHost::new(channel)
        .with_parallel_processing(options.parallel_message_processing);
    let service_host = ServiceHost::from_host(host)?;
    service_host.set_server_capabilities(ServerCapabilities::default());

    let query_service = Arc::new(QueryExecutionService::new(
        Arc::new(UnconnectedExecutorFactory),
        options.execution.clone(),
    ));
    let provider = ServiceProvider::new().with_service(query_service.clone());
    provider.register_all(&service_host)?;

    if let (Some(max_idle), Some(interval)) =
        (options.query_idle_timeout, options.eviction_interval())
    {
        tracing::info!("Evicting finished queries idle for {max_idle:?}");
        query_service.spawn_eviction(interval, max_idle, provider.background_token());
    }

    service_host.start()?;
    tracing::info!("{SERVICE_NAME} {SERVICE_VERSION} ready");

    service_host.wait_for_exit().await;
    provider.background_token().cancel();
    tracing::info!("{SERVICE_NAME} exiting");
    Ok(())
}

fn print_info() -> anyhow::Result<()> {
    let methods = [
        INITIALIZE.method(),
        SHUTDOWN.method(),
        EXIT.method(),
        VERSION.method(),
        CAPABILITIES.method(),
        query::EXECUTE_STRING.method(),
        query::CANCEL.method(),
        query::DISPOSE.method(),
    ];
    let events = [
        query::BATCH_START.method(),
        query::MESSAGE.method(),
        query::BATCH_COMPLETE.method(),
        query::COMPLETE.method(),
    ];
    let info = serde_json::json!({
        "name": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "capabilities": ServerCapabilities::default(),
        "provider": DmpServerCapabilities::new(vec![FeatureMetadata::enabled("query")]),
        "methods": methods,
        "events": events,
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn parse_script(file: &Path, sqlcmd: bool, variables: Vec<(String, String)>) -> anyhow::Result<()> {
    let script = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let mut options = if sqlcmd {
        ParserOptions::sqlcmd()
    } else {
        ParserOptions::default()
    };
    for (name, value) in variables {
        options = options.with_variable(name, value);
    }

    let parsed = BatchParser::new(options)
        .parse(&script)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => {
            if let Some(path) = init_logging(&cli)? {
                tracing::info!("Logging to {}", path.display());
            }
            let options = HostOptions {
                parallel_message_processing: cli.parallel_message_processing,
                pipe: cli.pipe.clone(),
                query_idle_timeout: cli.query_idle_minutes.map(config::from_minutes),
                execution: ExecutionOptions::default(),
            };
            serve(options).await?;
        }

        Some(Commands::Info) => print_info()?,

        Some(Commands::Parse {
            ref file,
            sqlcmd,
            ref variables,
        }) => parse_script(file, sqlcmd, variables.clone())?,

        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "sqltools-service", &mut std::io::stdout());
        }
    }

    Ok(())
}

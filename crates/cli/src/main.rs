use std::future::Future;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use rewind_cli::config::Config;
use rewind_cli::query::TransactionQuery;
use rewind_cli::telemetry::{self, LogFormat};
use rewind_cli::{inspect, mock_api, report_error, serve, OutputFormat};
use rewind_storage::ResourceSet;

/// Transactional rollback and sandboxed evaluation for resource stores.
#[derive(Parser)]
#[command(
    name = "rewind",
    version,
    about = "Transactional rollback and sandboxed evaluation for resource stores"
)]
struct Cli {
    /// Path to a rewind.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter when REWIND_LOG is unset (e.g. info, rewind_engine=debug)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log line format
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the rollback and evaluation control server
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Serve an in-memory resource store over the resource wire protocol
    MockApi {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,
        /// JSON resource set to load at startup
        #[arg(long)]
        seed: Option<PathBuf>,
        /// Env var holding a bearer token clients must present
        #[arg(long)]
        token_env: Option<String>,
    },

    /// Work with a transaction journal
    Log {
        #[command(subcommand)]
        command: LogCommands,
    },

    /// Work with the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Replay a journal and list its transactions
    Inspect {
        /// Path to the JSON-lines journal (defaults to [log] path)
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        resource_type: Option<String>,
        #[arg(long)]
        resource_id: Option<String>,
        /// production or sandbox
        #[arg(long)]
        backend: Option<String>,
        /// ACTIVE, ROLLED_BACK or ROLLBACK_FAILED
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        /// create, update or delete
        #[arg(long)]
        operation: Option<String>,
        /// Maximum number of transactions to show
        #[arg(long)]
        limit: Option<usize>,
        /// Show the newest transactions first
        #[arg(long)]
        newest_first: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load, validate and print the effective configuration
    Check,
}

fn main() {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.log_format);

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Serve {
            port,
            tls_cert,
            tls_key,
        } => {
            // Both must be provided or neither
            if tls_cert.is_some() != tls_key.is_some() {
                report_error(
                    "error: --tls-cert and --tls-key must both be provided",
                    cli.output,
                    cli.quiet,
                );
                process::exit(1);
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            block_on(serve::start_server(config, tls_cert, tls_key), cli.output, cli.quiet);
        }
        Commands::MockApi {
            port,
            seed,
            token_env,
        } => {
            let seed = match seed {
                Some(path) => match mock_api::load_seed(&path) {
                    Ok(set) => set,
                    Err(msg) => {
                        report_error(&msg, cli.output, cli.quiet);
                        process::exit(1);
                    }
                },
                None => ResourceSet::new(),
            };
            let token = token_env
                .and_then(|name| std::env::var(name).ok())
                .filter(|t| !t.is_empty());
            block_on(mock_api::start_mock_api(port, seed, token), cli.output, cli.quiet);
        }
        Commands::Log {
            command:
                LogCommands::Inspect {
                    path,
                    resource_type,
                    resource_id,
                    backend,
                    status,
                    session_id,
                    actor,
                    operation,
                    limit,
                    newest_first,
                },
        } => {
            let Some(path) = path.or_else(|| config.log.path.clone()) else {
                report_error(
                    "error: no journal path; pass --path or set [log] path",
                    cli.output,
                    cli.quiet,
                );
                process::exit(1);
            };
            let query = TransactionQuery {
                resource_type,
                resource_id,
                backend,
                status,
                session_id,
                actor,
                operation,
                limit,
                order: newest_first.then(|| "desc".to_string()),
            };
            let transactions = match runtime(cli.output, cli.quiet)
                .block_on(inspect::inspect(&path, query))
            {
                Ok(t) => t,
                Err(msg) => {
                    report_error(&msg, cli.output, cli.quiet);
                    process::exit(1);
                }
            };
            match cli.output {
                OutputFormat::Text => print!("{}", inspect::render_text(&transactions)),
                OutputFormat::Json => print_json(
                    &serde_json::json!({ "transactions": transactions }),
                    cli.output,
                    cli.quiet,
                ),
            }
        }
        Commands::Config {
            command: ConfigCommands::Check,
        } => match cli.output {
            OutputFormat::Text => match toml::to_string_pretty(&config) {
                Ok(text) => print!("{}", text),
                Err(e) => {
                    report_error(&format!("serialization error: {}", e), cli.output, cli.quiet);
                    process::exit(1);
                }
            },
            OutputFormat::Json => print_json(&config, cli.output, cli.quiet),
        },
    }
}

fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

fn block_on<F>(server: F, output: OutputFormat, quiet: bool)
where
    F: Future<Output = Result<(), Box<dyn std::error::Error>>>,
{
    if let Err(e) = runtime(output, quiet).block_on(server) {
        report_error(&format!("server error: {}", e), output, quiet);
        process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T, output: OutputFormat, quiet: bool) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            report_error(&format!("serialization error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

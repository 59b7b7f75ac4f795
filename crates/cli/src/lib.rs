//! The `rewind` binary's building blocks: configuration, logging setup, the
//! rollback/evaluation control server, the mock resource API and journal
//! inspection.

pub mod config;
pub mod inspect;
pub mod mock_api;
pub mod query;
pub mod serve;
pub mod telemetry;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print an error to stderr in the requested format.
pub fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}

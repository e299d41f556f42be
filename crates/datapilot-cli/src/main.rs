// crates/datapilot-cli/src/main.rs
// ============================================================================
// Module: DataPilot CLI Entry Point
// Description: Command dispatcher for serving and audit export workflows.
// Purpose: Wire configuration, stores, and the gateway into one binary.
// Dependencies: clap, datapilot-config, datapilot-core, datapilot-gateway,
//               datapilot-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! The `datapilot` binary loads configuration from `DATAPILOT_*` environment
//! variables and dispatches three commands: `serve` (run the gateway),
//! `config check` (validate and print the resolved configuration), and
//! `audit export` (stream a project's audit ledger as NDJSON to stdout).
//! Invalid configuration exits with code 2; an unavailable backing service
//! exits with code 1.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use datapilot_config::DataPilotConfig;
use datapilot_config::EXIT_BACKING_SERVICE_UNAVAILABLE;
use datapilot_config::EXIT_INVALID_CONFIG;
use datapilot_config::ObjectStoreBackend;
use datapilot_config::StoreBackend;
use datapilot_core::Clock;
use datapilot_core::InMemoryObjectStore;
use datapilot_core::InMemoryStore;
use datapilot_core::ObjectStore;
use datapilot_core::ProjectId;
use datapilot_core::SystemClock;
use datapilot_core::Timestamp;
use datapilot_core::interfaces::AuditLedger;
use datapilot_core::interfaces::LedgerQuery;
use datapilot_gateway::AppState;
use datapilot_gateway::GatewayStore;
use datapilot_gateway::IdentityVerifier;
use datapilot_gateway::LocalDirObjectStore;
use datapilot_gateway::S3ObjectStore;
use datapilot_store_sqlite::SqliteJournalMode;
use datapilot_store_sqlite::SqliteStore;
use datapilot_store_sqlite::SqliteStoreConfig;
use datapilot_store_sqlite::SqliteSyncMode;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "datapilot", version, about = "Animus DataPilot control plane")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the DataPilot gateway.
    Serve,
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Audit ledger utilities.
    Audit {
        /// Selected audit subcommand.
        #[command(subcommand)]
        command: AuditCommand,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the environment configuration and print the resolved form.
    Check,
}

/// Audit subcommands.
#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Export a project's audit ledger as NDJSON to stdout.
    Export {
        /// Project identifier to export.
        #[arg(long)]
        project: String,
        /// Inclusive lower bound (RFC 3339).
        #[arg(long)]
        from: Option<String>,
        /// Inclusive upper bound (RFC 3339).
        #[arg(long)]
        to: Option<String>,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match DataPilotConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            report_error(&format!("configuration error: {error}"));
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config {
            command: ConfigCommand::Check,
        } => config_check(&config),
        Commands::Audit {
            command:
                AuditCommand::Export {
                    project,
                    from,
                    to,
                },
        } => audit_export(&config, &project, from.as_deref(), to.as_deref()),
    }
}

// ============================================================================
// SECTION: Serve
// ============================================================================

/// Builds the stores and serves the gateway.
async fn serve(config: DataPilotConfig) -> ExitCode {
    let objects = match build_object_store(&config).await {
        Ok(objects) => objects,
        Err(code) => return code,
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier = IdentityVerifier::new(config.internal_auth_secret.clone().into_bytes());

    match config.store.backend {
        StoreBackend::Memory => {
            let state =
                AppState::new(Arc::new(InMemoryStore::new()), objects, clock, verifier);
            run_gateway(config, state).await
        }
        StoreBackend::Sqlite => match open_sqlite(&config) {
            Ok(store) => {
                let state = AppState::new(Arc::new(store), objects, clock, verifier);
                run_gateway(config, state).await
            }
            Err(code) => code,
        },
    }
}

/// Serves one concrete state until the process exits.
async fn run_gateway<S: GatewayStore>(config: DataPilotConfig, state: AppState<S>) -> ExitCode {
    match datapilot_gateway::serve(config.listen_addr, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_error(&format!("gateway failed: {error}"));
            ExitCode::from(EXIT_BACKING_SERVICE_UNAVAILABLE)
        }
    }
}

/// Opens the configured sqlite store.
fn open_sqlite(config: &DataPilotConfig) -> Result<SqliteStore, ExitCode> {
    let Some(path) = config.store.path.clone() else {
        report_error("configuration error: sqlite store requires DATAPILOT_STORE_PATH");
        return Err(ExitCode::from(EXIT_INVALID_CONFIG));
    };
    SqliteStore::new(SqliteStoreConfig {
        path,
        busy_timeout_ms: config.store.busy_timeout_ms,
        journal_mode: SqliteJournalMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    })
    .map_err(|error| {
        report_error(&format!("store unavailable: {error}"));
        ExitCode::from(EXIT_BACKING_SERVICE_UNAVAILABLE)
    })
}

/// Builds the configured object store backend.
async fn build_object_store(
    config: &DataPilotConfig,
) -> Result<Arc<dyn ObjectStore>, ExitCode> {
    match config.object_store.backend {
        ObjectStoreBackend::Memory => Ok(Arc::new(InMemoryObjectStore::new())),
        ObjectStoreBackend::Local => {
            let Some(root) = config.object_store.local_dir.clone() else {
                report_error(
                    "configuration error: local object store requires DATAPILOT_OBJECT_STORE_LOCAL_DIR",
                );
                return Err(ExitCode::from(EXIT_INVALID_CONFIG));
            };
            Ok(Arc::new(LocalDirObjectStore::new(root)))
        }
        ObjectStoreBackend::S3 => match S3ObjectStore::from_config(&config.object_store).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(error) => {
                report_error(&format!("object store unavailable: {error}"));
                Err(ExitCode::from(EXIT_BACKING_SERVICE_UNAVAILABLE))
            }
        },
    }
}

// ============================================================================
// SECTION: Config Check
// ============================================================================

/// Prints the resolved configuration with secrets elided.
fn config_check(config: &DataPilotConfig) -> ExitCode {
    let mut summary = config.clone();
    summary.internal_auth_secret = "<redacted>".to_string();
    if summary.object_store.secret_key.is_some() {
        summary.object_store.secret_key = Some("<redacted>".to_string());
    }
    match serde_json::to_string_pretty(&summary) {
        Ok(rendered) => {
            report_output(&rendered);
            ExitCode::SUCCESS
        }
        Err(error) => {
            report_error(&format!("configuration render failed: {error}"));
            ExitCode::from(EXIT_INVALID_CONFIG)
        }
    }
}

// ============================================================================
// SECTION: Audit Export
// ============================================================================

/// Exports a project's audit ledger as NDJSON to stdout.
fn audit_export(
    config: &DataPilotConfig,
    project: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> ExitCode {
    let store = match config.store.backend {
        StoreBackend::Memory => {
            report_error("audit export requires a durable store");
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
        StoreBackend::Sqlite => match open_sqlite(config) {
            Ok(store) => store,
            Err(code) => return code,
        },
    };

    let parse = |value: Option<&str>| -> Result<Option<Timestamp>, ExitCode> {
        value
            .map(Timestamp::parse_rfc3339)
            .transpose()
            .map_err(|error| {
                report_error(&format!("invalid time bound: {error}"));
                ExitCode::from(EXIT_INVALID_CONFIG)
            })
    };
    let from = match parse(from) {
        Ok(bound) => bound,
        Err(code) => return code,
    };
    let to = match parse(to) {
        Ok(bound) => bound,
        Err(code) => return code,
    };
    if let (Some(from), Some(to)) = (from, to)
        && to < from
    {
        report_error("invalid time bound: window ends before it starts");
        return ExitCode::from(EXIT_INVALID_CONFIG);
    }

    let query = LedgerQuery {
        from,
        to,
        after_event_id: None,
        limit: None,
    };
    let events = match store.list_audit(&ProjectId::new(project), &query) {
        Ok(events) => events,
        Err(error) => {
            report_error(&format!("audit read failed: {error}"));
            return ExitCode::from(EXIT_BACKING_SERVICE_UNAVAILABLE);
        }
    };

    for event in &events {
        match serde_json::to_string(event) {
            Ok(line) => report_output(&line),
            Err(error) => {
                report_error(&format!("audit encode failed: {error}"));
                return ExitCode::from(EXIT_BACKING_SERVICE_UNAVAILABLE);
            }
        }
    }
    ExitCode::SUCCESS
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one line to stdout.
#[allow(clippy::print_stdout, reason = "CLI output surface.")]
fn report_output(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
}

/// Writes one line to stderr.
#[allow(clippy::print_stderr, reason = "CLI diagnostic surface.")]
fn report_error(line: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{line}");
}

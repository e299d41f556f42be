// crates/datapilot-config/src/config.rs
// ============================================================================
// Module: DataPilot Configuration
// Description: Environment-variable configuration model and validation.
// Purpose: Load and validate every control-plane setting fail-closed.
// Dependencies: serde, thiserror, url
// ============================================================================

//! ## Overview
//! Every setting comes from a `DATAPILOT_*` environment variable. Loading
//! resolves defaults, parses typed values, and validates the result as one
//! unit; the first invalid value aborts the load. Secrets are kept out of
//! error messages.
//!
//! The object-store endpoint never includes a scheme; TLS is a separate flag.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// Process exit code for invalid configuration.
pub const EXIT_INVALID_CONFIG: u8 = 2;

/// Process exit code for an unreachable backing service at startup.
pub const EXIT_BACKING_SERVICE_UNAVAILABLE: u8 = 1;

/// Minimum accepted internal auth secret length in bytes.
const MIN_SECRET_BYTES: usize = 16;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// # Invariants
/// - Messages never embed secret values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    /// A variable has an invalid value.
    #[error("invalid value for {name}: {message}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Failure description (never the raw secret).
        message: String,
    },
    /// Audit export format is not supported.
    #[error("export_format_unsupported: {0}")]
    ExportFormatUnsupported(String),
    /// Audit export destination is not supported.
    #[error("export_destination_unsupported: {0}")]
    ExportDestinationUnsupported(String),
}

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Relational store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-memory store (tests and demos only).
    Memory,
    /// `SQLite` file store.
    Sqlite,
}

/// Relational store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Selected backend.
    pub backend: StoreBackend,
    /// Database file path (required for `sqlite`).
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

// ============================================================================
// SECTION: Object Store Config
// ============================================================================

/// Object store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreBackend {
    /// In-memory object store (tests and demos only).
    Memory,
    /// Local directory store.
    Local,
    /// S3-compatible store with signed PUT/GET.
    S3,
}

/// Object store configuration.
///
/// # Invariants
/// - `endpoint` never includes a scheme; `tls` selects https.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Selected backend.
    pub backend: ObjectStoreBackend,
    /// Host[:port] endpoint without a scheme (required for `s3`).
    pub endpoint: Option<String>,
    /// Region label (required for `s3`).
    pub region: Option<String>,
    /// Access key identifier (required for `s3`).
    pub access_key: Option<String>,
    /// Secret access key (required for `s3`).
    pub secret_key: Option<String>,
    /// Whether to use TLS for the endpoint.
    pub tls: bool,
    /// Local directory root (required for `local`).
    pub local_dir: Option<PathBuf>,
    /// Bucket for dataset version content.
    pub bucket_datasets: String,
    /// Bucket for artifact content.
    pub bucket_artifacts: String,
}

// ============================================================================
// SECTION: Audit Export Config
// ============================================================================

/// Audit export configuration.
///
/// # Invariants
/// - Only `ndjson` over `http` is supported; other values fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditExportConfig {
    /// Export format label.
    pub format: String,
    /// Export destination label.
    pub destination: String,
}

impl Default for AuditExportConfig {
    fn default() -> Self {
        Self {
            format: "ndjson".to_string(),
            destination: "http".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Complete control-plane configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPilotConfig {
    /// Gateway listen address.
    pub listen_addr: SocketAddr,
    /// Relational store settings.
    pub store: StoreConfig,
    /// Object store settings.
    pub object_store: ObjectStoreConfig,
    /// Internal auth secret for identity-header verification.
    pub internal_auth_secret: String,
    /// Audit export settings.
    pub audit_export: AuditExportConfig,
    /// Log level label.
    pub log_level: String,
}

impl DataPilotConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on any missing or invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = env::vars().collect();
        Self::from_lookup(&|name| vars.get(name).cloned())
    }

    /// Loads configuration from an explicit lookup function (testable).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on any missing or invalid value.
    pub fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let listen_addr = parse_listen_addr(lookup("DATAPILOT_LISTEN_ADDR"))?;
        let store = parse_store(lookup)?;
        let object_store = parse_object_store(lookup)?;
        let internal_auth_secret = parse_secret(lookup("DATAPILOT_INTERNAL_AUTH_SECRET"))?;
        let audit_export = parse_audit_export(lookup)?;
        let log_level = lookup("DATAPILOT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            store,
            object_store,
            internal_auth_secret,
            audit_export,
            log_level,
        })
    }
}

// ============================================================================
// SECTION: Parsers
// ============================================================================

/// Parses the listen address, defaulting to loopback.
fn parse_listen_addr(value: Option<String>) -> Result<SocketAddr, ConfigError> {
    let raw = value.unwrap_or_else(|| "127.0.0.1:8080".to_string());
    raw.parse().map_err(|_| ConfigError::Invalid {
        name: "DATAPILOT_LISTEN_ADDR",
        message: format!("not a socket address: {raw}"),
    })
}

/// Parses the relational store block.
fn parse_store(lookup: &dyn Fn(&str) -> Option<String>) -> Result<StoreConfig, ConfigError> {
    let backend = match lookup("DATAPILOT_STORE").as_deref() {
        None | Some("sqlite") => StoreBackend::Sqlite,
        Some("memory") => StoreBackend::Memory,
        Some(other) => {
            return Err(ConfigError::Invalid {
                name: "DATAPILOT_STORE",
                message: format!("unknown store backend: {other}"),
            });
        }
    };
    let path = lookup("DATAPILOT_STORE_PATH").map(PathBuf::from);
    if backend == StoreBackend::Sqlite && path.is_none() {
        return Err(ConfigError::Missing("DATAPILOT_STORE_PATH"));
    }
    let busy_timeout_ms = match lookup("DATAPILOT_STORE_BUSY_TIMEOUT_MS") {
        None => 5_000,
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name: "DATAPILOT_STORE_BUSY_TIMEOUT_MS",
            message: format!("not an integer: {raw}"),
        })?,
    };
    Ok(StoreConfig {
        backend,
        path,
        busy_timeout_ms,
    })
}

/// Parses the object store block.
fn parse_object_store(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ObjectStoreConfig, ConfigError> {
    let backend = match lookup("DATAPILOT_OBJECT_STORE").as_deref() {
        None | Some("memory") => ObjectStoreBackend::Memory,
        Some("local") => ObjectStoreBackend::Local,
        Some("s3") => ObjectStoreBackend::S3,
        Some(other) => {
            return Err(ConfigError::Invalid {
                name: "DATAPILOT_OBJECT_STORE",
                message: format!("unknown object store backend: {other}"),
            });
        }
    };

    let endpoint = lookup("DATAPILOT_OBJECT_STORE_ENDPOINT");
    if let Some(raw) = endpoint.as_deref() {
        if raw.contains("://") {
            return Err(ConfigError::Invalid {
                name: "DATAPILOT_OBJECT_STORE_ENDPOINT",
                message: "endpoint must not include a scheme".to_string(),
            });
        }
        if raw.is_empty() {
            return Err(ConfigError::Invalid {
                name: "DATAPILOT_OBJECT_STORE_ENDPOINT",
                message: "endpoint must not be empty".to_string(),
            });
        }
    }

    let region = lookup("DATAPILOT_OBJECT_STORE_REGION");
    let access_key = lookup("DATAPILOT_OBJECT_STORE_ACCESS_KEY");
    let secret_key = lookup("DATAPILOT_OBJECT_STORE_SECRET_KEY");
    let local_dir = lookup("DATAPILOT_OBJECT_STORE_LOCAL_DIR").map(PathBuf::from);

    if backend == ObjectStoreBackend::S3 {
        if endpoint.is_none() {
            return Err(ConfigError::Missing("DATAPILOT_OBJECT_STORE_ENDPOINT"));
        }
        if region.is_none() {
            return Err(ConfigError::Missing("DATAPILOT_OBJECT_STORE_REGION"));
        }
        if access_key.is_none() {
            return Err(ConfigError::Missing("DATAPILOT_OBJECT_STORE_ACCESS_KEY"));
        }
        if secret_key.is_none() {
            return Err(ConfigError::Missing("DATAPILOT_OBJECT_STORE_SECRET_KEY"));
        }
    }
    if backend == ObjectStoreBackend::Local && local_dir.is_none() {
        return Err(ConfigError::Missing("DATAPILOT_OBJECT_STORE_LOCAL_DIR"));
    }

    let tls = match lookup("DATAPILOT_OBJECT_STORE_TLS").as_deref() {
        None => false,
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        Some(other) => {
            return Err(ConfigError::Invalid {
                name: "DATAPILOT_OBJECT_STORE_TLS",
                message: format!("not a boolean: {other}"),
            });
        }
    };

    let bucket_datasets =
        lookup("DATAPILOT_BUCKET_DATASETS").unwrap_or_else(|| "datapilot-datasets".to_string());
    let bucket_artifacts =
        lookup("DATAPILOT_BUCKET_ARTIFACTS").unwrap_or_else(|| "datapilot-artifacts".to_string());
    if bucket_datasets.is_empty() {
        return Err(ConfigError::Invalid {
            name: "DATAPILOT_BUCKET_DATASETS",
            message: "bucket must not be empty".to_string(),
        });
    }
    if bucket_artifacts.is_empty() {
        return Err(ConfigError::Invalid {
            name: "DATAPILOT_BUCKET_ARTIFACTS",
            message: "bucket must not be empty".to_string(),
        });
    }

    Ok(ObjectStoreConfig {
        backend,
        endpoint,
        region,
        access_key,
        secret_key,
        tls,
        local_dir,
        bucket_datasets,
        bucket_artifacts,
    })
}

/// Parses and bounds-checks the internal auth secret.
fn parse_secret(value: Option<String>) -> Result<String, ConfigError> {
    let secret = value.ok_or(ConfigError::Missing("DATAPILOT_INTERNAL_AUTH_SECRET"))?;
    if secret.len() < MIN_SECRET_BYTES {
        return Err(ConfigError::Invalid {
            name: "DATAPILOT_INTERNAL_AUTH_SECRET",
            message: format!("secret shorter than {MIN_SECRET_BYTES} bytes"),
        });
    }
    Ok(secret)
}

/// Parses the audit export block; only NDJSON over HTTP is supported.
fn parse_audit_export(
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<AuditExportConfig, ConfigError> {
    let format = lookup("DATAPILOT_AUDIT_EXPORT_FORMAT").unwrap_or_else(|| "ndjson".to_string());
    if format != "ndjson" {
        return Err(ConfigError::ExportFormatUnsupported(format));
    }
    let destination =
        lookup("DATAPILOT_AUDIT_EXPORT_DESTINATION").unwrap_or_else(|| "http".to_string());
    if destination != "http" {
        return Err(ConfigError::ExportDestinationUnsupported(destination));
    }
    Ok(AuditExportConfig {
        format,
        destination,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use std::collections::BTreeMap;

    use super::ConfigError;
    use super::DataPilotConfig;
    use super::ObjectStoreBackend;
    use super::StoreBackend;

    /// Builds a lookup over a literal variable map.
    fn lookup(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = entries
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    /// Minimal valid variable set.
    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DATAPILOT_STORE", "memory"),
            ("DATAPILOT_INTERNAL_AUTH_SECRET", "0123456789abcdef"),
        ]
    }

    #[test]
    fn minimal_environment_loads_with_defaults() {
        let config = DataPilotConfig::from_lookup(&lookup(&minimal())).expect("load");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.object_store.backend, ObjectStoreBackend::Memory);
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.audit_export.format, "ndjson");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn sqlite_backend_requires_a_path() {
        let vars = vec![("DATAPILOT_INTERNAL_AUTH_SECRET", "0123456789abcdef")];
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("missing path");
        assert!(matches!(err, ConfigError::Missing("DATAPILOT_STORE_PATH")));
    }

    #[test]
    fn secret_is_required_and_bounded() {
        let vars = vec![("DATAPILOT_STORE", "memory")];
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("missing secret");
        assert!(matches!(err, ConfigError::Missing("DATAPILOT_INTERNAL_AUTH_SECRET")));

        let mut vars = minimal();
        vars[1] = ("DATAPILOT_INTERNAL_AUTH_SECRET", "short");
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("short secret");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn endpoint_with_scheme_is_rejected() {
        let mut vars = minimal();
        vars.push(("DATAPILOT_OBJECT_STORE_ENDPOINT", "https://minio.local:9000"));
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("scheme rejected");
        match err {
            ConfigError::Invalid {
                name,
                message,
            } => {
                assert_eq!(name, "DATAPILOT_OBJECT_STORE_ENDPOINT");
                assert!(message.contains("scheme"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn s3_backend_requires_credentials() {
        let mut vars = minimal();
        vars.push(("DATAPILOT_OBJECT_STORE", "s3"));
        vars.push(("DATAPILOT_OBJECT_STORE_ENDPOINT", "minio.local:9000"));
        vars.push(("DATAPILOT_OBJECT_STORE_REGION", "us-east-1"));
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("missing keys");
        assert!(matches!(err, ConfigError::Missing("DATAPILOT_OBJECT_STORE_ACCESS_KEY")));
    }

    #[test]
    fn unsupported_export_values_are_rejected() {
        let mut vars = minimal();
        vars.push(("DATAPILOT_AUDIT_EXPORT_FORMAT", "parquet"));
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("format rejected");
        assert!(matches!(err, ConfigError::ExportFormatUnsupported(_)));

        let mut vars = minimal();
        vars.push(("DATAPILOT_AUDIT_EXPORT_DESTINATION", "kafka"));
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("destination rejected");
        assert!(matches!(err, ConfigError::ExportDestinationUnsupported(_)));
    }

    #[test]
    fn tls_flag_parses_booleans_only() {
        let mut vars = minimal();
        vars.push(("DATAPILOT_OBJECT_STORE_TLS", "yes"));
        let err = DataPilotConfig::from_lookup(&lookup(&vars)).expect_err("bad boolean");
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let mut vars = minimal();
        vars.push(("DATAPILOT_OBJECT_STORE_TLS", "true"));
        let config = DataPilotConfig::from_lookup(&lookup(&vars)).expect("load");
        assert!(config.object_store.tls);
    }
}

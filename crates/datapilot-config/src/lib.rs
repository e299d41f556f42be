// crates/datapilot-config/src/lib.rs
// ============================================================================
// Module: DataPilot Configuration Library
// Description: Environment-variable configuration for the control plane.
// Purpose: Provide strict, fail-closed configuration loading and exit codes.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! DataPilot is configured exclusively through `DATAPILOT_*` environment
//! variables: store location, object-store endpoint and buckets, the internal
//! auth secret, listen address, and audit export settings. Loading is strict
//! and fail-closed: any invalid value is a startup failure with exit code 2;
//! an unreachable backing service at startup exits with code 1.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditExportConfig;
pub use config::ConfigError;
pub use config::DataPilotConfig;
pub use config::EXIT_BACKING_SERVICE_UNAVAILABLE;
pub use config::EXIT_INVALID_CONFIG;
pub use config::ObjectStoreBackend;
pub use config::ObjectStoreConfig;
pub use config::StoreBackend;
pub use config::StoreConfig;

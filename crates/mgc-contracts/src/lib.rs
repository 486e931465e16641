//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema/version strings
//! that appear in machine-readable I/O.

pub const MODULE_SET_SCHEMA_VERSION: &str = "mgc.moduleset@0.1.0";
pub const MGC_DIAG_SCHEMA_VERSION: &str = "mgc.diag@0.1.0";
pub const MGC_REPORT_SCHEMA_VERSION: &str = "mgc.report@0.1.0";
pub const RESOLVED_GRAPH_SCHEMA_VERSION: &str = "mgc.resolved-graph@0.1.0";

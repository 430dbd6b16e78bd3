//! Data models for easy-db.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionConfig, ConnectionConfigError, ConnectionInfo, DEFAULT_POOL_ALIAS, DatabaseType,
};
pub use query::{
    Bind, BindType, BindVars, DEFAULT_ROW_LIMIT, OutBinds, Params, ProcedureRequest, QueryParam,
    Record, StatementMode, StatementRequest,
};

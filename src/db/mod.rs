//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management and per-call connection guards
//! - `:name` placeholder compilation for each back end
//! - Statement and procedure execution
//! - Type mappings from driver rows to JSON records
//! - Call fragment validation
//! - Database dispatch macros for reducing code duplication

pub mod executor;
pub mod guard;
#[macro_use]
pub mod macros;
pub mod params;
pub mod placeholders;
pub mod pool;
pub mod sql_validator;
pub mod types;

pub use executor::{StatementExecutor, table_function_sql};
pub use guard::ConnectionGuard;
pub use placeholders::{CompiledStatement, compile};
pub use pool::{DbConnection, DbPool, PoolManager};
pub use types::RowToRecord;

//! easy-db Library
//!
//! Pooled access to SQL databases (SQLite, PostgreSQL, MySQL) through four
//! calls: row query, cursor stream, stored procedure and table function.
//! Each call checks out one connection, runs one statement and gives the
//! connection back before it returns.

pub mod config;
pub mod db;
pub mod error;
pub mod facade;
pub mod format;
pub mod models;

pub use config::Config;
pub use db::PoolManager;
pub use error::{DbError, DbResult};
pub use facade::DbFacade;

//! Parameter binding utilities for database queries.
//!
//! This module provides functions to bind `QueryParam` values to database-specific
//! query objects.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Render a NULL, boolean or number as a PostgreSQL literal.
///
/// Text and bytes return `None` and must be bound.
pub(crate) fn postgres_literal(param: &QueryParam) -> Option<String> {
    let literal = match param {
        QueryParam::Null => "NULL".to_string(),
        QueryParam::Bool(true) => "TRUE".to_string(),
        QueryParam::Bool(false) => "FALSE".to_string(),
        // Parenthesized so a preceding '-' cannot turn it into a comment
        QueryParam::Int(v) if *v < 0 => format!("({v})"),
        QueryParam::Int(v) => v.to_string(),
        QueryParam::Float(v) if v.is_nan() => "'NaN'::float8".to_string(),
        QueryParam::Float(v) if v.is_infinite() && *v > 0.0 => "'Infinity'::float8".to_string(),
        QueryParam::Float(v) if v.is_infinite() => "'-Infinity'::float8".to_string(),
        QueryParam::Float(v) if v.is_sign_negative() => format!("({v:?})"),
        QueryParam::Float(v) => format!("{v:?}"),
        QueryParam::String(_) | QueryParam::Bytes(_) => return None,
    };
    Some(literal)
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

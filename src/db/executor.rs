//! Statement execution engine.
//!
//! This module runs compiled statements and procedure calls on a connection
//! that the caller has already checked out:
//! - Row fetch (only the requested number of rows is pulled from the cursor)
//! - Cursor streaming, one row at a time, in cursor order
//! - Stored procedure calls with IN, OUT and IN/OUT binds
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: session variables carry OUT and IN/OUT values
//! - `postgres`: OUT and IN/OUT values come back as the result row of `CALL`
//! - `sqlite`: rows only, SQLite has no stored procedures
//!
//! Errors raised before the first row arrives are reported as
//! [`DbError::ExecutionFailed`]. Errors after that are [`DbError::FetchFailed`]
//! and carry the number of rows already delivered.

use crate::db::placeholders::{
    CompiledStatement, Segment, placeholder_names, render, resolve_binds, tokenize,
};
use crate::db::pool::DbConnection;
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{Bind, BindType, BindVars, DatabaseType, OutBinds, Record};
use futures_util::{StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;
use std::time::Instant;
use tracing::debug;

/// Runs statements on a checked-out connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementExecutor {
    decode_binary: bool,
}

impl StatementExecutor {
    /// Create an executor that returns binary columns as base64.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor that decodes UTF-8 binary columns as text.
    pub fn with_decode_binary(decode_binary: bool) -> Self {
        Self { decode_binary }
    }

    /// Whether UTF-8 binary columns are decoded as text.
    pub fn decode_binary(&self) -> bool {
        self.decode_binary
    }

    /// Fetch at most `row_limit` rows.
    pub async fn fetch_rows(
        &self,
        conn: &mut DbConnection,
        statement: &CompiledStatement,
        row_limit: u32,
    ) -> DbResult<Vec<Record>> {
        if row_limit == 0 {
            return Err(DbError::invalid_input("Row limit must be greater than 0"));
        }

        let start = Instant::now();
        debug!(
            sql = %statement.sql,
            params = statement.params.len(),
            limit = row_limit,
            "Fetching rows"
        );

        let mut rows = Vec::new();
        self.visit_rows(conn, statement, Some(row_limit as usize), |record| {
            rows.push(record);
            Ok(())
        })
        .await?;

        debug!(
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetch complete"
        );
        Ok(rows)
    }

    /// Hand every row to `visit` in cursor order and return the row count.
    ///
    /// An error returned by `visit` stops the cursor and is passed through
    /// unchanged.
    pub async fn for_each_row<F>(
        &self,
        conn: &mut DbConnection,
        statement: &CompiledStatement,
        visit: F,
    ) -> DbResult<usize>
    where
        F: FnMut(Record) -> DbResult<()>,
    {
        let start = Instant::now();
        debug!(
            sql = %statement.sql,
            params = statement.params.len(),
            "Streaming rows"
        );

        let count = self.visit_rows(conn, statement, None, visit).await?;

        debug!(
            rows = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cursor exhausted"
        );
        Ok(count)
    }

    /// Stream every row and collect them in cursor order.
    pub async fn stream_rows(
        &self,
        conn: &mut DbConnection,
        statement: &CompiledStatement,
    ) -> DbResult<Vec<Record>> {
        let mut rows = Vec::new();
        self.for_each_row(conn, statement, |record| {
            rows.push(record);
            Ok(())
        })
        .await?;
        Ok(rows)
    }

    /// Call a stored procedure and collect its OUT and IN/OUT values.
    ///
    /// `fragment` is the call without the `CALL` keyword, for example
    /// `raise_salary(:emp, :pct, :new_salary)`.
    pub async fn call_procedure(
        &self,
        conn: &mut DbConnection,
        fragment: &str,
        binds: &BindVars,
    ) -> DbResult<OutBinds> {
        let segments = tokenize(fragment.trim(), conn.db_type());
        let names = placeholder_names(&segments);
        let resolved = resolve_binds(&names, binds)?;
        let call = ProcedureCall {
            segments: &segments,
            names: &names,
            binds: &resolved,
        };

        debug!(
            fragment = %fragment.trim(),
            binds = names.len(),
            outputs = call.outputs().count(),
            "Calling procedure"
        );

        impl_db_dispatch!(DbConnection, conn, {
            MySql(c) => mysql::call_procedure(c, &call).await,
            Postgres(c) => postgres::call_procedure(c, &call, self.decode_binary).await,
            SQLite(_) => Err(DbError::unsupported("stored procedures", DatabaseType::SQLite)),
        })
    }

    async fn visit_rows<F>(
        &self,
        conn: &mut DbConnection,
        statement: &CompiledStatement,
        limit: Option<usize>,
        visit: F,
    ) -> DbResult<usize>
    where
        F: FnMut(Record) -> DbResult<()>,
    {
        let limit = limit.unwrap_or(usize::MAX);
        impl_db_dispatch!(DbConnection, conn, {
            MySql(c) => mysql::visit_rows(c, statement, limit, self.decode_binary, visit).await,
            Postgres(c) => postgres::visit_rows(c, statement, limit, self.decode_binary, visit).await,
            SQLite(c) => sqlite::visit_rows(c, statement, limit, self.decode_binary, visit).await,
        })
    }
}

/// Wrap a table-function call fragment in a row-producing query.
pub fn table_function_sql(fragment: &str) -> String {
    format!("SELECT * FROM {}", fragment.trim())
}

/// Classify a driver error by how far the cursor got.
fn fetch_error(rows_fetched: usize, e: sqlx::Error) -> DbError {
    if rows_fetched == 0 {
        DbError::execution_failed(e)
    } else {
        DbError::fetch_failed(rows_fetched, e)
    }
}

/// A tokenized procedure call with its binds in placeholder order.
struct ProcedureCall<'a> {
    segments: &'a [Segment<'a>],
    names: &'a [&'a str],
    binds: &'a [&'a Bind],
}

impl<'a> ProcedureCall<'a> {
    fn bind_for(&self, name: &str) -> Option<&'a Bind> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.binds[idx])
    }

    /// OUT and IN/OUT binds in placeholder order.
    fn outputs(&self) -> impl Iterator<Item = (&'a str, BindType)> + '_ {
        self.names
            .iter()
            .zip(self.binds.iter())
            .filter_map(|(name, bind)| bind.bind_type().map(|t| (*name, t)))
    }
}

/// Build the out-bind map from a result record.
///
/// A column with the bind's name wins, otherwise the column at the bind's
/// output position is used. Missing values are `null`.
fn collect_outputs<'a>(
    outputs: impl Iterator<Item = (&'a str, BindType)>,
    record: Option<&Record>,
) -> OutBinds {
    outputs
        .enumerate()
        .map(|(idx, (name, bind_type))| {
            let raw = record
                .and_then(|r| r.get(name).or_else(|| r.values().nth(idx)))
                .cloned()
                .unwrap_or(JsonValue::Null);
            (name.to_string(), bind_type.coerce(raw))
        })
        .collect()
}

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use crate::models::QueryParam;
    use sqlx::MySql;
    use sqlx::pool::PoolConnection;

    pub async fn visit_rows<F>(
        conn: &mut PoolConnection<MySql>,
        statement: &CompiledStatement,
        limit: usize,
        decode_binary: bool,
        mut visit: F,
    ) -> DbResult<usize>
    where
        F: FnMut(Record) -> DbResult<()>,
    {
        let stream = if statement.params.is_empty() {
            use sqlx::Executor;
            (&mut **conn).fetch(statement.sql.as_str())
        } else {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_mysql_param(query, param);
            }
            query.fetch(&mut **conn)
        };
        let mut stream = stream.take(limit);

        let mut count = 0;
        while let Some(row) = stream.try_next().await.map_err(|e| fetch_error(count, e))? {
            visit(row.to_record(decode_binary))?;
            count += 1;
        }
        Ok(count)
    }

    fn session_var(name: &str) -> String {
        format!("@easydb_{name}")
    }

    pub async fn call_procedure(
        conn: &mut PoolConnection<MySql>,
        call: &ProcedureCall<'_>,
    ) -> DbResult<OutBinds> {
        // Seed output variables so stale session values never leak through
        for (name, bind) in call.names.iter().zip(call.binds.iter()) {
            let sql = match bind {
                Bind::In { .. } => continue,
                Bind::Out { .. } => format!("SET {} = NULL", session_var(name)),
                Bind::InOut { .. } => format!("SET {} = ?", session_var(name)),
            };
            let mut query = sqlx::query(&sql);
            if let Bind::InOut { value, .. } = bind {
                query = bind_mysql_param(query, value);
            }
            query
                .execute(&mut **conn)
                .await
                .map_err(DbError::execution_failed)?;
        }

        let mut inputs: Vec<&QueryParam> = Vec::new();
        let rendered = render(call.segments, |name| {
            match call.bind_for(name) {
                Some(Bind::In { value }) => {
                    inputs.push(value);
                    "?".to_string()
                }
                _ => session_var(name),
            }
        });
        let sql = format!("CALL {rendered}");
        let mut query = sqlx::query(&sql);
        for value in &inputs {
            query = bind_mysql_param(query, value);
        }
        query
            .execute(&mut **conn)
            .await
            .map_err(DbError::execution_failed)?;

        if call.outputs().next().is_none() {
            return Ok(OutBinds::new());
        }

        let select = call
            .outputs()
            .map(|(name, _)| format!("{} AS `{}`", session_var(name), name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {select}");
        let row = sqlx::query(&sql)
            .fetch_one(&mut **conn)
            .await
            .map_err(DbError::execution_failed)?;

        // User variables holding strings come back with a binary collation
        let record = row.to_record(true);
        Ok(collect_outputs(call.outputs(), Some(&record)))
    }
}

mod postgres {
    use super::*;
    use crate::db::params::{bind_postgres_param, postgres_literal};
    use crate::models::QueryParam;
    use sqlx::Postgres;
    use sqlx::pool::PoolConnection;

    pub async fn visit_rows<F>(
        conn: &mut PoolConnection<Postgres>,
        statement: &CompiledStatement,
        limit: usize,
        decode_binary: bool,
        mut visit: F,
    ) -> DbResult<usize>
    where
        F: FnMut(Record) -> DbResult<()>,
    {
        let stream = if statement.params.is_empty() {
            use sqlx::Executor;
            (&mut **conn).fetch(statement.sql.as_str())
        } else {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_postgres_param(query, param);
            }
            query.fetch(&mut **conn)
        };
        let mut stream = stream.take(limit);

        let mut count = 0;
        while let Some(row) = stream.try_next().await.map_err(|e| fetch_error(count, e))? {
            visit(row.to_record(decode_binary))?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn call_procedure(
        conn: &mut PoolConnection<Postgres>,
        call: &ProcedureCall<'_>,
        decode_binary: bool,
    ) -> DbResult<OutBinds> {
        // Overload resolution sees bound parameter types, and int8 never
        // narrows to int4. Scalars go inline so the server types them like
        // literals; text and bytes get one $n per distinct name. OUT
        // arguments are NULL.
        let mut numbered: Vec<String> = Vec::new();
        let mut inputs: Vec<&QueryParam> = Vec::new();
        let rendered = render(call.segments, |name| {
            let Some(value) = call.bind_for(name).and_then(Bind::input_value) else {
                return "NULL".to_string();
            };
            if let Some(literal) = postgres_literal(value) {
                return literal;
            }
            let position = match numbered.iter().position(|n| *n == name) {
                Some(idx) => idx + 1,
                None => {
                    numbered.push(name.to_string());
                    inputs.push(value);
                    numbered.len()
                }
            };
            format!("${position}")
        });

        let sql = format!("CALL {rendered}");
        let mut query = sqlx::query(&sql);
        for value in &inputs {
            query = bind_postgres_param(query, value);
        }
        let row = query
            .fetch_optional(&mut **conn)
            .await
            .map_err(DbError::execution_failed)?;

        let record = row.map(|r| r.to_record(decode_binary));
        Ok(collect_outputs(call.outputs(), record.as_ref()))
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::Sqlite;
    use sqlx::pool::PoolConnection;

    pub async fn visit_rows<F>(
        conn: &mut PoolConnection<Sqlite>,
        statement: &CompiledStatement,
        limit: usize,
        decode_binary: bool,
        mut visit: F,
    ) -> DbResult<usize>
    where
        F: FnMut(Record) -> DbResult<()>,
    {
        let stream = if statement.params.is_empty() {
            use sqlx::Executor;
            (&mut **conn).fetch(statement.sql.as_str())
        } else {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch(&mut **conn)
        };
        let mut stream = stream.take(limit);

        let mut count = 0;
        while let Some(row) = stream.try_next().await.map_err(|e| fetch_error(count, e))? {
            visit(row.to_record(decode_binary))?;
            count += 1;
        }
        Ok(count)
    }
}

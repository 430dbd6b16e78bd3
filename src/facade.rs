//! The four helper calls.
//!
//! Every call follows the same path: resolve the alias, check out one
//! connection, run a single executor operation on it, then give the
//! connection back through [`ConnectionGuard::finish`] before returning.
//!
//! [`ConnectionGuard::finish`]: crate::db::ConnectionGuard::finish

use crate::db::executor::{StatementExecutor, table_function_sql};
use crate::db::placeholders::compile;
use crate::db::pool::PoolManager;
use crate::db::sql_validator::validate_call_fragment;
use crate::error::{DbError, DbResult};
use crate::models::{
    BindVars, DEFAULT_POOL_ALIAS, DEFAULT_ROW_LIMIT, OutBinds, Params, ProcedureRequest, Record,
    StatementMode, StatementRequest,
};
use std::time::Instant;
use tracing::{debug, info};

/// Pooled access to every registered database.
#[derive(Clone)]
pub struct DbFacade {
    pools: PoolManager,
    executor: StatementExecutor,
}

impl DbFacade {
    /// Create a facade over `pools` with the default executor.
    pub fn new(pools: PoolManager) -> Self {
        Self::with_executor(pools, StatementExecutor::new())
    }

    /// Create a facade with a configured executor.
    pub fn with_executor(pools: PoolManager, executor: StatementExecutor) -> Self {
        Self { pools, executor }
    }

    /// Get the pool registry.
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Run a query and return at most `row_limit` rows (default 100).
    pub async fn query(
        &self,
        sql: &str,
        params: &Params,
        row_limit: Option<u32>,
        alias: Option<&str>,
    ) -> DbResult<Vec<Record>> {
        let row_limit = row_limit.unwrap_or(DEFAULT_ROW_LIMIT);
        if row_limit == 0 {
            return Err(DbError::invalid_input("Row limit must be greater than 0"));
        }

        let start = Instant::now();
        let mut guard = self.pools.acquire(alias).await?;
        let result = match compile(sql, params, guard.db_type()) {
            Ok(statement) => {
                self.executor
                    .fetch_rows(guard.connection(), &statement, row_limit)
                    .await
            }
            Err(e) => Err(e),
        };
        guard.finish(&result).await;

        let rows = result?;
        info!(
            alias = alias_name(alias),
            row_count = rows.len(),
            limit = row_limit,
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(rows)
    }

    /// Run a query and return every row in cursor order.
    pub async fn query_stream(
        &self,
        sql: &str,
        params: &Params,
        alias: Option<&str>,
    ) -> DbResult<Vec<Record>> {
        let mut rows = Vec::new();
        self.query_stream_each(sql, params, alias, |record| {
            rows.push(record);
            Ok(())
        })
        .await?;
        Ok(rows)
    }

    /// Run a query and hand each row to `visit` as it is fetched.
    ///
    /// Returns the number of rows delivered. An error from `visit` stops the
    /// cursor and is returned as is.
    pub async fn query_stream_each<F>(
        &self,
        sql: &str,
        params: &Params,
        alias: Option<&str>,
        visit: F,
    ) -> DbResult<usize>
    where
        F: FnMut(Record) -> DbResult<()>,
    {
        let start = Instant::now();
        let mut guard = self.pools.acquire(alias).await?;
        let result = match compile(sql, params, guard.db_type()) {
            Ok(statement) => {
                self.executor
                    .for_each_row(guard.connection(), &statement, visit)
                    .await
            }
            Err(e) => Err(e),
        };
        guard.finish(&result).await;

        let count = result?;
        info!(
            alias = alias_name(alias),
            row_count = count,
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Stream drained"
        );
        Ok(count)
    }

    /// Call a stored procedure and return its OUT and IN/OUT values by name.
    pub async fn call_procedure(
        &self,
        sql: &str,
        binds: &BindVars,
        alias: Option<&str>,
    ) -> DbResult<OutBinds> {
        let db_type = self.pools.db_type(alias).await?;
        validate_call_fragment(sql, db_type)?;
        if !db_type.supports_procedures() {
            return Err(DbError::unsupported("stored procedures", db_type));
        }

        let start = Instant::now();
        let mut guard = self.pools.acquire(alias).await?;
        let result = self
            .executor
            .call_procedure(guard.connection(), sql, binds)
            .await;
        guard.finish(&result).await;

        let outputs = result?;
        info!(
            alias = alias_name(alias),
            outputs = outputs.len(),
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Procedure called"
        );
        Ok(outputs)
    }

    /// Select every row produced by a table function.
    ///
    /// Equivalent to [`query_stream`](Self::query_stream) over
    /// `SELECT * FROM <sql>`.
    pub async fn call_table_function(
        &self,
        sql: &str,
        params: &Params,
        alias: Option<&str>,
    ) -> DbResult<Vec<Record>> {
        let db_type = self.pools.db_type(alias).await?;
        validate_call_fragment(sql, db_type)?;
        if !db_type.supports_table_functions() {
            return Err(DbError::unsupported("table functions", db_type));
        }

        let wrapped = table_function_sql(sql);
        debug!(alias = alias_name(alias), sql = %wrapped, "Selecting from table function");
        self.query_stream(&wrapped, params, alias).await
    }

    /// Run a statement request in its requested mode.
    pub async fn execute(&self, request: &StatementRequest) -> DbResult<Vec<Record>> {
        let alias = request.alias.as_deref();
        match request.mode {
            StatementMode::RowFetch => {
                self.query(&request.sql, &request.params, request.row_limit, alias)
                    .await
            }
            StatementMode::CursorStream => {
                self.query_stream(&request.sql, &request.params, alias).await
            }
            StatementMode::TableFunction => {
                self.call_table_function(&request.sql, &request.params, alias)
                    .await
            }
        }
    }

    /// Run a procedure request.
    pub async fn procedure(&self, request: &ProcedureRequest) -> DbResult<OutBinds> {
        self.call_procedure(&request.sql, &request.binds, request.alias.as_deref())
            .await
    }
}

fn alias_name(alias: Option<&str>) -> &str {
    alias.unwrap_or(DEFAULT_POOL_ALIAS)
}

//! Validation of procedure and table-function call fragments.
//!
//! A fragment such as `raise_salary(:emp, :pct)` is interpolated into a
//! `CALL ...` or `SELECT * FROM ...` wrapper, so it must be exactly one
//! function-call expression. Anything after the closing parenthesis (a
//! second statement, a join, a comment) is rejected before the fragment
//! reaches the database.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the back end's dialect.

use crate::db::placeholders::{render, tokenize};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlparser::ast::Expr;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Validate a call fragment for the given back end.
///
/// Returns `Err(DbError::InvalidInput)` unless `fragment` parses as a single
/// function call with nothing following it.
///
/// # Examples
///
/// ```
/// use easy_db::db::sql_validator::validate_call_fragment;
/// use easy_db::models::DatabaseType;
///
/// assert!(validate_call_fragment("hr.raise_salary(:emp, :pct)", DatabaseType::PostgreSQL).is_ok());
/// assert!(validate_call_fragment("f(1); DROP TABLE t", DatabaseType::PostgreSQL).is_err());
/// ```
pub fn validate_call_fragment(fragment: &str, db_type: DatabaseType) -> DbResult<()> {
    let trimmed = fragment.trim();
    if trimmed.is_empty() {
        return Err(DbError::invalid_input("Call fragment cannot be empty"));
    }

    // Placeholders are not part of every dialect's expression grammar
    let parseable = render(&tokenize(trimmed, db_type), |_| "NULL".to_string());

    let dialect = get_dialect(db_type);
    let mut parser = Parser::new(dialect.as_ref())
        .try_with_sql(&parseable)
        .map_err(|e| parse_error(fragment, e))?;
    let expr = parser.parse_expr().map_err(|e| parse_error(fragment, e))?;

    if !matches!(expr, Expr::Function(_)) {
        return Err(DbError::invalid_input(format!(
            "Call fragment must be a single function call such as name(args), got: {fragment}"
        )));
    }

    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(DbError::invalid_input(format!(
            "Unexpected '{}' after the function call in fragment: {fragment}",
            next.token
        )));
    }

    Ok(())
}

fn parse_error(fragment: &str, e: sqlparser::parser::ParserError) -> DbError {
    DbError::invalid_input(format!("Failed to parse call fragment '{fragment}': {e}"))
}

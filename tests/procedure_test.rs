//! Integration tests for stored procedure calls.
//!
//! PostgreSQL and MySQL tests need a running server:
//! set TEST_POSTGRES_URL / TEST_MYSQL_URL to run them.

use easy_db::config::PoolOptions;
use easy_db::db::PoolManager;
use easy_db::models::{Bind, BindType, BindVars, ConnectionConfig, Params, ProcedureRequest};
use easy_db::{DbError, DbFacade};
use serde_json::json;

async fn connect(url: &str) -> DbFacade {
    let config = ConnectionConfig::new("default", url, PoolOptions::default()).unwrap();
    DbFacade::new(PoolManager::from_configs(vec![config]).await.unwrap())
}

fn raise_binds() -> BindVars {
    BindVars::named([
        ("base", Bind::input(200i64)),
        ("pct", Bind::input(10i64)),
        ("counter", Bind::in_out(BindType::Integer, 5i64)),
        ("total", Bind::output(BindType::Integer)),
    ])
}

#[tokio::test]
async fn test_sqlite_procedures_unsupported() {
    let facade = connect("sqlite::memory:").await;

    let err = facade
        .call_procedure(
            "easydb_test_raise(:base, :pct, :counter, :total)",
            &raise_binds(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Unsupported { .. }));
    assert_eq!(facade.pools().checked_out(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_alias_reported_first() {
    let facade = connect("sqlite::memory:").await;

    let err = facade
        .call_procedure("p()", &BindVars::default(), Some("hr"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PoolNotFound { .. }));
}

#[tokio::test]
async fn test_injected_fragment_rejected() {
    let facade = connect("sqlite::memory:").await;

    let err = facade
        .call_procedure("p(); DELETE FROM t", &BindVars::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_postgres_out_and_inout_binds() {
    let pg_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let facade = connect(&pg_url).await;

    // bigint parameters take integer literals through the int4 -> int8 cast
    facade
        .query_stream(
            "CREATE OR REPLACE PROCEDURE easydb_test_raise(
                IN base bigint, IN pct bigint, INOUT counter bigint, OUT total bigint)
             LANGUAGE plpgsql AS $$
             BEGIN
                 total := base + base * pct / 100;
                 counter := counter + 1;
             END
             $$",
            &Params::default(),
            None,
        )
        .await
        .unwrap();

    let outputs = facade
        .call_procedure(
            "easydb_test_raise(:base, :pct, :counter, :total)",
            &raise_binds(),
            None,
        )
        .await
        .unwrap();

    // Only OUT and IN/OUT names come back
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs["counter"], json!(6));
    assert_eq!(outputs["total"], json!(220));

    // Positional binds follow placeholder order
    let request = ProcedureRequest::new(
        "easydb_test_raise(:base, :pct, :counter, :total)",
        BindVars::Positional(vec![
            Bind::input(50i64),
            Bind::input(100i64),
            Bind::in_out(BindType::Text, 0i64),
            Bind::output(BindType::Integer),
        ]),
    );
    let outputs = facade.procedure(&request).await.unwrap();
    assert_eq!(outputs["counter"], json!("1"));
    assert_eq!(outputs["total"], json!(100));

    facade
        .query_stream(
            "DROP PROCEDURE IF EXISTS easydb_test_raise",
            &Params::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(facade.pools().checked_out(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_postgres_integer_procedure() {
    let pg_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let facade = connect(&pg_url).await;

    facade
        .query_stream(
            "CREATE OR REPLACE PROCEDURE easydb_test_double(
                IN a integer, IN label text, INOUT b integer, OUT c integer, OUT tagged text)
             LANGUAGE plpgsql AS $$
             BEGIN
                 c := a * 2;
                 b := b + 1;
                 tagged := label || ':' || c;
             END
             $$",
            &Params::default(),
            None,
        )
        .await
        .unwrap();

    let call = "easydb_test_double(:a, :label, :b, :c, :tagged)";
    let binds = |a: i64| {
        BindVars::named([
            ("a", Bind::input(a)),
            ("label", Bind::input("x")),
            ("b", Bind::in_out(BindType::Integer, 1i64)),
            ("c", Bind::output(BindType::Integer)),
            ("tagged", Bind::output(BindType::Text)),
        ])
    };

    let outputs = facade.call_procedure(call, &binds(21), None).await.unwrap();
    assert_eq!(outputs["b"], json!(2));
    assert_eq!(outputs["c"], json!(42));
    assert_eq!(outputs["tagged"], json!("x:42"));

    let outputs = facade.call_procedure(call, &binds(-4), None).await.unwrap();
    assert_eq!(outputs["c"], json!(-8));

    facade
        .query_stream(
            "DROP PROCEDURE IF EXISTS easydb_test_double",
            &Params::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(facade.pools().checked_out(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_postgres_failing_procedure_is_execution_error() {
    let pg_url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let facade = connect(&pg_url).await;

    let err = facade
        .call_procedure(
            "easydb_no_such_procedure(:x)",
            &BindVars::named([("x", Bind::input(1i64))]),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ExecutionFailed { .. }));
    assert_eq!(err.sql_state(), Some("42883"));
    assert_eq!(facade.pools().checked_out(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_mysql_out_and_inout_binds() {
    let mysql_url = match std::env::var("TEST_MYSQL_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_URL not set");
            return;
        }
    };
    let facade = connect(&mysql_url).await;

    facade
        .query_stream(
            "DROP PROCEDURE IF EXISTS easydb_test_raise",
            &Params::default(),
            None,
        )
        .await
        .unwrap();
    facade
        .query_stream(
            "CREATE PROCEDURE easydb_test_raise(
                IN base BIGINT, IN pct BIGINT, INOUT counter BIGINT, OUT total BIGINT)
             BEGIN
                 SET total = base + base * pct DIV 100;
                 SET counter = counter + 1;
             END",
            &Params::default(),
            None,
        )
        .await
        .unwrap();

    let outputs = facade
        .call_procedure(
            "easydb_test_raise(:base, :pct, :counter, :total)",
            &raise_binds(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs["counter"], json!(6));
    assert_eq!(outputs["total"], json!(220));

    facade
        .query_stream(
            "DROP PROCEDURE easydb_test_raise",
            &Params::default(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(facade.pools().checked_out(None).await.unwrap(), 0);
}

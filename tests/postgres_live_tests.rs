//! Integration tests against a real PostgreSQL server
//!
//! These tests require a running PostgreSQL instance reachable through
//! `PGSTMT_DSN`. Each test uses its own table name so they can run in parallel.

use pg_stmt_cache::{connect, CacheConfig, EntryState, PgConfig, StatementError, Value};

// Helper function to get connection settings from environment or use defaults
fn pg_config(cache: CacheConfig) -> PgConfig {
    let dsn = std::env::var("PGSTMT_DSN")
        .unwrap_or_else(|_| "host=localhost user=postgres dbname=postgres".to_string());
    PgConfig::new(dsn).with_cache(cache)
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL instance
async fn test_repeated_select_prepares_once() {
    let mut conn = connect(&pg_config(CacheConfig::default()))
        .await
        .expect("Failed to connect to PostgreSQL");

    conn.exec("drop table if exists stmt_cache_repeat", &[]).await.unwrap();
    conn.exec("create table stmt_cache_repeat (bar text, idx int)", &[])
        .await
        .unwrap();
    conn.exec(
        "insert into stmt_cache_repeat (bar, idx) values ($1, $2)",
        &[Value::from("baz"), Value::Int(42)],
    )
    .await
    .unwrap();

    let sql = "select bar, idx from stmt_cache_repeat where bar = $2 and idx >= $1 order by idx";
    for _ in 0..3 {
        let rows = conn
            .query(sql, &[Value::Int(0), Value::from("baz")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(0, "idx"), Some(&Value::Int(42)));
    }

    let stats = conn.cache_stats().unwrap();
    assert_eq!(stats.hits, 2);
    assert_eq!(conn.statement_state(sql), EntryState::Ready);

    conn.exec("drop table stmt_cache_repeat", &[]).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL instance
async fn test_cached_and_uncached_agree_after_drop() {
    let sql = "select bar, idx from stmt_cache_drop where bar = $2 and idx >= $1 order by idx";
    let params = [Value::Int(0), Value::from("baz")];
    let mut messages = Vec::new();

    for cache in [CacheConfig::default(), CacheConfig::disabled()] {
        let mut conn = connect(&pg_config(cache)).await.unwrap();
        conn.exec("drop table if exists stmt_cache_drop", &[]).await.unwrap();
        conn.exec("create table stmt_cache_drop (bar text, idx int)", &[])
            .await
            .unwrap();

        conn.begin().await.unwrap();
        conn.query(sql, &params).await.unwrap();
        conn.exec("drop table stmt_cache_drop", &[]).await.unwrap();

        let err = conn.query(sql, &params).await.unwrap_err();
        println!("Expected error after drop: {}", err);
        assert!(err.to_string().contains("stmt_cache_drop"));
        messages.push(err.db_message().map(str::to_string));
        conn.rollback().await.unwrap();

        conn.exec("drop table stmt_cache_drop", &[]).await.unwrap();
        conn.close().await.unwrap();
    }

    assert_eq!(messages[0], messages[1]);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL instance
async fn test_schema_change_triggers_single_reprepare() {
    let mut conn = connect(&pg_config(CacheConfig::default())).await.unwrap();
    conn.exec("drop table if exists stmt_cache_alter", &[]).await.unwrap();
    conn.exec("create table stmt_cache_alter (bar text, idx int)", &[])
        .await
        .unwrap();

    let sql = "select * from stmt_cache_alter";
    conn.query(sql, &[]).await.unwrap();

    // Changes the result type of the cached plan
    conn.exec("alter table stmt_cache_alter add column extra int", &[])
        .await
        .unwrap();

    let rows = conn.query(sql, &[]).await.unwrap();
    assert_eq!(rows.columns.len(), 3);

    let stats = conn.cache_stats().unwrap();
    assert_eq!(stats.stale_invalidations, 1);

    conn.exec("drop table stmt_cache_alter", &[]).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL instance
async fn test_syntax_error_is_prepare_error() {
    let mut conn = connect(&pg_config(CacheConfig::default())).await.unwrap();

    let err = conn.query("selec 1", &[]).await.unwrap_err();
    match err {
        StatementError::PrepareError { code, .. } => assert_eq!(code.as_deref(), Some("42601")),
        other => panic!("expected prepare error, got {other:?}"),
    }
    assert!(conn.cache().unwrap().is_empty());

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL instance
async fn test_non_text_columns_are_returned() {
    for cache in [CacheConfig::default(), CacheConfig::disabled()] {
        let mut conn = connect(&pg_config(cache)).await.unwrap();

        let rows = conn
            .query(
                "select 1.5::numeric as n, '2024-01-02'::date as d, \
                 '{\"a\": 1}'::jsonb as j, \
                 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid as u, \
                 '\\x0102'::bytea as b, now() as t, array[1, 2] as arr",
                &[],
            )
            .await
            .unwrap();

        assert_eq!(rows.get(0, "n"), Some(&Value::from("1.5")));
        assert_eq!(rows.get(0, "d"), Some(&Value::from("2024-01-02")));
        assert_eq!(rows.get(0, "j"), Some(&Value::from(r#"{"a":1}"#)));
        assert_eq!(
            rows.get(0, "u"),
            Some(&Value::from("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"))
        );
        assert_eq!(rows.get(0, "b"), Some(&Value::from(vec![1u8, 2])));
        assert!(rows.get(0, "t").and_then(Value::as_text).is_some());
        assert!(matches!(rows.get(0, "arr"), Some(Value::Bytes(_))));

        conn.close().await.unwrap();
    }
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL instance
async fn test_mismatched_parameter_is_bind_error() {
    let mut conn = connect(&pg_config(CacheConfig::default())).await.unwrap();

    let err = conn
        .query("select $1::int + 1 as v", &[Value::from("abcd")])
        .await
        .unwrap_err();
    println!("Expected bind error: {}", err);
    assert_eq!(err.phase(), Some(pg_stmt_cache::Phase::Bind));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_failure_invalid_port() {
    let config = PgConfig::new("host=localhost port=1 user=postgres connect_timeout=2");

    let result = connect(&config).await;
    match result {
        Err(StatementError::ConnectionError { message, .. }) => {
            println!("Expected connection error: {}", message);
        }
        Err(other) => panic!("expected connection error, got {other:?}"),
        Ok(_) => panic!("connection to port 1 should fail"),
    }
}

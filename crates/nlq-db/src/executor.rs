//! Read-only SQL execution
//!
//! Runs validated SQL inside a read-only transaction with a statement
//! timeout enforced both at the database and through context cancellation.
//! Rows are fetched up to the cap plus one so truncation is observable.
//! Read-only statements roll back (equivalent to commit for reads); DML
//! admitted through the widened write gate commits.

use crate::decode;
use crate::pool::{Connection, PoolManager};
use futures::TryStreamExt;
use nlq_core::RequestContext;
use nlq_core::error::{Error, Result};
use nlq_core::types::{ColumnMeta, QueryResult, sql_preview};
use nlq_validator::ValidatedSql;
use async_trait::async_trait;
use sqlx::Acquire;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres};
use std::sync::Arc;
use std::time::Instant;

/// Seam between the orchestrator and the database.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(
        &self,
        sql: &ValidatedSql,
        db_name: &str,
        row_cap: u64,
        ctx: &RequestContext,
    ) -> Result<QueryResult>;
}

/// Production executor backed by the pool manager.
pub struct SqlExecutor {
    pools: Arc<PoolManager>,
}

impl SqlExecutor {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl Execute for SqlExecutor {
    async fn execute(
        &self,
        sql: &ValidatedSql,
        db_name: &str,
        row_cap: u64,
        ctx: &RequestContext,
    ) -> Result<QueryResult> {
        let descriptor = self.pools.registry().get(db_name)?;
        let statement_timeout = descriptor.statement_timeout.min(ctx.remaining());
        let timeout_ms = statement_timeout.as_millis().max(1) as u64;

        tracing::debug!(
            request_id = %ctx.request_id(),
            db_name = %db_name,
            sql = %sql_preview(sql.text()),
            "executing validated SQL"
        );

        let conn = self.pools.acquire(db_name, ctx).await?;

        let run = async {
            match conn {
                Connection::Postgres(conn) => {
                    run_postgres(conn, sql, row_cap, timeout_ms, ctx).await
                }
                Connection::MySql(conn) => run_mysql(conn, sql, row_cap, timeout_ms, ctx).await,
            }
        };

        match tokio::time::timeout(ctx.remaining(), run).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("statement execution".to_string())),
        }
    }
}

async fn run_postgres(
    mut conn: PoolConnection<Postgres>,
    sql: &ValidatedSql,
    row_cap: u64,
    timeout_ms: u64,
    ctx: &RequestContext,
) -> Result<QueryResult> {
    let mut tx = conn.begin().await.map_err(map_pg_error)?;

    if sql.is_readonly() {
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_pg_error)?;
    }
    sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
        .execute(&mut *tx)
        .await
        .map_err(map_pg_error)?;

    let started = Instant::now();
    let mut columns: Vec<ColumnMeta> = Vec::new();
    let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut saw_extra = false;

    {
        let mut stream = sqlx::query(sql.text()).fetch(&mut *tx);
        loop {
            let next = tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    return Err(Error::Timeout("execution cancelled".to_string()));
                }
                next = stream.try_next() => next.map_err(map_pg_error)?,
            };

            let Some(row) = next else { break };
            if columns.is_empty() {
                columns = decode::pg_columns(&row);
            }
            if rows.len() as u64 >= row_cap {
                saw_extra = true;
                break;
            }
            rows.push(decode::pg_row_values(&row));
        }
    }

    if sql.is_readonly() {
        tx.rollback().await.ok();
    } else {
        tx.commit().await.map_err(map_pg_error)?;
    }
    Ok(finish(columns, rows, saw_extra, sql, row_cap, started))
}

async fn run_mysql(
    mut conn: PoolConnection<MySql>,
    sql: &ValidatedSql,
    row_cap: u64,
    timeout_ms: u64,
    ctx: &RequestContext,
) -> Result<QueryResult> {
    // MySQL cannot change transaction characteristics inside an open
    // transaction, so the read-only mark is session-scoped and restored
    // after the query.
    if sql.is_readonly() {
        sqlx::query("SET SESSION TRANSACTION READ ONLY")
            .execute(&mut *conn)
            .await
            .map_err(map_mysql_error)?;
    }
    sqlx::query(&format!("SET SESSION max_execution_time = {timeout_ms}"))
        .execute(&mut *conn)
        .await
        .map_err(map_mysql_error)?;

    let started = Instant::now();
    let mut columns: Vec<ColumnMeta> = Vec::new();
    let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
    let mut saw_extra = false;

    let result = async {
        let mut tx = conn.begin().await.map_err(map_mysql_error)?;
        {
            let mut stream = sqlx::query(sql.text()).fetch(&mut *tx);
            loop {
                let next = tokio::select! {
                    _ = ctx.cancellation().cancelled() => {
                        return Err(Error::Timeout("execution cancelled".to_string()));
                    }
                    next = stream.try_next() => next.map_err(map_mysql_error)?,
                };

                let Some(row) = next else { break };
                if columns.is_empty() {
                    columns = decode::mysql_columns(&row);
                }
                if rows.len() as u64 >= row_cap {
                    saw_extra = true;
                    break;
                }
                rows.push(decode::mysql_row_values(&row));
            }
        }
        if sql.is_readonly() {
            tx.rollback().await.ok();
        } else {
            tx.commit().await.map_err(map_mysql_error)?;
        }
        Ok(())
    }
    .await;

    // Best effort: leave the pooled connection writable for the next checkout
    sqlx::query("SET SESSION TRANSACTION READ WRITE")
        .execute(&mut *conn)
        .await
        .ok();
    sqlx::query("SET SESSION max_execution_time = 0")
        .execute(&mut *conn)
        .await
        .ok();

    result?;
    Ok(finish(columns, rows, saw_extra, sql, row_cap, started))
}

fn finish(
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<serde_json::Value>>,
    saw_extra: bool,
    sql: &ValidatedSql,
    row_cap: u64,
    started: Instant,
) -> QueryResult {
    // When the validator injected or lowered the limit, hitting the cap
    // exactly means the statement would have produced more rows.
    let truncated = saw_extra || (sql.row_limit_applied() && rows.len() as u64 == row_cap);
    let row_count = rows.len();

    QueryResult {
        columns,
        rows,
        row_count,
        execution_ms: started.elapsed().as_millis() as u64,
        truncated,
    }
}

fn map_pg_error(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &e {
        // 57014: canceled, typically by statement_timeout
        if db_err.code().as_deref() == Some("57014") {
            return Error::Timeout("statement timeout".to_string());
        }
        return Error::db(db_err.message().to_string());
    }
    Error::db(e.to_string())
}

fn map_mysql_error(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &e {
        // 3024: maximum statement execution time exceeded
        if db_err.message().contains("maximum statement execution time") {
            return Error::Timeout("statement timeout".to_string());
        }
        return Error::db(db_err.message().to_string());
    }
    Error::db(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlq_core::Dialect;
    use nlq_validator::{SafetyPolicy, validate};

    #[test]
    fn truncation_flag_reflects_cap_and_rewrite() {
        let v = validate("SELECT id FROM users", Dialect::Postgres, &SafetyPolicy::new(2)).unwrap();
        assert!(v.row_limit_applied());

        // Exactly cap rows with an injected limit: the statement would have
        // yielded more, so the result is marked truncated
        let result = finish(
            Vec::new(),
            vec![vec![serde_json::json!(1)], vec![serde_json::json!(2)]],
            false,
            &v,
            2,
            Instant::now(),
        );
        assert!(result.truncated);
        assert_eq!(result.row_count, 2);

        // Under the cap: not truncated
        let result = finish(
            Vec::new(),
            vec![vec![serde_json::json!(1)]],
            false,
            &v,
            2,
            Instant::now(),
        );
        assert!(!result.truncated);
    }

    #[test]
    fn own_limit_below_cap_is_not_truncated() {
        let v = validate(
            "SELECT id FROM users LIMIT 2",
            Dialect::Postgres,
            &SafetyPolicy::new(100),
        )
        .unwrap();
        assert!(!v.row_limit_applied());

        let result = finish(
            Vec::new(),
            vec![vec![serde_json::json!(1)], vec![serde_json::json!(2)]],
            false,
            &v,
            100,
            Instant::now(),
        );
        assert!(!result.truncated);
    }

    #[test]
    fn extra_row_always_marks_truncation() {
        let v = validate(
            "SELECT id FROM users LIMIT 1",
            Dialect::Postgres,
            &SafetyPolicy::new(100),
        )
        .unwrap();

        let result = finish(
            Vec::new(),
            vec![vec![serde_json::json!(1)]],
            true,
            &v,
            1,
            Instant::now(),
        );
        assert!(result.truncated);
    }
}

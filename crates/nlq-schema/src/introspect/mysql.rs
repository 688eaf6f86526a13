//! MySQL catalog introspection via information_schema
//!
//! MySQL has no schema-within-database nesting the way Postgres does; each
//! database shows up as one information_schema TABLE_SCHEMA. The snapshot
//! keeps that name as the schema level so prompts and allowlists read the
//! same on both dialects.

use crate::introspect::postgres::assemble;
use crate::model::{ColumnInfo, ForeignKeyInfo, SchemaSnapshot, TableInfo, TableKind};
use nlq_core::Dialect;
use nlq_core::error::{Error, Result};
use sqlx::{MySqlPool, Row};
use std::collections::BTreeMap;

const SYSTEM_SCHEMAS: &str = "('mysql', 'information_schema', 'performance_schema', 'sys')";

/// Extract the full snapshot for one database.
pub async fn introspect(pool: &MySqlPool, database: &str) -> Result<SchemaSnapshot> {
    let mut tables: BTreeMap<(String, String), TableInfo> = BTreeMap::new();

    let table_sql = format!(
        r#"
        SELECT
            table_schema AS table_schema,
            table_name AS table_name,
            table_type AS table_type,
            table_comment AS table_comment,
            CAST(table_rows AS SIGNED) AS row_estimate
        FROM information_schema.tables
        WHERE table_schema NOT IN {SYSTEM_SCHEMAS}
        ORDER BY table_schema, table_name
        "#
    );

    let rows = sqlx::query(&table_sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("relation introspection failed: {e}")))?;

    for row in &rows {
        let schema: String = row.get("table_schema");
        let name: String = row.get("table_name");
        let table_type: String = row.get("table_type");
        let comment: Option<String> = row.try_get::<Option<String>, _>("table_comment").ok().flatten();
        // Best-effort estimate; NULL for views and unanalyzed tables
        let row_estimate: Option<i64> = row.try_get("row_estimate").ok();

        tables.insert(
            (schema, name.clone()),
            TableInfo {
                name,
                kind: if table_type == "VIEW" {
                    TableKind::View
                } else {
                    TableKind::Table
                },
                columns: Vec::new(),
                foreign_keys: Vec::new(),
                row_count: row_estimate.filter(|n| *n >= 0),
                comment: comment.filter(|c| !c.is_empty()),
            },
        );
    }

    let column_sql = format!(
        r#"
        SELECT
            table_schema AS table_schema,
            table_name AS table_name,
            column_name AS column_name,
            column_type AS column_type,
            is_nullable AS is_nullable,
            column_default AS column_default,
            column_key AS column_key,
            column_comment AS column_comment
        FROM information_schema.columns
        WHERE table_schema NOT IN {SYSTEM_SCHEMAS}
        ORDER BY table_schema, table_name, ordinal_position
        "#
    );

    let rows = sqlx::query(&column_sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("column introspection failed: {e}")))?;

    for row in &rows {
        let schema: String = row.get("table_schema");
        let table: String = row.get("table_name");
        let key: String = row.try_get("column_key").unwrap_or_default();
        let nullable: String = row.get("is_nullable");
        let comment: Option<String> = row
            .try_get::<Option<String>, _>("column_comment")
            .ok()
            .flatten();

        if let Some(info) = tables.get_mut(&(schema, table)) {
            info.columns.push(ColumnInfo {
                name: row.get("column_name"),
                data_type: row.get("column_type"),
                nullable: nullable == "YES",
                primary_key: key == "PRI",
                unique: key == "UNI",
                default: row.try_get::<Option<String>, _>("column_default").ok().flatten(),
                comment: comment.filter(|c| !c.is_empty()),
            });
        }
    }

    let fk_sql = format!(
        r#"
        SELECT
            table_schema AS table_schema,
            table_name AS table_name,
            column_name AS column_name,
            referenced_table_name AS referenced_table,
            referenced_column_name AS referenced_column
        FROM information_schema.key_column_usage
        WHERE referenced_table_name IS NOT NULL
          AND table_schema NOT IN {SYSTEM_SCHEMAS}
        ORDER BY constraint_name, ordinal_position
        "#
    );

    let rows = sqlx::query(&fk_sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("foreign key introspection failed: {e}")))?;

    for row in &rows {
        let schema: String = row.get("table_schema");
        let table: String = row.get("table_name");
        if let Some(info) = tables.get_mut(&(schema, table)) {
            info.foreign_keys.push(ForeignKeyInfo {
                column: row.get("column_name"),
                referenced_table: row.get("referenced_table"),
                referenced_column: row.get("referenced_column"),
            });
        }
    }

    // MySQL enums are inline column types, so the snapshot-level list is empty
    Ok(assemble(database, Dialect::MySql, tables, Vec::new()))
}

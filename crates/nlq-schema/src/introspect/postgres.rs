//! PostgreSQL catalog introspection
//!
//! Reads pg_class/pg_attribute/pg_index/pg_constraint directly rather than
//! information_schema: the native catalogs expose comments, typmod-correct
//! type names, and planner row estimates in one place.

use crate::model::{
    ColumnInfo, EnumTypeInfo, ForeignKeyInfo, SchemaInfo, SchemaSnapshot, TableInfo, TableKind,
};
use nlq_core::Dialect;
use nlq_core::error::{Error, Result};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashSet};

const SYSTEM_SCHEMAS: &str = "('pg_catalog', 'information_schema', 'pg_toast')";

/// Extract the full snapshot for one database.
pub async fn introspect(pool: &PgPool, database: &str) -> Result<SchemaSnapshot> {
    let relations = fetch_relations(pool).await?;
    let columns = fetch_columns(pool).await?;
    let primary_keys = fetch_primary_keys(pool).await?;
    let unique_columns = fetch_unique_columns(pool).await?;
    let mut foreign_keys = fetch_foreign_keys(pool).await?;
    let enum_types = fetch_enum_types(pool).await?;

    // (schema, table) -> TableInfo, BTreeMap keeps the canonical ordering
    let mut tables: BTreeMap<(String, String), TableInfo> = BTreeMap::new();

    for rel in relations {
        let fks = foreign_keys
            .remove(&(rel.schema.clone(), rel.name.clone()))
            .unwrap_or_default();
        tables.insert(
            (rel.schema.clone(), rel.name.clone()),
            TableInfo {
                name: rel.name,
                kind: if rel.is_view {
                    TableKind::View
                } else {
                    TableKind::Table
                },
                columns: Vec::new(),
                foreign_keys: fks,
                row_count: rel.row_estimate.filter(|n| *n >= 0),
                comment: rel.comment,
            },
        );
    }

    for col in columns {
        let key = (col.schema.clone(), col.table.clone());
        if let Some(table) = tables.get_mut(&key) {
            let pk = primary_keys.contains(&(col.schema.clone(), col.table.clone(), col.name.clone()));
            let unique =
                unique_columns.contains(&(col.schema.clone(), col.table.clone(), col.name.clone()));
            table.columns.push(ColumnInfo {
                name: col.name,
                data_type: col.data_type,
                nullable: col.nullable,
                primary_key: pk,
                unique,
                default: col.default,
                comment: col.comment,
            });
        }
    }

    Ok(assemble(database, Dialect::Postgres, tables, enum_types))
}

struct RelationRow {
    schema: String,
    name: String,
    is_view: bool,
    comment: Option<String>,
    row_estimate: Option<i64>,
}

struct ColumnRow {
    schema: String,
    table: String,
    name: String,
    data_type: String,
    nullable: bool,
    default: Option<String>,
    comment: Option<String>,
}

async fn fetch_relations(pool: &PgPool) -> Result<Vec<RelationRow>> {
    let sql = format!(
        r#"
        SELECT
            n.nspname AS schema_name,
            c.relname AS table_name,
            c.relkind = 'v' AS is_view,
            obj_description(c.oid, 'pg_class') AS comment,
            CASE WHEN c.relkind = 'r' THEN c.reltuples::bigint END AS row_estimate
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'v')
          AND n.nspname NOT IN {SYSTEM_SCHEMAS}
        ORDER BY n.nspname, c.relname
        "#
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("relation introspection failed: {e}")))?;

    Ok(rows
        .iter()
        .map(|row| RelationRow {
            schema: row.get("schema_name"),
            name: row.get("table_name"),
            is_view: row.get("is_view"),
            comment: row.get("comment"),
            // Best-effort: a failed estimate never fails the snapshot
            row_estimate: row.try_get("row_estimate").ok(),
        })
        .collect())
}

async fn fetch_columns(pool: &PgPool) -> Result<Vec<ColumnRow>> {
    let sql = format!(
        r#"
        SELECT
            n.nspname AS schema_name,
            c.relname AS table_name,
            a.attname AS column_name,
            pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS is_nullable,
            pg_get_expr(ad.adbin, ad.adrelid) AS default_value,
            col_description(a.attrelid, a.attnum) AS comment
        FROM pg_attribute a
        JOIN pg_class c ON a.attrelid = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        LEFT JOIN pg_attrdef ad ON a.attrelid = ad.adrelid AND a.attnum = ad.adnum
        WHERE c.relkind IN ('r', 'v')
          AND n.nspname NOT IN {SYSTEM_SCHEMAS}
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY n.nspname, c.relname, a.attnum
        "#
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("column introspection failed: {e}")))?;

    Ok(rows
        .iter()
        .map(|row| ColumnRow {
            schema: row.get("schema_name"),
            table: row.get("table_name"),
            name: row.get("column_name"),
            data_type: row.get("data_type"),
            nullable: row.get("is_nullable"),
            default: row.get("default_value"),
            comment: row.get("comment"),
        })
        .collect())
}

async fn fetch_primary_keys(pool: &PgPool) -> Result<HashSet<(String, String, String)>> {
    let sql = format!(
        r#"
        SELECT n.nspname AS schema_name, c.relname AS table_name, a.attname AS column_name
        FROM pg_index i
        JOIN pg_class c ON i.indrelid = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
        WHERE i.indisprimary
          AND n.nspname NOT IN {SYSTEM_SCHEMAS}
        "#
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("primary key introspection failed: {e}")))?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get("schema_name"),
                row.get("table_name"),
                row.get("column_name"),
            )
        })
        .collect())
}

async fn fetch_unique_columns(pool: &PgPool) -> Result<HashSet<(String, String, String)>> {
    let sql = format!(
        r#"
        SELECT n.nspname AS schema_name, c.relname AS table_name, a.attname AS column_name
        FROM pg_constraint con
        JOIN pg_class c ON con.conrelid = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(con.conkey)
        WHERE con.contype = 'u'
          AND n.nspname NOT IN {SYSTEM_SCHEMAS}
        "#
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("unique constraint introspection failed: {e}")))?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get("schema_name"),
                row.get("table_name"),
                row.get("column_name"),
            )
        })
        .collect())
}

async fn fetch_foreign_keys(
    pool: &PgPool,
) -> Result<BTreeMap<(String, String), Vec<ForeignKeyInfo>>> {
    let sql = format!(
        r#"
        SELECT
            n.nspname AS schema_name,
            c.relname AS table_name,
            a.attname AS column_name,
            ref_c.relname AS referenced_table,
            ref_a.attname AS referenced_column
        FROM pg_constraint con
        JOIN pg_class c ON con.conrelid = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(con.conkey)
        JOIN pg_class ref_c ON con.confrelid = ref_c.oid
        JOIN pg_attribute ref_a ON ref_a.attrelid = ref_c.oid AND ref_a.attnum = ANY(con.confkey)
        WHERE con.contype = 'f'
          AND n.nspname NOT IN {SYSTEM_SCHEMAS}
        ORDER BY con.conname
        "#
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("foreign key introspection failed: {e}")))?;

    let mut out: BTreeMap<(String, String), Vec<ForeignKeyInfo>> = BTreeMap::new();
    for row in &rows {
        out.entry((row.get("schema_name"), row.get("table_name")))
            .or_default()
            .push(ForeignKeyInfo {
                column: row.get("column_name"),
                referenced_table: row.get("referenced_table"),
                referenced_column: row.get("referenced_column"),
            });
    }
    Ok(out)
}

async fn fetch_enum_types(pool: &PgPool) -> Result<Vec<EnumTypeInfo>> {
    let sql = format!(
        r#"
        SELECT
            n.nspname AS schema_name,
            t.typname AS type_name,
            ARRAY(
                SELECT e.enumlabel::text
                FROM pg_enum e
                WHERE e.enumtypid = t.oid
                ORDER BY e.enumsortorder
            ) AS labels
        FROM pg_type t
        JOIN pg_namespace n ON t.typnamespace = n.oid
        WHERE t.typtype = 'e'
          AND n.nspname NOT IN {SYSTEM_SCHEMAS}
        ORDER BY n.nspname, t.typname
        "#
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db(format!("enum type introspection failed: {e}")))?;

    Ok(rows
        .iter()
        .map(|row| EnumTypeInfo {
            schema: row.get("schema_name"),
            name: row.get("type_name"),
            values: row.get::<Vec<String>, _>("labels"),
        })
        .collect())
}

pub(crate) fn assemble(
    database: &str,
    dialect: Dialect,
    tables: BTreeMap<(String, String), TableInfo>,
    enum_types: Vec<EnumTypeInfo>,
) -> SchemaSnapshot {
    let mut schemas: BTreeMap<String, SchemaInfo> = BTreeMap::new();
    for ((schema, _), table) in tables {
        schemas
            .entry(schema.clone())
            .or_insert_with(|| SchemaInfo {
                name: schema,
                tables: Vec::new(),
            })
            .tables
            .push(table);
    }

    SchemaSnapshot {
        database: database.to_string(),
        dialect,
        schemas: schemas.into_values().collect(),
        enum_types,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_orders_schemas_and_tables() {
        let mut tables = BTreeMap::new();
        for (schema, table) in [("zeta", "a"), ("alpha", "z"), ("alpha", "b")] {
            tables.insert(
                (schema.to_string(), table.to_string()),
                TableInfo {
                    name: table.to_string(),
                    kind: TableKind::Table,
                    columns: Vec::new(),
                    foreign_keys: Vec::new(),
                    row_count: None,
                    comment: None,
                },
            );
        }

        let snapshot = assemble("db", Dialect::Postgres, tables, Vec::new());
        assert_eq!(snapshot.schemas[0].name, "alpha");
        assert_eq!(snapshot.schemas[1].name, "zeta");
        let alpha_tables: Vec<&str> = snapshot.schemas[0]
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(alpha_tables, vec!["b", "z"]);
    }
}

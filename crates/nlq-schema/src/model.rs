//! Canonical schema tree
//!
//! A snapshot is value-typed and immutable: a refresh builds a fresh tree and
//! swaps it in atomically. Ordering is deterministic so prompt rendering and
//! tests are stable: schemas alphabetical, tables alphabetical within schema,
//! columns by ordinal position.

use nlq_core::Dialect;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// Catalog estimate; omitted when the catalog has none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// User-defined enum type (Postgres); MySQL enums appear inline in the
/// column type instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumTypeInfo {
    pub schema: String,
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub tables: Vec<TableInfo>,
}

/// Complete schema for one database at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub dialect: Dialect,
    pub schemas: Vec<SchemaInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_types: Vec<EnumTypeInfo>,
}

impl SchemaSnapshot {
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    /// Iterate all tables with their schema name.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableInfo)> {
        self.schemas
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (s.name.as_str(), t)))
    }

    /// Render one table as a prompt block.
    pub fn render_table(schema: &str, table: &TableInfo) -> String {
        let mut out = String::new();
        let kind = match table.kind {
            TableKind::Table => "table",
            TableKind::View => "view",
        };
        out.push_str(&format!("### {schema}.{} ({kind}", table.name));
        if let Some(rows) = table.row_count {
            out.push_str(&format!(", ~{rows} rows"));
        }
        out.push(')');
        if let Some(comment) = &table.comment {
            out.push_str(&format!(" -- {comment}"));
        }
        out.push('\n');

        for col in &table.columns {
            out.push_str(&format!("- {} {}", col.name, col.data_type));
            if col.primary_key {
                out.push_str(" PRIMARY KEY");
            } else if col.unique {
                out.push_str(" UNIQUE");
            }
            if !col.nullable {
                out.push_str(" NOT NULL");
            }
            if let Some(default) = &col.default {
                out.push_str(&format!(" DEFAULT {default}"));
            }
            if let Some(comment) = &col.comment {
                out.push_str(&format!(" -- {comment}"));
            }
            out.push('\n');
        }
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "- FOREIGN KEY {} -> {}({})\n",
                fk.column, fk.referenced_table, fk.referenced_column
            ));
        }
        out
    }

    /// Render the whole snapshot as prompt context.
    pub fn to_prompt_context(&self) -> String {
        let mut out = String::new();
        for (schema, table) in self.tables() {
            out.push_str(&Self::render_table(schema, table));
            out.push('\n');
        }
        if !self.enum_types.is_empty() {
            out.push_str("### enum types\n");
            for e in &self.enum_types {
                out.push_str(&format!(
                    "- {}.{}: {}\n",
                    e.schema,
                    e.name,
                    e.values.join(" | ")
                ));
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot() -> SchemaSnapshot {
    SchemaSnapshot {
        database: "blog".to_string(),
        dialect: Dialect::Postgres,
        enum_types: Vec::new(),
        schemas: vec![SchemaInfo {
            name: "public".to_string(),
            tables: vec![
                TableInfo {
                    name: "posts".to_string(),
                    kind: TableKind::Table,
                    columns: vec![
                        ColumnInfo {
                            name: "id".to_string(),
                            data_type: "bigint".to_string(),
                            nullable: false,
                            primary_key: true,
                            unique: false,
                            default: None,
                            comment: None,
                        },
                        ColumnInfo {
                            name: "author_id".to_string(),
                            data_type: "bigint".to_string(),
                            nullable: false,
                            primary_key: false,
                            unique: false,
                            default: None,
                            comment: None,
                        },
                        ColumnInfo {
                            name: "title".to_string(),
                            data_type: "text".to_string(),
                            nullable: true,
                            primary_key: false,
                            unique: false,
                            default: None,
                            comment: None,
                        },
                    ],
                    foreign_keys: vec![ForeignKeyInfo {
                        column: "author_id".to_string(),
                        referenced_table: "users".to_string(),
                        referenced_column: "id".to_string(),
                    }],
                    row_count: Some(420),
                    comment: None,
                },
                TableInfo {
                    name: "users".to_string(),
                    kind: TableKind::Table,
                    columns: vec![
                        ColumnInfo {
                            name: "id".to_string(),
                            data_type: "bigint".to_string(),
                            nullable: false,
                            primary_key: true,
                            unique: false,
                            default: None,
                            comment: None,
                        },
                        ColumnInfo {
                            name: "email".to_string(),
                            data_type: "text".to_string(),
                            nullable: false,
                            primary_key: false,
                            unique: true,
                            default: None,
                            comment: Some("login identity".to_string()),
                        },
                    ],
                    foreign_keys: Vec::new(),
                    row_count: Some(42),
                    comment: Some("registered accounts".to_string()),
                },
            ],
        }],
    }
}

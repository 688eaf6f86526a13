//! SQL dialect capability set
//!
//! The per-dialect behavior the gateway needs is small: a stable tag, the
//! identifier quoting rule, and the case-folding rule used when comparing
//! identifiers against policy lists. Everything else (parsing, catalog
//! queries, drivers) dispatches on this tag.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    /// Parse the configuration tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "postgres" => Some(Dialect::Postgres),
            "mysql" => Some(Dialect::MySql),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// Quote an identifier for embedding in SQL text.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// Fold an unquoted identifier for comparison.
    ///
    /// Postgres folds unquoted identifiers to lowercase. MySQL table-name
    /// comparison depends on the host filesystem; the gateway compares
    /// case-insensitively, which is the common server default.
    pub fn fold_identifier(&self, ident: &str) -> String {
        ident.to_lowercase()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

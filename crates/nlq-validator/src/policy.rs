//! Safety policy applied during validation

use nlq_core::config::SecurityConfig;
use std::collections::HashSet;

/// Functions refused in any position, lowercase, optionally schema-qualified.
///
/// Covers sleep, filesystem, network, process-control, large-object, and
/// settings-inspection functions across both supported dialects.
const DEFAULT_BLOCKED_FUNCTIONS: &[&str] = &[
    // sleep / timing
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "sleep",
    "benchmark",
    // filesystem
    "pg_read_file",
    "pg_read_binary_file",
    "pg_write_file",
    "pg_ls_dir",
    "pg_stat_file",
    "load_file",
    // large objects
    "lo_import",
    "lo_export",
    // network / foreign execution
    "dblink",
    "dblink_exec",
    "dblink_connect",
    // process control
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "kill",
    // settings and privilege inspection
    "current_setting",
    "set_config",
];

/// Per-request validation policy.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    /// Widen the statement gate to plain DML (INSERT/UPDATE/DELETE)
    pub allow_write: bool,

    /// Permit EXPLAIN of an otherwise-valid statement
    pub allow_explain: bool,

    /// Lowercased function names; both bare and schema-qualified forms match
    pub blocked_functions: HashSet<String>,

    /// Folded table names (optionally schema-qualified); None means any table
    pub allowed_tables: Option<HashSet<String>>,

    /// Effective row cap injected into the statement
    pub max_rows: u64,
}

impl SafetyPolicy {
    /// The shipped default policy: read-only, default blacklist, no table
    /// restriction, 10k row cap.
    pub fn new(max_rows: u64) -> Self {
        Self {
            allow_write: false,
            allow_explain: false,
            blocked_functions: default_blocklist(),
            allowed_tables: None,
            max_rows,
        }
    }

    /// Build the policy from configuration, with an optional per-database
    /// row-cap override.
    pub fn from_config(security: &SecurityConfig, row_cap_override: Option<u64>) -> Self {
        let mut blocked = default_blocklist();
        for f in security
            .blocked_functions
            .split(',')
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
        {
            blocked.insert(f);
        }

        let allowed_tables = if security.allowed_tables.is_empty() {
            None
        } else {
            Some(
                security
                    .allowed_tables
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect(),
            )
        };

        Self {
            allow_write: security.allow_write,
            allow_explain: security.allow_explain,
            blocked_functions: blocked,
            allowed_tables,
            max_rows: row_cap_override.unwrap_or(security.max_rows),
        }
    }

    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tables = Some(
            tables
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .collect(),
        );
        self
    }

    pub fn is_function_blocked(&self, name: &str) -> bool {
        self.blocked_functions.contains(&name.to_lowercase())
    }
}

pub fn default_blocklist() -> HashSet<String> {
    DEFAULT_BLOCKED_FUNCTIONS
        .iter()
        .map(|f| f.to_string())
        .collect()
}

//! Parse, prove read-only, rewrite, reserialize
//!
//! The checks run in a fixed order: parse, single-statement, statement-kind
//! gate, function blacklist, identifier policy, row-cap injection. The
//! validator is syntactic: a blocked function in a branch that could never
//! execute is still refused.

use crate::policy::SafetyPolicy;
use nlq_core::Dialect;
use nlq_core::error::{Error, ErrorKind, Result};
use sqlparser::ast::{
    Expr, ObjectName, Query, SetExpr, Statement, TableFactor, Value, visit_expressions,
    visit_relations,
};
use sqlparser::dialect::{Dialect as ParserDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;

/// SQL that has passed every safety check.
///
/// The text is the validator's own serialization of the (possibly rewritten)
/// AST, never the caller's input. Construction is private to this module;
/// the executor accepts nothing else.
#[derive(Debug, Clone)]
pub struct ValidatedSql {
    text: String,
    dialect: Dialect,
    row_limit_applied: bool,
    readonly: bool,
}

impl ValidatedSql {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn row_limit_applied(&self) -> bool {
        self.row_limit_applied
    }

    /// False only for DML admitted through the widened write gate.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// Validate untrusted SQL against the policy, returning the witness.
pub fn validate(sql: &str, dialect: Dialect, policy: &SafetyPolicy) -> Result<ValidatedSql> {
    if sql.trim().is_empty() {
        return Err(Error::rejected(
            ErrorKind::EmptyStatement,
            "statement is empty",
        ));
    }

    let parser_dialect: Box<dyn ParserDialect> = match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
    };

    let mut statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| Error::rejected(ErrorKind::ParseError, e.to_string()))?;

    match statements.len() {
        0 => {
            return Err(Error::rejected(
                ErrorKind::EmptyStatement,
                "statement is empty",
            ));
        }
        1 => {}
        n => {
            return Err(Error::rejected(
                ErrorKind::MultipleStatements,
                format!("expected a single statement, found {n}"),
            ));
        }
    }

    let mut statement = statements.remove(0);

    check_statement_kind(&statement, policy, policy.allow_explain)?;
    check_functions(&statement, policy)?;
    check_identifiers(&statement, dialect, policy)?;

    let row_limit_applied = match &mut statement {
        Statement::Query(query) => apply_row_cap(query, policy.max_rows),
        _ => false,
    };

    let readonly = !matches!(
        statement,
        Statement::Insert(_) | Statement::Update { .. } | Statement::Delete(_)
    );

    Ok(ValidatedSql {
        text: statement.to_string(),
        dialect,
        row_limit_applied,
        readonly,
    })
}

/// Statement-kind gate: SELECT (incl. WITH … SELECT), SHOW, EXPLAIN when
/// permitted, and plain DML only when the policy widens the gate.
fn check_statement_kind(
    statement: &Statement,
    policy: &SafetyPolicy,
    allow_explain: bool,
) -> Result<()> {
    match statement {
        Statement::Query(query) => check_query(query),
        Statement::Explain {
            analyze, statement, ..
        } => {
            if !allow_explain {
                return Err(Error::rejected(
                    ErrorKind::NotReadonly,
                    "EXPLAIN is not permitted by policy",
                ));
            }
            if *analyze {
                // EXPLAIN ANALYZE executes the statement
                return Err(Error::rejected(
                    ErrorKind::NotReadonly,
                    "EXPLAIN ANALYZE executes the statement and is not permitted",
                ));
            }
            check_statement_kind(statement, policy, false)
        }
        Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowCollation { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. } => Ok(()),
        Statement::Insert(_) | Statement::Update { .. } | Statement::Delete(_) => {
            if policy.allow_write {
                Ok(())
            } else {
                Err(Error::rejected(
                    ErrorKind::NotReadonly,
                    format!("statement mutates data: {}", statement_label(statement)),
                ))
            }
        }
        other => Err(Error::rejected(
            ErrorKind::NotReadonly,
            format!("statement kind is not read-only: {}", statement_label(other)),
        )),
    }
}

/// Walk a query tree, refusing anything with a write or locking effect.
fn check_query(query: &Query) -> Result<()> {
    if !query.locks.is_empty() {
        return Err(Error::rejected(
            ErrorKind::NotReadonly,
            "FOR UPDATE / FOR SHARE acquires row locks and is not read-only",
        ));
    }

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }

    check_set_expr(&query.body)
}

fn check_set_expr(body: &SetExpr) -> Result<()> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(Error::rejected(
                    ErrorKind::NotReadonly,
                    "SELECT INTO creates a table and is not read-only",
                ));
            }
            for table in &select.from {
                check_table_factor(&table.relation)?;
                for join in &table.joins {
                    check_table_factor(&join.relation)?;
                }
            }
            Ok(())
        }
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        SetExpr::Values(_) => Ok(()),
        other => Err(Error::rejected(
            ErrorKind::NotReadonly,
            format!("query body is not read-only: {other}"),
        )),
    }
}

fn check_table_factor(factor: &TableFactor) -> Result<()> {
    match factor {
        TableFactor::Derived { subquery, .. } => check_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            check_table_factor(&table_with_joins.relation)?;
            for join in &table_with_joins.joins {
                check_table_factor(&join.relation)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Function blacklist, applied to every invocation anywhere in the tree,
/// including set-returning functions in FROM position.
fn check_functions(statement: &Statement, policy: &SafetyPolicy) -> Result<()> {
    // Expression-position calls, including inside subqueries and CTEs.
    let flow = visit_expressions(statement, |expr| {
        if let Expr::Function(function) = expr {
            if let Some(name) = blocked_name(&function.name, policy) {
                return ControlFlow::Break(name);
            }
        }
        ControlFlow::Continue(())
    });
    if let ControlFlow::Break(name) = flow {
        return Err(Error::rejected(
            ErrorKind::BlockedFunction,
            format!("function '{name}' is blocked by policy"),
        ));
    }

    // FROM-position calls: SELECT * FROM pg_read_file('...') parses as a
    // table reference carrying arguments.
    let flow = table_function_names(statement, policy);
    if let Some(name) = flow {
        return Err(Error::rejected(
            ErrorKind::BlockedFunction,
            format!("function '{name}' is blocked by policy"),
        ));
    }

    Ok(())
}

fn table_function_names(statement: &Statement, policy: &SafetyPolicy) -> Option<String> {
    fn scan_query(query: &Query, policy: &SafetyPolicy) -> Option<String> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                if let Some(name) = scan_query(&cte.query, policy) {
                    return Some(name);
                }
            }
        }
        scan_set_expr(&query.body, policy)
    }

    fn scan_set_expr(body: &SetExpr, policy: &SafetyPolicy) -> Option<String> {
        match body {
            SetExpr::Select(select) => {
                for table in &select.from {
                    if let Some(name) = scan_factor(&table.relation, policy) {
                        return Some(name);
                    }
                    for join in &table.joins {
                        if let Some(name) = scan_factor(&join.relation, policy) {
                            return Some(name);
                        }
                    }
                }
                None
            }
            SetExpr::Query(query) => scan_query(query, policy),
            SetExpr::SetOperation { left, right, .. } => {
                scan_set_expr(left, policy).or_else(|| scan_set_expr(right, policy))
            }
            _ => None,
        }
    }

    fn scan_factor(factor: &TableFactor, policy: &SafetyPolicy) -> Option<String> {
        match factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => blocked_name(name, policy),
            TableFactor::Derived { subquery, .. } => scan_query(subquery, policy),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                if let Some(n) = scan_factor(&table_with_joins.relation, policy) {
                    return Some(n);
                }
                for join in &table_with_joins.joins {
                    if let Some(n) = scan_factor(&join.relation, policy) {
                        return Some(n);
                    }
                }
                None
            }
            _ => None,
        }
    }

    match statement {
        Statement::Query(query) => scan_query(query, policy),
        Statement::Explain { statement, .. } => table_function_names(statement, policy),
        _ => None,
    }
}

/// Match a (possibly schema-qualified) name against the blacklist, returning
/// the offending spelling.
fn blocked_name(name: &ObjectName, policy: &SafetyPolicy) -> Option<String> {
    let parts: Vec<String> = name.0.iter().map(|i| i.value.to_lowercase()).collect();
    let bare = parts.last()?.clone();
    let qualified = parts.join(".");

    if policy.blocked_functions.contains(&bare) || policy.blocked_functions.contains(&qualified) {
        Some(name.to_string())
    } else {
        None
    }
}

/// Identifier policy: every referenced relation must be on the allowlist.
/// CTE names introduced by the statement itself are always permitted.
fn check_identifiers(statement: &Statement, dialect: Dialect, policy: &SafetyPolicy) -> Result<()> {
    let Some(allowed) = &policy.allowed_tables else {
        return Ok(());
    };

    let cte_names = collect_cte_names(statement, dialect);

    let flow = visit_relations(statement, |relation: &ObjectName| {
        let parts: Vec<String> = relation
            .0
            .iter()
            .map(|ident| fold_ident(ident, dialect))
            .collect();

        if parts.len() == 1 && cte_names.contains(&parts[0]) {
            return ControlFlow::Continue(());
        }

        let bare = parts.last().cloned().unwrap_or_default();
        let qualified = parts.join(".");

        if allowed.contains(&bare) || allowed.contains(&qualified) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(relation.to_string())
        }
    });

    if let ControlFlow::Break(relation) = flow {
        return Err(Error::rejected(
            ErrorKind::DisallowedIdentifier,
            format!("relation '{relation}' is not on the allowlist"),
        ));
    }

    Ok(())
}

/// Quoted identifiers keep their spelling; unquoted ones fold per dialect.
fn fold_ident(ident: &sqlparser::ast::Ident, dialect: Dialect) -> String {
    if ident.quote_style.is_some() {
        ident.value.to_lowercase()
    } else {
        dialect.fold_identifier(&ident.value)
    }
}

fn collect_cte_names(statement: &Statement, dialect: Dialect) -> HashSet<String> {
    fn collect_query(query: &Query, dialect: Dialect, out: &mut HashSet<String>) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                out.insert(fold_ident(&cte.alias.name, dialect));
                collect_query(&cte.query, dialect, out);
            }
        }
        collect_set_expr(&query.body, dialect, out);
    }

    fn collect_set_expr(body: &SetExpr, dialect: Dialect, out: &mut HashSet<String>) {
        match body {
            SetExpr::Select(select) => {
                for table in &select.from {
                    collect_factor(&table.relation, dialect, out);
                    for join in &table.joins {
                        collect_factor(&join.relation, dialect, out);
                    }
                }
            }
            SetExpr::Query(query) => collect_query(query, dialect, out),
            SetExpr::SetOperation { left, right, .. } => {
                collect_set_expr(left, dialect, out);
                collect_set_expr(right, dialect, out);
            }
            _ => {}
        }
    }

    fn collect_factor(factor: &TableFactor, dialect: Dialect, out: &mut HashSet<String>) {
        match factor {
            TableFactor::Derived { subquery, .. } => collect_query(subquery, dialect, out),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                collect_factor(&table_with_joins.relation, dialect, out);
                for join in &table_with_joins.joins {
                    collect_factor(&join.relation, dialect, out);
                }
            }
            _ => {}
        }
    }

    let mut out = HashSet::new();
    match statement {
        Statement::Query(query) => collect_query(query, dialect, &mut out),
        Statement::Explain { statement, .. } => {
            return collect_cte_names(statement, dialect);
        }
        _ => {}
    }
    out
}

/// Ensure the outer query carries a limit no greater than the cap.
/// Returns true when the statement was rewritten.
fn apply_row_cap(query: &mut Query, cap: u64) -> bool {
    let cap_expr = Expr::Value(Value::Number(cap.to_string(), false));

    if let Some(fetch) = &mut query.fetch {
        return match &fetch.quantity {
            Some(Expr::Value(Value::Number(n, _))) => {
                if n.parse::<u64>().map(|v| v > cap).unwrap_or(true) {
                    fetch.quantity = Some(cap_expr);
                    true
                } else {
                    false
                }
            }
            _ => {
                fetch.quantity = Some(cap_expr);
                true
            }
        };
    }

    match &query.limit {
        Some(Expr::Value(Value::Number(n, _))) => {
            if n.parse::<u64>().map(|v| v > cap).unwrap_or(true) {
                query.limit = Some(cap_expr);
                true
            } else {
                false
            }
        }
        Some(_) => {
            // Non-literal limit expression: replace with the cap
            query.limit = Some(cap_expr);
            true
        }
        None => {
            query.limit = Some(cap_expr);
            true
        }
    }
}

fn statement_label(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert(_) => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::Merge { .. } => "MERGE",
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::CreateView { .. } => "CREATE VIEW",
        Statement::CreateIndex(_) => "CREATE INDEX",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } => "ALTER TABLE",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Grant { .. } => "GRANT",
        Statement::Revoke { .. } => "REVOKE",
        Statement::StartTransaction { .. } => "BEGIN",
        Statement::Commit { .. } => "COMMIT",
        Statement::Rollback { .. } => "ROLLBACK",
        Statement::Call(_) => "CALL",
        Statement::SetVariable { .. } => "SET",
        Statement::Copy { .. } => "COPY",
        _ => "statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SafetyPolicy;

    fn policy() -> SafetyPolicy {
        SafetyPolicy::new(10_000)
    }

    fn validate_pg(sql: &str) -> Result<ValidatedSql> {
        validate(sql, Dialect::Postgres, &policy())
    }

    fn kind_of(result: Result<ValidatedSql>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn plain_select_passes_and_gets_limit() {
        let v = validate_pg("SELECT id, name FROM users").unwrap();
        assert!(v.row_limit_applied());
        assert!(v.text().contains("LIMIT 10000"));
        assert_eq!(v.dialect(), Dialect::Postgres);
    }

    #[test]
    fn existing_limit_below_cap_kept() {
        let v = validate_pg("SELECT id FROM users LIMIT 5").unwrap();
        assert!(!v.row_limit_applied());
        assert!(v.text().contains("LIMIT 5"));
    }

    #[test]
    fn oversized_limit_is_lowered() {
        let v = validate_pg("SELECT id FROM users LIMIT 999999").unwrap();
        assert!(v.row_limit_applied());
        assert!(v.text().contains("LIMIT 10000"));
        assert!(!v.text().contains("999999"));
    }

    #[test]
    fn fetch_clause_is_capped() {
        let v = validate_pg("SELECT id FROM users FETCH FIRST 999999 ROWS ONLY").unwrap();
        assert!(v.row_limit_applied());
        assert!(!v.text().contains("999999"));
    }

    #[test]
    fn cte_select_passes() {
        let v =
            validate_pg("WITH active AS (SELECT * FROM users WHERE active) SELECT count(*) FROM active")
                .unwrap();
        assert!(v.text().starts_with("WITH"));
    }

    #[test]
    fn empty_statement_rejected() {
        assert_eq!(kind_of(validate_pg("")), ErrorKind::EmptyStatement);
        assert_eq!(kind_of(validate_pg("   \n\t")), ErrorKind::EmptyStatement);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert_eq!(
            kind_of(validate_pg("SELEKT id FRUM users")),
            ErrorKind::ParseError
        );
    }

    #[test]
    fn stacked_statements_rejected() {
        assert_eq!(
            kind_of(validate_pg("SELECT 1; SELECT 2")),
            ErrorKind::MultipleStatements
        );
        assert_eq!(
            kind_of(validate_pg("SELECT 1; DROP TABLE users")),
            ErrorKind::MultipleStatements
        );
        // Trailing comment after the separator still counts as stacking
        assert_eq!(
            kind_of(validate_pg("SELECT 1; DELETE FROM users -- cleanup")),
            ErrorKind::MultipleStatements
        );
    }

    #[test]
    fn trailing_semicolon_is_fine() {
        assert!(validate_pg("SELECT 1;").is_ok());
        assert!(validate_pg("SELECT 1; -- done").is_ok());
    }

    #[test]
    fn dml_and_ddl_rejected() {
        for sql in [
            "INSERT INTO users (id) VALUES (1)",
            "UPDATE users SET name = 'x'",
            "DELETE FROM users",
            "DROP TABLE users",
            "CREATE TABLE t (id int)",
            "ALTER TABLE users ADD COLUMN x int",
            "TRUNCATE TABLE users",
            "GRANT SELECT ON users TO public",
        ] {
            assert_eq!(kind_of(validate_pg(sql)), ErrorKind::NotReadonly, "{sql}");
        }
    }

    #[test]
    fn comment_wrapped_keywords_do_not_hide_writes() {
        assert_eq!(
            kind_of(validate_pg("/* harmless */ DELETE FROM users")),
            ErrorKind::NotReadonly
        );
        assert_eq!(
            kind_of(validate_pg("-- note\nUPDATE users SET a = 1")),
            ErrorKind::NotReadonly
        );
    }

    #[test]
    fn select_into_rejected() {
        assert_eq!(
            kind_of(validate_pg("SELECT * INTO backup FROM users")),
            ErrorKind::NotReadonly
        );
    }

    #[test]
    fn locking_reads_rejected() {
        assert_eq!(
            kind_of(validate_pg("SELECT * FROM users FOR UPDATE")),
            ErrorKind::NotReadonly
        );
        assert_eq!(
            kind_of(validate_pg("SELECT * FROM users FOR SHARE")),
            ErrorKind::NotReadonly
        );
    }

    #[test]
    fn blocked_functions_rejected_case_insensitively() {
        assert_eq!(
            kind_of(validate_pg("SELECT pg_sleep(100)")),
            ErrorKind::BlockedFunction
        );
        assert_eq!(
            kind_of(validate_pg("SELECT PG_SLEEP(100)")),
            ErrorKind::BlockedFunction
        );
        assert_eq!(
            kind_of(validate_pg("SELECT pg_catalog.pg_sleep(1)")),
            ErrorKind::BlockedFunction
        );
    }

    #[test]
    fn blocked_function_in_subquery_rejected() {
        assert_eq!(
            kind_of(validate_pg(
                "SELECT * FROM users WHERE id IN (SELECT pg_sleep(10))"
            )),
            ErrorKind::BlockedFunction
        );
    }

    #[test]
    fn blocked_function_in_dead_cte_branch_still_rejected() {
        // The validator is syntactic; unreachable branches are not analyzed.
        assert_eq!(
            kind_of(validate_pg(
                "WITH x AS (SELECT pg_sleep(9)) SELECT 1 WHERE false"
            )),
            ErrorKind::BlockedFunction
        );
    }

    #[test]
    fn table_valued_blocked_function_rejected() {
        assert_eq!(
            kind_of(validate_pg("SELECT * FROM pg_ls_dir('/etc')")),
            ErrorKind::BlockedFunction
        );
    }

    #[test]
    fn mysql_sleep_and_benchmark_rejected() {
        assert_eq!(
            kind_of(validate("SELECT SLEEP(5)", Dialect::MySql, &policy())),
            ErrorKind::BlockedFunction
        );
        assert_eq!(
            kind_of(validate(
                "SELECT BENCHMARK(1000000, MD5('x'))",
                Dialect::MySql,
                &policy()
            )),
            ErrorKind::BlockedFunction
        );
    }

    #[test]
    fn allowlist_restricts_relations() {
        let restricted = SafetyPolicy::new(100).with_allowed_tables(["users", "public.posts"]);

        assert!(validate("SELECT * FROM users", Dialect::Postgres, &restricted).is_ok());
        assert!(validate("SELECT * FROM public.users", Dialect::Postgres, &restricted).is_ok());
        assert!(validate("SELECT * FROM public.posts", Dialect::Postgres, &restricted).is_ok());
        // Mixed case folds before comparison
        assert!(validate("SELECT * FROM Users", Dialect::Postgres, &restricted).is_ok());

        let err = validate("SELECT * FROM secrets", Dialect::Postgres, &restricted);
        assert_eq!(kind_of(err), ErrorKind::DisallowedIdentifier);

        let err = validate(
            "SELECT * FROM users u JOIN secrets s ON u.id = s.uid",
            Dialect::Postgres,
            &restricted,
        );
        assert_eq!(kind_of(err), ErrorKind::DisallowedIdentifier);
    }

    #[test]
    fn cte_names_do_not_trip_the_allowlist() {
        let restricted = SafetyPolicy::new(100).with_allowed_tables(["users"]);
        let v = validate(
            "WITH recent AS (SELECT * FROM users) SELECT count(*) FROM recent",
            Dialect::Postgres,
            &restricted,
        )
        .unwrap();
        assert!(v.text().contains("recent"));
    }

    #[test]
    fn explain_gated_by_policy() {
        assert_eq!(
            kind_of(validate_pg("EXPLAIN SELECT * FROM users")),
            ErrorKind::NotReadonly
        );

        let mut explain_ok = policy();
        explain_ok.allow_explain = true;
        assert!(validate("EXPLAIN SELECT * FROM users", Dialect::Postgres, &explain_ok).is_ok());

        // EXPLAIN ANALYZE executes and is always refused
        assert_eq!(
            kind_of(validate(
                "EXPLAIN ANALYZE SELECT * FROM users",
                Dialect::Postgres,
                &explain_ok
            )),
            ErrorKind::NotReadonly
        );

        // The inner statement is still gated
        assert_eq!(
            kind_of(validate(
                "EXPLAIN DELETE FROM users",
                Dialect::Postgres,
                &explain_ok
            )),
            ErrorKind::NotReadonly
        );
    }

    #[test]
    fn readonly_flag_tracks_statement_kind() {
        let v = validate_pg("SELECT 1").unwrap();
        assert!(v.is_readonly());

        let mut writable = policy();
        writable.allow_write = true;
        let v = validate("DELETE FROM t", Dialect::Postgres, &writable).unwrap();
        assert!(!v.is_readonly());
    }

    #[test]
    fn allow_write_admits_dml_but_never_ddl() {
        let mut writable = policy();
        writable.allow_write = true;

        assert!(validate("INSERT INTO t (a) VALUES (1)", Dialect::Postgres, &writable).is_ok());
        assert!(validate("UPDATE t SET a = 1", Dialect::Postgres, &writable).is_ok());
        assert!(validate("DELETE FROM t WHERE a = 1", Dialect::Postgres, &writable).is_ok());
        assert_eq!(
            kind_of(validate("DROP TABLE t", Dialect::Postgres, &writable)),
            ErrorKind::NotReadonly
        );
        assert_eq!(
            kind_of(validate("TRUNCATE TABLE t", Dialect::Postgres, &writable)),
            ErrorKind::NotReadonly
        );
    }

    #[test]
    fn show_statements_pass() {
        assert!(validate("SHOW TABLES", Dialect::MySql, &policy()).is_ok());
    }

    #[test]
    fn union_branches_are_scanned() {
        assert_eq!(
            kind_of(validate_pg("SELECT 1 UNION SELECT pg_sleep(1)")),
            ErrorKind::BlockedFunction
        );
        let v = validate_pg("SELECT id FROM a UNION ALL SELECT id FROM b").unwrap();
        assert!(v.text().contains("UNION ALL"));
    }

    #[test]
    fn transaction_control_rejected() {
        for sql in ["BEGIN", "COMMIT", "ROLLBACK"] {
            assert_eq!(kind_of(validate_pg(sql)), ErrorKind::NotReadonly, "{sql}");
        }
    }

    #[test]
    fn serialized_text_round_trips() {
        for sql in [
            "SELECT id, name FROM users WHERE active ORDER BY name",
            "WITH t AS (SELECT a FROM b) SELECT * FROM t LIMIT 3",
            "SELECT count(*) FROM orders GROUP BY status HAVING count(*) > 5",
        ] {
            let v = validate_pg(sql).unwrap();
            let first = Parser::parse_sql(&PostgreSqlDialect {}, v.text()).unwrap();
            let reserialized = first[0].to_string();
            let second = Parser::parse_sql(&PostgreSqlDialect {}, &reserialized).unwrap();
            assert_eq!(first, second, "{sql}");
        }
    }

    #[test]
    fn validated_text_is_the_serialized_ast() {
        // Input formatting does not survive; the output is the AST rendering.
        let v = validate_pg("select   id \n from users").unwrap();
        assert!(v.text().starts_with("SELECT id FROM users"));
    }
}

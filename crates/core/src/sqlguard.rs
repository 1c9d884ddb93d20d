//! Validation and rewrite pipeline for the ad-hoc record-query capability.
//!
//! The pipeline is pure: `(query, user_id) -> prepared query | rejection`.
//! Execution of accepted queries is disabled by policy at the executor level;
//! validation still runs so rejections carry a precise reason and so the
//! rewrite rules stay independently testable.

use thiserror::Error;

/// Tables the record-query capability may reference.
pub const ALLOWED_TABLES: &[&str] = &["facturas", "ventas", "facturas_generadas", "uploads"];

/// Statement keywords that disqualify a query outright, wherever they appear.
const MUTATING_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE",
];

/// Clause keywords that terminate the WHERE section of a SELECT.
const CLAUSE_BOUNDARIES: &[&str] = &["GROUP", "ORDER", "HAVING", "LIMIT"];

const DEFAULT_ROW_LIMIT: u32 = 1000;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SqlGuardError {
    #[error("only SELECT statements are allowed")]
    NotSelect,
    #[error("statement contains forbidden keyword `{0}`")]
    MutatingKeyword(String),
    #[error("table `{0}` is not in the allowed table list")]
    TableNotAllowed(String),
}

/// Validates a candidate query without rewriting it.
pub fn validate_query(query: &str) -> Result<(), SqlGuardError> {
    let trimmed = query.trim();
    if !first_word_is(trimmed, "SELECT") {
        return Err(SqlGuardError::NotSelect);
    }

    for keyword in MUTATING_KEYWORDS {
        if contains_word(trimmed, keyword) {
            return Err(SqlGuardError::MutatingKeyword((*keyword).to_string()));
        }
    }

    if let Some(table) = referenced_table(trimmed) {
        if !ALLOWED_TABLES.iter().any(|allowed| table.eq_ignore_ascii_case(allowed)) {
            return Err(SqlGuardError::TableNotAllowed(table));
        }
    }

    Ok(())
}

/// Full pipeline: validate, cap the row count, scope to the requesting user.
/// Idempotent: feeding an already-prepared query back in returns it unchanged.
pub fn prepare_query(query: &str, user_id: &str) -> Result<String, SqlGuardError> {
    validate_query(query)?;
    let table = referenced_table(query);
    let mut prepared = query.trim().trim_end_matches(';').to_string();
    if let Some(table) = table {
        prepared = scope_to_user(&prepared, user_id, &table);
    }
    Ok(apply_row_limit(&prepared))
}

/// The first table named after FROM, if any.
pub fn referenced_table(query: &str) -> Option<String> {
    let mut words = words(query);
    while let Some(word) = words.next() {
        if word.text.eq_ignore_ascii_case("FROM") {
            return words.next().map(|next| next.text.to_string());
        }
    }
    None
}

/// Column carrying the owning user for tenant-scoped tables.
pub fn user_scope_column(table: &str) -> Option<&'static str> {
    match table.to_ascii_lowercase().as_str() {
        "facturas_generadas" => Some("created_by"),
        "uploads" => Some("user_id"),
        _ => None,
    }
}

/// Appends `LIMIT 1000` unless the statement already carries a LIMIT clause.
pub fn apply_row_limit(query: &str) -> String {
    if contains_word(query, "LIMIT") {
        return query.to_string();
    }
    format!("{} LIMIT {DEFAULT_ROW_LIMIT}", query.trim_end().trim_end_matches(';'))
}

/// Conjoins a user-equality filter into the statement's WHERE clause when the
/// table is tenant-scoped. The filter lands before any GROUP BY / ORDER BY /
/// HAVING / LIMIT clause; an already-scoped query is returned unchanged.
pub fn scope_to_user(query: &str, user_id: &str, table: &str) -> String {
    let Some(column) = user_scope_column(table) else {
        return query.to_string();
    };

    let filter = format!("{column} = '{}'", escape_literal(user_id));
    if normalized(query).contains(&normalized(&filter)) {
        return query.to_string();
    }

    let boundary = clause_boundary(query);
    let (head, tail) = query.split_at(boundary);
    let head = head.trim_end();

    if let Some(where_pos) = word_position(query, "WHERE") {
        if where_pos < boundary {
            return format!("{head} AND {filter} {}", tail.trim_start())
                .trim_end()
                .to_string();
        }
    }
    format!("{head} WHERE {filter} {}", tail.trim_start()).trim_end().to_string()
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn normalized(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
}

/// Byte offset where the WHERE-eligible section of the statement ends.
fn clause_boundary(query: &str) -> usize {
    CLAUSE_BOUNDARIES
        .iter()
        .filter_map(|keyword| word_position(query, keyword))
        .min()
        .unwrap_or(query.len())
}

struct Word<'a> {
    text: &'a str,
    start: usize,
}

fn words(query: &str) -> impl Iterator<Item = Word<'_>> {
    let bytes = query.as_bytes();
    let mut index = 0;
    std::iter::from_fn(move || {
        while index < bytes.len() && !is_word_byte(bytes[index]) {
            index += 1;
        }
        if index >= bytes.len() {
            return None;
        }
        let start = index;
        while index < bytes.len() && is_word_byte(bytes[index]) {
            index += 1;
        }
        Some(Word { text: &query[start..index], start })
    })
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn contains_word(query: &str, keyword: &str) -> bool {
    words(query).any(|word| word.text.eq_ignore_ascii_case(keyword))
}

fn word_position(query: &str, keyword: &str) -> Option<usize> {
    words(query).find(|word| word.text.eq_ignore_ascii_case(keyword)).map(|word| word.start)
}

fn first_word_is(query: &str, keyword: &str) -> bool {
    words(query).next().is_some_and(|word| word.text.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::{
        apply_row_limit, prepare_query, referenced_table, scope_to_user, validate_query,
        SqlGuardError,
    };

    #[test]
    fn plain_select_on_allowed_table_passes() {
        assert_eq!(validate_query("SELECT * FROM facturas"), Ok(()));
        assert_eq!(validate_query("  select id, proveedor from ventas  "), Ok(()));
    }

    #[test]
    fn non_select_statements_are_rejected() {
        assert_eq!(
            validate_query("UPDATE facturas SET proveedor = 'x'"),
            Err(SqlGuardError::NotSelect)
        );
        assert_eq!(validate_query("WITH t AS (SELECT 1) SELECT * FROM t"), Err(SqlGuardError::NotSelect));
        assert_eq!(validate_query(""), Err(SqlGuardError::NotSelect));
    }

    #[test]
    fn mutating_keywords_are_rejected_anywhere_any_casing() {
        let cases = [
            "SELECT * FROM facturas; DROP TABLE facturas;",
            "SELECT * FROM facturas WHERE id IN (SELECT id FROM ventas); dElEtE FROM ventas",
            "SELECT 1 FROM facturas UNION SELECT 1; TRUNCATE ventas",
            "SELECT * FROM facturas /* */ ; GRANT ALL ON ventas TO evil",
            "select * from facturas;insert into facturas values (1)",
        ];
        for query in cases {
            assert!(
                matches!(validate_query(query), Err(SqlGuardError::MutatingKeyword(_))),
                "expected rejection for: {query}"
            );
        }
    }

    #[test]
    fn keyword_scan_respects_word_boundaries() {
        // Column names that merely contain a forbidden keyword must not trip
        // the scan; `updated_at` is not `UPDATE`.
        assert_eq!(validate_query("SELECT updated_at, created_by FROM uploads"), Ok(()));
    }

    #[test]
    fn tables_outside_the_whitelist_are_rejected() {
        assert_eq!(
            validate_query("SELECT * FROM usuarios"),
            Err(SqlGuardError::TableNotAllowed("usuarios".to_string()))
        );
        assert_eq!(
            validate_query("SELECT secret FROM credentials WHERE 1=1"),
            Err(SqlGuardError::TableNotAllowed("credentials".to_string()))
        );
    }

    #[test]
    fn referenced_table_reads_the_from_target() {
        assert_eq!(referenced_table("SELECT * FROM facturas WHERE x = 1"), Some("facturas".into()));
        assert_eq!(referenced_table("SELECT 1"), None);
    }

    #[test]
    fn row_limit_is_injected_once() {
        let limited = apply_row_limit("SELECT * FROM facturas");
        assert_eq!(limited, "SELECT * FROM facturas LIMIT 1000");
        assert_eq!(apply_row_limit(&limited), limited);
        assert_eq!(apply_row_limit("SELECT * FROM facturas LIMIT 5"), "SELECT * FROM facturas LIMIT 5");
    }

    #[test]
    fn scoping_creates_a_where_clause_when_absent() {
        let scoped = scope_to_user("SELECT * FROM uploads", "u-1", "uploads");
        assert_eq!(scoped, "SELECT * FROM uploads WHERE user_id = 'u-1'");
    }

    #[test]
    fn scoping_conjoins_with_existing_where() {
        let scoped = scope_to_user(
            "SELECT * FROM facturas_generadas WHERE estado = 'emitida'",
            "u-2",
            "facturas_generadas",
        );
        assert_eq!(
            scoped,
            "SELECT * FROM facturas_generadas WHERE estado = 'emitida' AND created_by = 'u-2'"
        );
    }

    #[test]
    fn scoping_lands_before_trailing_clauses() {
        let scoped = scope_to_user(
            "SELECT * FROM uploads ORDER BY fecha DESC LIMIT 5",
            "u-3",
            "uploads",
        );
        assert_eq!(scoped, "SELECT * FROM uploads WHERE user_id = 'u-3' ORDER BY fecha DESC LIMIT 5");
    }

    #[test]
    fn scoping_skips_tables_without_a_user_column() {
        let query = "SELECT * FROM facturas WHERE proveedor = 'Meta'";
        assert_eq!(scope_to_user(query, "u-4", "facturas"), query);
    }

    #[test]
    fn prepare_is_idempotent() {
        let first = prepare_query("SELECT * FROM uploads WHERE estado = 'ok'", "u-5").unwrap();
        let second = prepare_query(&first, "u-5").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "SELECT * FROM uploads WHERE estado = 'ok' AND user_id = 'u-5' LIMIT 1000");
    }

    #[test]
    fn prepare_escapes_quotes_in_the_user_id() {
        let prepared = prepare_query("SELECT * FROM uploads", "u'; --").unwrap();
        assert_eq!(prepared, "SELECT * FROM uploads WHERE user_id = 'u''; --' LIMIT 1000");
    }

    #[test]
    fn prepare_rejects_before_rewriting() {
        assert!(matches!(
            prepare_query("SELECT * FROM uploads; DELETE FROM uploads", "u-6"),
            Err(SqlGuardError::MutatingKeyword(_))
        ));
    }
}

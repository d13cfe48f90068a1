//! Security utilities for SQL injection prevention in rivven-repo.
//!
//! Provides:
//! - Identifier validation for parameter names, table names, column names
//! - Qualified-name validation for stored procedures and bulk destinations
//! - Sort-column validation for dynamic ORDER BY clauses
//!
//! Every piece of caller text that ends up concatenated into SQL passes
//! through one of these functions first.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Allowed shape of a sort column: letters, digits, underscore and dot
static SORT_COLUMN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("valid sort column regex"));

/// Keywords that may never appear inside a sort column, compared case-insensitively
pub const SORT_COLUMN_BLACKLIST: [&str; 11] = [
    "DROP", "DELETE", "INSERT", "UPDATE", "EXEC", "EXECUTE", "SELECT", "UNION", "DECLARE",
    "CAST", "CONVERT",
];

/// Validate a SQL identifier (parameter, table, column names).
///
/// Enforces strict character rules:
/// - Must not be empty
/// - Maximum 128 characters (SQL Server `sysname`)
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use rivven_repo::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users").is_ok());
/// assert!(validate_sql_identifier("my_table_123").is_ok());
/// assert!(validate_sql_identifier("_private").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("identifier", "SQL identifier cannot be empty"));
    }

    if name.len() > 128 {
        return Err(Error::validation(
            "identifier",
            format!("SQL identifier too long: {} chars (max 128)", name.len()),
        ));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::validation(
                "identifier",
                format!("invalid SQL identifier '{name}': must start with a letter or underscore"),
            ));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::validation(
                "identifier",
                format!("invalid SQL identifier '{name}': contains invalid character '{c}'"),
            ));
        }
    }

    Ok(())
}

/// Validate a possibly schema-qualified object name (`dbo.Orders`, `[sales].[Order Lines]`).
///
/// Each dot-separated part is either a plain identifier or a bracket-quoted
/// identifier without `]`, `;` or control characters. At most three parts
/// (database.schema.object) are accepted.
///
/// ```
/// use rivven_repo::security::validate_qualified_name;
///
/// assert!(validate_qualified_name("dbo.usp_GetOrders").is_ok());
/// assert!(validate_qualified_name("[sales].[Order Lines]").is_ok());
/// assert!(validate_qualified_name("dbo.x; DROP TABLE t").is_err());
/// ```
pub fn validate_qualified_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("name", "object name cannot be empty"));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 3 {
        return Err(Error::validation(
            "name",
            format!("object name '{name}' has too many parts"),
        ));
    }

    for part in parts {
        if let Some(inner) = part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
            let bad = inner.is_empty()
                || inner.len() > 128
                || inner
                    .chars()
                    .any(|c| c == ']' || c == '[' || c == ';' || c.is_control());
            if bad {
                return Err(Error::validation(
                    "name",
                    format!("invalid quoted identifier in '{name}'"),
                ));
            }
        } else {
            validate_sql_identifier(part).map_err(|_| {
                Error::validation("name", format!("invalid object name '{name}'"))
            })?;
        }
    }

    Ok(())
}

/// Validate a caller-supplied sort column for interpolation into ORDER BY.
///
/// The column must match `^[A-Za-z0-9_.]+$` and must not contain any keyword of
/// [`SORT_COLUMN_BLACKLIST`], case-insensitively. Rejections are logged as a
/// potential injection attempt and returned as `Error::Validation` for the
/// `sort_column` argument.
///
/// ```
/// use rivven_repo::security::validate_sort_column;
///
/// assert!(validate_sort_column("CreatedAt").is_ok());
/// assert!(validate_sort_column("o.customer_id").is_ok());
/// assert!(validate_sort_column("id; DROP TABLE users").is_err());
/// assert!(validate_sort_column("UpdatedAt").is_err());
/// ```
pub fn validate_sort_column(column: &str) -> Result<()> {
    if !SORT_COLUMN_REGEX.is_match(column) {
        tracing::warn!(
            sort_column = %column,
            "Rejected sort column with invalid characters (potential injection attempt)"
        );
        return Err(Error::validation(
            "sort_column",
            format!("sort column '{column}' contains invalid characters"),
        ));
    }

    let upper = column.to_ascii_uppercase();
    if let Some(keyword) = SORT_COLUMN_BLACKLIST.iter().find(|k| upper.contains(*k)) {
        tracing::warn!(
            sort_column = %column,
            keyword = %keyword,
            "Rejected sort column containing a reserved keyword (potential injection attempt)"
        );
        return Err(Error::validation(
            "sort_column",
            format!("sort column '{column}' contains forbidden keyword {keyword}"),
        ));
    }

    Ok(())
}

/// Validate a SQL type name used in a generated `DECLARE`.
///
/// Allows letters, digits, underscores, spaces, parentheses and commas
/// (`INT`, `DECIMAL(18,2)`, `NVARCHAR(MAX)`).
pub fn validate_sql_type_name(type_name: &str) -> Result<()> {
    if type_name.is_empty() || type_name.len() > 128 {
        return Err(Error::validation(
            "sql_type",
            format!("invalid SQL type name length: {}", type_name.len()),
        ));
    }

    if let Some(c) = type_name
        .chars()
        .find(|&c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ')))
    {
        return Err(Error::validation(
            "sql_type",
            format!("invalid SQL type name '{type_name}': contains invalid character '{c}'"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("users").is_ok());
        assert!(validate_sql_identifier("PageSize").is_ok());
        assert!(validate_sql_identifier("_").is_ok());
        assert!(validate_sql_identifier(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_sql_identifier(&"a".repeat(129)).is_err());
        assert!(validate_sql_identifier("my-table").is_err());
        assert!(validate_sql_identifier("a b").is_err());
        assert!(validate_sql_identifier("1abc").is_err());
        assert!(validate_sql_identifier("tbl'--").is_err());
    }

    #[test]
    fn test_sort_column_rejects_injection() {
        let err = validate_sort_column("id; DROP TABLE users").unwrap_err();
        match err {
            Error::Validation { field, .. } => assert_eq!(field, "sort_column"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sort_column_keyword_blacklist_case_insensitive() {
        for keyword in SORT_COLUMN_BLACKLIST {
            let lower = format!("x_{}", keyword.to_lowercase());
            assert!(validate_sort_column(&lower).is_err(), "{lower} accepted");
        }
        // substring match: these contain SELECT and CAST
        assert!(validate_sort_column("selected_at").is_err());
        assert!(validate_sort_column("Forecast").is_err());
    }

    #[test]
    fn test_sort_column_accepts_plain_names() {
        assert!(validate_sort_column("Id").is_ok());
        assert!(validate_sort_column("customer.name").is_ok());
        assert!(validate_sort_column("Total_2024").is_ok());
    }

    #[test]
    fn test_sort_column_rejects_empty_and_symbols() {
        assert!(validate_sort_column("").is_err());
        assert!(validate_sort_column("name DESC").is_err());
        assert!(validate_sort_column("name--").is_err());
        assert!(validate_sort_column("[name]").is_err());
    }

    #[test]
    fn test_qualified_names() {
        assert!(validate_qualified_name("Orders").is_ok());
        assert!(validate_qualified_name("db.dbo.Orders").is_ok());
        assert!(validate_qualified_name("a.b.c.d").is_err());
        assert!(validate_qualified_name("dbo.").is_err());
        assert!(validate_qualified_name("[bad]]name]").is_err());
    }

    #[test]
    fn test_sql_type_names() {
        assert!(validate_sql_type_name("INT").is_ok());
        assert!(validate_sql_type_name("DECIMAL(18, 2)").is_ok());
        assert!(validate_sql_type_name("NVARCHAR(MAX)").is_ok());
        assert!(validate_sql_type_name("INT; DROP TABLE t").is_err());
        assert!(validate_sql_type_name("").is_err());
    }
}

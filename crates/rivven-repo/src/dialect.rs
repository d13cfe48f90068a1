//! SQL dialect abstraction for rivven-repo
//!
//! Covers the handful of vendor differences the repository layer has to emit
//! SQL for:
//! - positional placeholders (`@P1`, `$1`, `?`)
//! - identifier quoting
//! - the row-limiting clause used by pagination
//! - stored-procedure call batches (with output parameters on SQL Server)
//! - multi-row INSERT for the generic bulk path

use crate::command::OutputParam;
use crate::connection::DatabaseType;
use crate::error::{Error, Result};
use crate::security::{validate_qualified_name, validate_sql_identifier, validate_sql_type_name};
use sqlparser::dialect::{GenericDialect, MsSqlDialect, PostgreSqlDialect};

/// Named parameter carrying the row offset of a paged query
pub const OFFSET_PARAM: &str = "__Offset";
/// Named parameter carrying the page size of a paged query
pub const PAGE_SIZE_PARAM: &str = "__PageSize";

/// Prefix for locals that receive stored-procedure output parameters
const OUTPUT_VAR_PREFIX: &str = "__out_";

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Database family this dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a 1-based parameter index (e.g. `@P1`, `$1`, `?`)
    fn placeholder(&self, index: usize) -> String;

    /// Whether one positional placeholder may be referenced more than once
    fn reuses_placeholders(&self) -> bool {
        true
    }

    /// Row-limiting clause appended after ORDER BY.
    ///
    /// References the named parameters [`OFFSET_PARAM`] and [`PAGE_SIZE_PARAM`];
    /// values are always bound, never interpolated.
    fn paging_clause(&self) -> String {
        format!("OFFSET @{OFFSET_PARAM} ROWS FETCH NEXT @{PAGE_SIZE_PARAM} ROWS ONLY")
    }

    /// Order applied when a paged query has none, to keep paging deterministic
    fn default_order_by(&self) -> &'static str {
        "ORDER BY 1"
    }

    /// Wrap a query so that it returns its row count
    fn count_query(&self, inner: &str) -> String {
        format!("SELECT COUNT(*) FROM ({inner}) AS _count")
    }

    /// Whether stored-procedure output parameters can be declared
    fn supports_output_params(&self) -> bool {
        false
    }

    /// Build a call batch for a stored procedure.
    ///
    /// `inputs` pairs each parameter name with the positional placeholder
    /// that carries its value.
    fn procedure_call(
        &self,
        procedure: &str,
        inputs: &[(String, String)],
        outputs: &[OutputParam],
    ) -> Result<String>;

    /// Quote a possibly schema-qualified object name
    fn quote_qualified(&self, name: &str) -> String {
        name.split('.')
            .map(|part| {
                let bare = part
                    .strip_prefix('[')
                    .and_then(|p| p.strip_suffix(']'))
                    .unwrap_or(part);
                self.quote_identifier(bare)
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Multi-row INSERT with `row_count` rows of positional placeholders
    fn insert_values_sql(&self, table: &str, columns: &[String], row_count: usize) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("INSERT INTO {} ({}) VALUES ", self.quote_qualified(table), cols);
        let mut index = 0;
        for row in 0..row_count {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col in 0..columns.len() {
                if col > 0 {
                    sql.push_str(", ");
                }
                index += 1;
                sql.push_str(&self.placeholder(index));
            }
            sql.push(')');
        }
        sql
    }
}

fn ensure_procedure(procedure: &str, inputs: &[(String, String)]) -> Result<()> {
    validate_qualified_name(procedure)?;
    for (name, _) in inputs {
        validate_sql_identifier(name.trim_start_matches('@'))?;
    }
    Ok(())
}

/// SQL Server dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn supports_output_params(&self) -> bool {
        true
    }

    fn procedure_call(
        &self,
        procedure: &str,
        inputs: &[(String, String)],
        outputs: &[OutputParam],
    ) -> Result<String> {
        ensure_procedure(procedure, inputs)?;

        let mut sql = String::new();
        for out in outputs {
            validate_sql_identifier(&out.name)?;
            validate_sql_type_name(&out.sql_type)?;
            sql.push_str(&format!(
                "DECLARE @{OUTPUT_VAR_PREFIX}{} {};\n",
                out.name, out.sql_type
            ));
        }

        let mut args: Vec<String> = inputs
            .iter()
            .map(|(n, placeholder)| format!("@{} = {placeholder}", n.trim_start_matches('@')))
            .collect();
        args.extend(
            outputs
                .iter()
                .map(|o| format!("@{} = @{OUTPUT_VAR_PREFIX}{} OUTPUT", o.name, o.name)),
        );

        sql.push_str("EXEC ");
        sql.push_str(procedure);
        if !args.is_empty() {
            sql.push(' ');
            sql.push_str(&args.join(", "));
        }
        sql.push(';');

        if !outputs.is_empty() {
            let selects = outputs
                .iter()
                .map(|o| format!("@{OUTPUT_VAR_PREFIX}{} AS {}", o.name, self.quote_identifier(&o.name)))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!("\nSELECT {selects};"));
        }

        Ok(sql)
    }
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn procedure_call(
        &self,
        procedure: &str,
        inputs: &[(String, String)],
        outputs: &[OutputParam],
    ) -> Result<String> {
        if !outputs.is_empty() {
            return Err(Error::unsupported(
                "output parameters are only supported on SQL Server",
            ));
        }
        ensure_procedure(procedure, inputs)?;
        let args = inputs
            .iter()
            .map(|(n, placeholder)| {
                format!("{} => {placeholder}", n.trim_start_matches('@').to_lowercase())
            })
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("CALL {procedure}({args})"))
    }
}

/// MySQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn reuses_placeholders(&self) -> bool {
        false
    }

    fn paging_clause(&self) -> String {
        format!("LIMIT @{PAGE_SIZE_PARAM} OFFSET @{OFFSET_PARAM}")
    }

    /// MySQL procedures take positional arguments; `inputs` order is the call order.
    fn procedure_call(
        &self,
        procedure: &str,
        inputs: &[(String, String)],
        outputs: &[OutputParam],
    ) -> Result<String> {
        if !outputs.is_empty() {
            return Err(Error::unsupported(
                "output parameters are only supported on SQL Server",
            ));
        }
        ensure_procedure(procedure, inputs)?;
        let args = inputs
            .iter()
            .map(|(_, placeholder)| placeholder.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("CALL {procedure}({args})"))
    }
}

impl DatabaseType {
    /// Dialect used to generate SQL for this database
    pub fn dialect(self) -> &'static dyn SqlDialect {
        match self {
            Self::PostgreSQL => &PostgresDialect,
            Self::MySQL => &MySqlDialect,
            Self::SqlServer | Self::Unknown => &SqlServerDialect,
        }
    }

    /// Tokenizer rules used when scanning SQL text for this database
    pub(crate) fn tokenizer_dialect(self) -> &'static dyn sqlparser::dialect::Dialect {
        match self {
            Self::PostgreSQL => &PostgreSqlDialect {},
            Self::MySQL => &sqlparser::dialect::MySqlDialect {},
            Self::SqlServer => &MsSqlDialect {},
            Self::Unknown => &GenericDialect {},
        }
    }
}

//! Command specification
//!
//! A [`CommandSpec`] is the immutable description of one database call: SQL
//! text (or a stored-procedure name), named parameters, timeout and the
//! metadata flags the execution core honours.

use crate::dialect::SqlDialect;
use crate::error::Result;
use crate::sql::{bind_named, trim_statement};
use crate::types::{Params, Value};
use std::time::Duration;

/// How the command text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Ad-hoc SQL text with `@Name` placeholders
    #[default]
    Text,
    /// Name of a stored procedure; parameters are passed by name
    StoredProcedure,
}

/// Output parameter of a stored procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputParam {
    /// Parameter name without `@`
    pub name: String,
    /// SQL type used to declare the receiving variable (e.g. `INT`)
    pub sql_type: String,
}

impl OutputParam {
    /// Create an output parameter
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into().trim_start_matches('@').to_string(),
            sql_type: sql_type.into(),
        }
    }
}

/// Immutable description of a database command
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// SQL text or procedure name
    pub sql: String,
    /// Named parameters; NULL is an explicit [`Value::Null`]
    pub params: Params,
    /// Text or stored procedure
    pub kind: CommandKind,
    /// Per-command timeout; falls back to the repository default
    pub timeout: Option<Duration>,
    /// Attach source table names to each result set of a multi-result query
    pub include_table_names: bool,
    /// Stored-procedure output parameters, returned as a trailing result set
    pub outputs: Vec<OutputParam>,
}

impl CommandSpec {
    /// Create a text command
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Default::default()
        }
    }

    /// Create a stored-procedure command
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            sql: name.into(),
            kind: CommandKind::StoredProcedure,
            ..Default::default()
        }
    }

    /// Add a named parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Replace all parameters
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set a command timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request source table names for each result set
    pub fn with_table_names(mut self) -> Self {
        self.include_table_names = true;
        self
    }

    /// Declare an output parameter (stored procedures only)
    pub fn output(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.outputs.push(OutputParam::new(name, sql_type));
        self
    }

    /// Whether this command calls a stored procedure
    #[inline]
    pub fn is_procedure(&self) -> bool {
        self.kind == CommandKind::StoredProcedure
    }

    /// Render into dialect SQL and positional arguments.
    ///
    /// Stored procedures are expanded into a call batch first; any validation
    /// failure (procedure name, output type) is reported before I/O.
    pub fn render(&self, dialect: &dyn SqlDialect) -> Result<(String, Vec<Value>)> {
        match self.kind {
            CommandKind::Text => bind_named(trim_statement(&self.sql), &self.params, dialect),
            CommandKind::StoredProcedure => {
                let mut inputs = Vec::with_capacity(self.params.len());
                let mut args = Vec::with_capacity(self.params.len());
                for (index, (name, value)) in self.params.iter().enumerate() {
                    inputs.push((name.to_string(), dialect.placeholder(index + 1)));
                    args.push(value.clone());
                }
                let call = dialect.procedure_call(self.sql.trim(), &inputs, &self.outputs)?;
                Ok((call, args))
            }
        }
    }
}

impl From<&str> for CommandSpec {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for CommandSpec {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

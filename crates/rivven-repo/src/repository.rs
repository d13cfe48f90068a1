//! Command execution core
//!
//! [`SqlRepository`] binds a [`CommandSpec`] to a live connection and runs it
//! under the repository's [`RetryPolicy`]. Every attempt covers the whole
//! operation: connection acquisition, execution under the command timeout and
//! cancellation, and release of the [`ConnectionContext`]. A failed attempt is
//! logged with the operation name and SQL text before the retry engine
//! classifies it.
//!
//! ```rust,ignore
//! let repo = SqlRepository::from_config(factory, &config)?;
//! let cancel = CancellationToken::new();
//!
//! let open: Vec<Order> = repo
//!     .query_list(&CommandSpec::new("SELECT * FROM Orders WHERE Status = @Status")
//!         .param("Status", "open"), &cancel)
//!     .await?;
//! ```

use futures::future::BoxFuture;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::command::CommandSpec;
use crate::config::RepositoryConfig;
use crate::connection::{Connection, ConnectionFactory, DatabaseType};
use crate::context::{ConnectionContext, ConnectionManager, UnitOfWork};
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::mapper::{scalar_from_row, MappingMode, Record, RowMapper};
use crate::retry::RetryPolicy;
use crate::sql::source_tables;
use crate::types::{FromValue, ResultSet, Row, Value};

/// Per-repository execution defaults
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Timeout applied to commands that do not set their own
    pub command_timeout: Duration,
    /// Row mapping strictness
    pub mapping: MappingMode,
    /// Rows per bulk batch
    pub bulk_batch_size: usize,
    /// Timeout for one bulk operation
    pub bulk_timeout: Duration,
    /// Largest accepted page size
    pub max_page_size: u32,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            mapping: MappingMode::Lenient,
            bulk_batch_size: 10_000,
            bulk_timeout: Duration::from_secs(600),
            max_page_size: 10_000,
        }
    }
}

impl From<&RepositoryConfig> for RepositoryOptions {
    fn from(config: &RepositoryConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            mapping: config.mapping,
            bulk_batch_size: config.bulk.batch_size,
            bulk_timeout: config.bulk_timeout(),
            max_page_size: config.max_page_size,
        }
    }
}

/// SQL text and positional arguments ready for a connection
#[derive(Debug, Clone)]
pub struct Statement {
    /// Dialect SQL
    pub sql: String,
    /// Positional arguments
    pub args: Vec<Value>,
}

impl Statement {
    /// Create a rendered statement
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Resilient repository over one logical connection
///
/// Cloning is cheap. A repository that is not enlisted opens (and closes) a
/// connection per call; once [`enlist`](Self::enlist)ed into a
/// [`UnitOfWork`] it only borrows the unit's connection.
#[derive(Clone)]
pub struct SqlRepository {
    manager: Arc<ConnectionManager>,
    connection_name: String,
    unit: Option<UnitOfWork>,
    retry: RetryPolicy,
    options: RepositoryOptions,
}

impl std::fmt::Debug for SqlRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRepository")
            .field("connection_name", &self.connection_name)
            .field("unit_of_work", &self.unit.as_ref().map(UnitOfWork::id))
            .field("retry", &self.retry)
            .field("options", &self.options)
            .finish()
    }
}

impl SqlRepository {
    /// Create a repository over a connection manager
    pub fn new(manager: Arc<ConnectionManager>, connection_name: impl Into<String>) -> Self {
        Self {
            manager,
            connection_name: connection_name.into(),
            unit: None,
            retry: RetryPolicy::default(),
            options: RepositoryOptions::default(),
        }
    }

    /// Build a repository (and its connection manager) from configuration
    pub fn from_config(
        factory: Arc<dyn ConnectionFactory>,
        config: &RepositoryConfig,
    ) -> Result<Self> {
        let config = config.clone().validated()?;
        let manager = Arc::new(ConnectionManager::new(factory, Arc::new(config.clone())));
        // fail at startup rather than on the first call
        manager.config(&config.default_connection)?;

        Ok(Self {
            manager,
            connection_name: config.default_connection.clone(),
            unit: None,
            retry: config.retry_policy(),
            options: RepositoryOptions::from(&config),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace execution defaults
    pub fn with_options(mut self, options: RepositoryOptions) -> Self {
        self.options = options;
        self
    }

    /// Set row mapping strictness
    pub fn with_mapping(mut self, mapping: MappingMode) -> Self {
        self.options.mapping = mapping;
        self
    }

    /// A copy of this repository that runs every call inside `unit`
    pub fn enlist(&self, unit: &UnitOfWork) -> Self {
        Self {
            unit: Some(unit.clone()),
            ..self.clone()
        }
    }

    /// The connection manager
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Logical connection name
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// Enlisted unit of work, if any
    pub fn unit_of_work(&self) -> Option<&UnitOfWork> {
        self.unit.as_ref()
    }

    /// Retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execution defaults
    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    /// Database type behind the connection manager
    pub fn database_type(&self) -> DatabaseType {
        self.manager.database_type()
    }

    /// Dialect used to render commands
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        self.database_type().dialect()
    }

    /// Begin a unit of work on this repository's connection
    pub async fn begin_unit_of_work(&self) -> Result<UnitOfWork> {
        UnitOfWork::begin(&self.manager, &self.connection_name, None).await
    }

    pub(crate) fn render(&self, cmd: &CommandSpec) -> Result<Statement> {
        let (sql, args) = cmd.render(self.dialect())?;
        Ok(Statement::new(sql, args))
    }

    pub(crate) fn timeout_for(&self, cmd: &CommandSpec) -> Duration {
        cmd.timeout.unwrap_or(self.options.command_timeout)
    }

    /// Acquire a connection, giving up if `cancel` fires first
    pub(crate) async fn acquire(&self, cancel: &CancellationToken) -> Result<ConnectionContext> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            ctx = self.manager.acquire(&self.connection_name, self.unit.as_ref()) => ctx,
        }
    }

    /// Run `f` on a connection under the retry policy.
    ///
    /// `payload` is shared by every attempt; `f` must perform the whole unit of
    /// database work for one attempt.
    pub(crate) async fn run<P, T, F>(
        &self,
        operation: &'static str,
        log_sql: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        payload: &P,
        f: F,
    ) -> Result<T>
    where
        P: Sync + ?Sized,
        F: for<'c> Fn(&'c dyn Connection, &'c P) -> BoxFuture<'c, Result<T>>,
    {
        let f = &f;
        self.call_policy()
            .execute(operation, cancel, |attempt| async move {
                self.attempt(operation, log_sql, attempt, timeout, cancel, payload, f)
                    .await
            })
            .await
            .inspect_err(|e| self.note_failure(e))
    }

    /// Policy for one call: enlisted calls get a single attempt
    pub(crate) fn call_policy(&self) -> Cow<'_, RetryPolicy> {
        match &self.unit {
            Some(_) => Cow::Owned(self.retry.clone().with_max_attempts(1)),
            None => Cow::Borrowed(&self.retry),
        }
    }

    /// Doom the enlisted unit after a transient fault
    pub(crate) fn note_failure(&self, err: &Error) {
        if let Some(unit) = &self.unit {
            if err.is_transient() {
                unit.doom(err);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<P, T, F>(
        &self,
        operation: &'static str,
        sql: &str,
        attempt: u32,
        timeout: Duration,
        cancel: &CancellationToken,
        payload: &P,
        f: &F,
    ) -> Result<T>
    where
        P: Sync + ?Sized,
        F: for<'c> Fn(&'c dyn Connection, &'c P) -> BoxFuture<'c, Result<T>>,
    {
        let ctx = match self.acquire(cancel).await {
            Ok(ctx) => ctx,
            Err(e) => {
                if !e.is_cancelled() {
                    error!(operation, sql, attempt, error = %e, "Failed to acquire connection");
                }
                return Err(e);
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(timeout, f(ctx.connection(), payload)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(format!(
                    "{operation} timed out after {}ms",
                    timeout.as_millis()
                ))),
            },
        };

        match &result {
            Ok(_) => debug!(operation, sql, attempt, owned = ctx.is_owned(), "Command completed"),
            Err(e) if e.is_cancelled() => debug!(operation, sql, "Command cancelled"),
            Err(e) => error!(operation, sql, attempt, error = %e, "Command failed"),
        }

        // close errors are logged by release and never mask the command outcome
        let _ = ctx.release().await;
        result
    }

    async fn fetch_rows(
        &self,
        operation: &'static str,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let stmt = self.render(cmd)?;
        self.run(
            operation,
            &cmd.sql,
            self.timeout_for(cmd),
            cancel,
            &stmt,
            |conn, stmt| Box::pin(async move { conn.query(&stmt.sql, &stmt.args).await }),
        )
        .await
    }

    fn map_rows<T: Record>(&self, rows: &[Row]) -> Result<Vec<T>> {
        RowMapper::<T>::new(self.options.mapping).map_all(rows)
    }

    /// Run a query and return its rows without mapping
    pub async fn query_rows(&self, cmd: &CommandSpec, cancel: &CancellationToken) -> Result<Vec<Row>> {
        self.fetch_rows("query_rows", cmd, cancel).await
    }

    /// Run a query and map every row into `T`
    pub async fn query_list<T: Record>(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let rows = self.fetch_rows("query_list", cmd, cancel).await?;
        self.map_rows(&rows)
            .map_err(|e| e.in_operation("query_list", 1).with_target(std::any::type_name::<T>()))
    }

    /// Run a query expected to return at most one row.
    ///
    /// Returns `None` for an empty result and fails if more than one row comes
    /// back.
    pub async fn query_single_or_default<T: Record>(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        const OP: &str = "query_single_or_default";
        let rows = self.fetch_rows(OP, cmd, cancel).await?;
        let target = std::any::type_name::<T>();

        match rows.as_slice() {
            [] => Ok(None),
            [row] => RowMapper::<T>::new(self.options.mapping)
                .map(row)
                .map(Some)
                .map_err(|e| e.in_operation(OP, 1).with_target(target)),
            _ => Err(Error::query_with_sql(
                format!("expected at most one row, got {}", rows.len()),
                cmd.sql.clone(),
            )
            .in_operation(OP, 1)
            .with_target(target)),
        }
    }

    /// Run a query and map its first row, if any
    pub async fn query_first_or_default<T: Record>(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        const OP: &str = "query_first_or_default";
        let rows = self.fetch_rows(OP, cmd, cancel).await?;
        rows.first()
            .map(|row| RowMapper::<T>::new(self.options.mapping).map(row))
            .transpose()
            .map_err(|e| e.in_operation(OP, 1).with_target(std::any::type_name::<T>()))
    }

    /// Run a query and read the first column of the first row.
    ///
    /// NULL or an empty result yields `S::default()`.
    pub async fn execute_scalar<S: FromValue + Default>(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<S> {
        const OP: &str = "execute_scalar";
        let rows = self.fetch_rows(OP, cmd, cancel).await?;
        scalar_from_row(rows.first())
            .map_err(|e| e.in_operation(OP, 1).with_target(std::any::type_name::<S>()))
    }

    /// Execute a statement and return the affected row count
    pub async fn execute_non_query(&self, cmd: &CommandSpec, cancel: &CancellationToken) -> Result<u64> {
        let stmt = self.render(cmd)?;
        self.run(
            "execute_non_query",
            &cmd.sql,
            self.timeout_for(cmd),
            cancel,
            &stmt,
            |conn, stmt| Box::pin(async move { conn.execute(&stmt.sql, &stmt.args).await }),
        )
        .await
    }

    /// Run a batch and return every result set.
    ///
    /// With [`CommandSpec::with_table_names`] each result set is tagged with
    /// the table its statement selects from.
    pub async fn query_result_sets(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResultSet>> {
        let stmt = self.render(cmd)?;
        let mut sets = self
            .run(
                "query_multiple",
                &cmd.sql,
                self.timeout_for(cmd),
                cancel,
                &stmt,
                |conn, stmt| Box::pin(async move { conn.query_multiple(&stmt.sql, &stmt.args).await }),
            )
            .await?;

        if cmd.include_table_names && !cmd.is_procedure() {
            for (set, table) in sets.iter_mut().zip(source_tables(&cmd.sql, self.dialect())) {
                if set.table_name.is_none() {
                    set.table_name = table;
                }
            }
        }
        Ok(sets)
    }

    /// Run a batch and map each result set into `T`
    pub async fn query_multiple<T: Record>(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<T>>> {
        let sets = self.query_result_sets(cmd, cancel).await?;
        let mut mapper = RowMapper::<T>::new(self.options.mapping);
        sets.iter()
            .map(|set| mapper.map_all(&set.rows))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.in_operation("query_multiple", 1).with_target(std::any::type_name::<T>()))
    }

    /// Whether the query returns a non-zero, non-null first column
    pub async fn exists(&self, cmd: &CommandSpec, cancel: &CancellationToken) -> Result<bool> {
        let rows = self.fetch_rows("exists", cmd, cancel).await?;
        Ok(match rows.first().and_then(|r| r.get(0)) {
            None | Some(Value::Null) => false,
            Some(v) => bool::from_value(v)
                .or_else(|_| f64::from_value(v).map(|n| n != 0.0))
                .unwrap_or(true),
        })
    }

    /// Read a row count from the first column of the first row
    pub async fn count(&self, cmd: &CommandSpec, cancel: &CancellationToken) -> Result<u64> {
        let rows = self.fetch_rows("count", cmd, cancel).await?;
        let count: i64 = scalar_from_row(rows.first())
            .map_err(|e| e.in_operation("count", 1))?;
        Ok(count.max(0) as u64)
    }
}

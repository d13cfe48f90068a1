//! # rivven-repo
//!
//! Resilient relational repository layer for the Rivven platform.
//!
//! Executes parameterised SQL against a relational engine with:
//!
//! - **Retries**: transient faults (deadlock, lock/statement timeout,
//!   connection loss) re-run the whole operation under exponential backoff
//! - **Unit of work**: repositories enlisted in a [`UnitOfWork`] share one
//!   connection and transaction and never close it
//! - **Safe pagination**: derived count queries, validated sort columns,
//!   bound offset/fetch parameters
//! - **Bulk load**: batched, mapped loads through the driver's bulk protocol
//! - **Streaming**: lazily mapped, cancellable, forward-only record streams
//! - **Row mapping**: cached case-insensitive column-to-field bindings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_repo::prelude::*;
//!
//! let config = RepositoryConfig::default()
//!     .with_connection_string("DefaultConnection", "Server=tcp:db,1433;Database=app;...");
//! let repo = SqlRepository::from_config(Arc::new(SqlServerConnectionFactory::new()), &config)?;
//! let cancel = CancellationToken::new();
//!
//! // One page of customers, newest first
//! let page: PagedResult<Customer> = repo
//!     .query_paged(
//!         &CommandSpec::new("SELECT * FROM Customers WHERE Region = @Region").param("Region", "EU"),
//!         &PaginationSpec::new(1, 50).sort_by("CreatedOn", SortDirection::Descending),
//!         &cancel,
//!     )
//!     .await?;
//!
//! // Two writes in one transaction
//! let uow = repo.begin_unit_of_work().await?;
//! let tx_repo = repo.enlist(&uow);
//! tx_repo.execute_non_query(&CommandSpec::new("UPDATE ..."), &cancel).await?;
//! tx_repo.execute_non_query(&CommandSpec::new("INSERT ..."), &cancel).await?;
//! uow.commit().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlserver` - SQL Server support via tiberius
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod command;
pub mod config;
pub mod connection;
pub mod context;
pub mod dialect;
pub mod error;
pub mod mapper;
pub mod pagination;
pub mod repository;
pub mod retry;
pub mod security;
pub mod sql;
pub mod stream;
pub mod types;

#[cfg(feature = "sqlserver")]
pub mod sqlserver;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{FromValue, Params, ResultSet, Row, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, IsolationLevel, RowStream,
        Transaction,
    };
    pub use crate::context::{ConnectionContext, ConnectionManager, ConnectionStrings, UnitOfWork};

    // Commands and execution
    pub use crate::command::{CommandKind, CommandSpec, OutputParam};
    pub use crate::config::RepositoryConfig;
    pub use crate::repository::{RepositoryOptions, SqlRepository};
    pub use crate::retry::{Backoff, RetryPolicy};

    // Mapping, paging, bulk, streaming
    pub use crate::bulk::{BulkLoadSpec, BulkRecord, ColumnMapping, TabularData};
    pub use crate::mapper::{BindingTable, MappingMode, Record};
    pub use crate::pagination::{PageMetadata, PagedResult, PaginationSpec, SortDirection};
    pub use crate::stream::RecordStream;

    // Dialects
    pub use crate::dialect::{MySqlDialect, PostgresDialect, SqlDialect, SqlServerDialect};

    #[cfg(feature = "sqlserver")]
    pub use crate::sqlserver::{SqlServerConnection, SqlServerConnectionFactory};

    pub use crate::params;
    pub use tokio_util::sync::CancellationToken;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;

//! Connection/transaction management
//!
//! - [`ConnectionManager`] resolves logical connection names to cached
//!   [`ConnectionConfig`]s and opens connections through a factory
//! - [`ConnectionContext`] is the per-call handle: `Owned` connections are
//!   closed on release, `Borrowed` ones belong to a [`UnitOfWork`] and are not
//! - [`UnitOfWork`] owns one connection plus its transaction and serialises
//!   the repositories enlisted in it

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, IsolationLevel, Transaction,
};
use crate::error::{Error, Result};

/// Source of connection strings by logical name
pub trait ConnectionStrings: Send + Sync {
    /// Connection string registered under `name`, if any
    fn connection_string(&self, name: &str) -> Option<String>;
}

impl ConnectionStrings for HashMap<String, String> {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Opens connections by logical name
///
/// Connection strings are resolved once per name and cached for the life of
/// the manager. A missing or empty string is a configuration error and is
/// never retried.
pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    strings: Arc<dyn ConnectionStrings>,
    configs: DashMap<String, Arc<ConnectionConfig>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("database_type", &self.factory.database_type())
            .field("cached_configs", &self.configs.len())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager over a connection factory and a connection-string source
    pub fn new(factory: Arc<dyn ConnectionFactory>, strings: Arc<dyn ConnectionStrings>) -> Self {
        Self {
            factory,
            strings,
            configs: DashMap::new(),
        }
    }

    /// Database type of the underlying factory
    pub fn database_type(&self) -> DatabaseType {
        self.factory.database_type()
    }

    /// Resolve (and cache) the configuration for a logical connection name
    pub fn config(&self, name: &str) -> Result<Arc<ConnectionConfig>> {
        if let Some(config) = self.configs.get(name) {
            return Ok(Arc::clone(config.value()));
        }

        let conn_str = self
            .strings
            .connection_string(name)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::config(format!("connection string '{name}' is missing or empty"))
            })?;

        let config = Arc::new(ConnectionConfig::new(conn_str));
        let entry = self
            .configs
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&config));
        Ok(Arc::clone(entry.value()))
    }

    /// Open a new connection for `name`
    pub async fn open(&self, name: &str) -> Result<Box<dyn Connection>> {
        let config = self.config(name)?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);

        let conn = match tokio::time::timeout(timeout, self.factory.connect(&config)).await {
            Ok(conn) => conn?,
            Err(_) => {
                return Err(Error::connection(format!(
                    "connecting to '{name}' timed out after {}ms",
                    config.connect_timeout_ms
                )))
            }
        };

        debug!(connection = %name, "Opened connection");
        Ok(conn)
    }

    /// Acquire a connection for one call.
    ///
    /// Inside a unit of work the shared connection is borrowed (waiting for the
    /// unit's turn lock); otherwise a new connection is opened and owned.
    pub async fn acquire(&self, name: &str, uow: Option<&UnitOfWork>) -> Result<ConnectionContext> {
        match uow {
            Some(uow) => Ok(ConnectionContext::Borrowed(uow.borrow().await?)),
            None => Ok(ConnectionContext::Owned(self.open(name).await?)),
        }
    }
}

/// A connection lent out by a [`UnitOfWork`] for the duration of one call
pub struct BorrowedConnection {
    conn: Arc<dyn Connection>,
    unit_id: Uuid,
    _turn: OwnedMutexGuard<()>,
}

impl BorrowedConnection {
    /// Id of the unit of work the connection belongs to
    pub fn unit_id(&self) -> Uuid {
        self.unit_id
    }
}

/// Connection used by one repository call
///
/// Release is exhaustive over both modes and consumes the context, so a
/// connection can be released at most once.
pub enum ConnectionContext {
    /// Opened for this call, closed on release
    Owned(Box<dyn Connection>),
    /// Belongs to an enclosing unit of work, never closed here
    Borrowed(BorrowedConnection),
}

impl ConnectionContext {
    /// The live connection
    pub fn connection(&self) -> &dyn Connection {
        match self {
            Self::Owned(conn) => conn.as_ref(),
            Self::Borrowed(borrowed) => borrowed.conn.as_ref(),
        }
    }

    /// Whether this call owns (and will close) the connection
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Release the connection: close it if owned, hand the turn back if borrowed
    pub async fn release(self) -> Result<()> {
        match self {
            Self::Owned(conn) => {
                let result = conn.close().await;
                if let Err(e) = &result {
                    warn!(error = %e, "Failed to close connection");
                }
                result
            }
            Self::Borrowed(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned(conn) => f
                .debug_tuple("Owned")
                .field(&conn.database_type())
                .finish(),
            Self::Borrowed(b) => f.debug_tuple("Borrowed").field(&b.unit_id).finish(),
        }
    }
}

struct UnitInner {
    id: Uuid,
    connection_name: String,
    conn: Arc<dyn Connection>,
    tx: Mutex<Option<Box<dyn Transaction>>>,
    turn: Arc<Mutex<()>>,
    completed: AtomicBool,
    doomed: AtomicBool,
}

/// A connection plus transaction shared by enlisted repositories
///
/// Cloning is cheap; all clones refer to the same transaction. Calls through
/// enlisted repositories take turns on the shared connection, so only one
/// command runs on it at a time. A unit of work dropped without `commit` is
/// rolled back by the backend.
///
/// Enlisted calls are never retried. A transient fault dooms the unit: the
/// server may already have rolled the transaction back, so `commit` rolls
/// back instead and reports a transaction error.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<UnitInner>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.inner.id)
            .field("connection_name", &self.inner.connection_name)
            .field("active", &self.is_active())
            .finish()
    }
}

impl UnitOfWork {
    /// Open a connection and begin a transaction on it
    pub async fn begin(
        manager: &ConnectionManager,
        name: &str,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self> {
        let conn: Arc<dyn Connection> = Arc::from(manager.open(name).await?);
        let tx = match isolation {
            Some(level) => conn.begin_with_isolation(level).await,
            None => conn.begin().await,
        };
        let tx = match tx {
            Ok(tx) => tx,
            Err(e) => {
                let _ = conn.close().await;
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        debug!(unit_of_work = %id, connection = %name, "Began unit of work");

        Ok(Self {
            inner: Arc::new(UnitInner {
                id,
                connection_name: name.to_string(),
                conn,
                tx: Mutex::new(Some(tx)),
                turn: Arc::new(Mutex::new(())),
                completed: AtomicBool::new(false),
                doomed: AtomicBool::new(false),
            }),
        })
    }

    /// Unique id of this unit of work
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Logical connection name the unit was opened for
    pub fn connection_name(&self) -> &str {
        &self.inner.connection_name
    }

    /// Whether the transaction is still open
    pub fn is_active(&self) -> bool {
        !self.inner.completed.load(Ordering::SeqCst)
    }

    /// Whether a transient fault has made the unit impossible to commit
    pub fn is_doomed(&self) -> bool {
        self.inner.doomed.load(Ordering::SeqCst)
    }

    pub(crate) fn doom(&self, cause: &Error) {
        if !self.inner.doomed.swap(true, Ordering::SeqCst) {
            warn!(unit_of_work = %self.inner.id, error = %cause, "Unit of work can no longer commit");
        }
    }

    pub(crate) async fn borrow(&self) -> Result<BorrowedConnection> {
        let turn = Arc::clone(&self.inner.turn).lock_owned().await;
        if !self.is_active() {
            return Err(Error::transaction(format!(
                "unit of work {} is already completed",
                self.inner.id
            )));
        }
        Ok(BorrowedConnection {
            conn: Arc::clone(&self.inner.conn),
            unit_id: self.inner.id,
            _turn: turn,
        })
    }

    /// Commit the transaction and close the connection
    pub async fn commit(self) -> Result<()> {
        self.finish(true).await
    }

    /// Roll back the transaction and close the connection
    pub async fn rollback(self) -> Result<()> {
        self.finish(false).await
    }

    async fn finish(&self, commit: bool) -> Result<()> {
        let _turn = self.inner.turn.lock().await;
        let tx = self.inner.tx.lock().await.take().ok_or_else(|| {
            Error::transaction(format!(
                "unit of work {} is already completed",
                self.inner.id
            ))
        })?;
        self.inner.completed.store(true, Ordering::SeqCst);

        let doomed = self.is_doomed();
        let committing = commit && !doomed;
        let mut result = if committing {
            tx.commit().await
        } else {
            tx.rollback().await
        };

        if let Err(e) = self.inner.conn.close().await {
            warn!(unit_of_work = %self.inner.id, error = %e, "Failed to close connection");
        }
        debug!(
            unit_of_work = %self.inner.id,
            committed = committing,
            success = result.is_ok(),
            "Completed unit of work"
        );

        if commit && doomed {
            if let Err(e) = &result {
                warn!(unit_of_work = %self.inner.id, error = %e, "Rollback of doomed unit failed");
            }
            result = Err(Error::transaction(format!(
                "unit of work {} was rolled back after a transient fault",
                self.inner.id
            )));
        }
        result
    }
}

#![allow(dead_code)]

//! Scripted in-memory backend shared by the integration tests

use async_trait::async_trait;
use rivven_repo::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream, Transaction,
    VecRowStream,
};
use rivven_repo::context::ConnectionManager;
use rivven_repo::error::{Error, Result};
use rivven_repo::mapper::{BindingTable, Record};
use rivven_repo::repository::SqlRepository;
use rivven_repo::types::{ResultSet, Row, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

pub const CONNECTION_NAME: &str = "DefaultConnection";

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_repo=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// What the mock database answers to one command
pub enum Reply {
    Sets(Vec<ResultSet>),
    Affected(u64),
}

type Handler = Box<dyn Fn(&str, &[Value]) -> Result<Reply> + Send + Sync>;

/// Shared state of every connection the mock factory hands out
pub struct MockDb {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub commands: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub streams_dropped: AtomicUsize,
    pub rows_fetched: AtomicUsize,
    pub sql: Mutex<Vec<String>>,
    pub args: Mutex<Vec<Vec<Value>>>,
    pub bulk: Mutex<Vec<(String, Vec<String>, Vec<Vec<Value>>)>>,
    pub connect_faults: Mutex<VecDeque<Error>>,
    pub faults: Mutex<VecDeque<Error>>,
    pub delay: Mutex<Option<Duration>>,
    database_type: Mutex<DatabaseType>,
    handler: Mutex<Option<Handler>>,
}

impl MockDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            begins: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            streams_dropped: AtomicUsize::new(0),
            rows_fetched: AtomicUsize::new(0),
            sql: Mutex::new(Vec::new()),
            args: Mutex::new(Vec::new()),
            bulk: Mutex::new(Vec::new()),
            connect_faults: Mutex::new(VecDeque::new()),
            faults: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            database_type: Mutex::new(DatabaseType::SqlServer),
            handler: Mutex::new(None),
        })
    }

    /// Answer every command with `handler`
    pub fn on_command<F>(&self, handler: F)
    where
        F: Fn(&str, &[Value]) -> Result<Reply> + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Answer every query with the same rows
    pub fn returns_rows(&self, rows: Vec<Row>) {
        self.on_command(move |_, _| Ok(Reply::Sets(vec![ResultSet::from_rows(rows.clone())])));
    }

    /// Serve `rows` as a table: COUNT(*) wrappers count, OFFSET/FETCH pages slice
    pub fn serve_table(&self, rows: Vec<Row>) {
        self.on_command(move |sql, args| {
            if sql.starts_with("SELECT COUNT(*)") {
                return Ok(Reply::Sets(vec![ResultSet::from_rows(vec![scalar_row(
                    Value::Int32(rows.len() as i32),
                )])]));
            }
            if sql.contains("OFFSET") {
                let n = args.len();
                let offset = args[n - 2].as_i64().unwrap() as usize;
                let size = args[n - 1].as_i64().unwrap() as usize;
                let page = rows.iter().skip(offset).take(size).cloned().collect();
                return Ok(Reply::Sets(vec![ResultSet::from_rows(page)]));
            }
            Ok(Reply::Sets(vec![ResultSet::from_rows(rows.clone())]))
        });
    }

    /// Fail the next command with `error`
    pub fn fail_next(&self, error: Error) {
        self.faults.lock().unwrap().push_back(error);
    }

    /// Fail the next connection attempt with `error`
    pub fn fail_next_connect(&self, error: Error) {
        self.connect_faults.lock().unwrap().push_back(error);
    }

    /// Make every command take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Report `database_type` from the factory and every connection
    pub fn set_database_type(&self, database_type: DatabaseType) {
        *self.database_type.lock().unwrap() = database_type;
    }

    pub fn database_type(&self) -> DatabaseType {
        *self.database_type.lock().unwrap()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.sql.lock().unwrap().clone()
    }

    pub fn executed_args(&self) -> Vec<Vec<Value>> {
        self.args.lock().unwrap().clone()
    }

    async fn command(&self, sql: &str, args: &[Value]) -> Result<Reply> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.sql.lock().unwrap().push(sql.to_string());
        self.args.lock().unwrap().push(args.to_vec());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = self.faults.lock().unwrap().pop_front();
        if let Some(e) = fault {
            return Err(e);
        }

        match self.handler.lock().unwrap().as_ref() {
            Some(handler) => handler(sql, args),
            None => Ok(Reply::Sets(vec![ResultSet::default()])),
        }
    }
}

pub struct MockConnection {
    db: Arc<MockDb>,
}

fn into_sets(reply: Reply) -> Vec<ResultSet> {
    match reply {
        Reply::Sets(sets) => sets,
        Reply::Affected(_) => vec![ResultSet::default()],
    }
}

struct TrackedStream {
    inner: VecRowStream,
    db: Arc<MockDb>,
}

impl RowStream for TrackedStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            let row = self.inner.next().await?;
            if row.is_some() {
                self.db.rows_fetched.fetch_add(1, Ordering::SeqCst);
            }
            Ok(row)
        })
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.db.streams_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sets = into_sets(self.db.command(sql, params).await?);
        Ok(sets.into_iter().next().map(|s| s.rows).unwrap_or_default())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        match self.db.command(sql, params).await? {
            Reply::Affected(n) => Ok(n),
            Reply::Sets(_) => Ok(0),
        }
    }

    async fn query_multiple(&self, sql: &str, params: &[Value]) -> Result<Vec<ResultSet>> {
        Ok(into_sets(self.db.command(sql, params).await?))
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Pin<Box<dyn RowStream>>> {
        let rows = self.query(sql, params).await?;
        Ok(Box::pin(TrackedStream {
            inner: VecRowStream::new(rows),
            db: Arc::clone(&self.db),
        }))
    }

    async fn bulk_insert(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> Result<u64> {
        self.db.command(&format!("BULK {table}"), &[]).await?;
        self.db
            .bulk
            .lock()
            .unwrap()
            .push((table.to_string(), columns.to_vec(), rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.db.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransaction {
            db: Arc::clone(&self.db),
        }))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.db.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn database_type(&self) -> DatabaseType {
        self.db.database_type()
    }
}

pub struct MockTransaction {
    db: Arc<MockDb>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.db.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.db.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockFactory {
    db: Arc<MockDb>,
}

impl MockFactory {
    pub fn new(db: &Arc<MockDb>) -> Arc<Self> {
        Arc::new(Self { db: Arc::clone(db) })
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let fault = self.db.connect_faults.lock().unwrap().pop_front();
        if let Some(e) = fault {
            return Err(e);
        }
        self.db.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            db: Arc::clone(&self.db),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        self.db.database_type()
    }
}

pub fn manager(db: &Arc<MockDb>) -> Arc<ConnectionManager> {
    let strings: HashMap<String, String> =
        HashMap::from([(CONNECTION_NAME.to_string(), "Server=mock;Database=test".to_string())]);
    Arc::new(ConnectionManager::new(MockFactory::new(db), Arc::new(strings)))
}

pub fn repository(db: &Arc<MockDb>) -> SqlRepository {
    SqlRepository::new(manager(db), CONNECTION_NAME)
}

pub fn scalar_row(value: Value) -> Row {
    Row::new(vec!["value".into()], vec![value])
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
}

impl Record for Customer {
    fn bindings(table: &mut BindingTable<Self>) {
        table
            .field("Id", |c, v| c.id = v)
            .field("Name", |c, v| c.name = v)
            .field("Email", |c, v| c.email = v);
    }
}

pub fn customer_row(id: i64) -> Row {
    Row::new(
        vec!["ID".into(), "NAME".into(), "EMAIL".into()],
        vec![
            Value::Int64(id),
            Value::String(format!("customer-{id}")),
            Value::Null,
        ],
    )
}

pub fn customers(n: usize) -> Vec<Row> {
    (1..=n as i64).map(customer_row).collect()
}

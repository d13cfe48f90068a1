//! Streaming query executor
//!
//! [`RecordStream`] is a lazy, forward-only, non-restartable sequence of
//! mapped records. It owns the [`ConnectionContext`] it reads from: the
//! reader and (if owned) the connection are released when the rows run out,
//! when a fetch or mapping fails, when cancellation is observed, on
//! [`close`](RecordStream::close), and on drop.

use futures::stream::{self, Stream};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::command::CommandSpec;
use crate::connection::RowStream;
use crate::context::ConnectionContext;
use crate::error::{Error, Result};
use crate::mapper::{Record, RowMapper};
use crate::repository::SqlRepository;

struct OpenReader {
    rows: Pin<Box<dyn RowStream>>,
    ctx: ConnectionContext,
}

/// Lazily mapped rows of one query
pub struct RecordStream<T: Record> {
    reader: Option<OpenReader>,
    mapper: RowMapper<T>,
    cancel: CancellationToken,
    sql: String,
    yielded: u64,
}

impl<T: Record> std::fmt::Debug for RecordStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("open", &self.reader.is_some())
            .field("yielded", &self.yielded)
            .finish()
    }
}

impl<T: Record> RecordStream<T> {
    fn new(
        rows: Pin<Box<dyn RowStream>>,
        ctx: ConnectionContext,
        mapper: RowMapper<T>,
        cancel: CancellationToken,
        sql: String,
    ) -> Self {
        Self {
            reader: Some(OpenReader { rows, ctx }),
            mapper,
            cancel,
            sql,
            yielded: 0,
        }
    }

    /// Fetch and map the next row.
    ///
    /// Returns `None` once the rows are exhausted or the stream was released.
    /// Cancellation is reported once as [`Error::Cancelled`]; the partially
    /// fetched row, if any, is discarded.
    pub async fn next(&mut self) -> Option<Result<T>> {
        let reader = self.reader.as_mut()?;

        if self.cancel.is_cancelled() {
            self.release().await;
            return Some(Err(Error::Cancelled));
        }

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            row = reader.rows.next() => row,
        };

        match fetched {
            Ok(Some(row)) => match self.mapper.map(&row) {
                Ok(record) => {
                    self.yielded += 1;
                    Some(Ok(record))
                }
                Err(e) => {
                    error!(operation = "query_stream", sql = %self.sql, error = %e, "Row mapping failed");
                    self.release().await;
                    Some(Err(e))
                }
            },
            Ok(None) => {
                self.release().await;
                None
            }
            Err(e) => {
                if !e.is_cancelled() {
                    error!(operation = "query_stream", sql = %self.sql, error = %e, "Row fetch failed");
                }
                self.release().await;
                Some(Err(e))
            }
        }
    }

    /// Records yielded so far
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Whether the reader has been released
    pub fn is_finished(&self) -> bool {
        self.reader.is_none()
    }

    /// Stop early and release the reader and connection
    pub async fn close(mut self) {
        self.release().await;
    }

    async fn release(&mut self) {
        if let Some(OpenReader { rows, ctx }) = self.reader.take() {
            drop(rows);
            let _ = ctx.release().await;
            debug!(rows = self.yielded, "Released record stream");
        }
    }

    /// Adapt into a [`futures::Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        stream::unfold(self, |mut records| async move {
            records.next().await.map(|item| (item, records))
        })
    }
}

impl<T: Record> Drop for RecordStream<T> {
    fn drop(&mut self) {
        let Some(OpenReader { rows, ctx }) = self.reader.take() else {
            return;
        };
        drop(rows);
        debug!(rows = self.yielded, "Record stream dropped before completion");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = ctx.release().await;
                });
            }
            // without a runtime the connection is closed by its own drop
            Err(_) => drop(ctx),
        }
    }
}

impl SqlRepository {
    /// Open a lazily mapped stream over the rows of `cmd`.
    ///
    /// Opening the reader runs under the retry policy (a single attempt when
    /// enlisted); once rows flow, faults end the stream instead of restarting
    /// it.
    pub async fn query_stream<T: Record>(
        &self,
        cmd: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<RecordStream<T>> {
        const OP: &str = "query_stream";
        let stmt = self.render(cmd)?;
        let timeout = self.timeout_for(cmd);

        let (rows, ctx) = self
            .call_policy()
            .execute(OP, cancel, |attempt| {
                let stmt = &stmt;
                async move {
                    let ctx = self.acquire(cancel).await.inspect_err(|e| {
                        if !e.is_cancelled() {
                            error!(operation = OP, sql = %cmd.sql, attempt, error = %e, "Failed to acquire connection");
                        }
                    })?;

                    let opened = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        outcome = tokio::time::timeout(
                            timeout,
                            ctx.connection().query_stream(&stmt.sql, &stmt.args),
                        ) => match outcome {
                            Ok(result) => result,
                            Err(_) => Err(Error::timeout(format!(
                                "{OP} timed out after {}ms",
                                timeout.as_millis()
                            ))),
                        },
                    };

                    match opened {
                        Ok(rows) => Ok((rows, ctx)),
                        Err(e) => {
                            if !e.is_cancelled() {
                                error!(operation = OP, sql = %cmd.sql, attempt, error = %e, "Failed to open reader");
                            }
                            let _ = ctx.release().await;
                            Err(e)
                        }
                    }
                }
            })
            .await
            .inspect_err(|e| self.note_failure(e))
            .map_err(|e| e.with_target(std::any::type_name::<T>()))?;

        debug!(operation = OP, sql = %cmd.sql, owned = ctx.is_owned(), "Opened record stream");
        Ok(RecordStream::new(
            rows,
            ctx,
            RowMapper::new(self.options().mapping),
            cancel.clone(),
            cmd.sql.clone(),
        ))
    }
}

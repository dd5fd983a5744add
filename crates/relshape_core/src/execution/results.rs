use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::Stream;
use relshape_error::{DbError, DbErrorKind, Result};
use tracing::{Instrument, Span, debug, debug_span, trace};
use uuid::Uuid;

use super::buffered::{BufferedCursor, close_logged};
use super::coordinator::{Demand, ResultCoordinator};
use super::retry::{ExecutionStrategy, execute_with_retry, execute_with_retry_async};
use super::value::ShapedValue;
use super::{AsyncRowCursor, Driver, QueryHandle, RowCursor};
use crate::shaper::ResultShaper;
use crate::sqlgen::Command;

/// Everything needed to run the commands of a query.
#[derive(Debug, Clone)]
pub struct ExecutionEnv {
    pub driver: Arc<dyn Driver>,
    pub strategy: Arc<dyn ExecutionStrategy>,
    /// Drain each cursor fully before handing out rows.
    pub buffer_results: bool,
    pub handle: QueryHandle,
}

fn cancelled_error(query_id: Uuid) -> DbError {
    DbError::with_kind(DbErrorKind::Cancelled, "Query cancelled").with_field("query_id", query_id)
}

/// Blocking iterator over the materialized results of a query.
///
/// Cursors are opened lazily, the first time the coordinator asks for one of
/// their rows. All opened cursors are closed once the results are exhausted,
/// on the first error, or when dropped.
pub struct QueryResults {
    query_id: Uuid,
    span: Span,
    coordinator: ResultCoordinator,
    commands: Vec<Command>,
    cursors: Vec<Option<Box<dyn RowCursor>>>,
    env: ExecutionEnv,
    finished: bool,
}

impl fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults")
            .field("query_id", &self.query_id)
            .field("commands", &self.commands)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl QueryResults {
    pub fn new(shaper: Arc<ResultShaper>, commands: Vec<Command>, env: ExecutionEnv) -> Self {
        let query_id = Uuid::new_v4();
        let span = debug_span!("query", %query_id);
        span.in_scope(|| debug!(statements = commands.len(), "executing query"));
        QueryResults {
            query_id,
            span,
            coordinator: ResultCoordinator::new(shaper, commands.len()),
            cursors: commands.iter().map(|_| None).collect(),
            commands,
            env,
            finished: false,
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn handle(&self) -> &QueryHandle {
        &self.env.handle
    }

    /// Number of cursors opened so far.
    pub fn opened_cursors(&self) -> usize {
        self.cursors.iter().filter(|c| c.is_some()).count()
    }

    fn next_value(&mut self) -> Result<Option<ShapedValue>> {
        loop {
            match self.coordinator.next_demand()? {
                Demand::Row(idx) => {
                    if self.env.handle.is_cancelled() {
                        return Err(cancelled_error(self.query_id));
                    }
                    let row = self.cursor(idx)?.read_next()?;
                    self.coordinator.feed(idx, row)?;
                }
                Demand::Yield(value) => return Ok(Some(value)),
                Demand::Done => return Ok(None),
            }
        }
    }

    fn cursor(&mut self, idx: usize) -> Result<&mut Box<dyn RowCursor>> {
        if self.cursors[idx].is_none() {
            let cursor = self.open(idx)?;
            self.cursors[idx] = Some(cursor);
        }
        match &mut self.cursors[idx] {
            Some(cursor) => Ok(cursor),
            None => Err(DbError::internal("Missing cursor")),
        }
    }

    fn open(&self, idx: usize) -> Result<Box<dyn RowCursor>> {
        let command = &self.commands[idx];
        trace!(statement = idx, sql = %command.sql, "opening cursor");

        execute_with_retry(self.env.strategy.as_ref(), || {
            let cursor = self.env.driver.execute(command)?;
            if self.env.buffer_results {
                Ok(Box::new(BufferedCursor::drain(cursor)?) as Box<dyn RowCursor>)
            } else {
                Ok(cursor)
            }
        })
    }

    /// Close all opened cursors.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for mut cursor in self.cursors.iter_mut().filter_map(Option::take) {
            close_logged(cursor.close());
        }
        self.span.in_scope(|| debug!("query finished"));
    }
}

impl Iterator for QueryResults {
    type Item = Result<ShapedValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let span = self.span.clone();
        let _entered = span.enter();
        match self.next_value() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Drop for QueryResults {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Async stream over the materialized results of a query.
///
/// Same behavior as [`QueryResults`], reading through the driver's async
/// cursors.
pub struct QueryStream {
    query_id: Uuid,
    span: Span,
    coordinator: ResultCoordinator,
    commands: Vec<Command>,
    cursors: Vec<Option<Box<dyn AsyncRowCursor>>>,
    /// Cursor currently being opened.
    opening: Option<(usize, BoxFuture<'static, Result<Box<dyn AsyncRowCursor>>>)>,
    env: ExecutionEnv,
    finished: bool,
}

impl fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryStream")
            .field("query_id", &self.query_id)
            .field("commands", &self.commands)
            .field("opening", &self.opening.as_ref().map(|(idx, _)| *idx))
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl QueryStream {
    pub fn new(shaper: Arc<ResultShaper>, commands: Vec<Command>, env: ExecutionEnv) -> Self {
        let query_id = Uuid::new_v4();
        let span = debug_span!("query", %query_id);
        span.in_scope(|| debug!(statements = commands.len(), "executing query async"));
        QueryStream {
            query_id,
            span,
            coordinator: ResultCoordinator::new(shaper, commands.len()),
            cursors: commands.iter().map(|_| None).collect(),
            commands,
            opening: None,
            env,
            finished: false,
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn handle(&self) -> &QueryHandle {
        &self.env.handle
    }

    fn open(&self, idx: usize) -> BoxFuture<'static, Result<Box<dyn AsyncRowCursor>>> {
        let command = self.commands[idx].clone();
        let driver = self.env.driver.clone();
        let strategy = self.env.strategy.clone();
        let buffer = self.env.buffer_results;
        trace!(statement = idx, sql = %command.sql, "opening async cursor");

        async move {
            let driver = &driver;
            let command = &command;
            execute_with_retry_async(strategy.as_ref(), || async move {
                let cursor = driver.execute_async(command).await?;
                let cursor: Box<dyn AsyncRowCursor> = if buffer {
                    Box::new(BufferedCursor::drain_async(cursor).await?)
                } else {
                    cursor
                };
                Ok::<_, DbError>(cursor)
            })
            .await
        }
        .instrument(self.span.clone())
        .boxed()
    }

    fn poll_value(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<ShapedValue>>> {
        loop {
            if let Some((idx, fut)) = &mut self.opening {
                let cursor = ready!(fut.as_mut().poll(cx))?;
                let idx = *idx;
                self.opening = None;
                self.cursors[idx] = Some(cursor);
            }

            match self.coordinator.next_demand()? {
                Demand::Row(idx) => {
                    if self.env.handle.is_cancelled() {
                        return Poll::Ready(Err(cancelled_error(self.query_id)));
                    }
                    match &mut self.cursors[idx] {
                        Some(cursor) => {
                            let row = ready!(cursor.poll_read_next(cx))?;
                            self.coordinator.feed(idx, row)?;
                        }
                        None => {
                            let fut = self.open(idx);
                            self.opening = Some((idx, fut));
                        }
                    }
                }
                Demand::Yield(value) => return Poll::Ready(Ok(Some(value))),
                Demand::Done => return Poll::Ready(Ok(None)),
            }
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.opening = None;
        for mut cursor in self.cursors.iter_mut().filter_map(Option::take) {
            close_logged(cursor.close());
        }
        self.span.in_scope(|| debug!("query finished"));
    }
}

impl Stream for QueryStream {
    type Item = Result<ShapedValue>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let span = this.span.clone();
        let _entered = span.enter();
        match ready!(this.poll_value(cx)) {
            Ok(Some(value)) => Poll::Ready(Some(Ok(value))),
            Ok(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Err(e) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.finish();
    }
}

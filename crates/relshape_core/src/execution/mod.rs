//! Running commands and shaping their rows.
//!
//! The driver is the only collaborator doing I/O. Everything between the
//! driver's cursors and the caller is driven by the sans-IO
//! [`coordinator::ResultCoordinator`], which is wrapped by a blocking iterator
//! ([`results::QueryResults`]) and an async stream ([`results::QueryStream`]).

pub mod buffered;
pub mod coordinator;
pub mod results;
pub mod retry;
pub mod value;

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use relshape_error::Result;

use crate::scalar::ScalarValue;
use crate::sqlgen::Command;

/// A single row read from a cursor, values in projection order.
pub type Row = Vec<ScalarValue>;

/// Forward only cursor over the rows of a command.
pub trait RowCursor: Debug + Send {
    /// Read the next row, blocking if needed. Returns None once exhausted.
    fn read_next(&mut self) -> Result<Option<Row>>;

    /// Release the cursor. Called exactly once, on every exit path.
    fn close(&mut self) -> Result<()>;
}

/// Async variant of [`RowCursor`].
pub trait AsyncRowCursor: Debug + Send {
    fn poll_read_next(&mut self, cx: &mut Context) -> Poll<Result<Option<Row>>>;

    fn close(&mut self) -> Result<()>;
}

/// Executes commands against the database.
pub trait Driver: Debug + Sync + Send {
    fn execute(&self, command: &Command) -> Result<Box<dyn RowCursor>>;

    fn execute_async<'a>(&'a self, command: &'a Command) -> BoxFuture<'a, Result<Box<dyn AsyncRowCursor>>>;
}

/// Handle for cancelling a running query.
///
/// Cancellation is observed before the next row is read.
#[derive(Debug, Clone, Default)]
pub struct QueryHandle {
    cancelled: Arc<AtomicBool>,
}

impl QueryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

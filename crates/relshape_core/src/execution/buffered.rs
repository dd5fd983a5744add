use std::collections::VecDeque;
use std::future::poll_fn;
use std::task::{Context, Poll};

use relshape_error::Result;
use tracing::{debug, error};

use super::{AsyncRowCursor, Row, RowCursor};

/// Cursor over rows already read into memory.
///
/// The underlying cursor is drained and closed before any row is handed out,
/// freeing the connection for other commands and letting the whole read be
/// retried.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    rows: VecDeque<Row>,
}

impl BufferedCursor {
    pub fn new(rows: impl IntoIterator<Item = Row>) -> Self {
        BufferedCursor {
            rows: rows.into_iter().collect(),
        }
    }

    /// Drain and close a cursor.
    ///
    /// The cursor is closed even if reading fails.
    pub fn drain(mut cursor: Box<dyn RowCursor>) -> Result<Self> {
        let result = read_all(cursor.as_mut());
        close_logged(cursor.close());
        let rows = result?;
        debug!(rows = rows.len(), "buffered cursor");
        Ok(BufferedCursor { rows })
    }

    pub async fn drain_async(mut cursor: Box<dyn AsyncRowCursor>) -> Result<Self> {
        let mut rows = VecDeque::new();
        let result = loop {
            match poll_fn(|cx| cursor.poll_read_next(cx)).await {
                Ok(Some(row)) => rows.push_back(row),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        close_logged(cursor.close());
        result?;
        debug!(rows = rows.len(), "buffered async cursor");
        Ok(BufferedCursor { rows })
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

fn read_all(cursor: &mut dyn RowCursor) -> Result<VecDeque<Row>> {
    let mut rows = VecDeque::new();
    while let Some(row) = cursor.read_next()? {
        rows.push_back(row);
    }
    Ok(rows)
}

pub(super) fn close_logged(result: Result<()>) {
    if let Err(e) = result {
        error!(%e, "failed to close cursor");
    }
}

impl RowCursor for BufferedCursor {
    fn read_next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

impl AsyncRowCursor for BufferedCursor {
    fn poll_read_next(&mut self, _cx: &mut Context) -> Poll<Result<Option<Row>>> {
        Poll::Ready(Ok(self.rows.pop_front()))
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relshape_error::DbError;

    use super::*;
    use crate::scalar::ScalarValue;

    #[derive(Debug)]
    struct FailingCursor {
        rows: usize,
        closed: bool,
    }

    impl RowCursor for FailingCursor {
        fn read_next(&mut self) -> Result<Option<Row>> {
            if self.rows == 0 {
                return Err(DbError::new("read failed"));
            }
            self.rows -= 1;
            Ok(Some(vec![ScalarValue::Int32(1)]))
        }

        fn close(&mut self) -> Result<()> {
            assert!(!self.closed);
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn drain_reads_everything() {
        let inner = BufferedCursor::new(vec![vec![1.into()], vec![2.into()]]);
        let mut buffered = BufferedCursor::drain(Box::new(inner)).unwrap();
        assert_eq!(2, buffered.remaining());
        assert_eq!(Some(vec![ScalarValue::Int32(1)]), buffered.read_next().unwrap());
        assert_eq!(Some(vec![ScalarValue::Int32(2)]), buffered.read_next().unwrap());
        assert_eq!(None, buffered.read_next().unwrap());
    }

    #[test]
    fn drain_error_propagates() {
        let cursor = FailingCursor {
            rows: 2,
            closed: false,
        };
        BufferedCursor::drain(Box::new(cursor)).unwrap_err();
    }
}

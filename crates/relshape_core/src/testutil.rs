//! Test utilities.
//!
//! Note this this isn't behind a `#[cfg(test)]` flag since the integration
//! tests use it too.
//!
//! Should not be used outside of tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt};
use hashbrown::HashMap;
use parking_lot::Mutex;
use relshape_error::{DbError, Result};

use crate::execution::{AsyncRowCursor, Driver, Row, RowCursor};
use crate::metadata::{EntityMetadata, FunctionMetadata, MetadataProvider, NavigationMetadata, PropertyMetadata};
use crate::scalar::ScalarValue;
use crate::sqlgen::Command;
use crate::translate::descriptor::OperationDescriptor;
use crate::types::DataType;

/// User defined function known to [`TestModel`], maps to `discount(x)`.
pub const DISCOUNT: OperationDescriptor = OperationDescriptor::static_method("CustomFunctions", "Discount", 1);

/// Customers with orders.
///
/// - Customer (table "Customers"): Id (pk), Name, collection Orders.
/// - Order (table "Orders"): Id (pk), CustomerId, Total (nullable),
///   required reference Customer, collection Lines.
/// - OrderLine (table "OrderLines"): Id (pk), OrderId, Quantity.
#[derive(Debug)]
pub struct TestModel {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl TestModel {
    pub fn new() -> Self {
        let customer = EntityMetadata {
            name: "Customer".to_string(),
            schema: None,
            table: "Customers".to_string(),
            properties: vec![
                PropertyMetadata::new("Id", "Id", DataType::Int32),
                PropertyMetadata::new("Name", "Name", DataType::Utf8),
            ],
            primary_key: vec!["Id".to_string()],
            navigations: vec![NavigationMetadata {
                name: "Orders".to_string(),
                target: "Order".to_string(),
                is_collection: true,
                required: false,
                source_properties: vec!["Id".to_string()],
                target_properties: vec!["CustomerId".to_string()],
            }],
        };

        let order = EntityMetadata {
            name: "Order".to_string(),
            schema: None,
            table: "Orders".to_string(),
            properties: vec![
                PropertyMetadata::new("Id", "Id", DataType::Int32),
                PropertyMetadata::new("CustomerId", "CustomerId", DataType::Int32),
                PropertyMetadata::new("Total", "Total", DataType::Float64).with_nullable(true),
            ],
            primary_key: vec!["Id".to_string()],
            navigations: vec![
                NavigationMetadata {
                    name: "Customer".to_string(),
                    target: "Customer".to_string(),
                    is_collection: false,
                    required: true,
                    source_properties: vec!["CustomerId".to_string()],
                    target_properties: vec!["Id".to_string()],
                },
                NavigationMetadata {
                    name: "Lines".to_string(),
                    target: "OrderLine".to_string(),
                    is_collection: true,
                    required: false,
                    source_properties: vec!["Id".to_string()],
                    target_properties: vec!["OrderId".to_string()],
                },
            ],
        };

        let line = EntityMetadata {
            name: "OrderLine".to_string(),
            schema: None,
            table: "OrderLines".to_string(),
            properties: vec![
                PropertyMetadata::new("Id", "Id", DataType::Int32),
                PropertyMetadata::new("OrderId", "OrderId", DataType::Int32),
                PropertyMetadata::new("Quantity", "Quantity", DataType::Int32),
            ],
            primary_key: vec!["Id".to_string()],
            navigations: Vec::new(),
        };

        TestModel {
            entities: [customer, order, line]
                .into_iter()
                .map(|e| (e.name.clone(), Arc::new(e)))
                .collect(),
        }
    }
}

impl Default for TestModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for TestModel {
    fn entity(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(name).cloned()
    }

    fn function(&self, method: &OperationDescriptor) -> Option<FunctionMetadata> {
        if *method == DISCOUNT {
            return Some(FunctionMetadata {
                sql_name: "discount".to_string(),
                return_type: DataType::Float64,
                is_aggregate: false,
            });
        }
        None
    }
}

/// Build a row of `width` values, null except for the given positions.
pub fn sparse_row(width: usize, values: &[(usize, ScalarValue)]) -> Row {
    let mut row = vec![ScalarValue::Null; width];
    for (pos, value) in values {
        row[*pos] = value.clone();
    }
    row
}

#[derive(Debug, Default)]
struct DriverStats {
    executions: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Driver returning scripted rows.
///
/// Scripts are assigned to commands in the order their SQL text is first
/// executed. Commands beyond the scripts return no rows.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    scripts: Vec<Vec<Row>>,
    seen: Mutex<Vec<String>>,
    executed: Mutex<Vec<Command>>,
    /// Number of executions still to fail with a transient error.
    transient_failures: AtomicUsize,
    /// Cursors fail reading after this many rows.
    fail_after_rows: Option<usize>,
    /// Async cursors return pending before every row.
    yield_pending: bool,
    stats: Arc<DriverStats>,
}

impl ScriptedDriver {
    pub fn new(scripts: Vec<Vec<Row>>) -> Self {
        ScriptedDriver {
            scripts,
            ..Default::default()
        }
    }

    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_read_failure_after(mut self, rows: usize) -> Self {
        self.fail_after_rows = Some(rows);
        self
    }

    pub fn with_yield_pending(mut self) -> Self {
        self.yield_pending = true;
        self
    }

    /// Commands successfully executed, in order.
    pub fn executed(&self) -> Vec<Command> {
        self.executed.lock().clone()
    }

    /// Execution attempts, including failed ones.
    pub fn executions(&self) -> usize {
        self.stats.executions.load(Ordering::SeqCst)
    }

    pub fn opened_cursors(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn closed_cursors(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    fn open(&self, command: &Command) -> Result<ScriptedCursor> {
        self.stats.executions.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DbError::transient("Connection reset"));
        }

        let idx = {
            let mut seen = self.seen.lock();
            match seen.iter().position(|sql| *sql == command.sql) {
                Some(idx) => idx,
                None => {
                    seen.push(command.sql.clone());
                    seen.len() - 1
                }
            }
        };
        self.executed.lock().push(command.clone());
        self.stats.opened.fetch_add(1, Ordering::SeqCst);

        Ok(ScriptedCursor {
            rows: self.scripts.get(idx).cloned().unwrap_or_default().into(),
            read: 0,
            fail_after_rows: self.fail_after_rows,
            yield_pending: self.yield_pending,
            pending: false,
            closed: false,
            stats: self.stats.clone(),
        })
    }
}

impl Driver for ScriptedDriver {
    fn execute(&self, command: &Command) -> Result<Box<dyn RowCursor>> {
        let cursor = self.open(command)?;
        Ok(Box::new(cursor))
    }

    fn execute_async<'a>(&'a self, command: &'a Command) -> BoxFuture<'a, Result<Box<dyn AsyncRowCursor>>> {
        let result = self.open(command).map(|c| Box::new(c) as Box<dyn AsyncRowCursor>);
        future::ready(result).boxed()
    }
}

#[derive(Debug)]
struct ScriptedCursor {
    rows: VecDeque<Row>,
    read: usize,
    fail_after_rows: Option<usize>,
    yield_pending: bool,
    /// Returned pending for the current row already.
    pending: bool,
    closed: bool,
    stats: Arc<DriverStats>,
}

impl ScriptedCursor {
    fn next_row(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Err(DbError::new("Read from closed cursor"));
        }
        if self.fail_after_rows == Some(self.read) {
            return Err(DbError::new("Connection lost"));
        }
        self.read += 1;
        Ok(self.rows.pop_front())
    }

    fn close_once(&mut self) -> Result<()> {
        if self.closed {
            return Err(DbError::new("Cursor closed twice"));
        }
        self.closed = true;
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RowCursor for ScriptedCursor {
    fn read_next(&mut self) -> Result<Option<Row>> {
        self.next_row()
    }

    fn close(&mut self) -> Result<()> {
        self.close_once()
    }
}

impl AsyncRowCursor for ScriptedCursor {
    fn poll_read_next(&mut self, cx: &mut Context) -> Poll<Result<Option<Row>>> {
        if self.yield_pending && !self.pending {
            self.pending = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.pending = false;
        Poll::Ready(self.next_row())
    }

    fn close(&mut self) -> Result<()> {
        self.close_once()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(sql: &str) -> Command {
        Command {
            sql: sql.to_string(),
            values: Vec::new(),
        }
    }

    #[test]
    fn scripts_assigned_by_first_execution() {
        let driver = ScriptedDriver::new(vec![vec![vec![ScalarValue::Int32(1)]], vec![vec![ScalarValue::Int32(2)]]]);

        let mut b = driver.execute(&command("b")).unwrap();
        let mut a = driver.execute(&command("a")).unwrap();
        assert_eq!(Some(vec![ScalarValue::Int32(1)]), b.read_next().unwrap());
        assert_eq!(Some(vec![ScalarValue::Int32(2)]), a.read_next().unwrap());
        assert_eq!(None, a.read_next().unwrap());

        a.close().unwrap();
        b.close().unwrap();
        assert_eq!(2, driver.closed_cursors());
    }

    #[test]
    fn sparse_row_fills_nulls() {
        assert_eq!(
            vec![ScalarValue::Null, ScalarValue::Int32(3), ScalarValue::Null],
            sparse_row(3, &[(1, ScalarValue::Int32(3))])
        );
    }

    #[test]
    fn transient_failures_then_success() {
        let driver = ScriptedDriver::new(Vec::new()).with_transient_failures(1);
        let err = driver.execute(&command("a")).unwrap_err();
        assert!(err.is_transient());
        driver.execute(&command("a")).unwrap();
        assert_eq!(2, driver.executions());
        assert_eq!(1, driver.opened_cursors());
    }
}

use std::sync::Arc;

use futures::StreamExt;
use relshape_core::config::session::{QuerySplittingBehavior, SessionConfig};
use relshape_core::engine::{Engine, PreparedQuery};
use relshape_core::execution::value::ShapedValue;
use relshape_core::execution::{QueryHandle, Row};
use relshape_core::query::{QueryExpr, Queryable, new_object, var};
use relshape_core::rewrite::parameters::ParameterValues;
use relshape_core::scalar::ScalarValue;
use relshape_core::shaper::Shaper;
use relshape_core::testutil::{ScriptedDriver, TestModel, sparse_row};
use relshape_error::{DbErrorKind, Result};

fn customers_with_orders() -> Queryable {
    Queryable::source("Customer").select(
        "c",
        new_object([("name", var("c").member("Name")), ("orders", var("c").member("Orders"))]),
    )
}

fn config(splitting: QuerySplittingBehavior) -> SessionConfig {
    SessionConfig {
        query_splitting_behavior: splitting,
        ..Default::default()
    }
}

fn scalar_pos(shaper: &Shaper) -> usize {
    match shaper {
        Shaper::Scalar(pos) => *pos,
        other => panic!("expected scalar, got {other}"),
    }
}

/// Row positions of a customers with orders query in single query mode.
struct JoinedLayout {
    width: usize,
    name: usize,
    customer_id: usize,
    order_id: usize,
    total: usize,
}

impl JoinedLayout {
    fn new(prepared: &PreparedQuery) -> Self {
        assert_eq!(1, prepared.statements.len());
        let root = &prepared.shaper.root;
        let Some(Shaper::Collection(orders)) = root.field("orders") else {
            panic!("expected joined collection: {root}");
        };
        assert!(prepared.shaper.grouping.is_some());

        JoinedLayout {
            width: prepared.statements[0].select.projections.len(),
            name: scalar_pos(root.field("name").unwrap()),
            customer_id: orders.parent_identifier[0],
            order_id: orders.self_identifier[0],
            total: scalar_pos(orders.element.field("Total").unwrap()),
        }
    }

    fn row(&self, name: &str, customer: i32, order: Option<(i32, f64)>) -> Row {
        let mut values: Vec<(usize, ScalarValue)> = vec![(self.name, name.into()), (self.customer_id, customer.into())];
        if let Some((id, total)) = order {
            values.push((self.order_id, id.into()));
            values.push((self.total, total.into()));
        }
        sparse_row(self.width, &values)
    }
}

/// Row positions of a customers with orders query in split query mode.
struct SplitLayout {
    root_width: usize,
    name: usize,
    customer_id: usize,
    child_width: usize,
    child_customer_id: usize,
    order_id: usize,
    total: usize,
}

impl SplitLayout {
    fn new(prepared: &PreparedQuery) -> Self {
        assert_eq!(2, prepared.statements.len());
        let root = &prepared.shaper.root;
        let Some(Shaper::SplitCollection(orders)) = root.field("orders") else {
            panic!("expected split collection: {root}");
        };
        assert_eq!(1, orders.statement);

        SplitLayout {
            root_width: prepared.statements[0].select.projections.len(),
            name: scalar_pos(root.field("name").unwrap()),
            customer_id: orders.parent_identifier[0],
            child_width: prepared.statements[1].select.projections.len(),
            child_customer_id: orders.child_identifier[0],
            order_id: orders.self_identifier[0],
            total: scalar_pos(orders.element.field("Total").unwrap()),
        }
    }

    fn root_row(&self, name: &str, customer: i32) -> Row {
        sparse_row(self.root_width, &[(self.name, name.into()), (self.customer_id, customer.into())])
    }

    fn child_row(&self, customer: i32, order: i32, total: f64) -> Row {
        sparse_row(
            self.child_width,
            &[
                (self.child_customer_id, customer.into()),
                (self.order_id, order.into()),
                (self.total, total.into()),
            ],
        )
    }
}

/// Name and order ids of a materialized customer.
fn summarize(value: &ShapedValue) -> (String, Vec<i32>) {
    let name = match value.field("name").and_then(|v| v.as_scalar()) {
        Some(ScalarValue::Utf8(name)) => name.clone(),
        other => panic!("unexpected name: {other:?}"),
    };
    let orders = value
        .field("orders")
        .and_then(|v| v.as_collection())
        .unwrap()
        .iter()
        .map(|order| match order.field("Id").and_then(|v| v.as_scalar()) {
            Some(ScalarValue::Int32(id)) => *id,
            other => panic!("unexpected order id: {other:?}"),
        })
        .collect();
    (name, orders)
}

fn prepare(splitting: QuerySplittingBehavior) -> Arc<PreparedQuery> {
    let engine = Engine::new(config(splitting), Arc::new(TestModel::new()), Arc::new(ScriptedDriver::default()));
    engine.compile(&customers_with_orders()).unwrap()
}

fn engine_with(config: SessionConfig, driver: &Arc<ScriptedDriver>) -> Engine {
    Engine::new(config, Arc::new(TestModel::new()), driver.clone())
}

fn joined_rows(layout: &JoinedLayout) -> Vec<Row> {
    vec![
        layout.row("a", 1, Some((10, 1.0))),
        layout.row("a", 1, Some((11, 2.0))),
        // Duplicate from a fan out join.
        layout.row("a", 1, Some((10, 1.0))),
        layout.row("b", 2, Some((20, 3.0))),
        layout.row("c", 3, None),
    ]
}

#[test]
fn single_query_groups_children_by_parent() {
    logutil::configure_test_logger();

    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]));
    let engine = engine_with(config(QuerySplittingBehavior::SingleQuery), &driver);

    let results = engine
        .execute(&prepared, &ParameterValues::new())
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();

    let summaries: Vec<_> = results.iter().map(summarize).collect();
    assert_eq!(
        vec![
            ("a".to_string(), vec![10, 11]),
            ("b".to_string(), vec![20]),
            ("c".to_string(), vec![]),
        ],
        summaries
    );

    let total = results[0].field("orders").unwrap().as_collection().unwrap()[1].field("Total");
    assert_eq!(Some(&ShapedValue::Scalar(ScalarValue::Float64(2.0))), total);

    assert_eq!(1, driver.opened_cursors());
    assert_eq!(1, driver.closed_cursors());
}

fn customers_with_order_lines() -> Queryable {
    Queryable::source("Customer").select(
        "c",
        new_object([
            ("name", var("c").member("Name")),
            (
                "orders",
                QueryExpr::Collection(Box::new(Queryable::navigation(var("c"), "Orders").select(
                    "o",
                    new_object([("id", var("o").member("Id")), ("lines", var("o").member("Lines"))]),
                ))),
            ),
        ]),
    )
}

fn int_field(value: &ShapedValue, name: &str) -> i32 {
    match value.field(name).and_then(|v| v.as_scalar()) {
        Some(ScalarValue::Int32(v)) => *v,
        other => panic!("unexpected {name}: {other:?}"),
    }
}

/// Order ids with their line ids.
fn order_lines(customer: &ShapedValue) -> Vec<(i32, Vec<i32>)> {
    customer
        .field("orders")
        .and_then(|v| v.as_collection())
        .unwrap()
        .iter()
        .map(|order| {
            let lines = order
                .field("lines")
                .and_then(|v| v.as_collection())
                .unwrap()
                .iter()
                .map(|line| int_field(line, "Id"))
                .collect();
            (int_field(order, "id"), lines)
        })
        .collect()
}

#[test]
fn nested_collections_attach_each_line_once() {
    let engine = Engine::new(
        config(QuerySplittingBehavior::SingleQuery),
        Arc::new(TestModel::new()),
        Arc::new(ScriptedDriver::default()),
    );
    let prepared = engine.compile(&customers_with_order_lines()).unwrap();
    assert_eq!(1, prepared.statements.len());

    let root = &prepared.shaper.root;
    let Some(Shaper::Collection(orders)) = root.field("orders") else {
        panic!("expected joined collection: {root}");
    };
    let Some(Shaper::Collection(lines)) = orders.element.field("lines") else {
        panic!("expected nested collection: {root}");
    };
    assert_eq!(orders.parent_identifier, lines.outer_identifier);

    let width = prepared.statements[0].select.projections.len();
    let name = scalar_pos(root.field("name").unwrap());
    let row = |customer_name: &str, customer: i32, order: i32, line: Option<(i32, i32)>| {
        let mut values: Vec<(usize, ScalarValue)> = vec![
            (name, customer_name.into()),
            (orders.parent_identifier[0], customer.into()),
            (orders.self_identifier[0], order.into()),
            (scalar_pos(orders.element.field("id").unwrap()), order.into()),
            (lines.parent_identifier[0], order.into()),
        ];
        if let Some((id, quantity)) = line {
            values.push((lines.self_identifier[0], id.into()));
            values.push((scalar_pos(lines.element.field("Id").unwrap()), id.into()));
            values.push((scalar_pos(lines.element.field("Quantity").unwrap()), quantity.into()));
        }
        sparse_row(width, &values)
    };

    let driver = Arc::new(ScriptedDriver::new(vec![vec![
        row("a", 1, 10, Some((100, 1))),
        row("a", 1, 10, Some((101, 2))),
        // Fan out duplicates.
        row("a", 1, 10, Some((100, 1))),
        row("a", 1, 11, Some((110, 3))),
        row("a", 1, 10, Some((101, 2))),
        row("b", 2, 20, None),
    ]]));
    let engine = engine_with(config(QuerySplittingBehavior::SingleQuery), &driver);

    let results = engine
        .execute(&prepared, &ParameterValues::new())
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();

    assert_eq!(2, results.len());
    assert_eq!(vec![(10, vec![100, 101]), (11, vec![110])], order_lines(&results[0]));
    assert_eq!(vec![(20, vec![])], order_lines(&results[1]));
    assert_eq!(1, driver.closed_cursors());
}

#[test]
fn buffered_closes_driver_cursor_before_first_result() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]));
    let engine = engine_with(
        SessionConfig {
            buffer_results: true,
            ..config(QuerySplittingBehavior::SingleQuery)
        },
        &driver,
    );

    let mut results = engine.execute(&prepared, &ParameterValues::new()).unwrap();
    let first = results.next().unwrap().unwrap();
    assert_eq!(("a".to_string(), vec![10, 11]), summarize(&first));
    assert_eq!(1, driver.closed_cursors());

    assert_eq!(2, results.count());
    assert_eq!(1, driver.closed_cursors());
}

#[test]
fn split_query_reads_children_in_lockstep() {
    let prepared = prepare(QuerySplittingBehavior::SplitQuery);
    let layout = SplitLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![
        vec![layout.root_row("a", 1), layout.root_row("b", 2), layout.root_row("c", 3)],
        vec![
            layout.child_row(1, 10, 1.0),
            layout.child_row(1, 11, 2.0),
            layout.child_row(3, 30, 3.0),
        ],
    ]));
    let engine = engine_with(config(QuerySplittingBehavior::SplitQuery), &driver);

    let summaries: Vec<_> = engine
        .execute(&prepared, &ParameterValues::new())
        .unwrap()
        .map(|v| summarize(&v.unwrap()))
        .collect();
    assert_eq!(
        vec![
            ("a".to_string(), vec![10, 11]),
            ("b".to_string(), vec![]),
            ("c".to_string(), vec![30]),
        ],
        summaries
    );

    let executed = driver.executed();
    assert_eq!(2, executed.len());
    assert_ne!(executed[0].sql, executed[1].sql);
    assert_eq!(2, driver.closed_cursors());
}

#[test]
fn split_statement_opened_lazily() {
    let prepared = prepare(QuerySplittingBehavior::SplitQuery);
    let driver = Arc::new(ScriptedDriver::new(vec![Vec::new(), Vec::new()]));
    let engine = engine_with(config(QuerySplittingBehavior::SplitQuery), &driver);

    let mut results = engine.execute(&prepared, &ParameterValues::new()).unwrap();
    assert!(results.next().is_none());
    assert_eq!(1, driver.opened_cursors());
    assert_eq!(1, driver.closed_cursors());
}

#[test]
fn cancel_releases_cursor() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]));
    let engine = engine_with(config(QuerySplittingBehavior::SingleQuery), &driver);

    let handle = QueryHandle::new();
    let mut results = engine
        .execute_with_handle(&prepared, &ParameterValues::new(), handle.clone())
        .unwrap();
    results.next().unwrap().unwrap();

    handle.cancel();
    let err = results.next().unwrap().unwrap_err();
    assert_eq!(DbErrorKind::Cancelled, err.kind());
    assert!(results.next().is_none());
    assert_eq!(1, driver.closed_cursors());
}

#[test]
fn dropping_results_releases_cursor() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]));
    let engine = engine_with(config(QuerySplittingBehavior::SingleQuery), &driver);

    let mut results = engine.execute(&prepared, &ParameterValues::new()).unwrap();
    results.next().unwrap().unwrap();
    assert_eq!(0, driver.closed_cursors());
    drop(results);
    assert_eq!(1, driver.closed_cursors());
}

#[test]
fn mid_stream_failure_ends_results() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]).with_read_failure_after(4));
    let engine = engine_with(
        SessionConfig {
            max_retry_count: 3,
            ..config(QuerySplittingBehavior::SingleQuery)
        },
        &driver,
    );

    let mut results = engine.execute(&prepared, &ParameterValues::new()).unwrap();
    // First customer is complete once the first row of the second is read.
    assert_eq!(("a".to_string(), vec![10, 11]), summarize(&results.next().unwrap().unwrap()));
    results.next().unwrap().unwrap_err();
    assert!(results.next().is_none());

    // Reads are never retried.
    assert_eq!(1, driver.executions());
    assert_eq!(1, driver.closed_cursors());
}

#[test]
fn transient_open_failures_retried() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]).with_transient_failures(2));
    let engine = engine_with(
        SessionConfig {
            max_retry_count: 2,
            ..config(QuerySplittingBehavior::SingleQuery)
        },
        &driver,
    );

    let results = engine.execute(&prepared, &ParameterValues::new()).unwrap();
    assert_eq!(3, results.map(|r| r.unwrap()).count());
    assert_eq!(3, driver.executions());
}

#[test]
fn transient_failures_exhaust_retries() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let driver = Arc::new(ScriptedDriver::new(Vec::new()).with_transient_failures(5));
    let engine = engine_with(
        SessionConfig {
            max_retry_count: 1,
            ..config(QuerySplittingBehavior::SingleQuery)
        },
        &driver,
    );

    let mut results = engine.execute(&prepared, &ParameterValues::new()).unwrap();
    let err = results.next().unwrap().unwrap_err();
    assert!(err.is_transient());
    assert_eq!(2, driver.executions());
    assert_eq!(0, driver.opened_cursors());
}

#[tokio::test]
async fn stream_split_query() {
    let prepared = prepare(QuerySplittingBehavior::SplitQuery);
    let layout = SplitLayout::new(&prepared);
    let driver = Arc::new(
        ScriptedDriver::new(vec![
            vec![layout.root_row("a", 1), layout.root_row("b", 2)],
            vec![layout.child_row(2, 20, 1.0), layout.child_row(2, 21, 1.0)],
        ])
        .with_yield_pending(),
    );
    let engine = engine_with(
        SessionConfig {
            buffer_results: true,
            ..config(QuerySplittingBehavior::SplitQuery)
        },
        &driver,
    );

    let stream = engine
        .execute_async(&prepared, &ParameterValues::new(), QueryHandle::new())
        .unwrap();
    let summaries: Vec<_> = stream.map(|v| summarize(&v.unwrap())).collect().await;
    assert_eq!(
        vec![("a".to_string(), vec![]), ("b".to_string(), vec![20, 21])],
        summaries
    );
    assert_eq!(2, driver.closed_cursors());
}

#[tokio::test]
async fn stream_cancelled() {
    let prepared = prepare(QuerySplittingBehavior::SingleQuery);
    let layout = JoinedLayout::new(&prepared);
    let driver = Arc::new(ScriptedDriver::new(vec![joined_rows(&layout)]).with_yield_pending());
    let engine = engine_with(config(QuerySplittingBehavior::SingleQuery), &driver);

    let handle = QueryHandle::new();
    let mut stream = engine
        .execute_async(&prepared, &ParameterValues::new(), handle.clone())
        .unwrap();
    stream.next().await.unwrap().unwrap();

    handle.cancel();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(DbErrorKind::Cancelled, err.kind());
    assert!(stream.next().await.is_none());
    assert_eq!(1, driver.closed_cursors());
}

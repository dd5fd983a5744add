//! Sans-IO coordination of result cursors.
//!
//! The coordinator never reads rows itself. It tells its driver which cursor
//! it needs a row from next ([`Demand::Row`]), gets fed that row, and hands
//! back materialized values once everything making up a top level result has
//! been read.
//!
//! Rows making up one top level result:
//!
//! - Without joined collections, one row of the root statement.
//! - With joined collections, all consecutive root rows sharing the root
//!   identifier. The root statement is ordered by that identifier.
//! - For split collections, the rows of the collection's statement whose
//!   parent identifier matches the parent. Split statements are ordered like
//!   their parents, so rows are consumed in lockstep with the parent rows.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use relshape_error::{DbError, Result};
use tracing::trace;

use super::Row;
use super::value::ShapedValue;
use crate::scalar::ScalarValue;
use crate::shaper::{ResultShaper, Shaper, SplitCollectionShaper};

/// Values of identifier columns.
///
/// Nulls compare equal to nulls.
#[derive(Debug, Clone)]
pub struct IdentifierKey(pub Vec<ScalarValue>);

impl IdentifierKey {
    pub fn from_row(row: &Row, positions: &[usize]) -> Result<Self> {
        positions
            .iter()
            .map(|&pos| row_value(row, pos).cloned())
            .collect::<Result<Vec<_>>>()
            .map(IdentifierKey)
    }

    pub fn is_all_null(&self) -> bool {
        self.0.iter().all(|v| v.is_null())
    }
}

impl PartialEq for IdentifierKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.identity_eq(b))
    }
}

impl Eq for IdentifierKey {}

impl Hash for IdentifierKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            v.hash_identity(state);
        }
    }
}

/// What the coordinator needs next.
#[derive(Debug, PartialEq)]
pub enum Demand {
    /// Feed the next row (or None if exhausted) of the cursor for this
    /// statement.
    Row(usize),
    /// A materialized top level result.
    Yield(ShapedValue),
    /// No more results.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Collecting root rows for the next result.
    Root,
    /// Collecting rows of split collections.
    Children,
    Done,
}

#[derive(Debug)]
struct FetchTask {
    split: Arc<SplitCollectionShaper>,
    key: IdentifierKey,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct CursorState {
    /// Row read but not yet consumed.
    peeked: Option<Row>,
    exhausted: bool,
    /// Last parent key served by this cursor, for statements ordered like
    /// their parents. Rows for earlier parents can't follow it.
    last_passed: Option<IdentifierKey>,
    /// Every parent key served, only kept for unordered statements.
    passed: HashSet<IdentifierKey>,
}

impl CursorState {
    /// If rows for this parent key showing up now are stale.
    fn is_passed(&self, key: &IdentifierKey) -> bool {
        self.last_passed.as_ref() == Some(key) || self.passed.contains(key)
    }

    fn mark_passed(&mut self, key: IdentifierKey, ordered: bool) {
        if ordered {
            self.last_passed = Some(key);
        } else {
            self.passed.insert(key);
        }
    }
}

#[derive(Debug)]
pub struct ResultCoordinator {
    shaper: Arc<ResultShaper>,
    phase: Phase,
    /// Awaiting a row for this cursor.
    awaiting: Option<usize>,
    cursors: Vec<CursorState>,
    /// Root rows for the current result.
    group: Vec<Row>,
    tasks: VecDeque<FetchTask>,
    /// Rows of split collections for the current result, keyed by statement
    /// and parent identifier.
    fetched: HashMap<(usize, IdentifierKey), Vec<Row>>,
}

impl ResultCoordinator {
    pub fn new(shaper: Arc<ResultShaper>, statement_count: usize) -> Self {
        ResultCoordinator {
            shaper,
            phase: Phase::Root,
            awaiting: None,
            cursors: (0..statement_count).map(|_| CursorState::default()).collect(),
            group: Vec::new(),
            tasks: VecDeque::new(),
            fetched: HashMap::new(),
        }
    }

    /// Feed a row for the cursor last demanded.
    pub fn feed(&mut self, statement: usize, row: Option<Row>) -> Result<()> {
        if self.awaiting != Some(statement) {
            return Err(DbError::internal("Fed a row that wasn't demanded")
                .with_field("statement", statement)
                .with_field("awaiting", format!("{:?}", self.awaiting)));
        }
        self.awaiting = None;

        let cursor = &mut self.cursors[statement];
        match row {
            Some(row) => cursor.peeked = Some(row),
            None => cursor.exhausted = true,
        }
        Ok(())
    }

    /// Get what's needed next.
    pub fn next_demand(&mut self) -> Result<Demand> {
        if let Some(statement) = self.awaiting {
            return Ok(Demand::Row(statement));
        }

        loop {
            match self.phase {
                Phase::Done => return Ok(Demand::Done),
                Phase::Root => {
                    if self.needs_row(0) {
                        return Ok(self.demand(0));
                    }
                    if !self.step_root()? {
                        continue;
                    }
                    self.enqueue_root_tasks()?;
                    self.phase = Phase::Children;
                }
                Phase::Children => {
                    let Some(statement) = self.tasks.front().map(|t| t.split.statement) else {
                        let value = self.emit()?;
                        return Ok(Demand::Yield(value));
                    };
                    if self.needs_row(statement) {
                        return Ok(self.demand(statement));
                    }
                    self.step_task()?;
                }
            }
        }
    }

    fn needs_row(&self, statement: usize) -> bool {
        let cursor = &self.cursors[statement];
        cursor.peeked.is_none() && !cursor.exhausted
    }

    fn demand(&mut self, statement: usize) -> Demand {
        self.awaiting = Some(statement);
        Demand::Row(statement)
    }

    /// Consume the peeked root row, returning true once the current group is
    /// complete.
    fn step_root(&mut self) -> Result<bool> {
        let root = &mut self.cursors[0];
        let Some(row) = root.peeked.take() else {
            // Exhausted.
            if self.group.is_empty() {
                self.phase = Phase::Done;
                return Ok(false);
            }
            return Ok(true);
        };

        let Some(grouping) = &self.shaper.grouping else {
            self.group.push(row);
            return Ok(true);
        };

        let same_group = match self.group.first() {
            None => true,
            Some(first) => IdentifierKey::from_row(first, grouping)? == IdentifierKey::from_row(&row, grouping)?,
        };
        if same_group {
            self.group.push(row);
            Ok(false)
        } else {
            // Belongs to the next result.
            self.cursors[0].peeked = Some(row);
            Ok(true)
        }
    }

    fn enqueue_root_tasks(&mut self) -> Result<()> {
        let Some(first) = self.group.first() else {
            return Ok(());
        };
        let mut splits = Vec::new();
        collect_splits(&self.shaper.root, &mut splits);
        for split in splits {
            let key = IdentifierKey::from_row(first, &split.parent_identifier)?;
            self.tasks.push_back(FetchTask {
                split,
                key,
                rows: Vec::new(),
            });
        }
        Ok(())
    }

    /// Consume the peeked row of the current task's cursor.
    fn step_task(&mut self) -> Result<()> {
        let Some(task) = self.tasks.front_mut() else {
            return Ok(());
        };
        let cursor = &mut self.cursors[task.split.statement];

        if let Some(row) = cursor.peeked.take() {
            let key = IdentifierKey::from_row(&row, &task.split.child_identifier)?;
            if key == task.key {
                task.rows.push(row);
                return Ok(());
            }
            if cursor.is_passed(&key) {
                trace!(statement = task.split.statement, "discarding stale split row");
                return Ok(());
            }
            // Belongs to a later parent.
            cursor.peeked = Some(row);
        }

        // Task complete.
        let Some(task) = self.tasks.pop_front() else {
            return Ok(());
        };
        self.cursors[task.split.statement].mark_passed(task.key.clone(), task.split.ordered_by_identifier);

        let mut nested = Vec::new();
        collect_splits(&task.split.element, &mut nested);
        if !nested.is_empty() {
            for group in group_rows(&task.rows, &task.split.self_identifier)? {
                for split in &nested {
                    let key = IdentifierKey::from_row(group[0], &split.parent_identifier)?;
                    self.tasks.push_back(FetchTask {
                        split: split.clone(),
                        key,
                        rows: Vec::new(),
                    });
                }
            }
        }

        self.fetched.insert((task.split.statement, task.key), task.rows);
        Ok(())
    }

    fn emit(&mut self) -> Result<ShapedValue> {
        let group = std::mem::take(&mut self.group);
        let value = materialize(&self.shaper.root, &group, &self.fetched)?;
        self.fetched.clear();
        self.phase = Phase::Root;
        trace!(rows = group.len(), "materialized result");
        Ok(value)
    }
}

fn row_value(row: &Row, pos: usize) -> Result<&ScalarValue> {
    row.get(pos).ok_or_else(|| {
        DbError::internal("Row is missing a value")
            .with_field("position", pos)
            .with_field("row_len", row.len())
    })
}

/// Collect split collections reachable without crossing another collection.
fn collect_splits(shaper: &Shaper, out: &mut Vec<Arc<SplitCollectionShaper>>) {
    match shaper {
        Shaper::SplitCollection(split) => out.push(split.clone()),
        Shaper::Object { fields, .. } => {
            for (_, field) in fields {
                collect_splits(field, out);
            }
        }
        Shaper::Scalar(_) | Shaper::Collection(_) => (),
    }
}

/// Group rows by identifier, in order of first appearance.
///
/// Rows with an all null identifier are the null side of a left join and are
/// skipped.
fn group_rows<'a, R: AsRef<Row>>(rows: &'a [R], identifier: &[usize]) -> Result<Vec<Vec<&'a Row>>> {
    let mut groups: Vec<Vec<&Row>> = Vec::new();
    let mut index: HashMap<IdentifierKey, usize> = HashMap::new();

    for row in rows {
        let row = row.as_ref();
        let key = IdentifierKey::from_row(row, identifier)?;
        if !identifier.is_empty() && key.is_all_null() {
            continue;
        }
        match index.get(&key) {
            Some(&idx) => groups[idx].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }

    Ok(groups)
}

fn materialize<R: AsRef<Row>>(
    shaper: &Shaper,
    rows: &[R],
    fetched: &HashMap<(usize, IdentifierKey), Vec<Row>>,
) -> Result<ShapedValue> {
    let first = rows
        .first()
        .ok_or_else(|| DbError::internal("Materializing without rows"))?
        .as_ref();

    match shaper {
        Shaper::Scalar(pos) => Ok(ShapedValue::Scalar(row_value(first, *pos)?.clone())),
        Shaper::Object { fields, null_check } => {
            if !null_check.is_empty() {
                let mut all_null = true;
                for &pos in null_check {
                    all_null &= row_value(first, pos)?.is_null();
                }
                if all_null {
                    return Ok(ShapedValue::NULL);
                }
            }
            let fields = fields
                .iter()
                .map(|(name, field)| Ok((name.clone(), materialize(field, rows, fetched)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ShapedValue::Object(fields))
        }
        Shaper::Collection(collection) => {
            let mut elements = Vec::new();
            for group in group_rows(rows, &collection.self_identifier)? {
                elements.push(materialize(&collection.element, &group, fetched)?);
            }
            Ok(ShapedValue::Collection(elements))
        }
        Shaper::SplitCollection(split) => {
            let key = IdentifierKey::from_row(first, &split.parent_identifier)?;
            let child_rows = match fetched.get(&(split.statement, key)) {
                Some(rows) => rows.as_slice(),
                None => &[],
            };

            let mut elements = Vec::new();
            for group in group_rows(child_rows, &split.self_identifier)? {
                elements.push(materialize(&split.element, &group, fetched)?);
            }
            Ok(ShapedValue::Collection(elements))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaper::CollectionShaper;

    fn run(coordinator: &mut ResultCoordinator, mut cursors: Vec<VecDeque<Row>>) -> Vec<ShapedValue> {
        let mut out = Vec::new();
        loop {
            match coordinator.next_demand().unwrap() {
                Demand::Row(idx) => {
                    let row = cursors[idx].pop_front();
                    coordinator.feed(idx, row).unwrap();
                }
                Demand::Yield(v) => out.push(v),
                Demand::Done => return out,
            }
        }
    }

    fn rows(rows: Vec<Vec<ScalarValue>>) -> VecDeque<Row> {
        rows.into_iter().collect()
    }

    fn int(v: i32) -> ScalarValue {
        ScalarValue::Int32(v)
    }

    /// Parent {id: $0, children: [{id: $1}]} grouped on $0.
    fn joined_shaper() -> ResultShaper {
        ResultShaper {
            root: Shaper::Object {
                fields: vec![
                    ("id".to_string(), Shaper::Scalar(0)),
                    (
                        "children".to_string(),
                        Shaper::Collection(Box::new(CollectionShaper {
                            collection_id: 0,
                            parent_identifier: vec![0],
                            outer_identifier: Vec::new(),
                            self_identifier: vec![1],
                            element: Shaper::Object {
                                fields: vec![("id".to_string(), Shaper::Scalar(1))],
                                null_check: Vec::new(),
                            },
                        })),
                    ),
                ],
                null_check: Vec::new(),
            },
            grouping: Some(vec![0]),
        }
    }

    fn child_ids(value: &ShapedValue) -> Vec<i32> {
        value
            .field("children")
            .unwrap()
            .as_collection()
            .unwrap()
            .iter()
            .map(|c| match c.field("id").unwrap().as_scalar().unwrap() {
                ScalarValue::Int32(v) => *v,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn groups_joined_rows_by_parent() {
        let mut coordinator = ResultCoordinator::new(Arc::new(joined_shaper()), 1);
        let out = run(
            &mut coordinator,
            vec![rows(vec![
                vec![int(1), int(10)],
                vec![int(1), int(11)],
                vec![int(1), int(10)],
                vec![int(2), int(20)],
            ])],
        );

        assert_eq!(2, out.len());
        assert_eq!(vec![10, 11], child_ids(&out[0]));
        assert_eq!(vec![20], child_ids(&out[1]));
    }

    #[test]
    fn null_child_is_empty_collection() {
        let mut coordinator = ResultCoordinator::new(Arc::new(joined_shaper()), 1);
        let out = run(
            &mut coordinator,
            vec![rows(vec![vec![int(1), ScalarValue::Null]])],
        );
        assert_eq!(1, out.len());
        assert!(child_ids(&out[0]).is_empty());
    }

    #[test]
    fn empty_cursor_done() {
        let mut coordinator = ResultCoordinator::new(Arc::new(joined_shaper()), 1);
        assert!(run(&mut coordinator, vec![VecDeque::new()]).is_empty());
        assert_eq!(Demand::Done, coordinator.next_demand().unwrap());
    }

    #[test]
    fn optional_object_null() {
        let shaper = ResultShaper {
            root: Shaper::Object {
                fields: vec![("a".to_string(), Shaper::Scalar(0))],
                null_check: vec![0],
            },
            grouping: None,
        };
        let mut coordinator = ResultCoordinator::new(Arc::new(shaper), 1);
        let out = run(
            &mut coordinator,
            vec![rows(vec![vec![ScalarValue::Null], vec![int(3)]])],
        );
        assert!(out[0].is_null());
        assert_eq!(Some(&int(3)), out[1].field("a").unwrap().as_scalar());
    }

    #[test]
    fn split_rows_in_lockstep() {
        // Parent {id: $0, children: split(stmt 1)[{id: $1}]}, child rows are
        // (parent_id, id).
        let shaper = ResultShaper {
            root: Shaper::Object {
                fields: vec![
                    ("id".to_string(), Shaper::Scalar(0)),
                    (
                        "children".to_string(),
                        Shaper::SplitCollection(Arc::new(SplitCollectionShaper {
                            collection_id: 0,
                            statement: 1,
                            parent_identifier: vec![0],
                            child_identifier: vec![0],
                            self_identifier: vec![1],
                            element: Shaper::Object {
                                fields: vec![("id".to_string(), Shaper::Scalar(1))],
                                null_check: Vec::new(),
                            },
                            ordered_by_identifier: true,
                        })),
                    ),
                ],
                null_check: Vec::new(),
            },
            grouping: None,
        };

        let mut coordinator = ResultCoordinator::new(Arc::new(shaper), 2);
        let out = run(
            &mut coordinator,
            vec![
                rows(vec![vec![int(1)], vec![int(2)], vec![int(3)]]),
                rows(vec![
                    vec![int(1), int(10)],
                    vec![int(1), int(11)],
                    vec![int(3), int(30)],
                ]),
            ],
        );

        assert_eq!(3, out.len());
        assert_eq!(vec![10, 11], child_ids(&out[0]));
        assert!(child_ids(&out[1]).is_empty());
        assert_eq!(vec![30], child_ids(&out[2]));
    }

    #[test]
    fn stale_split_rows_discarded() {
        let split = Arc::new(SplitCollectionShaper {
            collection_id: 0,
            statement: 1,
            parent_identifier: vec![0],
            child_identifier: vec![0],
            self_identifier: vec![1],
            element: Shaper::Scalar(1),
            ordered_by_identifier: false,
        });
        let shaper = ResultShaper {
            root: Shaper::Object {
                fields: vec![("children".to_string(), Shaper::SplitCollection(split))],
                null_check: Vec::new(),
            },
            grouping: None,
        };

        let mut coordinator = ResultCoordinator::new(Arc::new(shaper), 2);
        let out = run(
            &mut coordinator,
            vec![
                rows(vec![vec![int(1)], vec![int(2)]]),
                rows(vec![
                    vec![int(1), int(10)],
                    vec![int(2), int(20)],
                    vec![int(1), int(12)],
                    vec![int(2), int(21)],
                ]),
            ],
        );

        let children = out[1].field("children").unwrap().as_collection().unwrap();
        assert_eq!(
            vec![ShapedValue::Scalar(int(20)), ShapedValue::Scalar(int(21))],
            children.to_vec()
        );
    }

    #[test]
    fn ordered_split_keeps_last_parent_only() {
        let split = Arc::new(SplitCollectionShaper {
            collection_id: 0,
            statement: 1,
            parent_identifier: vec![0],
            child_identifier: vec![0],
            self_identifier: vec![1],
            element: Shaper::Scalar(1),
            ordered_by_identifier: true,
        });
        let shaper = ResultShaper {
            root: Shaper::Object {
                fields: vec![("children".to_string(), Shaper::SplitCollection(split))],
                null_check: Vec::new(),
            },
            grouping: None,
        };

        let parents = rows((0..200).map(|id| vec![int(id)]).collect());
        let children = rows((0..200).map(|id| vec![int(id), int(id * 10)]).collect());

        let mut coordinator = ResultCoordinator::new(Arc::new(shaper), 2);
        let out = run(&mut coordinator, vec![parents, children]);

        assert_eq!(200, out.len());
        assert_eq!(
            vec![ShapedValue::Scalar(int(1990))],
            out[199].field("children").unwrap().as_collection().unwrap().to_vec()
        );
        let cursor = &coordinator.cursors[1];
        assert!(cursor.passed.is_empty());
        assert_eq!(Some(IdentifierKey(vec![int(199)])), cursor.last_passed);
        assert!(coordinator.fetched.is_empty());
    }

    #[test]
    fn ordered_split_discards_rows_of_last_parent() {
        let mut cursor = CursorState::default();
        cursor.mark_passed(IdentifierKey(vec![int(1)]), true);
        cursor.mark_passed(IdentifierKey(vec![int(2)]), true);
        assert!(cursor.is_passed(&IdentifierKey(vec![int(2)])));
        assert!(!cursor.is_passed(&IdentifierKey(vec![int(3)])));
        assert!(cursor.passed.is_empty());
    }

    #[test]
    fn feed_without_demand_errors() {
        let mut coordinator = ResultCoordinator::new(Arc::new(joined_shaper()), 1);
        coordinator.feed(0, None).unwrap_err();
    }

    #[test]
    fn null_identifiers_compare_equal() {
        let a = IdentifierKey(vec![ScalarValue::Null, int(1)]);
        let b = IdentifierKey(vec![ScalarValue::Null, int(1)]);
        assert_eq!(a, b);
    }
}

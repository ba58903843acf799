//! The cross-applied table-valued functions.
//!
//! One operator covers every function except `repeat`, which has its own
//! runtime. Each call's parameter layout is fixed by the renderer:
//!
//! - `union`/`coalesce`: one query per arm
//! - `choose`: chooser query, then either two branch queries (boolean
//!   form) or `(key, branch query)` pairs with an optional trailing
//!   default query
//! - `optional`: input expression, body query
//! - `local`: body query
//! - `select`/`constant`/`fold`/`unfold`: one expression
//! - `project`: `(name, sub-query)` pairs
//! - `values`: one expression per requested property
//! - `store`/`aggregate`: collection name, then the stored expression
//! - `cap`: collection name
//! - `path`: one expression per step column
//! - `limit`: pivot expression, then the row cap; `range`: pivot
//!   expression, then the low and high bounds (high `-1` is unbounded)
//! - `dedup`: key expressions, the first doubling as the pivot
//! - `order`: pivot expression, then sort rules
//! - `sample`: pivot expression, then the sample size
//! - `group`: key query, value query; `group_count`: key query
//! - `count`: no parameters; `sum`/`min`/`max`/`mean`: one expression
//!
//! Functions that need the whole input (aggregates, ordering, grouping,
//! sampling, `fold`, `cap`, eager `aggregate`) drain it on the first
//! pull; the rest stream row by row. Query parameters are compiled per
//! input row with that row as the environment, which is what makes
//! sub-blocks correlated.

use crate::execution::compiler::run_block;
use crate::execution::{
    cells_equal, compare_cells, evaluate_scalar, BoxedOperator, Cell, ExecutionContext, Operator,
    Record,
};
use crate::statement::{
    ScalarExpression, SelectQueryBlock, SortKey, SortOrder, TvfCall, TvfName, TvfParameter,
    DEFAULT_COLUMN,
};
use hashbrown::HashSet;
use hodos_common::types::Value;
use hodos_common::{Error, Result};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Wraps a scalar result as a one-column composite, so downstream column
/// references resolve it like any other table output.
fn wrap(cell: Cell) -> Cell {
    let mut map = IndexMap::new();
    map.insert(DEFAULT_COLUMN.to_string(), cell);
    Cell::Map(map)
}

/// The default-column cell of a sub-block's first row, null when empty.
fn first_cell(rows: &[Record]) -> Cell {
    rows.first()
        .and_then(|row| row.get(DEFAULT_COLUMN))
        .cloned()
        .unwrap_or_else(Cell::null)
}

/// Executes one table-valued function call.
pub struct TvfOperator {
    input: BoxedOperator,
    call: TvfCall,
    cx: ExecutionContext,
    buffer: VecDeque<Record>,
    blocked: bool,
    exhausted: bool,
    seen: HashSet<String, ahash::RandomState>,
    row_index: i64,
}

impl TvfOperator {
    /// Creates the operator. `repeat` calls are rejected; the compiler
    /// routes those to [`RepeatOperator`](super::RepeatOperator).
    pub fn new(input: BoxedOperator, call: TvfCall, cx: ExecutionContext) -> Result<Self> {
        if call.function == TvfName::Repeat {
            return Err(Error::Internal(
                "repeat call reached the generic function operator".to_string(),
            ));
        }
        Ok(Self {
            input,
            call,
            cx,
            buffer: VecDeque::new(),
            blocked: false,
            exhausted: false,
            seen: HashSet::default(),
            row_index: 0,
        })
    }

    fn is_blocking(&self) -> bool {
        matches!(
            self.call.function,
            TvfName::Fold
                | TvfName::Count
                | TvfName::Sum
                | TvfName::Min
                | TvfName::Max
                | TvfName::Mean
                | TvfName::Group
                | TvfName::GroupCount
                | TvfName::Order
                | TvfName::Sample
                | TvfName::Cap
                | TvfName::Aggregate
        )
    }

    fn param(&self, index: usize) -> Result<&TvfParameter> {
        self.call.params.get(index).ok_or_else(|| {
            Error::Internal(format!(
                "{} call is missing parameter {index}",
                self.call.function.as_str()
            ))
        })
    }

    fn scalar_param(&self, index: usize) -> Result<&ScalarExpression> {
        match self.param(index)? {
            TvfParameter::Scalar(expr) => Ok(expr),
            other => Err(Error::Internal(format!(
                "{} expected a scalar parameter, got {other:?}",
                self.call.function.as_str()
            ))),
        }
    }

    fn query_param(&self, index: usize) -> Result<&SelectQueryBlock> {
        match self.param(index)? {
            TvfParameter::Query(block) => Ok(block),
            other => Err(Error::Internal(format!(
                "{} expected a sub-block parameter, got {other:?}",
                self.call.function.as_str()
            ))),
        }
    }

    fn literal_str(&self, index: usize) -> Result<&str> {
        match self.scalar_param(index)? {
            ScalarExpression::Literal(Value::String(s)) => Ok(s),
            other => Err(Error::Internal(format!(
                "{} expected a string literal, got {other:?}",
                self.call.function.as_str()
            ))),
        }
    }

    fn literal_int(&self, index: usize) -> Result<i64> {
        match self.scalar_param(index)? {
            ScalarExpression::Literal(Value::Int64(n)) => Ok(*n),
            other => Err(Error::Internal(format!(
                "{} expected an integer literal, got {other:?}",
                self.call.function.as_str()
            ))),
        }
    }

    fn bind(&self, record: &Record, cell: Cell) -> Record {
        record.clone().with(&self.call.alias, cell)
    }

    fn sub_rows(&self, block: &SelectQueryBlock, record: &Record) -> Result<Vec<Record>> {
        run_block(block, &self.cx, Some(record))
    }

    /// Streaming dispatch: the output rows for one input row.
    fn apply(&mut self, record: &Record) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        match self.call.function {
            TvfName::Union => {
                for index in 0..self.call.params.len() {
                    for row in self.sub_rows(self.query_param(index)?, record)? {
                        out.push(self.bind(record, row.as_map_cell()));
                    }
                }
            }
            TvfName::Coalesce => {
                for index in 0..self.call.params.len() {
                    let rows = self.sub_rows(self.query_param(index)?, record)?;
                    if !rows.is_empty() {
                        for row in rows {
                            out.push(self.bind(record, row.as_map_cell()));
                        }
                        break;
                    }
                }
            }
            TvfName::Choose => {
                let chooser_rows = self.sub_rows(self.query_param(0)?, record)?;
                if let Some(branch) = self.choose_branch(record, &chooser_rows)? {
                    for row in self.sub_rows(branch, record)? {
                        out.push(self.bind(record, row.as_map_cell()));
                    }
                }
            }
            TvfName::Optional => {
                let rows = self.sub_rows(self.query_param(1)?, record)?;
                if rows.is_empty() {
                    let fallback = evaluate_scalar(self.scalar_param(0)?, record, &self.cx)?;
                    out.push(self.bind(record, wrap(fallback)));
                } else {
                    for row in rows {
                        out.push(self.bind(record, row.as_map_cell()));
                    }
                }
            }
            TvfName::Local => {
                for row in self.sub_rows(self.query_param(0)?, record)? {
                    out.push(self.bind(record, row.as_map_cell()));
                }
            }
            TvfName::Select => {
                let cell = evaluate_scalar(self.scalar_param(0)?, record, &self.cx)?;
                // A selection over an unbound label filters the row out.
                let unbound = match &cell {
                    Cell::Map(entries) => entries.values().any(Cell::is_null),
                    other => other.is_null(),
                };
                if !unbound {
                    out.push(self.bind(record, wrap(cell)));
                }
            }
            TvfName::Project => {
                let mut entries = IndexMap::new();
                let mut index = 0;
                while index + 1 < self.call.params.len() {
                    let name = self.literal_str(index)?.to_string();
                    let rows = self.sub_rows(self.query_param(index + 1)?, record)?;
                    entries.insert(name, first_cell(&rows));
                    index += 2;
                }
                out.push(self.bind(record, wrap(Cell::Map(entries))));
            }
            TvfName::Values => {
                for index in 0..self.call.params.len() {
                    let cell = evaluate_scalar(self.scalar_param(index)?, record, &self.cx)?;
                    if !cell.is_null() {
                        out.push(self.bind(record, wrap(cell)));
                    }
                }
            }
            TvfName::Constant => {
                let cell = evaluate_scalar(self.scalar_param(0)?, record, &self.cx)?;
                out.push(self.bind(record, wrap(cell)));
            }
            TvfName::Store => {
                let name = self.literal_str(0)?.to_string();
                let cell = evaluate_scalar(self.scalar_param(1)?, record, &self.cx)?;
                self.cx.side_effects.push(&name, cell.clone());
                out.push(self.bind(record, wrap(cell)));
            }
            TvfName::Unfold => {
                let cell = evaluate_scalar(self.scalar_param(0)?, record, &self.cx)?;
                match cell {
                    Cell::List(items) => {
                        for item in items {
                            out.push(self.bind(record, wrap(item)));
                        }
                    }
                    Cell::Value(Value::List(items)) => {
                        for item in items {
                            out.push(self.bind(record, wrap(Cell::Value(item))));
                        }
                    }
                    Cell::Map(entries) => {
                        for (key, value) in entries {
                            let mut entry = IndexMap::new();
                            entry.insert(key, value);
                            out.push(self.bind(record, wrap(Cell::Map(entry))));
                        }
                    }
                    cell if cell.is_null() => {}
                    cell => out.push(self.bind(record, wrap(cell))),
                }
            }
            TvfName::Path => {
                let mut steps = Vec::new();
                for index in 0..self.call.params.len() {
                    match evaluate_scalar(self.scalar_param(index)?, record, &self.cx)? {
                        Cell::List(items) => steps.extend(items),
                        cell => steps.push(cell),
                    }
                }
                out.push(self.bind(record, wrap(Cell::List(steps))));
            }
            TvfName::Limit | TvfName::Range => {
                let (low, high) = if self.call.function == TvfName::Limit {
                    (0, self.literal_int(1)?)
                } else {
                    (self.literal_int(1)?, self.literal_int(2)?)
                };
                let index = self.row_index;
                self.row_index += 1;
                if index >= low && (high < 0 || index < high) {
                    let pivot = evaluate_scalar(self.scalar_param(0)?, record, &self.cx)?;
                    out.push(self.bind(record, wrap(pivot)));
                }
            }
            TvfName::Dedup => {
                let mut cells = Vec::with_capacity(self.call.params.len());
                for index in 0..self.call.params.len() {
                    cells.push(evaluate_scalar(self.scalar_param(index)?, record, &self.cx)?);
                }
                let key = cells
                    .iter()
                    .map(Cell::group_key)
                    .collect::<Vec<_>>()
                    .join("|");
                if self.seen.insert(key) {
                    let pivot = cells.into_iter().next().unwrap_or_else(Cell::null);
                    out.push(self.bind(record, wrap(pivot)));
                }
            }
            other => {
                return Err(Error::Internal(format!(
                    "{} dispatched as a streaming function",
                    other.as_str()
                )))
            }
        }
        Ok(out)
    }

    fn choose_branch(
        &self,
        record: &Record,
        chooser_rows: &[Record],
    ) -> Result<Option<&SelectQueryBlock>> {
        // Boolean form: exactly two branch queries after the chooser.
        let keyed = matches!(self.call.params.get(1), Some(TvfParameter::Scalar(_)));
        if !keyed {
            let index = if chooser_rows.is_empty() { 2 } else { 1 };
            return self.query_param(index).map(Some);
        }
        let chosen = first_cell(chooser_rows);
        let mut index = 1;
        while index < self.call.params.len() {
            match self.call.params.get(index) {
                Some(TvfParameter::Scalar(key_expr)) => {
                    let key = evaluate_scalar(key_expr, record, &self.cx)?;
                    if cells_equal(&chosen, &key) {
                        return self.query_param(index + 1).map(Some);
                    }
                    index += 2;
                }
                // Trailing lone query: the default branch.
                Some(TvfParameter::Query(block)) => return Ok(Some(block)),
                _ => break,
            }
        }
        Ok(None)
    }

    /// Blocking dispatch: drains the input, fills the buffer once.
    fn fill_blocking(&mut self) -> Result<()> {
        let mut rows = Vec::new();
        while let Some(record) = self.input.next()? {
            rows.push(record);
        }
        match self.call.function {
            TvfName::Fold => {
                let mut items = Vec::with_capacity(rows.len());
                for row in &rows {
                    items.push(evaluate_scalar(self.scalar_param(0)?, row, &self.cx)?);
                }
                self.buffer
                    .push_back(Record::new().with(&self.call.alias, wrap(Cell::List(items))));
            }
            TvfName::Count => {
                let count = Cell::Value(Value::Int64(rows.len() as i64));
                self.buffer
                    .push_back(Record::new().with(&self.call.alias, wrap(count)));
            }
            TvfName::Sum | TvfName::Mean => {
                let mut int_sum: i64 = 0;
                let mut float_sum: f64 = 0.0;
                let mut all_ints = true;
                let mut count: i64 = 0;
                for row in &rows {
                    let cell = evaluate_scalar(self.scalar_param(0)?, row, &self.cx)?;
                    if cell.is_null() {
                        continue;
                    }
                    let value = cell.as_value();
                    match value.as_int64() {
                        Some(n) if all_ints => int_sum += n,
                        _ => all_ints = false,
                    }
                    float_sum += value.as_float64().ok_or_else(|| {
                        Error::Internal(format!(
                            "non-numeric value in {}(): {value:?}",
                            self.call.function.as_str()
                        ))
                    })?;
                    count += 1;
                }
                if count > 0 {
                    let result = if self.call.function == TvfName::Mean {
                        Cell::Value(Value::Float64(float_sum / count as f64))
                    } else if all_ints {
                        Cell::Value(Value::Int64(int_sum))
                    } else {
                        Cell::Value(Value::Float64(float_sum))
                    };
                    self.buffer
                        .push_back(Record::new().with(&self.call.alias, wrap(result)));
                }
            }
            TvfName::Min | TvfName::Max => {
                let want = if self.call.function == TvfName::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut best: Option<Cell> = None;
                for row in &rows {
                    let cell = evaluate_scalar(self.scalar_param(0)?, row, &self.cx)?;
                    if cell.is_null() {
                        continue;
                    }
                    best = Some(match best {
                        None => cell,
                        Some(current) => match compare_cells(&cell, &current) {
                            Some(ord) if ord == want => cell,
                            Some(_) => current,
                            None => {
                                return Err(Error::Internal(format!(
                                    "incomparable values in {}()",
                                    self.call.function.as_str()
                                )))
                            }
                        },
                    });
                }
                if let Some(best) = best {
                    self.buffer
                        .push_back(Record::new().with(&self.call.alias, wrap(best)));
                }
            }
            TvfName::Group => {
                let mut groups: IndexMap<String, Cell> = IndexMap::new();
                for row in &rows {
                    let key = first_cell(&self.sub_rows(self.query_param(0)?, row)?);
                    let value = first_cell(&self.sub_rows(self.query_param(1)?, row)?);
                    let entry = groups
                        .entry(key.as_value().to_string())
                        .or_insert_with(|| Cell::List(Vec::new()));
                    if let Cell::List(items) = entry {
                        items.push(value);
                    }
                }
                self.buffer
                    .push_back(Record::new().with(&self.call.alias, wrap(Cell::Map(groups))));
            }
            TvfName::GroupCount => {
                let mut counts: IndexMap<String, i64> = IndexMap::new();
                for row in &rows {
                    let key = first_cell(&self.sub_rows(self.query_param(0)?, row)?);
                    *counts.entry(key.as_value().to_string()).or_insert(0) += 1;
                }
                let map = counts
                    .into_iter()
                    .map(|(k, n)| (k, Cell::Value(Value::Int64(n))))
                    .collect();
                self.buffer
                    .push_back(Record::new().with(&self.call.alias, wrap(Cell::Map(map))));
            }
            TvfName::Order => self.fill_order(rows)?,
            TvfName::Sample => {
                let size = usize::try_from(self.literal_int(1)?).unwrap_or(0);
                let hasher = shuffle_state();
                let mut keyed: Vec<(usize, u64, Record, Cell)> = Vec::with_capacity(rows.len());
                for (index, row) in rows.into_iter().enumerate() {
                    let pivot = evaluate_scalar(self.scalar_param(0)?, &row, &self.cx)?;
                    let hash = hasher.hash_one((index, pivot.group_key()));
                    keyed.push((index, hash, row, pivot));
                }
                // Pick by hash order, emit in input order.
                keyed.sort_by_key(|(_, hash, _, _)| *hash);
                keyed.truncate(size);
                keyed.sort_by_key(|(index, _, _, _)| *index);
                for (_, _, row, pivot) in keyed {
                    self.buffer.push_back(self.bind(&row, wrap(pivot)));
                }
            }
            TvfName::Cap => {
                let name = self.literal_str(0)?;
                let items = self.cx.side_effects.snapshot(name);
                self.buffer
                    .push_back(Record::new().with(&self.call.alias, wrap(Cell::List(items))));
            }
            TvfName::Aggregate => {
                let name = self.literal_str(0)?.to_string();
                let mut bound = Vec::with_capacity(rows.len());
                for row in rows {
                    let cell = evaluate_scalar(self.scalar_param(1)?, &row, &self.cx)?;
                    self.cx.side_effects.push(&name, cell.clone());
                    bound.push(self.bind(&row, wrap(cell)));
                }
                self.buffer.extend(bound);
            }
            other => {
                return Err(Error::Internal(format!(
                    "{} dispatched as a blocking function",
                    other.as_str()
                )))
            }
        }
        Ok(())
    }

    fn fill_order(&mut self, rows: Vec<Record>) -> Result<()> {
        enum Key {
            Cell(Cell),
            Hash(u64),
        }
        let hasher = shuffle_state();
        let rules: Vec<&TvfParameter> = self.call.params.iter().skip(1).collect();
        let mut keyed: Vec<(Vec<(Key, SortOrder)>, Record, Cell)> = Vec::with_capacity(rows.len());
        for row in rows {
            let pivot = evaluate_scalar(self.scalar_param(0)?, &row, &self.cx)?;
            let mut keys = Vec::new();
            if rules.is_empty() {
                keys.push((Key::Cell(pivot.clone()), SortOrder::Asc));
            }
            for rule in &rules {
                let TvfParameter::Sort(rule) = rule else {
                    return Err(Error::Internal(
                        "order expected sort-rule parameters".to_string(),
                    ));
                };
                let key = match (&rule.order, &rule.key) {
                    (SortOrder::Shuffle, _) => Key::Hash(hasher.hash_one(pivot.group_key())),
                    (_, SortKey::Scalar(expr)) => {
                        Key::Cell(evaluate_scalar(expr, &row, &self.cx)?)
                    }
                    (_, SortKey::Query(block)) => {
                        Key::Cell(first_cell(&self.sub_rows(block, &row)?))
                    }
                };
                keys.push((key, rule.order));
            }
            keyed.push((keys, row, pivot));
        }
        keyed.sort_by(|(a, _, _), (b, _, _)| {
            for ((ka, order), (kb, _)) in a.iter().zip(b) {
                let ord = match (ka, kb) {
                    (Key::Hash(x), Key::Hash(y)) => x.cmp(y),
                    (Key::Cell(x), Key::Cell(y)) => {
                        let ord = compare_cells(x, y).unwrap_or(Ordering::Equal);
                        if *order == SortOrder::Desc {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                    _ => Ordering::Equal,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        for (_, row, pivot) in keyed {
            self.buffer.push_back(self.bind(&row, wrap(pivot)));
        }
        Ok(())
    }
}

/// Fixed-seed hasher so shuffles and samples are reproducible run to run.
fn shuffle_state() -> ahash::RandomState {
    ahash::RandomState::with_seeds(0x6b69, 0x7264, 0x756f, 0x7321)
}

impl Operator for TvfOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        if self.is_blocking() {
            if !self.blocked {
                self.blocked = true;
                self.fill_blocking()?;
            }
            return Ok(self.buffer.pop_front());
        }
        while self.buffer.is_empty() && !self.exhausted {
            match self.input.next()? {
                Some(record) => {
                    let rows = self.apply(&record)?;
                    self.buffer.extend(rows);
                }
                None => self.exhausted = true,
            }
        }
        Ok(self.buffer.pop_front())
    }

    fn reset(&mut self) {
        self.input.reset();
        self.buffer.clear();
        self.blocked = false;
        self.exhausted = false;
        self.seen.clear();
        self.row_index = 0;
    }

    fn name(&self) -> &'static str {
        "Tvf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::SingleRowOperator;
    use crate::graph::{GraphConfig, GraphStore};
    use std::sync::Arc;

    fn cx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(GraphStore::new(usize::MAX)), GraphConfig::default())
    }

    fn constant_call(value: i64) -> TvfCall {
        TvfCall {
            function: TvfName::Constant,
            params: vec![TvfParameter::Scalar(ScalarExpression::Literal(
                Value::Int64(value),
            ))],
            alias: "n1".to_string(),
        }
    }

    #[test]
    fn test_constant_binds_alias() {
        let cx = cx();
        let seed = SingleRowOperator::new(Record::new());
        let mut op = TvfOperator::new(Box::new(seed), constant_call(7), cx.clone()).unwrap();
        let row = op.next().unwrap().unwrap();
        let Some(Cell::Map(entries)) = row.get("n1") else {
            panic!("constant output not bound as a composite");
        };
        assert_eq!(entries[DEFAULT_COLUMN], Cell::Value(Value::Int64(7)));
    }

    #[test]
    fn test_count_of_empty_input_is_zero() {
        let cx = cx();
        let mut seed = SingleRowOperator::new(Record::new());
        // Exhaust the seed so count sees no rows at all.
        let _ = seed.next().unwrap();
        let call = TvfCall {
            function: TvfName::Count,
            params: vec![],
            alias: "n1".to_string(),
        };
        let mut op = TvfOperator::new(Box::new(seed), call, cx).unwrap();
        let row = op.next().unwrap().unwrap();
        let Some(Cell::Map(entries)) = row.get("n1") else {
            panic!("count output not bound as a composite");
        };
        assert_eq!(entries[DEFAULT_COLUMN], Cell::Value(Value::Int64(0)));
        assert!(op.next().unwrap().is_none());
    }

    #[test]
    fn test_repeat_rejected_here() {
        let cx = cx();
        let call = TvfCall {
            function: TvfName::Repeat,
            params: vec![],
            alias: "n1".to_string(),
        };
        let seed = SingleRowOperator::new(Record::new());
        assert!(TvfOperator::new(Box::new(seed), call, cx).is_err());
    }
}

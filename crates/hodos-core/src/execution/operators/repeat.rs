//! The loop runtime behind `repeat`.

use crate::execution::compiler::run_block;
use crate::execution::{BoxedOperator, ExecutionContext, Operator, Record};
use crate::statement::{EmitCondition, RepeatCondition, SelectQueryBlock};
use hodos_common::{Error, Result};
use std::collections::VecDeque;

/// Runs a loop for each input record.
///
/// Two arm blocks share one select-list shape: the zero-iteration arm
/// seeds the loop from the input row without entering the body, and the
/// iteration arm applies the body to each carried row. A carried row is
/// exposed to the iteration arm (and to the `until`/`emit` filter blocks)
/// as a composite bound under the loop alias, so the body's column
/// references read loop-carried columns instead of the original input.
pub struct RepeatOperator {
    input: BoxedOperator,
    alias: String,
    zero_arm: SelectQueryBlock,
    iter_arm: SelectQueryBlock,
    condition: RepeatCondition,
    cx: ExecutionContext,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl RepeatOperator {
    /// Creates the loop runtime. Fails when the loop carries neither a
    /// `times` bound nor an `until` filter, since such a loop could never
    /// terminate.
    pub fn new(
        input: BoxedOperator,
        alias: impl Into<String>,
        zero_arm: SelectQueryBlock,
        iter_arm: SelectQueryBlock,
        condition: RepeatCondition,
        cx: ExecutionContext,
    ) -> Result<Self> {
        if condition.times.is_none() && condition.until.is_none() {
            return Err(Error::compilation("repeat requires times() or until()"));
        }
        Ok(Self {
            input,
            alias: alias.into(),
            zero_arm,
            iter_arm,
            condition,
            cx,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn loop_env(&self, input: &Record, row: &Record) -> Record {
        input
            .clone()
            .with(&self.condition.loop_alias, row.as_map_cell())
    }

    /// Splits `rows` into those satisfying the filter block and the rest.
    fn partition_matching(
        &self,
        input: &Record,
        block: &SelectQueryBlock,
        rows: Vec<Record>,
    ) -> Result<(Vec<Record>, Vec<Record>)> {
        let mut matching = Vec::new();
        let mut rest = Vec::new();
        for row in rows {
            if run_block(block, &self.cx, Some(&self.loop_env(input, &row)))?.is_empty() {
                rest.push(row);
            } else {
                matching.push(row);
            }
        }
        Ok((matching, rest))
    }

    fn emitted(&self, input: &Record, rows: &[Record]) -> Result<Vec<Record>> {
        match &self.condition.emit {
            None => Ok(Vec::new()),
            Some(EmitCondition::Always) => Ok(rows.to_vec()),
            Some(EmitCondition::Filtered(block)) => {
                let (matching, _) = self.partition_matching(input, block, rows.to_vec())?;
                Ok(matching)
            }
        }
    }

    fn run_loop(&self, input: &Record) -> Result<Vec<Record>> {
        let mut results: Vec<Record> = Vec::new();
        let mut rows = run_block(&self.zero_arm, &self.cx, Some(input))?;
        let mut iteration: i64 = 0;

        loop {
            if rows.is_empty() {
                break;
            }
            if self.condition.until_before_body {
                if let Some(until) = &self.condition.until {
                    let (done, rest) = self.partition_matching(input, until, rows)?;
                    results.extend(done);
                    rows = rest;
                    if rows.is_empty() {
                        break;
                    }
                }
            }
            if let Some(times) = self.condition.times {
                if iteration >= times {
                    results.extend(rows);
                    break;
                }
            }
            if iteration == 0 && self.condition.emit_before_body {
                results.extend(self.emitted(input, &rows)?);
            }

            let mut next = Vec::new();
            for row in &rows {
                next.extend(run_block(
                    &self.iter_arm,
                    &self.cx,
                    Some(&self.loop_env(input, row)),
                )?);
            }
            iteration += 1;
            rows = next;

            if !self.condition.until_before_body {
                if let Some(until) = &self.condition.until {
                    let (done, rest) = self.partition_matching(input, until, rows)?;
                    results.extend(done);
                    rows = rest;
                }
            }
            // Intermediate emits; the final iteration's rows leave through
            // the times/until exits above instead.
            if self.condition.times.map_or(true, |t| iteration < t) {
                results.extend(self.emitted(input, &rows)?);
            }
        }
        Ok(results)
    }
}

impl Operator for RepeatOperator {
    fn next(&mut self) -> Result<Option<Record>> {
        while self.buffer.is_empty() && !self.exhausted {
            match self.input.next()? {
                Some(input) => {
                    for row in self.run_loop(&input)? {
                        self.buffer
                            .push_back(input.clone().with(&self.alias, row.as_map_cell()));
                    }
                }
                None => self.exhausted = true,
            }
        }
        Ok(self.buffer.pop_front())
    }

    fn reset(&mut self) {
        self.input.reset();
        self.buffer.clear();
        self.exhausted = false;
    }

    fn name(&self) -> &'static str {
        "Repeat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operators::SingleRowOperator;
    use crate::execution::Cell;
    use crate::graph::{GraphConfig, GraphStore};
    use crate::statement::{ScalarExpression, SelectItem};
    use hodos_common::types::Value;
    use std::sync::Arc;

    #[test]
    fn test_iteration_arm_reads_the_loop_alias() {
        let store = Arc::new(GraphStore::new(usize::MAX));
        let cx = ExecutionContext::new(store, GraphConfig::default());

        // The loop carries its row under "r1"; "r2" is the output
        // binding. The iteration arm only resolves if the carried row
        // is bound under the loop alias.
        let zero_arm = SelectQueryBlock {
            select: vec![SelectItem::new(
                ScalarExpression::default_column("n0"),
                "item",
            )],
            ..SelectQueryBlock::default()
        };
        let iter_arm = SelectQueryBlock {
            select: vec![SelectItem::new(
                ScalarExpression::column("r1", "item"),
                "item",
            )],
            ..SelectQueryBlock::default()
        };
        let condition = RepeatCondition {
            loop_alias: "r1".to_string(),
            times: Some(2),
            until: None,
            until_before_body: false,
            emit: None,
            emit_before_body: false,
        };
        let input = SingleRowOperator::new(
            Record::new().with("n0", Cell::Value(Value::from(7i64))),
        );
        let mut repeat = RepeatOperator::new(
            Box::new(input),
            "r2",
            zero_arm,
            iter_arm,
            condition,
            cx,
        )
        .unwrap();

        let row = repeat.next().unwrap().unwrap();
        let Some(Cell::Map(out)) = row.get("r2") else {
            panic!("repeat output is not bound as a composite");
        };
        assert_eq!(out.get("item"), Some(&Cell::Value(Value::from(7i64))));
        assert!(repeat.next().unwrap().is_none());
    }
}

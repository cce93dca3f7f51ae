use std::cmp::Ordering;
use std::collections::HashMap;

use super::{Operator, OperatorFactory};
use crate::execution::expression::ExpressionError;
use crate::execution::ExecutionError;
use crate::page::{ColumnMetadata, DataType, HashKey, Page, Value};
use crate::query::plan::{AggregateFunction, AggregationStep};

/// One aggregate call bound to its input channel
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub input_channel: Option<usize>,
    pub output: ColumnMetadata,
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumBigint(Option<i64>),
    SumDouble(Option<f64>),
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(spec: &AggregateSpec) -> Self {
        match spec.function {
            AggregateFunction::CountAll | AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum if spec.output.data_type == DataType::Bigint => Accumulator::SumBigint(None),
            AggregateFunction::Sum => Accumulator::SumDouble(None),
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    /// `value` is `None` for `count(*)`, which counts every row
    fn add(&mut self, value: Option<Value>) -> Result<(), ExecutionError> {
        let value = match value {
            None => {
                if let Accumulator::Count(count) = self {
                    *count += 1;
                }
                return Ok(());
            }
            Some(Value::Null) => return Ok(()),
            Some(value) => value,
        };
        match self {
            Accumulator::Count(count) => *count += 1,
            Accumulator::SumBigint(sum) => {
                let addend = value
                    .as_i64()
                    .ok_or_else(|| ExpressionError::UnsupportedOperands(format!("sum({})", value)))?;
                let total = sum.unwrap_or(0).checked_add(addend).ok_or(ExpressionError::Overflow)?;
                *sum = Some(total);
            }
            Accumulator::SumDouble(sum) => {
                let addend = value
                    .as_f64()
                    .ok_or_else(|| ExpressionError::UnsupportedOperands(format!("sum({})", value)))?;
                *sum = Some(sum.unwrap_or(0.0) + addend);
            }
            Accumulator::Min(current) => replace_if(current, value, Ordering::Less),
            Accumulator::Max(current) => replace_if(current, value, Ordering::Greater),
        }
        Ok(())
    }

    fn result(&self) -> Value {
        match self {
            Accumulator::Count(count) => Value::Bigint(*count),
            Accumulator::SumBigint(sum) => sum.map_or(Value::Null, Value::Bigint),
            Accumulator::SumDouble(sum) => sum.map_or(Value::Null, Value::Double),
            Accumulator::Min(value) | Accumulator::Max(value) => value.clone().unwrap_or(Value::Null),
        }
    }
}

fn replace_if(current: &mut Option<Value>, candidate: Value, wanted: Ordering) {
    let replace = match current {
        None => true,
        Some(existing) => candidate.sql_cmp(existing) == Some(wanted),
    };
    if replace {
        *current = Some(candidate);
    }
}

/// Groups its input on the key channels and accumulates every aggregate per group.
///
/// The same operator serves every step; the plan already chose final functions for
/// the final step. Groups are emitted in first-seen order once input is finished.
pub struct HashAggregationOperator {
    step: AggregationStep,
    key_channels: Vec<usize>,
    key_layout: Vec<ColumnMetadata>,
    aggregates: Vec<AggregateSpec>,
    groups: HashMap<HashKey, usize>,
    keys: Vec<Vec<Value>>,
    accumulators: Vec<Vec<Accumulator>>,
    finishing: bool,
    produced: bool,
}

impl HashAggregationOperator {
    fn group_for(&mut self, key: Vec<Value>) -> usize {
        let hash_key = HashKey(key);
        if let Some(group) = self.groups.get(&hash_key) {
            return *group;
        }
        let group = self.keys.len();
        self.keys.push(hash_key.0.clone());
        self.accumulators
            .push(self.aggregates.iter().map(Accumulator::new).collect());
        self.groups.insert(hash_key, group);
        group
    }

    fn build_output(&mut self) -> Result<Page, ExecutionError> {
        // a global aggregation always produces exactly one row
        if self.key_channels.is_empty() && self.keys.is_empty() {
            self.group_for(Vec::new());
        }
        let mut layout = self.key_layout.clone();
        layout.extend(self.aggregates.iter().map(|a| a.output.clone()));
        let rows = self
            .keys
            .iter()
            .zip(self.accumulators.iter())
            .map(|(key, accumulators)| {
                let mut row = key.clone();
                row.extend(accumulators.iter().map(Accumulator::result));
                row
            })
            .collect();
        Ok(Page::from_rows(layout, rows)?)
    }
}

impl Operator for HashAggregationOperator {
    fn name(&self) -> &'static str {
        match self.step {
            AggregationStep::Single => "HashAggregation",
            AggregationStep::Partial => "PartialHashAggregation",
            AggregationStep::Final => "FinalHashAggregation",
        }
    }

    fn needs_input(&self) -> bool {
        !self.finishing
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        for row in page.rows() {
            let key: Vec<Value> = self.key_channels.iter().map(|c| row.get(*c)).collect();
            let group = self.group_for(key);
            for (index, spec) in self.aggregates.iter().enumerate() {
                let value = spec.input_channel.map(|c| row.get(c));
                self.accumulators[group][index].add(value)?;
            }
        }
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        if !self.finishing || self.produced {
            return Ok(None);
        }
        self.produced = true;
        Ok(Some(self.build_output()?))
    }

    fn finish(&mut self) {
        self.finishing = true;
    }

    fn is_finished(&self) -> bool {
        self.finishing && self.produced
    }
}

pub struct HashAggregationOperatorFactory {
    step: AggregationStep,
    key_channels: Vec<usize>,
    key_layout: Vec<ColumnMetadata>,
    aggregates: Vec<AggregateSpec>,
}

impl HashAggregationOperatorFactory {
    pub fn new(
        step: AggregationStep,
        key_channels: Vec<usize>,
        key_layout: Vec<ColumnMetadata>,
        aggregates: Vec<AggregateSpec>,
    ) -> Self {
        Self {
            step,
            key_channels,
            key_layout,
            aggregates,
        }
    }
}

impl OperatorFactory for HashAggregationOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(HashAggregationOperator {
            step: self.step,
            key_channels: self.key_channels.clone(),
            key_layout: self.key_layout.clone(),
            aggregates: self.aggregates.clone(),
            groups: HashMap::new(),
            keys: Vec::new(),
            accumulators: Vec::new(),
            finishing: false,
            produced: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(function: AggregateFunction, input_channel: Option<usize>, name: &str, data_type: DataType) -> AggregateSpec {
        AggregateSpec {
            function,
            input_channel,
            output: ColumnMetadata::new(name, data_type).with_aggregate(function.name()),
        }
    }

    fn input() -> Page {
        Page::from_rows(
            vec![
                ColumnMetadata::new("host", DataType::Varchar),
                ColumnMetadata::new("value", DataType::Bigint),
            ],
            vec![
                vec![Value::Varchar("a".into()), Value::Bigint(1)],
                vec![Value::Varchar("b".into()), Value::Bigint(5)],
                vec![Value::Varchar("a".into()), Value::Null],
                vec![Value::Varchar("a".into()), Value::Bigint(3)],
            ],
        )
        .unwrap()
    }

    fn run(factory: HashAggregationOperatorFactory, pages: Vec<Page>) -> Page {
        let mut operator = factory.create_operator().unwrap();
        for page in pages {
            operator.add_input(page).unwrap();
        }
        assert!(operator.get_output().unwrap().is_none());
        operator.finish();
        let output = operator.get_output().unwrap().unwrap();
        assert!(operator.is_finished());
        output
    }

    #[test]
    fn test_grouped_aggregation() {
        let factory = HashAggregationOperatorFactory::new(
            AggregationStep::Single,
            vec![0],
            vec![ColumnMetadata::new("host", DataType::Varchar)],
            vec![
                spec(AggregateFunction::Sum, Some(1), "total", DataType::Bigint),
                spec(AggregateFunction::Count, Some(1), "n", DataType::Bigint),
                spec(AggregateFunction::CountAll, None, "rows", DataType::Bigint),
                spec(AggregateFunction::Max, Some(1), "peak", DataType::Bigint),
            ],
        );
        let output = run(factory, vec![input()]);
        let rows: Vec<Vec<Value>> = output.rows().map(|r| r.values()).collect();
        assert_eq!(
            rows,
            vec![
                vec![
                    Value::Varchar("a".into()),
                    Value::Bigint(4),
                    Value::Bigint(2),
                    Value::Bigint(3),
                    Value::Bigint(3)
                ],
                vec![
                    Value::Varchar("b".into()),
                    Value::Bigint(5),
                    Value::Bigint(1),
                    Value::Bigint(1),
                    Value::Bigint(5)
                ],
            ]
        );
        assert_eq!(output.layout()[1].aggregate.as_deref(), Some("sum"));
    }

    #[test]
    fn test_global_aggregation_over_no_rows() {
        let factory = HashAggregationOperatorFactory::new(
            AggregationStep::Partial,
            Vec::new(),
            Vec::new(),
            vec![
                spec(AggregateFunction::CountAll, None, "rows", DataType::Bigint),
                spec(AggregateFunction::Min, Some(1), "low", DataType::Bigint),
            ],
        );
        let output = run(factory, Vec::new());
        assert_eq!(output.num_rows(), 1);
        assert_eq!(output.row(0).values(), vec![Value::Bigint(0), Value::Null]);
    }

    #[test]
    fn test_grouped_aggregation_over_no_rows_is_empty() {
        let factory = HashAggregationOperatorFactory::new(
            AggregationStep::Final,
            vec![0],
            vec![ColumnMetadata::new("host", DataType::Varchar)],
            vec![spec(AggregateFunction::Sum, Some(1), "total", DataType::Double)],
        );
        let output = run(factory, Vec::new());
        assert!(output.is_empty());
    }

    #[test]
    fn test_sum_overflow_is_an_error() {
        let factory = HashAggregationOperatorFactory::new(
            AggregationStep::Single,
            Vec::new(),
            Vec::new(),
            vec![spec(AggregateFunction::Sum, Some(0), "total", DataType::Bigint)],
        );
        let mut operator = factory.create_operator().unwrap();
        let page = Page::from_rows(
            vec![ColumnMetadata::new("value", DataType::Bigint)],
            vec![vec![Value::Bigint(i64::MAX)], vec![Value::Bigint(1)]],
        )
        .unwrap();
        assert!(matches!(
            operator.add_input(page),
            Err(ExecutionError::Expression(ExpressionError::Overflow))
        ));
    }
}

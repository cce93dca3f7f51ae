use serde::{Deserialize, Serialize};

use super::types::{DataType, Value};
use super::PageError;

/// A typed, nullable vector of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Boolean(Vec<Option<bool>>),
    Bigint(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Varchar(Vec<Option<String>>),
    Timestamp(Vec<Option<i64>>),
}

impl Block {
    /// Creates an empty block of the given type
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => Block::Boolean(Vec::new()),
            DataType::Bigint => Block::Bigint(Vec::new()),
            DataType::Double => Block::Double(Vec::new()),
            DataType::Varchar => Block::Varchar(Vec::new()),
            DataType::Timestamp => Block::Timestamp(Vec::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Block::Boolean(_) => DataType::Boolean,
            Block::Bigint(_) => DataType::Bigint,
            Block::Double(_) => DataType::Double,
            Block::Varchar(_) => DataType::Varchar,
            Block::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Block::Boolean(v) => v.len(),
            Block::Bigint(v) => v.len(),
            Block::Double(v) => v.len(),
            Block::Varchar(v) => v.len(),
            Block::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at `index`; out-of-range positions read as null
    pub fn get(&self, index: usize) -> Value {
        match self {
            Block::Boolean(v) => v.get(index).copied().flatten().map_or(Value::Null, Value::Boolean),
            Block::Bigint(v) => v.get(index).copied().flatten().map_or(Value::Null, Value::Bigint),
            Block::Double(v) => v.get(index).copied().flatten().map_or(Value::Null, Value::Double),
            Block::Varchar(v) => v
                .get(index)
                .cloned()
                .flatten()
                .map_or(Value::Null, Value::Varchar),
            Block::Timestamp(v) => v
                .get(index)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Timestamp),
        }
    }

    /// Keeps the positions whose mask entry is true
    pub fn filter(&self, mask: &[bool]) -> Block {
        fn keep<T: Clone>(values: &[Option<T>], mask: &[bool]) -> Vec<Option<T>> {
            values
                .iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            Block::Boolean(v) => Block::Boolean(keep(v, mask)),
            Block::Bigint(v) => Block::Bigint(keep(v, mask)),
            Block::Double(v) => Block::Double(keep(v, mask)),
            Block::Varchar(v) => Block::Varchar(keep(v, mask)),
            Block::Timestamp(v) => Block::Timestamp(keep(v, mask)),
        }
    }

    /// Gathers the given positions, in order
    pub fn take(&self, positions: &[usize]) -> Block {
        fn gather<T: Clone>(values: &[Option<T>], positions: &[usize]) -> Vec<Option<T>> {
            positions
                .iter()
                .map(|&p| values.get(p).cloned().flatten())
                .collect()
        }
        match self {
            Block::Boolean(v) => Block::Boolean(gather(v, positions)),
            Block::Bigint(v) => Block::Bigint(gather(v, positions)),
            Block::Double(v) => Block::Double(gather(v, positions)),
            Block::Varchar(v) => Block::Varchar(gather(v, positions)),
            Block::Timestamp(v) => Block::Timestamp(gather(v, positions)),
        }
    }

    /// Appends the values of another block of the same type
    pub fn append(&mut self, other: &Block) -> Result<(), PageError> {
        match (self, other) {
            (Block::Boolean(a), Block::Boolean(b)) => a.extend_from_slice(b),
            (Block::Bigint(a), Block::Bigint(b)) => a.extend_from_slice(b),
            (Block::Double(a), Block::Double(b)) => a.extend_from_slice(b),
            (Block::Varchar(a), Block::Varchar(b)) => a.extend_from_slice(b),
            (Block::Timestamp(a), Block::Timestamp(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(PageError::TypeMismatch {
                    expected: a.data_type(),
                    actual: b.data_type(),
                })
            }
        }
        Ok(())
    }
}

/// Accumulates values into a block, coercing where a lossless cast exists
#[derive(Debug)]
pub struct BlockBuilder {
    block: Block,
}

impl BlockBuilder {
    pub fn new(data_type: DataType) -> Self {
        Self {
            block: Block::empty(data_type),
        }
    }

    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        let block = match data_type {
            DataType::Boolean => Block::Boolean(Vec::with_capacity(capacity)),
            DataType::Bigint => Block::Bigint(Vec::with_capacity(capacity)),
            DataType::Double => Block::Double(Vec::with_capacity(capacity)),
            DataType::Varchar => Block::Varchar(Vec::with_capacity(capacity)),
            DataType::Timestamp => Block::Timestamp(Vec::with_capacity(capacity)),
        };
        Self { block }
    }

    pub fn data_type(&self) -> DataType {
        self.block.data_type()
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Appends a value, casting it to the builder's type when needed
    pub fn push(&mut self, value: Value) -> Result<(), PageError> {
        let target = self.block.data_type();
        let value = match value.data_type() {
            Some(actual) if actual != target => {
                value.cast(target).ok_or(PageError::TypeMismatch {
                    expected: target,
                    actual,
                })?
            }
            _ => value,
        };
        match (&mut self.block, value) {
            (Block::Boolean(v), Value::Null) => v.push(None),
            (Block::Bigint(v), Value::Null) => v.push(None),
            (Block::Double(v), Value::Null) => v.push(None),
            (Block::Varchar(v), Value::Null) => v.push(None),
            (Block::Timestamp(v), Value::Null) => v.push(None),
            (Block::Boolean(v), Value::Boolean(b)) => v.push(Some(b)),
            (Block::Bigint(v), Value::Bigint(x)) => v.push(Some(x)),
            (Block::Double(v), Value::Double(x)) => v.push(Some(x)),
            (Block::Varchar(v), Value::Varchar(s)) => v.push(Some(s)),
            (Block::Timestamp(v), Value::Timestamp(x)) => v.push(Some(x)),
            (block, value) => {
                return Err(PageError::TypeMismatch {
                    expected: block.data_type(),
                    actual: value.data_type().unwrap_or(block.data_type()),
                })
            }
        }
        Ok(())
    }

    pub fn build(self) -> Block {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_coerces_bigint_into_double() {
        let mut builder = BlockBuilder::new(DataType::Double);
        builder.push(Value::Bigint(2)).unwrap();
        builder.push(Value::Null).unwrap();
        builder.push(Value::Double(1.5)).unwrap();
        let block = builder.build();
        assert_eq!(block, Block::Double(vec![Some(2.0), None, Some(1.5)]));
    }

    #[test]
    fn test_builder_rejects_incompatible_value() {
        let mut builder = BlockBuilder::new(DataType::Bigint);
        let result = builder.push(Value::Varchar("host-a".to_string()));
        assert!(matches!(result, Err(PageError::TypeMismatch { .. })));
    }

    #[test]
    fn test_filter_and_take() {
        let block = Block::Bigint(vec![Some(1), Some(2), None, Some(4)]);
        assert_eq!(
            block.filter(&[true, false, true, true]),
            Block::Bigint(vec![Some(1), None, Some(4)])
        );
        assert_eq!(block.take(&[3, 0]), Block::Bigint(vec![Some(4), Some(1)]));
        assert_eq!(block.get(2), Value::Null);
        assert_eq!(block.get(10), Value::Null);
    }

    #[test]
    fn test_append_requires_same_type() {
        let mut block = Block::Varchar(vec![Some("a".to_string())]);
        block.append(&Block::Varchar(vec![None])).unwrap();
        assert_eq!(block.len(), 2);
        assert!(block.append(&Block::Bigint(vec![Some(1)])).is_err());
    }
}

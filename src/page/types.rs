use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Logical type of a column, symbol or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Bigint,
    Double,
    Varchar,
    /// Nanoseconds since the Unix epoch
    Timestamp,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Bigint | DataType::Double)
    }

    /// Returns the common super type two operands are coerced to, if any
    pub fn common_super_type(left: DataType, right: DataType) -> Option<DataType> {
        match (left, right) {
            (l, r) if l == r => Some(l),
            (DataType::Bigint, DataType::Double) | (DataType::Double, DataType::Bigint) => {
                Some(DataType::Double)
            }
            (DataType::Bigint, DataType::Timestamp) | (DataType::Timestamp, DataType::Bigint) => {
                Some(DataType::Timestamp)
            }
            _ => None,
        }
    }

    /// Parses a type name as written in schema files
    pub fn parse(name: &str) -> Option<DataType> {
        match name.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Some(DataType::Boolean),
            "bigint" | "int" | "integer" | "long" => Some(DataType::Bigint),
            "double" | "float" | "real" => Some(DataType::Double),
            "varchar" | "string" | "text" | "tag" => Some(DataType::Varchar),
            "timestamp" | "time" => Some(DataType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Bigint => "bigint",
            DataType::Double => "double",
            DataType::Varchar => "varchar",
            DataType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A single scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Bigint(i64),
    Double(f64),
    Varchar(String),
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the type of a non-null value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Bigint(_) => Some(DataType::Bigint),
            Value::Double(_) => Some(DataType::Double),
            Value::Varchar(_) => Some(DataType::Varchar),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bigint(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bigint(v) | Value::Timestamp(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts the value into `target`, returning `None` when no conversion exists
    pub fn cast(&self, target: DataType) -> Option<Value> {
        let value = match (self, target) {
            (Value::Null, _) => Value::Null,
            (Value::Boolean(b), DataType::Boolean) => Value::Boolean(*b),
            (Value::Boolean(b), DataType::Bigint) => Value::Bigint(i64::from(*b)),
            (Value::Boolean(b), DataType::Varchar) => Value::Varchar(b.to_string()),
            (Value::Bigint(v), DataType::Bigint) => Value::Bigint(*v),
            (Value::Bigint(v), DataType::Double) => Value::Double(*v as f64),
            (Value::Bigint(v), DataType::Timestamp) => Value::Timestamp(*v),
            (Value::Bigint(v), DataType::Varchar) => Value::Varchar(v.to_string()),
            (Value::Double(v), DataType::Double) => Value::Double(*v),
            (Value::Double(v), DataType::Bigint) => Value::Bigint(v.round() as i64),
            (Value::Double(v), DataType::Varchar) => Value::Varchar(v.to_string()),
            (Value::Timestamp(v), DataType::Timestamp) => Value::Timestamp(*v),
            (Value::Timestamp(v), DataType::Bigint) => Value::Bigint(*v),
            (Value::Timestamp(_), DataType::Varchar) => Value::Varchar(self.to_string()),
            (Value::Varchar(s), DataType::Varchar) => Value::Varchar(s.clone()),
            (Value::Varchar(s), DataType::Bigint) => Value::Bigint(s.trim().parse().ok()?),
            (Value::Varchar(s), DataType::Double) => Value::Double(s.trim().parse().ok()?),
            (Value::Varchar(s), DataType::Boolean) => Value::Boolean(s.trim().parse().ok()?),
            (Value::Varchar(s), DataType::Timestamp) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(nanos) => Value::Timestamp(nanos),
                    Err(_) => Value::Timestamp(
                        DateTime::parse_from_rfc3339(s).ok()?.timestamp_nanos_opt()?,
                    ),
                }
            }
            _ => return None,
        };
        Some(value)
    }

    /// SQL comparison; `None` when either side is null or the types are incomparable
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            (Value::Double(_), _) | (_, Value::Double(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => Some(self.as_i64()?.cmp(&other.as_i64()?)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Bigint(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Varchar(s) => write!(f, "{}", s),
            Value::Timestamp(nanos) => {
                write!(f, "{}", DateTime::from_timestamp_nanos(*nanos).to_rfc3339())
            }
        }
    }
}

/// Hashable wrapper used for grouping and join keys.
///
/// Doubles hash and compare by bit pattern so that `NaN` groups with itself.
#[derive(Debug, Clone)]
pub struct HashKey(pub Vec<Value>);

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| match (a, b) {
                (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
                _ => a == b,
            })
    }
}

impl Eq for HashKey {}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            std::mem::discriminant(value).hash(state);
            match value {
                Value::Null => {}
                Value::Boolean(b) => b.hash(state),
                Value::Bigint(v) | Value::Timestamp(v) => v.hash(state),
                Value::Double(v) => v.to_bits().hash(state),
                Value::Varchar(s) => s.hash(state),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_super_type() {
        assert_eq!(
            DataType::common_super_type(DataType::Bigint, DataType::Double),
            Some(DataType::Double)
        );
        assert_eq!(
            DataType::common_super_type(DataType::Varchar, DataType::Varchar),
            Some(DataType::Varchar)
        );
        assert_eq!(DataType::common_super_type(DataType::Varchar, DataType::Bigint), None);
    }

    #[test]
    fn test_value_cast() {
        assert_eq!(Value::Bigint(3).cast(DataType::Double), Some(Value::Double(3.0)));
        assert_eq!(
            Value::Varchar("42".to_string()).cast(DataType::Bigint),
            Some(Value::Bigint(42))
        );
        assert_eq!(
            Value::Varchar("1970-01-01T00:00:01Z".to_string()).cast(DataType::Timestamp),
            Some(Value::Timestamp(1_000_000_000))
        );
        assert_eq!(Value::Varchar("abc".to_string()).cast(DataType::Bigint), None);
        assert_eq!(Value::Null.cast(DataType::Bigint), Some(Value::Null));
    }

    #[test]
    fn test_sql_cmp_mixed_numeric() {
        assert_eq!(Value::Bigint(2).sql_cmp(&Value::Double(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.sql_cmp(&Value::Bigint(1)), None);
        assert_eq!(Value::Varchar("a".into()).sql_cmp(&Value::Bigint(1)), None);
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Value::Timestamp(0).to_string(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_hash_key_nan_groups_with_itself() {
        use std::collections::HashSet;
        let mut keys = HashSet::new();
        keys.insert(HashKey(vec![Value::Double(f64::NAN)]));
        keys.insert(HashKey(vec![Value::Double(f64::NAN)]));
        assert_eq!(keys.len(), 1);
    }
}

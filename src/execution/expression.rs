use std::cmp::Ordering;

use thiserror::Error;

use crate::page::{Block, BlockBuilder, DataType, Page, PageError, Value};
use crate::query::plan::{ArithmeticOperator, ComparisonOperator, Expression, Symbol};

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("Symbol {0} is not in the input layout")]
    UnknownSymbol(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Arithmetic overflow")]
    Overflow,
    #[error("Cannot cast {value} to {target}")]
    InvalidCast { value: String, target: DataType },
    #[error("Operands {0} are not supported")]
    UnsupportedOperands(String),
    #[error("Page error: {0}")]
    Page(#[from] PageError),
}

/// An expression bound to input channels of a page
#[derive(Debug, Clone)]
pub enum PhysicalExpr {
    Input {
        channel: usize,
        data_type: DataType,
    },
    Literal(Value, DataType),
    Comparison {
        op: ComparisonOperator,
        left: Box<PhysicalExpr>,
        right: Box<PhysicalExpr>,
    },
    Arithmetic {
        op: ArithmeticOperator,
        left: Box<PhysicalExpr>,
        right: Box<PhysicalExpr>,
        data_type: DataType,
    },
    And(Box<PhysicalExpr>, Box<PhysicalExpr>),
    Or(Box<PhysicalExpr>, Box<PhysicalExpr>),
    Not(Box<PhysicalExpr>),
    Negate(Box<PhysicalExpr>),
    IsNull(Box<PhysicalExpr>),
    Cast {
        expr: Box<PhysicalExpr>,
        data_type: DataType,
    },
}

impl PhysicalExpr {
    /// Binds every symbol reference to its position in `layout`
    pub fn compile(expression: &Expression, layout: &[Symbol]) -> Result<PhysicalExpr, ExpressionError> {
        let compile = |e: &Expression| PhysicalExpr::compile(e, layout).map(Box::new);
        let compiled = match expression {
            Expression::SymbolReference(symbol) => {
                let channel = layout
                    .iter()
                    .position(|s| s == symbol)
                    .ok_or_else(|| ExpressionError::UnknownSymbol(symbol.name().to_string()))?;
                PhysicalExpr::Input {
                    channel,
                    data_type: layout[channel].data_type(),
                }
            }
            Expression::Literal { value, data_type } => PhysicalExpr::Literal(value.clone(), *data_type),
            Expression::Comparison { op, left, right } => PhysicalExpr::Comparison {
                op: *op,
                left: compile(left)?,
                right: compile(right)?,
            },
            Expression::Arithmetic {
                op,
                left,
                right,
                data_type,
            } => PhysicalExpr::Arithmetic {
                op: *op,
                left: compile(left)?,
                right: compile(right)?,
                data_type: *data_type,
            },
            Expression::And(left, right) => PhysicalExpr::And(compile(left)?, compile(right)?),
            Expression::Or(left, right) => PhysicalExpr::Or(compile(left)?, compile(right)?),
            Expression::Not(expr) => PhysicalExpr::Not(compile(expr)?),
            Expression::Negate(expr) => PhysicalExpr::Negate(compile(expr)?),
            Expression::IsNull(expr) => PhysicalExpr::IsNull(compile(expr)?),
            Expression::Cast { expr, data_type } => PhysicalExpr::Cast {
                expr: compile(expr)?,
                data_type: *data_type,
            },
        };
        Ok(compiled)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PhysicalExpr::Input { data_type, .. } => *data_type,
            PhysicalExpr::Literal(_, data_type) => *data_type,
            PhysicalExpr::Comparison { .. }
            | PhysicalExpr::And(..)
            | PhysicalExpr::Or(..)
            | PhysicalExpr::Not(_)
            | PhysicalExpr::IsNull(_) => DataType::Boolean,
            PhysicalExpr::Arithmetic { data_type, .. } => *data_type,
            PhysicalExpr::Negate(expr) => expr.data_type(),
            PhysicalExpr::Cast { data_type, .. } => *data_type,
        }
    }

    /// Evaluates the expression for every row of `page`
    pub fn evaluate(&self, page: &Page) -> Result<Block, ExpressionError> {
        if let PhysicalExpr::Input { channel, .. } = self {
            return Ok(page.column(*channel).block().clone());
        }
        let mut builder = BlockBuilder::with_capacity(self.data_type(), page.num_rows());
        for row in 0..page.num_rows() {
            builder.push(self.evaluate_row(page, row)?)?;
        }
        Ok(builder.build())
    }

    /// Evaluates a predicate; rows where it is null or false are dropped
    pub fn evaluate_mask(&self, page: &Page) -> Result<Vec<bool>, ExpressionError> {
        (0..page.num_rows())
            .map(|row| Ok(self.evaluate_row(page, row)?.as_bool().unwrap_or(false)))
            .collect()
    }

    pub fn evaluate_row(&self, page: &Page, row: usize) -> Result<Value, ExpressionError> {
        match self {
            PhysicalExpr::Input { channel, .. } => Ok(page.column(*channel).get(row)),
            PhysicalExpr::Literal(value, _) => Ok(value.clone()),
            PhysicalExpr::Comparison { op, left, right } => {
                let left = left.evaluate_row(page, row)?;
                let right = right.evaluate_row(page, row)?;
                Ok(compare(*op, &left, &right))
            }
            PhysicalExpr::Arithmetic {
                op,
                left,
                right,
                data_type,
            } => {
                let left = left.evaluate_row(page, row)?;
                let right = right.evaluate_row(page, row)?;
                arithmetic(*op, &left, &right, *data_type)
            }
            PhysicalExpr::And(left, right) => {
                let left = left.evaluate_row(page, row)?.as_bool();
                if left == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let right = right.evaluate_row(page, row)?.as_bool();
                Ok(match (left, right) {
                    (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            }
            PhysicalExpr::Or(left, right) => {
                let left = left.evaluate_row(page, row)?.as_bool();
                if left == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let right = right.evaluate_row(page, row)?.as_bool();
                Ok(match (left, right) {
                    (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            PhysicalExpr::Not(expr) => Ok(match expr.evaluate_row(page, row)?.as_bool() {
                Some(b) => Value::Boolean(!b),
                None => Value::Null,
            }),
            PhysicalExpr::Negate(expr) => match expr.evaluate_row(page, row)? {
                Value::Null => Ok(Value::Null),
                Value::Bigint(v) => v.checked_neg().map(Value::Bigint).ok_or(ExpressionError::Overflow),
                Value::Double(v) => Ok(Value::Double(-v)),
                other => Err(ExpressionError::UnsupportedOperands(format!("-{}", other))),
            },
            PhysicalExpr::IsNull(expr) => Ok(Value::Boolean(expr.evaluate_row(page, row)?.is_null())),
            PhysicalExpr::Cast { expr, data_type } => {
                let value = expr.evaluate_row(page, row)?;
                value.cast(*data_type).ok_or_else(|| ExpressionError::InvalidCast {
                    value: value.to_string(),
                    target: *data_type,
                })
            }
        }
    }
}

fn compare(op: ComparisonOperator, left: &Value, right: &Value) -> Value {
    let Some(ordering) = left.sql_cmp(right) else {
        return Value::Null;
    };
    let result = match op {
        ComparisonOperator::Eq => ordering == Ordering::Equal,
        ComparisonOperator::NotEq => ordering != Ordering::Equal,
        ComparisonOperator::Lt => ordering == Ordering::Less,
        ComparisonOperator::LtEq => ordering != Ordering::Greater,
        ComparisonOperator::Gt => ordering == Ordering::Greater,
        ComparisonOperator::GtEq => ordering != Ordering::Less,
    };
    Value::Boolean(result)
}

fn arithmetic(
    op: ArithmeticOperator,
    left: &Value,
    right: &Value,
    data_type: DataType,
) -> Result<Value, ExpressionError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let unsupported = || ExpressionError::UnsupportedOperands(format!("{} {} {}", left, op, right));
    match data_type {
        DataType::Double => {
            let (l, r) = (left.as_f64().ok_or_else(unsupported)?, right.as_f64().ok_or_else(unsupported)?);
            let value = match op {
                ArithmeticOperator::Add => l + r,
                ArithmeticOperator::Subtract => l - r,
                ArithmeticOperator::Multiply => l * r,
                ArithmeticOperator::Divide => {
                    if r == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    l / r
                }
                ArithmeticOperator::Modulus => {
                    if r == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    l % r
                }
            };
            Ok(Value::Double(value))
        }
        DataType::Bigint | DataType::Timestamp => {
            let (l, r) = (left.as_i64().ok_or_else(unsupported)?, right.as_i64().ok_or_else(unsupported)?);
            let value = match op {
                ArithmeticOperator::Add => l.checked_add(r),
                ArithmeticOperator::Subtract => l.checked_sub(r),
                ArithmeticOperator::Multiply => l.checked_mul(r),
                ArithmeticOperator::Divide | ArithmeticOperator::Modulus if r == 0 => {
                    return Err(ExpressionError::DivisionByZero)
                }
                ArithmeticOperator::Divide => l.checked_div(r),
                ArithmeticOperator::Modulus => l.checked_rem(r),
            }
            .ok_or(ExpressionError::Overflow)?;
            Ok(if data_type == DataType::Timestamp {
                Value::Timestamp(value)
            } else {
                Value::Bigint(value)
            })
        }
        _ => Err(unsupported()),
    }
}

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::symbol::Symbol;
use crate::page::{DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::NotEq => "<>",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::LtEq => "<=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::GtEq => ">=",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl fmt::Display for ArithmeticOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
            ArithmeticOperator::Modulus => "%",
        };
        f.write_str(op)
    }
}

/// Row expression over symbols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    SymbolReference(Symbol),
    Literal {
        value: Value,
        data_type: DataType,
    },
    Comparison {
        op: ComparisonOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arithmetic {
        op: ArithmeticOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        data_type: DataType,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Negate(Box<Expression>),
    IsNull(Box<Expression>),
    Cast {
        expr: Box<Expression>,
        data_type: DataType,
    },
}

impl Expression {
    pub fn literal(value: Value, data_type: DataType) -> Self {
        Expression::Literal { value, data_type }
    }

    pub fn comparison(op: ComparisonOperator, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn arithmetic(
        op: ArithmeticOperator,
        left: Expression,
        right: Expression,
        data_type: DataType,
    ) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
            data_type,
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And(Box::new(left), Box::new(right))
    }

    pub fn is_null(expr: Expression) -> Self {
        Expression::IsNull(Box::new(expr))
    }

    pub fn cast(expr: Expression, data_type: DataType) -> Self {
        if expr.data_type() == data_type {
            return expr;
        }
        Expression::Cast {
            expr: Box::new(expr),
            data_type,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Expression::SymbolReference(symbol) => symbol.data_type(),
            Expression::Literal { data_type, .. } => *data_type,
            Expression::Comparison { .. }
            | Expression::And(..)
            | Expression::Or(..)
            | Expression::Not(_)
            | Expression::IsNull(_) => DataType::Boolean,
            Expression::Arithmetic { data_type, .. } => *data_type,
            Expression::Negate(expr) => expr.data_type(),
            Expression::Cast { data_type, .. } => *data_type,
        }
    }

    /// Returns the symbol if this is a bare symbol reference
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Expression::SymbolReference(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::SymbolReference(_) | Expression::Literal { .. } => Vec::new(),
            Expression::Comparison { left, right, .. }
            | Expression::Arithmetic { left, right, .. }
            | Expression::And(left, right)
            | Expression::Or(left, right) => vec![left, right],
            Expression::Not(expr)
            | Expression::Negate(expr)
            | Expression::IsNull(expr)
            | Expression::Cast { expr, .. } => vec![expr],
        }
    }

    /// Collects every symbol the expression references
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        if let Expression::SymbolReference(symbol) = self {
            out.insert(symbol.clone());
        }
        for child in self.children() {
            child.collect_symbols(out);
        }
    }

    /// Rebuilds the expression, replacing every symbol reference with `f(symbol)`
    pub fn rewrite_symbols(&self, f: &dyn Fn(&Symbol) -> Expression) -> Expression {
        match self {
            Expression::SymbolReference(symbol) => f(symbol),
            Expression::Literal { .. } => self.clone(),
            Expression::Comparison { op, left, right } => Expression::Comparison {
                op: *op,
                left: Box::new(left.rewrite_symbols(f)),
                right: Box::new(right.rewrite_symbols(f)),
            },
            Expression::Arithmetic {
                op,
                left,
                right,
                data_type,
            } => Expression::Arithmetic {
                op: *op,
                left: Box::new(left.rewrite_symbols(f)),
                right: Box::new(right.rewrite_symbols(f)),
                data_type: *data_type,
            },
            Expression::And(left, right) => {
                Expression::And(Box::new(left.rewrite_symbols(f)), Box::new(right.rewrite_symbols(f)))
            }
            Expression::Or(left, right) => {
                Expression::Or(Box::new(left.rewrite_symbols(f)), Box::new(right.rewrite_symbols(f)))
            }
            Expression::Not(expr) => Expression::Not(Box::new(expr.rewrite_symbols(f))),
            Expression::Negate(expr) => Expression::Negate(Box::new(expr.rewrite_symbols(f))),
            Expression::IsNull(expr) => Expression::IsNull(Box::new(expr.rewrite_symbols(f))),
            Expression::Cast { expr, data_type } => Expression::Cast {
                expr: Box::new(expr.rewrite_symbols(f)),
                data_type: *data_type,
            },
        }
    }

    /// Splits a predicate into its top-level conjuncts
    pub fn conjuncts(&self) -> Vec<Expression> {
        match self {
            Expression::And(left, right) => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other.clone()],
        }
    }

    /// Joins predicates with AND; `None` for an empty list
    pub fn combine_conjuncts(conjuncts: Vec<Expression>) -> Option<Expression> {
        conjuncts.into_iter().reduce(Expression::and)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::SymbolReference(symbol) => write!(f, "{}", symbol),
            Expression::Literal {
                value: Value::Varchar(s),
                ..
            } => write!(f, "'{}'", s),
            Expression::Literal { value, .. } => write!(f, "{}", value),
            Expression::Comparison { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expression::Arithmetic { op, left, right, .. } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::And(left, right) => write!(f, "({} AND {})", left, right),
            Expression::Or(left, right) => write!(f, "({} OR {})", left, right),
            Expression::Not(expr) => write!(f, "(NOT {})", expr),
            Expression::Negate(expr) => write!(f, "(-{})", expr),
            Expression::IsNull(expr) => write!(f, "({} IS NULL)", expr),
            Expression::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
        }
    }
}

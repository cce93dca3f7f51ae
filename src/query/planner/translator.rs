use std::collections::HashMap;

use crate::page::{DataType, Value};
use crate::query::analyzer::expression::{arithmetic_type, comparison_type};
use crate::query::analyzer::{Analysis, FieldId};
use crate::query::ast::{BinaryOperator, Expr, Literal};
use crate::query::plan::{ArithmeticOperator, ComparisonOperator, Expression, PlanningError, Symbol};

/// Rewrites analyzed AST expressions into plan expressions over symbols.
///
/// Whole subexpressions (grouping keys, aggregate calls) can be mapped directly,
/// which is how expressions above an aggregation refer to its outputs.
pub struct TranslationMap<'a, 'b> {
    analysis: &'b Analysis<'a>,
    fields: HashMap<FieldId, Symbol>,
    expressions: Vec<(&'a Expr, Expression)>,
}

impl<'a, 'b> TranslationMap<'a, 'b> {
    pub fn new(analysis: &'b Analysis<'a>, fields: HashMap<FieldId, Symbol>) -> Self {
        Self {
            analysis,
            fields,
            expressions: Vec::new(),
        }
    }

    pub fn field_symbol(&self, field: FieldId) -> Option<&Symbol> {
        self.fields.get(&field)
    }

    /// Maps every expression equivalent to `expr` to `translation`
    pub fn put_expression(&mut self, expr: &'a Expr, translation: Expression) {
        self.expressions.push((expr, translation));
    }

    pub fn translate(&self, expr: &'a Expr) -> Result<Expression, PlanningError> {
        if let Some((_, mapped)) = self
            .expressions
            .iter()
            .find(|(candidate, _)| self.analysis.is_equivalent(*candidate, expr))
        {
            return Ok(mapped.clone());
        }

        let translated = match expr {
            Expr::Identifier(parts) => {
                let field = self
                    .analysis
                    .column_reference(expr)
                    .ok_or_else(|| PlanningError::Internal(format!("unresolved column {}", parts.join("."))))?;
                self.fields
                    .get(&field)
                    .map(Symbol::to_reference)
                    .ok_or_else(|| PlanningError::Internal(format!("no symbol for column {}", parts.join("."))))?
            }
            Expr::Literal(literal) => translate_literal(literal),
            Expr::Binary { left, op, right } => {
                let l = self.translate(left)?;
                let r = self.translate(right)?;
                self.translate_binary(expr, *op, l, r)?
            }
            Expr::Not(inner) => Expression::Not(Box::new(self.translate(inner)?)),
            Expr::Negate(inner) => Expression::Negate(Box::new(self.translate(inner)?)),
            Expr::IsNull { expr: inner, negated } => {
                let test = Expression::is_null(self.translate(inner)?);
                if *negated {
                    Expression::Not(Box::new(test))
                } else {
                    test
                }
            }
            Expr::Cast { expr: inner, data_type } => {
                let target = DataType::parse(data_type)
                    .ok_or_else(|| PlanningError::Internal(format!("unknown type {}", data_type)))?;
                coerce(self.translate(inner)?, target)
            }
            Expr::Function(_) => {
                return Err(PlanningError::Internal(format!(
                    "aggregate {} is not available at this point of the plan",
                    expr
                )))
            }
        };
        Ok(translated)
    }

    fn translate_binary(
        &self,
        expr: &Expr,
        op: BinaryOperator,
        left: Expression,
        right: Expression,
    ) -> Result<Expression, PlanningError> {
        let mismatch = || PlanningError::Internal(format!("operand types of {} do not match", expr));
        let (lt, rt) = (operand_type(&left), operand_type(&right));

        if op.is_logical() {
            let left = coerce(left, DataType::Boolean);
            let right = coerce(right, DataType::Boolean);
            return Ok(match op {
                BinaryOperator::And => Expression::And(Box::new(left), Box::new(right)),
                _ => Expression::Or(Box::new(left), Box::new(right)),
            });
        }

        if op.is_comparison() {
            let target = match (lt, rt) {
                (Some(l), Some(r)) => comparison_type(l, r).ok_or_else(mismatch)?,
                (Some(t), None) | (None, Some(t)) => t,
                (None, None) => DataType::Bigint,
            };
            let op = match op {
                BinaryOperator::Eq => ComparisonOperator::Eq,
                BinaryOperator::NotEq => ComparisonOperator::NotEq,
                BinaryOperator::Lt => ComparisonOperator::Lt,
                BinaryOperator::LtEq => ComparisonOperator::LtEq,
                BinaryOperator::Gt => ComparisonOperator::Gt,
                _ => ComparisonOperator::GtEq,
            };
            return Ok(Expression::comparison(op, coerce(left, target), coerce(right, target)));
        }

        let result = match (lt, rt) {
            (Some(l), Some(r)) => arithmetic_type(op, l, r).ok_or_else(mismatch)?,
            (Some(t), None) | (None, Some(t)) => t,
            (None, None) => DataType::Bigint,
        };
        let operand = if result == DataType::Double {
            DataType::Double
        } else {
            DataType::Bigint
        };
        let (left, right) = match (lt, rt) {
            // timestamps take part in arithmetic as raw nanoseconds
            (Some(DataType::Timestamp), _) | (_, Some(DataType::Timestamp)) => (left, right),
            _ => (coerce(left, operand), coerce(right, operand)),
        };
        let op = match op {
            BinaryOperator::Plus => ArithmeticOperator::Add,
            BinaryOperator::Minus => ArithmeticOperator::Subtract,
            BinaryOperator::Multiply => ArithmeticOperator::Multiply,
            BinaryOperator::Divide => ArithmeticOperator::Divide,
            _ => ArithmeticOperator::Modulus,
        };
        Ok(Expression::arithmetic(op, left, right, result))
    }
}

fn translate_literal(literal: &Literal) -> Expression {
    match literal {
        // typed by the surrounding expression through coerce()
        Literal::Null => Expression::literal(Value::Null, DataType::Bigint),
        Literal::Boolean(b) => Expression::literal(Value::Boolean(*b), DataType::Boolean),
        Literal::Integer(v) => Expression::literal(Value::Bigint(*v), DataType::Bigint),
        Literal::Float(v) => Expression::literal(Value::Double(*v), DataType::Double),
        Literal::String(s) => Expression::literal(Value::Varchar(s.clone()), DataType::Varchar),
    }
}

/// Type of an operand, `None` for a NULL literal
fn operand_type(expression: &Expression) -> Option<DataType> {
    match expression {
        Expression::Literal { value: Value::Null, .. } => None,
        other => Some(other.data_type()),
    }
}

/// Converts an expression to `target`, retyping NULL literals and folding constant casts
pub fn coerce(expression: Expression, target: DataType) -> Expression {
    match expression {
        Expression::Literal { value, data_type } if data_type != target => match value.cast(target) {
            Some(value) => Expression::literal(value, target),
            None => Expression::cast(Expression::literal(value, data_type), target),
        },
        other => Expression::cast(other, target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_folds_literals() {
        let folded = coerce(
            Expression::literal(Value::Varchar("1970-01-01T00:00:01Z".into()), DataType::Varchar),
            DataType::Timestamp,
        );
        assert_eq!(folded, Expression::literal(Value::Timestamp(1_000_000_000), DataType::Timestamp));

        let null = coerce(Expression::literal(Value::Null, DataType::Bigint), DataType::Varchar);
        assert_eq!(null, Expression::literal(Value::Null, DataType::Varchar));

        let column = Symbol::new("x", DataType::Bigint).to_reference();
        assert_eq!(coerce(column.clone(), DataType::Double).data_type(), DataType::Double);
        assert_eq!(coerce(column.clone(), DataType::Bigint), column);
    }
}

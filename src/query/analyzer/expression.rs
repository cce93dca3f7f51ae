use super::analysis::{AggregateAnalysis, Analysis};
use super::scope::{Resolution, Scope};
use super::AnalysisError;
use crate::page::DataType;
use crate::query::ast::{BinaryOperator, Expr, Literal};
use crate::query::functions::FunctionRegistry;

/// Type an operand is coerced to when compared against another; a string literal
/// compared to a timestamp is read as a timestamp
pub fn comparison_type(left: DataType, right: DataType) -> Option<DataType> {
    match (left, right) {
        (DataType::Timestamp, DataType::Varchar) | (DataType::Varchar, DataType::Timestamp) => {
            Some(DataType::Timestamp)
        }
        (l, r) => DataType::common_super_type(l, r),
    }
}

/// Result type of an arithmetic operator, if the operands support it
pub fn arithmetic_type(op: BinaryOperator, left: DataType, right: DataType) -> Option<DataType> {
    match (left, right) {
        (DataType::Timestamp, DataType::Bigint) | (DataType::Bigint, DataType::Timestamp)
            if matches!(op, BinaryOperator::Plus | BinaryOperator::Minus) =>
        {
            Some(DataType::Timestamp)
        }
        (DataType::Timestamp, DataType::Timestamp) if op == BinaryOperator::Minus => Some(DataType::Bigint),
        (l, r) if l.is_numeric() && r.is_numeric() => DataType::common_super_type(l, r),
        _ => None,
    }
}

/// Where aggregate calls may appear in the expression being analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AggregateContext {
    Allowed,
    Forbidden(&'static str),
}

/// Resolves and types one expression tree, recording results into the analysis.
///
/// Types are `None` only for a NULL literal, which is compatible with everything.
pub(super) struct ExpressionAnalyzer<'a, 'b, 'p> {
    analysis: &'b mut Analysis<'a>,
    functions: &'b FunctionRegistry,
    scope: &'b Scope<'p>,
    context: AggregateContext,
    in_aggregate: bool,
    aggregates: Vec<AggregateAnalysis<'a>>,
}

impl<'a, 'b, 'p> ExpressionAnalyzer<'a, 'b, 'p> {
    pub(super) fn new(
        analysis: &'b mut Analysis<'a>,
        functions: &'b FunctionRegistry,
        scope: &'b Scope<'p>,
        context: AggregateContext,
    ) -> Self {
        Self {
            analysis,
            functions,
            scope,
            context,
            in_aggregate: false,
            aggregates: Vec::new(),
        }
    }

    pub(super) fn into_aggregates(self) -> Vec<AggregateAnalysis<'a>> {
        self.aggregates
    }

    pub(super) fn analyze(&mut self, expr: &'a Expr) -> Result<Option<DataType>, AnalysisError> {
        let data_type = match expr {
            Expr::Identifier(parts) => match self.scope.resolve(parts)? {
                Some(Resolution::Local(id)) => {
                    self.analysis.set_column_reference(expr, id);
                    Some(self.analysis.field(id).data_type)
                }
                Some(Resolution::Outer(_)) => return Err(AnalysisError::CorrelatedReference(parts.join("."))),
                None => return Err(AnalysisError::UnknownColumn(parts.join("."))),
            },
            Expr::Literal(literal) => match literal {
                Literal::Null => None,
                Literal::Boolean(_) => Some(DataType::Boolean),
                Literal::Integer(_) => Some(DataType::Bigint),
                Literal::Float(_) => Some(DataType::Double),
                Literal::String(_) => Some(DataType::Varchar),
            },
            Expr::Binary { left, op, right } => {
                let l = self.analyze(left)?;
                let r = self.analyze(right)?;
                self.binary_type(expr, *op, l, r)?
            }
            Expr::Not(inner) => {
                let t = self.analyze(inner)?;
                self.expect_boolean(inner, t)?;
                Some(DataType::Boolean)
            }
            Expr::Negate(inner) => match self.analyze(inner)? {
                Some(t) if t.is_numeric() => Some(t),
                None => None,
                Some(t) => return Err(AnalysisError::TypeMismatch(format!("cannot negate {} of type {}", inner, t))),
            },
            Expr::IsNull { expr: inner, .. } => {
                self.analyze(inner)?;
                Some(DataType::Boolean)
            }
            Expr::Cast { expr: inner, data_type } => {
                self.analyze(inner)?;
                Some(DataType::parse(data_type).ok_or_else(|| AnalysisError::UnsupportedType(data_type.clone()))?)
            }
            Expr::Function(call) => {
                if !self.functions.is_aggregate(&call.name) {
                    return Err(AnalysisError::UnknownFunction(call.name.clone()));
                }
                if let AggregateContext::Forbidden(clause) = self.context {
                    return Err(AnalysisError::InvalidAggregate(format!(
                        "{} is not allowed in {}",
                        expr, clause
                    )));
                }
                if self.in_aggregate {
                    return Err(AnalysisError::InvalidAggregate(format!("nested aggregate {}", expr)));
                }
                self.in_aggregate = true;
                let mut argument_type = None;
                for arg in &call.args {
                    argument_type = self.analyze(arg)?;
                }
                self.in_aggregate = false;

                let resolved = self.functions.resolve(call, argument_type)?;
                self.aggregates.push(AggregateAnalysis {
                    expr,
                    call,
                    kind: resolved.kind,
                    argument: call.args.first(),
                    output_type: resolved.output_type,
                });
                Some(resolved.output_type)
            }
        };
        if let Some(data_type) = data_type {
            self.analysis.set_type(expr, data_type);
        }
        Ok(data_type)
    }

    fn binary_type(
        &self,
        expr: &Expr,
        op: BinaryOperator,
        left: Option<DataType>,
        right: Option<DataType>,
    ) -> Result<Option<DataType>, AnalysisError> {
        let mismatch = || {
            AnalysisError::TypeMismatch(format!(
                "{} cannot be applied to {} and {} in {}",
                op,
                left.map_or("null".to_string(), |t| t.to_string()),
                right.map_or("null".to_string(), |t| t.to_string()),
                expr
            ))
        };
        if op.is_logical() {
            for t in [left, right].into_iter().flatten() {
                if t != DataType::Boolean {
                    return Err(mismatch());
                }
            }
            return Ok(Some(DataType::Boolean));
        }
        if op.is_comparison() {
            if let (Some(l), Some(r)) = (left, right) {
                comparison_type(l, r).ok_or_else(mismatch)?;
            }
            return Ok(Some(DataType::Boolean));
        }
        match (left, right) {
            (Some(l), Some(r)) => arithmetic_type(op, l, r).map(Some).ok_or_else(mismatch),
            (Some(t), None) | (None, Some(t)) if t.is_numeric() || t == DataType::Timestamp => Ok(Some(t)),
            (None, None) => Ok(None),
            _ => Err(mismatch()),
        }
    }

    fn expect_boolean(&self, expr: &Expr, data_type: Option<DataType>) -> Result<(), AnalysisError> {
        match data_type {
            None | Some(DataType::Boolean) => Ok(()),
            Some(other) => Err(AnalysisError::TypeMismatch(format!(
                "{} must be boolean, got {}",
                expr, other
            ))),
        }
    }
}

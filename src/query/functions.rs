use std::collections::HashMap;

use crate::page::DataType;
use crate::query::analyzer::AnalysisError;
use crate::query::ast::FunctionCall;

/// Aggregate functions known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    CountAll,
    Count,
    Sum,
    Min,
    Max,
    /// Lowered by the planner into sum / count
    Avg,
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub kind: AggregateKind,
    pub arity: usize,
}

/// A call matched against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAggregate {
    pub kind: AggregateKind,
    pub output_type: DataType,
}

/// Registry of callable functions, owned by each engine instance
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Vec<FunctionSignature>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        // Add built-in aggregates
        registry.register("count", AggregateKind::CountAll, 0);
        registry.register("count", AggregateKind::Count, 1);
        registry.register("sum", AggregateKind::Sum, 1);
        registry.register("min", AggregateKind::Min, 1);
        registry.register("max", AggregateKind::Max, 1);
        registry.register("avg", AggregateKind::Avg, 1);
        registry
    }

    pub fn register(&mut self, name: &str, kind: AggregateKind, arity: usize) {
        self.functions
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(FunctionSignature {
                name: name.to_ascii_lowercase(),
                kind,
                arity,
            });
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    /// Matches a call by name and arity and derives its output type from the argument type.
    /// `argument` is `None` for `count(*)` and for a NULL literal argument.
    pub fn resolve(&self, call: &FunctionCall, argument: Option<DataType>) -> Result<ResolvedAggregate, AnalysisError> {
        let name = call.name.to_ascii_lowercase();
        let signatures = self
            .functions
            .get(&name)
            .ok_or_else(|| AnalysisError::UnknownFunction(call.name.clone()))?;

        let arity = if call.star { 0 } else { call.args.len() };
        let signature = signatures.iter().find(|s| s.arity == arity).ok_or_else(|| {
            AnalysisError::InvalidArgumentCount {
                function: name.clone(),
                expected: signatures[0].arity.max(1),
                actual: arity,
            }
        })?;

        let output_type = match (signature.kind, argument) {
            (AggregateKind::CountAll | AggregateKind::Count, _) => DataType::Bigint,
            (AggregateKind::Sum, Some(DataType::Bigint)) => DataType::Bigint,
            (AggregateKind::Sum, Some(DataType::Double)) | (AggregateKind::Avg, Some(DataType::Bigint | DataType::Double)) => {
                DataType::Double
            }
            (AggregateKind::Sum | AggregateKind::Avg, None) => DataType::Double,
            (AggregateKind::Sum | AggregateKind::Avg, Some(other)) => {
                return Err(AnalysisError::TypeMismatch(format!(
                    "{} cannot be applied to {}",
                    name, other
                )))
            }
            (AggregateKind::Min | AggregateKind::Max, Some(data_type)) => data_type,
            (AggregateKind::Min | AggregateKind::Max, None) => DataType::Bigint,
        };
        Ok(ResolvedAggregate {
            kind: signature.kind,
            output_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Expr;

    fn call(expr: Expr) -> FunctionCall {
        match expr {
            Expr::Function(call) => call,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_resolves_builtin_aggregates() {
        let registry = FunctionRegistry::new();
        let count = registry.resolve(&call(Expr::count_star()), None).unwrap();
        assert_eq!(count.kind, AggregateKind::CountAll);

        let sum = registry
            .resolve(&call(Expr::function("SUM", vec![Expr::column("x")])), Some(DataType::Bigint))
            .unwrap();
        assert_eq!(sum.output_type, DataType::Bigint);

        let avg = registry
            .resolve(&call(Expr::function("avg", vec![Expr::column("x")])), Some(DataType::Bigint))
            .unwrap();
        assert_eq!(avg.output_type, DataType::Double);
    }

    #[test]
    fn test_rejects_unknown_functions_and_arity() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.resolve(&call(Expr::function("rate", vec![Expr::column("x")])), None),
            Err(AnalysisError::UnknownFunction(_))
        ));
        assert!(matches!(
            registry.resolve(&call(Expr::function("sum", vec![])), None),
            Err(AnalysisError::InvalidArgumentCount { .. })
        ));
        assert!(matches!(
            registry.resolve(
                &call(Expr::function("sum", vec![Expr::column("host")])),
                Some(DataType::Varchar)
            ),
            Err(AnalysisError::TypeMismatch(_))
        ));
    }
}

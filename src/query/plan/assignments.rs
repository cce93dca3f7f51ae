use serde::{Deserialize, Serialize};

use super::expression::Expression;
use super::symbol::Symbol;

/// Ordered mapping from output symbol to the expression computing it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignments {
    entries: Vec<(Symbol, Expression)>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assignments that pass each symbol through unchanged
    pub fn identity<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        Self {
            entries: symbols
                .into_iter()
                .map(|s| (s.clone(), s.to_reference()))
                .collect(),
        }
    }

    /// Adds or replaces the assignment for `symbol`
    pub fn put(&mut self, symbol: Symbol, expression: Expression) {
        if let Some(entry) = self.entries.iter_mut().find(|(s, _)| *s == symbol) {
            entry.1 = expression;
        } else {
            self.entries.push((symbol, expression));
        }
    }

    pub fn put_identity(&mut self, symbol: &Symbol) {
        self.put(symbol.clone(), symbol.to_reference());
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Expression> {
        self.entries.iter().find(|(s, _)| s == symbol).map(|(_, e)| e)
    }

    pub fn outputs(&self) -> Vec<Symbol> {
        self.entries.iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
        self.entries.iter().map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Expression)> {
        self.entries.iter().map(|(s, e)| (s, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff every expression is a reference to its own output symbol
    pub fn is_identity(&self) -> bool {
        self.entries
            .iter()
            .all(|(symbol, expression)| expression.as_symbol() == Some(symbol))
    }

    /// Keeps only the assignments whose output satisfies `keep`
    pub fn filter(&self, keep: impl Fn(&Symbol) -> bool) -> Assignments {
        Assignments {
            entries: self
                .entries
                .iter()
                .filter(|(s, _)| keep(s))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<(Symbol, Expression)> for Assignments {
    fn from_iter<T: IntoIterator<Item = (Symbol, Expression)>>(iter: T) -> Self {
        let mut assignments = Assignments::new();
        for (symbol, expression) in iter {
            assignments.put(symbol, expression);
        }
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;
    use crate::query::plan::expression::ArithmeticOperator;

    #[test]
    fn test_identity_detection() {
        let a = Symbol::new("a", DataType::Bigint);
        let b = Symbol::new("b", DataType::Bigint);
        let identity = Assignments::identity([&a, &b]);
        assert!(identity.is_identity());

        let mut renaming = Assignments::new();
        renaming.put(b.clone(), a.to_reference());
        assert!(!renaming.is_identity());

        let mut computed = Assignments::identity([&a]);
        computed.put(
            b.clone(),
            Expression::arithmetic(ArithmeticOperator::Add, a.to_reference(), a.to_reference(), DataType::Bigint),
        );
        assert!(!computed.is_identity());
        assert_eq!(computed.filter(|s| *s == a).outputs(), vec![a]);
    }

    #[test]
    fn test_put_replaces_existing_entry() {
        let a = Symbol::new("a", DataType::Bigint);
        let mut assignments = Assignments::identity([&a]);
        assignments.put(a.clone(), Expression::literal(crate::page::Value::Bigint(1), DataType::Bigint));
        assert_eq!(assignments.len(), 1);
        assert!(!assignments.is_identity());
    }
}

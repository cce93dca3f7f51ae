use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::expression::Expression;
use super::{Aggregation, PlanNodeId};
use crate::page::DataType;

/// A named, typed value slot produced by exactly one plan node.
///
/// Identity is by name only; the type travels along for convenience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    name: String,
    data_type: DataType,
}

impl Symbol {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn to_reference(&self) -> Expression {
        Expression::SymbolReference(self.clone())
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Hands out query-unique symbol names
#[derive(Debug, Default)]
pub struct SymbolAllocator {
    used: HashSet<String>,
    next_suffix: HashMap<String, usize>,
}

impl SymbolAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh symbol whose name is derived from `hint`
    pub fn new_symbol(&mut self, hint: &str, data_type: DataType) -> Symbol {
        let base = sanitize(hint);
        let mut name = base.clone();
        while self.used.contains(&name) {
            let suffix = self.next_suffix.entry(base.clone()).or_insert(0);
            *suffix += 1;
            name = format!("{}_{}", base, suffix);
        }
        self.used.insert(name.clone());
        Symbol::new(name, data_type)
    }

    /// Marks every symbol already present in a plan as taken
    pub fn reserve(&mut self, symbols: impl IntoIterator<Item = Symbol>) {
        for symbol in symbols {
            self.used.insert(symbol.name);
        }
    }
}

fn sanitize(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "expr".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Allocates plan node ids, unique within one query
#[derive(Debug, Default)]
pub struct PlanNodeIdAllocator {
    next: u32,
}

impl PlanNodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues numbering after the largest id already in use
    pub fn starting_after(id: PlanNodeId) -> Self {
        Self { next: id.0 + 1 }
    }

    pub fn next_id(&mut self) -> PlanNodeId {
        let id = PlanNodeId(self.next);
        self.next += 1;
        id
    }
}

/// Renames symbols, leaving unmapped ones untouched
#[derive(Debug, Default, Clone)]
pub struct SymbolMapper {
    mapping: HashMap<Symbol, Symbol>,
}

impl SymbolMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, from: Symbol, to: Symbol) {
        self.mapping.insert(from, to);
    }

    pub fn map(&self, symbol: &Symbol) -> Symbol {
        self.mapping.get(symbol).cloned().unwrap_or_else(|| symbol.clone())
    }

    pub fn map_all(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        symbols.iter().map(|s| self.map(s)).collect()
    }

    pub fn map_expression(&self, expression: &Expression) -> Expression {
        expression.rewrite_symbols(&|symbol| self.map(symbol).to_reference())
    }

    pub fn map_aggregation(&self, aggregation: &Aggregation) -> Aggregation {
        Aggregation {
            function: aggregation.function,
            argument: aggregation.argument.as_ref().map(|a| self.map(a)),
            output_type: aggregation.output_type,
        }
    }
}

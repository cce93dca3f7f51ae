use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::scope::{Field, FieldId};
use crate::page::DataType;
use crate::query::ast::{Expr, FunctionCall, Query, Relation};
use crate::query::functions::AggregateKind;
use crate::spi::{Partitions, TableHandle, TableSchema};

/// Identity-keyed reference to an AST node.
///
/// Two structurally equal expressions at different places in the tree are different keys.
pub struct NodeRef<'a, T>(&'a T);

impl<'a, T> NodeRef<'a, T> {
    pub fn of(node: &'a T) -> Self {
        NodeRef(node)
    }

    pub fn node(&self) -> &'a T {
        self.0
    }
}

impl<T> Clone for NodeRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<'_, T> {}

impl<T> PartialEq for NodeRef<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl<T> Eq for NodeRef<'_, T> {}

impl<T> Hash for NodeRef<'_, T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state)
    }
}

impl<T> fmt::Debug for NodeRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({:p})", self.0)
    }
}

/// A table reference bound to the catalog
#[derive(Debug, Clone)]
pub struct TableAnalysis {
    pub handle: TableHandle,
    pub schema: TableSchema,
    pub partitions: Partitions,
    /// One field per schema column, in schema order
    pub fields: Vec<FieldId>,
}

/// An aggregate call found in a select or having expression
#[derive(Debug, Clone)]
pub struct AggregateAnalysis<'a> {
    pub expr: &'a Expr,
    pub call: &'a FunctionCall,
    pub kind: AggregateKind,
    pub argument: Option<&'a Expr>,
    pub output_type: DataType,
}

#[derive(Debug, Clone)]
pub enum OutputExpr<'a> {
    /// A column expanded from a wildcard
    Field(FieldId),
    Expr(&'a Expr),
}

#[derive(Debug, Clone)]
pub struct OutputColumn<'a> {
    pub name: String,
    pub expr: OutputExpr<'a>,
    pub data_type: DataType,
}

#[derive(Debug, Clone)]
pub struct QueryAnalysis<'a> {
    pub outputs: Vec<OutputColumn<'a>>,
    pub group_by: Vec<&'a Expr>,
    pub aggregates: Vec<AggregateAnalysis<'a>>,
    /// Fields of the relation in FROM, in order
    pub source_fields: Vec<FieldId>,
}

impl QueryAnalysis<'_> {
    pub fn is_aggregated(&self, query: &Query) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty() || query.having.is_some()
    }
}

/// Side tables produced by the analyzer and consumed by the logical planner
#[derive(Debug)]
pub struct Analysis<'a> {
    root: &'a Query,
    fields: Vec<Field>,
    queries: HashMap<NodeRef<'a, Query>, QueryAnalysis<'a>>,
    tables: HashMap<NodeRef<'a, Relation>, TableAnalysis>,
    relation_fields: HashMap<NodeRef<'a, Relation>, Vec<FieldId>>,
    column_references: HashMap<NodeRef<'a, Expr>, FieldId>,
    types: HashMap<NodeRef<'a, Expr>, DataType>,
}

impl<'a> Analysis<'a> {
    pub(super) fn new(root: &'a Query) -> Self {
        Self {
            root,
            fields: Vec::new(),
            queries: HashMap::new(),
            tables: HashMap::new(),
            relation_fields: HashMap::new(),
            column_references: HashMap::new(),
            types: HashMap::new(),
        }
    }

    pub fn root(&self) -> &'a Query {
        self.root
    }

    pub(super) fn add_field(&mut self, field: Field) -> FieldId {
        self.fields.push(field);
        FieldId(self.fields.len() - 1)
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub(super) fn set_query(&mut self, query: &'a Query, analysis: QueryAnalysis<'a>) {
        self.queries.insert(NodeRef::of(query), analysis);
    }

    pub fn query(&self, query: &'a Query) -> Option<&QueryAnalysis<'a>> {
        self.queries.get(&NodeRef::of(query))
    }

    pub(super) fn set_table(&mut self, relation: &'a Relation, table: TableAnalysis) {
        self.tables.insert(NodeRef::of(relation), table);
    }

    pub fn table(&self, relation: &'a Relation) -> Option<&TableAnalysis> {
        self.tables.get(&NodeRef::of(relation))
    }

    pub(super) fn set_relation_fields(&mut self, relation: &'a Relation, fields: Vec<FieldId>) {
        self.relation_fields.insert(NodeRef::of(relation), fields);
    }

    pub fn relation_fields(&self, relation: &'a Relation) -> Option<&[FieldId]> {
        self.relation_fields.get(&NodeRef::of(relation)).map(Vec::as_slice)
    }

    pub(super) fn set_column_reference(&mut self, expr: &'a Expr, field: FieldId) {
        self.column_references.insert(NodeRef::of(expr), field);
    }

    pub fn column_reference(&self, expr: &'a Expr) -> Option<FieldId> {
        self.column_references.get(&NodeRef::of(expr)).copied()
    }

    pub(super) fn set_type(&mut self, expr: &'a Expr, data_type: DataType) {
        self.types.insert(NodeRef::of(expr), data_type);
    }

    pub fn type_of(&self, expr: &'a Expr) -> Option<DataType> {
        self.types.get(&NodeRef::of(expr)).copied()
    }

    /// Structural equality where column references compare by the field they resolve to
    pub fn is_equivalent(&self, left: &'a Expr, right: &'a Expr) -> bool {
        match (left, right) {
            (Expr::Identifier(_), Expr::Identifier(_)) => {
                match (self.column_reference(left), self.column_reference(right)) {
                    (Some(l), Some(r)) => l == r,
                    _ => false,
                }
            }
            (Expr::Literal(l), Expr::Literal(r)) => l == r,
            (
                Expr::Binary { left: ll, op: lop, right: lr },
                Expr::Binary { left: rl, op: rop, right: rr },
            ) => lop == rop && self.is_equivalent(ll, rl) && self.is_equivalent(lr, rr),
            (Expr::Not(l), Expr::Not(r)) | (Expr::Negate(l), Expr::Negate(r)) => self.is_equivalent(l, r),
            (
                Expr::IsNull { expr: l, negated: ln },
                Expr::IsNull { expr: r, negated: rn },
            ) => ln == rn && self.is_equivalent(l, r),
            (
                Expr::Cast { expr: l, data_type: lt },
                Expr::Cast { expr: r, data_type: rt },
            ) => lt.eq_ignore_ascii_case(rt) && self.is_equivalent(l, r),
            (Expr::Function(l), Expr::Function(r)) => {
                l.name.eq_ignore_ascii_case(&r.name)
                    && l.star == r.star
                    && l.args.len() == r.args.len()
                    && l.args.iter().zip(r.args.iter()).all(|(a, b)| self.is_equivalent(a, b))
            }
            _ => false,
        }
    }
}

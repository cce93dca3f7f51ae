//! Binds a parsed query to catalog metadata.
//!
//! The analyzer never rewrites the AST. It records what it learns in side tables
//! (`Analysis`) keyed by node identity, which the logical planner reads back.

pub mod analysis;
pub mod expression;
pub mod scope;

pub use analysis::{AggregateAnalysis, Analysis, NodeRef, OutputColumn, OutputExpr, QueryAnalysis, TableAnalysis};
pub use scope::{Field, FieldId, Scope};

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::page::DataType;
use crate::query::ast::{Expr, Query, Relation, SelectItem};
use crate::query::functions::FunctionRegistry;
use crate::spi::{Metadata, MetadataError};
use expression::{AggregateContext, ExpressionAnalyzer};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Table not found: {0}")]
    UnknownTable(String),
    #[error("Column not found: {0}")]
    UnknownColumn(String),
    #[error("Column reference is ambiguous: {0}")]
    AmbiguousColumn(String),
    #[error("Correlated reference to outer column {0} is not supported")]
    CorrelatedReference(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Function {function} expects {expected} arguments, got {actual}")]
    InvalidArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid aggregate usage: {0}")]
    InvalidAggregate(String),
    #[error("Expression {0} must be an aggregate or appear in GROUP BY")]
    NotGrouped(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// Defaults applied to partially qualified table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub database: String,
    pub namespace: String,
}

impl Session {
    pub fn new(database: &str, namespace: &str) -> Self {
        Self {
            database: database.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new("db", "public")
    }
}

pub struct Analyzer {
    metadata: Arc<dyn Metadata>,
    functions: Arc<FunctionRegistry>,
    session: Session,
}

impl Analyzer {
    pub fn new(metadata: Arc<dyn Metadata>, functions: Arc<FunctionRegistry>, session: Session) -> Self {
        Self {
            metadata,
            functions,
            session,
        }
    }

    pub fn analyze<'a>(&self, query: &'a Query) -> Result<Analysis<'a>, AnalysisError> {
        debug!("Analyzing query with {} select items", query.select.len());
        let mut analysis = Analysis::new(query);
        self.analyze_query(&mut analysis, query, None)?;
        Ok(analysis)
    }

    /// Analyzes a query block and returns the fields it produces
    fn analyze_query<'a>(
        &self,
        analysis: &mut Analysis<'a>,
        query: &'a Query,
        outer: Option<&Scope<'_>>,
    ) -> Result<Vec<scope::FieldId>, AnalysisError> {
        let source_fields = self.analyze_relation(analysis, &query.from, outer)?;
        let scope = Scope::with_fields(
            source_fields
                .iter()
                .map(|id| (*id, analysis.field(*id).clone()))
                .collect(),
            outer,
        );

        if let Some(filter) = &query.filter {
            let mut analyzer = ExpressionAnalyzer::new(
                analysis,
                &self.functions,
                &scope,
                AggregateContext::Forbidden("WHERE"),
            );
            let t = analyzer.analyze(filter)?;
            expect_boolean(filter, t, "WHERE")?;
        }

        let mut group_by = Vec::with_capacity(query.group_by.len());
        for expr in &query.group_by {
            let mut analyzer = ExpressionAnalyzer::new(
                analysis,
                &self.functions,
                &scope,
                AggregateContext::Forbidden("GROUP BY"),
            );
            analyzer.analyze(expr)?;
            group_by.push(expr);
        }

        let mut outputs = Vec::new();
        let mut aggregates = Vec::new();
        for (index, item) in query.select.iter().enumerate() {
            match item {
                SelectItem::Wildcard(qualifier) => {
                    let before = outputs.len();
                    for (id, field) in scope.fields() {
                        let visible = match (qualifier, &field.relation) {
                            (None, _) => true,
                            (Some(q), Some(relation)) => q.eq_ignore_ascii_case(relation),
                            (Some(_), None) => false,
                        };
                        if visible {
                            outputs.push(OutputColumn {
                                name: field.name.clone(),
                                expr: OutputExpr::Field(*id),
                                data_type: field.data_type,
                            });
                        }
                    }
                    if outputs.len() == before {
                        return Err(AnalysisError::UnknownTable(
                            qualifier.clone().unwrap_or_else(|| "*".to_string()),
                        ));
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    let mut analyzer =
                        ExpressionAnalyzer::new(analysis, &self.functions, &scope, AggregateContext::Allowed);
                    let data_type = analyzer.analyze(expr)?.unwrap_or(DataType::Bigint);
                    aggregates.extend(analyzer.into_aggregates());
                    let name = match (alias, expr) {
                        (Some(alias), _) => alias.clone(),
                        (None, Expr::Identifier(parts)) => parts.last().cloned().unwrap_or_default(),
                        (None, _) => format!("_col{}", index),
                    };
                    outputs.push(OutputColumn {
                        name,
                        expr: OutputExpr::Expr(expr),
                        data_type,
                    });
                }
            }
        }

        if let Some(having) = &query.having {
            let mut analyzer = ExpressionAnalyzer::new(analysis, &self.functions, &scope, AggregateContext::Allowed);
            let t = analyzer.analyze(having)?;
            aggregates.extend(analyzer.into_aggregates());
            expect_boolean(having, t, "HAVING")?;
        }

        let query_analysis = QueryAnalysis {
            outputs,
            group_by,
            aggregates,
            source_fields,
        };
        if query_analysis.is_aggregated(query) {
            self.verify_grouping(analysis, query, &query_analysis)?;
        }

        let output_fields = query_analysis
            .outputs
            .iter()
            .map(|column| {
                analysis.add_field(Field {
                    relation: None,
                    name: column.name.clone(),
                    data_type: column.data_type,
                })
            })
            .collect();
        analysis.set_query(query, query_analysis);
        Ok(output_fields)
    }

    fn analyze_relation<'a>(
        &self,
        analysis: &mut Analysis<'a>,
        relation: &'a Relation,
        outer: Option<&Scope<'_>>,
    ) -> Result<Vec<FieldId>, AnalysisError> {
        let fields = match relation {
            Relation::Table { name, alias } => {
                let database = name.database.as_deref().unwrap_or(&self.session.database);
                let namespace = name.namespace.as_deref().unwrap_or(&self.session.namespace);
                let (schema, partitions) = self
                    .metadata
                    .get_table_metadata(database, namespace, &name.table)
                    .map_err(|e| match e {
                        MetadataError::NotFound(table) => AnalysisError::UnknownTable(table),
                        other => AnalysisError::Metadata(other),
                    })?;
                let handle = self.metadata.get_table_handle(database, namespace, &name.table)?;
                let qualifier = alias.clone().unwrap_or_else(|| name.table.clone());
                let fields: Vec<FieldId> = schema
                    .columns
                    .iter()
                    .map(|column| {
                        analysis.add_field(Field {
                            relation: Some(qualifier.clone()),
                            name: column.name.clone(),
                            data_type: column.data_type,
                        })
                    })
                    .collect();
                debug!("Resolved table {} with {} partitions", handle, partitions.len());
                analysis.set_table(
                    relation,
                    TableAnalysis {
                        handle,
                        schema,
                        partitions,
                        fields: fields.clone(),
                    },
                );
                fields
            }
            Relation::Subquery { query, alias } => {
                let query_fields = self.analyze_query(analysis, query, outer)?;
                // Re-qualify the subquery's outputs with its alias
                query_fields
                    .iter()
                    .map(|id| {
                        let field = analysis.field(*id).clone();
                        analysis.add_field(Field {
                            relation: alias.clone(),
                            ..field
                        })
                    })
                    .collect()
            }
            Relation::Join { left, right, on } => {
                let left_fields = self.analyze_relation(analysis, left, outer)?;
                let left_scope = Scope::with_fields(
                    left_fields
                        .iter()
                        .map(|id| (*id, analysis.field(*id).clone()))
                        .collect(),
                    outer,
                );
                let right_fields = self.analyze_relation(analysis, right, Some(&left_scope))?;

                let mut fields = left_fields;
                fields.extend(right_fields);
                let scope = Scope::with_fields(
                    fields.iter().map(|id| (*id, analysis.field(*id).clone())).collect(),
                    outer,
                );
                let mut analyzer =
                    ExpressionAnalyzer::new(analysis, &self.functions, &scope, AggregateContext::Forbidden("JOIN"));
                let t = analyzer.analyze(on)?;
                expect_boolean(on, t, "JOIN")?;
                fields
            }
        };
        analysis.set_relation_fields(relation, fields.clone());
        Ok(fields)
    }

    /// Every non-aggregate part of a select or having expression must be grouped
    fn verify_grouping<'a>(
        &self,
        analysis: &Analysis<'a>,
        query: &'a Query,
        query_analysis: &QueryAnalysis<'a>,
    ) -> Result<(), AnalysisError> {
        for column in &query_analysis.outputs {
            match column.expr {
                OutputExpr::Field(id) => {
                    let grouped = query_analysis
                        .group_by
                        .iter()
                        .any(|g| analysis.column_reference(*g) == Some(id));
                    if !grouped {
                        return Err(AnalysisError::NotGrouped(column.name.clone()));
                    }
                }
                OutputExpr::Expr(expr) => check_grouped(analysis, &query_analysis.group_by, expr)?,
            }
        }
        if let Some(having) = &query.having {
            check_grouped(analysis, &query_analysis.group_by, having)?;
        }
        Ok(())
    }
}

fn check_grouped<'a>(analysis: &Analysis<'a>, group_by: &[&'a Expr], expr: &'a Expr) -> Result<(), AnalysisError> {
    if group_by.iter().any(|g| analysis.is_equivalent(*g, expr)) {
        return Ok(());
    }
    match expr {
        Expr::Function(_) | Expr::Literal(_) => Ok(()),
        Expr::Identifier(_) => Err(AnalysisError::NotGrouped(expr.to_string())),
        Expr::Binary { left, right, .. } => {
            check_grouped(analysis, group_by, left)?;
            check_grouped(analysis, group_by, right)
        }
        Expr::Not(inner) | Expr::Negate(inner) | Expr::IsNull { expr: inner, .. } | Expr::Cast { expr: inner, .. } => {
            check_grouped(analysis, group_by, inner)
        }
    }
}

fn expect_boolean(expr: &Expr, data_type: Option<DataType>, clause: &str) -> Result<(), AnalysisError> {
    match data_type {
        None | Some(DataType::Boolean) => Ok(()),
        Some(other) => Err(AnalysisError::TypeMismatch(format!(
            "{} condition {} must be boolean, got {}",
            clause, expr, other
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::spi::{ColumnKind, ColumnSchema, MemoryStorage, TableHandle, TableSchema};

    /// Storage with `cpu(time, host, region, value)` and `mem(time, host, used)`
    pub fn storage() -> Arc<MemoryStorage> {
        let storage = MemoryStorage::default();
        storage
            .create_table(
                TableHandle::new("db", "public", "cpu"),
                TableSchema::new(vec![
                    ColumnSchema::new("time", DataType::Timestamp, ColumnKind::Timestamp),
                    ColumnSchema::new("host", DataType::Varchar, ColumnKind::Tag),
                    ColumnSchema::new("region", DataType::Varchar, ColumnKind::Tag),
                    ColumnSchema::new("value", DataType::Double, ColumnKind::Field),
                ]),
            )
            .unwrap();
        storage
            .create_table(
                TableHandle::new("db", "public", "mem"),
                TableSchema::new(vec![
                    ColumnSchema::new("time", DataType::Timestamp, ColumnKind::Timestamp),
                    ColumnSchema::new("host", DataType::Varchar, ColumnKind::Tag),
                    ColumnSchema::new("used", DataType::Bigint, ColumnKind::Field),
                ]),
            )
            .unwrap();
        storage.add_shard(&TableHandle::new("db", "public", "cpu"), 0, "node-1").unwrap();
        storage.add_shard(&TableHandle::new("db", "public", "mem"), 0, "node-1").unwrap();
        Arc::new(storage)
    }

    pub fn analyzer() -> Analyzer {
        Analyzer::new(storage(), Arc::new(FunctionRegistry::new()), Session::default())
    }
}

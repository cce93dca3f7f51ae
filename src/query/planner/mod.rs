//! Lowers an analyzed query into a tree of plan nodes, one symbol per computed value.

pub mod translator;

pub use translator::{coerce, TranslationMap};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::page::DataType;
use crate::query::analyzer::{AggregateAnalysis, Analysis, FieldId, OutputExpr};
use crate::query::ast::{BinaryOperator, Expr, Query, Relation};
use crate::query::functions::AggregateKind;
use crate::query::plan::{
    AggregateFunction, Aggregation, AggregationNode, AggregationStep, ArithmeticOperator, Assignments,
    EquiJoinClause, Expression, FilterNode, JoinNode, OutputNode, PlanNode, PlanNodeIdAllocator, PlanningError,
    ProjectNode, Symbol, SymbolAllocator, TableScanNode,
};

/// A planned query together with the allocators later passes keep using
#[derive(Debug)]
pub struct LogicalPlan {
    pub root: Arc<PlanNode>,
    pub symbols: SymbolAllocator,
    pub ids: PlanNodeIdAllocator,
}

/// A planned relation and the symbol carrying each of its fields
struct RelationPlan {
    root: Arc<PlanNode>,
    fields: Vec<(FieldId, Symbol)>,
}

/// A planned query block: its root and one symbol per output column
struct QueryPlan {
    root: Arc<PlanNode>,
    outputs: Vec<Symbol>,
}

pub struct LogicalPlanner<'a, 'b> {
    analysis: &'b Analysis<'a>,
    symbols: SymbolAllocator,
    ids: PlanNodeIdAllocator,
}

impl<'a, 'b> LogicalPlanner<'a, 'b> {
    pub fn new(analysis: &'b Analysis<'a>) -> Self {
        Self {
            analysis,
            symbols: SymbolAllocator::new(),
            ids: PlanNodeIdAllocator::new(),
        }
    }

    pub fn plan(mut self) -> Result<LogicalPlan, PlanningError> {
        let query = self.analysis.root();
        let planned = self.plan_query(query)?;
        let column_names = self
            .analysis
            .query(query)
            .ok_or_else(|| PlanningError::Internal("root query was not analyzed".to_string()))?
            .outputs
            .iter()
            .map(|o| o.name.clone())
            .collect();
        let root = Arc::new(PlanNode::Output(OutputNode {
            id: self.ids.next_id(),
            source: planned.root,
            column_names,
            outputs: planned.outputs,
        }));
        debug!("Logical plan has {} nodes", root.count_nodes(&|_| true));
        Ok(LogicalPlan {
            root,
            symbols: self.symbols,
            ids: self.ids,
        })
    }

    fn plan_query(&mut self, query: &'a Query) -> Result<QueryPlan, PlanningError> {
        let analysis = self.analysis;
        let query_analysis = analysis
            .query(query)
            .ok_or_else(|| PlanningError::Internal("query block was not analyzed".to_string()))?;

        let relation = self.plan_relation(&query.from)?;
        let mut root = relation.root;
        let mut translations = TranslationMap::new(analysis, relation.fields.into_iter().collect());

        if let Some(filter) = &query.filter {
            root = Arc::new(PlanNode::Filter(FilterNode {
                id: self.ids.next_id(),
                source: root,
                predicate: translations.translate(filter)?,
            }));
        }

        if query_analysis.is_aggregated(query) {
            let (aggregated, post) = self.plan_aggregation(
                root,
                &translations,
                &query_analysis.group_by,
                &query_analysis.aggregates,
            )?;
            root = aggregated;
            translations = post;

            if let Some(having) = &query.having {
                root = Arc::new(PlanNode::Filter(FilterNode {
                    id: self.ids.next_id(),
                    source: root,
                    predicate: translations.translate(having)?,
                }));
            }
        }

        // Output projection, one fresh symbol per computed column
        let mut assignments = Assignments::new();
        let mut outputs = Vec::with_capacity(query_analysis.outputs.len());
        for column in &query_analysis.outputs {
            let expression = match column.expr {
                OutputExpr::Field(field) => translations
                    .field_symbol(field)
                    .map(Symbol::to_reference)
                    .ok_or_else(|| PlanningError::Internal(format!("no symbol for {}", column.name)))?,
                OutputExpr::Expr(expr) => translations.translate(expr)?,
            };
            let symbol = match expression.as_symbol() {
                Some(symbol) if assignments.get(symbol).is_none() => symbol.clone(),
                _ => self.symbols.new_symbol(&column.name, expression.data_type()),
            };
            assignments.put(symbol.clone(), expression);
            outputs.push(symbol);
        }
        let root = Arc::new(PlanNode::Projection(ProjectNode {
            id: self.ids.next_id(),
            source: root,
            assignments,
        }));
        Ok(QueryPlan { root, outputs })
    }

    /// Plans the pre-projection and the aggregation; returns the translation map for
    /// expressions evaluated above it
    fn plan_aggregation(
        &mut self,
        source: Arc<PlanNode>,
        translations: &TranslationMap<'a, 'b>,
        group_by: &[&'a Expr],
        aggregates: &[AggregateAnalysis<'a>],
    ) -> Result<(Arc<PlanNode>, TranslationMap<'a, 'b>), PlanningError> {
        let analysis = self.analysis;
        let mut pre = Assignments::new();
        let mut post = TranslationMap::new(analysis, HashMap::new());

        // Grouping keys
        let mut keys: Vec<Symbol> = Vec::new();
        let mut planned_keys: Vec<(&'a Expr, Symbol)> = Vec::new();
        for &expr in group_by {
            if let Some((_, symbol)) = planned_keys.iter().find(|(e, _)| analysis.is_equivalent(*e, expr)) {
                post.put_expression(expr, symbol.to_reference());
                continue;
            }
            let translated = translations.translate(expr)?;
            let symbol = self.project(&mut pre, translated, &expr.to_string());
            keys.push(symbol.clone());
            planned_keys.push((expr, symbol.clone()));
            post.put_expression(expr, symbol.to_reference());
        }

        // Aggregate calls, deduplicated
        let mut aggregations: Vec<(Symbol, Aggregation)> = Vec::new();
        let mut planned: Vec<&'a Expr> = Vec::new();
        for aggregate in aggregates {
            if planned.iter().any(|e| analysis.is_equivalent(*e, aggregate.expr)) {
                continue;
            }
            planned.push(aggregate.expr);

            let argument = match aggregate.argument {
                Some(argument) => {
                    let translated = translations.translate(argument)?;
                    Some(self.project(&mut pre, translated, "arg"))
                }
                None => None,
            };
            let name = aggregate.call.name.to_ascii_lowercase();
            let translation = match aggregate.kind {
                AggregateKind::Avg => {
                    let argument_type = argument.as_ref().map(Symbol::data_type);
                    let sum = self.symbols.new_symbol("sum", AggregateFunction::Sum.output_type(argument_type));
                    let count = self.symbols.new_symbol("count", DataType::Bigint);
                    aggregations.push((
                        sum.clone(),
                        Aggregation {
                            function: AggregateFunction::Sum,
                            argument: argument.clone(),
                            output_type: sum.data_type(),
                        },
                    ));
                    aggregations.push((
                        count.clone(),
                        Aggregation {
                            function: AggregateFunction::Count,
                            argument,
                            output_type: DataType::Bigint,
                        },
                    ));
                    Expression::arithmetic(
                        ArithmeticOperator::Divide,
                        coerce(sum.to_reference(), DataType::Double),
                        coerce(count.to_reference(), DataType::Double),
                        DataType::Double,
                    )
                }
                kind => {
                    let function = match kind {
                        AggregateKind::CountAll => AggregateFunction::CountAll,
                        AggregateKind::Count => AggregateFunction::Count,
                        AggregateKind::Sum => AggregateFunction::Sum,
                        AggregateKind::Min => AggregateFunction::Min,
                        _ => AggregateFunction::Max,
                    };
                    let output_type = function.output_type(argument.as_ref().map(Symbol::data_type));
                    let symbol = self.symbols.new_symbol(&name, output_type);
                    aggregations.push((
                        symbol.clone(),
                        Aggregation {
                            function,
                            argument,
                            output_type,
                        },
                    ));
                    symbol.to_reference()
                }
            };
            post.put_expression(aggregate.expr, translation);
        }

        let projection = Arc::new(PlanNode::Projection(ProjectNode {
            id: self.ids.next_id(),
            source,
            assignments: pre,
        }));
        let aggregation = Arc::new(PlanNode::Aggregation(AggregationNode {
            id: self.ids.next_id(),
            source: projection,
            grouping_keys: keys,
            aggregations,
            step: AggregationStep::Single,
        }));
        Ok((aggregation, post))
    }

    /// Adds `expression` to a projection, reusing the symbol when it already is one
    fn project(&mut self, assignments: &mut Assignments, expression: Expression, hint: &str) -> Symbol {
        if let Some((symbol, _)) = assignments.iter().find(|(_, e)| **e == expression) {
            return symbol.clone();
        }
        let symbol = match expression.as_symbol() {
            Some(symbol) => symbol.clone(),
            None => self.symbols.new_symbol(hint, expression.data_type()),
        };
        assignments.put(symbol.clone(), expression);
        symbol
    }

    fn plan_relation(&mut self, relation: &'a Relation) -> Result<RelationPlan, PlanningError> {
        let analysis = self.analysis;
        match relation {
            Relation::Table { .. } => {
                let table = analysis
                    .table(relation)
                    .ok_or_else(|| PlanningError::Internal("table was not analyzed".to_string()))?;
                let mut fields = Vec::with_capacity(table.fields.len());
                let mut assignments = Vec::with_capacity(table.fields.len());
                for (field, column) in table.fields.iter().zip(table.schema.columns.iter()) {
                    let symbol = self.symbols.new_symbol(&column.name, column.data_type);
                    assignments.push((symbol.clone(), column.name.clone()));
                    fields.push((*field, symbol));
                }
                let root = Arc::new(PlanNode::TableScan(TableScanNode {
                    id: self.ids.next_id(),
                    table: table.handle.clone(),
                    outputs: fields.iter().map(|(_, s)| s.clone()).collect(),
                    assignments,
                    partitions: table.partitions.clone(),
                }));
                Ok(RelationPlan { root, fields })
            }
            Relation::Subquery { query, .. } => {
                let planned = self.plan_query(query)?;
                let relation_fields = analysis
                    .relation_fields(relation)
                    .ok_or_else(|| PlanningError::Internal("subquery was not analyzed".to_string()))?;
                let fields = relation_fields.iter().copied().zip(planned.outputs).collect();
                Ok(RelationPlan {
                    root: planned.root,
                    fields,
                })
            }
            Relation::Join { left, right, on } => {
                let left = self.plan_relation(left)?;
                let right = self.plan_relation(right)?;
                let left_symbols: HashMap<FieldId, Symbol> = left.fields.iter().cloned().collect();
                let right_symbols: HashMap<FieldId, Symbol> = right.fields.iter().cloned().collect();

                let mut criteria = Vec::new();
                for conjunct in conjuncts(on) {
                    let Expr::Binary {
                        left: l,
                        op: BinaryOperator::Eq,
                        right: r,
                    } = conjunct
                    else {
                        return Err(PlanningError::UnsupportedJoin(conjunct.to_string()));
                    };
                    let (Some(lf), Some(rf)) = (analysis.column_reference(l), analysis.column_reference(r)) else {
                        return Err(PlanningError::UnsupportedJoin(conjunct.to_string()));
                    };
                    let clause = match (left_symbols.get(&lf), right_symbols.get(&rf)) {
                        (Some(ls), Some(rs)) => (ls.clone(), rs.clone()),
                        _ => match (left_symbols.get(&rf), right_symbols.get(&lf)) {
                            (Some(ls), Some(rs)) => (ls.clone(), rs.clone()),
                            _ => return Err(PlanningError::UnsupportedJoin(conjunct.to_string())),
                        },
                    };
                    if clause.0.data_type() != clause.1.data_type() {
                        return Err(PlanningError::UnsupportedJoin(format!(
                            "{} compares {} with {}",
                            conjunct,
                            clause.0.data_type(),
                            clause.1.data_type()
                        )));
                    }
                    criteria.push(EquiJoinClause {
                        left: clause.0,
                        right: clause.1,
                    });
                }

                let mut outputs = left.root.output_symbols();
                outputs.extend(right.root.output_symbols());
                let mut fields = left.fields;
                fields.extend(right.fields);
                let root = Arc::new(PlanNode::Join(JoinNode {
                    id: self.ids.next_id(),
                    left: left.root,
                    right: right.root,
                    criteria,
                    outputs,
                }));
                Ok(RelationPlan { root, fields })
            }
        }
    }
}

/// Top-level AND terms of an AST predicate
fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::analyzer::test_support::analyzer;
    use crate::query::plan::printer::explain;

    fn plan(query: &Query) -> LogicalPlan {
        let analysis = analyzer().analyze(query).unwrap();
        LogicalPlanner::new(&analysis).plan().unwrap()
    }

    #[test]
    fn test_simple_select_plan_shape() {
        let query = Query::new(Relation::table("cpu"))
            .select(Expr::column("host"))
            .filter(Expr::binary(Expr::column("value"), BinaryOperator::Gt, Expr::int(1)));
        let plan = plan(&query);
        let text = explain(&plan.root);
        let names: Vec<&str> = text
            .lines()
            .map(|l| l.trim_start().trim_start_matches("- ").split('[').next().unwrap())
            .collect();
        assert_eq!(names, vec!["Output", "Projection", "Filter", "TableScan"]);
        // the integer literal is coerced to the column type
        assert!(text.contains("(value > 1)"));
    }

    #[test]
    fn test_avg_is_lowered_to_sum_and_count() {
        let query = Query::new(Relation::table("cpu"))
            .select(Expr::column("host"))
            .select_as(Expr::function("avg", vec![Expr::column("value")]), "mean")
            .group_by(Expr::column("host"));
        let plan = plan(&query);
        let mut functions = Vec::new();
        plan.root.walk(&mut |node| {
            if let PlanNode::Aggregation(aggregation) = node {
                assert_eq!(aggregation.grouping_keys.len(), 1);
                functions.extend(aggregation.aggregations.iter().map(|(_, a)| a.function));
            }
        });
        assert_eq!(functions, vec![AggregateFunction::Sum, AggregateFunction::Count]);
        assert_eq!(plan.root.output_symbols()[1].data_type(), DataType::Double);
    }

    #[test]
    fn test_duplicate_aggregates_are_planned_once() {
        let sum = Expr::function("sum", vec![Expr::column("value")]);
        let query = Query::new(Relation::table("cpu"))
            .select(sum.clone())
            .having(Expr::binary(sum, BinaryOperator::Gt, Expr::int(10)));
        let plan = plan(&query);
        let count = plan.root.count_nodes(&|node| match node {
            PlanNode::Aggregation(aggregation) => aggregation.aggregations.len() == 1,
            _ => false,
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_join_requires_column_equalities() {
        let query = Query::new(Relation::Join {
            left: Box::new(Relation::table("cpu")),
            right: Box::new(Relation::table("mem")),
            on: Expr::binary(Expr::column("cpu.time"), BinaryOperator::Lt, Expr::column("mem.time")),
        })
        .select(Expr::column("cpu.host"));
        let analysis = analyzer().analyze(&query).unwrap();
        assert!(matches!(
            LogicalPlanner::new(&analysis).plan(),
            Err(PlanningError::UnsupportedJoin(_))
        ));

        let query = Query::new(Relation::Join {
            left: Box::new(Relation::table("cpu")),
            right: Box::new(Relation::table("mem")),
            on: Expr::binary(Expr::column("mem.host"), BinaryOperator::Eq, Expr::column("cpu.host")),
        })
        .select(Expr::column("cpu.value"))
        .select(Expr::column("mem.used"));
        let plan = plan(&query);
        assert_eq!(plan.root.count_nodes(&|n| matches!(n, PlanNode::Join(_))), 1);
        assert_eq!(plan.root.output_symbols().len(), 2);
    }

    #[test]
    fn test_subquery_fields_flow_to_outer_query() {
        let inner = Query::new(Relation::table("cpu"))
            .select(Expr::column("host"))
            .select_as(Expr::function("max", vec![Expr::column("value")]), "peak")
            .group_by(Expr::column("host"));
        let query = Query::new(Relation::Subquery {
            query: Box::new(inner),
            alias: Some("t".to_string()),
        })
        .select(Expr::column("t.peak"))
        .filter(Expr::binary(Expr::column("peak"), BinaryOperator::Gt, Expr::float(0.5)));
        let plan = plan(&query);
        assert_eq!(plan.root.output_symbols()[0].data_type(), DataType::Double);
        assert_eq!(plan.root.count_nodes(&|n| matches!(n, PlanNode::Filter(_))), 1);
    }
}

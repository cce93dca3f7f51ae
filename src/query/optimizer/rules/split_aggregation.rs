use std::sync::Arc;

use crate::query::optimizer::iterative::{Rule, RuleContext};
use crate::query::plan::{
    Aggregation, AggregationNode, AggregationStep, ExchangeNode, ExchangeScope, PlanNode, PlanningError, Symbol,
    SymbolMapper,
};

/// Turns a single-step aggregation over a remote exchange into a partial aggregation
/// below the exchange, one per exchange source, and a final aggregation above it.
pub struct SplitAggregationAcrossExchange;

impl Rule for SplitAggregationAcrossExchange {
    fn name(&self) -> &'static str {
        "SplitAggregationAcrossExchange"
    }

    fn matches(&self, node: &PlanNode) -> bool {
        matches!(
            node,
            PlanNode::Aggregation(AggregationNode {
                step: AggregationStep::Single,
                ..
            })
        )
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Result<Option<Arc<PlanNode>>, PlanningError> {
        let PlanNode::Aggregation(aggregation) = node else {
            return Ok(None);
        };
        let exchange = match ctx.resolve(&aggregation.source).as_ref() {
            PlanNode::Exchange(exchange) if exchange.scope == ExchangeScope::Remote => exchange.clone(),
            _ => return Ok(None),
        };

        // Symbols carrying partial results across the exchange
        let intermediates: Vec<Symbol> = aggregation
            .aggregations
            .iter()
            .map(|(symbol, call)| {
                ctx.symbols
                    .new_symbol(&format!("partial_{}", symbol.name()), call.output_type)
            })
            .collect();

        let mut sources = Vec::with_capacity(exchange.sources.len());
        let mut inputs = Vec::with_capacity(exchange.sources.len());
        for (source, source_inputs) in exchange.sources.iter().zip(exchange.inputs.iter()) {
            let mut mapper = SymbolMapper::new();
            for (output, input) in exchange.outputs.iter().zip(source_inputs.iter()) {
                mapper.put(output.clone(), input.clone());
            }
            let keys = mapper.map_all(&aggregation.grouping_keys);
            let partials: Vec<(Symbol, Aggregation)> = aggregation
                .aggregations
                .iter()
                .zip(intermediates.iter())
                .map(|((_, call), intermediate)| {
                    let partial = ctx
                        .symbols
                        .new_symbol(intermediate.name(), intermediate.data_type());
                    (partial, mapper.map_aggregation(call))
                })
                .collect();

            let mut layout = keys.clone();
            layout.extend(partials.iter().map(|(s, _)| s.clone()));
            inputs.push(layout);
            sources.push(Arc::new(PlanNode::Aggregation(AggregationNode {
                id: ctx.ids.next_id(),
                source: Arc::clone(source),
                grouping_keys: keys,
                aggregations: partials,
                step: AggregationStep::Partial,
            })));
        }

        let mut outputs = aggregation.grouping_keys.clone();
        outputs.extend(intermediates.iter().cloned());
        let partial_exchange = Arc::new(PlanNode::Exchange(ExchangeNode {
            id: ctx.ids.next_id(),
            scope: ExchangeScope::Remote,
            kind: exchange.kind.clone(),
            sources,
            inputs,
            outputs,
        }));

        let finals = aggregation
            .aggregations
            .iter()
            .zip(intermediates)
            .map(|((symbol, call), intermediate)| {
                (
                    symbol.clone(),
                    Aggregation {
                        function: call.function.final_function(),
                        argument: Some(intermediate),
                        output_type: call.output_type,
                    },
                )
            })
            .collect();
        Ok(Some(Arc::new(PlanNode::Aggregation(AggregationNode {
            id: aggregation.id,
            source: partial_exchange,
            grouping_keys: aggregation.grouping_keys.clone(),
            aggregations: finals,
            step: AggregationStep::Final,
        }))))
    }
}

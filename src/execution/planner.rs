use std::sync::Arc;

use tracing::{debug, info};

use super::driver::Driver;
use super::expression::PhysicalExpr;
use super::operator::aggregation::AggregateSpec;
use super::operator::join::JoinSide;
use super::operator::{
    ExchangeClient, ExchangeOperatorFactory, FilterOperatorFactory, HashAggregationOperatorFactory,
    HashBuilderOperatorFactory, JoinBridge, LocalExchangeSinkOperatorFactory, LookupJoinOperatorFactory, Operator,
    OperatorFactory, ProjectOperatorFactory, TableScanOperatorFactory, TaskOutputOperatorFactory,
    ValuesOperatorFactory,
};
use super::pipeline::{Pipeline, PipelineSource, TaskExecutionPlan};
use super::{ExecutionContext, ExecutionError};
use crate::page::{ColumnMetadata, Page};
use crate::query::fragment::PlanFragment;
use crate::query::plan::{
    AggregationNode, ExchangeNode, ExchangeScope, Expression, FilterNode, JoinNode, PlanNode, ProjectNode,
    RemoteSourceNode, Symbol, SymbolMapper, TableScanNode, ValuesNode,
};
use crate::spi::{Partitions, ShardId, SplitSource};
use crate::task::{OutputBuffer, RequestId};

/// How the head of an operation gets its input
enum SourceSpec {
    Splits(Vec<Box<dyn SplitSource>>),
    Remote(Arc<ExchangeClient>),
    Local,
    None,
}

/// A chain of operator factories still waiting for its sink
struct PhysicalOperation {
    factories: Vec<Box<dyn OperatorFactory>>,
    source: SourceSpec,
    /// Symbols of the pages leaving the last factory, by channel
    layout: Vec<Symbol>,
    /// Pipelines that must finish before this chain starts
    dependencies: Vec<usize>,
}

impl PhysicalOperation {
    fn source(factory: Box<dyn OperatorFactory>, source: SourceSpec, layout: Vec<Symbol>) -> Self {
        Self {
            factories: vec![factory],
            source,
            layout,
            dependencies: Vec::new(),
        }
    }

    fn then(mut self, factory: Box<dyn OperatorFactory>, layout: Vec<Symbol>) -> Self {
        self.factories.push(factory);
        self.layout = layout;
        self
    }

    fn channel(&self, symbol: &Symbol) -> Result<usize, ExecutionError> {
        channel(&self.layout, symbol)
    }

    fn channels(&self, symbols: &[Symbol]) -> Result<Vec<usize>, ExecutionError> {
        symbols.iter().map(|symbol| self.channel(symbol)).collect()
    }
}

fn channel(layout: &[Symbol], symbol: &Symbol) -> Result<usize, ExecutionError> {
    layout
        .iter()
        .position(|s| s == symbol)
        .ok_or_else(|| ExecutionError::Internal(format!("symbol {} missing from layout {:?}", symbol, layout)))
}

fn metadata(symbols: &[Symbol]) -> Vec<ColumnMetadata> {
    symbols
        .iter()
        .map(|symbol| ColumnMetadata::new(symbol.name(), symbol.data_type()))
        .collect()
}

/// Turns a plan fragment into the pipelines of one task.
///
/// Pipelines are cut at local exchanges and at the build side of joins. Producers
/// are planned before their consumers, so a pipeline only ever depends on pipelines
/// with smaller ids.
pub struct TaskExecutionPlanner<'a> {
    context: &'a ExecutionContext,
    request_id: RequestId,
    partitions: &'a Partitions,
    pipelines: Vec<Pipeline>,
}

impl<'a> TaskExecutionPlanner<'a> {
    pub fn new(context: &'a ExecutionContext, request_id: RequestId, partitions: &'a Partitions) -> Self {
        Self {
            context,
            request_id,
            partitions,
            pipelines: Vec::new(),
        }
    }

    pub fn plan(
        mut self,
        fragment: &PlanFragment,
        output: Arc<dyn OutputBuffer>,
    ) -> Result<TaskExecutionPlan, ExecutionError> {
        let operation = self.visit(&fragment.root)?;
        let channels = operation.channels(&fragment.output_layout)?;
        let names = fragment.output_layout.iter().map(|s| s.name().to_string()).collect();
        let sink = TaskOutputOperatorFactory::new(output, channels, names);
        self.add_pipeline(operation, &sink, None)?;
        info!(
            "Planned fragment {} of request {} on {} into {} pipelines",
            fragment.id,
            self.request_id,
            self.context.node_id,
            self.pipelines.len()
        );
        Ok(TaskExecutionPlan::new(self.pipelines))
    }

    fn visit(&mut self, node: &PlanNode) -> Result<PhysicalOperation, ExecutionError> {
        match node {
            PlanNode::TableScan(scan) => self.visit_table_scan(scan, None),
            PlanNode::Filter(filter) => self.visit_filter(filter),
            PlanNode::Projection(project) => self.visit_project(project),
            PlanNode::Aggregation(aggregation) => self.visit_aggregation(aggregation),
            PlanNode::Join(join) => self.visit_join(join),
            PlanNode::Exchange(exchange) if exchange.scope == ExchangeScope::Local => self.visit_local_exchange(exchange),
            PlanNode::RemoteSource(remote) => Ok(self.visit_remote_source(remote)),
            PlanNode::Values(values) => self.visit_values(values),
            PlanNode::Output(output) => self.visit(&output.source),
            PlanNode::Exchange(_) | PlanNode::GroupReference(_) => Err(ExecutionError::UnsupportedNode(node.name())),
        }
    }

    /// Shards of the scan that this task owns
    fn task_shards(&self, scan: &TableScanNode) -> Vec<ShardId> {
        let mut shards = Vec::new();
        for (node, owned) in self.partitions {
            if let Some(scanned) = scan.partitions.get(node) {
                shards.extend(scanned.iter().filter(|shard| owned.contains(*shard)));
            }
        }
        shards
    }

    fn visit_table_scan(
        &mut self,
        scan: &TableScanNode,
        predicate: Option<&Expression>,
    ) -> Result<PhysicalOperation, ExecutionError> {
        let shards = self.task_shards(scan);
        let columns: Vec<String> = scan
            .outputs
            .iter()
            .map(|symbol| {
                scan.column_for(symbol)
                    .map(str::to_string)
                    .ok_or_else(|| ExecutionError::Internal(format!("no column assigned to {}", symbol)))
            })
            .collect::<Result<_, _>>()?;
        let split_sources = self
            .context
            .split_source_provider
            .create_split_sources(&scan.table, &shards, &columns, predicate)?;
        debug!(
            "Scan of {} reads shards {:?} through {} split sources",
            scan.table,
            shards,
            split_sources.len()
        );
        let factory = TableScanOperatorFactory::new(
            scan.id,
            scan.table.clone(),
            metadata(&scan.outputs),
            columns,
            Arc::clone(&self.context.page_source_provider),
        );
        Ok(PhysicalOperation::source(
            Box::new(factory),
            SourceSpec::Splits(split_sources),
            scan.outputs.clone(),
        ))
    }

    fn visit_filter(&mut self, filter: &FilterNode) -> Result<PhysicalOperation, ExecutionError> {
        let operation = match filter.source.as_ref() {
            PlanNode::TableScan(scan) => {
                let hint = scan_predicate(scan, &filter.predicate);
                self.visit_table_scan(scan, hint.as_ref())?
            }
            source => self.visit(source)?,
        };
        let predicate = PhysicalExpr::compile(&filter.predicate, &operation.layout)?;
        let layout = operation.layout.clone();
        Ok(operation.then(Box::new(FilterOperatorFactory::new(predicate)), layout))
    }

    fn visit_project(&mut self, project: &ProjectNode) -> Result<PhysicalOperation, ExecutionError> {
        let operation = self.visit(&project.source)?;
        let projections = project
            .assignments
            .iter()
            .map(|(symbol, expression)| {
                Ok((
                    ColumnMetadata::new(symbol.name(), symbol.data_type()),
                    PhysicalExpr::compile(expression, &operation.layout)?,
                ))
            })
            .collect::<Result<Vec<_>, ExecutionError>>()?;
        Ok(operation.then(
            Box::new(ProjectOperatorFactory::new(projections)),
            project.assignments.outputs(),
        ))
    }

    fn visit_aggregation(&mut self, aggregation: &AggregationNode) -> Result<PhysicalOperation, ExecutionError> {
        let operation = self.visit(&aggregation.source)?;
        let key_channels = operation.channels(&aggregation.grouping_keys)?;
        let aggregates = aggregation
            .aggregations
            .iter()
            .map(|(symbol, call)| {
                let input_channel = call.argument.as_ref().map(|a| operation.channel(a)).transpose()?;
                Ok(AggregateSpec {
                    function: call.function,
                    input_channel,
                    output: ColumnMetadata::new(symbol.name(), call.output_type).with_aggregate(call.function.name()),
                })
            })
            .collect::<Result<Vec<_>, ExecutionError>>()?;
        let factory = HashAggregationOperatorFactory::new(
            aggregation.step,
            key_channels,
            metadata(&aggregation.grouping_keys),
            aggregates,
        );
        let mut layout = aggregation.grouping_keys.clone();
        layout.extend(aggregation.aggregations.iter().map(|(symbol, _)| symbol.clone()));
        Ok(operation.then(Box::new(factory), layout))
    }

    fn visit_join(&mut self, join: &JoinNode) -> Result<PhysicalOperation, ExecutionError> {
        let build = self.visit(&join.right)?;
        let probe = self.visit(&join.left)?;

        let bridge = Arc::new(JoinBridge::new());
        let build_keys: Vec<Symbol> = join.criteria.iter().map(|c| c.right.clone()).collect();
        let probe_keys: Vec<Symbol> = join.criteria.iter().map(|c| c.left.clone()).collect();
        let outputs = join
            .outputs
            .iter()
            .map(|symbol| {
                let metadata = ColumnMetadata::new(symbol.name(), symbol.data_type());
                match probe.channel(symbol) {
                    Ok(channel) => Ok((metadata, JoinSide::Probe, channel)),
                    Err(_) => Ok((metadata, JoinSide::Build, build.channel(symbol)?)),
                }
            })
            .collect::<Result<Vec<_>, ExecutionError>>()?;
        let lookup = LookupJoinOperatorFactory::new(Arc::clone(&bridge), probe.channels(&probe_keys)?, outputs);

        let builder = HashBuilderOperatorFactory::new(bridge, metadata(&build.layout), build.channels(&build_keys)?);
        let build_pipeline = self.add_pipeline(build, &builder, None)?;

        let mut probe = probe.then(Box::new(lookup), join.outputs.clone());
        probe.dependencies.push(build_pipeline);
        Ok(probe)
    }

    /// Every source becomes one or more producer pipelines feeding a shared exchange;
    /// the operation continues from the exchange in a later pipeline
    fn visit_local_exchange(&mut self, exchange: &ExchangeNode) -> Result<PhysicalOperation, ExecutionError> {
        let mut producers = Vec::with_capacity(exchange.sources.len());
        let mut expected_sources = 0;
        for (source, inputs) in exchange.sources.iter().zip(&exchange.inputs) {
            let operation = self.visit(source)?;
            let channels = operation.channels(inputs)?;
            expected_sources += match &operation.source {
                SourceSpec::Splits(split_sources) => split_sources.len().max(1),
                _ => 1,
            };
            producers.push((operation, channels));
        }

        let (client, operator) = ExchangeClient::new(exchange.id, expected_sources, metadata(&exchange.outputs));
        let mut dependencies = Vec::new();
        for (operation, channels) in producers {
            let sink = LocalExchangeSinkOperatorFactory::new(Arc::clone(&client), channels);
            dependencies.extend(self.add_producer_pipelines(operation, &sink, &client)?);
        }
        debug!(
            "Local exchange {} is fed by {} pipelines",
            exchange.id,
            dependencies.len()
        );

        let mut operation = PhysicalOperation::source(
            Box::new(ExchangeOperatorFactory::new(operator)),
            SourceSpec::Local,
            exchange.outputs.clone(),
        );
        operation.dependencies = dependencies;
        Ok(operation)
    }

    fn visit_remote_source(&mut self, remote: &RemoteSourceNode) -> PhysicalOperation {
        let (client, operator) = ExchangeClient::new(remote.id, remote.expected_sources, metadata(&remote.outputs));
        PhysicalOperation::source(
            Box::new(ExchangeOperatorFactory::new(operator)),
            SourceSpec::Remote(client),
            remote.outputs.clone(),
        )
    }

    fn visit_values(&mut self, values: &ValuesNode) -> Result<PhysicalOperation, ExecutionError> {
        let page = Page::from_rows(metadata(&values.outputs), values.rows.clone())?;
        Ok(PhysicalOperation::source(
            Box::new(ValuesOperatorFactory::new(page)),
            SourceSpec::None,
            values.outputs.clone(),
        ))
    }

    /// A scan with several split sources gets one pipeline per split source
    fn add_producer_pipelines(
        &mut self,
        operation: PhysicalOperation,
        sink: &dyn OperatorFactory,
        client: &Arc<ExchangeClient>,
    ) -> Result<Vec<usize>, ExecutionError> {
        let PhysicalOperation {
            factories,
            source,
            dependencies,
            ..
        } = operation;
        match source {
            SourceSpec::Splits(split_sources) if split_sources.len() > 1 => split_sources
                .into_iter()
                .map(|split_source| {
                    let source = PipelineSource::Splits(vec![split_source]);
                    self.push_pipeline(&factories, sink, source, dependencies.clone(), Some(Arc::clone(client)))
                })
                .collect(),
            source => {
                let source = self.pipeline_source(source);
                let id = self.push_pipeline(&factories, sink, source, dependencies, Some(Arc::clone(client)))?;
                Ok(vec![id])
            }
        }
    }

    fn add_pipeline(
        &mut self,
        operation: PhysicalOperation,
        sink: &dyn OperatorFactory,
        downstream: Option<Arc<ExchangeClient>>,
    ) -> Result<usize, ExecutionError> {
        let source = self.pipeline_source(operation.source);
        self.push_pipeline(&operation.factories, sink, source, operation.dependencies, downstream)
    }

    fn pipeline_source(&self, source: SourceSpec) -> PipelineSource {
        match source {
            SourceSpec::Splits(split_sources) => PipelineSource::Splits(split_sources),
            SourceSpec::Remote(client) => PipelineSource::RemoteExchange {
                request_id: self.request_id,
                client,
            },
            SourceSpec::Local => PipelineSource::LocalExchange,
            SourceSpec::None => PipelineSource::None,
        }
    }

    fn push_pipeline(
        &mut self,
        factories: &[Box<dyn OperatorFactory>],
        sink: &dyn OperatorFactory,
        source: PipelineSource,
        dependencies: Vec<usize>,
        downstream: Option<Arc<ExchangeClient>>,
    ) -> Result<usize, ExecutionError> {
        let mut operators: Vec<Box<dyn Operator>> = factories
            .iter()
            .map(|factory| factory.create_operator())
            .collect::<Result<_, _>>()?;
        operators.push(sink.create_operator()?);
        let id = self.pipelines.len();
        let driver = Driver::new(operators)?;
        self.pipelines.push(Pipeline::new(id, driver, source, dependencies, downstream));
        Ok(id)
    }
}

/// Rewrites a predicate over scan outputs into one over table columns, if every
/// symbol it reads is a scanned column
fn scan_predicate(scan: &TableScanNode, predicate: &Expression) -> Option<Expression> {
    let mut mapper = SymbolMapper::new();
    for symbol in predicate.symbols() {
        let column = scan.column_for(&symbol)?;
        mapper.put(symbol.clone(), Symbol::new(column, symbol.data_type()));
    }
    Some(mapper.map_expression(predicate))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::execution::DriverManager;
    use crate::page::{DataType, Value};
    use crate::query::fragment::PlanFragmenter;
    use crate::query::plan::test_support::table_scan;
    use crate::query::plan::{
        AggregateFunction, Aggregation, AggregationStep, ComparisonOperator, EquiJoinClause, ExchangeKind, OutputNode,
        PlanNodeId,
    };
    use crate::spi::{ColumnKind, ColumnSchema, MemoryStorage, TableHandle, TableSchema};

    #[derive(Default)]
    struct CollectingBuffer {
        pages: Mutex<Vec<Page>>,
        closed: Mutex<bool>,
    }

    impl OutputBuffer for CollectingBuffer {
        fn add_page(&self, page: Page) -> Result<(), ExecutionError> {
            self.pages.lock().unwrap().push(page);
            Ok(())
        }

        fn no_more_pages(&self) -> Result<(), ExecutionError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }

        fn fail(&self, _message: &str) {}
    }

    fn node_one() -> Partitions {
        let mut partitions = Partitions::new();
        partitions.insert("node-1".to_string(), vec![0, 1]);
        partitions
    }

    fn context() -> ExecutionContext {
        let storage = MemoryStorage::new(2);
        let t = TableHandle::new("db", "public", "t");
        storage
            .create_table(
                t.clone(),
                TableSchema::new(vec![
                    ColumnSchema::new("g", DataType::Varchar, ColumnKind::Tag),
                    ColumnSchema::new("x", DataType::Bigint, ColumnKind::Field),
                ]),
            )
            .unwrap();
        for shard in [0, 1] {
            storage.add_shard(&t, shard, "node-1").unwrap();
        }
        let row = |g: &str, x: i64| vec![Value::Varchar(g.into()), Value::Bigint(x)];
        storage.append_rows(&t, 0, vec![row("a", 1), row("b", 2), row("a", 3)]).unwrap();
        storage.append_rows(&t, 1, vec![row("b", 4), row("c", 5)]).unwrap();
        let storage = Arc::new(storage);
        ExecutionContext::new("node-1", Arc::new(DriverManager::new()), storage.clone(), storage)
    }

    /// Output <- Single(sum(x) by g) <- local gather <- Filter(x > 1) <- scan of two shards
    fn grouped_plan() -> Arc<PlanNode> {
        let g = Symbol::new("g", DataType::Varchar);
        let x = Symbol::new("x", DataType::Bigint);
        let total = Symbol::new("total", DataType::Bigint);
        let scan = table_scan(0, "t", &[("g", DataType::Varchar), ("x", DataType::Bigint)], node_one());
        let filter = Arc::new(PlanNode::Filter(FilterNode {
            id: PlanNodeId(1),
            source: scan,
            predicate: Expression::comparison(
                ComparisonOperator::Gt,
                x.to_reference(),
                Expression::literal(Value::Bigint(1), DataType::Bigint),
            ),
        }));
        let gather = Arc::new(PlanNode::Exchange(ExchangeNode::new(
            PlanNodeId(2),
            ExchangeScope::Local,
            ExchangeKind::Gather,
            filter,
        )));
        let aggregation = Arc::new(PlanNode::Aggregation(AggregationNode {
            id: PlanNodeId(3),
            source: gather,
            grouping_keys: vec![g.clone()],
            aggregations: vec![(
                total.clone(),
                Aggregation {
                    function: AggregateFunction::Sum,
                    argument: Some(x),
                    output_type: DataType::Bigint,
                },
            )],
            step: AggregationStep::Single,
        }));
        Arc::new(PlanNode::Output(OutputNode {
            id: PlanNodeId(4),
            source: aggregation,
            column_names: vec!["g".to_string(), "total".to_string()],
            outputs: vec![g, total],
        }))
    }

    #[test]
    fn test_local_fragment_runs_to_completion() {
        let context = context();
        let fragment = PlanFragmenter::new().create_sub_plans(&grouped_plan()).unwrap().fragment;
        let buffer = Arc::new(CollectingBuffer::default());
        let plan = TaskExecutionPlanner::new(&context, RequestId::new(), &fragment.partitions)
            .plan(&fragment, buffer.clone())
            .unwrap();
        // one producer per shard, then the consumer
        assert_eq!(plan.pipeline_count(), 3);
        plan.run(&context.driver_manager).unwrap();

        let mut rows: Vec<(String, i64)> = buffer
            .pages
            .lock()
            .unwrap()
            .iter()
            .flat_map(|page| {
                page.rows()
                    .map(|row| (row.get(0).to_string(), row.get(1).as_i64().unwrap()))
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort();
        assert_eq!(
            rows,
            vec![("a".to_string(), 3), ("b".to_string(), 6), ("c".to_string(), 5)]
        );
        assert_eq!(buffer.pages.lock().unwrap()[0].layout()[1].name, "total");
    }

    #[test]
    fn test_join_builds_before_it_probes() {
        let context = context();
        let g = Symbol::new("g", DataType::Varchar);
        let x = Symbol::new("x", DataType::Bigint);
        let k = Symbol::new("k", DataType::Varchar);
        let w = Symbol::new("w", DataType::Bigint);
        let scan = table_scan(0, "t", &[("g", DataType::Varchar), ("x", DataType::Bigint)], node_one());
        let labels = Arc::new(PlanNode::Values(ValuesNode {
            id: PlanNodeId(1),
            outputs: vec![k.clone(), w.clone()],
            rows: vec![
                vec![Value::Varchar("a".into()), Value::Bigint(10)],
                vec![Value::Varchar("c".into()), Value::Bigint(30)],
            ],
        }));
        let join = Arc::new(PlanNode::Join(JoinNode {
            id: PlanNodeId(2),
            left: scan,
            right: labels,
            criteria: vec![EquiJoinClause {
                left: g.clone(),
                right: k,
            }],
            outputs: vec![g.clone(), x.clone(), w.clone()],
        }));
        let root = Arc::new(PlanNode::Output(OutputNode {
            id: PlanNodeId(3),
            source: join,
            column_names: vec!["g".to_string(), "x".to_string(), "w".to_string()],
            outputs: vec![g, x, w],
        }));
        let fragment = PlanFragmenter::new().create_sub_plans(&root).unwrap().fragment;
        let buffer = Arc::new(CollectingBuffer::default());
        let plan = TaskExecutionPlanner::new(&context, RequestId::new(), &fragment.partitions)
            .plan(&fragment, buffer.clone())
            .unwrap();

        // the build side gets its own pipeline, which the probe side waits for
        assert_eq!(plan.pipeline_count(), 2);
        let build = &plan.pipelines()[0];
        let probe = &plan.pipelines()[1];
        assert!(build.dependencies().is_empty());
        assert_eq!(probe.dependencies(), &[build.id()]);

        plan.run(&context.driver_manager).unwrap();
        let mut rows: Vec<(String, i64, i64)> = buffer
            .pages
            .lock()
            .unwrap()
            .iter()
            .flat_map(|page| {
                page.rows()
                    .map(|row| {
                        (
                            row.get(0).to_string(),
                            row.get(1).as_i64().unwrap(),
                            row.get(2).as_i64().unwrap(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), 1, 10),
                ("a".to_string(), 3, 10),
                ("c".to_string(), 5, 30)
            ]
        );
    }

    #[test]
    fn test_shards_of_other_nodes_are_not_scanned() {
        let context = context();
        let mut partitions = Partitions::new();
        partitions.insert("node-2".to_string(), vec![0]);
        let scan = table_scan(0, "t", &[("g", DataType::Varchar)], node_one());
        let PlanNode::TableScan(scan) = scan.as_ref() else {
            panic!("expected a scan");
        };
        let planner = TaskExecutionPlanner::new(&context, RequestId::new(), &partitions);
        assert!(planner.task_shards(scan).is_empty());
    }

    #[test]
    fn test_scan_predicate_uses_column_names() {
        let mut scan = match table_scan(0, "t", &[("x", DataType::Bigint)], node_one()).as_ref() {
            PlanNode::TableScan(scan) => scan.clone(),
            _ => unreachable!(),
        };
        let renamed = Symbol::new("x_1", DataType::Bigint);
        scan.outputs = vec![renamed.clone()];
        scan.assignments = vec![(renamed.clone(), "x".to_string())];
        let predicate = Expression::is_null(renamed.to_reference());
        let hint = scan_predicate(&scan, &predicate).unwrap();
        assert_eq!(hint.symbols().into_iter().collect::<Vec<_>>(), vec![Symbol::new("x", DataType::Bigint)]);

        let unknown = Expression::is_null(Symbol::new("y", DataType::Bigint).to_reference());
        assert!(scan_predicate(&scan, &unknown).is_none());
    }

    #[test]
    fn test_remote_exchange_inside_a_fragment_is_rejected() {
        let context = context();
        let scan = table_scan(0, "t", &[("g", DataType::Varchar)], node_one());
        let exchange = PlanNode::Exchange(ExchangeNode::new(
            PlanNodeId(1),
            ExchangeScope::Remote,
            ExchangeKind::Gather,
            scan,
        ));
        let partitions = node_one();
        let mut planner = TaskExecutionPlanner::new(&context, RequestId::new(), &partitions);
        assert!(matches!(
            planner.visit(&exchange),
            Err(ExecutionError::UnsupportedNode("Exchange"))
        ));
    }
}

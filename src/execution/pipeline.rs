use std::sync::Arc;
use std::thread;

use tracing::{debug, error};

use super::driver::Driver;
use super::driver_manager::DriverManager;
use super::operator::ExchangeClient;
use super::ExecutionError;
use crate::spi::SplitSource;
use crate::task::RequestId;

/// Where the head of a pipeline gets its input from
pub enum PipelineSource {
    /// Storage splits enumerated locally
    Splits(Vec<Box<dyn SplitSource>>),
    /// Results of other tasks, routed through the driver manager
    RemoteExchange {
        request_id: RequestId,
        client: Arc<ExchangeClient>,
    },
    /// Pages produced by other pipelines of the same task
    LocalExchange,
    /// The head operator produces its pages by itself
    None,
}

/// A driver plus what it needs to run: its input and the pipelines it waits for
pub struct Pipeline {
    id: usize,
    driver: Driver,
    source: PipelineSource,
    dependencies: Vec<usize>,
    /// Local exchange this pipeline feeds, failed if the pipeline fails
    downstream: Option<Arc<ExchangeClient>>,
}

impl Pipeline {
    pub fn new(
        id: usize,
        driver: Driver,
        source: PipelineSource,
        dependencies: Vec<usize>,
        downstream: Option<Arc<ExchangeClient>>,
    ) -> Self {
        Self {
            id,
            driver,
            source,
            dependencies,
            downstream,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    pub fn run(self, driver_manager: &DriverManager) -> Result<(), ExecutionError> {
        let Pipeline {
            id,
            mut driver,
            source,
            downstream,
            ..
        } = self;
        let result = drive(&mut driver, source, driver_manager);
        match &result {
            Ok(()) => debug!("Pipeline {} finished", id),
            Err(e) => {
                error!("Pipeline {} failed: {}", id, e);
                if let Some(client) = &downstream {
                    client.fail(e.to_string());
                }
            }
        }
        result
    }
}

fn drive(driver: &mut Driver, source: PipelineSource, driver_manager: &DriverManager) -> Result<(), ExecutionError> {
    match source {
        PipelineSource::Splits(split_sources) => {
            for mut split_source in split_sources {
                while let Some(split) = split_source.next_split()? {
                    driver
                        .source()
                        .ok_or_else(|| ExecutionError::Internal("split pipeline without a source operator".to_string()))?
                        .add_split(split)?;
                    while driver.process()? {}
                }
            }
            if let Some(source) = driver.source() {
                source.no_more_splits();
            }
            driver.run_to_completion()
        }
        PipelineSource::RemoteExchange { request_id, client } => {
            driver_manager.register_source_operator(request_id, client)?;
            driver.run_to_completion()
        }
        PipelineSource::LocalExchange | PipelineSource::None => driver.run_to_completion(),
    }
}

/// Every pipeline of one task
pub struct TaskExecutionPlan {
    pipelines: Vec<Pipeline>,
}

impl TaskExecutionPlan {
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        Self { pipelines }
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    /// Groups pipelines into waves: a pipeline runs one wave after the last of the
    /// pipelines it depends on
    fn waves(pipelines: Vec<Pipeline>) -> Result<Vec<Vec<Pipeline>>, ExecutionError> {
        let mut wave_of: Vec<Option<usize>> = vec![None; pipelines.len()];
        let mut index_of = std::collections::HashMap::new();
        for (index, pipeline) in pipelines.iter().enumerate() {
            index_of.insert(pipeline.id, index);
        }
        // dependencies always point at pipelines planned earlier
        for (index, pipeline) in pipelines.iter().enumerate() {
            let mut wave = 0;
            for dependency in &pipeline.dependencies {
                let dependency_wave = index_of
                    .get(dependency)
                    .and_then(|i| wave_of.get(*i).copied().flatten())
                    .ok_or_else(|| {
                        ExecutionError::Internal(format!(
                            "pipeline {} depends on unknown pipeline {}",
                            pipeline.id, dependency
                        ))
                    })?;
                wave = wave.max(dependency_wave + 1);
            }
            wave_of[index] = Some(wave);
        }

        let count = wave_of.iter().flatten().max().map_or(0, |max| max + 1);
        let mut waves: Vec<Vec<Pipeline>> = (0..count).map(|_| Vec::new()).collect();
        for (pipeline, wave) in pipelines.into_iter().zip(wave_of) {
            if let Some(wave) = wave {
                waves[wave].push(pipeline);
            }
        }
        Ok(waves)
    }

    /// Runs wave after wave; the pipelines of one wave run on their own threads
    pub fn run(self, driver_manager: &DriverManager) -> Result<(), ExecutionError> {
        for (number, wave) in Self::waves(self.pipelines)?.into_iter().enumerate() {
            debug!("Running wave {} with {} pipelines", number, wave.len());
            let results: Vec<Result<(), ExecutionError>> = thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .into_iter()
                    .map(|pipeline| scope.spawn(move || pipeline.run(driver_manager)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(ExecutionError::Internal("pipeline thread panicked".to_string())))
                    })
                    .collect()
            });
            for result in results {
                result?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operator::{
        LocalExchangeSinkOperatorFactory, Operator, OperatorFactory, ExchangeOperatorFactory, ValuesOperatorFactory,
    };
    use crate::page::{ColumnMetadata, DataType, Page, Value};
    use crate::query::plan::PlanNodeId;

    fn values(rows: &[i64]) -> Page {
        Page::from_rows(
            vec![ColumnMetadata::new("v", DataType::Bigint)],
            rows.iter().map(|v| vec![Value::Bigint(*v)]).collect(),
        )
        .unwrap()
    }

    /// Two producers feed one local exchange whose consumer sinks into another exchange
    #[test]
    fn test_local_exchange_pipelines() {
        let layout = vec![ColumnMetadata::new("v", DataType::Bigint)];
        let (local, local_operator) = ExchangeClient::new(PlanNodeId(1), 2, layout.clone());
        let (result, mut result_operator) = ExchangeClient::new(PlanNodeId(2), 1, layout);

        let producer = |id: usize, rows: &[i64]| {
            let driver = Driver::new(vec![
                ValuesOperatorFactory::new(values(rows)).create_operator().unwrap(),
                LocalExchangeSinkOperatorFactory::new(Arc::clone(&local), vec![0])
                    .create_operator()
                    .unwrap(),
            ])
            .unwrap();
            Pipeline::new(id, driver, PipelineSource::None, Vec::new(), Some(Arc::clone(&local)))
        };
        let consumer = Pipeline::new(
            2,
            Driver::new(vec![
                ExchangeOperatorFactory::new(local_operator).create_operator().unwrap(),
                LocalExchangeSinkOperatorFactory::new(Arc::clone(&result), vec![0])
                    .create_operator()
                    .unwrap(),
            ])
            .unwrap(),
            PipelineSource::LocalExchange,
            vec![0, 1],
            None,
        );
        let plan = TaskExecutionPlan::new(vec![producer(0, &[1, 2]), producer(1, &[3]), consumer]);
        assert_eq!(plan.pipeline_count(), 3);
        drop(local);
        plan.run(&DriverManager::new()).unwrap();

        let merged = result_operator.get_output().unwrap().unwrap();
        let mut rows: Vec<i64> = merged.rows().filter_map(|r| r.get(0).as_i64()).collect();
        rows.sort();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_dependency_is_an_error() {
        let driver = Driver::new(vec![ValuesOperatorFactory::new(values(&[1])).create_operator().unwrap()]).unwrap();
        let plan = TaskExecutionPlan::new(vec![Pipeline::new(0, driver, PipelineSource::None, vec![9], None)]);
        assert!(matches!(plan.run(&DriverManager::new()), Err(ExecutionError::Internal(_))));
    }
}

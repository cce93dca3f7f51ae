use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Operator, OperatorFactory, SourceOperator};
use crate::execution::ExecutionError;
use crate::metrics;
use crate::page::{ColumnMetadata, Page};
use crate::query::plan::PlanNodeId;
use crate::spi::Split;

#[derive(Debug)]
enum ExchangeEvent {
    Page(Page),
    Closed,
    Failed(String),
}

/// Sending half of an exchange: upstream tasks or pipelines push pages through it
/// and each of them signals `no_more_splits` once.
#[derive(Debug)]
pub struct ExchangeClient {
    id: PlanNodeId,
    remaining: AtomicUsize,
    sender: mpsc::UnboundedSender<ExchangeEvent>,
}

impl ExchangeClient {
    /// Creates a client expecting `expected_sources` upstream producers, together with
    /// the operator reading from it
    pub fn new(id: PlanNodeId, expected_sources: usize, layout: Vec<ColumnMetadata>) -> (Arc<Self>, ExchangeOperator) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            id,
            remaining: AtomicUsize::new(expected_sources),
            sender,
        });
        if expected_sources == 0 {
            let _ = client.sender.send(ExchangeEvent::Closed);
        }
        let operator = ExchangeOperator {
            id,
            client: Arc::downgrade(&client),
            receiver,
            merged: Page::empty(layout),
            finished: false,
        };
        (client, operator)
    }

    pub fn id(&self) -> PlanNodeId {
        self.id
    }

    pub fn add_page(&self, page: Page) -> Result<(), ExecutionError> {
        metrics::record_exchange_page(page.num_rows());
        self.sender
            .send(ExchangeEvent::Page(page))
            .map_err(|_| ExecutionError::Internal(format!("exchange {} is gone", self.id)))
    }

    pub fn add_split(&self, split: Split) -> Result<(), ExecutionError> {
        match split {
            Split::Remote(page) => self.add_page(page),
            Split::Storage(split) => Err(ExecutionError::Internal(format!(
                "storage split of {} given to exchange {}",
                split.table, self.id
            ))),
        }
    }

    /// Called once by every upstream producer; the exchange closes when all have
    pub fn no_more_splits(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                debug!("Exchange {} received its last source", self.id);
                let _ = self.sender.send(ExchangeEvent::Closed);
            }
            Ok(_) => {}
            Err(_) => warn!("Exchange {} got more end-of-data signals than sources", self.id),
        }
    }

    pub fn fail(&self, message: String) {
        let _ = self.sender.send(ExchangeEvent::Failed(message));
    }

    pub fn remaining_sources(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

/// Receives every page sent through its client and emits them concatenated, in
/// arrival order, once all upstream producers are done.
///
/// `get_output` blocks the calling thread while waiting for producers. Dropping
/// every handle to the client unblocks it with an error.
pub struct ExchangeOperator {
    id: PlanNodeId,
    client: Weak<ExchangeClient>,
    receiver: mpsc::UnboundedReceiver<ExchangeEvent>,
    merged: Page,
    finished: bool,
}

impl Operator for ExchangeOperator {
    fn name(&self) -> &'static str {
        "Exchange"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<(), ExecutionError> {
        Err(ExecutionError::SourceInput(self.name()))
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.receiver.blocking_recv() {
                Some(ExchangeEvent::Page(page)) => self.merged.append(&page)?,
                Some(ExchangeEvent::Closed) => break,
                Some(ExchangeEvent::Failed(message)) => {
                    self.finished = true;
                    return Err(ExecutionError::Upstream(message));
                }
                None => {
                    self.finished = true;
                    return Err(ExecutionError::Upstream(format!("exchange {} was closed", self.id)));
                }
            }
        }
        self.finished = true;
        let layout = self.merged.layout().to_vec();
        let merged = std::mem::replace(&mut self.merged, Page::empty(layout));
        debug!("Exchange {} merged {} rows", self.id, merged.num_rows());
        Ok(if merged.is_empty() { None } else { Some(merged) })
    }

    // the exchange ends when its producers say so, not its driver
    fn finish(&mut self) {}

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn as_source(&mut self) -> Option<&mut dyn SourceOperator> {
        Some(self)
    }
}

impl SourceOperator for ExchangeOperator {
    fn source_id(&self) -> PlanNodeId {
        self.id
    }

    fn add_split(&mut self, split: Split) -> Result<(), ExecutionError> {
        let client = self
            .client
            .upgrade()
            .ok_or_else(|| ExecutionError::Upstream(format!("exchange {} was closed", self.id)))?;
        client.add_split(split)
    }

    fn no_more_splits(&mut self) {
        if let Some(client) = self.client.upgrade() {
            client.no_more_splits();
        }
    }
}

/// Hands out the single operator of an exchange; the client stays with the planner
pub struct ExchangeOperatorFactory {
    operator: Mutex<Option<ExchangeOperator>>,
}

impl ExchangeOperatorFactory {
    pub fn new(operator: ExchangeOperator) -> Self {
        Self {
            operator: Mutex::new(Some(operator)),
        }
    }
}

impl OperatorFactory for ExchangeOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        let mut slot = self
            .operator
            .lock()
            .map_err(|_| ExecutionError::Internal("exchange factory lock poisoned".to_string()))?;
        let operator = slot
            .take()
            .ok_or_else(|| ExecutionError::Internal("exchange operator already created".to_string()))?;
        Ok(Box::new(operator))
    }
}

/// Ends a pipeline feeding a local exchange
pub struct LocalExchangeSinkOperator {
    client: Arc<ExchangeClient>,
    channels: Vec<usize>,
    finished: bool,
}

impl Operator for LocalExchangeSinkOperator {
    fn name(&self) -> &'static str {
        "LocalExchangeSink"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        self.client.add_page(page.project(&self.channels))
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        Ok(None)
    }

    fn finish(&mut self) {
        if !self.finished {
            self.client.no_more_splits();
            self.finished = true;
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

pub struct LocalExchangeSinkOperatorFactory {
    client: Arc<ExchangeClient>,
    channels: Vec<usize>,
}

impl LocalExchangeSinkOperatorFactory {
    /// `channels` selects, in exchange order, the input columns sent downstream
    pub fn new(client: Arc<ExchangeClient>, channels: Vec<usize>) -> Self {
        Self { client, channels }
    }
}

impl OperatorFactory for LocalExchangeSinkOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(LocalExchangeSinkOperator {
            client: Arc::clone(&self.client),
            channels: self.channels.clone(),
            finished: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{DataType, Value};

    fn layout() -> Vec<ColumnMetadata> {
        vec![ColumnMetadata::new("total", DataType::Bigint)]
    }

    fn page(name: &str, values: &[i64]) -> Page {
        Page::from_rows(
            vec![ColumnMetadata::new(name, DataType::Bigint)],
            values.iter().map(|v| vec![Value::Bigint(*v)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_exchange_concatenates_every_source() {
        let (client, mut operator) = ExchangeClient::new(PlanNodeId(4), 2, layout());
        client.add_split(Split::Remote(page("partial_total", &[1, 2]))).unwrap();
        client.no_more_splits();
        client.add_page(page("partial_total", &[3])).unwrap();
        assert_eq!(client.remaining_sources(), 1);
        client.no_more_splits();

        let merged = operator.get_output().unwrap().unwrap();
        assert_eq!(merged.num_rows(), 3);
        // pages take the exchange's column names
        assert_eq!(merged.layout()[0].name, "total");
        assert!(operator.is_finished());
        assert!(operator.get_output().unwrap().is_none());
    }

    #[test]
    fn test_upstream_failure_fails_the_exchange() {
        let (client, mut operator) = ExchangeClient::new(PlanNodeId(4), 1, layout());
        client.fail("worker crashed".to_string());
        assert!(matches!(operator.get_output(), Err(ExecutionError::Upstream(m)) if m == "worker crashed"));
    }

    #[test]
    fn test_dropped_client_unblocks_the_exchange() {
        let (client, mut operator) = ExchangeClient::new(PlanNodeId(4), 1, layout());
        drop(client);
        assert!(matches!(operator.get_output(), Err(ExecutionError::Upstream(_))));
    }

    #[test]
    fn test_exchange_without_sources_is_finished_at_once() {
        let (_client, mut operator) = ExchangeClient::new(PlanNodeId(4), 0, layout());
        assert!(operator.get_output().unwrap().is_none());
        assert!(operator.is_finished());
    }

    #[test]
    fn test_local_sink_projects_and_closes() {
        let (client, mut operator) = ExchangeClient::new(PlanNodeId(4), 1, layout());
        let mut sink = LocalExchangeSinkOperatorFactory::new(client, vec![1])
            .create_operator()
            .unwrap();
        let input = Page::from_rows(
            vec![
                ColumnMetadata::new("host", DataType::Varchar),
                ColumnMetadata::new("total", DataType::Bigint),
            ],
            vec![vec![Value::Varchar("a".into()), Value::Bigint(7)]],
        )
        .unwrap();
        sink.add_input(input).unwrap();
        sink.finish();
        let merged = operator.get_output().unwrap().unwrap();
        assert_eq!(merged.row(0).values(), vec![Value::Bigint(7)]);
    }

    #[test]
    fn test_factory_creates_the_operator_once() {
        let (_client, operator) = ExchangeClient::new(PlanNodeId(4), 1, layout());
        let factory = ExchangeOperatorFactory::new(operator);
        assert!(factory.create_operator().is_ok());
        assert!(factory.create_operator().is_err());
    }
}

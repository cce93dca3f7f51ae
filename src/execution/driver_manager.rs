use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::operator::ExchangeClient;
use super::ExecutionError;
use crate::query::plan::PlanNodeId;
use crate::rpc::TaskResultSet;
use crate::spi::Split;
use crate::task::RequestId;

/// Number of cleaned up requests remembered so their late results can be dropped
const MAX_CLEANED_REQUESTS: usize = 4096;

#[derive(Default)]
struct Registry {
    operators: HashMap<RequestId, HashMap<PlanNodeId, Arc<ExchangeClient>>>,
    /// Results that arrived before their exchange was registered
    parked: HashMap<RequestId, HashMap<PlanNodeId, Vec<TaskResultSet>>>,
    cleaned: HashSet<RequestId>,
    /// Cleanup order, oldest first
    cleaned_order: VecDeque<RequestId>,
}

impl Registry {
    fn mark_cleaned(&mut self, request_id: RequestId) {
        if !self.cleaned.insert(request_id) {
            return;
        }
        self.cleaned_order.push_back(request_id);
        while self.cleaned_order.len() > MAX_CLEANED_REQUESTS {
            if let Some(oldest) = self.cleaned_order.pop_front() {
                self.cleaned.remove(&oldest);
            }
        }
    }
}

/// Routes results arriving from other tasks to the exchange waiting for them, per request
#[derive(Default)]
pub struct DriverManager {
    registry: Mutex<Registry>,
}

impl DriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>, ExecutionError> {
        self.registry
            .lock()
            .map_err(|_| ExecutionError::Internal("driver manager lock poisoned".to_string()))
    }

    /// Registers the exchange of `request_id` and hands it any results that were
    /// waiting for it. A second registration of the same exchange is ignored, and a
    /// request that was already cleaned up cannot register anything.
    pub fn register_source_operator(
        &self,
        request_id: RequestId,
        client: Arc<ExchangeClient>,
    ) -> Result<(), ExecutionError> {
        let node_id = client.id();
        let parked = {
            let mut registry = self.lock()?;
            if registry.cleaned.contains(&request_id) {
                return Err(ExecutionError::Upstream(format!(
                    "request {} was cleaned up before exchange {} started",
                    request_id, node_id
                )));
            }
            let operators = registry.operators.entry(request_id).or_default();
            if operators.contains_key(&node_id) {
                warn!("Exchange {} of request {} is already registered", node_id, request_id);
                return Ok(());
            }
            operators.insert(node_id, Arc::clone(&client));
            registry
                .parked
                .get_mut(&request_id)
                .and_then(|parked| parked.remove(&node_id))
                .unwrap_or_default()
        };
        debug!(
            "Registered exchange {} of request {} with {} parked results",
            node_id,
            request_id,
            parked.len()
        );
        for result in parked {
            apply(&client, result)?;
        }
        Ok(())
    }

    pub fn get_source_operator(&self, request_id: RequestId, node_id: PlanNodeId) -> Option<Arc<ExchangeClient>> {
        let registry = self.lock().ok()?;
        registry
            .operators
            .get(&request_id)
            .and_then(|operators| operators.get(&node_id))
            .cloned()
    }

    /// Hands a result to the exchange it targets, or parks it until that exchange
    /// is registered. Results of a cleaned up request are dropped.
    pub fn deliver(&self, result: TaskResultSet) -> Result<(), ExecutionError> {
        let request_id = result.task_id.request_id;
        let client = {
            let mut registry = self.lock()?;
            let client = registry
                .operators
                .get(&request_id)
                .and_then(|operators| operators.get(&result.target))
                .cloned();
            match client {
                Some(client) => client,
                None if registry.cleaned.contains(&request_id) => {
                    debug!(
                        "Dropping result of task {} for cleaned up request {}",
                        result.task_id, request_id
                    );
                    return Ok(());
                }
                None => {
                    debug!("Parking result of task {} for exchange {}", result.task_id, result.target);
                    registry
                        .parked
                        .entry(request_id)
                        .or_default()
                        .entry(result.target)
                        .or_default()
                        .push(result);
                    return Ok(());
                }
            }
        };
        apply(&client, result)
    }

    /// Drops everything held for a request
    pub fn cleanup(&self, request_id: RequestId) {
        match self.lock() {
            Ok(mut registry) => {
                let operators = registry.operators.remove(&request_id).map_or(0, |o| o.len());
                registry.parked.remove(&request_id);
                registry.mark_cleaned(request_id);
                info!("Cleaned up {} exchanges of request {}", operators, request_id);
            }
            Err(e) => warn!("Cleanup of request {} failed: {}", request_id, e),
        }
    }
}

fn apply(client: &ExchangeClient, result: TaskResultSet) -> Result<(), ExecutionError> {
    if let Some(failure) = result.failure {
        client.fail(format!("task {} on {}: {}", result.task_id, result.node_id, failure));
        return Ok(());
    }
    if let Some(page) = result.page {
        client.add_split(Split::Remote(page))?;
    }
    if result.no_more {
        client.no_more_splits();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::operator::Operator;
    use crate::page::{ColumnMetadata, DataType, Page, Value};
    use crate::task::TaskId;

    fn layout() -> Vec<ColumnMetadata> {
        vec![ColumnMetadata::new("g", DataType::Varchar)]
    }

    fn result(request_id: RequestId, page: Option<Page>, no_more: bool) -> TaskResultSet {
        TaskResultSet {
            task_id: TaskId::new(request_id, 1),
            node_id: "node-2".to_string(),
            target: PlanNodeId(7),
            page,
            no_more,
            failure: None,
        }
    }

    #[test]
    fn test_register_get_cleanup() {
        let manager = DriverManager::new();
        let request_id = RequestId::new();
        let (client, _operator) = ExchangeClient::new(PlanNodeId(7), 1, layout());
        manager.register_source_operator(request_id, Arc::clone(&client)).unwrap();

        let found = manager.get_source_operator(request_id, PlanNodeId(7)).unwrap();
        assert!(Arc::ptr_eq(&found, &client));
        assert!(manager.get_source_operator(request_id, PlanNodeId(8)).is_none());
        assert!(manager.get_source_operator(RequestId::new(), PlanNodeId(7)).is_none());

        manager.cleanup(request_id);
        assert!(manager.get_source_operator(request_id, PlanNodeId(7)).is_none());
    }

    #[test]
    fn test_duplicate_registration_keeps_the_first() {
        let manager = DriverManager::new();
        let request_id = RequestId::new();
        let (first, _a) = ExchangeClient::new(PlanNodeId(7), 1, layout());
        let (second, _b) = ExchangeClient::new(PlanNodeId(7), 1, layout());
        manager.register_source_operator(request_id, Arc::clone(&first)).unwrap();
        manager.register_source_operator(request_id, second).unwrap();
        let found = manager.get_source_operator(request_id, PlanNodeId(7)).unwrap();
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn test_early_results_are_parked_until_registration() {
        let manager = DriverManager::new();
        let request_id = RequestId::new();
        let page = Page::from_rows(layout(), vec![vec![Value::Varchar("a".into())]]).unwrap();
        manager.deliver(result(request_id, Some(page), false)).unwrap();
        manager.deliver(result(request_id, None, true)).unwrap();

        let (client, mut operator) = ExchangeClient::new(PlanNodeId(7), 1, layout());
        manager.register_source_operator(request_id, client).unwrap();
        let merged = operator.get_output().unwrap().unwrap();
        assert_eq!(merged.num_rows(), 1);
        assert!(operator.is_finished());
    }

    #[test]
    fn test_results_after_cleanup_are_dropped() {
        let manager = DriverManager::new();
        let request_id = RequestId::new();
        manager.cleanup(request_id);
        for _ in 0..1000 {
            let page = Page::from_rows(layout(), vec![vec![Value::Varchar("late".into())]]).unwrap();
            manager.deliver(result(request_id, Some(page), false)).unwrap();
        }

        let registry = manager.lock().unwrap();
        let parked: usize = registry.parked.values().flat_map(|p| p.values()).map(Vec::len).sum();
        assert_eq!(parked, 0);
        assert!(registry.operators.get(&request_id).is_none());
    }

    #[test]
    fn test_registration_after_cleanup_fails() {
        let manager = DriverManager::new();
        let request_id = RequestId::new();
        manager.cleanup(request_id);
        let (client, _operator) = ExchangeClient::new(PlanNodeId(7), 1, layout());
        assert!(matches!(
            manager.register_source_operator(request_id, client),
            Err(ExecutionError::Upstream(_))
        ));
        assert!(manager.get_source_operator(request_id, PlanNodeId(7)).is_none());
    }

    #[test]
    fn test_cleaned_requests_are_forgotten_oldest_first() {
        let manager = DriverManager::new();
        let first = RequestId::new();
        manager.cleanup(first);
        for _ in 0..MAX_CLEANED_REQUESTS {
            manager.cleanup(RequestId::new());
        }
        let registry = manager.lock().unwrap();
        assert_eq!(registry.cleaned.len(), MAX_CLEANED_REQUESTS);
        assert!(!registry.cleaned.contains(&first));
    }

    #[test]
    fn test_failed_result_fails_the_exchange() {
        let manager = DriverManager::new();
        let request_id = RequestId::new();
        let (client, mut operator) = ExchangeClient::new(PlanNodeId(7), 2, layout());
        manager.register_source_operator(request_id, client).unwrap();
        let mut failed = result(request_id, None, true);
        failed.failure = Some("shard 3 missing".to_string());
        manager.deliver(failed).unwrap();
        assert!(matches!(operator.get_output(), Err(ExecutionError::Upstream(_))));
    }
}

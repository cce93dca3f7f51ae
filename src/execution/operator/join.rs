use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use super::{Operator, OperatorFactory, PageBuffer};
use crate::execution::ExecutionError;
use crate::page::{Column, ColumnMetadata, HashKey, Page, Value};

/// Side of a join an output column is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Probe,
    Build,
}

/// Build-side rows indexed by join key
#[derive(Debug)]
pub struct LookupSource {
    page: Page,
    index: HashMap<HashKey, Vec<usize>>,
}

impl LookupSource {
    fn new(page: Page, key_channels: &[usize]) -> Self {
        let mut index: HashMap<HashKey, Vec<usize>> = HashMap::new();
        for row in page.rows() {
            let key: Vec<Value> = key_channels.iter().map(|c| row.get(*c)).collect();
            // null never equals anything
            if key.iter().any(Value::is_null) {
                continue;
            }
            index.entry(HashKey(key)).or_default().push(row.index());
        }
        Self { page, index }
    }

    fn positions(&self, key: Vec<Value>) -> &[usize] {
        self.index.get(&HashKey(key)).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Hands the finished build side of a join to its probe side
#[derive(Debug, Default)]
pub struct JoinBridge {
    lookup: Mutex<Option<Arc<LookupSource>>>,
}

impl JoinBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, lookup: LookupSource) -> Result<(), ExecutionError> {
        let mut slot = self
            .lookup
            .lock()
            .map_err(|_| ExecutionError::Internal("join bridge lock poisoned".to_string()))?;
        *slot = Some(Arc::new(lookup));
        Ok(())
    }

    fn get(&self) -> Result<Arc<LookupSource>, ExecutionError> {
        let slot = self
            .lookup
            .lock()
            .map_err(|_| ExecutionError::Internal("join bridge lock poisoned".to_string()))?;
        slot.clone()
            .ok_or_else(|| ExecutionError::Internal("probe started before the build side finished".to_string()))
    }
}

/// Collects every build-side page and publishes the lookup source when finished
pub struct HashBuilderOperator {
    bridge: Arc<JoinBridge>,
    key_channels: Vec<usize>,
    pages: Page,
    finished: bool,
}

impl Operator for HashBuilderOperator {
    fn name(&self) -> &'static str {
        "HashBuilder"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        self.pages.append(&page)?;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        Ok(None)
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        let pages = Page::empty(self.pages.layout().to_vec());
        let page = std::mem::replace(&mut self.pages, pages);
        let rows = page.num_rows();
        match self.bridge.set(LookupSource::new(page, &self.key_channels)) {
            Ok(()) => debug!("Built join lookup source over {} rows", rows),
            Err(e) => error!("Failed to publish join lookup source: {}", e),
        }
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

pub struct HashBuilderOperatorFactory {
    bridge: Arc<JoinBridge>,
    layout: Vec<ColumnMetadata>,
    key_channels: Vec<usize>,
}

impl HashBuilderOperatorFactory {
    pub fn new(bridge: Arc<JoinBridge>, layout: Vec<ColumnMetadata>, key_channels: Vec<usize>) -> Self {
        Self {
            bridge,
            layout,
            key_channels,
        }
    }
}

impl OperatorFactory for HashBuilderOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(HashBuilderOperator {
            bridge: Arc::clone(&self.bridge),
            key_channels: self.key_channels.clone(),
            pages: Page::empty(self.layout.clone()),
            finished: false,
        }))
    }
}

/// Probes the lookup source with every input row, emitting one row per match
pub struct LookupJoinOperator {
    bridge: Arc<JoinBridge>,
    lookup: Option<Arc<LookupSource>>,
    probe_key_channels: Vec<usize>,
    outputs: Vec<(ColumnMetadata, JoinSide, usize)>,
    buffer: PageBuffer,
}

impl LookupJoinOperator {
    fn lookup(&mut self) -> Result<Arc<LookupSource>, ExecutionError> {
        if let Some(lookup) = &self.lookup {
            return Ok(Arc::clone(lookup));
        }
        let lookup = self.bridge.get()?;
        self.lookup = Some(Arc::clone(&lookup));
        Ok(lookup)
    }
}

impl Operator for LookupJoinOperator {
    fn name(&self) -> &'static str {
        "LookupJoin"
    }

    fn needs_input(&self) -> bool {
        self.buffer.needs_input()
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        let lookup = self.lookup()?;
        let mut probe_positions = Vec::new();
        let mut build_positions = Vec::new();
        for row in page.rows() {
            let key: Vec<Value> = self.probe_key_channels.iter().map(|c| row.get(*c)).collect();
            if key.iter().any(Value::is_null) {
                continue;
            }
            for build in lookup.positions(key) {
                probe_positions.push(row.index());
                build_positions.push(*build);
            }
        }
        if probe_positions.is_empty() {
            return Ok(());
        }

        let probe = page.take(&probe_positions);
        let build = lookup.page.take(&build_positions);
        let mut layout = Vec::with_capacity(self.outputs.len());
        let mut columns: Vec<Column> = Vec::with_capacity(self.outputs.len());
        for (meta, side, channel) in &self.outputs {
            layout.push(meta.clone());
            let column = match side {
                JoinSide::Probe => probe.column(*channel),
                JoinSide::Build => build.column(*channel),
            };
            columns.push(column.clone());
        }
        let joined = if columns.is_empty() {
            Page::from_row_count(probe_positions.len())
        } else {
            Page::new(layout, columns)?
        };
        self.buffer.put(joined)
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        Ok(self.buffer.take())
    }

    fn finish(&mut self) {
        self.buffer.finish();
    }

    fn is_finished(&self) -> bool {
        self.buffer.is_finished()
    }
}

pub struct LookupJoinOperatorFactory {
    bridge: Arc<JoinBridge>,
    probe_key_channels: Vec<usize>,
    outputs: Vec<(ColumnMetadata, JoinSide, usize)>,
}

impl LookupJoinOperatorFactory {
    pub fn new(
        bridge: Arc<JoinBridge>,
        probe_key_channels: Vec<usize>,
        outputs: Vec<(ColumnMetadata, JoinSide, usize)>,
    ) -> Self {
        Self {
            bridge,
            probe_key_channels,
            outputs,
        }
    }
}

impl OperatorFactory for LookupJoinOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(LookupJoinOperator {
            bridge: Arc::clone(&self.bridge),
            lookup: None,
            probe_key_channels: self.probe_key_channels.clone(),
            outputs: self.outputs.clone(),
            buffer: PageBuffer::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;

    fn build_page() -> Page {
        Page::from_rows(
            vec![
                ColumnMetadata::new("mem_host", DataType::Varchar),
                ColumnMetadata::new("used", DataType::Bigint),
            ],
            vec![
                vec![Value::Varchar("a".into()), Value::Bigint(10)],
                vec![Value::Varchar("a".into()), Value::Bigint(11)],
                vec![Value::Null, Value::Bigint(12)],
            ],
        )
        .unwrap()
    }

    fn probe_page() -> Page {
        Page::from_rows(
            vec![
                ColumnMetadata::new("host", DataType::Varchar),
                ColumnMetadata::new("value", DataType::Double),
            ],
            vec![
                vec![Value::Varchar("a".into()), Value::Double(1.0)],
                vec![Value::Varchar("b".into()), Value::Double(2.0)],
                vec![Value::Null, Value::Double(3.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_hash_join_matches_equal_keys() {
        let bridge = Arc::new(JoinBridge::new());
        let mut builder = HashBuilderOperatorFactory::new(bridge.clone(), build_page().layout().to_vec(), vec![0])
            .create_operator()
            .unwrap();
        builder.add_input(build_page()).unwrap();
        builder.finish();
        assert!(builder.is_finished());

        let mut probe = LookupJoinOperatorFactory::new(
            bridge,
            vec![0],
            vec![
                (ColumnMetadata::new("host", DataType::Varchar), JoinSide::Probe, 0),
                (ColumnMetadata::new("used", DataType::Bigint), JoinSide::Build, 1),
            ],
        )
        .create_operator()
        .unwrap();
        probe.add_input(probe_page()).unwrap();
        let output = probe.get_output().unwrap().unwrap();
        let rows: Vec<Vec<Value>> = output.rows().map(|r| r.values()).collect();
        assert_eq!(
            rows,
            vec![
                vec![Value::Varchar("a".into()), Value::Bigint(10)],
                vec![Value::Varchar("a".into()), Value::Bigint(11)],
            ]
        );
    }

    #[test]
    fn test_probe_before_build_is_an_error() {
        let mut probe = LookupJoinOperatorFactory::new(Arc::new(JoinBridge::new()), vec![0], Vec::new())
            .create_operator()
            .unwrap();
        assert!(matches!(probe.add_input(probe_page()), Err(ExecutionError::Internal(_))));
    }
}

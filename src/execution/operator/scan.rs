use std::sync::Arc;

use super::{Operator, OperatorFactory, SourceOperator};
use crate::execution::ExecutionError;
use crate::page::{ColumnMetadata, Page};
use crate::query::plan::PlanNodeId;
use crate::spi::{PageSource, PageSourceProvider, Split, TableHandle};

/// Reads the pages of every split it is given from a storage page source
pub struct TableScanOperator {
    source_id: PlanNodeId,
    page_source: Box<dyn PageSource>,
    no_more_splits: bool,
    finished: bool,
}

impl Operator for TableScanOperator {
    fn name(&self) -> &'static str {
        "TableScan"
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
        let page = self.page_source.get_next_page()?;
        if page.is_none() && self.no_more_splits {
            self.finished = true;
        }
        Ok(page)
    }

    fn finish(&mut self) {
        self.no_more_splits = true;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn as_source(&mut self) -> Option<&mut dyn SourceOperator> {
        Some(self)
    }
}

impl SourceOperator for TableScanOperator {
    fn source_id(&self) -> PlanNodeId {
        self.source_id
    }

    fn add_split(&mut self, split: Split) -> Result<(), ExecutionError> {
        if self.no_more_splits {
            return Err(ExecutionError::Internal(format!(
                "split added to scan {} after no more splits",
                self.source_id
            )));
        }
        self.page_source.add_split(split)?;
        Ok(())
    }

    fn no_more_splits(&mut self) {
        self.no_more_splits = true;
    }
}

pub struct TableScanOperatorFactory {
    source_id: PlanNodeId,
    table: TableHandle,
    outputs: Vec<ColumnMetadata>,
    assignments: Vec<String>,
    provider: Arc<dyn PageSourceProvider>,
}

impl TableScanOperatorFactory {
    pub fn new(
        source_id: PlanNodeId,
        table: TableHandle,
        outputs: Vec<ColumnMetadata>,
        assignments: Vec<String>,
        provider: Arc<dyn PageSourceProvider>,
    ) -> Self {
        Self {
            source_id,
            table,
            outputs,
            assignments,
            provider,
        }
    }
}

impl OperatorFactory for TableScanOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        let page_source = self
            .provider
            .create_page_source(&self.table, &self.outputs, &self.assignments)?;
        Ok(Box::new(TableScanOperator {
            source_id: self.source_id,
            page_source,
            no_more_splits: false,
            finished: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{DataType, Value};
    use crate::spi::{ColumnKind, ColumnSchema, MemoryStorage, SplitSourceProvider, TableSchema};

    fn storage() -> Arc<MemoryStorage> {
        let storage = MemoryStorage::new(2);
        let cpu = TableHandle::new("db", "public", "cpu");
        storage
            .create_table(
                cpu.clone(),
                TableSchema::new(vec![
                    ColumnSchema::new("host", DataType::Varchar, ColumnKind::Tag),
                    ColumnSchema::new("value", DataType::Double, ColumnKind::Field),
                ]),
            )
            .unwrap();
        storage.add_shard(&cpu, 0, "node-1").unwrap();
        storage
            .append_rows(
                &cpu,
                0,
                vec![
                    vec![Value::Varchar("a".into()), Value::Double(1.0)],
                    vec![Value::Varchar("b".into()), Value::Double(2.0)],
                    vec![Value::Varchar("c".into()), Value::Double(3.0)],
                ],
            )
            .unwrap();
        Arc::new(storage)
    }

    #[test]
    fn test_scan_drains_splits_then_finishes() {
        let storage = storage();
        let cpu = TableHandle::new("db", "public", "cpu");
        let factory = TableScanOperatorFactory::new(
            PlanNodeId(0),
            cpu.clone(),
            vec![ColumnMetadata::new("value", DataType::Double)],
            vec!["value".to_string()],
            storage.clone(),
        );
        let mut operator = factory.create_operator().unwrap();
        let mut splits = storage
            .create_split_sources(&cpu, &[0], &["value".to_string()], None)
            .unwrap();
        let split = splits[0].next_split().unwrap().unwrap();
        let source = operator.as_source().unwrap();
        assert_eq!(source.source_id(), PlanNodeId(0));
        source.add_split(split).unwrap();
        source.no_more_splits();

        let mut rows = 0;
        while let Some(page) = operator.get_output().unwrap() {
            assert_eq!(page.layout()[0].name, "value");
            rows += page.num_rows();
        }
        assert_eq!(rows, 3);
        assert!(operator.is_finished());
        assert!(matches!(
            operator.add_input(Page::from_row_count(1)),
            Err(ExecutionError::SourceInput("TableScan"))
        ));
    }
}

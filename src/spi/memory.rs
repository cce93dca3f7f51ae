use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::{
    Metadata, MetadataError, NodeId, PageSource, PageSourceProvider, Partitions, ShardId, Split, SplitSource,
    SplitSourceProvider, StorageError, StorageSplit, TableHandle, TableSchema,
};
use crate::execution::expression::PhysicalExpr;
use crate::page::{ColumnMetadata, Page, Value};
use crate::query::plan::{Expression, Symbol};

/// Default number of rows per page produced by a scan
pub const DEFAULT_MAX_ROWS_PER_PAGE: usize = 1024;

/// Rows of one shard, owned by one node
#[derive(Debug, Clone)]
struct Shard {
    node: NodeId,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    shards: BTreeMap<ShardId, Shard>,
}

type Tables = Arc<RwLock<HashMap<TableHandle, MemoryTable>>>;

/// In-memory sharded table store serving as catalog, split source and page source
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    tables: Tables,
    max_rows_per_page: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROWS_PER_PAGE)
    }
}

impl MemoryStorage {
    pub fn new(max_rows_per_page: usize) -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            max_rows_per_page: max_rows_per_page.max(1),
        }
    }

    /// Registers a new, empty table
    pub fn create_table(&self, handle: TableHandle, schema: TableSchema) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        if tables.contains_key(&handle) {
            return Err(StorageError::Other(format!("table {} already exists", handle)));
        }
        info!("Created table {} with {} columns", handle, schema.columns.len());
        tables.insert(
            handle,
            MemoryTable {
                schema,
                shards: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Adds an empty shard owned by `node`
    pub fn add_shard(&self, handle: &TableHandle, shard: ShardId, node: &str) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        let table = tables
            .get_mut(handle)
            .ok_or_else(|| StorageError::NotFound(handle.to_string()))?;
        table.shards.entry(shard).or_insert_with(|| Shard {
            node: node.to_string(),
            rows: Vec::new(),
        });
        debug!("Added shard {} of {} on {}", shard, handle, node);
        Ok(())
    }

    /// Appends rows to a shard, coercing each value to its column type
    pub fn append_rows(
        &self,
        handle: &TableHandle,
        shard: ShardId,
        rows: Vec<Vec<Value>>,
    ) -> Result<usize, StorageError> {
        let mut tables = self.write()?;
        let table = tables
            .get_mut(handle)
            .ok_or_else(|| StorageError::NotFound(handle.to_string()))?;
        let MemoryTable { schema, shards } = table;
        let target = shards
            .get_mut(&shard)
            .ok_or_else(|| StorageError::NotFound(format!("shard {} of {}", shard, handle)))?;

        let mut coerced = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != schema.columns.len() {
                return Err(StorageError::Other(format!(
                    "row has {} values, {} has {} columns",
                    row.len(),
                    handle,
                    schema.columns.len()
                )));
            }
            let values = row
                .into_iter()
                .zip(schema.columns.iter())
                .map(|(value, column)| {
                    value.cast(column.data_type).ok_or_else(|| {
                        StorageError::Other(format!("cannot store {} in column {}", value, column.name))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            coerced.push(values);
        }
        let count = coerced.len();
        target.rows.extend(coerced);
        Ok(count)
    }

    /// Loads CSV rows into a shard. The header must name every table column; empty
    /// fields are stored as null.
    pub fn load_csv<R: Read>(&self, handle: &TableHandle, shard: ShardId, reader: R) -> Result<usize, StorageError> {
        let schema = self.schema(handle)?;
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader.headers()?.clone();

        let positions = schema
            .columns
            .iter()
            .map(|column| {
                headers
                    .iter()
                    .position(|h| h.trim().eq_ignore_ascii_case(&column.name))
                    .ok_or_else(|| StorageError::Other(format!("CSV is missing column {}", column.name)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = positions
                .iter()
                .map(|&p| match record.get(p).map(str::trim) {
                    None | Some("") => Value::Null,
                    Some(field) => Value::Varchar(field.to_string()),
                })
                .collect();
            rows.push(row);
        }
        let count = self.append_rows(handle, shard, rows)?;
        info!("Loaded {} rows into shard {} of {}", count, shard, handle);
        Ok(count)
    }

    fn schema(&self, handle: &TableHandle) -> Result<TableSchema, StorageError> {
        let tables = self.read()?;
        tables
            .get(handle)
            .map(|t| t.schema.clone())
            .ok_or_else(|| StorageError::NotFound(handle.to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<TableHandle, MemoryTable>>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::Other("table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<TableHandle, MemoryTable>>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::Other("table lock poisoned".to_string()))
    }
}

impl Metadata for MemoryStorage {
    fn get_table_metadata(
        &self,
        database: &str,
        namespace: &str,
        table: &str,
    ) -> Result<(TableSchema, Partitions), MetadataError> {
        let handle = TableHandle::new(database, namespace, table);
        let tables = self
            .tables
            .read()
            .map_err(|_| MetadataError::Unavailable("table lock poisoned".to_string()))?;
        let table = tables
            .get(&handle)
            .ok_or_else(|| MetadataError::NotFound(handle.to_string()))?;

        let mut partitions = Partitions::new();
        for (shard_id, shard) in &table.shards {
            partitions.entry(shard.node.clone()).or_default().push(*shard_id);
        }
        Ok((table.schema.clone(), partitions))
    }

    fn get_table_handle(&self, database: &str, namespace: &str, table: &str) -> Result<TableHandle, MetadataError> {
        let handle = TableHandle::new(database, namespace, table);
        let tables = self
            .tables
            .read()
            .map_err(|_| MetadataError::Unavailable("table lock poisoned".to_string()))?;
        if tables.contains_key(&handle) {
            Ok(handle)
        } else {
            Err(MetadataError::NotFound(handle.to_string()))
        }
    }
}

/// Hands out a fixed list of splits
pub struct MemorySplitSource {
    splits: VecDeque<Split>,
}

impl SplitSource for MemorySplitSource {
    fn next_split(&mut self) -> Result<Option<Split>, StorageError> {
        Ok(self.splits.pop_front())
    }
}

impl SplitSourceProvider for MemoryStorage {
    fn create_split_sources(
        &self,
        table: &TableHandle,
        shards: &[ShardId],
        _output_columns: &[String],
        predicate: Option<&Expression>,
    ) -> Result<Vec<Box<dyn SplitSource>>, StorageError> {
        let tables = self.read()?;
        let stored = tables
            .get(table)
            .ok_or_else(|| StorageError::NotFound(table.to_string()))?;

        let mut sources: Vec<Box<dyn SplitSource>> = Vec::with_capacity(shards.len());
        for shard in shards {
            if !stored.shards.contains_key(shard) {
                return Err(StorageError::NotFound(format!("shard {} of {}", shard, table)));
            }
            let split = Split::Storage(StorageSplit {
                table: table.clone(),
                shard: *shard,
                predicate: predicate.cloned(),
            });
            sources.push(Box::new(MemorySplitSource {
                splits: VecDeque::from([split]),
            }));
        }
        Ok(sources)
    }
}

impl PageSourceProvider for MemoryStorage {
    fn create_page_source(
        &self,
        table: &TableHandle,
        outputs: &[ColumnMetadata],
        assignments: &[String],
    ) -> Result<Box<dyn PageSource>, StorageError> {
        let schema = self.schema(table)?;
        let channels = assignments
            .iter()
            .map(|column| {
                schema
                    .index_of(column)
                    .ok_or_else(|| StorageError::Other(format!("{} has no column {}", table, column)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(MemoryPageSource {
            tables: Arc::clone(&self.tables),
            table: table.clone(),
            schema,
            outputs: outputs.to_vec(),
            channels,
            max_rows_per_page: self.max_rows_per_page,
            pending: VecDeque::new(),
        }))
    }
}

/// Reads the rows of storage splits into pages of at most `max_rows_per_page` rows
pub struct MemoryPageSource {
    tables: Tables,
    table: TableHandle,
    schema: TableSchema,
    outputs: Vec<ColumnMetadata>,
    /// Table column index for each output
    channels: Vec<usize>,
    max_rows_per_page: usize,
    pending: VecDeque<Page>,
}

impl MemoryPageSource {
    fn table_layout(&self) -> (Vec<ColumnMetadata>, Vec<Symbol>) {
        let layout = self
            .schema
            .columns
            .iter()
            .map(|c| ColumnMetadata::new(c.name.clone(), c.data_type))
            .collect();
        let symbols = self
            .schema
            .columns
            .iter()
            .map(|c| Symbol::new(c.name.clone(), c.data_type))
            .collect();
        (layout, symbols)
    }
}

impl PageSource for MemoryPageSource {
    fn add_split(&mut self, split: Split) -> Result<(), StorageError> {
        let split = match split {
            Split::Storage(split) if split.table == self.table => split,
            Split::Storage(split) => {
                return Err(StorageError::InvalidSplit(format!(
                    "split of {} given to a page source of {}",
                    split.table, self.table
                )))
            }
            Split::Remote(_) => {
                return Err(StorageError::InvalidSplit("remote split given to a storage scan".to_string()))
            }
        };

        let rows = {
            let tables = self
                .tables
                .read()
                .map_err(|_| StorageError::Other("table lock poisoned".to_string()))?;
            let table = tables
                .get(&self.table)
                .ok_or_else(|| StorageError::NotFound(self.table.to_string()))?;
            table
                .shards
                .get(&split.shard)
                .map(|s| s.rows.clone())
                .ok_or_else(|| StorageError::NotFound(format!("shard {} of {}", split.shard, self.table)))?
        };

        let (layout, symbols) = self.table_layout();
        let mut page = Page::from_rows(layout, rows)?;
        if let Some(predicate) = &split.predicate {
            let predicate =
                PhysicalExpr::compile(predicate, &symbols).map_err(|e| StorageError::Other(e.to_string()))?;
            let mask = predicate
                .evaluate_mask(&page)
                .map_err(|e| StorageError::Other(e.to_string()))?;
            page = page.filter(&mask);
        }

        let total = page.num_rows();
        let mut start = 0;
        while start < total {
            let end = (start + self.max_rows_per_page).min(total);
            let positions: Vec<usize> = (start..end).collect();
            let chunk = if self.channels.is_empty() {
                Page::from_row_count(positions.len())
            } else {
                let projected = page.take(&positions).project(&self.channels);
                let names: Vec<String> = self.outputs.iter().map(|o| o.name.clone()).collect();
                projected.rename(&names)?
            };
            self.pending.push_back(chunk);
            start = end;
        }
        debug!("Shard {} of {} produced {} rows", split.shard, self.table, total);
        Ok(())
    }

    fn get_next_page(&mut self) -> Result<Option<Page>, StorageError> {
        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;
    use crate::query::plan::ComparisonOperator;
    use crate::spi::{ColumnKind, ColumnSchema};

    fn cpu() -> TableHandle {
        TableHandle::new("db", "public", "cpu")
    }

    fn storage() -> MemoryStorage {
        let storage = MemoryStorage::new(2);
        storage
            .create_table(
                cpu(),
                TableSchema::new(vec![
                    ColumnSchema::new("time", DataType::Timestamp, ColumnKind::Timestamp),
                    ColumnSchema::new("host", DataType::Varchar, ColumnKind::Tag),
                    ColumnSchema::new("value", DataType::Double, ColumnKind::Field),
                ]),
            )
            .unwrap();
        storage.add_shard(&cpu(), 0, "node-1").unwrap();
        storage.add_shard(&cpu(), 1, "node-2").unwrap();
        storage
    }

    fn drain(source: &mut dyn PageSource) -> Vec<Page> {
        let mut pages = Vec::new();
        while let Some(page) = source.get_next_page().unwrap() {
            pages.push(page);
        }
        pages
    }

    #[test]
    fn test_metadata_groups_shards_by_node() {
        let storage = storage();
        let (schema, partitions) = storage.get_table_metadata("db", "public", "cpu").unwrap();
        assert_eq!(schema.columns.len(), 3);
        assert_eq!(partitions.get("node-1"), Some(&vec![0]));
        assert_eq!(partitions.get("node-2"), Some(&vec![1]));
        assert!(storage
            .get_table_metadata("db", "public", "mem")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_load_csv_and_scan() {
        let storage = storage();
        let csv = "time,host,value\n1970-01-01T00:00:01Z,a,1.5\n2000000000,b,\n3000000000,a,2.5\n";
        assert_eq!(storage.load_csv(&cpu(), 0, csv.as_bytes()).unwrap(), 3);

        let mut sources = storage
            .create_split_sources(&cpu(), &[0], &["host".to_string()], None)
            .unwrap();
        assert_eq!(sources.len(), 1);
        let mut page_source = storage
            .create_page_source(
                &cpu(),
                &[
                    ColumnMetadata::new("h", DataType::Varchar),
                    ColumnMetadata::new("v", DataType::Double),
                ],
                &["host".to_string(), "value".to_string()],
            )
            .unwrap();
        while let Some(split) = sources[0].next_split().unwrap() {
            page_source.add_split(split).unwrap();
        }
        let pages = drain(page_source.as_mut());
        // three rows, two per page
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].layout()[0].name, "h");
        assert_eq!(pages[0].row(1).get(1), Value::Null);
        assert_eq!(pages[1].row(0).get(0), Value::Varchar("a".into()));
    }

    #[test]
    fn test_predicate_hint_filters_rows() {
        let storage = storage();
        storage
            .append_rows(
                &cpu(),
                1,
                vec![
                    vec![Value::Bigint(1), Value::Varchar("a".into()), Value::Double(1.0)],
                    vec![Value::Bigint(2), Value::Varchar("b".into()), Value::Double(9.0)],
                ],
            )
            .unwrap();
        let predicate = Expression::comparison(
            ComparisonOperator::Gt,
            Symbol::new("value", DataType::Double).to_reference(),
            Expression::literal(Value::Double(5.0), DataType::Double),
        );
        let mut sources = storage
            .create_split_sources(&cpu(), &[1], &[], Some(&predicate))
            .unwrap();
        let mut page_source = storage.create_page_source(&cpu(), &[], &[]).unwrap();
        let split = sources[0].next_split().unwrap().unwrap();
        page_source.add_split(split).unwrap();
        let pages = drain(page_source.as_mut());
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].num_columns(), 0);
        assert_eq!(pages[0].num_rows(), 1);
    }

    #[test]
    fn test_unknown_shard_is_not_found() {
        let storage = storage();
        let err = storage.create_split_sources(&cpu(), &[7], &[], None).err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_append_rejects_uncoercible_values() {
        let storage = storage();
        let result = storage.append_rows(
            &cpu(),
            0,
            vec![vec![Value::Bigint(1), Value::Varchar("a".into()), Value::Varchar("x".into())]],
        );
        assert!(result.is_err());
    }
}

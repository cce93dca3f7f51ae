//! Interfaces the query core consumes: catalog metadata, split enumeration and page
//! reading. Storage engines plug in by implementing these traits.

pub mod memory;

pub use memory::MemoryStorage;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::page::{ColumnMetadata, DataType, Page, PageError};
use crate::query::plan::Expression;

/// Identifier of a node in the cluster
pub type NodeId = String;

/// Identifier of a shard of a table
pub type ShardId = u32;

/// Shards of a table grouped by the node that owns them
pub type Partitions = BTreeMap<NodeId, Vec<ShardId>>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Table not found: {0}")]
    NotFound(String),
    #[error("Metadata unavailable: {0}")]
    Unavailable(String),
}

impl MetadataError {
    /// Only a missing table is something a caller may recover from
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Series or shard not found: {0}")]
    NotFound(String),
    #[error("Invalid split: {0}")]
    InvalidSplit(String),
    #[error("Page error: {0}")]
    Page(#[from] PageError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Adapters may treat this class of error as an empty result
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Fully qualified reference to a table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableHandle {
    pub database: String,
    pub namespace: String,
    pub table: String,
}

impl TableHandle {
    pub fn new(database: &str, namespace: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            namespace: namespace.to_string(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.namespace, self.table)
    }
}

/// Role of a column in a time-series table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Timestamp,
    Tag,
    Field,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub kind: ColumnKind,
}

impl ColumnSchema {
    pub fn new(name: &str, data_type: DataType, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Catalog lookups used by the analyzer
pub trait Metadata: Send + Sync {
    fn get_table_metadata(
        &self,
        database: &str,
        namespace: &str,
        table: &str,
    ) -> Result<(TableSchema, Partitions), MetadataError>;

    fn get_table_handle(
        &self,
        database: &str,
        namespace: &str,
        table: &str,
    ) -> Result<TableHandle, MetadataError>;
}

/// One unit of scannable or exchanged input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Split {
    Storage(StorageSplit),
    Remote(Page),
}

/// A shard (or slice of one) of a stored table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSplit {
    pub table: TableHandle,
    pub shard: ShardId,
    /// Predicate over table column names that the page source may apply early
    pub predicate: Option<Expression>,
}

/// Lazily enumerates the splits of a table
pub trait SplitSource: Send {
    fn next_split(&mut self) -> Result<Option<Split>, StorageError>;
}

pub trait SplitSourceProvider: Send + Sync {
    /// Creates one split source per independently scannable stream of `shards`
    fn create_split_sources(
        &self,
        table: &TableHandle,
        shards: &[ShardId],
        output_columns: &[String],
        predicate: Option<&Expression>,
    ) -> Result<Vec<Box<dyn SplitSource>>, StorageError>;
}

/// Turns splits into pages
pub trait PageSource: Send {
    fn add_split(&mut self, split: Split) -> Result<(), StorageError>;

    /// Returns the next page, or `None` once every added split is drained
    fn get_next_page(&mut self) -> Result<Option<Page>, StorageError>;
}

pub trait PageSourceProvider: Send + Sync {
    /// `outputs[i]` describes the page column filled from table column `assignments[i]`
    fn create_page_source(
        &self,
        table: &TableHandle,
        outputs: &[ColumnMetadata],
        assignments: &[String],
    ) -> Result<Box<dyn PageSource>, StorageError>;
}

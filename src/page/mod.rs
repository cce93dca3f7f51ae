//! Columnar pages exchanged between operators, tasks and nodes.

pub mod block;
pub mod types;

pub use block::{Block, BlockBuilder};
pub use types::{DataType, HashKey, Value};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Column {column} has {actual} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: DataType, actual: DataType },
    #[error("Page layout mismatch: {0}")]
    LayoutMismatch(String),
}

/// Describes one column of a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    /// Name of the aggregate function that produced the column, if any
    pub aggregate: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            aggregate: None,
        }
    }

    pub fn with_aggregate(mut self, function: impl Into<String>) -> Self {
        self.aggregate = Some(function.into());
        self
    }
}

/// A column of a page, backed by one typed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    block: Block,
}

impl Column {
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block
    }

    pub fn num_rows(&self) -> usize {
        self.block.len()
    }

    pub fn get(&self, row: usize) -> Value {
        self.block.get(row)
    }
}

/// An ordered set of equally long columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    layout: Vec<ColumnMetadata>,
    columns: Vec<Column>,
    num_rows: usize,
}

impl Page {
    /// Creates a page, checking that every column has the same number of rows
    pub fn new(layout: Vec<ColumnMetadata>, columns: Vec<Column>) -> Result<Self, PageError> {
        if layout.len() != columns.len() {
            return Err(PageError::LayoutMismatch(format!(
                "{} column descriptors for {} columns",
                layout.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map_or(0, Column::num_rows);
        for (meta, column) in layout.iter().zip(columns.iter()) {
            if column.num_rows() != num_rows {
                return Err(PageError::ColumnLengthMismatch {
                    column: meta.name.clone(),
                    expected: num_rows,
                    actual: column.num_rows(),
                });
            }
            if column.block().data_type() != meta.data_type {
                return Err(PageError::TypeMismatch {
                    expected: meta.data_type,
                    actual: column.block().data_type(),
                });
            }
        }
        Ok(Self {
            layout,
            columns,
            num_rows,
        })
    }

    /// Creates a page from row-major values
    pub fn from_rows(layout: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>) -> Result<Self, PageError> {
        let mut builders: Vec<BlockBuilder> = layout
            .iter()
            .map(|meta| BlockBuilder::with_capacity(meta.data_type, rows.len()))
            .collect();
        for row in rows {
            if row.len() != builders.len() {
                return Err(PageError::LayoutMismatch(format!(
                    "row has {} values, page has {} columns",
                    row.len(),
                    builders.len()
                )));
            }
            for (builder, value) in builders.iter_mut().zip(row) {
                builder.push(value)?;
            }
        }
        let columns = builders.into_iter().map(|b| Column::new(b.build())).collect();
        Self::new(layout, columns)
    }

    /// Creates a page with the given layout and no rows
    pub fn empty(layout: Vec<ColumnMetadata>) -> Self {
        let columns = layout
            .iter()
            .map(|meta| Column::new(Block::empty(meta.data_type)))
            .collect();
        Self {
            layout,
            columns,
            num_rows: 0,
        }
    }

    /// Creates a page with no columns that still carries a row count, as produced
    /// by a scan whose outputs were all pruned away
    pub fn from_row_count(num_rows: usize) -> Self {
        Self {
            layout: Vec::new(),
            columns: Vec::new(),
            num_rows,
        }
    }

    pub fn layout(&self) -> &[ColumnMetadata] {
        &self.layout
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Returns the position of the column with the given name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.layout.iter().position(|meta| meta.name == name)
    }

    /// Returns a zero-copy view of one row
    pub fn row(&self, index: usize) -> Row<'_> {
        Row { page: self, index }
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.num_rows).map(move |index| Row { page: self, index })
    }

    /// Keeps the rows whose mask entry is true
    pub fn filter(&self, mask: &[bool]) -> Page {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|c| Column::new(c.block().filter(mask)))
            .collect();
        let num_rows = columns
            .first()
            .map_or_else(|| mask.iter().filter(|m| **m).count(), Column::num_rows);
        Page {
            layout: self.layout.clone(),
            columns,
            num_rows,
        }
    }

    /// Gathers the given row positions, in order
    pub fn take(&self, positions: &[usize]) -> Page {
        Page {
            layout: self.layout.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.block().take(positions)))
                .collect(),
            num_rows: positions.len(),
        }
    }

    /// Appends the rows of a page with an identical column layout
    pub fn append(&mut self, other: &Page) -> Result<(), PageError> {
        if self.layout.len() != other.layout.len()
            || self
                .layout
                .iter()
                .zip(other.layout.iter())
                .any(|(a, b)| a.data_type != b.data_type)
        {
            return Err(PageError::LayoutMismatch(
                "cannot concatenate pages with different column types".to_string(),
            ));
        }
        for (column, other_column) in self.columns.iter_mut().zip(other.columns.iter()) {
            column.block.append(other_column.block())?;
        }
        self.num_rows += other.num_rows;
        Ok(())
    }

    /// Returns a copy of the page with the column names replaced
    pub fn rename(mut self, names: &[String]) -> Result<Page, PageError> {
        if names.len() != self.layout.len() {
            return Err(PageError::LayoutMismatch(format!(
                "{} names for {} columns",
                names.len(),
                self.layout.len()
            )));
        }
        for (meta, name) in self.layout.iter_mut().zip(names.iter()) {
            meta.name = name.clone();
        }
        Ok(self)
    }

    /// Returns a page made of the selected columns, in the given order
    pub fn project(&self, channels: &[usize]) -> Page {
        Page {
            layout: channels.iter().map(|&c| self.layout[c].clone()).collect(),
            columns: channels.iter().map(|&c| self.columns[c].clone()).collect(),
            num_rows: self.num_rows,
        }
    }
}

/// Zero-copy view of a single row of a page
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    page: &'a Page,
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: usize) -> Value {
        self.page.columns[column].get(self.index)
    }

    /// Looks a value up by column name
    pub fn get_by_name(&self, name: &str) -> Option<Value> {
        self.page.column_index(name).map(|c| self.get(c))
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.page.num_columns()).map(|c| self.get(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata::new("host", DataType::Varchar),
            ColumnMetadata::new("value", DataType::Double),
        ]
    }

    #[test]
    fn test_page_rejects_uneven_columns() {
        let result = Page::new(
            layout(),
            vec![
                Column::new(Block::Varchar(vec![Some("a".into())])),
                Column::new(Block::Double(vec![Some(1.0), Some(2.0)])),
            ],
        );
        assert!(matches!(result, Err(PageError::ColumnLengthMismatch { .. })));
    }

    #[test]
    fn test_rows_are_views_into_page() {
        let page = Page::from_rows(
            layout(),
            vec![
                vec![Value::Varchar("a".into()), Value::Double(1.0)],
                vec![Value::Varchar("b".into()), Value::Bigint(2)],
            ],
        )
        .unwrap();
        assert_eq!(page.num_rows(), 2);
        let rows: Vec<Vec<Value>> = page.rows().map(|r| r.values()).collect();
        assert_eq!(rows[1], vec![Value::Varchar("b".into()), Value::Double(2.0)]);
        assert_eq!(page.row(0).get_by_name("value"), Some(Value::Double(1.0)));
    }

    #[test]
    fn test_append_concatenates_rows() {
        let mut first = Page::from_rows(
            layout(),
            vec![vec![Value::Varchar("a".into()), Value::Double(1.0)]],
        )
        .unwrap();
        let second = Page::from_rows(
            layout(),
            vec![
                vec![Value::Varchar("b".into()), Value::Double(2.0)],
                vec![Value::Varchar("c".into()), Value::Null],
            ],
        )
        .unwrap();
        first.append(&second).unwrap();
        assert_eq!(first.num_rows(), 3);
        assert_eq!(first.row(2).get(1), Value::Null);
    }

    #[test]
    fn test_append_rejects_different_layout() {
        let mut first = Page::empty(layout());
        let other = Page::empty(vec![ColumnMetadata::new("x", DataType::Bigint)]);
        assert!(matches!(first.append(&other), Err(PageError::LayoutMismatch(_))));
    }

    #[test]
    fn test_filter_and_project() {
        let page = Page::from_rows(
            layout(),
            vec![
                vec![Value::Varchar("a".into()), Value::Double(1.0)],
                vec![Value::Varchar("b".into()), Value::Double(2.0)],
            ],
        )
        .unwrap();
        let filtered = page.filter(&[false, true]);
        assert_eq!(filtered.num_rows(), 1);
        let projected = filtered.project(&[1]);
        assert_eq!(projected.layout()[0].name, "value");
        assert_eq!(projected.row(0).get(0), Value::Double(2.0));
    }

    #[test]
    fn test_page_serde_round_trip() {
        let page = Page::from_rows(
            layout(),
            vec![vec![Value::Varchar("a".into()), Value::Double(1.0)]],
        )
        .unwrap();
        let encoded = serde_json::to_vec(&page).unwrap();
        let decoded: Page = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, page);
    }
}

use super::{Operator, OperatorFactory, PageBuffer};
use crate::execution::expression::PhysicalExpr;
use crate::execution::ExecutionError;
use crate::page::{Column, ColumnMetadata, Page};

/// Computes one output column per expression
pub struct ProjectOperator {
    projections: Vec<(ColumnMetadata, PhysicalExpr)>,
    buffer: PageBuffer,
}

impl Operator for ProjectOperator {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn needs_input(&self) -> bool {
        self.buffer.needs_input()
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        let projected = if self.projections.is_empty() {
            Page::from_row_count(page.num_rows())
        } else {
            let mut layout = Vec::with_capacity(self.projections.len());
            let mut columns = Vec::with_capacity(self.projections.len());
            for (meta, expression) in &self.projections {
                layout.push(meta.clone());
                columns.push(Column::new(expression.evaluate(&page)?));
            }
            Page::new(layout, columns)?
        };
        self.buffer.put(projected)
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

pub struct ProjectOperatorFactory {
    projections: Vec<(ColumnMetadata, PhysicalExpr)>,
}

impl ProjectOperatorFactory {
    pub fn new(projections: Vec<(ColumnMetadata, PhysicalExpr)>) -> Self {
        Self { projections }
    }
}

impl OperatorFactory for ProjectOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(ProjectOperator {
            projections: self.projections.clone(),
            buffer: PageBuffer::default(),
        }))
    }
}

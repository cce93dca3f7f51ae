use super::{Operator, OperatorFactory};
use crate::execution::ExecutionError;
use crate::page::Page;

/// Emits a constant page once
pub struct ValuesOperator {
    page: Option<Page>,
}

impl Operator for ValuesOperator {
    fn name(&self) -> &'static str {
        "Values"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<(), ExecutionError> {
        Err(ExecutionError::SourceInput(self.name()))
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        Ok(self.page.take().filter(|page| !page.is_empty()))
    }

    fn finish(&mut self) {}

    fn is_finished(&self) -> bool {
        self.page.is_none()
    }
}

pub struct ValuesOperatorFactory {
    page: Page,
}

impl ValuesOperatorFactory {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

impl OperatorFactory for ValuesOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(ValuesOperator {
            page: Some(self.page.clone()),
        }))
    }
}

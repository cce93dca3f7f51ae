use std::sync::Arc;

use super::{Operator, OperatorFactory};
use crate::execution::ExecutionError;
use crate::page::Page;
use crate::task::OutputBuffer;

/// Ends the pipeline producing a task's results. Pages are laid out as the fragment
/// declares and handed to the task's output buffer; the task itself signals the end
/// of its output once every pipeline is done.
pub struct TaskOutputOperator {
    buffer: Arc<dyn OutputBuffer>,
    channels: Vec<usize>,
    names: Vec<String>,
    finished: bool,
}

impl Operator for TaskOutputOperator {
    fn name(&self) -> &'static str {
        "TaskOutput"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        let page = page.project(&self.channels).rename(&self.names)?;
        self.buffer.add_page(page)
    }

    fn get_output(&mut self) -> Result<Option<Page>, ExecutionError> {
        Ok(None)
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

pub struct TaskOutputOperatorFactory {
    buffer: Arc<dyn OutputBuffer>,
    channels: Vec<usize>,
    names: Vec<String>,
}

impl TaskOutputOperatorFactory {
    pub fn new(buffer: Arc<dyn OutputBuffer>, channels: Vec<usize>, names: Vec<String>) -> Self {
        Self {
            buffer,
            channels,
            names,
        }
    }
}

impl OperatorFactory for TaskOutputOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(TaskOutputOperator {
            buffer: Arc::clone(&self.buffer),
            channels: self.channels.clone(),
            names: self.names.clone(),
            finished: false,
        }))
    }
}

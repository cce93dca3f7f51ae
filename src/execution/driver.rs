use tracing::trace;

use super::operator::{Operator, SourceOperator};
use super::ExecutionError;

/// Drives a chain of operators by moving pages from each operator to the next.
///
/// A driver is single threaded; everything it owns runs on the calling thread.
pub struct Driver {
    operators: Vec<Box<dyn Operator>>,
    /// Whether `finish` was already passed on to the operator after position `i`
    finish_sent: Vec<bool>,
}

impl Driver {
    pub fn new(operators: Vec<Box<dyn Operator>>) -> Result<Self, ExecutionError> {
        if operators.is_empty() {
            return Err(ExecutionError::Internal("driver needs at least one operator".to_string()));
        }
        let finish_sent = vec![false; operators.len()];
        Ok(Self {
            operators,
            finish_sent,
        })
    }

    /// The operator at the head of the chain, if it takes splits
    pub fn source(&mut self) -> Option<&mut dyn SourceOperator> {
        self.operators.first_mut().and_then(|operator| operator.as_source())
    }

    pub fn is_finished(&self) -> bool {
        self.operators.last().map_or(true, |operator| operator.is_finished())
    }

    /// Moves at most one page across each adjacent pair of operators and passes
    /// `finish` down the chain. Returns whether anything happened.
    pub fn process(&mut self) -> Result<bool, ExecutionError> {
        let mut progress = false;
        for index in 0..self.operators.len() - 1 {
            let (head, tail) = self.operators.split_at_mut(index + 1);
            let current = &mut head[index];
            let next = &mut tail[0];

            if next.needs_input() {
                if let Some(page) = current.get_output()? {
                    trace!("{} -> {}: {} rows", current.name(), next.name(), page.num_rows());
                    next.add_input(page)?;
                    progress = true;
                }
            }
            if current.is_finished() && !self.finish_sent[index] {
                next.finish();
                self.finish_sent[index] = true;
                progress = true;
            }
        }
        Ok(progress)
    }

    /// Processes until the last operator is finished
    pub fn run_to_completion(&mut self) -> Result<(), ExecutionError> {
        while !self.is_finished() {
            if !self.process()? {
                let stuck: Vec<&str> = self
                    .operators
                    .iter()
                    .filter(|operator| !operator.is_finished())
                    .map(|operator| operator.name())
                    .collect();
                return Err(ExecutionError::Internal(format!(
                    "driver made no progress with unfinished operators {:?}",
                    stuck
                )));
            }
        }
        Ok(())
    }
}

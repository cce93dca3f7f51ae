use super::{Operator, OperatorFactory, PageBuffer};
use crate::execution::expression::PhysicalExpr;
use crate::execution::ExecutionError;
use crate::page::Page;

/// Keeps the rows for which the predicate is true
pub struct FilterOperator {
    predicate: PhysicalExpr,
    buffer: PageBuffer,
}

impl Operator for FilterOperator {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn needs_input(&self) -> bool {
        self.buffer.needs_input()
    }

    fn add_input(&mut self, page: Page) -> Result<(), ExecutionError> {
        let mask = self.predicate.evaluate_mask(&page)?;
        let filtered = page.filter(&mask);
        if !filtered.is_empty() {
            self.buffer.put(filtered)?;
        }
        Ok(())
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

pub struct FilterOperatorFactory {
    predicate: PhysicalExpr,
}

impl FilterOperatorFactory {
    pub fn new(predicate: PhysicalExpr) -> Self {
        Self { predicate }
    }
}

impl OperatorFactory for FilterOperatorFactory {
    fn create_operator(&self) -> Result<Box<dyn Operator>, ExecutionError> {
        Ok(Box::new(FilterOperator {
            predicate: self.predicate.clone(),
            buffer: PageBuffer::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ColumnMetadata, DataType, Value};
    use crate::query::plan::{ComparisonOperator, Expression, Symbol};

    #[test]
    fn test_filter_keeps_matching_rows() {
        let value = Symbol::new("value", DataType::Bigint);
        let predicate = Expression::comparison(
            ComparisonOperator::Gt,
            value.to_reference(),
            Expression::literal(Value::Bigint(1), DataType::Bigint),
        );
        let factory = FilterOperatorFactory::new(PhysicalExpr::compile(&predicate, &[value]).unwrap());
        let mut operator = factory.create_operator().unwrap();
        let page = Page::from_rows(
            vec![ColumnMetadata::new("value", DataType::Bigint)],
            vec![vec![Value::Bigint(1)], vec![Value::Bigint(2)], vec![Value::Null]],
        )
        .unwrap();

        assert!(operator.needs_input());
        operator.add_input(page).unwrap();
        assert!(!operator.needs_input());
        let output = operator.get_output().unwrap().unwrap();
        assert_eq!(output.num_rows(), 1);
        assert_eq!(output.row(0).get(0), Value::Bigint(2));

        operator.finish();
        assert!(operator.is_finished());
        assert!(operator.get_output().unwrap().is_none());
    }
}

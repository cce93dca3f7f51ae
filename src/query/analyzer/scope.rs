use crate::page::DataType;

use super::AnalysisError;

/// Index of a field in the analysis-wide field table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub usize);

/// A column visible to expressions, produced by a relation
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Alias or table name the field can be qualified with
    pub relation: Option<String>,
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    fn matches(&self, parts: &[String]) -> bool {
        let Some((name, qualifier)) = parts.split_last() else {
            return false;
        };
        if !self.name.eq_ignore_ascii_case(name) {
            return false;
        }
        match (qualifier.last(), &self.relation) {
            (None, _) => true,
            (Some(q), Some(relation)) => q.eq_ignore_ascii_case(relation),
            (Some(_), None) => false,
        }
    }
}

/// Where an identifier was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Local(FieldId),
    Outer(FieldId),
}

/// Fields visible at one level of query nesting, chained to the enclosing level
#[derive(Debug, Default)]
pub struct Scope<'p> {
    fields: Vec<(FieldId, Field)>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    pub fn new(parent: Option<&'p Scope<'p>>) -> Self {
        Self {
            fields: Vec::new(),
            parent,
        }
    }

    pub fn with_fields(fields: Vec<(FieldId, Field)>, parent: Option<&'p Scope<'p>>) -> Self {
        Self { fields, parent }
    }

    pub fn fields(&self) -> &[(FieldId, Field)] {
        &self.fields
    }

    /// Resolves a possibly qualified name, searching this scope first and then its parents
    pub fn resolve(&self, parts: &[String]) -> Result<Option<Resolution>, AnalysisError> {
        if let Some(id) = self.resolve_local(parts)? {
            return Ok(Some(Resolution::Local(id)));
        }
        let mut parent = self.parent;
        while let Some(scope) = parent {
            if let Some(id) = scope.resolve_local(parts)? {
                return Ok(Some(Resolution::Outer(id)));
            }
            parent = scope.parent;
        }
        Ok(None)
    }

    fn resolve_local(&self, parts: &[String]) -> Result<Option<FieldId>, AnalysisError> {
        let mut matches = self.fields.iter().filter(|(_, field)| field.matches(parts));
        let Some((id, _)) = matches.next() else {
            return Ok(None);
        };
        if matches.next().is_some() {
            return Err(AnalysisError::AmbiguousColumn(parts.join(".")));
        }
        Ok(Some(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(relation: &str, name: &str) -> Field {
        Field {
            relation: Some(relation.to_string()),
            name: name.to_string(),
            data_type: DataType::Bigint,
        }
    }

    fn parts(name: &str) -> Vec<String> {
        name.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_qualified_and_ambiguous_lookup() {
        let scope = Scope::with_fields(
            vec![(FieldId(0), field("a", "x")), (FieldId(1), field("b", "x"))],
            None,
        );
        assert_eq!(scope.resolve(&parts("b.x")).unwrap(), Some(Resolution::Local(FieldId(1))));
        assert!(matches!(
            scope.resolve(&parts("x")),
            Err(AnalysisError::AmbiguousColumn(_))
        ));
        assert_eq!(scope.resolve(&parts("c.x")).unwrap(), None);
    }

    #[test]
    fn test_outer_scope_resolution() {
        let outer = Scope::with_fields(vec![(FieldId(0), field("a", "x"))], None);
        let inner = Scope::with_fields(vec![(FieldId(1), field("b", "y"))], Some(&outer));
        assert_eq!(inner.resolve(&parts("Y")).unwrap(), Some(Resolution::Local(FieldId(1))));
        assert_eq!(inner.resolve(&parts("a.x")).unwrap(), Some(Resolution::Outer(FieldId(0))));
    }
}

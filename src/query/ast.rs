//! Parsed query representation consumed by the analyzer.
//!
//! Parsing itself happens outside this crate; callers hand over a `Query` tree built
//! by their own front end (or by the builder helpers below).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Plus
                | BinaryOperator::Minus
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
    /// `count(*)`
    pub star: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Possibly qualified column reference (`value`, `cpu.value`)
    Identifier(Vec<String>),
    Literal(Literal),
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        data_type: String,
    },
    Function(FunctionCall),
}

impl Expr {
    pub fn column(name: &str) -> Expr {
        Expr::Identifier(name.split('.').map(str::to_string).collect())
    }

    pub fn int(value: i64) -> Expr {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn float(value: f64) -> Expr {
        Expr::Literal(Literal::Float(value))
    }

    pub fn string(value: &str) -> Expr {
        Expr::Literal(Literal::String(value.to_string()))
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn function(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function(FunctionCall {
            name: name.to_string(),
            args,
            star: false,
        })
    }

    pub fn count_star() -> Expr {
        Expr::Function(FunctionCall {
            name: "count".to_string(),
            args: Vec::new(),
            star: true,
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Identifier(parts) => write!(f, "{}", parts.join(".")),
            Expr::Literal(Literal::Null) => write!(f, "NULL"),
            Expr::Literal(Literal::Boolean(b)) => write!(f, "{}", b),
            Expr::Literal(Literal::Integer(v)) => write!(f, "{}", v),
            Expr::Literal(Literal::Float(v)) => write!(f, "{}", v),
            Expr::Literal(Literal::String(s)) => write!(f, "'{}'", s),
            Expr::Binary { left, op, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Not(expr) => write!(f, "NOT {}", expr),
            Expr::Negate(expr) => write!(f, "-{}", expr),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
            Expr::Function(call) if call.star => write!(f, "{}(*)", call.name),
            Expr::Function(call) => {
                let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", call.name, args.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    /// `*` or `alias.*`
    Wildcard(Option<String>),
    Expr { expr: Expr, alias: Option<String> },
}

/// `database.namespace.table`, with the leading parts optional
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub database: Option<String>,
    pub namespace: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(table: &str) -> Self {
        Self {
            database: None,
            namespace: None,
            table: table.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    Table {
        name: TableName,
        alias: Option<String>,
    },
    Subquery {
        query: Box<Query>,
        alias: Option<String>,
    },
    Join {
        left: Box<Relation>,
        right: Box<Relation>,
        on: Expr,
    },
}

impl Relation {
    pub fn table(name: &str) -> Relation {
        Relation::Table {
            name: TableName::new(name),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Relation {
        Relation::Table {
            name: TableName::new(name),
            alias: Some(alias.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub select: Vec<SelectItem>,
    pub from: Relation,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
}

impl Query {
    pub fn new(from: Relation) -> Self {
        Self {
            select: Vec::new(),
            from,
            filter: None,
            group_by: Vec::new(),
            having: None,
        }
    }

    pub fn select(mut self, expr: Expr) -> Self {
        self.select.push(SelectItem::Expr { expr, alias: None });
        self
    }

    pub fn select_as(mut self, expr: Expr, alias: &str) -> Self {
        self.select.push(SelectItem::Expr {
            expr,
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn select_all(mut self) -> Self {
        self.select.push(SelectItem::Wildcard(None));
        self
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn having(mut self, predicate: Expr) -> Self {
        self.having = Some(predicate);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_query() {
        let query = Query::new(Relation::table("cpu"))
            .select(Expr::column("host"))
            .select_as(Expr::function("avg", vec![Expr::column("value")]), "avg_value")
            .filter(Expr::binary(
                Expr::column("region"),
                BinaryOperator::Eq,
                Expr::string("us-west"),
            ))
            .group_by(Expr::column("host"));

        assert_eq!(query.select.len(), 2);
        assert_eq!(query.group_by.len(), 1);
        assert_eq!(query.filter.as_ref().unwrap().to_string(), "(region = 'us-west')");
    }

    #[test]
    fn test_qualified_column() {
        assert_eq!(
            Expr::column("cpu.value"),
            Expr::Identifier(vec!["cpu".to_string(), "value".to_string()])
        );
        assert_eq!(Expr::count_star().to_string(), "count(*)");
    }
}

//! Native predicate and query tree, rendered as parameterized SQL text.
//!
//! Literals never appear in the tree: every value is a named `@param`.

use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::sql::types::Value;

/// Bound parameters, keyed by name without the leading `@`
pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Like => "LIKE",
        };
        write!(f, "{}", op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    True,
    Ident(String),
    /// Dotted path, e.g. `Parent.id` or `msg.field`
    Path(Vec<String>),
    Param(String),
    Paren(Box<Expr>),
    Comparison {
        op: ComparisonOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// `lhs IN UNNEST(array)`
    InUnnest {
        lhs: Box<Expr>,
        array: Box<Expr>,
    },
    Func {
        name: String,
        args: Vec<Expr>,
    },
    /// Named function argument, `key => value`
    Named {
        key: String,
        value: Box<Expr>,
    },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn path<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Expr::Path(parts.into_iter().map(Into::into).collect())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    pub fn compare(op: ComparisonOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Comparison {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn equals(lhs: Expr, rhs: Expr) -> Self {
        Self::compare(ComparisonOp::Eq, lhs, rhs)
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Expr::Logical {
            op: LogicalOp::And,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Self {
        Expr::Logical {
            op: LogicalOp::Or,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    /// Folds a list of predicates with AND; an empty list is TRUE
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs.into_iter().reduce(Expr::and).unwrap_or(Expr::True)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::True => write!(f, "TRUE"),
            Expr::Ident(name) => write!(f, "{}", Ident(name)),
            Expr::Path(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", Ident(part))?;
                }
                Ok(())
            }
            Expr::Param(name) => write!(f, "@{}", name),
            Expr::Paren(expr) => write!(f, "({})", expr),
            Expr::Comparison { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::Logical { op, lhs, rhs } => {
                let op = match op {
                    LogicalOp::And => "AND",
                    LogicalOp::Or => "OR",
                };
                write!(f, "{} {} {}", lhs, op, rhs)
            }
            Expr::Not(expr) => write!(f, "NOT {}", expr),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::InUnnest { lhs, array } => write!(f, "{} IN UNNEST({})", lhs, array),
            Expr::Func { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Named { key, value } => write!(f, "{} => {}", key, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub expr: Expr,
    pub desc: bool,
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.desc {
            write!(f, " DESC")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectItem {
    Column(String),
    /// `ARRAY(SELECT AS STRUCT ...) AS alias`
    Array { query: Box<Query>, alias: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub as_struct: bool,
    pub list: Vec<SelectItem>,
    pub from: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub select: Select,
    pub order: Vec<Order>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

impl Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let select = &self.select;
        write!(f, "SELECT ")?;
        if select.as_struct {
            write!(f, "AS STRUCT ")?;
        }
        for (i, item) in select.list.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match item {
                SelectItem::Column(name) => write!(f, "{}", Ident(name))?,
                SelectItem::Array { query, alias } => {
                    write!(f, "ARRAY({}) AS {}", query, Ident(alias))?
                }
            }
        }
        write!(f, " FROM {}", Ident(&select.from))?;
        if let Some(filter) = &select.filter {
            write!(f, " WHERE {}", filter)?;
        }
        if !self.order.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, order) in self.order.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", order)?;
            }
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}

/// A query together with its bound parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub query: Query,
    pub params: Params,
}

impl Statement {
    pub fn sql(&self) -> String {
        self.query.to_string()
    }
}

const RESERVED: &[&str] = &[
    "ALL", "AND", "ANY", "ARRAY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "CROSS",
    "DEFAULT", "DESC", "DISTINCT", "ELSE", "END", "EXISTS", "FALSE", "FROM", "FULL", "GROUP",
    "HAVING", "IF", "IN", "INNER", "INTERVAL", "INTO", "IS", "JOIN", "LEFT", "LIKE", "LIMIT",
    "NOT", "NULL", "OF", "ON", "OR", "ORDER", "OUTER", "RIGHT", "SELECT", "SET", "STRUCT",
    "TABLESAMPLE", "THEN", "TO", "TRUE", "UNNEST", "USING", "WHEN", "WHERE", "WITH",
];

/// Identifier, backquoted unless it is a plain non-reserved name
struct Ident<'a>(&'a str);

impl Display for Ident<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut chars = self.0.chars();
        let plain = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !RESERVED.iter().any(|r| r.eq_ignore_ascii_case(self.0));
        if plain {
            write!(f, "{}", self.0)
        } else {
            write!(f, "`{}`", self.0.replace('`', "\\`"))
        }
    }
}

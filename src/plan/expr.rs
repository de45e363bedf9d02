//! Expressions carried by plan nodes.
//!
//! Column references point at the plan node that produces the column (a
//! table, derived table, values list or aggregate), so the optimizer can
//! tell which relations a condition touches without name resolution.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use super::tree::NodeId;

/// Reference to a column produced by a column source node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub source: NodeId,
    pub column: String,
}

impl ColumnRef {
    pub fn new(source: NodeId, column: impl Into<String>) -> Self {
        Self {
            source,
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.column)
    }
}

/// A bound expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference.
    Column(ColumnRef),
    /// Literal value.
    Literal(LiteralValue),
    /// Positional query parameter.
    Parameter(usize),
    /// Binary operation (e.g., a = b, a AND b).
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., NOT a, -x).
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    /// IS NULL / IS NOT NULL.
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// IN list.
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// BETWEEN a AND b.
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// Function call.
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Scalar, EXISTS or IN subquery; points at a `Subquery` node.
    Subquery(NodeId),
}

/// Literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Json(Value),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOperator {
    /// Check if this is a comparison operator.
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

    /// Check if this operator bounds a range (`<`, `<=`, `>`, `>=`).
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Lt | BinaryOperator::LtEq | BinaryOperator::Gt | BinaryOperator::GtEq
        )
    }

    /// The operator with its operands swapped, for comparisons.
    pub fn flip(&self) -> BinaryOperator {
        match self {
            BinaryOperator::Lt => BinaryOperator::Gt,
            BinaryOperator::LtEq => BinaryOperator::GtEq,
            BinaryOperator::Gt => BinaryOperator::Lt,
            BinaryOperator::GtEq => BinaryOperator::LtEq,
            other => *other,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub ascending: bool,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            ascending: false,
        }
    }
}

/// Named output expression of a projection or aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectField {
    pub expr: Expr,
    pub name: String,
}

impl ProjectField {
    pub fn new(expr: Expr, name: impl Into<String>) -> Self {
        Self {
            expr,
            name: name.into(),
        }
    }
}

impl Expr {
    /// Column reference expression.
    pub fn column(source: NodeId, column: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::new(source, column))
    }

    /// Integer literal.
    pub fn int(value: i64) -> Self {
        Expr::Literal(LiteralValue::Integer(value))
    }

    /// Binary operation.
    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Equality comparison.
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Eq, right)
    }

    /// The column, if this is a bare column reference.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Operands and operator of a comparison.
    pub fn as_comparison(&self) -> Option<(&Expr, BinaryOperator, &Expr)> {
        match self {
            Expr::BinaryOp { left, op, right } if op.is_comparison() => Some((left, *op, right)),
            _ => None,
        }
    }

    /// Visit this expression and every sub-expression, parents first.
    /// Does not descend into subquery nodes.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::Parameter(_) | Expr::Subquery(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. } => expr.walk(f),
            Expr::InList { expr, list, .. } => {
                expr.walk(f);
                for item in list {
                    item.walk(f);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
        }
    }

    /// All column references, in visiting order.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Column(c) = e {
                out.push(c);
            }
        });
        out
    }

    /// Nodes producing the columns this expression reads.
    pub fn sources(&self) -> BTreeSet<NodeId> {
        self.columns().into_iter().map(|c| c.source).collect()
    }

    /// Subquery nodes referenced from this expression.
    pub fn subqueries(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Subquery(id) = e {
                out.push(*id);
            }
        });
        out
    }

    /// Whether the value is fixed once the given sources are bound.
    /// Subqueries are never considered constant.
    pub fn is_bound_by(&self, bound: &BTreeSet<NodeId>) -> bool {
        let mut ok = true;
        self.walk(&mut |e| match e {
            Expr::Column(c) if !bound.contains(&c.source) => ok = false,
            Expr::Subquery(_) => ok = false,
            _ => {}
        });
        ok
    }

    /// Rebuild the expression, replacing columns for which `f` returns a
    /// substitute.
    pub fn map_columns(&self, f: &impl Fn(&ColumnRef) -> Option<Expr>) -> Expr {
        match self {
            Expr::Column(c) => f(c).unwrap_or_else(|| self.clone()),
            Expr::Literal(_) | Expr::Parameter(_) | Expr::Subquery(_) => self.clone(),
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.map_columns(f)),
                op: *op,
                right: Box::new(right.map_columns(f)),
            },
            Expr::UnaryOp { op, expr } => Expr::UnaryOp {
                op: *op,
                expr: Box::new(expr.map_columns(f)),
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.map_columns(f)),
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: Box::new(expr.map_columns(f)),
                list: list.iter().map(|e| e.map_columns(f)).collect(),
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: Box::new(expr.map_columns(f)),
                low: Box::new(low.map_columns(f)),
                high: Box::new(high.map_columns(f)),
                negated: *negated,
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|e| e.map_columns(f)).collect(),
            },
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Null => write!(f, "NULL"),
            LiteralValue::Boolean(b) => write!(f, "{}", b),
            LiteralValue::Integer(n) => write!(f, "{}", n),
            LiteralValue::Float(x) => write!(f, "{}", x),
            LiteralValue::String(s) => write!(f, "'{}'", s),
            LiteralValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Parameter(n) => write!(f, "${}", n),
            Expr::BinaryOp { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Expr::UnaryOp { op, expr } => match op {
                UnaryOperator::Not => write!(f, "NOT {}", expr),
                UnaryOperator::Minus => write!(f, "-{}", expr),
            },
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{} {}IN ({})",
                    expr,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::Function { name, args } => {
                let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", name, items.join(", "))
            }
            Expr::Subquery(id) => write!(f, "SUBQUERY {}", id),
        }
    }
}

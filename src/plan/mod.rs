//! Bound query plan representation.
//!
//! The plan tree is what the optimizer consumes and rewrites: joinable
//! regions (table groups, joins, derived tables, values lists) wrapped by
//! the select, sort, aggregate and projection nodes a binder produced.

mod expr;
mod scan;
mod tree;

pub use expr::{
    BinaryOperator, ColumnRef, Expr, LiteralValue, OrderByExpr, ProjectField, UnaryOperator,
};
pub use scan::{GroupScan, IndexScan, Scan, ScanOrdering};
pub use tree::{
    DistinctState, GroupMember, JoinImplementation, JoinType, Node, NodeId, NodeKind, PlanTree,
};

//! Arena-allocated query plan tree.
//!
//! Nodes live in a single vector and refer to each other by [`NodeId`].
//! Every node records its `output` (the node consuming it), so rules can
//! walk upward from a join region to the wrappers above it and splice new
//! structure in place.

use std::collections::BTreeSet;
use std::fmt;

use super::expr::{ColumnRef, Expr, OrderByExpr, ProjectField};
use super::scan::Scan;

/// Index of a node within a [`PlanTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Join types understood by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    /// Semi-join whose inner side is known to be distinct, so it may also
    /// run as an inner join with the inner side first.
    SemiInnerAlreadyDistinct,
    /// Semi-join that may run as an inner join only after the inner side is
    /// made distinct.
    SemiInnerIfDistinct,
    /// Inner join whose outer side must first be made distinct.
    InnerNeedDistinct,
}

impl JoinType {
    pub fn is_inner(&self) -> bool {
        matches!(self, JoinType::Inner | JoinType::InnerNeedDistinct)
    }

    /// Semi-join in any of its forms.
    pub fn is_semi(&self) -> bool {
        matches!(
            self,
            JoinType::Semi | JoinType::SemiInnerAlreadyDistinct | JoinType::SemiInnerIfDistinct
        )
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
            JoinType::Semi => write!(f, "SEMI"),
            JoinType::Anti => write!(f, "ANTI"),
            JoinType::SemiInnerAlreadyDistinct => write!(f, "SEMI_INNER_ALREADY_DISTINCT"),
            JoinType::SemiInnerIfDistinct => write!(f, "SEMI_INNER_IF_DISTINCT"),
            JoinType::InnerNeedDistinct => write!(f, "INNER_NEED_DISTINCT"),
        }
    }
}

/// Physical join algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinImplementation {
    NestedLoops,
}

impl fmt::Display for JoinImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinImplementation::NestedLoops => write!(f, "NESTED_LOOPS"),
        }
    }
}

/// What is known about duplicate rows in a values list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctState {
    Distinct,
    DistinctWithNull,
    HasParameters,
    HasExpressions,
    /// Duplicates must be removed before use.
    NeedDistinct,
}

/// A table within a [`NodeKind::TableGroupJoinTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    /// The member's `TableSource` node.
    pub table: NodeId,
    /// Index of the parent member, `None` for the group's root.
    pub parent: Option<usize>,
    /// How this member joins to its parent.
    pub parent_join_type: JoinType,
    pub join_conditions: Vec<Expr>,
}

/// Plan node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Top-level query.
    Query { input: NodeId },
    /// Nested query body, either a derived table or an expression subquery.
    Subquery {
        input: NodeId,
        /// Sources referenced inside but defined outside.
        outer_tables: BTreeSet<NodeId>,
    },
    /// WHERE conditions.
    Select { input: NodeId, conditions: Vec<Expr> },
    Sort { input: NodeId, order_by: Vec<OrderByExpr> },
    /// GROUP BY with aggregates. Columns of this node name its fields.
    AggregateSource {
        input: NodeId,
        group_by: Vec<ProjectField>,
        aggregates: Vec<ProjectField>,
    },
    Project { input: NodeId, fields: Vec<ProjectField> },
    Distinct { input: NodeId },
    Limit {
        input: NodeId,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    /// A base table.
    TableSource { table: String, alias: Option<String> },
    /// Tables from one group, related by their physical containment.
    TableGroupJoinTree { group: String, members: Vec<GroupMember> },
    JoinNode {
        left: NodeId,
        right: NodeId,
        join_type: JoinType,
        conditions: Vec<Expr>,
        implementation: Option<JoinImplementation>,
    },
    /// Derived table.
    SubquerySource { subquery: NodeId, name: String },
    /// Literal row set.
    ValuesSource {
        rows: Vec<Vec<Expr>>,
        name: String,
        distinct: DistinctState,
    },
    /// A group with its chosen access path, joined left-deep.
    TableJoins {
        joins: NodeId,
        group: String,
        scan: Scan,
    },
}

/// A plan node with its parent link.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub output: Option<NodeId>,
}

/// The plan tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl PlanTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first query node added.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Node kind. Ids always come from this tree.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    /// Replace a node's kind in place and adopt its new children.
    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.0].kind = kind;
        for child in self.children(id) {
            self.nodes[child.0].output = Some(id);
        }
    }

    pub fn output(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].output
    }

    /// Add a node and adopt its children.
    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let is_query = matches!(kind, NodeKind::Query { .. });
        self.nodes.push(Node { kind, output: None });
        for child in self.children(id) {
            self.nodes[child.0].output = Some(id);
        }
        if is_query && self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    /// Child nodes in left-to-right order. Subqueries used inside
    /// expressions are not children; see [`Expr::subqueries`].
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::Query { input }
            | NodeKind::Subquery { input, .. }
            | NodeKind::Select { input, .. }
            | NodeKind::Sort { input, .. }
            | NodeKind::AggregateSource { input, .. }
            | NodeKind::Project { input, .. }
            | NodeKind::Distinct { input }
            | NodeKind::Limit { input, .. } => vec![*input],
            NodeKind::TableSource { .. } | NodeKind::ValuesSource { .. } => Vec::new(),
            NodeKind::TableGroupJoinTree { members, .. } => {
                members.iter().map(|m| m.table).collect()
            }
            NodeKind::JoinNode { left, right, .. } => vec![*left, *right],
            NodeKind::SubquerySource { subquery, .. } => vec![*subquery],
            NodeKind::TableJoins { joins, .. } => vec![*joins],
        }
    }

    /// Expressions held directly by a node.
    pub fn expressions(&self, id: NodeId) -> Vec<&Expr> {
        match self.kind(id) {
            NodeKind::Select { conditions, .. } => conditions.iter().collect(),
            NodeKind::Sort { order_by, .. } => order_by.iter().map(|o| &o.expr).collect(),
            NodeKind::AggregateSource {
                group_by,
                aggregates,
                ..
            } => group_by.iter().chain(aggregates).map(|f| &f.expr).collect(),
            NodeKind::Project { fields, .. } => fields.iter().map(|f| &f.expr).collect(),
            NodeKind::TableGroupJoinTree { members, .. } => members
                .iter()
                .flat_map(|m| m.join_conditions.iter())
                .collect(),
            NodeKind::JoinNode { conditions, .. } => conditions.iter().collect(),
            NodeKind::ValuesSource { rows, .. } => rows.iter().flatten().collect(),
            NodeKind::TableJoins { scan, .. } => scan.conditions(),
            NodeKind::Query { .. }
            | NodeKind::Subquery { .. }
            | NodeKind::Distinct { .. }
            | NodeKind::Limit { .. }
            | NodeKind::TableSource { .. }
            | NodeKind::SubquerySource { .. } => Vec::new(),
        }
    }

    /// Whether the node can take part in a join.
    pub fn is_joinable(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            NodeKind::TableSource { .. }
                | NodeKind::TableGroupJoinTree { .. }
                | NodeKind::JoinNode { .. }
                | NodeKind::SubquerySource { .. }
                | NodeKind::ValuesSource { .. }
                | NodeKind::TableJoins { .. }
        )
    }

    /// Whether the node produces columns referenced by [`ColumnRef`].
    pub fn is_column_source(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            NodeKind::TableSource { .. }
                | NodeKind::SubquerySource { .. }
                | NodeKind::ValuesSource { .. }
                | NodeKind::AggregateSource { .. }
        )
    }

    /// Table sources that belong to a group join tree.
    pub fn group_tables(&self, group: NodeId) -> Vec<NodeId> {
        match self.kind(group) {
            NodeKind::TableGroupJoinTree { members, .. } => {
                members.iter().map(|m| m.table).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Catalog name of a table source.
    pub fn table_name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::TableSource { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Replace `old` with `new` among `parent`'s children.
    /// Returns false if `old` is not a child of `parent`.
    pub fn replace_input(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> bool {
        let mut replaced = false;
        let mut swap = |slot: &mut NodeId| {
            if *slot == old && !replaced {
                *slot = new;
                replaced = true;
            }
        };
        match self.kind_mut(parent) {
            NodeKind::Query { input }
            | NodeKind::Subquery { input, .. }
            | NodeKind::Select { input, .. }
            | NodeKind::Sort { input, .. }
            | NodeKind::AggregateSource { input, .. }
            | NodeKind::Project { input, .. }
            | NodeKind::Distinct { input }
            | NodeKind::Limit { input, .. } => swap(input),
            NodeKind::TableGroupJoinTree { members, .. } => {
                for member in members.iter_mut() {
                    swap(&mut member.table);
                }
            }
            NodeKind::JoinNode { left, right, .. } => {
                swap(left);
                swap(right);
            }
            NodeKind::SubquerySource { subquery, .. } => swap(subquery),
            NodeKind::TableJoins { joins, .. } => swap(joins),
            NodeKind::TableSource { .. } | NodeKind::ValuesSource { .. } => {}
        }
        if replaced {
            self.nodes[new.0].output = Some(parent);
        }
        replaced
    }

    /// Put `new` where `old` currently sits. Returns false if `old` has no
    /// parent.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> bool {
        if old == new {
            return true;
        }
        match self.output(old) {
            Some(parent) => {
                let done = self.replace_input(parent, old, new);
                if done {
                    self.nodes[old.0].output = None;
                }
                done
            }
            None => false,
        }
    }

    /// Insert a new single-input node directly above `child`.
    pub fn wrap(&mut self, child: NodeId, make: impl FnOnce(NodeId) -> NodeKind) -> NodeId {
        let parent = self.output(child);
        let wrapper = self.add(make(child));
        if let Some(parent) = parent {
            self.replace_input(parent, child, wrapper);
        }
        wrapper
    }

    /// Remove a single-input node from its chain, connecting its input to
    /// its output. Returns false for other node kinds or a detached node.
    pub fn splice_out(&mut self, id: NodeId) -> bool {
        let input = match self.children(id).as_slice() {
            [input] => *input,
            _ => return false,
        };
        if !matches!(
            self.kind(id),
            NodeKind::Sort { .. } | NodeKind::Distinct { .. } | NodeKind::Limit { .. }
        ) {
            return false;
        }
        match self.output(id) {
            Some(parent) => {
                self.replace_input(parent, id, input);
                self.nodes[id.0].output = None;
                true
            }
            None => false,
        }
    }

    /// Expression behind a column of a derived table or aggregate.
    pub fn resolve_derived_column(&self, column: &ColumnRef) -> Option<&Expr> {
        match self.kind(column.source) {
            NodeKind::SubquerySource { subquery, .. } => {
                let mut node = *subquery;
                loop {
                    match self.kind(node) {
                        NodeKind::Project { fields, .. } => {
                            return fields
                                .iter()
                                .find(|f| f.name == column.column)
                                .map(|f| &f.expr);
                        }
                        NodeKind::Subquery { input, .. }
                        | NodeKind::Distinct { input }
                        | NodeKind::Sort { input, .. }
                        | NodeKind::Limit { input, .. } => node = *input,
                        _ => return None,
                    }
                }
            }
            NodeKind::AggregateSource {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .chain(aggregates)
                .find(|f| f.name == column.column)
                .map(|f| &f.expr),
            _ => None,
        }
    }

    // Builders used by binders and tests.

    pub fn table(&mut self, name: impl Into<String>) -> NodeId {
        self.add(NodeKind::TableSource {
            table: name.into(),
            alias: None,
        })
    }

    /// A group holding a single table. Returns `(group, table)`.
    pub fn single_table_group(&mut self, name: impl Into<String>) -> (NodeId, NodeId) {
        let name = name.into();
        let table = self.table(name.clone());
        let group = self.add(NodeKind::TableGroupJoinTree {
            group: name,
            members: vec![GroupMember {
                table,
                parent: None,
                parent_join_type: JoinType::Inner,
                join_conditions: Vec::new(),
            }],
        });
        (group, table)
    }

    pub fn join(
        &mut self,
        left: NodeId,
        right: NodeId,
        join_type: JoinType,
        conditions: Vec<Expr>,
    ) -> NodeId {
        self.add(NodeKind::JoinNode {
            left,
            right,
            join_type,
            conditions,
            implementation: None,
        })
    }

    pub fn select(&mut self, input: NodeId, conditions: Vec<Expr>) -> NodeId {
        self.add(NodeKind::Select { input, conditions })
    }

    pub fn sort(&mut self, input: NodeId, order_by: Vec<OrderByExpr>) -> NodeId {
        self.add(NodeKind::Sort { input, order_by })
    }

    pub fn project(&mut self, input: NodeId, fields: Vec<ProjectField>) -> NodeId {
        self.add(NodeKind::Project { input, fields })
    }

    pub fn distinct(&mut self, input: NodeId) -> NodeId {
        self.add(NodeKind::Distinct { input })
    }

    pub fn query(&mut self, input: NodeId) -> NodeId {
        self.add(NodeKind::Query { input })
    }

    pub fn subquery(&mut self, input: NodeId) -> NodeId {
        self.add(NodeKind::Subquery {
            input,
            outer_tables: BTreeSet::new(),
        })
    }

    pub fn subquery_source(&mut self, subquery: NodeId, name: impl Into<String>) -> NodeId {
        self.add(NodeKind::SubquerySource {
            subquery,
            name: name.into(),
        })
    }

    pub fn values(
        &mut self,
        rows: Vec<Vec<Expr>>,
        name: impl Into<String>,
        distinct: DistinctState,
    ) -> NodeId {
        self.add(NodeKind::ValuesSource {
            rows,
            name: name.into(),
            distinct,
        })
    }
}

impl fmt::Display for PlanTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => self.format_indent(f, root, 0),
            None => writeln!(f, "(empty)"),
        }
    }
}

impl PlanTree {
    fn format_indent(&self, f: &mut fmt::Formatter<'_>, id: NodeId, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        let list = |exprs: &[&Expr]| {
            exprs
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self.kind(id) {
            NodeKind::Query { .. } => writeln!(f, "{}Query", pad)?,
            NodeKind::Subquery { outer_tables, .. } => {
                let outer: Vec<String> = outer_tables.iter().map(|t| t.to_string()).collect();
                writeln!(f, "{}Subquery{}: outer=[{}]", pad, id, outer.join(", "))?
            }
            NodeKind::Select { .. } => {
                writeln!(f, "{}Select: [{}]", pad, list(&self.expressions(id)))?
            }
            NodeKind::Sort { order_by, .. } => {
                let ord: Vec<String> = order_by
                    .iter()
                    .map(|o| format!("{} {}", o.expr, if o.ascending { "ASC" } else { "DESC" }))
                    .collect();
                writeln!(f, "{}Sort: [{}]", pad, ord.join(", "))?
            }
            NodeKind::AggregateSource { group_by, .. } => {
                let keys: Vec<&Expr> = group_by.iter().map(|g| &g.expr).collect();
                writeln!(f, "{}AggregateSource{}: group=[{}]", pad, id, list(&keys))?
            }
            NodeKind::Project { .. } => {
                writeln!(f, "{}Project: [{}]", pad, list(&self.expressions(id)))?
            }
            NodeKind::Distinct { .. } => writeln!(f, "{}Distinct", pad)?,
            NodeKind::Limit { limit, offset, .. } => {
                writeln!(f, "{}Limit: {:?} OFFSET {:?}", pad, limit, offset)?
            }
            NodeKind::TableSource { table, alias } => {
                write!(f, "{}TableSource{}: {}", pad, id, table)?;
                if let Some(a) = alias {
                    write!(f, " AS {}", a)?;
                }
                writeln!(f)?
            }
            NodeKind::TableGroupJoinTree { group, .. } => {
                writeln!(f, "{}TableGroupJoinTree: {}", pad, group)?
            }
            NodeKind::JoinNode {
                join_type,
                implementation,
                ..
            } => {
                write!(f, "{}JoinNode: {}", pad, join_type)?;
                if let Some(imp) = implementation {
                    write!(f, "/{}", imp)?;
                }
                let conds = self.expressions(id);
                if !conds.is_empty() {
                    write!(f, " ON {}", list(&conds))?;
                }
                writeln!(f)?
            }
            NodeKind::SubquerySource { name, .. } => {
                writeln!(f, "{}SubquerySource{}: {}", pad, id, name)?
            }
            NodeKind::ValuesSource {
                rows,
                name,
                distinct,
            } => writeln!(
                f,
                "{}ValuesSource{}: {} ({} rows, {:?})",
                pad,
                id,
                name,
                rows.len(),
                distinct
            )?,
            NodeKind::TableJoins { group, scan, .. } => {
                writeln!(f, "{}TableJoins: {} {}", pad, group, scan)?
            }
        }
        for child in self.children(id) {
            self.format_indent(f, child, indent + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sets_output() {
        let mut tree = PlanTree::new();
        let (a, _) = tree.single_table_group("a");
        let (b, _) = tree.single_table_group("b");
        let join = tree.join(a, b, JoinType::Inner, Vec::new());
        let query = tree.query(join);

        assert_eq!(tree.output(a), Some(join));
        assert_eq!(tree.output(b), Some(join));
        assert_eq!(tree.output(join), Some(query));
        assert_eq!(tree.root(), Some(query));
    }

    #[test]
    fn test_replace_and_wrap() {
        let mut tree = PlanTree::new();
        let (a, _) = tree.single_table_group("a");
        let select = tree.select(a, Vec::new());
        tree.query(select);

        let (b, _) = tree.single_table_group("b");
        assert!(tree.replace(a, b));
        assert_eq!(tree.children(select), vec![b]);
        assert_eq!(tree.output(a), None);

        let distinct = tree.wrap(b, |input| NodeKind::Distinct { input });
        assert_eq!(tree.children(select), vec![distinct]);
        assert_eq!(tree.output(b), Some(distinct));
    }

    #[test]
    fn test_splice_out_sort() {
        let mut tree = PlanTree::new();
        let (a, t) = tree.single_table_group("a");
        let sort = tree.sort(a, vec![OrderByExpr::asc(Expr::column(t, "z"))]);
        let query = tree.query(sort);

        assert!(!tree.splice_out(query));
        assert!(tree.splice_out(sort));
        assert_eq!(tree.children(query), vec![a]);
        assert_eq!(tree.output(a), Some(query));
    }

    #[test]
    fn test_resolve_derived_column() {
        let mut tree = PlanTree::new();
        let (b, bt) = tree.single_table_group("b");
        let project = tree.project(b, vec![ProjectField::new(Expr::column(bt, "key"), "k")]);
        let sub = tree.subquery(project);
        let source = tree.subquery_source(sub, "s");

        assert_eq!(
            tree.resolve_derived_column(&ColumnRef::new(source, "k")),
            Some(&Expr::column(bt, "key"))
        );
        assert_eq!(tree.resolve_derived_column(&ColumnRef::new(source, "nope")), None);
    }

    #[test]
    fn test_display() {
        let mut tree = PlanTree::new();
        let (a, t) = tree.single_table_group("a");
        let select = tree.select(a, vec![Expr::eq(Expr::column(t, "x"), Expr::int(1))]);
        tree.query(select);

        let text = tree.to_string();
        assert!(text.starts_with("Query\n  Select: [#0.x = 1]\n"));
        assert!(text.contains("TableGroupJoinTree: a"));
    }
}

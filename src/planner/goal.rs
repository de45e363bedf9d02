//! What a join region's output must satisfy: filters, grouping, ordering.

use std::collections::BTreeSet;

use crate::plan::{Expr, NodeId, NodeKind, OrderByExpr, PlanTree};

/// Requirements gathered from the nodes above a join region.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryIndexGoal {
    /// The `Query` or `Subquery` node owning the region.
    pub query: NodeId,
    /// Sources the owning query references from enclosing queries.
    pub outer_tables: BTreeSet<NodeId>,
    pub where_conditions: Vec<Expr>,
    pub where_select: Option<NodeId>,
    /// GROUP BY expressions over the region's sources.
    pub grouping: Option<Vec<Expr>>,
    /// ORDER BY over the region's sources.
    pub ordering: Option<Vec<OrderByExpr>>,
    pub ordering_sort: Option<NodeId>,
    /// Whether the ordering comes straight from a Sort on the region, as
    /// opposed to one kept above an aggregate.
    pub ordering_direct: bool,
    /// Projected expressions under a DISTINCT.
    pub projection_distinct: Option<Vec<Expr>>,
}

impl QueryIndexGoal {
    /// Walk up from `joinable` collecting requirements.
    pub fn determine(tree: &PlanTree, query: NodeId, joinable: NodeId) -> Self {
        let outer_tables = match tree.kind(query) {
            NodeKind::Subquery { outer_tables, .. } => outer_tables.clone(),
            _ => BTreeSet::new(),
        };
        let mut goal = QueryIndexGoal {
            query,
            outer_tables,
            where_conditions: Vec::new(),
            where_select: None,
            grouping: None,
            ordering: None,
            ordering_sort: None,
            ordering_direct: false,
            projection_distinct: None,
        };

        let mut node = tree.output(joinable);
        if let Some(select) = node {
            if let NodeKind::Select { conditions, .. } = tree.kind(select) {
                if !conditions.is_empty() {
                    goal.where_conditions = conditions.clone();
                    goal.where_select = Some(select);
                }
                node = tree.output(select);
            }
        }

        let current = match node {
            Some(current) => current,
            None => return goal,
        };
        match tree.kind(current) {
            NodeKind::Sort { order_by, .. } => {
                goal.ordering = Some(order_by.clone());
                goal.ordering_sort = Some(current);
                goal.ordering_direct = true;
            }
            // A scalar aggregate asks nothing of the scan; a Sort above it stays.
            NodeKind::AggregateSource { group_by, .. } if group_by.is_empty() => {}
            NodeKind::AggregateSource { group_by, .. } => {
                goal.grouping = Some(group_by.iter().map(|f| f.expr.clone()).collect());
                let mut above = tree.output(current);
                if let Some(select) = above {
                    if matches!(tree.kind(select), NodeKind::Select { .. }) {
                        above = tree.output(select);
                    }
                }
                if let Some(sort) = above {
                    if let NodeKind::Sort { order_by, .. } = tree.kind(sort) {
                        if let Some(ordering) = grouped_ordering(tree, current, order_by) {
                            goal.ordering = Some(ordering);
                            goal.ordering_sort = Some(sort);
                        }
                    }
                }
            }
            NodeKind::Project { fields, .. } => {
                if let Some(next) = tree.output(current) {
                    match tree.kind(next) {
                        NodeKind::Distinct { .. } => {
                            goal.projection_distinct =
                                Some(fields.iter().map(|f| f.expr.clone()).collect());
                        }
                        NodeKind::Sort { order_by, .. } => {
                            goal.ordering = Some(order_by.clone());
                            goal.ordering_sort = Some(next);
                            goal.ordering_direct = true;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        goal
    }

    /// Whether any ordering or grouping is asked of the region's scans.
    pub fn has_order_requirement(&self) -> bool {
        self.ordering.is_some() || self.grouping.is_some() || self.projection_distinct.is_some()
    }
}

/// Rewrite a Sort above an aggregate onto the grouping expressions.
/// `None` if some sort key is not a grouping expression.
fn grouped_ordering(
    tree: &PlanTree,
    aggregate: NodeId,
    order_by: &[OrderByExpr],
) -> Option<Vec<OrderByExpr>> {
    let group_by = match tree.kind(aggregate) {
        NodeKind::AggregateSource { group_by, .. } => group_by,
        _ => return None,
    };
    order_by
        .iter()
        .map(|item| {
            let expr = match item.expr.as_column() {
                Some(column) if column.source == aggregate => group_by
                    .iter()
                    .find(|f| f.name == column.column)
                    .map(|f| f.expr.clone())?,
                _ => group_by
                    .iter()
                    .find(|f| f.expr == item.expr)
                    .map(|f| f.expr.clone())?,
            };
            Some(OrderByExpr {
                expr,
                ascending: item.ascending,
            })
        })
        .collect()
}

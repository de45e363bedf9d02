//! Candidate plans, memo entries and plan installation.
//!
//! A [`Plan`] is an immutable description of one way to evaluate a
//! relation set. Sub-plans are shared through `Rc`, so the best plan of a
//! small set can sit under many larger candidates. Installing a plan
//! rewrites the tree in place and returns the node that now stands for it.

use std::rc::Rc;

use tracing::debug;

use super::bitset::RelationSet;
use super::cost::CostEstimate;
use super::error::{PlanError, PlanResult};
use super::index_goal::GroupIndexGoal;
use super::join_graph::{JoinOperator, OperatorOrigin};
use crate::plan::{
    DistinctState, Expr, JoinImplementation, JoinType, NodeId, NodeKind, PlanTree, Scan,
    ScanOrdering,
};

/// Access path for one table group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPlan {
    pub group: NodeId,
    /// Enumeration-local relations bound while scanning.
    pub outer: RelationSet,
    pub scan: Scan,
    pub cost: CostEstimate,
}

/// Nested-loop join of two sub-plans.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub left: Rc<Plan>,
    pub right: Rc<Plan>,
    pub join_type: JoinType,
    pub implementation: JoinImplementation,
    pub operators: Vec<JoinOperator>,
    /// The left input must be made distinct first.
    pub need_distinct: bool,
    pub cost: CostEstimate,
}

/// A derived table planned by its own picker.
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryPlan {
    pub source: NodeId,
    /// The subquery's join region, replaced on install.
    pub region: NodeId,
    pub outer: RelationSet,
    pub root: Rc<Plan>,
    pub cost: CostEstimate,
}

/// A literal row set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesPlan {
    pub values: NodeId,
    pub cost: CostEstimate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Group(GroupPlan),
    Join(JoinPlan),
    Subquery(SubqueryPlan),
    Values(ValuesPlan),
}

impl Plan {
    pub fn cost(&self) -> CostEstimate {
        match self {
            Plan::Group(p) => p.cost,
            Plan::Join(p) => p.cost,
            Plan::Subquery(p) => p.cost,
            Plan::Values(p) => p.cost,
        }
    }

    /// Whether rows come out in the query's requested order: the leftmost
    /// scan is sorted and every join on the left spine keeps outer order.
    pub fn delivers_ordering(&self) -> bool {
        match self {
            Plan::Group(p) => p.scan.ordering() == ScanOrdering::Sorted,
            Plan::Join(p) => {
                matches!(
                    p.join_type,
                    JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti
                ) && p.left.delivers_ordering()
            }
            Plan::Subquery(_) | Plan::Values(_) => false,
        }
    }

    /// Ask an outer input to remove duplicates before it is joined.
    pub fn add_distinct(&self, tree: &mut PlanTree) -> PlanResult<()> {
        match self {
            Plan::Subquery(p) => {
                let input = match tree.kind(p.source) {
                    NodeKind::SubquerySource { subquery, .. } => match tree.kind(*subquery) {
                        NodeKind::Subquery { input, .. } => *input,
                        other => {
                            return Err(PlanError::Internal(format!(
                                "derived table {} does not wrap a subquery: {:?}",
                                p.source, other
                            )))
                        }
                    },
                    other => {
                        return Err(PlanError::Internal(format!(
                            "subquery plan over {:?}",
                            other
                        )))
                    }
                };
                if !matches!(tree.kind(input), NodeKind::Distinct { .. }) {
                    tree.wrap(input, |child| NodeKind::Distinct { input: child });
                }
                Ok(())
            }
            Plan::Values(p) => match tree.kind_mut(p.values) {
                NodeKind::ValuesSource { distinct, .. } => {
                    *distinct = DistinctState::NeedDistinct;
                    Ok(())
                }
                other => Err(PlanError::Internal(format!("values plan over {:?}", other))),
            },
            Plan::Group(_) | Plan::Join(_) => Err(PlanError::Internal(
                "distinct requested on a group or join input".into(),
            )),
        }
    }

    /// Write the plan into the tree. Returns the node standing for it.
    pub fn install(&self, tree: &mut PlanTree) -> PlanResult<NodeId> {
        match self {
            Plan::Group(p) => install_group(tree, p),
            Plan::Join(p) => install_join(tree, p),
            Plan::Subquery(p) => {
                let parent = tree.output(p.region).ok_or_else(|| {
                    PlanError::Internal(format!("subquery region {} is detached", p.region))
                })?;
                let root = p.root.install(tree)?;
                if root != p.region && !tree.replace_input(parent, p.region, root) {
                    return Err(PlanError::Internal(format!(
                        "region {} not found under {}",
                        p.region, parent
                    )));
                }
                Ok(p.source)
            }
            Plan::Values(p) => Ok(p.values),
        }
    }
}

/// Rebuild a group as a left-deep join chain over its members.
fn install_group(tree: &mut PlanTree, plan: &GroupPlan) -> PlanResult<NodeId> {
    let (group, members) = match tree.kind(plan.group) {
        NodeKind::TableGroupJoinTree { group, members } => (group.clone(), members.clone()),
        other => {
            return Err(PlanError::Internal(format!(
                "group plan over {:?}",
                other
            )))
        }
    };
    let mut members = members.into_iter();
    let mut joins = members
        .next()
        .map(|m| m.table)
        .ok_or_else(|| PlanError::Internal(format!("group {} has no tables", group)))?;
    for member in members {
        joins = tree.add(NodeKind::JoinNode {
            left: joins,
            right: member.table,
            join_type: member.parent_join_type,
            conditions: member.join_conditions,
            implementation: Some(JoinImplementation::NestedLoops),
        });
    }
    let installed = tree.add(NodeKind::TableJoins {
        joins,
        group,
        scan: plan.scan.clone(),
    });
    debug!(group = %plan.group, node = %installed, scan = %plan.scan, "installed group");
    Ok(installed)
}

fn install_join(tree: &mut PlanTree, plan: &JoinPlan) -> PlanResult<NodeId> {
    if plan.need_distinct {
        plan.left.add_distinct(tree)?;
    }
    let left = plan.left.install(tree)?;
    let right = plan.right.install(tree)?;

    let mut conditions: Vec<Expr> = Vec::new();
    for op in &plan.operators {
        for cond in &op.conditions {
            if !conditions.contains(cond) {
                conditions.push(cond.clone());
            }
        }
        if let OperatorOrigin::Where(select) = op.origin {
            if let NodeKind::Select {
                conditions: remaining,
                ..
            } = tree.kind_mut(select)
            {
                remaining.retain(|c| !op.conditions.contains(c));
            }
        }
    }

    let kind = NodeKind::JoinNode {
        left,
        right,
        join_type: plan.join_type,
        conditions,
        implementation: Some(plan.implementation),
    };
    let node = match plan.operators.iter().find_map(|op| op.join()) {
        Some(existing) => {
            tree.set_kind(existing, kind);
            existing
        }
        None => tree.add(kind),
    };
    debug!(node = %node, join_type = %plan.join_type, cost = %plan.cost, "installed join");
    Ok(node)
}

/// Memo entry: the plans found for one relation set.
pub enum PlanClass<'a> {
    /// One group, planned per outer context.
    Group {
        goal: GroupIndexGoal<'a>,
        plans: Vec<(RelationSet, Rc<Plan>)>,
    },
    /// A derived table, planned per outer context by its picker.
    Subquery {
        source: NodeId,
        picker: usize,
        plans: Vec<(RelationSet, Rc<Plan>)>,
    },
    Values { plan: Rc<Plan> },
    /// Several relations; only the cheapest plan is kept.
    Join { best: Option<Rc<Plan>> },
}

impl PlanClass<'_> {
    /// A plan already computed for the given outer context.
    pub fn cached(&self, outer: RelationSet) -> Option<Rc<Plan>> {
        match self {
            PlanClass::Group { plans, .. } | PlanClass::Subquery { plans, .. } => plans
                .iter()
                .find(|(set, _)| *set == outer)
                .map(|(_, plan)| Rc::clone(plan)),
            PlanClass::Values { plan } => Some(Rc::clone(plan)),
            PlanClass::Join { best } => best.clone(),
        }
    }

    /// Whether the class plans a single derived table or values list.
    pub fn accepts_distinct(&self) -> bool {
        matches!(self, PlanClass::Subquery { .. } | PlanClass::Values { .. })
    }
}

//! Plan construction for the join enumerator.
//!
//! [`JoinEnumerator`] is the [`JoinEvaluator`] behind one region's DPhyp
//! run. It seeds a plan class per relation, builds nested-loop candidates
//! for every emitted pair and keeps the cheapest per relation set.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::{debug, trace};

use super::bitset::RelationSet;
use super::cost::{constants::VALUES_PER_ROW, CostEstimate};
use super::dphyp::JoinEvaluator;
use super::error::{PlanError, PlanResult};
use super::index_goal::GroupIndexGoal;
use super::join_graph::{JoinGraph, JoinOperator};
use super::picker::{Picker, PlanningContext};
use super::plan::{GroupPlan, JoinPlan, Plan, PlanClass, ValuesPlan};
use crate::plan::{Expr, JoinImplementation, JoinType, NodeId, NodeKind};

/// Evaluator for one join region.
pub struct JoinEnumerator<'a, 'c, 'g> {
    ctx: &'c PlanningContext<'a>,
    picker: &'a Picker,
    graph: &'g JoinGraph,
    /// Sources bound by the context the region is planned in.
    subquery_bound: BTreeSet<NodeId>,
    /// Conditions pushed in from the enclosing context, for lookups only.
    subquery_joins: Vec<JoinOperator>,
    depth: usize,
}

impl<'a, 'c, 'g> JoinEnumerator<'a, 'c, 'g> {
    pub fn new(
        ctx: &'c PlanningContext<'a>,
        picker: &'a Picker,
        graph: &'g JoinGraph,
        subquery_bound: BTreeSet<NodeId>,
        subquery_joins: Vec<JoinOperator>,
        depth: usize,
    ) -> Self {
        Self {
            ctx,
            picker,
            graph,
            subquery_bound,
            subquery_joins,
            depth,
        }
    }

    /// Sources whose columns are fixed when `outer` is on the outside of a
    /// nested loop.
    pub fn bound_tables(&self, outer: RelationSet) -> BTreeSet<NodeId> {
        let mut bound = self.picker.goal.outer_tables.clone();
        bound.extend(self.subquery_bound.iter().copied());
        for i in outer.iter() {
            if let Some(relation) = self.graph.relation(i) {
                match self.ctx.tree.kind(relation) {
                    NodeKind::TableGroupJoinTree { .. } => {
                        bound.extend(self.ctx.tree.group_tables(relation))
                    }
                    _ => {
                        bound.insert(relation);
                    }
                }
            }
        }
        bound
    }

    /// Best plan for a class with nothing from this region bound.
    pub fn best_plan(&self, set: RelationSet, class: &mut PlanClass<'a>) -> PlanResult<Rc<Plan>> {
        self.best_nested_plan(set, class, RelationSet::empty(), &[])
    }

    /// Best plan for a class on the inside of a nested loop with `outer`
    /// bound. Plans are computed once per outer set and cached.
    pub fn best_nested_plan(
        &self,
        set: RelationSet,
        class: &mut PlanClass<'a>,
        outer: RelationSet,
        joins: &[&JoinOperator],
    ) -> PlanResult<Rc<Plan>> {
        if let Some(plan) = class.cached(outer) {
            return Ok(plan);
        }
        let plan = match class {
            PlanClass::Group { goal, plans } => {
                goal.set_bound_tables(self.bound_tables(outer));
                goal.set_join_conditions(self.lookup_conditions(joins));
                let choice = goal.pick_best_scan()?;
                let plan = Rc::new(Plan::Group(GroupPlan {
                    group: goal.group(),
                    outer,
                    scan: choice.scan,
                    cost: choice.cost,
                }));
                plans.push((outer, Rc::clone(&plan)));
                plan
            }
            PlanClass::Subquery {
                source,
                picker,
                plans,
            } => {
                let mut pushed: Vec<&JoinOperator> = joins.to_vec();
                pushed.extend(self.subquery_joins.iter());
                let plan = self.ctx.subquery_plan(
                    *source,
                    *picker,
                    outer,
                    self.bound_tables(outer),
                    &pushed,
                    self.depth,
                )?;
                plans.push((outer, Rc::clone(&plan)));
                plan
            }
            PlanClass::Values { plan } => Rc::clone(plan),
            PlanClass::Join { best: None } => {
                return Err(PlanError::Internal(format!("no plan for relation set {}", set)))
            }
            PlanClass::Join { best: Some(best) } => Rc::clone(best),
        };
        Ok(plan)
    }

    fn lookup_conditions(&self, joins: &[&JoinOperator]) -> Vec<Expr> {
        joins
            .iter()
            .copied()
            .chain(self.subquery_joins.iter())
            .flat_map(|op| op.conditions.iter().cloned())
            .collect()
    }
}

impl<'a> JoinEvaluator for JoinEnumerator<'a, '_, '_> {
    type Class = PlanClass<'a>;

    fn evaluate_table(&mut self, set: RelationSet, relation: NodeId) -> PlanResult<PlanClass<'a>> {
        let ctx = self.ctx;
        match ctx.tree.kind(relation) {
            NodeKind::TableGroupJoinTree { .. } => {
                let mut goal = GroupIndexGoal::new(
                    &self.picker.goal,
                    ctx.tree,
                    ctx.catalog,
                    ctx.estimator,
                    relation,
                )?;
                goal.update_required_columns();
                Ok(PlanClass::Group {
                    goal,
                    plans: Vec::new(),
                })
            }
            NodeKind::SubquerySource { .. } => {
                let picker = ctx.subpicker(relation)?;
                Ok(PlanClass::Subquery {
                    source: relation,
                    picker,
                    plans: Vec::new(),
                })
            }
            NodeKind::ValuesSource { rows, .. } => Ok(PlanClass::Values {
                plan: Rc::new(values_plan(relation, rows.len())),
            }),
            NodeKind::TableSource { table, .. } => Err(PlanError::Unsupported(format!(
                "table {} joined outside of a table group",
                table
            ))),
            other => Err(PlanError::Internal(format!(
                "relation {} of {} is not joinable: {:?}",
                set, self.picker.region, other
            ))),
        }
    }

    fn evaluate_join(
        &mut self,
        left_set: RelationSet,
        left: &mut PlanClass<'a>,
        right_set: RelationSet,
        right: &mut PlanClass<'a>,
        set: RelationSet,
        existing: Option<PlanClass<'a>>,
        join_type: JoinType,
        operators: &[&JoinOperator],
    ) -> PlanResult<Option<PlanClass<'a>>> {
        if join_type == JoinType::InnerNeedDistinct
            && !(left_set.len() == 1 && left.accepts_distinct())
        {
            trace!(left = %left_set, right = %right_set, "outer side cannot be made distinct");
            return Ok(existing);
        }

        let left_plan = self.best_plan(left_set, left)?;
        let right_plan = self.best_nested_plan(right_set, right, left_set, operators)?;
        let (resolved, need_distinct) = match join_type {
            JoinType::SemiInnerAlreadyDistinct | JoinType::SemiInnerIfDistinct => {
                (JoinType::Semi, false)
            }
            JoinType::InnerNeedDistinct => (JoinType::Inner, true),
            other => (other, false),
        };
        let cost = left_plan.cost().nest(&right_plan.cost());
        let candidate = Rc::new(Plan::Join(JoinPlan {
            left: left_plan,
            right: right_plan,
            join_type: resolved,
            implementation: JoinImplementation::NestedLoops,
            operators: operators.iter().map(|op| (*op).clone()).collect(),
            need_distinct,
            cost,
        }));

        let mut class = existing.unwrap_or(PlanClass::Join { best: None });
        match &mut class {
            PlanClass::Join { best } => match best {
                None => {
                    debug!(set = %set, left = %left_set, join_type = %resolved, cost = %cost, "Selecting");
                    *best = Some(candidate);
                }
                Some(current) if cost < current.cost() => {
                    debug!(
                        set = %set,
                        left = %left_set,
                        join_type = %resolved,
                        cost = %cost,
                        previous = %current.cost(),
                        "Preferring"
                    );
                    *best = Some(candidate);
                }
                Some(current) => {
                    debug!(
                        set = %set,
                        left = %left_set,
                        join_type = %resolved,
                        cost = %cost,
                        best = %current.cost(),
                        "Rejecting"
                    );
                }
            },
            _ => {
                return Err(PlanError::Internal(format!(
                    "relation set {} planned as a leaf",
                    set
                )))
            }
        }
        Ok(Some(class))
    }
}

/// Plan for a literal row set of `rows` rows.
pub fn values_plan(values: NodeId, rows: usize) -> Plan {
    let rows = rows as f64;
    Plan::Values(ValuesPlan {
        values,
        cost: CostEstimate::new(rows * VALUES_PER_ROW, rows),
    })
}

//! DPhyp: dynamic-programming join enumeration over hypergraphs.
//!
//! The solver enumerates every connected subgraph and, for each, every
//! connected complement joined to it by a hyperedge, bottom-up so that both
//! halves of a pair are already planned. What a "plan" is belongs to the
//! [`JoinEvaluator`]; the solver only tracks which relation sets have one.

use std::collections::HashMap;

use tracing::trace;

use super::bitset::RelationSet;
use super::error::{PlanError, PlanResult};
use super::join_graph::{JoinGraph, JoinOperator};
use crate::plan::{JoinType, NodeId};

/// Builds plan classes for relation sets as the solver discovers them.
pub trait JoinEvaluator {
    type Class;

    /// Seed the class for a single relation.
    fn evaluate_table(&mut self, set: RelationSet, relation: NodeId) -> PlanResult<Self::Class>;

    /// Consider joining `left` (outer) with `right` (inner) to form `set`.
    ///
    /// Returns the class for `set`: `existing` updated with the new
    /// candidate, or `None` if the orientation cannot be planned and there
    /// was no existing class.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_join(
        &mut self,
        left_set: RelationSet,
        left: &mut Self::Class,
        right_set: RelationSet,
        right: &mut Self::Class,
        set: RelationSet,
        existing: Option<Self::Class>,
        join_type: JoinType,
        operators: &[&JoinOperator],
    ) -> PlanResult<Option<Self::Class>>;
}

/// Plan classes by relation set, produced by one enumeration run.
#[derive(Debug)]
pub struct Memo<C> {
    classes: HashMap<RelationSet, C>,
    root: RelationSet,
}

impl<C> Memo<C> {
    pub fn get(&self, set: RelationSet) -> Option<&C> {
        self.classes.get(&set)
    }

    pub fn get_mut(&mut self, set: RelationSet) -> Option<&mut C> {
        self.classes.get_mut(&set)
    }

    pub fn contains(&self, set: RelationSet) -> bool {
        self.classes.contains_key(&set)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Relation sets that were planned.
    pub fn sets(&self) -> impl Iterator<Item = RelationSet> + '_ {
        self.classes.keys().copied()
    }

    /// Class for the whole region.
    pub fn root(&self) -> PlanResult<&C> {
        self.classes.get(&self.root).ok_or_else(|| {
            PlanError::Internal(format!("no join order found for {}", self.root))
        })
    }

    pub fn root_mut(&mut self) -> PlanResult<&mut C> {
        let root = self.root;
        self.classes
            .get_mut(&root)
            .ok_or_else(|| PlanError::Internal(format!("no join order found for {}", root)))
    }
}

/// Run the enumeration. `limit` caps the number of csg/cmp pairs emitted.
pub fn solve<E: JoinEvaluator>(
    graph: &JoinGraph,
    evaluator: &mut E,
    limit: Option<u64>,
) -> PlanResult<Memo<E::Class>> {
    let mut solver = Solver {
        graph,
        evaluator,
        plans: HashMap::new(),
        emitted: 0,
        limit,
    };
    solver.run()?;
    Ok(Memo {
        classes: solver.plans,
        root: graph.all(),
    })
}

struct Solver<'g, 'e, E: JoinEvaluator> {
    graph: &'g JoinGraph,
    evaluator: &'e mut E,
    plans: HashMap<RelationSet, E::Class>,
    emitted: u64,
    limit: Option<u64>,
}

/// Join type of an operator seen from the other side, if it can commute.
fn commute(join_type: JoinType) -> Option<JoinType> {
    match join_type {
        JoinType::Inner | JoinType::Full => Some(join_type),
        JoinType::SemiInnerAlreadyDistinct => Some(JoinType::Inner),
        JoinType::SemiInnerIfDistinct => Some(JoinType::InnerNeedDistinct),
        JoinType::Left
        | JoinType::Right
        | JoinType::Semi
        | JoinType::Anti
        | JoinType::InnerNeedDistinct => None,
    }
}

/// Combine the join type required so far with one more operator's.
fn merge(current: Option<JoinType>, next: Option<JoinType>) -> Option<JoinType> {
    match (current, next) {
        (Some(JoinType::Inner), next) => next,
        (Some(current), Some(JoinType::Inner)) => Some(current),
        (Some(current), Some(next)) if current == next => Some(current),
        _ => None,
    }
}

impl<E: JoinEvaluator> Solver<'_, '_, E> {
    fn run(&mut self) -> PlanResult<()> {
        let n = self.graph.relation_count();
        for (i, &relation) in self.graph.relations().iter().enumerate() {
            let set = RelationSet::singleton(i);
            let class = self.evaluator.evaluate_table(set, relation)?;
            self.plans.insert(set, class);
        }
        for v in (0..n).rev() {
            let start = RelationSet::singleton(v);
            self.emit_csg(start)?;
            self.enumerate_csg_rec(start, RelationSet::up_to(v))?;
        }
        Ok(())
    }

    fn enumerate_csg_rec(&mut self, s1: RelationSet, x: RelationSet) -> PlanResult<()> {
        let neighbors = self.graph.neighborhood(s1, x);
        if neighbors.is_empty() {
            return Ok(());
        }
        for sub in neighbors.subsets() {
            let grown = s1.union(sub);
            if self.plans.contains_key(&grown) {
                self.emit_csg(grown)?;
            }
        }
        let excluded = x.union(neighbors);
        for sub in neighbors.subsets() {
            self.enumerate_csg_rec(s1.union(sub), excluded)?;
        }
        Ok(())
    }

    fn emit_csg(&mut self, s1: RelationSet) -> PlanResult<()> {
        let min = match s1.first() {
            Some(min) => min,
            None => return Ok(()),
        };
        let x = s1.union(RelationSet::up_to(min));
        let neighbors = self.graph.neighborhood(s1, x);
        let mut descending: Vec<usize> = neighbors.iter().collect();
        descending.reverse();
        for v in descending {
            let s2 = RelationSet::singleton(v);
            if self.graph.connects(s1, s2) {
                self.emit_csg_cmp(s1, s2)?;
            }
            let excluded = x.union(RelationSet::up_to(v).intersection(neighbors));
            self.enumerate_cmp_rec(s1, s2, excluded)?;
        }
        Ok(())
    }

    fn enumerate_cmp_rec(
        &mut self,
        s1: RelationSet,
        s2: RelationSet,
        x: RelationSet,
    ) -> PlanResult<()> {
        let neighbors = self.graph.neighborhood(s2, x);
        if neighbors.is_empty() {
            return Ok(());
        }
        for sub in neighbors.subsets() {
            let grown = s2.union(sub);
            if self.plans.contains_key(&grown) && self.graph.connects(s1, grown) {
                self.emit_csg_cmp(s1, grown)?;
            }
        }
        let excluded = x.union(neighbors);
        for sub in neighbors.subsets() {
            self.enumerate_cmp_rec(s1, s2.union(sub), excluded)?;
        }
        Ok(())
    }

    fn emit_csg_cmp(&mut self, s1: RelationSet, s2: RelationSet) -> PlanResult<()> {
        self.emitted += 1;
        if let Some(limit) = self.limit {
            if self.emitted > limit {
                return Err(PlanError::EnumerationLimit { limit });
            }
        }
        let set = s1.union(s2);
        trace!(left = %s1, right = %s2, "csg-cmp pair");

        let mut operators: Vec<&JoinOperator> = Vec::new();
        let mut join12 = Some(JoinType::Inner);
        let mut join21 = Some(JoinType::Inner);
        for op in self.graph.operators() {
            if !op.edge().is_subset_of(set) {
                continue;
            }
            let forward = op.left.is_subset_of(s1) && op.right.is_subset_of(s2);
            let backward = op.left.is_subset_of(s2) && op.right.is_subset_of(s1);
            if !forward && !backward {
                if op.edge().overlaps(s1) && op.edge().overlaps(s2) {
                    trace!(left = %s1, right = %s2, "operator not applicable, pair rejected");
                    return Ok(());
                }
                continue;
            }
            operators.push(op);
            let (as12, as21) = if forward {
                (Some(op.join_type), commute(op.join_type))
            } else {
                (commute(op.join_type), Some(op.join_type))
            };
            join12 = merge(join12, as12);
            join21 = merge(join21, as21);
        }
        if operators.is_empty() {
            return Ok(());
        }

        let mut left = self.take(s1)?;
        let mut right = self.take(s2)?;
        let mut existing = self.plans.remove(&set);
        if let Some(join_type) = join12 {
            existing = self.evaluator.evaluate_join(
                s1, &mut left, s2, &mut right, set, existing, join_type, &operators,
            )?;
        }
        if let Some(join_type) = join21 {
            existing = self.evaluator.evaluate_join(
                s2, &mut right, s1, &mut left, set, existing, join_type, &operators,
            )?;
        }
        self.plans.insert(s1, left);
        self.plans.insert(s2, right);
        if let Some(class) = existing {
            self.plans.insert(set, class);
        }
        Ok(())
    }

    fn take(&mut self, set: RelationSet) -> PlanResult<E::Class> {
        self.plans
            .remove(&set)
            .ok_or_else(|| PlanError::Internal(format!("relation set {} not planned", set)))
    }
}

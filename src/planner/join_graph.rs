//! Join hypergraph with outer-join conflict detection.
//!
//! Relations are the non-join leaves of a join tree, numbered left to right.
//! Each join node becomes a [`JoinOperator`] whose hyperedge is widened by
//! its total eligibility set (TES) so that the enumerator never reassociates
//! an outer, semi or anti join into an inequivalent order.

use std::collections::HashMap;

use tracing::trace;

use super::bitset::RelationSet;
use super::error::{PlanError, PlanResult};
use crate::plan::{Expr, JoinType, NodeId, NodeKind, PlanTree};

/// Where a join operator's conditions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorOrigin {
    /// A join node of the region being enumerated.
    Join(NodeId),
    /// A multi-relation WHERE condition of the given Select.
    Where(NodeId),
    /// A join into an enclosing derived table, used for lookups only.
    Outer,
}

/// A join edge with its predicates and reordering constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOperator {
    pub origin: OperatorOrigin,
    pub join_type: JoinType,
    pub conditions: Vec<Expr>,
    /// Hyperedge endpoints.
    pub left: RelationSet,
    pub right: RelationSet,
    /// Relations under the operator's left and right inputs.
    pub subtree_left: RelationSet,
    pub subtree_right: RelationSet,
    /// Relations referenced by the conditions.
    pub predicate_tables: RelationSet,
    /// Relations that must be present before the operator applies.
    pub tes: RelationSet,
}

impl JoinOperator {
    /// Join node the operator was built from.
    pub fn join(&self) -> Option<NodeId> {
        match self.origin {
            OperatorOrigin::Join(node) => Some(node),
            _ => None,
        }
    }

    /// Both endpoints of the hyperedge.
    pub fn edge(&self) -> RelationSet {
        self.left.union(self.right)
    }

    /// Relations under the operator.
    pub fn subtree(&self) -> RelationSet {
        self.subtree_left.union(self.subtree_right)
    }

    /// Relations the operator makes null-supplied or matches only for
    /// existence. Conditions on these may not move across the operator.
    fn restricted(&self) -> RelationSet {
        match self.join_type {
            JoinType::Inner | JoinType::InnerNeedDistinct => RelationSet::empty(),
            JoinType::Full => self.subtree(),
            JoinType::Left
            | JoinType::Right
            | JoinType::Semi
            | JoinType::Anti
            | JoinType::SemiInnerAlreadyDistinct
            | JoinType::SemiInnerIfDistinct => self.subtree_right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorClass {
    Inner,
    LeftOuter,
    FullOuter,
    Semi,
    Anti,
}

impl OperatorClass {
    fn of(join_type: JoinType) -> Self {
        match join_type {
            JoinType::Inner | JoinType::InnerNeedDistinct => OperatorClass::Inner,
            JoinType::Left | JoinType::Right => OperatorClass::LeftOuter,
            JoinType::Full => OperatorClass::FullOuter,
            JoinType::Semi | JoinType::SemiInnerAlreadyDistinct | JoinType::SemiInnerIfDistinct => {
                OperatorClass::Semi
            }
            JoinType::Anti => OperatorClass::Anti,
        }
    }
}

/// `(e1 a e2) b e3 == e1 a (e2 b e3)`
fn assoc(a: OperatorClass, b: OperatorClass) -> bool {
    a == OperatorClass::Inner && b != OperatorClass::FullOuter
}

/// `(e1 a e2) b e3 == (e1 b e3) a e2`
fn l_asscom(a: OperatorClass, b: OperatorClass) -> bool {
    a != OperatorClass::FullOuter && b != OperatorClass::FullOuter
}

/// `e1 a (e2 b e3) == e2 b (e1 a e3)`
fn r_asscom(a: OperatorClass, b: OperatorClass) -> bool {
    a == OperatorClass::Inner && b == OperatorClass::Inner
}

/// Relations and operators of one join region.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    relations: Vec<NodeId>,
    operators: Vec<JoinOperator>,
    /// Column source node to relation index.
    sources: HashMap<NodeId, usize>,
}

impl JoinGraph {
    /// Build the graph for the join tree under `root`.
    ///
    /// Multi-relation `where_conditions` from `where_select` become extra
    /// inner operators when they can be evaluated at any inner join.
    pub fn build(
        tree: &PlanTree,
        root: NodeId,
        where_conditions: &[Expr],
        where_select: Option<NodeId>,
        max_relations: usize,
    ) -> PlanResult<Self> {
        let mut leaves = Vec::new();
        collect_leaves(tree, root, &mut leaves);
        let max = max_relations.min(RelationSet::CAPACITY);
        if leaves.len() > max {
            return Err(PlanError::TooManyRelations {
                count: leaves.len(),
                max,
            });
        }

        let mut graph = JoinGraph {
            relations: leaves,
            operators: Vec::new(),
            sources: HashMap::new(),
        };
        for (i, &relation) in graph.relations.iter().enumerate() {
            match tree.kind(relation) {
                NodeKind::TableGroupJoinTree { members, .. } => {
                    for member in members {
                        graph.sources.insert(member.table, i);
                    }
                }
                _ => {
                    graph.sources.insert(relation, i);
                }
            }
        }

        let mut next_leaf = 0;
        graph.add_join_operators(tree, root, &mut next_leaf)?;
        graph.compute_tes();
        if let Some(select) = where_select {
            graph.add_where_operators(where_conditions, select);
        }
        Ok(graph)
    }

    /// Joinable leaf nodes, by relation index.
    pub fn relations(&self) -> &[NodeId] {
        &self.relations
    }

    pub fn relation(&self, index: usize) -> Option<NodeId> {
        self.relations.get(index).copied()
    }

    pub fn operators(&self) -> &[JoinOperator] {
        &self.operators
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Every relation of the region.
    pub fn all(&self) -> RelationSet {
        RelationSet::below(self.relations.len())
    }

    /// Relation sourcing a column, if it belongs to this region.
    pub fn relation_of_source(&self, source: NodeId) -> Option<usize> {
        self.sources.get(&source).copied()
    }

    /// Relations referenced by an expression. References to sources outside
    /// the region are ignored.
    pub fn tables_of(&self, expr: &Expr) -> RelationSet {
        expr.columns()
            .into_iter()
            .filter_map(|c| self.relation_of_source(c.source))
            .collect()
    }

    /// DPhyp neighborhood `N(S, X)`: the lowest relation of every minimal
    /// hyperedge endpoint reachable from `s` that avoids `s ∪ x`.
    pub fn neighborhood(&self, s: RelationSet, x: RelationSet) -> RelationSet {
        let excluded = s.union(x);
        let mut candidates: Vec<RelationSet> = Vec::new();
        for op in &self.operators {
            for (u, v) in [(op.left, op.right), (op.right, op.left)] {
                if u.is_subset_of(s) && !v.overlaps(excluded) && !candidates.contains(&v) {
                    candidates.push(v);
                }
            }
        }
        let mut neighbors = RelationSet::empty();
        for v in &candidates {
            let subsumed = candidates
                .iter()
                .any(|w| w != v && w.is_subset_of(*v));
            if !subsumed {
                neighbors = neighbors.union(v.lowest());
            }
        }
        neighbors
    }

    /// Whether some hyperedge joins `s1` to `s2`.
    pub fn connects(&self, s1: RelationSet, s2: RelationSet) -> bool {
        self.operators.iter().any(|op| {
            (op.left.is_subset_of(s1) && op.right.is_subset_of(s2))
                || (op.left.is_subset_of(s2) && op.right.is_subset_of(s1))
        })
    }

    // Post-order over the join tree; the leaf counter mirrors
    // `collect_leaves` so subtree sets match relation indices.
    fn add_join_operators(
        &mut self,
        tree: &PlanTree,
        node: NodeId,
        next_leaf: &mut usize,
    ) -> PlanResult<RelationSet> {
        match tree.kind(node) {
            NodeKind::JoinNode {
                left,
                right,
                join_type,
                conditions,
                ..
            } => {
                let left_tables = self.add_join_operators(tree, *left, next_leaf)?;
                let right_tables = self.add_join_operators(tree, *right, next_leaf)?;
                let (join_type, subtree_left, subtree_right) = match join_type {
                    JoinType::Right => (JoinType::Left, right_tables, left_tables),
                    JoinType::InnerNeedDistinct => {
                        return Err(PlanError::Internal(format!(
                            "join {} already resolved to {}",
                            node, join_type
                        )));
                    }
                    other => (*other, left_tables, right_tables),
                };
                let predicate_tables = conditions
                    .iter()
                    .fold(RelationSet::empty(), |acc, c| acc.union(self.tables_of(c)));
                self.operators.push(JoinOperator {
                    origin: OperatorOrigin::Join(node),
                    join_type,
                    conditions: conditions.clone(),
                    left: subtree_left,
                    right: subtree_right,
                    subtree_left,
                    subtree_right,
                    predicate_tables,
                    tes: RelationSet::empty(),
                });
                Ok(left_tables.union(right_tables))
            }
            _ => {
                let index = *next_leaf;
                *next_leaf += 1;
                Ok(RelationSet::singleton(index))
            }
        }
    }

    fn compute_tes(&mut self) {
        let snapshot = self.operators.clone();
        for op in self.operators.iter_mut() {
            let mut tes = op.predicate_tables.intersection(op.subtree());
            if !tes.overlaps(op.subtree_left) {
                tes = tes.union(op.subtree_left);
            }
            if !tes.overlaps(op.subtree_right) {
                tes = tes.union(op.subtree_right);
            }

            let class = OperatorClass::of(op.join_type);
            for child in &snapshot {
                let child_class = OperatorClass::of(child.join_type);
                if child.subtree().is_subset_of(op.subtree_left) {
                    if !assoc(child_class, class) {
                        tes = tes.union(child.subtree_left);
                    }
                    if !l_asscom(child_class, class) {
                        tes = tes.union(child.subtree_right);
                    }
                } else if child.subtree().is_subset_of(op.subtree_right) {
                    if !assoc(class, child_class) {
                        tes = tes.union(child.subtree_right);
                    }
                    if !r_asscom(class, child_class) {
                        tes = tes.union(child.subtree_left);
                    }
                }
            }

            op.tes = tes;
            op.left = tes.intersection(op.subtree_left);
            op.right = tes.intersection(op.subtree_right);
            trace!(
                join_type = %op.join_type,
                left = %op.left,
                right = %op.right,
                "join operator"
            );
        }
    }

    fn add_where_operators(&mut self, conditions: &[Expr], select: NodeId) {
        let restricted = self
            .operators
            .iter()
            .fold(RelationSet::empty(), |acc, op| acc.union(op.restricted()));

        let mut added = Vec::new();
        for cond in conditions {
            let tables = self.tables_of(cond);
            if tables.len() < 2 || tables.overlaps(restricted) {
                continue;
            }
            let lowest_join = self
                .operators
                .iter()
                .filter(|op| tables.is_subset_of(op.subtree()))
                .min_by_key(|op| op.subtree().len());
            match lowest_join {
                Some(op) if op.join_type == JoinType::Inner => {}
                _ => continue,
            }

            let (left, right) = self.split_condition(cond, tables);
            added.push(JoinOperator {
                origin: OperatorOrigin::Where(select),
                join_type: JoinType::Inner,
                conditions: vec![cond.clone()],
                left,
                right,
                subtree_left: left,
                subtree_right: right,
                predicate_tables: tables,
                tes: tables,
            });
        }
        self.operators.extend(added);
    }

    fn split_condition(&self, cond: &Expr, tables: RelationSet) -> (RelationSet, RelationSet) {
        if let Some((lhs, _, rhs)) = cond.as_comparison() {
            let left = self.tables_of(lhs);
            let right = self.tables_of(rhs);
            if !left.is_empty() && !right.is_empty() && !left.overlaps(right) {
                return (left, right);
            }
        }
        let lowest = tables.lowest();
        (lowest, tables.difference(lowest))
    }

    /// Graph over bare relations with the given operators, for tests of the
    /// enumeration itself.
    #[cfg(test)]
    pub(crate) fn from_operators(relations: Vec<NodeId>, operators: Vec<JoinOperator>) -> Self {
        let sources = relations.iter().enumerate().map(|(i, r)| (*r, i)).collect();
        JoinGraph {
            relations,
            operators,
            sources,
        }
    }
}

fn collect_leaves(tree: &PlanTree, node: NodeId, out: &mut Vec<NodeId>) {
    match tree.kind(node) {
        NodeKind::JoinNode { left, right, .. } => {
            collect_leaves(tree, *left, out);
            collect_leaves(tree, *right, out);
        }
        _ => out.push(node),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Simple inner edge between two relation sets.
    pub(crate) fn inner_edge(left: RelationSet, right: RelationSet) -> JoinOperator {
        JoinOperator {
            origin: OperatorOrigin::Outer,
            join_type: JoinType::Inner,
            conditions: Vec::new(),
            left,
            right,
            subtree_left: left,
            subtree_right: right,
            predicate_tables: left.union(right),
            tes: left.union(right),
        }
    }

    fn set(bits: &[usize]) -> RelationSet {
        bits.iter().copied().collect()
    }

    /// `A LEFT JOIN (B JOIN C ON B.y = C.y) ON A.x = B.x`
    fn outer_over_inner() -> (PlanTree, NodeId, [NodeId; 3]) {
        let mut tree = PlanTree::new();
        let (a, at) = tree.single_table_group("a");
        let (b, bt) = tree.single_table_group("b");
        let (c, ct) = tree.single_table_group("c");
        let bc = tree.join(
            b,
            c,
            JoinType::Inner,
            vec![Expr::eq(Expr::column(bt, "y"), Expr::column(ct, "y"))],
        );
        let root = tree.join(
            a,
            bc,
            JoinType::Left,
            vec![Expr::eq(Expr::column(at, "x"), Expr::column(bt, "x"))],
        );
        tree.query(root);
        (tree, root, [at, bt, ct])
    }

    #[test]
    fn test_outer_join_tes_covers_inner_pair() {
        let (tree, root, _) = outer_over_inner();
        let graph = JoinGraph::build(&tree, root, &[], None, 64).unwrap();
        assert_eq!(graph.relation_count(), 3);

        let inner = &graph.operators()[0];
        assert_eq!((inner.left, inner.right), (set(&[1]), set(&[2])));

        let outer = &graph.operators()[1];
        assert_eq!(outer.join_type, JoinType::Left);
        assert_eq!(outer.left, set(&[0]));
        assert_eq!(outer.right, set(&[1, 2]));
    }

    #[test]
    fn test_inner_chain_keeps_simple_edges() {
        let mut tree = PlanTree::new();
        let (a, at) = tree.single_table_group("a");
        let (b, bt) = tree.single_table_group("b");
        let (c, ct) = tree.single_table_group("c");
        let ab = tree.join(
            a,
            b,
            JoinType::Inner,
            vec![Expr::eq(Expr::column(at, "x"), Expr::column(bt, "x"))],
        );
        let root = tree.join(
            ab,
            c,
            JoinType::Inner,
            vec![Expr::eq(Expr::column(bt, "y"), Expr::column(ct, "y"))],
        );
        tree.query(root);

        let graph = JoinGraph::build(&tree, root, &[], None, 64).unwrap();
        let top = &graph.operators()[1];
        assert_eq!((top.left, top.right), (set(&[1]), set(&[2])));
        assert!(!graph.connects(set(&[0]), set(&[2])));
        assert_eq!(graph.neighborhood(set(&[0]), set(&[0])), set(&[1]));
        assert_eq!(graph.neighborhood(set(&[1]), set(&[0, 1])), set(&[2]));
    }

    #[test]
    fn test_right_join_normalized() {
        let mut tree = PlanTree::new();
        let (a, at) = tree.single_table_group("a");
        let (b, bt) = tree.single_table_group("b");
        let root = tree.join(
            a,
            b,
            JoinType::Right,
            vec![Expr::eq(Expr::column(at, "x"), Expr::column(bt, "x"))],
        );
        tree.query(root);

        let graph = JoinGraph::build(&tree, root, &[], None, 64).unwrap();
        let op = &graph.operators()[0];
        assert_eq!(op.join_type, JoinType::Left);
        assert_eq!((op.left, op.right), (set(&[1]), set(&[0])));
    }

    #[test]
    fn test_where_condition_becomes_operator() {
        let mut tree = PlanTree::new();
        let (a, at) = tree.single_table_group("a");
        let (b, bt) = tree.single_table_group("b");
        let (c, ct) = tree.single_table_group("c");
        let ab = tree.join(a, b, JoinType::Inner, Vec::new());
        let root = tree.join(ab, c, JoinType::Inner, Vec::new());
        let cross = Expr::eq(Expr::column(at, "z"), Expr::column(ct, "z"));
        let local = Expr::eq(Expr::column(bt, "w"), Expr::int(3));
        let select = tree.select(root, vec![cross.clone(), local]);
        tree.query(select);

        let conditions = match tree.kind(select) {
            NodeKind::Select { conditions, .. } => conditions.clone(),
            _ => unreachable!(),
        };
        let graph = JoinGraph::build(&tree, root, &conditions, Some(select), 64).unwrap();
        assert_eq!(graph.operators().len(), 3);
        let op = &graph.operators()[2];
        assert_eq!(op.origin, OperatorOrigin::Where(select));
        assert_eq!((op.left, op.right), (set(&[0]), set(&[2])));
        assert_eq!(op.conditions, vec![cross]);
        assert!(graph.connects(set(&[0]), set(&[2])));
    }

    #[test]
    fn test_where_condition_on_null_supplied_side_stays() {
        let (mut tree, root, [at, _, ct]) = outer_over_inner();
        let cond = Expr::eq(Expr::column(at, "z"), Expr::column(ct, "z"));
        let select = tree.select(root, vec![cond.clone()]);

        let graph = JoinGraph::build(&tree, root, &[cond], Some(select), 64).unwrap();
        assert_eq!(graph.operators().len(), 2);
    }

    #[test]
    fn test_too_many_relations() {
        let mut tree = PlanTree::new();
        let (mut root, _) = tree.single_table_group("t0");
        for i in 1..5 {
            let (next, _) = tree.single_table_group(format!("t{}", i));
            root = tree.join(root, next, JoinType::Inner, Vec::new());
        }
        let result = JoinGraph::build(&tree, root, &[], None, 4);
        assert!(matches!(
            result,
            Err(PlanError::TooManyRelations { count: 5, max: 4 })
        ));
    }

    #[test]
    fn test_neighborhood_keeps_minimal_hyperedges() {
        let relations: Vec<NodeId> = (0..4).map(NodeId).collect();
        let graph = JoinGraph::from_operators(
            relations,
            vec![
                inner_edge(set(&[0]), set(&[1, 2])),
                inner_edge(set(&[0]), set(&[1])),
                inner_edge(set(&[0]), set(&[3])),
            ],
        );
        assert_eq!(graph.neighborhood(set(&[0]), set(&[0])), set(&[1, 3]));
    }
}

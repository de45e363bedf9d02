//! Access-path selection for one table group.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, trace};

use super::cost::{CostEstimate, CostEstimator, FilterCounts, FullScanRequest, IndexScanRequest};
use super::error::{PlanError, PlanResult};
use super::goal::QueryIndexGoal;
use crate::catalog::{CatalogSnapshot, IndexDef};
use crate::plan::{
    BinaryOperator, ColumnRef, Expr, GroupScan, IndexScan, NodeId, NodeKind, OrderByExpr,
    PlanTree, Scan, ScanOrdering,
};

/// A scan together with its estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanChoice {
    pub scan: Scan,
    pub cost: CostEstimate,
}

/// Picks the cheapest way to read one group given the bound context.
pub struct GroupIndexGoal<'a> {
    query_goal: &'a QueryIndexGoal,
    tree: &'a PlanTree,
    catalog: &'a CatalogSnapshot,
    estimator: &'a dyn CostEstimator,
    group: NodeId,
    group_name: String,
    /// Member table sources with their catalog names, in member order.
    members: Vec<(NodeId, String)>,
    bound: BTreeSet<NodeId>,
    join_conditions: Vec<Expr>,
    required: Option<HashMap<NodeId, BTreeSet<String>>>,
}

impl<'a> GroupIndexGoal<'a> {
    pub fn new(
        query_goal: &'a QueryIndexGoal,
        tree: &'a PlanTree,
        catalog: &'a CatalogSnapshot,
        estimator: &'a dyn CostEstimator,
        group: NodeId,
    ) -> PlanResult<Self> {
        let (group_name, member_tables) = match tree.kind(group) {
            NodeKind::TableGroupJoinTree { group: name, members } => {
                (name.clone(), members.iter().map(|m| m.table).collect::<Vec<_>>())
            }
            other => {
                return Err(PlanError::Internal(format!(
                    "index goal over non-group node {}: {:?}",
                    group, other
                )))
            }
        };
        let mut members = Vec::with_capacity(member_tables.len());
        for table in member_tables {
            let name = tree.table_name(table).ok_or_else(|| {
                PlanError::Internal(format!("group member {} is not a table source", table))
            })?;
            catalog.table(name)?;
            members.push((table, name.to_string()));
        }
        Ok(Self {
            query_goal,
            tree,
            catalog,
            estimator,
            group,
            group_name,
            members,
            bound: query_goal.outer_tables.clone(),
            join_conditions: Vec::new(),
            required: None,
        })
    }

    pub fn group(&self) -> NodeId {
        self.group
    }

    /// Sources whose columns are fixed while this group is scanned.
    pub fn set_bound_tables(&mut self, tables: BTreeSet<NodeId>) {
        self.bound = tables;
        self.bound.extend(self.query_goal.outer_tables.iter().copied());
    }

    /// Join conditions usable for lookups into this group.
    pub fn set_join_conditions(&mut self, conditions: Vec<Expr>) {
        self.join_conditions = conditions;
    }

    /// Whether anything beyond the query's own outer tables is bound.
    pub fn is_nested(&self) -> bool {
        self.bound
            .iter()
            .any(|t| !self.query_goal.outer_tables.contains(t))
    }

    /// Collect, per member table, the columns the rest of the query reads.
    pub fn update_required_columns(&mut self) {
        let tables: HashSet<NodeId> = self.members.iter().map(|(t, _)| *t).collect();
        let mut required: HashMap<NodeId, BTreeSet<String>> =
            tables.iter().map(|t| (*t, BTreeSet::new())).collect();
        let mut visited = HashSet::new();
        let mut stack = vec![self.query_goal.query];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            stack.extend(self.tree.children(node));
            if node == self.group {
                continue;
            }
            for expr in self.tree.expressions(node) {
                for column in expr.columns() {
                    if let Some(cols) = required.get_mut(&column.source) {
                        cols.insert(column.column.clone());
                    }
                }
                stack.extend(expr.subqueries());
            }
        }
        self.required = Some(required);
    }

    /// Find the cheapest scan: the group scan first, then every index of
    /// every member. Ties keep the earlier candidate.
    pub fn pick_best_scan(&self) -> PlanResult<ScanChoice> {
        let required = self.required.as_ref().ok_or_else(|| {
            PlanError::Internal(format!(
                "required columns not computed for group {}",
                self.group_name
            ))
        })?;
        let conditions = self.applicable_conditions();

        let scan = Scan::Group(GroupScan {
            group: self.group_name.clone(),
            conditions: conditions.clone(),
        });
        let cost = self.cost_estimate_scan(&scan)?;
        let mut best = ScanChoice { scan, cost };

        for (table, name) in &self.members {
            for index in self.catalog.indexes(name)? {
                let scan = Scan::Index(self.index_scan(*table, index, &conditions, required));
                let cost = self.cost_estimate_scan(&scan)?;
                trace!(group = %self.group_name, scan = %scan, cost = %cost, "scan candidate");
                if cost < best.cost {
                    best = ScanChoice { scan, cost };
                }
            }
        }
        debug!(
            group = %self.group_name,
            nested = self.is_nested(),
            scan = %best.scan,
            cost = %best.cost,
            "picked scan"
        );
        Ok(best)
    }

    /// Estimate for a scan, including the sort it leaves to be done.
    pub fn cost_estimate_scan(&self, scan: &Scan) -> PlanResult<CostEstimate> {
        let estimate = match scan {
            Scan::Group(group) => {
                let tables: Vec<String> = self.members.iter().map(|(_, n)| n.clone()).collect();
                self.estimator.estimate_full_scan(&FullScanRequest {
                    tables: &tables,
                    filters: FilterCounts::of(&group.conditions),
                })?
            }
            Scan::Index(index) => {
                let table = self.table_name(index.table)?;
                let others: Vec<String> = self
                    .members
                    .iter()
                    .filter(|(t, _)| *t != index.table)
                    .map(|(_, n)| n.clone())
                    .collect();
                self.estimator.estimate_index_scan(&IndexScanRequest {
                    table,
                    index: &index.index,
                    equality_columns: index.equalities.len(),
                    range_columns: usize::from(!index.range.is_empty()),
                    covering: index.covering,
                    other_tables: &others,
                    filters: FilterCounts::of(&index.conditions),
                })?
            }
        };
        if self.needs_sort(scan.ordering()) {
            let sort = self.estimator.estimate_sort(estimate.row_count)?;
            return Ok(estimate.sequence(&sort));
        }
        Ok(estimate)
    }

    fn table_name(&self, table: NodeId) -> PlanResult<&str> {
        self.members
            .iter()
            .find(|(t, _)| *t == table)
            .map(|(_, n)| n.as_str())
            .ok_or_else(|| {
                PlanError::Internal(format!(
                    "table {} is not in group {}",
                    table, self.group_name
                ))
            })
    }

    fn needs_sort(&self, delivered: ScanOrdering) -> bool {
        if self.is_nested() {
            return false;
        }
        if self.query_goal.ordering.is_some() {
            delivered != ScanOrdering::Sorted
        } else if self.query_goal.grouping.is_some()
            || self.query_goal.projection_distinct.is_some()
        {
            delivered == ScanOrdering::Unordered
        } else {
            false
        }
    }

    /// Where and join conditions that touch this group and can be
    /// evaluated with only the group and the bound sources.
    fn applicable_conditions(&self) -> Vec<Expr> {
        let tables: BTreeSet<NodeId> = self.members.iter().map(|(t, _)| *t).collect();
        let mut out: Vec<Expr> = Vec::new();
        for cond in self
            .query_goal
            .where_conditions
            .iter()
            .chain(&self.join_conditions)
        {
            if out.contains(cond) || !cond.subqueries().is_empty() {
                continue;
            }
            let sources = cond.sources();
            if sources.is_disjoint(&tables) {
                continue;
            }
            if sources
                .iter()
                .all(|s| tables.contains(s) || self.bound.contains(s))
            {
                out.push(cond.clone());
            }
        }
        out
    }

    fn index_scan(
        &self,
        table: NodeId,
        index: &IndexDef,
        conditions: &[Expr],
        required: &HashMap<NodeId, BTreeSet<String>>,
    ) -> IndexScan {
        let mut remaining = conditions.to_vec();

        let mut equalities = Vec::new();
        for key in &index.columns {
            let column = ColumnRef::new(table, key.column.clone());
            match remaining.iter().position(|c| self.is_key_equality(c, &column)) {
                Some(pos) => equalities.push(remaining.remove(pos)),
                None => break,
            }
        }

        let mut range = Vec::new();
        if let Some(key) = index.columns.get(equalities.len()) {
            let column = ColumnRef::new(table, key.column.clone());
            if let Some(pos) = remaining.iter().position(|c| self.is_key_range(c, &column)) {
                range.push(remaining.remove(pos));
            }
        }

        let (ordering, reverse) = if self.is_nested() {
            (ScanOrdering::Unordered, false)
        } else {
            self.delivered_ordering(table, index, equalities.len())
        };
        let covering = required
            .get(&table)
            .map_or(true, |cols| index.contains_all(cols));

        IndexScan {
            table,
            index: index.clone(),
            equalities,
            range,
            conditions: remaining,
            ordering,
            reverse,
            covering,
        }
    }

    fn is_key_equality(&self, cond: &Expr, column: &ColumnRef) -> bool {
        match cond.as_comparison() {
            Some((left, BinaryOperator::Eq, right)) => {
                (left.as_column() == Some(column) && right.is_bound_by(&self.bound))
                    || (right.as_column() == Some(column) && left.is_bound_by(&self.bound))
            }
            _ => false,
        }
    }

    fn is_key_range(&self, cond: &Expr, column: &ColumnRef) -> bool {
        match cond {
            Expr::Between {
                expr,
                low,
                high,
                negated: false,
            } => {
                expr.as_column() == Some(column)
                    && low.is_bound_by(&self.bound)
                    && high.is_bound_by(&self.bound)
            }
            _ => match cond.as_comparison() {
                Some((left, op, right)) if op.is_range() => {
                    (left.as_column() == Some(column) && right.is_bound_by(&self.bound))
                        || (right.as_column() == Some(column) && left.is_bound_by(&self.bound))
                }
                _ => false,
            },
        }
    }

    /// Ordering delivered by reading `index` with its first `equalities`
    /// key columns fixed.
    fn delivered_ordering(
        &self,
        table: NodeId,
        index: &IndexDef,
        equalities: usize,
    ) -> (ScanOrdering, bool) {
        let fixed: Vec<&str> = index.columns[..equalities]
            .iter()
            .map(|c| c.column.as_str())
            .collect();

        if let Some(ordering) = &self.query_goal.ordering {
            if let Some(reverse) = matches_ordering(table, index, &fixed, ordering) {
                return (ScanOrdering::Sorted, reverse);
            }
        }
        let grouping = self
            .query_goal
            .grouping
            .as_ref()
            .or(self.query_goal.projection_distinct.as_ref());
        if let Some(grouping) = grouping {
            if matches_grouping(table, index, &fixed, grouping) {
                return (ScanOrdering::Grouped, false);
            }
        }
        (ScanOrdering::Unordered, false)
    }
}

/// Whether the index delivers `ordering`, and if so whether backwards.
fn matches_ordering(
    table: NodeId,
    index: &IndexDef,
    fixed: &[&str],
    ordering: &[OrderByExpr],
) -> Option<bool> {
    let mut position = fixed.len();
    let mut reverse = None;
    for item in ordering {
        let column = item.expr.as_column()?;
        if column.source != table {
            return None;
        }
        if fixed.contains(&column.column.as_str()) {
            continue;
        }
        let key = index.columns.get(position)?;
        if key.column != column.column {
            return None;
        }
        let backwards = item.ascending != key.ascending;
        if reverse.is_some_and(|r| r != backwards) {
            return None;
        }
        reverse = Some(backwards);
        position += 1;
    }
    Some(reverse.unwrap_or(false))
}

/// Whether the grouping keys are, as a set, the index prefix after the
/// fixed columns.
fn matches_grouping(table: NodeId, index: &IndexDef, fixed: &[&str], grouping: &[Expr]) -> bool {
    let mut keys = BTreeSet::new();
    for expr in grouping {
        match expr.as_column() {
            Some(column) if column.source == table => {
                if !fixed.contains(&column.column.as_str()) {
                    keys.insert(column.column.as_str());
                }
            }
            _ => return false,
        }
    }
    let end = fixed.len() + keys.len();
    if end > index.columns.len() {
        return false;
    }
    let prefix: BTreeSet<&str> = index.columns[fixed.len()..end]
        .iter()
        .map(|c| c.column.as_str())
        .collect();
    prefix == keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, IndexColumn, TableBuilder};
    use crate::plan::ProjectField;
    use crate::planner::cost::StatsCostEstimator;
    use std::sync::Arc;

    fn catalog() -> Arc<CatalogSnapshot> {
        let catalog = Catalog::new();
        catalog
            .create_table(
                TableBuilder::new("t")
                    .columns(["id", "a", "b", "c"])
                    .rows(1000)
                    .unique_index("pk_t", ["id"])
                    .index("idx_t_a_b", ["a", "b"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        catalog
            .create_index(IndexDef::new("idx_t_c_desc", "t", ["c"]).with_columns(vec![
                IndexColumn::desc("c"),
            ]))
            .unwrap();
        catalog.snapshot()
    }

    struct Fixture {
        tree: PlanTree,
        group: NodeId,
        t: NodeId,
        goal: QueryIndexGoal,
    }

    /// `SELECT t.id FROM t WHERE <conditions> ORDER BY <order>`
    fn fixture(
        conditions: impl FnOnce(NodeId) -> Vec<Expr>,
        order: impl FnOnce(NodeId) -> Vec<OrderByExpr>,
    ) -> Fixture {
        fixture_selecting(&["id"], conditions, order)
    }

    fn fixture_selecting(
        columns: &[&str],
        conditions: impl FnOnce(NodeId) -> Vec<Expr>,
        order: impl FnOnce(NodeId) -> Vec<OrderByExpr>,
    ) -> Fixture {
        let mut tree = PlanTree::new();
        let (group, t) = tree.single_table_group("t");
        let mut top = tree.select(group, conditions(t));
        let order = order(t);
        if !order.is_empty() {
            top = tree.sort(top, order);
        }
        let fields = columns
            .iter()
            .map(|c| ProjectField::new(Expr::column(t, *c), *c))
            .collect();
        let project = tree.project(top, fields);
        let query = tree.query(project);
        let goal = QueryIndexGoal::determine(&tree, query, group);
        Fixture {
            tree,
            group,
            t,
            goal,
        }
    }

    fn pick(f: &Fixture, snapshot: &CatalogSnapshot, bound: BTreeSet<NodeId>) -> ScanChoice {
        let estimator = StatsCostEstimator::new(Arc::new(snapshot.clone()));
        let mut goal = GroupIndexGoal::new(&f.goal, &f.tree, snapshot, &estimator, f.group).unwrap();
        goal.set_bound_tables(bound);
        goal.update_required_columns();
        goal.pick_best_scan().unwrap()
    }

    fn index_name(choice: &ScanChoice) -> Option<&str> {
        choice.scan.index().map(|i| i.name.as_str())
    }

    #[test]
    fn test_unique_equality_wins() {
        let snapshot = catalog();
        let f = fixture(
            |t| vec![Expr::eq(Expr::column(t, "id"), Expr::int(7))],
            |_| Vec::new(),
        );
        let choice = pick(&f, &snapshot, BTreeSet::new());
        assert_eq!(index_name(&choice), Some("pk_t"));
        match &choice.scan {
            Scan::Index(scan) => {
                assert_eq!(scan.equalities.len(), 1);
                assert!(scan.conditions.is_empty());
            }
            other => panic!("expected index scan, got {}", other),
        }
    }

    #[test]
    fn test_no_conditions_prefers_group_scan() {
        let snapshot = catalog();
        let f = fixture_selecting(&["id", "c"], |_| Vec::new(), |_| Vec::new());
        let choice = pick(&f, &snapshot, BTreeSet::new());
        assert!(matches!(choice.scan, Scan::Group(_)));
        assert!((choice.cost.cost - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_covering_index_beats_group_scan() {
        let snapshot = catalog();
        let f = fixture(|_| Vec::new(), |_| Vec::new());
        let choice = pick(&f, &snapshot, BTreeSet::new());
        assert_eq!(index_name(&choice), Some("pk_t"));
        let expected = 1000f64.log2() + 1.0 + 500.0;
        assert!((choice.cost.cost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_scalar_aggregate_uses_group_scan() {
        let catalog = Catalog::new();
        catalog
            .create_table(
                TableBuilder::new("t")
                    .columns(["a", "b"])
                    .rows(1000)
                    .index("idx_t_a", ["a"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let snapshot = catalog.snapshot();

        // SELECT count(t.b) FROM t
        let mut tree = PlanTree::new();
        let (group, t) = tree.single_table_group("t");
        let agg = tree.add(NodeKind::AggregateSource {
            input: group,
            group_by: Vec::new(),
            aggregates: vec![ProjectField::new(
                Expr::Function {
                    name: "count".into(),
                    args: vec![Expr::column(t, "b")],
                },
                "n",
            )],
        });
        let query = tree.query(agg);
        let query_goal = QueryIndexGoal::determine(&tree, query, group);
        assert!(query_goal.grouping.is_none());

        let estimator = StatsCostEstimator::new(snapshot.clone());
        let mut goal =
            GroupIndexGoal::new(&query_goal, &tree, &snapshot, &estimator, group).unwrap();
        goal.update_required_columns();

        let group_scan = Scan::Group(GroupScan {
            group: "t".to_string(),
            conditions: Vec::new(),
        });
        let unsorted = goal.cost_estimate_scan(&group_scan).unwrap();
        assert!((unsorted.cost - 1000.0).abs() < 1e-9);

        let choice = goal.pick_best_scan().unwrap();
        assert!(matches!(choice.scan, Scan::Group(_)));
        assert!((choice.cost.cost - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_equality_then_range() {
        let snapshot = catalog();
        let f = fixture(
            |t| {
                vec![
                    Expr::binary(Expr::column(t, "b"), BinaryOperator::Gt, Expr::int(3)),
                    Expr::eq(Expr::int(1), Expr::column(t, "a")),
                    Expr::eq(Expr::column(t, "c"), Expr::int(2)),
                ]
            },
            |_| Vec::new(),
        );
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let mut goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        goal.update_required_columns();
        let conditions = goal.applicable_conditions();
        let required = goal.required.clone().unwrap();
        let index = snapshot.table("t").unwrap().index("idx_t_a_b").unwrap().clone();
        let scan = goal.index_scan(f.t, &index, &conditions, &required);
        assert_eq!(scan.equalities, vec![Expr::eq(Expr::int(1), Expr::column(f.t, "a"))]);
        assert_eq!(scan.range.len(), 1);
        assert_eq!(scan.conditions.len(), 1);
        assert!(!scan.covering);
    }

    #[test]
    fn test_join_condition_needs_bound_side() {
        let snapshot = catalog();
        let other = NodeId(100);
        let f = fixture(|_| Vec::new(), |_| Vec::new());
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let mut goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        goal.set_join_conditions(vec![Expr::eq(Expr::column(f.t, "id"), Expr::column(other, "x"))]);
        goal.update_required_columns();

        // Unbound: the condition is not even applicable.
        assert!(goal.applicable_conditions().is_empty());
        match goal.pick_best_scan().unwrap().scan {
            Scan::Index(scan) => assert!(scan.equalities.is_empty()),
            Scan::Group(scan) => assert!(scan.conditions.is_empty()),
        }

        goal.set_bound_tables(BTreeSet::from([other]));
        assert!(goal.is_nested());
        let choice = goal.pick_best_scan().unwrap();
        assert_eq!(index_name(&choice), Some("pk_t"));
    }

    #[test]
    fn test_ordering_skips_equality_columns() {
        let snapshot = catalog();
        let f = fixture(
            |t| vec![Expr::eq(Expr::column(t, "a"), Expr::int(1))],
            |t| {
                vec![
                    OrderByExpr::desc(Expr::column(t, "a")),
                    OrderByExpr::desc(Expr::column(t, "b")),
                ]
            },
        );
        let choice = pick(&f, &snapshot, BTreeSet::new());
        match &choice.scan {
            Scan::Index(scan) => {
                assert_eq!(scan.index.name, "idx_t_a_b");
                assert_eq!(scan.ordering, ScanOrdering::Sorted);
                assert!(scan.reverse);
            }
            other => panic!("expected index scan, got {}", other),
        }
    }

    #[test]
    fn test_descending_index_delivers_descending_order() {
        let snapshot = catalog();
        let f = fixture(|_| Vec::new(), |t| vec![OrderByExpr::desc(Expr::column(t, "c"))]);
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        let index = snapshot.table("t").unwrap().index("idx_t_c_desc").unwrap().clone();
        assert_eq!(goal.delivered_ordering(f.t, &index, 0), (ScanOrdering::Sorted, false));
        let index = snapshot.table("t").unwrap().index("idx_t_a_b").unwrap().clone();
        assert_eq!(goal.delivered_ordering(f.t, &index, 0), (ScanOrdering::Unordered, false));
    }

    #[test]
    fn test_mixed_directions_not_delivered() {
        let snapshot = catalog();
        let f = fixture(
            |_| Vec::new(),
            |t| {
                vec![
                    OrderByExpr::asc(Expr::column(t, "a")),
                    OrderByExpr::desc(Expr::column(t, "b")),
                ]
            },
        );
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        let index = snapshot.table("t").unwrap().index("idx_t_a_b").unwrap().clone();
        assert_eq!(goal.delivered_ordering(f.t, &index, 0), (ScanOrdering::Unordered, false));
    }

    #[test]
    fn test_nested_goal_ignores_ordering() {
        let snapshot = catalog();
        let f = fixture(|_| Vec::new(), |t| vec![OrderByExpr::asc(Expr::column(t, "a"))]);
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let mut goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        goal.update_required_columns();

        let unbound = goal.pick_best_scan().unwrap();
        // Sorting 1000 rows costs more than reading through the index.
        assert_eq!(unbound.scan.ordering(), ScanOrdering::Sorted);

        goal.set_bound_tables(BTreeSet::from([NodeId(100)]));
        let nested = goal.pick_best_scan().unwrap();
        assert_eq!(nested.scan.ordering(), ScanOrdering::Unordered);
        assert!(matches!(nested.scan, Scan::Group(_)));
    }

    #[test]
    fn test_sort_penalty_added_when_order_missing() {
        let snapshot = catalog();
        let f = fixture(|_| Vec::new(), |t| vec![OrderByExpr::asc(Expr::column(t, "id"))]);
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        let scan = Scan::Group(GroupScan {
            group: "t".into(),
            conditions: Vec::new(),
        });
        let cost = goal.cost_estimate_scan(&scan).unwrap();
        let sort = estimator.estimate_sort(1000.0).unwrap();
        assert!((cost.cost - (1000.0 + sort.cost)).abs() < 1e-9);
        assert!((cost.row_count - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_grouping_matches_index_prefix_as_set() {
        let mut tree = PlanTree::new();
        let (group, t) = tree.single_table_group("t");
        let agg = tree.add(NodeKind::AggregateSource {
            input: group,
            group_by: vec![
                ProjectField::new(Expr::column(t, "b"), "b"),
                ProjectField::new(Expr::column(t, "a"), "a"),
            ],
            aggregates: Vec::new(),
        });
        let query = tree.query(agg);
        let qgoal = QueryIndexGoal::determine(&tree, query, group);
        let snapshot = catalog();
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let goal = GroupIndexGoal::new(&qgoal, &tree, &snapshot, &estimator, group).unwrap();
        let index = snapshot.table("t").unwrap().index("idx_t_a_b").unwrap().clone();
        assert_eq!(goal.delivered_ordering(t, &index, 0), (ScanOrdering::Grouped, false));
        let pk = snapshot.table("t").unwrap().index("pk_t").unwrap().clone();
        assert_eq!(goal.delivered_ordering(t, &pk, 0), (ScanOrdering::Unordered, false));
    }

    #[test]
    fn test_covering_uses_required_columns() {
        let snapshot = catalog();
        let f = fixture(
            |t| vec![Expr::eq(Expr::column(t, "a"), Expr::int(1))],
            |_| Vec::new(),
        );
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let mut goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        goal.update_required_columns();
        let required = goal.required.clone().unwrap();
        assert_eq!(
            required[&f.t],
            BTreeSet::from(["a".to_string(), "id".to_string()])
        );
        let index = IndexDef::new("idx_t_a_id", "t", ["a", "id"]);
        let scan = goal.index_scan(f.t, &index, &goal.applicable_conditions(), &required);
        assert!(scan.covering);
    }

    #[test]
    fn test_pick_requires_required_columns() {
        let snapshot = catalog();
        let f = fixture(|_| Vec::new(), |_| Vec::new());
        let estimator = StatsCostEstimator::new(snapshot.clone());
        let goal = GroupIndexGoal::new(&f.goal, &f.tree, &snapshot, &estimator, f.group).unwrap();
        assert!(matches!(goal.pick_best_scan(), Err(PlanError::Internal(_))));
    }
}

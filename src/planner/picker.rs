//! Join regions, their pickers, and the rule that plans them.
//!
//! [`JoinsFinder`] walks a bound tree once, records the correlation set of
//! every subquery and finds each outermost joinable region. Every region
//! gets a [`Picker`]; regions inside derived tables are planned through the
//! picker of the enclosing region, once per outer context.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use tracing::{debug, warn};

use super::bitset::RelationSet;
use super::config::OptimizerConfig;
use super::cost::CostEstimator;
use super::dphyp::solve;
use super::enumerator::{values_plan, JoinEnumerator};
use super::error::{PlanError, PlanResult};
use super::goal::QueryIndexGoal;
use super::index_goal::GroupIndexGoal;
use super::join_graph::{JoinGraph, JoinOperator, OperatorOrigin};
use super::optimizer::{OptimizationRule, RulesContext};
use super::plan::{GroupPlan, Plan, SubqueryPlan};
use crate::catalog::CatalogSnapshot;
use crate::plan::{NodeId, NodeKind, PlanTree};

/// Plans one join region.
#[derive(Debug, Clone, PartialEq)]
pub struct Picker {
    /// `Query` or `Subquery` node owning the region.
    pub query: NodeId,
    /// Outermost joinable node of the region.
    pub region: NodeId,
    pub goal: QueryIndexGoal,
}

impl Picker {
    pub fn new(tree: &PlanTree, query: NodeId, region: NodeId) -> Self {
        Self {
            query,
            region,
            goal: QueryIndexGoal::determine(tree, query, region),
        }
    }

    /// Best plan for the region with `bound` fixed and `joins` pushed in
    /// from an enclosing context.
    pub fn plan<'a>(
        &'a self,
        ctx: &PlanningContext<'a>,
        bound: &BTreeSet<NodeId>,
        joins: &[JoinOperator],
        depth: usize,
    ) -> PlanResult<Rc<Plan>> {
        match ctx.tree.kind(self.region) {
            NodeKind::TableGroupJoinTree { .. } => {
                let mut goal = GroupIndexGoal::new(
                    &self.goal,
                    ctx.tree,
                    ctx.catalog,
                    ctx.estimator,
                    self.region,
                )?;
                goal.set_bound_tables(bound.clone());
                goal.set_join_conditions(
                    joins
                        .iter()
                        .flat_map(|op| op.conditions.iter().cloned())
                        .collect(),
                );
                goal.update_required_columns();
                let choice = goal.pick_best_scan()?;
                Ok(Rc::new(Plan::Group(GroupPlan {
                    group: self.region,
                    outer: RelationSet::empty(),
                    scan: choice.scan,
                    cost: choice.cost,
                })))
            }
            NodeKind::JoinNode { .. } => {
                let graph = JoinGraph::build(
                    ctx.tree,
                    self.region,
                    &self.goal.where_conditions,
                    self.goal.where_select,
                    ctx.config.max_join_relations,
                )?;
                let mut enumerator = JoinEnumerator::new(
                    ctx,
                    self,
                    &graph,
                    bound.clone(),
                    joins.to_vec(),
                    depth,
                );
                let mut memo = solve(&graph, &mut enumerator, ctx.config.enumeration_limit)?;
                debug!(region = %self.region, classes = memo.len(), "enumerated join orders");
                let root = memo.root_mut()?;
                enumerator.best_plan(graph.all(), root)
            }
            NodeKind::SubquerySource { .. } => {
                let picker = ctx.subpicker(self.region)?;
                let joins: Vec<&JoinOperator> = joins.iter().collect();
                ctx.subquery_plan(
                    self.region,
                    picker,
                    RelationSet::empty(),
                    bound.clone(),
                    &joins,
                    depth,
                )
            }
            NodeKind::ValuesSource { rows, .. } => {
                Ok(Rc::new(values_plan(self.region, rows.len())))
            }
            NodeKind::TableSource { table, .. } => Err(PlanError::Unsupported(format!(
                "table {} outside of a table group",
                table
            ))),
            other => Err(PlanError::Internal(format!(
                "region {} is not joinable: {:?}",
                self.region, other
            ))),
        }
    }

    /// Put a top-level plan in place of the region. A Sort made redundant
    /// by the chosen access order is removed.
    pub fn install(&self, tree: &mut PlanTree, plan: &Plan) -> PlanResult<NodeId> {
        let parent = tree
            .output(self.region)
            .ok_or_else(|| PlanError::Internal(format!("region {} is detached", self.region)))?;
        let node = plan.install(tree)?;
        if node != self.region && !tree.replace_input(parent, self.region, node) {
            return Err(PlanError::Internal(format!(
                "region {} not found under {}",
                self.region, parent
            )));
        }

        if self.goal.ordering_direct && plan.delivers_ordering() {
            if let Some(sort) = self.goal.ordering_sort {
                if tree.splice_out(sort) {
                    debug!(sort = %sort, "sort satisfied by access order");
                }
            }
        }
        debug!(region = %self.region, node = %node, cost = %plan.cost(), "installed region");
        Ok(node)
    }
}

/// Everything discovered about a query's join regions.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub pickers: Vec<Picker>,
    /// Pickers planned on their own, in discovery order.
    pub top_level: Vec<usize>,
    /// Pickers of derived tables, by `SubquerySource` node.
    pub subpickers: HashMap<NodeId, usize>,
}

/// Read-only state shared by every picker while one query is planned.
pub struct PlanningContext<'a> {
    pub tree: &'a PlanTree,
    pub catalog: &'a CatalogSnapshot,
    pub estimator: &'a dyn CostEstimator,
    pub config: &'a OptimizerConfig,
    pub pickers: &'a [Picker],
    pub subpickers: &'a HashMap<NodeId, usize>,
}

impl<'a> PlanningContext<'a> {
    pub fn new(
        tree: &'a PlanTree,
        catalog: &'a CatalogSnapshot,
        estimator: &'a dyn CostEstimator,
        config: &'a OptimizerConfig,
        discovery: &'a Discovery,
    ) -> Self {
        Self {
            tree,
            catalog,
            estimator,
            config,
            pickers: &discovery.pickers,
            subpickers: &discovery.subpickers,
        }
    }

    /// Picker registered for a derived table.
    pub fn subpicker(&self, source: NodeId) -> PlanResult<usize> {
        self.subpickers.get(&source).copied().ok_or_else(|| {
            PlanError::Internal(format!("no picker registered for derived table {}", source))
        })
    }

    /// Plan a derived table's region with `bound` fixed.
    ///
    /// Join conditions reaching the derived table are rewritten through its
    /// projection so they can drive lookups inside.
    pub fn subquery_plan(
        &self,
        source: NodeId,
        picker: usize,
        outer: RelationSet,
        bound: BTreeSet<NodeId>,
        joins: &[&JoinOperator],
        depth: usize,
    ) -> PlanResult<Rc<Plan>> {
        let depth = depth + 1;
        if depth > self.config.max_nesting_depth {
            return Err(PlanError::NestingTooDeep {
                depth,
                max: self.config.max_nesting_depth,
            });
        }
        let subpicker = self.pickers.get(picker).ok_or_else(|| {
            PlanError::Internal(format!("picker {} out of range for {}", picker, source))
        })?;

        let pushed: Vec<JoinOperator> = joins
            .iter()
            .map(|op| JoinOperator {
                origin: OperatorOrigin::Outer,
                join_type: op.join_type,
                conditions: op
                    .conditions
                    .iter()
                    .map(|cond| {
                        cond.map_columns(&|column| {
                            if column.source == source {
                                self.tree.resolve_derived_column(column).cloned()
                            } else {
                                None
                            }
                        })
                    })
                    .collect(),
                left: RelationSet::empty(),
                right: RelationSet::empty(),
                subtree_left: RelationSet::empty(),
                subtree_right: RelationSet::empty(),
                predicate_tables: RelationSet::empty(),
                tes: RelationSet::empty(),
            })
            .collect();

        let root = subpicker.plan(self, &bound, &pushed, depth)?;
        debug!(source = %source, outer = %outer, cost = %root.cost(), "planned derived table");
        Ok(Rc::new(Plan::Subquery(SubqueryPlan {
            source,
            region: subpicker.region,
            outer,
            cost: root.cost(),
            root,
        })))
    }
}

#[derive(Debug)]
struct SubqueryState {
    query: NodeId,
    referenced: BTreeSet<NodeId>,
    defined: BTreeSet<NodeId>,
}

/// Single pass over the tree that finds join regions.
#[derive(Debug, Default)]
pub struct JoinsFinder {
    scopes: Vec<SubqueryState>,
    outer_tables: Vec<(NodeId, BTreeSet<NodeId>)>,
    regions: Vec<(NodeId, NodeId)>,
}

impl JoinsFinder {
    /// Find every region and set each subquery's outer tables.
    pub fn find(tree: &mut PlanTree) -> PlanResult<Discovery> {
        let root = tree
            .root()
            .ok_or_else(|| PlanError::Internal("plan tree has no query".into()))?;
        let mut finder = JoinsFinder::default();
        finder.visit(tree, root, false)?;

        for (subquery, outer) in finder.outer_tables {
            if let NodeKind::Subquery { outer_tables, .. } = tree.kind_mut(subquery) {
                *outer_tables = outer;
            }
        }

        let mut discovery = Discovery::default();
        for (query, region) in finder.regions {
            let index = discovery.pickers.len();
            discovery.pickers.push(Picker::new(tree, query, region));
            let derived = match tree.kind(query) {
                NodeKind::Subquery { .. } => tree
                    .output(query)
                    .filter(|s| matches!(tree.kind(*s), NodeKind::SubquerySource { .. })),
                _ => None,
            };
            match derived {
                Some(source) => {
                    discovery.subpickers.insert(source, index);
                }
                None => discovery.top_level.push(index),
            }
        }
        Ok(discovery)
    }

    fn visit(&mut self, tree: &PlanTree, node: NodeId, in_region: bool) -> PlanResult<()> {
        let kind = tree.kind(node);
        let scope = matches!(kind, NodeKind::Query { .. } | NodeKind::Subquery { .. });
        if scope {
            self.scopes.push(SubqueryState {
                query: node,
                referenced: BTreeSet::new(),
                defined: BTreeSet::new(),
            });
        }
        let in_region = in_region && !scope;

        if tree.is_column_source(node) {
            let state = self.current()?;
            if !state.defined.insert(node) {
                if cfg!(debug_assertions) {
                    return Err(PlanError::Internal(format!(
                        "column source {} defined twice",
                        node
                    )));
                }
                warn!(source = %node, "column source defined twice");
            }
        }

        let mut nested = Vec::new();
        for expr in tree.expressions(node) {
            let sources = expr.sources();
            self.current()?.referenced.extend(sources);
            nested.extend(expr.subqueries());
        }
        for subquery in nested {
            self.visit(tree, subquery, false)?;
        }

        let joinable = tree.is_joinable(node);
        if joinable && !in_region && !matches!(kind, NodeKind::TableSource { .. }) {
            let query = self.current()?.query;
            self.regions.push((query, node));
        }
        for child in tree.children(node) {
            self.visit(tree, child, in_region || joinable)?;
        }

        if scope {
            let state = self
                .scopes
                .pop()
                .ok_or_else(|| PlanError::Internal("subquery scope underflow".into()))?;
            let outer: BTreeSet<NodeId> =
                state.referenced.difference(&state.defined).copied().collect();
            if let Some(parent) = self.scopes.last_mut() {
                parent.referenced.extend(outer.iter().copied());
            }
            if matches!(kind, NodeKind::Subquery { .. }) {
                self.outer_tables.push((node, outer));
            }
        }
        Ok(())
    }

    fn current(&mut self) -> PlanResult<&mut SubqueryState> {
        self.scopes
            .last_mut()
            .ok_or_else(|| PlanError::Internal("expression outside of any query".into()))
    }
}

/// Chooses join orders and access paths for every region of a query.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinAndIndexPicker;

impl OptimizationRule for JoinAndIndexPicker {
    fn name(&self) -> &str {
        "JoinAndIndexPicker"
    }

    fn apply(&self, ctx: &RulesContext<'_>, tree: &mut PlanTree) -> PlanResult<()> {
        let discovery = JoinsFinder::find(tree)?;
        debug!(
            regions = discovery.pickers.len(),
            top_level = discovery.top_level.len(),
            "found join regions"
        );
        for &index in &discovery.top_level {
            let picker = &discovery.pickers[index];
            let plan = {
                let planning =
                    PlanningContext::new(tree, ctx.catalog, ctx.estimator, ctx.config, &discovery);
                picker.plan(&planning, &BTreeSet::new(), &[], 0)?
            };
            picker.install(tree, &plan)?;
        }
        Ok(())
    }
}

//! Rule-driven optimizer over bound plan trees.
//!
//! The optimizer owns the shared collaborators and runs each rule in order
//! against a tree. Rules rewrite the tree in place and either finish or
//! abort the query with an error.

use std::sync::Arc;

use tracing::debug;

use super::config::OptimizerConfig;
use super::cost::{CostEstimator, StatsCostEstimator};
use super::error::PlanResult;
use super::picker::JoinAndIndexPicker;
use crate::catalog::{Catalog, CatalogSnapshot};
use crate::plan::PlanTree;

/// Read-only state handed to every rule.
pub struct RulesContext<'a> {
    pub catalog: &'a CatalogSnapshot,
    pub estimator: &'a dyn CostEstimator,
    pub config: &'a OptimizerConfig,
}

/// Optimization rule trait.
pub trait OptimizationRule: Send + Sync {
    /// Name of the rule.
    fn name(&self) -> &str;

    /// Rewrite the tree in place.
    fn apply(&self, ctx: &RulesContext<'_>, tree: &mut PlanTree) -> PlanResult<()>;
}

enum EstimatorSource {
    Fixed(Arc<dyn CostEstimator>),
    /// A [`StatsCostEstimator`] over each optimization's own snapshot.
    Stats,
}

/// The query optimizer.
pub struct Optimizer {
    catalog: Arc<Catalog>,
    estimator: EstimatorSource,
    config: OptimizerConfig,
    rules: Vec<Box<dyn OptimizationRule>>,
}

impl Optimizer {
    /// Create an optimizer running the join and index picker.
    ///
    /// `estimator` is used as given for every query. If it reads catalog
    /// statistics it must read them from `catalog`, and it keeps whatever
    /// view it was built with; use [`Optimizer::with_stats`] to cost each
    /// query against the snapshot it is planned with.
    pub fn new(
        catalog: Arc<Catalog>,
        estimator: Arc<dyn CostEstimator>,
        config: OptimizerConfig,
    ) -> PlanResult<Self> {
        Self::build(catalog, EstimatorSource::Fixed(estimator), config)
    }

    /// Create an optimizer costing every query with a [`StatsCostEstimator`]
    /// over the same catalog snapshot the query is planned against.
    pub fn with_stats(catalog: Arc<Catalog>, config: OptimizerConfig) -> PlanResult<Self> {
        Self::build(catalog, EstimatorSource::Stats, config)
    }

    fn build(
        catalog: Arc<Catalog>,
        estimator: EstimatorSource,
        config: OptimizerConfig,
    ) -> PlanResult<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            estimator,
            config,
            rules: vec![Box::new(JoinAndIndexPicker)],
        })
    }

    /// Add a custom optimization rule, run after the existing ones.
    pub fn add_rule(&mut self, rule: Box<dyn OptimizationRule>) {
        self.rules.push(rule);
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimize a bound tree against the current catalog snapshot.
    pub fn optimize(&self, tree: &mut PlanTree) -> PlanResult<()> {
        let snapshot = self.catalog.snapshot();
        let stats;
        let estimator: &dyn CostEstimator = match &self.estimator {
            EstimatorSource::Fixed(estimator) => estimator.as_ref(),
            EstimatorSource::Stats => {
                stats = StatsCostEstimator::new(snapshot.clone());
                &stats
            }
        };
        let ctx = RulesContext {
            catalog: &snapshot,
            estimator,
            config: &self.config,
        };
        for rule in &self.rules {
            debug!(rule = rule.name(), "applying rule");
            rule.apply(&ctx, tree)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableBuilder;
    use crate::plan::{Expr, JoinType, NodeKind, ProjectField};
    use crate::planner::config::ConfigError;
    use crate::planner::error::PlanError;
    use parking_lot::Mutex;

    fn catalog() -> Arc<Catalog> {
        let catalog = Catalog::new();
        catalog
            .create_table(
                TableBuilder::new("orders")
                    .columns(["id", "customer_id"])
                    .rows(10_000)
                    .index("idx_orders_customer", ["customer_id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        catalog
            .create_table(
                TableBuilder::new("customers")
                    .columns(["id", "name"])
                    .rows(100)
                    .unique_index("pk_customers", ["id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Arc::new(catalog)
    }

    fn optimizer(catalog: Arc<Catalog>) -> Optimizer {
        let estimator = Arc::new(StatsCostEstimator::new(catalog.snapshot()));
        Optimizer::new(catalog, estimator, OptimizerConfig::default()).unwrap()
    }

    /// `SELECT orders.id, customers.name
    ///  FROM orders JOIN customers ON orders.customer_id = customers.id`
    fn orders_query() -> (PlanTree, crate::plan::NodeId) {
        let mut tree = PlanTree::new();
        let (go, o) = tree.single_table_group("orders");
        let (gc, c) = tree.single_table_group("customers");
        let join = tree.join(
            go,
            gc,
            JoinType::Inner,
            vec![Expr::eq(Expr::column(o, "customer_id"), Expr::column(c, "id"))],
        );
        let project = tree.project(
            join,
            vec![
                ProjectField::new(Expr::column(o, "id"), "id"),
                ProjectField::new(Expr::column(c, "name"), "name"),
            ],
        );
        tree.query(project);
        (tree, join)
    }

    fn outer_group(tree: &PlanTree, join: crate::plan::NodeId) -> String {
        match tree.kind(join) {
            NodeKind::JoinNode { left, .. } => match tree.kind(*left) {
                NodeKind::TableJoins { group, .. } => group.clone(),
                other => panic!("expected table joins, got {:?}", other),
            },
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let catalog = catalog();
        let estimator = Arc::new(StatsCostEstimator::new(catalog.snapshot()));
        let config = OptimizerConfig::default().with_max_nesting_depth(0);
        let result = Optimizer::new(catalog, estimator, config);
        assert!(matches!(
            result,
            Err(PlanError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_optimize_orders_join() {
        let optimizer = optimizer(catalog());
        let (mut tree, join) = orders_query();
        optimizer.optimize(&mut tree).unwrap();
        // A unique lookup per order beats a wide index range per customer.
        assert_eq!(outer_group(&tree, join), "orders");
    }

    #[test]
    fn test_with_stats_follows_row_count_changes() {
        let catalog = catalog();
        let optimizer =
            Optimizer::with_stats(catalog.clone(), OptimizerConfig::default()).unwrap();

        let (mut tree, join) = orders_query();
        optimizer.optimize(&mut tree).unwrap();
        assert_eq!(outer_group(&tree, join), "orders");

        // One customer: scanning it once and probing orders by customer wins.
        catalog.update_row_count("customers", 1).unwrap();
        let (mut tree, join) = orders_query();
        optimizer.optimize(&mut tree).unwrap();
        assert_eq!(outer_group(&tree, join), "customers");
    }

    #[test]
    fn test_with_stats_rejects_invalid_config() {
        let config = OptimizerConfig::default().with_max_nesting_depth(0);
        assert!(matches!(
            Optimizer::with_stats(catalog(), config),
            Err(PlanError::Config(ConfigError::Invalid(_)))
        ));
    }

    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl OptimizationRule for Recording {
        fn name(&self) -> &str {
            "Recording"
        }

        fn apply(&self, _ctx: &RulesContext<'_>, tree: &mut PlanTree) -> PlanResult<()> {
            self.seen.lock().push(tree.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_custom_rule_runs_after_picker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut optimizer = optimizer(catalog());
        optimizer.add_rule(Box::new(Recording { seen: seen.clone() }));

        let (mut tree, _) = orders_query();
        optimizer.optimize(&mut tree).unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("TableJoins"));
    }

    #[test]
    fn test_unknown_table_fails_query() {
        let optimizer = optimizer(catalog());
        let mut tree = PlanTree::new();
        let (group, _) = tree.single_table_group("missing");
        tree.query(group);
        assert!(optimizer.optimize(&mut tree).is_err());
    }

    #[test]
    fn test_concurrent_optimize() {
        let optimizer = optimizer(catalog());
        let results: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let (mut tree, join) = orders_query();
                        optimizer.optimize(&mut tree).unwrap();
                        outer_group(&tree, join)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|g| g == "orders"));
    }
}

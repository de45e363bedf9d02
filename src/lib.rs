//! joinpick - cost-based join ordering and index selection
//!
//! This crate rewrites a bound relational plan tree: every join region is
//! reordered with DPhyp enumeration, each table group gets its cheapest
//! access path, and correlated subqueries are planned once per outer context.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use joinpick::catalog::{Catalog, TableBuilder};
//! use joinpick::plan::{Expr, JoinType, PlanTree};
//! use joinpick::planner::{Optimizer, OptimizerConfig, StatsCostEstimator};
//!
//! let catalog = Arc::new(Catalog::new());
//! catalog
//!     .create_table(TableBuilder::new("users").columns(["id"]).rows(100).build().unwrap())
//!     .unwrap();
//! catalog
//!     .create_table(
//!         TableBuilder::new("posts")
//!             .columns(["id", "user_id"])
//!             .rows(10_000)
//!             .index("idx_posts_user", ["user_id"])
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let mut tree = PlanTree::new();
//! let (users, u) = tree.single_table_group("users");
//! let (posts, p) = tree.single_table_group("posts");
//! let join = tree.join(
//!     users,
//!     posts,
//!     JoinType::Inner,
//!     vec![Expr::eq(Expr::column(u, "id"), Expr::column(p, "user_id"))],
//! );
//! tree.query(join);
//!
//! let estimator = Arc::new(StatsCostEstimator::new(catalog.snapshot()));
//! let optimizer = Optimizer::new(catalog, estimator, OptimizerConfig::default()).unwrap();
//! optimizer.optimize(&mut tree).unwrap();
//! println!("{}", tree);
//! ```

pub mod catalog;
pub mod plan;
pub mod planner;

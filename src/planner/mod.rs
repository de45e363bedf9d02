//! Join ordering and access-path selection.
//!
//! [`JoinAndIndexPicker`] finds every join region of a bound tree, orders
//! multi-relation regions with DPhyp enumeration, picks a scan for each
//! table group and installs the cheapest plan back into the tree.

pub mod bitset;
pub mod config;
pub mod cost;
pub mod dphyp;
pub mod enumerator;
mod error;
pub mod goal;
pub mod index_goal;
pub mod join_graph;
pub mod optimizer;
pub mod picker;
pub mod plan;

pub use bitset::RelationSet;
pub use config::{ConfigError, OptimizerConfig};
pub use cost::{CostError, CostEstimate, CostEstimator, StatsCostEstimator};
pub use error::{PlanError, PlanResult};
pub use optimizer::{OptimizationRule, Optimizer, RulesContext};
pub use picker::{JoinAndIndexPicker, JoinsFinder, Picker};

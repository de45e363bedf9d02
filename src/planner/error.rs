//! Planning errors.

use thiserror::Error;

use super::config::ConfigError;
use super::cost::CostError;
use crate::catalog::CatalogError;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Query planning errors.
///
/// Any error aborts optimization of the whole query; no region is left
/// half-installed with an arbitrary join order.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("cost estimation failed: {0}")]
    Cost(#[from] CostError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unsupported query: {0}")]
    Unsupported(String),

    #[error("too many relations in join: {count} (max {max})")]
    TooManyRelations { count: usize, max: usize },

    #[error("subqueries nested too deeply: {depth} (max {max})")]
    NestingTooDeep { depth: usize, max: usize },

    #[error("join enumeration exceeded {limit} candidate pairs")]
    EnumerationLimit { limit: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

//! Cost estimates and the cost model interface.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::catalog::{CatalogSnapshot, IndexDef};
use crate::plan::{BinaryOperator, Expr};

/// Cost model constants.
pub mod constants {
    /// Cost per row for a sequential group scan.
    pub const SEQ_SCAN_PER_ROW: f64 = 1.0;
    /// Cost per index level visited to position a scan.
    pub const INDEX_PROBE_PER_LEVEL: f64 = 1.0;
    /// Cost per index entry read.
    pub const INDEX_ROW: f64 = 0.5;
    /// Cost per row fetched from a table (non-covering index, group fan-out).
    pub const ROW_FETCH: f64 = 1.5;
    /// Sort cost factor, applied as `n log2 n`.
    pub const SORT_PER_ROW: f64 = 0.5;
    /// Cost per literal row in a values list.
    pub const VALUES_PER_ROW: f64 = 0.1;
    /// Fraction of rows kept by an equality condition.
    pub const EQUALITY_SELECTIVITY: f64 = 0.1;
    /// Fraction of rows kept by a range condition.
    pub const RANGE_SELECTIVITY: f64 = 0.33;
    /// Fraction of rows kept by any other condition.
    pub const OTHER_SELECTIVITY: f64 = 0.5;
}

use constants::*;

/// Estimated cost and output cardinality of a plan fragment.
///
/// Estimates are totally ordered by cost, then row count.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    pub cost: f64,
    pub row_count: f64,
}

impl CostEstimate {
    pub fn new(cost: f64, row_count: f64) -> Self {
        Self { cost, row_count }
    }

    /// Estimate for running `inner` once per row of `self`.
    pub fn nest(&self, inner: &CostEstimate) -> CostEstimate {
        CostEstimate {
            cost: self.cost + self.row_count * inner.cost,
            row_count: self.row_count * inner.row_count,
        }
    }

    /// Estimate for `next` consuming the output of `self`.
    pub fn sequence(&self, next: &CostEstimate) -> CostEstimate {
        CostEstimate {
            cost: self.cost + next.cost,
            row_count: next.row_count,
        }
    }
}

impl PartialEq for CostEstimate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CostEstimate {}

impl PartialOrd for CostEstimate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CostEstimate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.row_count.total_cmp(&other.row_count))
    }
}

impl fmt::Display for CostEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cost={:.2} rows={:.2}", self.cost, self.row_count)
    }
}

/// Cost model errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CostError {
    #[error("no statistics for table: {0}")]
    UnknownTable(String),

    #[error("invalid estimate: {0}")]
    InvalidEstimate(String),
}

/// Kinds of filter conditions applied on top of an access path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCounts {
    pub equalities: usize,
    pub ranges: usize,
    pub others: usize,
}

impl FilterCounts {
    pub fn of<'a>(conditions: impl IntoIterator<Item = &'a Expr>) -> Self {
        let mut counts = Self::default();
        for cond in conditions {
            match cond {
                Expr::BinaryOp {
                    op: BinaryOperator::Eq,
                    ..
                } => counts.equalities += 1,
                Expr::BinaryOp { op, .. } if op.is_range() => counts.ranges += 1,
                Expr::Between { negated: false, .. } => counts.ranges += 1,
                _ => counts.others += 1,
            }
        }
        counts
    }

    /// Combined fraction of rows kept.
    pub fn selectivity(&self) -> f64 {
        EQUALITY_SELECTIVITY.powi(self.equalities as i32)
            * RANGE_SELECTIVITY.powi(self.ranges as i32)
            * OTHER_SELECTIVITY.powi(self.others as i32)
    }
}

/// A scan of every table in a group.
#[derive(Debug, Clone)]
pub struct FullScanRequest<'a> {
    pub tables: &'a [String],
    pub filters: FilterCounts,
}

/// A scan through one index.
#[derive(Debug, Clone)]
pub struct IndexScanRequest<'a> {
    pub table: &'a str,
    pub index: &'a IndexDef,
    /// Leading key columns fixed by equality.
    pub equality_columns: usize,
    /// Key columns bounded by a range after the equalities (0 or 1).
    pub range_columns: usize,
    pub covering: bool,
    /// Other tables of the group joined to each selected row.
    pub other_tables: &'a [String],
    pub filters: FilterCounts,
}

/// The cost model consumed by the optimizer.
///
/// Implementations must be deterministic for a fixed catalog snapshot and
/// safe to share between concurrently planned queries.
pub trait CostEstimator: Send + Sync {
    fn estimate_full_scan(&self, request: &FullScanRequest<'_>) -> Result<CostEstimate, CostError>;

    fn estimate_index_scan(
        &self,
        request: &IndexScanRequest<'_>,
    ) -> Result<CostEstimate, CostError>;

    /// Extra cost of sorting `rows` rows.
    fn estimate_sort(&self, rows: f64) -> Result<CostEstimate, CostError>;
}

/// Estimator driven by catalog row counts.
///
/// - Full scan: `sum(rows)`
/// - Index scan: `log2(rows) + 1 + selected * 0.5`, plus `selected * 1.5`
///   when not covering, plus group fan-out fetches
/// - Sort: `0.5 * n * log2(n)`
#[derive(Debug, Clone)]
pub struct StatsCostEstimator {
    catalog: Arc<CatalogSnapshot>,
}

impl StatsCostEstimator {
    pub fn new(catalog: Arc<CatalogSnapshot>) -> Self {
        Self { catalog }
    }

    fn rows(&self, table: &str) -> Result<f64, CostError> {
        self.catalog
            .row_count(table)
            .map(|r| r as f64)
            .map_err(|_| CostError::UnknownTable(table.to_string()))
    }
}

impl CostEstimator for StatsCostEstimator {
    fn estimate_full_scan(&self, request: &FullScanRequest<'_>) -> Result<CostEstimate, CostError> {
        if request.tables.is_empty() {
            return Err(CostError::InvalidEstimate("group scan with no tables".into()));
        }
        let mut cost = 0.0;
        let mut widest: f64 = 0.0;
        for table in request.tables {
            let rows = self.rows(table)?;
            cost += rows * SEQ_SCAN_PER_ROW;
            widest = widest.max(rows);
        }
        Ok(CostEstimate::new(
            cost,
            widest * request.filters.selectivity(),
        ))
    }

    fn estimate_index_scan(
        &self,
        request: &IndexScanRequest<'_>,
    ) -> Result<CostEstimate, CostError> {
        let rows = self.rows(request.table)?;
        let full_key =
            request.index.unique && request.equality_columns >= request.index.columns.len();
        let selected = if full_key {
            rows.min(1.0)
        } else {
            rows * EQUALITY_SELECTIVITY.powi(request.equality_columns as i32)
                * RANGE_SELECTIVITY.powi(request.range_columns as i32)
        };

        let mut cost = INDEX_PROBE_PER_LEVEL * (rows.max(1.0).log2() + 1.0)
            + selected * INDEX_ROW;
        if !request.covering {
            cost += selected * ROW_FETCH;
        }

        let mut fan_out: f64 = 1.0;
        for other in request.other_tables {
            let ratio = (self.rows(other)? / rows.max(1.0)).max(1.0);
            cost += selected * ratio * ROW_FETCH;
            fan_out = fan_out.max(ratio);
        }

        Ok(CostEstimate::new(
            cost,
            selected * fan_out * request.filters.selectivity(),
        ))
    }

    fn estimate_sort(&self, rows: f64) -> Result<CostEstimate, CostError> {
        if !rows.is_finite() || rows < 0.0 {
            return Err(CostError::InvalidEstimate(format!("sort of {} rows", rows)));
        }
        Ok(CostEstimate::new(
            SORT_PER_ROW * rows * rows.max(2.0).log2(),
            rows,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TableBuilder};

    fn estimator() -> StatsCostEstimator {
        let catalog = Catalog::new();
        catalog
            .create_table(
                TableBuilder::new("t")
                    .columns(["id", "k"])
                    .rows(1024)
                    .unique_index("pk_t", ["id"])
                    .index("idx_t_k", ["k"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        StatsCostEstimator::new(catalog.snapshot())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_nest() {
        let outer = CostEstimate::new(10.0, 4.0);
        let inner = CostEstimate::new(3.0, 2.0);
        let nested = outer.nest(&inner);
        assert!(approx(nested.cost, 22.0));
        assert!(approx(nested.row_count, 8.0));
    }

    #[test]
    fn test_sequence() {
        let scan = CostEstimate::new(10.0, 4.0);
        let sort = CostEstimate::new(5.0, 4.0);
        let both = scan.sequence(&sort);
        assert!(approx(both.cost, 15.0));
        assert!(approx(both.row_count, 4.0));
    }

    #[test]
    fn test_ordering_by_cost_then_rows() {
        let a = CostEstimate::new(1.0, 100.0);
        let b = CostEstimate::new(2.0, 1.0);
        let c = CostEstimate::new(1.0, 50.0);
        assert!(a < b);
        assert!(c < a);
        assert_eq!(a, CostEstimate::new(1.0, 100.0));
    }

    #[test]
    fn test_full_scan() {
        let est = estimator()
            .estimate_full_scan(&FullScanRequest {
                tables: &["t".to_string()],
                filters: FilterCounts {
                    equalities: 1,
                    ..Default::default()
                },
            })
            .unwrap();
        assert!(approx(est.cost, 1024.0));
        assert!(approx(est.row_count, 102.4));
    }

    #[test]
    fn test_unique_lookup_selects_one_row() {
        let est = estimator();
        let snapshot_index = IndexDef::new("pk_t", "t", ["id"]).unique();
        let lookup = est
            .estimate_index_scan(&IndexScanRequest {
                table: "t",
                index: &snapshot_index,
                equality_columns: 1,
                range_columns: 0,
                covering: false,
                other_tables: &[],
                filters: FilterCounts::default(),
            })
            .unwrap();
        // log2(1024) + 1 + 0.5 + 1.5
        assert!(approx(lookup.cost, 13.0));
        assert!(approx(lookup.row_count, 1.0));
    }

    #[test]
    fn test_equality_lookup() {
        let est = estimator();
        let index = IndexDef::new("idx_t_k", "t", ["k"]);
        let lookup = est
            .estimate_index_scan(&IndexScanRequest {
                table: "t",
                index: &index,
                equality_columns: 1,
                range_columns: 0,
                covering: true,
                other_tables: &[],
                filters: FilterCounts::default(),
            })
            .unwrap();
        assert!(approx(lookup.cost, 11.0 + 102.4 * 0.5));
        assert!(approx(lookup.row_count, 102.4));
    }

    #[test]
    fn test_unknown_table() {
        let result = estimator().estimate_full_scan(&FullScanRequest {
            tables: &["missing".to_string()],
            filters: FilterCounts::default(),
        });
        assert!(matches!(result, Err(CostError::UnknownTable(_))));
    }

    #[test]
    fn test_sort() {
        let sort = estimator().estimate_sort(8.0).unwrap();
        assert!(approx(sort.cost, 12.0));
        assert!(estimator().estimate_sort(f64::NAN).is_err());
    }

    #[test]
    fn test_filter_counts() {
        let col = Expr::column(crate::plan::NodeId(0), "k");
        let conds = [
            Expr::eq(col.clone(), Expr::int(1)),
            Expr::binary(col.clone(), BinaryOperator::Lt, Expr::int(5)),
            Expr::IsNull {
                expr: Box::new(col),
                negated: false,
            },
        ];
        let counts = FilterCounts::of(&conds);
        assert_eq!(
            counts,
            FilterCounts {
                equalities: 1,
                ranges: 1,
                others: 1
            }
        );
        assert!(approx(counts.selectivity(), 0.1 * 0.33 * 0.5));
    }
}

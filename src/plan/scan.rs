//! Access paths chosen for table groups.

use std::fmt;

use super::expr::Expr;
use super::tree::NodeId;
use crate::catalog::IndexDef;

/// What order, if any, an access path delivers its rows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrdering {
    Unordered,
    /// Matches the query's ORDER BY.
    Sorted,
    /// Rows with equal grouping keys arrive together.
    Grouped,
}

/// Full scan of every table in a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupScan {
    pub group: String,
    /// Conditions evaluated against each row.
    pub conditions: Vec<Expr>,
}

/// Scan of one index, joined out to the rest of its group.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexScan {
    /// Table source the index belongs to.
    pub table: NodeId,
    pub index: IndexDef,
    /// Equality conditions on the leading key columns, in key order.
    pub equalities: Vec<Expr>,
    /// Range conditions on the key column after the equalities.
    pub range: Vec<Expr>,
    /// Applicable conditions not used for the key.
    pub conditions: Vec<Expr>,
    pub ordering: ScanOrdering,
    /// Whether the index is read backwards to produce the ordering.
    pub reverse: bool,
    /// Whether the index holds every required column of its table.
    pub covering: bool,
}

/// A chosen access path.
#[derive(Debug, Clone, PartialEq)]
pub enum Scan {
    Group(GroupScan),
    Index(IndexScan),
}

impl Scan {
    /// Order the scan produces.
    pub fn ordering(&self) -> ScanOrdering {
        match self {
            Scan::Group(_) => ScanOrdering::Unordered,
            Scan::Index(index) => index.ordering,
        }
    }

    /// The index, for index scans.
    pub fn index(&self) -> Option<&IndexDef> {
        match self {
            Scan::Group(_) => None,
            Scan::Index(index) => Some(&index.index),
        }
    }

    /// Every condition the scan applies, key or filter.
    pub fn conditions(&self) -> Vec<&Expr> {
        match self {
            Scan::Group(group) => group.conditions.iter().collect(),
            Scan::Index(index) => index
                .equalities
                .iter()
                .chain(&index.range)
                .chain(&index.conditions)
                .collect(),
        }
    }
}

impl fmt::Display for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scan::Group(group) => {
                write!(f, "GroupScan({})", group.group)?;
                if !group.conditions.is_empty() {
                    let conds: Vec<String> =
                        group.conditions.iter().map(|c| c.to_string()).collect();
                    write!(f, " WHERE {}", conds.join(" AND "))?;
                }
                Ok(())
            }
            Scan::Index(index) => {
                write!(f, "IndexScan({}", index.index.name)?;
                for eq in &index.equalities {
                    write!(f, ", {}", eq)?;
                }
                for range in &index.range {
                    write!(f, ", {}", range)?;
                }
                if index.reverse {
                    write!(f, ", REVERSE")?;
                }
                if index.covering {
                    write!(f, ", covering")?;
                }
                write!(f, ")")
            }
        }
    }
}

//! Index definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One column of an index key, in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl IndexColumn {
    /// Ascending key column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    /// Descending key column.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// A secondary or primary index on a single table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<IndexColumn>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Create an index over ascending columns.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(IndexColumn::asc).collect(),
            unique: false,
        }
    }

    /// Mark the index as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Replace the key columns, keeping explicit directions.
    pub fn with_columns(mut self, columns: Vec<IndexColumn>) -> Self {
        self.columns = columns;
        self
    }

    /// Position of a column within the key, if present.
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.column == column)
    }

    /// Whether every given column is part of the key.
    pub fn contains_all<'a>(&self, columns: impl IntoIterator<Item = &'a String>) -> bool {
        columns.into_iter().all(|c| self.position(c).is_some())
    }
}

impl fmt::Display for IndexDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.ascending {
                    c.column.clone()
                } else {
                    format!("{} DESC", c.column)
                }
            })
            .collect();
        write!(f, "{}({})", self.name, cols.join(", "))?;
        if self.unique {
            write!(f, " UNIQUE")?;
        }
        Ok(())
    }
}

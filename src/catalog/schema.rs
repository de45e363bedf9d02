//! Table and group definitions with validation.

use serde::{Deserialize, Serialize};

use super::types::IndexDef;

/// A table's schema and statistics as seen by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Group the table is physically stored in.
    pub group: String,
    /// Parent table within the group, if any.
    #[serde(default)]
    pub parent: Option<String>,
    /// Column names in declaration order.
    pub columns: Vec<String>,
    /// Estimated number of rows.
    #[serde(default)]
    pub row_count: u64,
    /// Indexes defined on this table.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// Create a root table that forms its own group.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        let name = name.into();
        Self {
            group: name.clone(),
            name,
            parent: None,
            columns,
            row_count: 0,
            indexes: Vec::new(),
        }
    }

    /// Check that a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Validate columns and index definitions.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.as_str()) {
                return Err(CatalogError::DuplicateColumn(col.clone()));
            }
        }

        let mut index_names = std::collections::HashSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.name.as_str()) {
                return Err(CatalogError::DuplicateIndex(index.name.clone()));
            }
            if index.table != self.name {
                return Err(CatalogError::InvalidIndex {
                    index: index.name.clone(),
                    reason: format!("belongs to {}, not {}", index.table, self.name),
                });
            }
            if index.columns.is_empty() {
                return Err(CatalogError::InvalidIndex {
                    index: index.name.clone(),
                    reason: "no key columns".into(),
                });
            }
            for key in &index.columns {
                if !self.has_column(&key.column) {
                    return Err(CatalogError::InvalidIndex {
                        index: index.name.clone(),
                        reason: format!("unknown column {}", key.column),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A group of tables stored together, rooted at one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDef {
    pub name: String,
    pub root: String,
    /// Member tables, root first, in registration order.
    pub tables: Vec<String>,
}

/// Catalog errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("duplicate index: {0}")]
    DuplicateIndex(String),

    #[error("invalid index {index}: {reason}")]
    InvalidIndex { index: String, reason: String },

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid parent for {table}: {reason}")]
    InvalidParent { table: String, reason: String },

    #[error("failed to load catalog: {0}")]
    Load(String),
}

/// Builder for table definitions.
pub struct TableBuilder {
    name: String,
    group: Option<String>,
    parent: Option<String>,
    columns: Vec<String>,
    row_count: u64,
    indexes: Vec<IndexDef>,
}

impl TableBuilder {
    /// Start building a new table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            parent: None,
            columns: Vec::new(),
            row_count: 0,
            indexes: Vec::new(),
        }
    }

    /// Add columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Set the estimated row count.
    pub fn rows(mut self, rows: u64) -> Self {
        self.row_count = rows;
        self
    }

    /// Place the table in a group under the given parent.
    pub fn child_of(mut self, group: impl Into<String>, parent: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self.parent = Some(parent.into());
        self
    }

    /// Add a non-unique index over the given columns.
    pub fn index<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = IndexDef::new(name, self.name.clone(), columns);
        self.indexes.push(index);
        self
    }

    /// Add a unique index over the given columns.
    pub fn unique_index<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = IndexDef::new(name, self.name.clone(), columns).unique();
        self.indexes.push(index);
        self
    }

    /// Build the table definition.
    pub fn build(self) -> Result<TableDef, CatalogError> {
        let table = TableDef {
            group: self.group.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            parent: self.parent,
            columns: self.columns,
            row_count: self.row_count,
            indexes: self.indexes,
        };
        table.validate()?;
        Ok(table)
    }
}

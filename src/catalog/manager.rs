//! Catalog manager publishing immutable snapshots.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::schema::{CatalogError, GroupDef, TableDef};
use super::types::IndexDef;

/// Point-in-time view of the catalog. Cheap to clone through `Arc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    tables: BTreeMap<String, TableDef>,
    groups: BTreeMap<String, GroupDef>,
}

impl CatalogSnapshot {
    /// Get a table definition.
    pub fn table(&self, name: &str) -> Result<&TableDef, CatalogError> {
        self.tables
            .get(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    /// Get a group definition.
    pub fn group(&self, name: &str) -> Option<&GroupDef> {
        self.groups.get(name)
    }

    /// Indexes on a table, in definition order.
    pub fn indexes(&self, table: &str) -> Result<&[IndexDef], CatalogError> {
        Ok(&self.table(table)?.indexes)
    }

    /// Estimated row count of a table.
    pub fn row_count(&self, table: &str) -> Result<u64, CatalogError> {
        Ok(self.table(table)?.row_count)
    }

    /// All table names, sorted.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn insert_table(&mut self, table: TableDef) -> Result<(), CatalogError> {
        table.validate()?;
        if self.tables.contains_key(&table.name) {
            return Err(CatalogError::TableExists(table.name.clone()));
        }

        match &table.parent {
            Some(parent) => {
                let parent_def = self
                    .tables
                    .get(parent)
                    .ok_or_else(|| CatalogError::InvalidParent {
                        table: table.name.clone(),
                        reason: format!("parent {} not found", parent),
                    })?;
                if parent_def.group != table.group {
                    return Err(CatalogError::InvalidParent {
                        table: table.name.clone(),
                        reason: format!(
                            "parent {} is in group {}, not {}",
                            parent, parent_def.group, table.group
                        ),
                    });
                }
                if let Some(group) = self.groups.get_mut(&table.group) {
                    group.tables.push(table.name.clone());
                }
            }
            None => {
                if self.groups.contains_key(&table.group) {
                    return Err(CatalogError::InvalidParent {
                        table: table.name.clone(),
                        reason: format!("group {} already has a root", table.group),
                    });
                }
                self.groups.insert(
                    table.group.clone(),
                    GroupDef {
                        name: table.group.clone(),
                        root: table.name.clone(),
                        tables: vec![table.name.clone()],
                    },
                );
            }
        }

        self.tables.insert(table.name.clone(), table);
        Ok(())
    }
}

/// On-disk catalog description.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    tables: Vec<TableDef>,
}

/// The catalog holds table metadata shared by concurrently planned queries.
///
/// Writers build a new snapshot and swap it in; readers keep whichever
/// snapshot they took for the lifetime of their planning pass.
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the current snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Register a new table. Parents must be registered first.
    pub fn create_table(&self, table: TableDef) -> Result<(), CatalogError> {
        self.update(|snapshot| snapshot.insert_table(table))
    }

    /// Add an index to an existing table.
    pub fn create_index(&self, index: IndexDef) -> Result<(), CatalogError> {
        self.update(|snapshot| {
            let table = snapshot
                .tables
                .get_mut(&index.table)
                .ok_or_else(|| CatalogError::TableNotFound(index.table.clone()))?;
            table.indexes.push(index);
            table.validate()
        })
    }

    /// Replace a table's row count estimate.
    pub fn update_row_count(&self, table: &str, rows: u64) -> Result<(), CatalogError> {
        self.update(|snapshot| {
            let def = snapshot
                .tables
                .get_mut(table)
                .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
            def.row_count = rows;
            Ok(())
        })
    }

    /// Build a catalog from its JSON description.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError::Load(e.to_string()))?;
        let catalog = Self::new();
        for table in file.tables {
            catalog.create_table(table)?;
        }
        Ok(catalog)
    }

    /// Load a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CatalogError::Load(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&json)
    }

    // Modifications apply to a private copy so that a failed update leaves
    // the published snapshot untouched.
    fn update(
        &self,
        f: impl FnOnce(&mut CatalogSnapshot) -> Result<(), CatalogError>,
    ) -> Result<(), CatalogError> {
        let mut current = self.current.write();
        let mut next = CatalogSnapshot::clone(&current);
        f(&mut next)?;
        *current = Arc::new(next);
        Ok(())
    }
}

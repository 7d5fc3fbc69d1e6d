// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Relational Schema
//!
//! The compilation target of Phase 4: tables, columns, primary keys, and
//! foreign keys. Phase 3.5 produces the first relational schema from the ER
//! design; Phase 4.1 recompiles it canonically and freezes a deep copy into
//! `metadata.frozen_schema`, after which the table/column topology is
//! immutable.
//!
//! The schema must round-trip through JSON byte-identically (the frozen
//! snapshot is compared structurally across phases), so all optional fields
//! skip serialization when unset and maps are ordered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a table was compiled from an entity or a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    #[default]
    Entity,
    Junction,
}

/// One column of a compiled table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_condition: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            type_hint: None,
            nullable: true,
            default: None,
            check_condition: None,
        }
    }
}

/// A foreign key declared on a table, attribute lists positionally aligned
/// with the referenced attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableForeignKey {
    pub attributes: Vec<String>,
    pub references_table: String,
    pub referenced_attributes: Vec<String>,
}

/// One compiled table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<TableForeignKey>,
    #[serde(default)]
    pub source: TableSource,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            source: TableSource::Entity,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// The full compiled relational schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelationalSchema {
    pub tables: Vec<TableDef>,
}

impl RelationalSchema {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every primary-key column exists in its table's column list.
    /// Returns the violations as `"Table.column"` strings.
    pub fn missing_primary_key_columns(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for table in &self.tables {
            for pk in &table.primary_key {
                if !table.has_column(pk) {
                    missing.push(format!("{}.{}", table.name, pk));
                }
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> RelationalSchema {
        let mut book = TableDef::new("Book");
        book.columns.push(ColumnDef::new("book_id"));
        book.columns.push(ColumnDef::new("title"));
        book.primary_key = vec!["book_id".into()];
        RelationalSchema { tables: vec![book] }
    }

    #[test]
    fn test_table_lookup() {
        let schema = sample_schema();
        assert!(schema.table("Book").is_some());
        assert!(schema.table("Author").is_none());
    }

    #[test]
    fn test_pk_column_check() {
        let mut schema = sample_schema();
        assert!(schema.missing_primary_key_columns().is_empty());
        schema.tables[0].primary_key.push("isbn".into());
        assert_eq!(schema.missing_primary_key_columns(), vec!["Book.isbn"]);
    }

    #[test]
    fn test_schema_roundtrip_is_stable() {
        let schema = sample_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: RelationalSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
        // Byte-identical re-serialization: required for the frozen snapshot.
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}

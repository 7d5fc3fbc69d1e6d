// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # ER Design Compilation (Step 3.4)
//!
//! Assembles the conceptual entity-relationship design from the discovered
//! state: entities, relations with their cardinalities, per-entity
//! attributes, and primary keys. The ER design is the input to relational
//! compilation and is kept distinct from the relational schema (junction
//! tables and FK columns exist only in the latter).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use nl2schema_domain::{
    AttributeRecord, EntityRecord, ForeignKeyRecord, PipelineState, RelationRecord,
};

/// The compiled conceptual ER design, stored in `metadata.er_design`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErDesign {
    pub entities: Vec<EntityRecord>,
    pub relations: Vec<RelationRecord>,
    pub attributes: BTreeMap<String, Vec<AttributeRecord>>,
    pub primary_keys: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyRecord>,
}

/// Compiles the ER design from state. Entities with cardinality estimates
/// from step 1.8 get them merged onto the entity records.
pub fn compile_er_design(state: &PipelineState) -> ErDesign {
    let mut entities = state.entities.clone();
    for entity in &mut entities {
        if let Some(info) = state.entity_cardinalities.get(&entity.name) {
            if entity.cardinality.is_none() {
                entity.cardinality = info.cardinality.clone();
            }
            if entity.table_type.is_none() {
                entity.table_type = info.table_type.clone();
            }
        }
    }

    ErDesign {
        entities,
        relations: state.relations.clone(),
        attributes: state.attributes.clone(),
        primary_keys: state.primary_keys.clone(),
        foreign_keys: state.foreign_keys.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl2schema_domain::EntityCardinality;

    #[test]
    fn test_compile_merges_cardinalities() {
        let mut state = PipelineState::seed("d");
        state.entities.push(EntityRecord::new("Book", "a book"));
        state.entity_cardinalities.insert(
            "Book".into(),
            EntityCardinality {
                cardinality: Some("high".into()),
                table_type: Some("core".into()),
            },
        );
        state
            .attributes
            .insert("Book".into(), vec![AttributeRecord::new("title", "")]);
        state.primary_keys.insert("Book".into(), vec!["book_id".into()]);

        let design = compile_er_design(&state);
        assert_eq!(design.entities[0].cardinality.as_deref(), Some("high"));
        assert_eq!(design.entities[0].table_type.as_deref(), Some("core"));
        assert_eq!(design.primary_keys["Book"], vec!["book_id"]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut state = PipelineState::seed("d");
        state.entities.push(EntityRecord::new("A", ""));
        state.entities.push(EntityRecord::new("B", ""));
        let one = serde_json::to_string(&compile_er_design(&state)).unwrap();
        let two = serde_json::to_string(&compile_er_design(&state)).unwrap();
        assert_eq!(one, two);
    }
}

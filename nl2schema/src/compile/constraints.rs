// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Constraint Compilation (Step 8.8)
//!
//! Lowers the enriched constraint records (detected in 8.4, scoped in 8.5,
//! given enforcement strategies in 8.6, de-conflicted in 8.7) into compiled
//! constraint specs: stable ids, the columns they govern, and a SQL fragment
//! where one can be derived. The compiled form feeds the Phase-9 exclusion
//! logic (constrained columns are not given independent generation
//! strategies) and is stored in `metadata.compiled_constraints`.

use serde_json::{json, Value};

use nl2schema_domain::ConstraintRecord;

use super::ddl::escape_identifier;

/// Compiles constraints into their spec form.
pub fn compile_constraints(constraints: &[ConstraintRecord]) -> Vec<Value> {
    constraints
        .iter()
        .enumerate()
        .map(|(index, constraint)| {
            let mut object = serde_json::Map::new();
            object.insert("constraint_id".into(), json!(format!("c{}", index + 1)));
            object.insert("type".into(), json!(constraint.constraint_type));
            object.insert("table".into(), json!(constraint.entity));
            object.insert("columns".into(), json!(constraint.attributes));
            if let Some(condition) = &constraint.condition {
                object.insert("condition".into(), json!(condition));
            }
            if let Some(scope) = &constraint.scope {
                object.insert("scope".into(), json!(scope));
            }
            if let Some(strategy) = &constraint.enforcement_strategy {
                object.insert("enforcement_strategy".into(), json!(strategy));
            }
            if let Some(level) = &constraint.enforcement_level {
                object.insert("enforcement_level".into(), json!(level));
            }
            if let Some(sql) = constraint_sql(constraint) {
                object.insert("sql".into(), json!(sql));
            }
            Value::Object(object)
        })
        .collect()
}

/// Derives a SQL fragment for directly expressible constraint kinds.
fn constraint_sql(constraint: &ConstraintRecord) -> Option<String> {
    match constraint.constraint_type.as_str() {
        "unique" if !constraint.attributes.is_empty() => {
            let columns: Vec<String> = constraint
                .attributes
                .iter()
                .map(|a| escape_identifier(a))
                .collect();
            Some(format!("UNIQUE ({})", columns.join(", ")))
        }
        "check" | "range" => constraint
            .condition
            .as_ref()
            .map(|condition| format!("CHECK ({})", condition)),
        _ => None,
    }
}

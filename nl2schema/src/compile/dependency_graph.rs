// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Attribute Dependency Graph (Step 5.1)
//!
//! Builds the dependency graph Phase 5 assigns types over: FK attributes
//! depend on the primary-key attributes they reference, derived attributes
//! depend on their formula bases. Attributes with no incoming dependency are
//! independent and typed first (5.2); dependents follow in topological order
//! (5.3 for FKs, 5.4 for the rest).
//!
//! When the state carries no foreign keys yet, they are derived here from
//! the relations and their cardinalities: the FK lands on the N side of a
//! 1:N relation (named after the referenced primary key), 1:1 puts it on the
//! lexically-first entity, and many-to-many / n-ary relations are skipped —
//! their keys live on junction tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use nl2schema_domain::{ForeignKeyRecord, PipelineState};

/// An FK attribute's dependency on the key it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FkDependency {
    /// `"Entity.attribute"` of the referencing column.
    pub attribute_key: String,
    pub referenced_entity: String,
    pub referenced_attribute: String,
}

/// A derived attribute's dependency on its base attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedDependency {
    pub attribute_key: String,
    /// `"Entity.attribute"` keys of the bases (entity-local).
    pub base_attributes: Vec<String>,
}

/// Output of dependency-graph construction, stored in
/// `metadata.dependency_graph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DependencyGraph {
    /// `"Entity.attribute"` → the keys it depends on.
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    /// `(entity, attribute)` pairs with no dependencies, sorted.
    pub independent_attributes: Vec<(String, String)>,
    /// `(entity, attribute)` pairs with dependencies, sorted.
    pub dependent_attributes: Vec<(String, String)>,
    pub fk_dependencies: Vec<FkDependency>,
    pub derived_dependencies: Vec<DerivedDependency>,
    /// Foreign keys derived from relations when none were supplied.
    pub created_foreign_keys: Vec<ForeignKeyRecord>,
}

impl DependencyGraph {
    /// True when the attribute participates as an FK column.
    pub fn is_foreign_key_attribute(&self, entity: &str, attribute: &str) -> bool {
        let key = format!("{}.{}", entity, attribute);
        self.fk_dependencies.iter().any(|fk| fk.attribute_key == key)
    }

    /// Dependent non-FK attributes in dependency (topological) order.
    ///
    /// Derived attributes are emitted after their bases; ties break on the
    /// attribute key, so the order is total and deterministic.
    pub fn dependents_in_topological_order(&self) -> Vec<(String, String)> {
        let fk_keys: BTreeSet<&String> =
            self.fk_dependencies.iter().map(|fk| &fk.attribute_key).collect();
        let mut pending: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (entity, attribute) in &self.dependent_attributes {
            let key = format!("{}.{}", entity, attribute);
            if fk_keys.contains(&key) {
                continue;
            }
            let deps: BTreeSet<String> = self
                .dependency_graph
                .get(&key)
                .map(|d| d.iter().cloned().collect())
                .unwrap_or_default();
            pending.insert(key, deps);
        }

        let mut resolved: BTreeSet<String> = self
            .independent_attributes
            .iter()
            .map(|(e, a)| format!("{}.{}", e, a))
            .collect();
        resolved.extend(fk_keys.iter().map(|k| (*k).clone()));

        let mut order = Vec::new();
        while !pending.is_empty() {
            let ready: Vec<String> = pending
                .iter()
                .filter(|(_, deps)| deps.iter().all(|d| resolved.contains(d)))
                .map(|(key, _)| key.clone())
                .collect();
            if ready.is_empty() {
                // Cycle among derived attributes: emit the rest in key order.
                order.extend(pending.keys().cloned());
                break;
            }
            for key in ready {
                pending.remove(&key);
                resolved.insert(key.clone());
                order.push(key);
            }
        }

        order
            .into_iter()
            .filter_map(|key| {
                key.split_once('.')
                    .map(|(e, a)| (e.to_string(), a.to_string()))
            })
            .collect()
    }
}

/// Derives foreign keys from binary relations and their cardinalities.
pub fn create_foreign_keys_from_relations(state: &PipelineState) -> Vec<ForeignKeyRecord> {
    let mut foreign_keys = Vec::new();

    for relation in &state.relations {
        if relation.entities.len() != 2 || relation.needs_junction_table() {
            continue;
        }
        let first = &relation.entities[0];
        let second = &relation.entities[1];
        let first_card = relation.cardinality_of(first);
        let second_card = relation.cardinality_of(second);

        let (holder, referenced) = match (first_card.as_str(), second_card.as_str()) {
            ("1", "N") => (second.clone(), first.clone()),
            ("N", "1") => (first.clone(), second.clone()),
            ("1", "1") => {
                if first <= second {
                    (first.clone(), second.clone())
                } else {
                    (second.clone(), first.clone())
                }
            }
            _ => continue,
        };

        let Some(referenced_pk) = state
            .primary_keys
            .get(&referenced)
            .filter(|pk| !pk.is_empty())
        else {
            continue;
        };
        if !state.primary_keys.contains_key(&holder) {
            continue;
        }

        foreign_keys.push(ForeignKeyRecord {
            from_entity: holder,
            // FK columns are named after the referenced key.
            from_attributes: referenced_pk.clone(),
            to_entity: referenced,
            to_attributes: referenced_pk.clone(),
        });
    }

    foreign_keys
}

/// Builds the attribute dependency graph for the current state.
///
/// Uses the state's foreign keys when present, otherwise derives them from
/// relations (returned in `created_foreign_keys` so the adapter can persist
/// them).
pub fn build_dependency_graph(state: &PipelineState) -> DependencyGraph {
    let mut graph = DependencyGraph::default();

    let foreign_keys = if state.foreign_keys.is_empty() {
        let created = create_foreign_keys_from_relations(state);
        graph.created_foreign_keys = created.clone();
        created
    } else {
        state.foreign_keys.clone()
    };

    // FK → PK edges.
    for fk in &foreign_keys {
        for (from_attr, to_attr) in fk.from_attributes.iter().zip(&fk.to_attributes) {
            let fk_key = format!("{}.{}", fk.from_entity, from_attr);
            let pk_key = format!("{}.{}", fk.to_entity, to_attr);
            graph
                .dependency_graph
                .entry(fk_key.clone())
                .or_default()
                .push(pk_key);
            graph.fk_dependencies.push(FkDependency {
                attribute_key: fk_key,
                referenced_entity: fk.to_entity.clone(),
                referenced_attribute: to_attr.clone(),
            });
        }
    }

    // Derived → base edges (entity-local bases).
    for (key, formula) in &state.derived_formulas {
        let Some((entity, _)) = key.split_once('.') else {
            continue;
        };
        let bases: Vec<String> = formula
            .dependencies
            .iter()
            .map(|dep| format!("{}.{}", entity, dep))
            .collect();
        if bases.is_empty() {
            continue;
        }
        graph
            .dependency_graph
            .entry(key.clone())
            .or_default()
            .extend(bases.clone());
        graph.derived_dependencies.push(DerivedDependency {
            attribute_key: key.clone(),
            base_attributes: bases,
        });
    }

    // Partition all known attributes (including FK columns that were derived
    // onto entities but may not be in `attributes` yet).
    let mut all_keys: BTreeSet<(String, String)> = BTreeSet::new();
    for (entity, attrs) in &state.attributes {
        for attr in attrs {
            all_keys.insert((entity.clone(), attr.name.clone()));
        }
    }
    for fk in &graph.fk_dependencies {
        if let Some((entity, attr)) = fk.attribute_key.split_once('.') {
            all_keys.insert((entity.to_string(), attr.to_string()));
        }
    }

    let dependent_keys: BTreeSet<String> = graph.dependency_graph.keys().cloned().collect();
    for (entity, attribute) in all_keys {
        let key = format!("{}.{}", entity, attribute);
        if dependent_keys.contains(&key) {
            graph.dependent_attributes.push((entity, attribute));
        } else {
            graph.independent_attributes.push((entity, attribute));
        }
    }

    graph.fk_dependencies.sort_by(|a, b| a.attribute_key.cmp(&b.attribute_key));
    graph
        .derived_dependencies
        .sort_by(|a, b| a.attribute_key.cmp(&b.attribute_key));
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl2schema_domain::{AttributeRecord, EntityRecord, FormulaRecord, RelationRecord};
    use std::collections::BTreeMap;

    fn order_customer_state() -> PipelineState {
        let mut state = PipelineState::seed("d");
        state.entities.push(EntityRecord::new("Customer", ""));
        state.entities.push(EntityRecord::new("Order", ""));
        state.attributes.insert(
            "Customer".into(),
            vec![AttributeRecord::new("customer_id", "")],
        );
        state.attributes.insert(
            "Order".into(),
            vec![
                AttributeRecord::new("order_id", ""),
                AttributeRecord::new("subtotal", ""),
                AttributeRecord::new("tax", ""),
                AttributeRecord::new("total", ""),
            ],
        );
        state
            .primary_keys
            .insert("Customer".into(), vec!["customer_id".into()]);
        state.primary_keys.insert("Order".into(), vec!["order_id".into()]);

        let mut relation =
            RelationRecord::new(vec!["Customer".into(), "Order".into()], "one-to-many", "");
        let mut cards = BTreeMap::new();
        cards.insert("Customer".to_string(), "1".to_string());
        cards.insert("Order".to_string(), "N".to_string());
        relation.entity_cardinalities = Some(cards);
        state.relations.push(relation);

        state.derived_formulas.insert(
            "Order.total".into(),
            FormulaRecord {
                formula: "subtotal + tax".into(),
                dependencies: vec!["subtotal".into(), "tax".into()],
            },
        );
        state
    }

    #[test]
    fn test_fk_created_on_many_side() {
        let state = order_customer_state();
        let fks = create_foreign_keys_from_relations(&state);
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].from_entity, "Order");
        assert_eq!(fks[0].from_attributes, vec!["customer_id"]);
        assert_eq!(fks[0].to_entity, "Customer");
    }

    #[test]
    fn test_many_to_many_creates_no_entity_fk() {
        let mut state = PipelineState::seed("d");
        state.primary_keys.insert("A".into(), vec!["a_id".into()]);
        state.primary_keys.insert("B".into(), vec!["b_id".into()]);
        state
            .relations
            .push(RelationRecord::new(vec!["A".into(), "B".into()], "many-to-many", ""));
        assert!(create_foreign_keys_from_relations(&state).is_empty());
    }

    #[test]
    fn test_graph_partitions_independent_and_dependent() {
        let state = order_customer_state();
        let graph = build_dependency_graph(&state);

        let dependents: BTreeSet<String> = graph
            .dependent_attributes
            .iter()
            .map(|(e, a)| format!("{}.{}", e, a))
            .collect();
        assert!(dependents.contains("Order.customer_id"));
        assert!(dependents.contains("Order.total"));

        let independents: BTreeSet<String> = graph
            .independent_attributes
            .iter()
            .map(|(e, a)| format!("{}.{}", e, a))
            .collect();
        assert!(independents.contains("Order.subtotal"));
        assert!(independents.contains("Customer.customer_id"));
        assert!(!independents.contains("Order.total"));
    }

    #[test]
    fn test_topological_order_puts_bases_first() {
        let mut state = order_customer_state();
        // total depends on tax_total which depends on tax.
        state.derived_formulas.insert(
            "Order.tax_total".into(),
            FormulaRecord {
                formula: "tax * 2".into(),
                dependencies: vec!["tax".into()],
            },
        );
        state.derived_formulas.insert(
            "Order.total".into(),
            FormulaRecord {
                formula: "subtotal + tax_total".into(),
                dependencies: vec!["subtotal".into(), "tax_total".into()],
            },
        );
        state
            .attributes
            .get_mut("Order")
            .unwrap()
            .push(AttributeRecord::new("tax_total", ""));

        let graph = build_dependency_graph(&state);
        let order = graph.dependents_in_topological_order();
        let keys: Vec<String> = order.iter().map(|(e, a)| format!("{}.{}", e, a)).collect();
        let tax_total_pos = keys.iter().position(|k| k == "Order.tax_total").unwrap();
        let total_pos = keys.iter().position(|k| k == "Order.total").unwrap();
        assert!(tax_total_pos < total_pos);
        // FK columns are excluded; they are typed by 5.3.
        assert!(!keys.contains(&"Order.customer_id".to_string()));
    }

    #[test]
    fn test_existing_foreign_keys_take_precedence() {
        let mut state = order_customer_state();
        state.foreign_keys.push(ForeignKeyRecord {
            from_entity: "Order".into(),
            from_attributes: vec!["buyer_id".into()],
            to_entity: "Customer".into(),
            to_attributes: vec!["customer_id".into()],
        });
        let graph = build_dependency_graph(&state);
        assert!(graph.created_foreign_keys.is_empty());
        assert!(graph.is_foreign_key_attribute("Order", "buyer_id"));
        assert!(!graph.is_foreign_key_attribute("Order", "customer_id"));
    }
}

// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

#![recursion_limit = "256"]

//! # Common Test Helpers
//!
//! Shared utilities for the integration suites: scripted fixture builders
//! and orchestrator construction. The library fixture drives a complete
//! nine-phase run for the classic "library" scenario (books, authors,
//! members who borrow books).

use serde_json::{json, Value};
use std::sync::Arc;

use nl2schema::application::{EngineContext, PipelineOrchestrator};
use nl2schema::infrastructure::config::PipelineConfig;
use nl2schema::infrastructure::scripted::registry_from_fixture;
use nl2schema::infrastructure::sqlite::SqliteSchemaValidator;
use nl2schema_domain::services::NullRunLog;

/// Builds an orchestrator whose substeps replay the given fixture.
pub fn orchestrator_with(fixture: &Value) -> PipelineOrchestrator {
    orchestrator_with_config(fixture, PipelineConfig::default())
}

pub fn orchestrator_with_config(fixture: &Value, config: PipelineConfig) -> PipelineOrchestrator {
    let substeps = registry_from_fixture(fixture).expect("valid fixture");
    let ctx = EngineContext::new(
        substeps,
        Arc::new(SqliteSchemaValidator::new()),
        Arc::new(NullRunLog),
        config,
    )
    .expect("engine context");
    PipelineOrchestrator::new(ctx)
}

/// The natural-language description of the library scenario.
pub fn library_description() -> &'static str {
    "I need a database for a library with books, authors, and members who borrow books."
}

fn library_attributes() -> Value {
    json!({
        "Book": [
            {"name": "book_id", "description": "Unique book identifier", "type_hint": "identifier"},
            {"name": "title", "description": "Book title", "type_hint": "text"},
            {"name": "isbn", "description": "ISBN code", "type_hint": "text"}
        ],
        "Author": [
            {"name": "author_id", "description": "Unique author identifier", "type_hint": "identifier"},
            {"name": "name", "description": "Author name", "type_hint": "text"}
        ],
        "Member": [
            {"name": "member_id", "description": "Unique member identifier", "type_hint": "identifier"},
            {"name": "name", "description": "Member name", "type_hint": "text"},
            {"name": "email", "description": "Member email address", "type_hint": "text"}
        ]
    })
}

/// Full fixture for a nine-phase library run.
pub fn library_fixture() -> Value {
    let attributes = library_attributes();
    json!({
        // Phase 1
        "1.1": {"domain": "library", "has_explicit_domain": true},
        "1.2": {"mentioned_entities": ["books", "authors", "members"]},
        "1.4": {"entities": [
            {"name": "Book", "description": "A book in the library"},
            {"name": "Author", "description": "A person who wrote books"},
            {"name": "Member", "description": "A library member who borrows books"}
        ]},
        "1.5": {"mentioned_relations": ["authors write books", "members borrow books"]},
        "1.6": {"suggested_entities": []},
        "1.7": {"final_entities": ["Book", "Author", "Member"]},
        "1.76": {"entities": ["Book", "Author", "Member"], "attribute_candidates": []},
        "1.75": {"keep_entities": ["Book", "Author", "Member"], "reclassify_as_relation": []},
        "1.8": {"$keyed_by": "/entity_name", "$outputs": {
            "Book": {"cardinality": "high", "table_type": "core"},
            "Author": {"cardinality": "medium", "table_type": "core"},
            "Member": {"cardinality": "medium", "table_type": "core"}
        }},
        "1.9": {"relations": [
            {"entities": ["Book", "Author"], "type": "many-to-many", "description": "authors write books"},
            {"entities": ["Member", "Book"], "type": "many-to-many", "description": "members borrow books"}
        ]},
        "1.11": {"$keyed_by": "/relation_key", "$outputs": {
            "Author+Book": {
                "entity_cardinalities": [
                    {"entity_name": "Book", "cardinality": "N"},
                    {"entity_name": "Author", "cardinality": "N"}
                ],
                "entity_participations": [
                    {"entity_name": "Book", "participation": "total"},
                    {"entity_name": "Author", "participation": "partial"}
                ]
            },
            "Book+Member": {
                "entity_cardinalities": [
                    {"entity_name": "Member", "cardinality": "N"},
                    {"entity_name": "Book", "cardinality": "N"}
                ],
                "entity_participations": [
                    {"entity_name": "Member", "participation": "partial"},
                    {"entity_name": "Book", "participation": "partial"}
                ]
            }
        }},
        "1.12": {"validation_passed": true},

        // Phase 2
        "2.1": {"entity_results": {"Book": {"estimated_count": 3}, "Author": {"estimated_count": 2}, "Member": {"estimated_count": 3}}},
        "2.2": {"entity_results": attributes},
        "2.3": {"entity_results": attributes},
        "2.4": {"entity_results": attributes},
        "2.5": {"entity_results": attributes},
        "2.6": {"validation_passed": true},
        "2.7": {"entity_results": {"Book": ["book_id"], "Author": ["author_id"], "Member": ["member_id"]}},
        "2.8": {"entity_results": {}},
        "2.9": {"formulas": {}},
        "2.10": {"entity_results": {"Book": {"unique_attributes": ["isbn"]}}},
        "2.11": {"entity_results": {}},
        "2.12": {"entity_results": {}},
        "2.13": {"entity_results": {}},
        "2.14": {"entity_results": attributes, "all_complete": true},
        "2.15": {"relation_results": {"Book+Member": [
            {"name": "borrowed_at", "description": "Checkout timestamp", "type_hint": "timestamp"}
        ]}},

        // Phase 3
        "3.1": {"information_needs": [
            {"description": "Number of books written by each author"}
        ], "no_more_changes": true},
        "3.2": {"completeness_results": {}, "missing_intrinsic_attributes": []},
        "3.3": {},
        "3.45": {"$keyed_by": "/relation_key", "$outputs": {
            "Author+Book": {"table_name": "book_authorship"},
            "Book+Member": {"table_name": "loan"}
        }},

        // Phase 5
        "5.2": {"$keyed_by": "/attribute_key", "$outputs": {
            "Book.book_id": {"type": "INTEGER"},
            "Book.title": {"type": "VARCHAR", "size": 255},
            "Book.isbn": {"type": "VARCHAR", "size": 20},
            "Author.author_id": {"type": "INTEGER"},
            "Author.name": {"type": "VARCHAR", "size": 120},
            "Member.member_id": {"type": "INTEGER"},
            "Member.name": {"type": "VARCHAR", "size": 120},
            "Member.email": {"type": "VARCHAR", "size": 200}
        }, "$default": {"type": "VARCHAR"}},
        "5.4": {"$keyed_by": "/attribute_key", "$outputs": {
            "loan.borrowed_at": {"type": "TIMESTAMP"}
        }, "$default": {"type": "VARCHAR"}},
        "5.5": {"$keyed_by": "/table", "$outputs": {
            "Book": {"nullable_columns": ["isbn"]},
            "Author": {"nullable_columns": []},
            "Member": {"nullable_columns": ["email"]},
            "loan": {"nullable_columns": []}
        }, "$default": {"nullable_columns": []}},

        // Phase 7
        "7.1": {"information_needs": [
            {"description": "Number of books written by each author"}
        ], "no_more_changes": true},
        "7.2": {
            "sql_query": "SELECT a.name, COUNT(*) AS written FROM book_authorship ba JOIN Author a ON ba.author_id = a.author_id GROUP BY a.name",
            "reasoning": "join the authorship junction to authors and count"
        },

        // Phase 8
        "8.1": {"$keyed_by": "/entity", "$outputs": {
            "Book": {"functional_dependencies": [
                {"determinants": ["isbn"], "dependents": ["title"]}
            ]}
        }, "$default": {"functional_dependencies": []}},
        "8.2": {"entity_results": {}},
        "8.4": {"constraints": [
            {"type": "check", "entity": "Member", "attributes": ["email"], "condition": "email LIKE '%@%'"}
        ], "no_more_constraints": true},
        "8.5": {"scope": "column"},
        "8.6": {"enforcement_strategy": "check_constraint", "enforcement_level": "hard"},
        "8.7": {"conflicts": [], "resolution_applied": false},

        // Phase 9
        "9.2": {"strategies": {
            "Book.title": {"generator": "book_title"},
            "Author.name": {"generator": "person_name"},
            "Member.name": {"generator": "person_name"},
            "loan.borrowed_at": {"generator": "timestamp", "start": "2020-01-01", "end": "2025-12-31"}
        }},
        "9.4": {"entity_volumes": {
            "Book": {"row_count": 10000},
            "Author": {"row_count": 2000},
            "Member": {"row_count": 5000}
        }}
    })
}

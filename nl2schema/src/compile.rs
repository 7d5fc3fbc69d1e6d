// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Deterministic Compilers
//!
//! The non-LLM substeps of the pipeline: ER design assembly (3.4),
//! relational schema compilation (3.5 / 4.1), the attribute dependency graph
//! (5.1), FK type derivation (5.3), DDL compilation and static validation
//! (6.1 / 6.2), constraint compilation (8.8), and generation-strategy
//! compilation (9.6 and its extraction helpers).
//!
//! All functions here are pure over their inputs and deterministic: given
//! identical state they produce identical output, which is what makes the
//! pipeline reproducible modulo LLM answers.

pub mod constraints;
pub mod ddl;
pub mod dependency_graph;
pub mod er_design;
pub mod relational;
pub mod strategies;
pub mod type_derivation;

// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # DDL Compilation & Static Validation (Steps 6.1 / 6.2)
//!
//! Lowers the frozen relational schema plus the Phase-5 type assignments to
//! executable `CREATE TABLE` statements.
//!
//! Column rendering: the assigned SQL type (VARCHAR gets its default size,
//! DECIMAL its precision/scale), `NOT NULL` from the nullability verdicts,
//! `DEFAULT` literals, per-column `CHECK` conditions, and categorical
//! `CHECK (col IN (…))` lists with value/type compatibility filtering —
//! a numeric column never receives a quoted-string IN list.
//!
//! Structural handling:
//!
//! - primary-key columns must be plain names present in the column list;
//!   anything else is skipped with a warning;
//! - foreign keys are validated (columns exist, reference exists, counts
//!   match) and cycle-checked: an FK that would close a reference cycle is
//!   dropped with a warning and recorded so a later ALTER pass could
//!   reintroduce it;
//! - statement order follows the schema's table order.

use std::collections::{BTreeMap, HashMap, HashSet};

use nl2schema_domain::{RelationalSchema, TableDef, TypeInfo};

/// A foreign key dropped to break a reference cycle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BrokenForeignKey {
    pub table: String,
    pub references_table: String,
    pub attributes: Vec<String>,
}

/// Output of DDL compilation.
#[derive(Debug, Clone, Default)]
pub struct DdlOutput {
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
    pub broken_foreign_keys: Vec<BrokenForeignKey>,
}

/// Quotes an identifier, doubling embedded quotes.
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

fn numeric_type(sql_type: &str) -> bool {
    const NUMERIC: [&str; 9] = [
        "INT", "INTEGER", "BIGINT", "SMALLINT", "DECIMAL", "NUMERIC", "FLOAT", "DOUBLE", "REAL",
    ];
    let upper = sql_type.to_ascii_uppercase();
    NUMERIC.iter().any(|n| upper.starts_with(n))
}

/// True when every categorical value is representable in the column type.
fn values_compatible_with_type(sql_type: &str, values: &[String]) -> bool {
    if values.is_empty() {
        return true;
    }
    if numeric_type(sql_type) {
        return values.iter().all(|v| v.trim().parse::<f64>().is_ok());
    }
    if sql_type.to_ascii_uppercase() == "BOOLEAN" {
        return values
            .iter()
            .all(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "false" | "0" | "1"));
    }
    true
}

/// Formats one categorical value as a literal of the column type.
fn format_check_value(sql_type: &str, value: &str) -> Option<String> {
    let trimmed = value.trim();
    if sql_type.to_ascii_uppercase() == "BOOLEAN" {
        return match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Some("TRUE".to_string()),
            "false" | "0" => Some("FALSE".to_string()),
            _ => None,
        };
    }
    if numeric_type(sql_type) {
        return trimmed.parse::<f64>().ok().map(|_| trimmed.to_string());
    }
    Some(format!("'{}'", escape_string(trimmed)))
}

fn format_default(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            let upper = s.to_ascii_uppercase();
            if matches!(upper.as_str(), "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME") {
                upper
            } else {
                format!("'{}'", escape_string(s))
            }
        }
        serde_json::Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => "NULL".to_string(),
        other => format!("'{}'", escape_string(&other.to_string())),
    }
}

fn column_type(
    table: &str,
    column: &str,
    type_hint: Option<&str>,
    data_types: &BTreeMap<String, BTreeMap<String, TypeInfo>>,
) -> String {
    if let Some(info) = data_types.get(table).and_then(|m| m.get(column)) {
        return info.render();
    }
    type_hint
        .map(infer_type_from_hint)
        .unwrap_or_else(|| "VARCHAR(255)".to_string())
}

/// Maps a loose discovery hint to a concrete SQL type.
fn infer_type_from_hint(hint: &str) -> String {
    let hint = hint.to_ascii_lowercase();
    if hint.contains("identifier") || hint.contains("int") || hint.contains("count") {
        "INTEGER".to_string()
    } else if hint.contains("timestamp") || hint.contains("datetime") {
        "TIMESTAMP".to_string()
    } else if hint.contains("date") {
        "DATE".to_string()
    } else if hint.contains("bool") || hint.contains("flag") {
        "BOOLEAN".to_string()
    } else if hint.contains("money") || hint.contains("price") || hint.contains("decimal") || hint.contains("amount") {
        "DECIMAL(10,2)".to_string()
    } else if hint.contains("float") || hint.contains("number") || hint.contains("numeric") {
        "REAL".to_string()
    } else if hint.contains("text") && hint.contains("long") {
        "TEXT".to_string()
    } else {
        "VARCHAR(255)".to_string()
    }
}

/// Detects whether accepting `from -> to` would close a cycle over the
/// already accepted edges.
fn closes_cycle(from: &str, to: &str, accepted: &HashMap<String, HashSet<String>>) -> bool {
    // A cycle exists if `from` is already reachable from `to`.
    let mut stack = vec![to.to_string()];
    let mut visited: HashSet<String> = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == from {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(next) = accepted.get(&current) {
            stack.extend(next.iter().cloned());
        }
    }
    false
}

/// Compiles `CREATE TABLE` statements from the schema.
///
/// `categorical_checks` maps `table → column → allowed values`; compatible
/// lists are rendered as `CHECK (col IN (…))`, incompatible ones are skipped
/// with a warning.
pub fn compile_ddl(
    schema: &RelationalSchema,
    data_types: &BTreeMap<String, BTreeMap<String, TypeInfo>>,
    categorical_checks: Option<&BTreeMap<String, BTreeMap<String, Vec<String>>>>,
) -> DdlOutput {
    let mut output = DdlOutput::default();
    let mut accepted_edges: HashMap<String, HashSet<String>> = HashMap::new();
    let table_names: HashSet<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();

    for table in &schema.tables {
        let statement = compile_table(
            table,
            schema,
            data_types,
            categorical_checks,
            &table_names,
            &mut accepted_edges,
            &mut output,
        );
        output.statements.push(statement);
    }

    output
}

fn compile_table(
    table: &TableDef,
    schema: &RelationalSchema,
    data_types: &BTreeMap<String, BTreeMap<String, TypeInfo>>,
    categorical_checks: Option<&BTreeMap<String, BTreeMap<String, Vec<String>>>>,
    table_names: &HashSet<&str>,
    accepted_edges: &mut HashMap<String, HashSet<String>>,
    output: &mut DdlOutput,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    for column in &table.columns {
        let rendered_type = column_type(
            &table.name,
            &column.name,
            column.type_hint.as_deref(),
            data_types,
        );
        let mut line = format!("    {} {}", escape_identifier(&column.name), rendered_type);

        let nullable = data_types
            .get(&table.name)
            .and_then(|m| m.get(&column.name))
            .and_then(|info| info.nullable)
            .unwrap_or(column.nullable);
        let is_pk_column = table.primary_key.contains(&column.name);
        if !nullable || is_pk_column {
            line.push_str(" NOT NULL");
        }

        if let Some(default) = &column.default {
            line.push_str(&format!(" DEFAULT {}", format_default(default)));
        }

        if let Some(values) = categorical_checks
            .and_then(|checks| checks.get(&table.name))
            .and_then(|columns| columns.get(&column.name))
        {
            if !values_compatible_with_type(&rendered_type, values) {
                output.warnings.push(format!(
                    "Table {}: skipping CHECK for {} because values are not compatible with type {}",
                    table.name, column.name, rendered_type
                ));
            } else {
                let literals: Option<Vec<String>> = values
                    .iter()
                    .map(|v| format_check_value(&rendered_type, v))
                    .collect();
                match literals {
                    Some(literals) if !literals.is_empty() => {
                        line.push_str(&format!(
                            " CHECK ({} IN ({}))",
                            escape_identifier(&column.name),
                            literals.join(", ")
                        ));
                    }
                    _ => output.warnings.push(format!(
                        "Table {}: skipping CHECK for {} due to value formatting incompatibility",
                        table.name, column.name
                    )),
                }
            }
        }

        if let Some(condition) = &column.check_condition {
            line.push_str(&format!(" CHECK ({})", condition));
        }

        lines.push(line);
    }

    // PRIMARY KEY: plain, existing column names only.
    let valid_pk: Vec<&String> = table
        .primary_key
        .iter()
        .filter(|pk| {
            let plain = !pk.chars().any(|c| "()+-*/ |".contains(c));
            if !plain {
                output.warnings.push(format!(
                    "Table {}: primary key column '{}' looks like an expression; skipping",
                    table.name, pk
                ));
                return false;
            }
            if !table.has_column(pk) {
                output.warnings.push(format!(
                    "Table {}: primary key column '{}' not found in table columns; skipping",
                    table.name, pk
                ));
                return false;
            }
            true
        })
        .collect();
    if !valid_pk.is_empty() {
        let columns: Vec<String> = valid_pk.iter().map(|pk| escape_identifier(pk)).collect();
        lines.push(format!("    PRIMARY KEY ({})", columns.join(", ")));
    } else if !table.primary_key.is_empty() {
        output.warnings.push(format!(
            "Table {}: no valid primary key columns remain; created without PRIMARY KEY",
            table.name
        ));
    }

    // FOREIGN KEYs with validation and cycle breaking.
    for fk in &table.foreign_keys {
        if fk.attributes.is_empty() || fk.references_table.is_empty() || fk.referenced_attributes.is_empty() {
            output.warnings.push(format!(
                "Table {}: skipping incomplete foreign key referencing '{}'",
                table.name, fk.references_table
            ));
            continue;
        }
        if fk.attributes.len() != fk.referenced_attributes.len() {
            output.warnings.push(format!(
                "Table {}: foreign key to {} has mismatched attribute counts; skipping",
                table.name, fk.references_table
            ));
            continue;
        }
        if !table_names.contains(fk.references_table.as_str()) {
            output.warnings.push(format!(
                "Table {}: foreign key references unknown table '{}'; skipping",
                table.name, fk.references_table
            ));
            continue;
        }
        if let Some(missing) = fk.attributes.iter().find(|a| !table.has_column(a)) {
            output.warnings.push(format!(
                "Table {}: foreign key column '{}' not found in table columns; skipping",
                table.name, missing
            ));
            continue;
        }
        let referenced_table = schema.table(&fk.references_table);
        if let Some(referenced_table) = referenced_table {
            if let Some(missing) = fk
                .referenced_attributes
                .iter()
                .find(|a| !referenced_table.has_column(a))
            {
                output.warnings.push(format!(
                    "Table {}: foreign key references missing column '{}.{}'; skipping",
                    table.name, fk.references_table, missing
                ));
                continue;
            }
        }

        if closes_cycle(&table.name, &fk.references_table, accepted_edges) {
            output.warnings.push(format!(
                "Circular FK reference detected between {} and {}. \
                 Skipping FK from {} to {} to break the cycle.",
                table.name, fk.references_table, table.name, fk.references_table
            ));
            output.broken_foreign_keys.push(BrokenForeignKey {
                table: table.name.clone(),
                references_table: fk.references_table.clone(),
                attributes: fk.attributes.clone(),
            });
            continue;
        }
        accepted_edges
            .entry(table.name.clone())
            .or_default()
            .insert(fk.references_table.clone());

        let from: Vec<String> = fk.attributes.iter().map(|a| escape_identifier(a)).collect();
        let to: Vec<String> = fk
            .referenced_attributes
            .iter()
            .map(|a| escape_identifier(a))
            .collect();
        lines.push(format!(
            "    FOREIGN KEY ({}) REFERENCES {} ({})",
            from.join(", "),
            escape_identifier(&fk.references_table),
            to.join(", ")
        ));
    }

    format!(
        "CREATE TABLE {} (\n{}\n)",
        escape_identifier(&table.name),
        lines.join(",\n")
    )
}

/// Static (pre-engine) DDL checks: non-empty statements, `CREATE TABLE`
/// prefix, balanced parentheses. The authoritative validation is execution
/// against the in-memory engine in 6.3.
pub fn validate_ddl_statically(statements: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    for (index, statement) in statements.iter().enumerate() {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            errors.push(format!("Statement {}: empty", index));
            continue;
        }
        if !trimmed.to_ascii_uppercase().starts_with("CREATE TABLE") {
            errors.push(format!("Statement {}: does not start with CREATE TABLE", index));
        }
        let opens = trimmed.matches('(').count();
        let closes = trimmed.matches(')').count();
        if opens != closes {
            errors.push(format!(
                "Statement {}: unbalanced parentheses ({} open, {} close)",
                index, opens, closes
            ));
        }
    }
    errors
}

// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase Graph Runtime
//!
//! The compiled state machine each phase runs as. A graph is a set of named
//! nodes (async functions from state to partial update), sequential edges,
//! conditional edges keyed by branch labels, and parallel groups that fan a
//! cohort of nodes out concurrently and fan their updates back in.
//!
//! ## Execution model
//!
//! Execution starts at the entry node and proceeds one superstep at a time.
//! Each superstep runs one node (or one parallel group), merges its partial
//! update into the state under the state's merge rules, then follows the
//! node's outgoing edge. Conditional edges evaluate a predicate against the
//! merged state and route by branch label. Execution ends when an edge
//! routes to `End`.
//!
//! A superstep backstop bounds total steps per phase run. Real loop
//! termination belongs to the convergence guards (iteration budgets with
//! forced-pass semantics); the backstop only turns an engine bug into an
//! error instead of a hang.
//!
//! ## Cohort merge safety
//!
//! Updates returned by a parallel group are validated before merging:
//! single-writer fields (scalars, map overwrites, sequence replaces) are
//! rejected, and `metadata` / `previous_answers` keys must be pairwise
//! disjoint across the cohort. Violations surface as merge-conflict errors,
//! never as silently lost writes. Cohort updates are merged in declaration
//! order, so append order is deterministic.

use futures::future::{join_all, BoxFuture};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nl2schema_domain::{PipelineError, PipelineState, StateUpdate};

/// An async node body: owned state snapshot in, partial update out.
pub type NodeFn =
    Arc<dyn Fn(PipelineState) -> BoxFuture<'static, Result<StateUpdate, PipelineError>> + Send + Sync>;

/// A branch predicate: evaluates the merged state to a branch label.
pub type BranchFn = Arc<dyn Fn(&PipelineState) -> &'static str + Send + Sync>;

/// Where an edge routes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Node(&'static str),
    End,
}

enum Edge {
    To(Target),
    Branch {
        decide: BranchFn,
        routes: Vec<(&'static str, Target)>,
    },
}

/// Event emitted to stream observers after each merged update.
#[derive(Debug, Clone)]
pub struct StepEvent {
    /// Substep id from the update, or the node name for unlabeled nodes.
    pub step_id: String,
    pub update: StateUpdate,
}

/// Observer channel for streaming execution.
pub type StepObserver = tokio::sync::mpsc::UnboundedSender<StepEvent>;

/// A compiled phase state machine.
pub struct PhaseGraph {
    name: &'static str,
    entry: &'static str,
    nodes: HashMap<&'static str, NodeFn>,
    groups: HashMap<&'static str, Vec<&'static str>>,
    edges: HashMap<&'static str, Edge>,
    superstep_limit: u32,
}

impl PhaseGraph {
    pub fn builder(name: &'static str, superstep_limit: u32) -> PhaseGraphBuilder {
        PhaseGraphBuilder {
            name,
            entry: None,
            nodes: HashMap::new(),
            groups: HashMap::new(),
            edges: HashMap::new(),
            superstep_limit,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the graph to completion, merging every update into `state`.
    ///
    /// `observer`, when given, receives a [`StepEvent`] per merged update,
    /// in merge order.
    pub async fn run(
        &self,
        mut state: PipelineState,
        observer: Option<&StepObserver>,
    ) -> Result<PipelineState, PipelineError> {
        let mut current = self.entry;
        let mut supersteps = 0u32;

        loop {
            supersteps += 1;
            if supersteps > self.superstep_limit {
                return Err(PipelineError::InternalError(format!(
                    "Graph '{}' exceeded the superstep limit of {} at node '{}'; \
                     a loop guard is missing or misconfigured",
                    self.name, self.superstep_limit, current
                )));
            }

            if let Some(members) = self.groups.get(current) {
                self.run_group(current, members, &mut state, observer).await?;
            } else {
                let node = self.nodes.get(current).ok_or_else(|| {
                    PipelineError::InternalError(format!(
                        "Graph '{}' routed to unknown node '{}'",
                        self.name, current
                    ))
                })?;
                let update = node(state.clone()).await?;
                emit(observer, current, &update);
                state.apply(update);
            }

            match self.follow_edge(current, &state)? {
                Target::Node(next) => current = next,
                Target::End => return Ok(state),
            }
        }
    }

    async fn run_group(
        &self,
        group_name: &'static str,
        members: &[&'static str],
        state: &mut PipelineState,
        observer: Option<&StepObserver>,
    ) -> Result<(), PipelineError> {
        let mut futures: Vec<BoxFuture<'static, Result<StateUpdate, PipelineError>>> =
            Vec::with_capacity(members.len());
        for member in members {
            let node = self.nodes.get(member).ok_or_else(|| {
                PipelineError::InternalError(format!(
                    "Group '{}' references unknown node '{}'",
                    group_name, member
                ))
            })?;
            futures.push(node(state.clone()));
        }

        let results = join_all(futures).await;

        let mut seen_metadata_keys: HashSet<String> = HashSet::new();
        let mut seen_answer_keys: HashSet<String> = HashSet::new();
        for (member, result) in members.iter().zip(results) {
            let update = result?;

            let violations = update.cohort_violations();
            if !violations.is_empty() {
                return Err(PipelineError::MergeConflict(format!(
                    "Node '{}' in parallel group '{}' wrote single-writer fields: {:?}",
                    member, group_name, violations
                )));
            }
            for key in update.metadata.keys() {
                if !seen_metadata_keys.insert(key.clone()) {
                    return Err(PipelineError::MergeConflict(format!(
                        "Parallel group '{}': metadata key '{}' written by multiple nodes",
                        group_name, key
                    )));
                }
            }
            for key in update.previous_answers.keys() {
                if !seen_answer_keys.insert(key.clone()) {
                    return Err(PipelineError::MergeConflict(format!(
                        "Parallel group '{}': previous_answers key '{}' written by multiple nodes",
                        group_name, key
                    )));
                }
            }

            emit(observer, member, &update);
            state.apply(update);
        }
        Ok(())
    }

    fn follow_edge(
        &self,
        from: &'static str,
        state: &PipelineState,
    ) -> Result<Target, PipelineError> {
        match self.edges.get(from) {
            Some(Edge::To(target)) => Ok(*target),
            Some(Edge::Branch { decide, routes }) => {
                let label = decide(state);
                routes
                    .iter()
                    .find(|(route_label, _)| *route_label == label)
                    .map(|(_, target)| *target)
                    .ok_or_else(|| {
                        PipelineError::InternalError(format!(
                            "Graph '{}': branch at '{}' produced unknown label '{}'",
                            self.name, from, label
                        ))
                    })
            }
            None => Err(PipelineError::InternalError(format!(
                "Graph '{}': node '{}' has no outgoing edge",
                self.name, from
            ))),
        }
    }
}

fn emit(observer: Option<&StepObserver>, node: &str, update: &StateUpdate) {
    if let Some(observer) = observer {
        let step_id = update
            .current_step
            .clone()
            .unwrap_or_else(|| node.to_string());
        let _ = observer.send(StepEvent {
            step_id,
            update: update.clone(),
        });
    }
}

/// Builder for [`PhaseGraph`]. Topology errors (unknown targets, missing
/// edges, dangling entry) are caught at build time, not during a run.
pub struct PhaseGraphBuilder {
    name: &'static str,
    entry: Option<&'static str>,
    nodes: HashMap<&'static str, NodeFn>,
    groups: HashMap<&'static str, Vec<&'static str>>,
    edges: HashMap<&'static str, Edge>,
    superstep_limit: u32,
}

impl PhaseGraphBuilder {
    pub fn add_node(&mut self, name: &'static str, node: NodeFn) -> &mut Self {
        self.nodes.insert(name, node);
        self
    }

    /// Declares a parallel group: `members` run concurrently off the same
    /// state snapshot, and the group routes onward like a single node.
    pub fn add_parallel_group(
        &mut self,
        name: &'static str,
        members: &[&'static str],
    ) -> &mut Self {
        self.groups.insert(name, members.to_vec());
        self
    }

    pub fn set_entry(&mut self, name: &'static str) -> &mut Self {
        self.entry = Some(name);
        self
    }

    pub fn add_edge(&mut self, from: &'static str, to: &'static str) -> &mut Self {
        self.edges.insert(from, Edge::To(Target::Node(to)));
        self
    }

    pub fn add_edge_to_end(&mut self, from: &'static str) -> &mut Self {
        self.edges.insert(from, Edge::To(Target::End));
        self
    }

    /// Adds a conditional edge: `decide` maps the merged state to a branch
    /// label, and `routes` maps labels to targets.
    pub fn add_branch(
        &mut self,
        from: &'static str,
        decide: BranchFn,
        routes: &[(&'static str, Target)],
    ) -> &mut Self {
        self.edges.insert(
            from,
            Edge::Branch {
                decide,
                routes: routes.to_vec(),
            },
        );
        self
    }

    pub fn build(self) -> Result<PhaseGraph, PipelineError> {
        let entry = self.entry.ok_or_else(|| {
            PipelineError::InvalidConfiguration(format!("Graph '{}' has no entry point", self.name))
        })?;

        let exists = |name: &str| self.nodes.contains_key(name) || self.groups.contains_key(name);
        if !exists(entry) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "Graph '{}': entry node '{}' is not defined",
                self.name, entry
            )));
        }

        for (name, members) in &self.groups {
            for member in members {
                if !self.nodes.contains_key(member) {
                    return Err(PipelineError::InvalidConfiguration(format!(
                        "Graph '{}': group '{}' references unknown node '{}'",
                        self.name, name, member
                    )));
                }
            }
        }

        let group_members: HashSet<&str> = self
            .groups
            .values()
            .flat_map(|members| members.iter().copied())
            .collect();

        // Every routable element needs an outgoing edge; group members route
        // through their group.
        for name in self.nodes.keys().chain(self.groups.keys()) {
            if group_members.contains(name) {
                continue;
            }
            if !self.edges.contains_key(name) {
                return Err(PipelineError::InvalidConfiguration(format!(
                    "Graph '{}': node '{}' has no outgoing edge",
                    self.name, name
                )));
            }
        }

        for (from, edge) in &self.edges {
            let targets: Vec<Target> = match edge {
                Edge::To(target) => vec![*target],
                Edge::Branch { routes, .. } => routes.iter().map(|(_, t)| *t).collect(),
            };
            for target in targets {
                if let Target::Node(to) = target {
                    if !exists(to) {
                        return Err(PipelineError::InvalidConfiguration(format!(
                            "Graph '{}': edge from '{}' targets unknown node '{}'",
                            self.name, from, to
                        )));
                    }
                }
            }
        }

        Ok(PhaseGraph {
            name: self.name,
            entry,
            nodes: self.nodes,
            groups: self.groups,
            edges: self.edges,
            superstep_limit: self.superstep_limit,
        })
    }
}

/// Wraps an async closure into a [`NodeFn`].
pub fn node_fn<F, Fut>(f: F) -> NodeFn
where
    F: Fn(PipelineState) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<StateUpdate, PipelineError>> + Send + 'static,
{
    Arc::new(move |state| -> BoxFuture<'static, Result<StateUpdate, PipelineError>> {
        Box::pin(f(state))
    })
}

/// Wraps a predicate closure into a [`BranchFn`].
pub fn branch_fn<F>(f: F) -> BranchFn
where
    F: Fn(&PipelineState) -> &'static str + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl2schema_domain::{EntityRecord, ListUpdate};
    use serde_json::json;

    fn append_entity(name: &'static str) -> NodeFn {
        node_fn(move |_state| async move {
            let mut update = StateUpdate::default();
            update.entities = Some(ListUpdate::Append(vec![EntityRecord::new(name, "")]));
            Ok(update)
        })
    }

    #[tokio::test]
    async fn test_sequential_execution_order() {
        let mut builder = PhaseGraph::builder("test", 10);
        builder
            .add_node("a", append_entity("A"))
            .add_node("b", append_entity("B"))
            .set_entry("a")
            .add_edge("a", "b")
            .add_edge_to_end("b");
        let graph = builder.build().unwrap();

        let state = graph.run(PipelineState::seed("d"), None).await.unwrap();
        assert_eq!(state.entity_names(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_conditional_loop_with_counter() {
        // Loop a -> a until the metadata counter reaches 3, then end.
        let body = node_fn(|state: PipelineState| async move {
            let mut update = StateUpdate::default();
            let count = state.metadata_counter("iterations") + 1;
            update.set_metadata("iterations", json!(count));
            Ok(update)
        });

        let mut builder = PhaseGraph::builder("test", 20);
        builder
            .add_node("a", body)
            .set_entry("a")
            .add_branch(
                "a",
                branch_fn(|state| {
                    if state.metadata_counter("iterations") >= 3 {
                        "done"
                    } else {
                        "again"
                    }
                }),
                &[("again", Target::Node("a")), ("done", Target::End)],
            );
        let graph = builder.build().unwrap();

        let state = graph.run(PipelineState::seed("d"), None).await.unwrap();
        assert_eq!(state.metadata_counter("iterations"), 3);
    }

    #[tokio::test]
    async fn test_superstep_limit_backstop() {
        let body = node_fn(|_state| async move { Ok(StateUpdate::default()) });
        let mut builder = PhaseGraph::builder("test", 5);
        builder
            .add_node("a", body)
            .set_entry("a")
            .add_branch(
                "a",
                branch_fn(|_| "again"),
                &[("again", Target::Node("a")), ("done", Target::End)],
            );
        let graph = builder.build().unwrap();

        let err = graph.run(PipelineState::seed("d"), None).await.unwrap_err();
        assert!(err.to_string().contains("superstep limit"));
    }

    #[tokio::test]
    async fn test_parallel_group_merges_in_declaration_order() {
        let left = node_fn(|_state| async move {
            let mut update = StateUpdate::default();
            update.set_metadata("step_1_5_result", json!({"relations": []}));
            Ok(update)
        });
        let right = node_fn(|_state| async move {
            let mut update = StateUpdate::default();
            update.set_metadata("step_1_6_result", json!({"suggested_entities": []}));
            Ok(update)
        });
        let join = node_fn(|_state| async move { Ok(StateUpdate::default()) });

        let mut builder = PhaseGraph::builder("test", 10);
        builder
            .add_node("left", left)
            .add_node("right", right)
            .add_node("join", join)
            .add_parallel_group("fanout", &["left", "right"])
            .set_entry("fanout")
            .add_edge("fanout", "join")
            .add_edge_to_end("join");
        let graph = builder.build().unwrap();

        let state = graph.run(PipelineState::seed("d"), None).await.unwrap();
        assert!(state.metadata_value("step_1_5_result").is_some());
        assert!(state.metadata_value("step_1_6_result").is_some());
    }

    #[tokio::test]
    async fn test_parallel_group_rejects_single_writer_fields() {
        let bad = node_fn(|_state| async move {
            let mut update = StateUpdate::default();
            update.attributes = Some(Default::default());
            Ok(update)
        });
        let good = node_fn(|_state| async move { Ok(StateUpdate::default()) });
        let join = node_fn(|_state| async move { Ok(StateUpdate::default()) });

        let mut builder = PhaseGraph::builder("test", 10);
        builder
            .add_node("bad", bad)
            .add_node("good", good)
            .add_node("join", join)
            .add_parallel_group("fanout", &["bad", "good"])
            .set_entry("fanout")
            .add_edge("fanout", "join")
            .add_edge_to_end("join");
        let graph = builder.build().unwrap();

        let err = graph.run(PipelineState::seed("d"), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::MergeConflict(_)));
    }

    #[tokio::test]
    async fn test_parallel_group_rejects_overlapping_metadata_keys() {
        let writer = || {
            node_fn(|_state| async move {
                let mut update = StateUpdate::default();
                update.set_metadata("shared", json!(1));
                Ok(update)
            })
        };
        let join = node_fn(|_state| async move { Ok(StateUpdate::default()) });

        let mut builder = PhaseGraph::builder("test", 10);
        builder
            .add_node("w1", writer())
            .add_node("w2", writer())
            .add_node("join", join)
            .add_parallel_group("fanout", &["w1", "w2"])
            .set_entry("fanout")
            .add_edge("fanout", "join")
            .add_edge_to_end("join");
        let graph = builder.build().unwrap();

        let err = graph.run(PipelineState::seed("d"), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::MergeConflict(_)));
    }

    #[test]
    fn test_build_rejects_dangling_topology() {
        // Unknown edge target
        let mut builder = PhaseGraph::builder("test", 10);
        builder
            .add_node("a", append_entity("A"))
            .set_entry("a")
            .add_edge("a", "ghost");
        assert!(builder.build().is_err());

        // Node without outgoing edge
        let mut builder = PhaseGraph::builder("test", 10);
        builder.add_node("a", append_entity("A")).set_entry("a");
        assert!(builder.build().is_err());

        // Missing entry
        let mut builder = PhaseGraph::builder("test", 10);
        builder.add_node("a", append_entity("A")).add_edge_to_end("a");
        assert!(builder.build().is_err());
    }

    #[tokio::test]
    async fn test_observer_receives_events_in_merge_order() {
        let step = |id: &'static str| {
            node_fn(move |_state| async move {
                Ok(StateUpdate::for_step(id))
            })
        };
        let mut builder = PhaseGraph::builder("test", 10);
        builder
            .add_node("a", step("1.1"))
            .add_node("b", step("1.2"))
            .set_entry("a")
            .add_edge("a", "b")
            .add_edge_to_end("b");
        let graph = builder.build().unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        graph.run(PipelineState::seed("d"), Some(&tx)).await.unwrap();
        drop(tx);

        let mut ids = Vec::new();
        while let Some(event) = rx.recv().await {
            ids.push(event.step_id);
        }
        assert_eq!(ids, vec!["1.1", "1.2"]);
    }
}

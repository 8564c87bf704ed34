// src/flow/graph.rs

//! Dependency graph views of a flow: cycle checks, graphviz and a text tree.

use std::fmt::Write as _;

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

use crate::errors::{FlowError, Result};
use crate::status::Status;
use crate::types::NodeId;

use super::work::Work;

/// Edge direction: producer -> consumer.
pub type DependencyGraph = DiGraphMap<NodeId, ()>;

pub fn build_graph(works: &[Work]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for task in works.iter().flat_map(|w| w.iter()) {
        graph.add_node(task.id());
        for dep in task.deps() {
            graph.add_edge(dep.node, task.id(), ());
        }
    }
    graph
}

/// Fail if adding `producer -> consumer` would close a cycle.
pub fn check_new_edge(graph: &DependencyGraph, producer: NodeId, consumer: NodeId) -> Result<()> {
    if producer == consumer || has_path_connecting(graph, consumer, producer, None) {
        return Err(FlowError::DagCycle(format!(
            "adding {producer} -> {consumer} would create a cycle"
        )));
    }
    Ok(())
}

fn dot_color(status: Status) -> &'static str {
    match status {
        Status::Completed => "green",
        Status::Error => "red",
        s if s.is_critical() => "orange",
        s if s.is_active() => "lightblue",
        Status::Ready => "yellow",
        _ => "white",
    }
}

/// Graphviz rendering, one cluster per work.
pub fn to_dot(name: &str, works: &[Work]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", name.replace('"', "'"));
    let _ = writeln!(out, "  node [shape=box, style=filled];");

    for work in works.iter() {
        let _ = writeln!(out, "  subgraph cluster_w{} {{", work.index());
        let _ = writeln!(out, "    label=\"{}\";", work.name().replace('"', "'"));
        for task in work.iter() {
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\\n{}\", fillcolor={}];",
                task.id(),
                task.name().replace('"', "'"),
                task.status(),
                dot_color(task.status())
            );
        }
        let _ = writeln!(out, "  }}");
    }

    for task in works.iter().flat_map(|w| w.iter()) {
        for dep in task.deps() {
            match dep.artifact {
                Some(kind) => {
                    let _ = writeln!(
                        out,
                        "  \"{}\" -> \"{}\" [label=\"{}\"];",
                        dep.node,
                        task.id(),
                        kind
                    );
                }
                None => {
                    let _ = writeln!(out, "  \"{}\" -> \"{}\";", dep.node, task.id());
                }
            }
        }
    }
    let _ = writeln!(out, "}}");
    out
}

/// Indented tree: roots first, each consumer below its producers.
pub fn text_tree(works: &[Work]) -> String {
    let graph = build_graph(works);
    let lookup = |id: NodeId| works.get(id.work).and_then(|w| w.task(id.task));

    let mut out = String::new();
    let mut roots: Vec<NodeId> = graph
        .nodes()
        .filter(|n| graph.neighbors_directed(*n, Direction::Incoming).next().is_none())
        .collect();
    roots.sort();

    fn walk(
        graph: &DependencyGraph,
        node: NodeId,
        depth: usize,
        out: &mut String,
        label: &dyn Fn(NodeId) -> String,
    ) {
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), label(node));
        let mut children: Vec<NodeId> = graph.neighbors_directed(node, Direction::Outgoing).collect();
        children.sort();
        for child in children {
            walk(graph, child, depth + 1, out, label);
        }
    }

    let label = |id: NodeId| match lookup(id) {
        Some(task) => format!("{id} {} [{}]", task.name(), task.status()),
        None => id.to_string(),
    };
    for root in roots {
        walk(&graph, root, 0, &mut out, &label);
    }
    out
}

// Copyright © 2024 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::Instr;
use std::cmp::max;

pub mod graph {
    #[derive(Clone)]
    pub struct Edge<EdgeLabel> {
        pub label: EdgeLabel,
        pub head_idx: usize,
    }

    #[derive(Clone)]
    pub struct Node<NodeLabel, EdgeLabel> {
        pub label: NodeLabel,
        pub outgoing_edges: Vec<Edge<EdgeLabel>>,
    }

    #[derive(Clone)]
    pub struct Graph<NodeLabel, EdgeLabel> {
        pub nodes: Vec<Node<NodeLabel, EdgeLabel>>,
    }

    impl<NodeLabel, EdgeLabel> Graph<NodeLabel, EdgeLabel> {
        pub fn new(node_labels: impl Iterator<Item = NodeLabel>) -> Self {
            let nodes = node_labels
                .map(|label| Node {
                    label,
                    outgoing_edges: Vec::new(),
                })
                .collect();

            Graph { nodes }
        }
    }
}

#[derive(Default, Clone)]
pub struct NodeLabel {
    /// Longest weighted path from this node to any DAG sink.  Static
    /// priority tiebreaker: the deeper the remaining chain, the sooner we
    /// want to start it.
    pub max_delay: u32,

    /// Unscheduled predecessor count.  The node is ready at zero.
    pub num_deps: u32,

    /// The earliest virtual cycle at which this node may issue.  Raised
    /// monotonically as predecessors are scheduled.
    pub earliest_ip: u32,

    /// Issue-slot cost of the instruction.
    pub exec_cycles: u32,

    /// Some source is produced by an async texture/memory instruction.
    pub has_sy_src: bool,

    /// Some source is produced by an async shared-function instruction.
    pub has_ss_src: bool,
}

#[derive(Clone)]
pub struct EdgeLabel {
    /// Minimum cycles between the issue of the tail and the issue of the
    /// head, on top of the tail's own execution cycles.
    pub delay: u32,
}

pub type DepGraph = graph::Graph<NodeLabel, EdgeLabel>;

impl DepGraph {
    /// Add an edge, merging with an existing edge to the same head by
    /// keeping the larger delay.  Register walks visit overlapping cells
    /// more than once, so duplicates are common.
    pub fn add_edge_max_delay(
        &mut self,
        tail_idx: usize,
        head_idx: usize,
        delay: u32,
    ) {
        assert!(head_idx < self.nodes.len());
        let edges = &mut self.nodes[tail_idx].outgoing_edges;
        if let Some(e) = edges.iter_mut().find(|e| e.head_idx == head_idx) {
            e.label.delay = max(e.label.delay, delay);
        } else {
            edges.push(graph::Edge {
                label: EdgeLabel { delay },
                head_idx,
            });
        }
    }
}

/// Compute per-node in-degrees and `max_delay`, and return the initial
/// ready list (nodes with no predecessors) in original instruction order.
///
/// Edges always point from earlier to later original positions, so one
/// reverse sweep visits every node after all of its successors.
pub fn calc_statistics(g: &mut DepGraph) -> Vec<usize> {
    let mut num_deps = vec![0_u32; g.nodes.len()];
    for node in &g.nodes {
        for e in &node.outgoing_edges {
            num_deps[e.head_idx] += 1;
        }
    }

    for i in (0..g.nodes.len()).rev() {
        let mut max_delay = 0;
        for e in &g.nodes[i].outgoing_edges {
            debug_assert!(e.head_idx > i);
            let child = &g.nodes[e.head_idx].label;
            max_delay = max(max_delay, e.label.delay + child.max_delay);
        }
        let label = &mut g.nodes[i].label;
        label.max_delay = max_delay + label.exec_cycles;
        label.num_deps = num_deps[i];
    }

    (0..g.nodes.len()).filter(|&i| num_deps[i] == 0).collect()
}

pub fn save_graphviz(
    instrs: &[Box<Instr>],
    g: &DepGraph,
) -> std::io::Result<()> {
    // dot /tmp/mako_dep_graph.dot -Tsvg > /tmp/mako_dep_graph.svg

    use std::fs::File;
    use std::io::{BufWriter, Write};

    let file = File::create("/tmp/mako_dep_graph.dot")?;
    let mut w = BufWriter::new(file);

    writeln!(w, "digraph {{")?;
    for (i, instr) in instrs.iter().enumerate() {
        let l = &g.nodes[i].label;
        writeln!(w, "    {i} [label=\"{instr}\\nmax_delay={}\"];", l.max_delay)?;
    }
    for (i, node) in g.nodes.iter().enumerate() {
        for e in &node.outgoing_edges {
            writeln!(
                w,
                "    {i} -> {} [label=\"{}\"];",
                e.head_idx, e.label.delay
            )?;
        }
    }
    writeln!(w, "}}")?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_delay_follows_longest_chain() {
        // 0 -> 1 -> 3, 0 -> 2, all unit exec cost
        let mut g = DepGraph::new((0..4).map(|_| NodeLabel {
            exec_cycles: 1,
            ..Default::default()
        }));
        g.add_edge_max_delay(0, 1, 0);
        g.add_edge_max_delay(1, 3, 2);
        g.add_edge_max_delay(0, 2, 0);

        let ready = calc_statistics(&mut g);
        assert_eq!(ready, vec![0]);
        assert_eq!(g.nodes[3].label.max_delay, 1);
        assert_eq!(g.nodes[2].label.max_delay, 1);
        // Edge delays count toward the path weight
        assert_eq!(g.nodes[1].label.max_delay, 4);
        assert_eq!(g.nodes[0].label.max_delay, 5);
        assert_eq!(g.nodes[1].label.num_deps, 1);
        assert_eq!(g.nodes[3].label.num_deps, 1);
    }

    #[test]
    fn duplicate_edges_keep_the_larger_delay() {
        let mut g = DepGraph::new((0..2).map(|_| NodeLabel::default()));
        g.add_edge_max_delay(0, 1, 2);
        g.add_edge_max_delay(0, 1, 5);
        g.add_edge_max_delay(0, 1, 1);

        assert_eq!(g.nodes[0].outgoing_edges.len(), 1);
        assert_eq!(g.nodes[0].outgoing_edges[0].label.delay, 5);

        let ready = calc_statistics(&mut g);
        assert_eq!(ready, vec![0]);
        assert_eq!(g.nodes[1].label.num_deps, 1);
    }
}

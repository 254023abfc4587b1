//! Layered top-to-bottom layout.
//!
//! Each node sits on the layer given by its longest-path distance from the root.
//! Within a layer nodes are ordered by first discovery in a breadth-first walk
//! from the root, ties broken by insertion order, so the same input always yields
//! the same coordinates.

use crate::graph::{EdgeKind, Position, branch_node_id};
use crate::workflow::{ParallelBranch, StepKind, Topology, WorkflowDefinition};
use ahash::AHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// Spacing used by the [`LayoutEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Vertical distance between two layers.
    pub row_height: f64,
    /// Horizontal distance between two slots of a layer.
    pub column_width: f64,
    pub origin_x: f64,
    pub origin_y: f64,
    pub node_width: f64,
    pub node_height: f64,
    /// Margin between a loop body and its frame.
    pub loop_padding: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            row_height: 140.0,
            column_width: 260.0,
            origin_x: 0.0,
            origin_y: 0.0,
            node_width: 200.0,
            node_height: 64.0,
            loop_padding: 24.0,
        }
    }
}

/// Boundary drawn around the body of a loop step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopFrame {
    pub loop_id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The input of a layout run: node ids in insertion order and the edges that
/// constrain layering.
#[derive(Debug, Clone, Default)]
pub struct LayoutGraph {
    nodes: Vec<String>,
    index: AHashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    root: Option<usize>,
    groups: Vec<(String, Vec<String>)>,
}

impl LayoutGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node; adding an id twice keeps its first position.
    pub fn add_node(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(id.to_string());
        self.index.insert(id.to_string(), i);
        i
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Adds a layering constraint. Edges between unknown nodes are ignored.
    pub fn add_edge(&mut self, source: &str, target: &str) {
        if let (Some(&s), Some(&t)) = (self.index.get(source), self.index.get(target)) {
            if s != t {
                self.edges.push((s, t));
            }
        }
    }

    pub fn set_root(&mut self, id: &str) {
        self.root = self.index.get(id).copied();
    }

    /// Registers a loop body so a frame is computed around it.
    pub fn add_group(&mut self, loop_id: &str, members: Vec<String>) {
        self.groups.push((loop_id.to_string(), members));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The output of a layout run.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub positions: AHashMap<String, Position>,
    pub layers: AHashMap<String, usize>,
    pub frames: Vec<LoopFrame>,
    /// Nodes that could only be placed by breaking a cycle.
    pub cyclic: Vec<String>,
}

impl Layout {
    pub fn position(&self, id: &str) -> Option<Position> {
        self.positions.get(id).copied()
    }

    pub fn layer(&self, id: &str) -> Option<usize> {
        self.layers.get(id).copied()
    }
}

pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Lays out the steps of a definition (and the inline branches of its parallel
    /// steps), rooted at the entry step.
    pub fn layout_definition(&self, definition: &WorkflowDefinition) -> Layout {
        let topology = Topology::resolve(definition);
        let mut graph = LayoutGraph::new();
        add_steps(&mut graph, &topology);
        if let Some(entry) = topology.entry() {
            graph.set_root(entry);
        }
        self.arrange(&graph)
    }

    pub fn arrange(&self, graph: &LayoutGraph) -> Layout {
        let n = graph.nodes.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for &(s, t) in &graph.edges {
            successors[s].push(t);
            in_degree[t] += 1;
        }

        let discovery = discovery_order(graph, &successors);
        let rank = |i: usize| (discovery[i], i);

        // Longest-path layering with Kahn's algorithm.
        let mut layer = vec![0usize; n];
        let mut processed = vec![false; n];
        let mut processed_count = 0;
        let mut cyclic = Vec::new();
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(|i| Reverse(rank(i)))
            .collect();

        loop {
            while let Some(Reverse((_, u))) = ready.pop() {
                if processed[u] {
                    continue;
                }
                processed[u] = true;
                processed_count += 1;
                for &v in &successors[u] {
                    if processed[v] {
                        continue;
                    }
                    layer[v] = layer[v].max(layer[u] + 1);
                    in_degree[v] -= 1;
                    if in_degree[v] == 0 {
                        ready.push(Reverse(rank(v)));
                    }
                }
            }
            if processed_count == n {
                break;
            }
            // Only cycle members are left: release the earliest discovered one.
            let Some(forced) = (0..n).filter(|&i| !processed[i]).min_by_key(|&i| rank(i)) else {
                break;
            };
            tracing::warn!(node = %graph.nodes[forced], "breaking cycle during layout");
            cyclic.push(graph.nodes[forced].clone());
            in_degree[forced] = 0;
            ready.push(Reverse(rank(forced)));
        }

        let mut positions = AHashMap::with_capacity(n);
        let mut layers = AHashMap::with_capacity(n);
        let by_layer = (0..n)
            .sorted_by_key(|&i| (layer[i], rank(i)))
            .chunk_by(|&i| layer[i]);
        for (row, members) in &by_layer {
            let members: Vec<usize> = members.collect();
            let count = members.len() as f64;
            for (slot, i) in members.into_iter().enumerate() {
                let x = self.config.origin_x + (slot as f64 - (count - 1.0) / 2.0) * self.config.column_width;
                let y = self.config.origin_y + row as f64 * self.config.row_height;
                positions.insert(graph.nodes[i].clone(), Position::new(x, y));
                layers.insert(graph.nodes[i].clone(), row);
            }
        }

        let frames = graph
            .groups
            .iter()
            .filter_map(|(loop_id, members)| self.frame(loop_id, members, &positions))
            .collect();

        Layout {
            positions,
            layers,
            frames,
            cyclic,
        }
    }

    fn frame(
        &self,
        loop_id: &str,
        members: &[String],
        positions: &AHashMap<String, Position>,
    ) -> Option<LoopFrame> {
        let placed: Vec<Position> = members
            .iter()
            .filter_map(|m| positions.get(m).copied())
            .collect();
        let (min_x, max_x) = placed
            .iter()
            .map(|p| p.x)
            .minmax_by(f64::total_cmp)
            .into_option()?;
        let (min_y, max_y) = placed
            .iter()
            .map(|p| p.y)
            .minmax_by(f64::total_cmp)
            .into_option()?;
        let padding = self.config.loop_padding;
        Some(LoopFrame {
            loop_id: loop_id.to_string(),
            x: min_x - padding,
            y: min_y - padding,
            width: max_x - min_x + self.config.node_width + 2.0 * padding,
            height: max_y - min_y + self.config.node_height + 2.0 * padding,
        })
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

/// Breadth-first discovery sequence from the root, then from every node not yet
/// seen in insertion order.
fn discovery_order(graph: &LayoutGraph, successors: &[Vec<usize>]) -> Vec<usize> {
    let n = graph.nodes.len();
    let mut discovery = vec![usize::MAX; n];
    let mut seq = 0;
    let roots = graph.root.into_iter().chain(0..n);
    for root in roots {
        if discovery[root] != usize::MAX {
            continue;
        }
        discovery[root] = seq;
        seq += 1;
        let mut queue = VecDeque::from([root]);
        while let Some(u) = queue.pop_front() {
            for &v in &successors[u] {
                if discovery[v] == usize::MAX {
                    discovery[v] = seq;
                    seq += 1;
                    queue.push_back(v);
                }
            }
        }
    }
    discovery
}

/// Adds the steps of a resolved definition to a layout graph: one node per step
/// plus one per inline parallel branch, edges for every forward link, and a
/// constraint keeping each loop's exit below its body.
pub(crate) fn add_steps(graph: &mut LayoutGraph, topology: &Topology<'_>) {
    for step in topology.steps() {
        graph.add_node(&step.id);
        if let StepKind::Parallel(p) = &step.kind {
            for branch in &p.branches {
                if let ParallelBranch::Agent(agent) = branch {
                    graph.add_node(&branch_node_id(&step.id, &agent.id));
                }
            }
        }
    }

    for link in topology.links() {
        if link.kind != EdgeKind::LoopBack && !link.back_edge {
            graph.add_edge(&link.source, &link.target);
        }
    }

    for step in topology.steps() {
        let StepKind::Loop(l) = &step.kind else {
            continue;
        };
        if let (Some(last), Some(exit)) = (l.loop_steps.last(), topology.successor(step)) {
            graph.add_edge(last, exit);
        }
        graph.add_group(&step.id, l.loop_steps.clone());
    }
}

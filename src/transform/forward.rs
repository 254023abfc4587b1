use super::GraphProjector;
use crate::context::ContextIndex;
use crate::error::StructuralIssue;
use crate::graph::{
    CanvasEdge, CanvasGraph, CanvasNode, EdgeKind, NodeData, NodeKind, NodePayload,
    TRIGGER_NODE_ID, branch_node_id, edge_id, end_node_id, missing_node_id,
};
use crate::layout::{LayoutGraph, add_steps};
use crate::status::{NodeStatus, assess, assess_branch};
use crate::workflow::{BranchAgent, Endpoint, ParallelBranch, Step, StepKind, Topology};
use ahash::AHashSet;
use itertools::Itertools;

/// Nodes and edges collected during one projection, with edge ids kept unique.
#[derive(Default)]
struct Canvas {
    nodes: Vec<CanvasNode>,
    edges: Vec<CanvasEdge>,
    edge_ids: AHashSet<String>,
    layout: LayoutGraph,
}

impl Canvas {
    fn push_node(&mut self, node: CanvasNode) {
        self.layout.add_node(&node.id);
        self.nodes.push(node);
    }

    fn push_edge(&mut self, edge: CanvasEdge) {
        if self.edge_ids.insert(edge.id.clone()) {
            self.edges.push(edge);
        }
    }

    fn has_outgoing(&self, id: &str, kinds: impl Fn(EdgeKind) -> bool) -> bool {
        self.edges.iter().any(|e| e.source == id && kinds(e.kind))
    }
}

impl GraphProjector<'_> {
    /// Builds the full node/edge graph. Never fails: dangling references are routed
    /// to placeholder nodes and every structural problem is annotated on the node it
    /// concerns as well as listed in [`CanvasGraph::issues`].
    pub fn project(&self) -> CanvasGraph {
        let topology = Topology::resolve(self.definition);
        let context = ContextIndex::new(self.context);
        let mut canvas = Canvas::default();

        canvas.push_node(self.trigger_node(&topology, &context));
        add_steps(&mut canvas.layout, &topology);
        for step in topology.steps() {
            canvas.push_node(self.step_node(step, &topology, &context));
            if let StepKind::Parallel(parallel) = &step.kind {
                for branch in &parallel.branches {
                    if let ParallelBranch::Agent(agent) = branch {
                        canvas.push_node(self.branch_node(&step.id, agent, &context));
                    }
                }
            }
        }

        let missing = topology
            .entry()
            .filter(|entry| !topology.contains(entry))
            .into_iter()
            .chain(topology.links().iter().flat_map(|link| {
                let source = (link.source_kind == Endpoint::Missing).then_some(link.source.as_str());
                let target = (link.target_kind == Endpoint::Missing).then_some(link.target.as_str());
                source.into_iter().chain(target)
            }))
            .unique()
            .collect_vec();
        for reference in missing {
            canvas.push_node(self.missing_node(reference));
        }

        self.push_edges(&topology, &mut canvas);
        self.push_exits(&topology, &mut canvas);

        canvas.layout.set_root(TRIGGER_NODE_ID);
        let layout = self.engine.arrange(&canvas.layout);
        for node in &mut canvas.nodes {
            node.position = layout.position(&node.id).unwrap_or_default();
        }

        let issues = topology.issues().to_vec();
        for issue in &issues {
            annotate(&mut canvas.nodes, issue);
        }

        tracing::debug!(
            workflow = %self.definition.id,
            nodes = canvas.nodes.len(),
            edges = canvas.edges.len(),
            issues = issues.len(),
            "projected workflow graph"
        );

        CanvasGraph {
            nodes: canvas.nodes,
            edges: canvas.edges,
            frames: layout.frames,
            issues,
        }
    }

    fn push_edges(&self, topology: &Topology<'_>, canvas: &mut Canvas) {
        if let Some(entry) = topology.entry() {
            let exists = topology.contains(entry);
            let target = if exists {
                entry.to_string()
            } else {
                missing_node_id(entry)
            };
            let mut edge = CanvasEdge::new(TRIGGER_NODE_ID, &target, EdgeKind::Entry);
            edge.invalid = !exists;
            canvas.layout.add_edge(TRIGGER_NODE_ID, &target);
            canvas.push_edge(edge);
        }

        for link in topology.links() {
            let source = node_id_for(&link.source, link.source_kind);
            let target = node_id_for(&link.target, link.target_kind);
            let mut edge = CanvasEdge::new(&source, &target, link.kind);
            match (&link.key, link.kind) {
                (Some(key), EdgeKind::Branch) => edge = edge.with_label(key.clone()),
                // Repeated fan-out to one step: the branch position keeps the ids apart.
                (Some(key), _) => edge.id = edge_id(&source, &target, link.kind, Some(key)),
                (None, _) => {}
            }
            edge.invalid = link.target_kind == Endpoint::Missing || link.back_edge;

            // Step links are already layered; placeholder ones are not.
            let touches_missing =
                link.source_kind == Endpoint::Missing || link.target_kind == Endpoint::Missing;
            if touches_missing && link.kind != EdgeKind::LoopBack {
                canvas.layout.add_edge(&source, &target);
            }
            canvas.push_edge(edge);
        }
    }

    /// Terminates every path: steps and inline branches with nowhere to go get a
    /// synthetic end node, and so does the trigger of an empty workflow.
    fn push_exits(&self, topology: &Topology<'_>, canvas: &mut Canvas) {
        let candidates = canvas
            .nodes
            .iter()
            .filter(|n| n.kind.is_step() || n.kind == NodeKind::Branch)
            .filter(|n| n.kind != NodeKind::End && topology.loop_of(&n.id).is_none())
            .map(|n| (n.id.clone(), n.kind))
            .collect_vec();

        let mut exits = Vec::new();
        for (id, kind) in candidates {
            let terminated = if kind == NodeKind::Loop {
                canvas.has_outgoing(&id, |k| k == EdgeKind::LoopExit)
            } else {
                canvas.has_outgoing(&id, |k| k != EdgeKind::LoopBack)
            };
            if !terminated {
                exits.push(id);
            }
        }
        if topology.entry().is_none() {
            exits.push(TRIGGER_NODE_ID.to_string());
        }

        for id in exits {
            let exit_id = end_node_id(&id);
            canvas.push_node(self.exit_node(&id));
            canvas.layout.add_edge(&id, &exit_id);
            // A loop's exit sits below its body.
            if let Some(StepKind::Loop(l)) = topology
                .index_of(&id)
                .map(|i| &topology.definition().steps[i].kind)
            {
                if let Some(last) = l.loop_steps.last() {
                    canvas.layout.add_edge(last, &exit_id);
                }
            }
            canvas.push_edge(CanvasEdge::new(&id, &exit_id, EdgeKind::Terminal));
        }
    }

    fn trigger_node(&self, topology: &Topology<'_>, context: &ContextIndex<'_>) -> CanvasNode {
        CanvasNode {
            id: TRIGGER_NODE_ID.to_string(),
            renderer: self.registry.synthetic_renderer(NodeKind::Trigger).to_string(),
            kind: NodeKind::Trigger,
            position: Default::default(),
            data: NodeData {
                label: "Trigger".to_string(),
                status: NodeStatus::Ready,
                issues: Vec::new(),
                input: None,
                payload: NodePayload::Trigger {
                    webhook_url: context.webhook_url(&self.definition.id),
                    entry_step: topology.entry().map(str::to_string),
                },
            },
        }
    }

    fn step_node(
        &self,
        step: &Step,
        topology: &Topology<'_>,
        context: &ContextIndex<'_>,
    ) -> CanvasNode {
        let renderer = self.registry.for_step(step);
        let assessment = assess(step, |id| topology.contains(id));
        CanvasNode {
            id: step.id.clone(),
            renderer: renderer.renderer().to_string(),
            kind: renderer.kind(),
            position: Default::default(),
            data: NodeData {
                label: display_label(&step.name, &step.id),
                status: assessment.status,
                issues: assessment.reasons,
                input: step.input.clone(),
                payload: renderer.render(step, context),
            },
        }
    }

    fn branch_node(
        &self,
        parallel_id: &str,
        branch: &BranchAgent,
        context: &ContextIndex<'_>,
    ) -> CanvasNode {
        let assessment = assess_branch(branch);
        CanvasNode {
            id: branch_node_id(parallel_id, &branch.id),
            renderer: self.registry.synthetic_renderer(NodeKind::Branch).to_string(),
            kind: NodeKind::Branch,
            position: Default::default(),
            data: NodeData {
                label: display_label(&branch.name, &branch.id),
                status: assessment.status,
                issues: assessment.reasons,
                input: None,
                payload: NodePayload::Branch {
                    parallel_id: parallel_id.to_string(),
                    branch: branch.clone(),
                    agent_name: branch.agent_id.as_deref().map(|id| context.display_agent(id)),
                },
            },
        }
    }

    fn missing_node(&self, reference: &str) -> CanvasNode {
        CanvasNode {
            id: missing_node_id(reference),
            renderer: self.registry.synthetic_renderer(NodeKind::Missing).to_string(),
            kind: NodeKind::Missing,
            position: Default::default(),
            data: NodeData {
                label: format!("Missing step '{}'", reference),
                status: NodeStatus::Error,
                issues: vec![format!("step '{}' does not exist", reference)],
                input: None,
                payload: NodePayload::Missing {
                    reference: reference.to_string(),
                },
            },
        }
    }

    fn exit_node(&self, after: &str) -> CanvasNode {
        CanvasNode {
            id: end_node_id(after),
            renderer: self.registry.synthetic_renderer(NodeKind::Exit).to_string(),
            kind: NodeKind::Exit,
            position: Default::default(),
            data: NodeData {
                label: "End".to_string(),
                status: NodeStatus::Ready,
                issues: Vec::new(),
                input: None,
                payload: NodePayload::Exit {
                    after: after.to_string(),
                },
            },
        }
    }
}

fn node_id_for(id: &str, endpoint: Endpoint) -> String {
    match endpoint {
        Endpoint::Missing => missing_node_id(id),
        Endpoint::Step | Endpoint::Branch => id.to_string(),
    }
}

/// Unnamed steps are labelled with their id.
pub(super) fn display_label(name: &str, id: &str) -> String {
    if name.is_empty() {
        id.to_string()
    } else {
        name.to_string()
    }
}

/// Attaches a structural issue to the node it concerns and raises that node's status.
fn annotate(nodes: &mut [CanvasNode], issue: &StructuralIssue) {
    let (target, status) = match issue {
        // Already reported by the status classifier.
        StructuralIssue::DanglingReference { .. } => return,
        StructuralIssue::MissingEntry { .. } | StructuralIssue::NoEntry => {
            (TRIGGER_NODE_ID, NodeStatus::Error)
        }
        other => match other.node_id() {
            Some(id) => (id, NodeStatus::Error),
            None => return,
        },
    };
    if let Some(node) = nodes.iter_mut().find(|n| n.id == target) {
        node.data.status = node.data.status.max(status);
        node.data.issues.push(issue.to_string());
    }
}

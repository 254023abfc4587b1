use super::forward::display_label;
use crate::error::{ReconcileError, StructuralIssue};
use crate::graph::{CanvasEdge, CanvasGraph, CanvasNode, EdgeKind, NodeKind, NodePayload};
use crate::workflow::{
    AgentStep, BranchAgent, ConditionalStep, LoopStep, ParallelBranch, ParallelStep, Step,
    StepKind, Topology, Transition, UnsupportedStep, WorkflowDefinition,
};
use ahash::{AHashMap, AHashSet};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

/// Structural edges leaving one node, grouped by what they mean.
#[derive(Default)]
struct Outgoing<'g> {
    next: Vec<&'g CanvasEdge>,
    branches: Vec<&'g CanvasEdge>,
    fan_out: Vec<&'g CanvasEdge>,
    loop_enter: Vec<&'g CanvasEdge>,
    loop_continue: Vec<&'g CanvasEdge>,
}

/// Rebuilds a definition from an edited graph.
///
/// Node data is merged onto the matching step of the previous definition, so fields
/// the canvas never shows (timeouts, retries, error policy, unknown payloads) survive.
/// Control flow is rebuilt from the edges alone.
pub struct GraphReconciler<'g> {
    nodes: &'g [CanvasNode],
    edges: &'g [CanvasEdge],
    previous: &'g WorkflowDefinition,
}

impl<'g> GraphReconciler<'g> {
    pub fn new(
        nodes: &'g [CanvasNode],
        edges: &'g [CanvasEdge],
        previous: &'g WorkflowDefinition,
    ) -> Self {
        Self {
            nodes,
            edges,
            previous,
        }
    }

    pub fn for_graph(graph: &'g CanvasGraph, previous: &'g WorkflowDefinition) -> Self {
        Self::new(&graph.nodes, &graph.edges, previous)
    }

    /// Returns the reconciled definition, or the same best-effort definition wrapped in
    /// [`ReconcileError::Structural`] when the graph has structural problems.
    pub fn reconcile(&self) -> Result<WorkflowDefinition, ReconcileError> {
        let mut issues = Vec::new();

        let mut nodes: AHashMap<&'g str, &'g CanvasNode> = AHashMap::new();
        let mut step_ids: Vec<&'g str> = Vec::new();
        for node in self.nodes {
            if nodes.contains_key(node.id.as_str()) {
                if node.kind.is_step() {
                    issues.push(StructuralIssue::DuplicateStep {
                        step_id: node.id.clone(),
                    });
                }
                continue;
            }
            nodes.insert(node.id.as_str(), node);
            if node.kind.is_step() {
                step_ids.push(node.id.as_str());
            }
        }

        let mut entries: Vec<&'g str> = Vec::new();
        let mut outgoing: AHashMap<&'g str, Outgoing<'g>> = AHashMap::new();
        for edge in self.edges {
            if edge.kind.is_derived() || edge.kind == EdgeKind::LoopBack {
                continue;
            }
            let (source, target) = match (nodes.get(edge.source.as_str()), nodes.get(edge.target.as_str())) {
                (Some(&source), Some(&target)) => (source, target),
                (source, _) => {
                    let node_id = if source.is_none() { &edge.source } else { &edge.target };
                    issues.push(StructuralIssue::UnknownNode {
                        edge_id: edge.id.clone(),
                        node_id: node_id.clone(),
                    });
                    continue;
                }
            };
            if !edge_fits(edge.kind, source, target) {
                issues.push(misplaced(edge));
                continue;
            }
            if edge.kind == EdgeKind::Entry {
                entries.push(target.id.as_str());
                continue;
            }
            let wiring = outgoing.entry(source.id.as_str()).or_default();
            match edge.kind {
                EdgeKind::Next | EdgeKind::LoopExit => wiring.next.push(edge),
                EdgeKind::Branch => wiring.branches.push(edge),
                EdgeKind::Parallel => wiring.fan_out.push(edge),
                EdgeKind::LoopEnter => wiring.loop_enter.push(edge),
                EdgeKind::LoopContinue => wiring.loop_continue.push(edge),
                EdgeKind::Entry | EdgeKind::LoopBack | EdgeKind::Join | EdgeKind::Terminal => {}
            }
        }

        let entry = match entries.as_slice() {
            [] => {
                if !step_ids.is_empty() {
                    issues.push(StructuralIssue::NoEntry);
                }
                None
            }
            [only] => Some(*only),
            [first, ..] => {
                issues.push(StructuralIssue::AmbiguousEntry {
                    targets: entries.iter().map(|id| reference(nodes[id])).collect(),
                });
                Some(*first)
            }
        };

        // Loop bodies first: members are sequenced by their loop, not by `next`.
        let mut bodies: AHashMap<&'g str, Vec<&'g str>> = AHashMap::new();
        let mut members: AHashSet<&'g str> = AHashSet::new();
        for &id in &step_ids {
            let Some(enter) = outgoing.get(id).map(|o| o.loop_enter.as_slice()) else {
                continue;
            };
            let Some(first) = enter.first() else {
                continue;
            };
            if enter.len() > 1 {
                issues.push(StructuralIssue::AmbiguousSuccessor {
                    step_id: id.to_string(),
                });
            }
            let mut body = vec![first.target.as_str()];
            let mut seen: AHashSet<&str> = AHashSet::from_iter([id, first.target.as_str()]);
            let mut cursor = first.target.as_str();
            while let Some(chain) = outgoing.get(cursor).map(|o| o.loop_continue.as_slice()) {
                let Some(link) = chain.first() else {
                    break;
                };
                if chain.len() > 1 {
                    issues.push(StructuralIssue::AmbiguousSuccessor {
                        step_id: reference(nodes[cursor]),
                    });
                }
                if !seen.insert(link.target.as_str()) {
                    break;
                }
                body.push(link.target.as_str());
                cursor = link.target.as_str();
            }
            members.extend(body.iter().copied());
            bodies.insert(id, body);
        }

        // Sequence targets, with misplaced and ambiguous ones reported.
        let mut successors: AHashMap<&'g str, &'g str> = AHashMap::new();
        for &id in &step_ids {
            let Some(next) = outgoing.get(id).map(|o| o.next.as_slice()) else {
                continue;
            };
            if members.contains(id) {
                issues.extend(next.iter().map(|edge| misplaced(edge)));
                continue;
            }
            if let Some(first) = next.first() {
                successors.insert(id, first.target.as_str());
            }
            if next.len() > 1 {
                issues.push(StructuralIssue::AmbiguousSuccessor {
                    step_id: id.to_string(),
                });
            }
        }

        let mut steps: AHashMap<&'g str, Step> = AHashMap::new();
        for &id in &step_ids {
            let node = nodes[id];
            let wiring = outgoing.get(id);
            let mut step = self.merge_node(node);
            match &mut step.kind {
                StepKind::Conditional(conditional) => {
                    let mut branches = BTreeMap::new();
                    for edge in wiring.map(|o| o.branches.as_slice()).unwrap_or_default() {
                        let key = edge.label.clone().unwrap_or_else(|| reference(nodes[edge.target.as_str()]));
                        if branches.contains_key(&key) {
                            issues.push(StructuralIssue::DuplicateBranchKey {
                                step_id: id.to_string(),
                                key,
                            });
                            continue;
                        }
                        branches.insert(key, reference(nodes[edge.target.as_str()]));
                    }
                    conditional.conditional_branches = branches;
                }
                StepKind::Parallel(parallel) => {
                    parallel.branches = wiring
                        .map(|o| o.fan_out.as_slice())
                        .unwrap_or_default()
                        .iter()
                        .map(|edge| parallel_branch(nodes[edge.target.as_str()]))
                        .collect();
                }
                StepKind::Loop(l) => {
                    l.loop_steps = bodies
                        .get(id)
                        .map(|body| body.iter().map(|m| reference(nodes[m])).collect())
                        .unwrap_or_default();
                }
                StepKind::Agent(_) | StepKind::End | StepKind::Unsupported(_) => {}
            }
            steps.insert(id, step);
        }

        let order = self.order(entry, &step_ids, &nodes, &outgoing, &bodies, &successors);

        let entry_reference = entry.map(|id| reference(nodes[id]));
        let entry_step = match (&self.previous.entry_step, &entry_reference) {
            (Some(_), Some(entry)) => Some(entry.clone()),
            (None, Some(entry)) if order.first().is_some_and(|first| first == entry) => None,
            (_, entry) => entry.clone(),
        };

        let mut definition = WorkflowDefinition {
            id: self.previous.id.clone(),
            name: self.previous.name.clone(),
            description: self.previous.description.clone(),
            steps: order
                .iter()
                .filter_map(|id| steps.remove(id.as_str()))
                .collect(),
            entry_step,
            version: self.previous.version,
        };

        let transitions: Vec<(usize, Transition)> = {
            let topology = Topology::resolve(&definition);
            definition
                .steps
                .iter()
                .enumerate()
                .filter(|(_, step)| {
                    !members.contains(step.id.as_str()) && !matches!(step.kind, StepKind::End)
                })
                .map(|(i, step)| {
                    let target = successors
                        .get(step.id.as_str())
                        .map(|id| reference(nodes[id]));
                    let implicit = topology.implicit_successor(step);
                    (i, transition(target.as_deref(), implicit, &step.next))
                })
                .collect()
        };
        for (i, next) in transitions {
            definition.steps[i].next = next;
        }

        let validation = Topology::resolve(&definition).issues().to_vec();
        for issue in validation {
            if !issues.contains(&issue) {
                issues.push(issue);
            }
        }

        if issues.is_empty() {
            tracing::debug!(workflow = %definition.id, steps = definition.steps.len(), "reconciled graph");
            Ok(definition)
        } else {
            tracing::warn!(
                workflow = %definition.id,
                issues = issues.len(),
                "reconciled graph with structural issues"
            );
            Err(ReconcileError::Structural {
                definition: Box::new(definition),
                issues,
            })
        }
    }

    /// The previous step with the node's editable data merged on top, or a new step
    /// built from the node alone.
    fn merge_node(&self, node: &CanvasNode) -> Step {
        let previous = self.previous.step(&node.id);
        let mut step = previous
            .cloned()
            .unwrap_or_else(|| Step::new(node.id.clone(), String::new(), StepKind::End));
        let previous_name = previous.map(|s| s.name.as_str()).unwrap_or_default();
        step.name = merged_name(&node.data.label, &node.id, previous_name);
        step.input = node.data.input.clone();
        step.kind = match &node.data.payload {
            NodePayload::Agent {
                agent_id,
                suggested_agent,
                ..
            } => StepKind::Agent(AgentStep {
                agent_id: agent_id.clone(),
                suggested_agent: suggested_agent.clone(),
            }),
            NodePayload::Parallel { aggregation, .. } => StepKind::Parallel(ParallelStep {
                branches: Vec::new(),
                aggregation: *aggregation,
            }),
            NodePayload::Conditional {
                condition_source, ..
            } => StepKind::Conditional(ConditionalStep {
                condition_source: condition_source.clone(),
                conditional_branches: BTreeMap::new(),
            }),
            NodePayload::Loop {
                max_iterations,
                exit_condition,
                ..
            } => StepKind::Loop(LoopStep {
                loop_steps: Vec::new(),
                max_iterations: *max_iterations,
                exit_condition: exit_condition.clone(),
            }),
            NodePayload::End => StepKind::End,
            NodePayload::Unsupported { step_type, fields } => StepKind::Unsupported(UnsupportedStep {
                step_type: step_type.clone(),
                payload: fields.clone(),
            }),
            // A step node carrying a synthetic payload keeps the previous kind.
            NodePayload::Trigger { .. }
            | NodePayload::Branch { .. }
            | NodePayload::Exit { .. }
            | NodePayload::Missing { .. } => {
                tracing::warn!(node = %node.id, shape = node.data.payload.shape(), "unexpected payload on step node");
                match previous {
                    Some(previous) => previous.kind.clone(),
                    None => StepKind::Agent(AgentStep::default()),
                }
            }
        };
        step
    }

    /// Kahn walk from the entry, ready steps ranked by their previous position; new
    /// steps rank after all previous ones in graph order. Unreachable steps are put back
    /// behind the step that preceded them before.
    fn order(
        &self,
        entry: Option<&'g str>,
        step_ids: &[&'g str],
        nodes: &AHashMap<&'g str, &'g CanvasNode>,
        outgoing: &AHashMap<&'g str, Outgoing<'g>>,
        bodies: &AHashMap<&'g str, Vec<&'g str>>,
        successors: &AHashMap<&'g str, &'g str>,
    ) -> Vec<String> {
        let rank: AHashMap<&str, usize> = step_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let rank = self
                    .previous
                    .step_index(id)
                    .unwrap_or(self.previous.steps.len() + i);
                (id, rank)
            })
            .collect();
        let is_step = |id: &str| nodes.get(id).is_some_and(|n| n.kind.is_step());

        let mut adjacency: AHashMap<&str, Vec<&str>> = AHashMap::new();
        for &id in step_ids {
            let mut targets: Vec<&str> = Vec::new();
            targets.extend(successors.get(id).copied());
            if let Some(wiring) = outgoing.get(id) {
                targets.extend(wiring.branches.iter().map(|e| e.target.as_str()));
                targets.extend(wiring.fan_out.iter().map(|e| e.target.as_str()));
            }
            if let Some(body) = bodies.get(id) {
                targets.extend(body.first().copied());
            }
            for target in targets {
                if is_step(target) && target != id {
                    adjacency.entry(id).or_default().push(target);
                }
            }
        }
        // Loop chains run member to member; hang them on the member, not the loop.
        for body in bodies.values() {
            for pair in body.windows(2) {
                if is_step(pair[0]) && is_step(pair[1]) {
                    adjacency.entry(pair[0]).or_default().push(pair[1]);
                }
            }
        }

        let mut reachable: AHashSet<&str> = AHashSet::new();
        if let Some(entry) = entry.filter(|id| is_step(*id)) {
            let mut queue = VecDeque::from([entry]);
            reachable.insert(entry);
            while let Some(id) = queue.pop_front() {
                for &target in adjacency.get(id).map(Vec::as_slice).unwrap_or_default() {
                    if reachable.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }

        let mut in_degree: AHashMap<&str, usize> = reachable.iter().map(|&id| (id, 0)).collect();
        for &source in &reachable {
            for target in adjacency.get(source).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree += 1;
                }
            }
        }

        let mut order: Vec<&str> = Vec::with_capacity(step_ids.len());
        let mut done: AHashSet<&str> = AHashSet::new();
        let mut ready: BinaryHeap<Reverse<(usize, &str)>> = BinaryHeap::new();
        if let Some(entry) = entry.filter(|id| reachable.contains(id)) {
            ready.push(Reverse((rank[entry], entry)));
        }
        while done.len() < reachable.len() {
            while let Some(Reverse((_, id))) = ready.pop() {
                if !done.insert(id) {
                    continue;
                }
                order.push(id);
                for &target in adjacency.get(id).map(Vec::as_slice).unwrap_or_default() {
                    if done.contains(target) {
                        continue;
                    }
                    if let Some(degree) = in_degree.get_mut(target) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            ready.push(Reverse((rank[target], target)));
                        }
                    }
                }
            }
            // Whatever is left sits on a cycle: release the best ranked step.
            let Some(&forced) = reachable
                .iter()
                .filter(|id| !done.contains(*id))
                .min_by_key(|id| (rank[*id], **id))
            else {
                break;
            };
            ready.push(Reverse((rank[forced], forced)));
        }

        let mut orphans: Vec<&str> = step_ids
            .iter()
            .copied()
            .filter(|id| !done.contains(id))
            .collect();
        orphans.sort_by_key(|id| rank[id]);
        for orphan in orphans {
            let position = order
                .iter()
                .enumerate()
                .filter(|(_, id)| rank[*id] < rank[orphan])
                .max_by_key(|(_, id)| rank[*id])
                .map_or(0, |(i, _)| i + 1);
            order.insert(position, orphan);
        }

        order.into_iter().map(str::to_string).collect()
    }
}

/// Whether an edge of `kind` may run from `source` to `target`.
fn edge_fits(kind: EdgeKind, source: &CanvasNode, target: &CanvasNode) -> bool {
    let to_step = target.kind.is_step() || target.kind == NodeKind::Missing;
    match kind {
        EdgeKind::Entry => source.kind == NodeKind::Trigger && to_step,
        EdgeKind::Next => {
            matches!(
                source.kind,
                NodeKind::Agent | NodeKind::Parallel | NodeKind::Conditional | NodeKind::Unsupported
            ) && to_step
        }
        EdgeKind::Branch => source.kind == NodeKind::Conditional && to_step,
        EdgeKind::Parallel => {
            let own_branch = matches!(
                &target.data.payload,
                NodePayload::Branch { parallel_id, .. } if *parallel_id == source.id
            );
            source.kind == NodeKind::Parallel && (to_step || own_branch)
        }
        EdgeKind::LoopEnter | EdgeKind::LoopExit => source.kind == NodeKind::Loop && to_step,
        EdgeKind::LoopContinue => {
            (source.kind.is_step() || source.kind == NodeKind::Missing) && to_step
        }
        EdgeKind::LoopBack | EdgeKind::Join | EdgeKind::Terminal => true,
    }
}

fn misplaced(edge: &CanvasEdge) -> StructuralIssue {
    StructuralIssue::MisplacedEdge {
        edge_id: edge.id.clone(),
        kind: edge.kind.as_str().to_string(),
        source_id: edge.source.clone(),
    }
}

/// The step id a node stands for; placeholders stand for the id they replace.
fn reference(node: &CanvasNode) -> String {
    match &node.data.payload {
        NodePayload::Missing { reference } => reference.clone(),
        _ => node.id.clone(),
    }
}

fn parallel_branch(node: &CanvasNode) -> ParallelBranch {
    match &node.data.payload {
        NodePayload::Branch { branch, .. } => ParallelBranch::Agent(BranchAgent {
            name: merged_name(&node.data.label, &branch.id, &branch.name),
            ..branch.clone()
        }),
        _ => ParallelBranch::Step(reference(node)),
    }
}

/// Labels default to the id for unnamed steps; that default is not a rename.
fn merged_name(label: &str, id: &str, previous: &str) -> String {
    if label == display_label(previous, id) {
        previous.to_string()
    } else {
        label.to_string()
    }
}

/// Chooses how to store a step's sequence target. A target the array order already
/// implies stays implicit unless it was spelled out before.
fn transition(target: Option<&str>, implicit: Option<&str>, previous: &Transition) -> Transition {
    match target {
        Some(target) if implicit == Some(target) && previous.target() != Some(target) => {
            Transition::Implicit
        }
        Some(target) => Transition::Goto(target.to_string()),
        None if implicit.is_some() => Transition::Stop,
        None if *previous == Transition::Stop => Transition::Stop,
        None => Transition::Implicit,
    }
}

use super::definition::{ParallelBranch, Step, StepKind, Transition, WorkflowDefinition};
use crate::error::StructuralIssue;
use crate::graph::{EdgeKind, branch_node_id};
use ahash::{AHashMap, AHashSet};
use std::collections::VecDeque;

/// What a link endpoint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Step,
    /// An inline agent branch of a parallel step.
    Branch,
    /// A referenced id that is not in the definition.
    Missing,
}

/// A resolved control-flow reference between two steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub source: String,
    pub source_kind: Endpoint,
    pub target: String,
    pub target_kind: Endpoint,
    pub kind: EdgeKind,
    /// The branch key for conditional links.
    pub key: Option<String>,
    /// Set when following this link closes a cycle outside of a loop construct.
    pub back_edge: bool,
}

/// The control-flow structure of a definition: ownership, successors and links.
///
/// Every transform and the status classifier reads the definition through this view,
/// so the sequencing rules live in one place.
pub struct Topology<'a> {
    definition: &'a WorkflowDefinition,
    index: AHashMap<&'a str, usize>,
    owned: AHashSet<&'a str>,
    loop_members: AHashMap<&'a str, &'a str>,
    links: Vec<Link>,
    entry: Option<&'a str>,
    reachable: AHashSet<String>,
    issues: Vec<StructuralIssue>,
}

impl<'a> Topology<'a> {
    pub fn resolve(definition: &'a WorkflowDefinition) -> Self {
        let mut index: AHashMap<&'a str, usize> = AHashMap::new();
        let mut issues = Vec::new();
        for (i, step) in definition.steps.iter().enumerate() {
            if index.contains_key(step.id.as_str()) {
                issues.push(StructuralIssue::DuplicateStep {
                    step_id: step.id.clone(),
                });
            } else {
                index.insert(step.id.as_str(), i);
            }
        }

        let mut owned = AHashSet::new();
        let mut loop_members = AHashMap::new();
        for step in &definition.steps {
            match &step.kind {
                StepKind::Loop(l) => {
                    for member in &l.loop_steps {
                        owned.insert(member.as_str());
                        loop_members.entry(member.as_str()).or_insert(step.id.as_str());
                    }
                }
                StepKind::Parallel(p) => {
                    for branch in &p.branches {
                        if let ParallelBranch::Step(id) = branch {
                            owned.insert(id.as_str());
                        }
                    }
                }
                StepKind::Conditional(c) => {
                    owned.extend(c.conditional_branches.values().map(String::as_str));
                }
                StepKind::Agent(_) | StepKind::End | StepKind::Unsupported(_) => {}
            }
        }

        let entry = definition.entry_id();
        if let Some(entry_id) = entry {
            if !index.contains_key(entry_id) {
                issues.push(StructuralIssue::MissingEntry {
                    entry_id: entry_id.to_string(),
                });
            }
        }

        let mut topology = Self {
            definition,
            index,
            owned,
            loop_members,
            links: Vec::new(),
            entry,
            reachable: AHashSet::new(),
            issues,
        };
        topology.build_links();
        topology.detect_cycles();
        topology.compute_reachability();
        topology
    }

    pub fn definition(&self) -> &'a WorkflowDefinition {
        self.definition
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Position of the first step with this id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The steps in definition order, with later duplicates of an id skipped.
    pub fn steps(&self) -> impl Iterator<Item = &'a Step> + '_ {
        self.definition
            .steps
            .iter()
            .enumerate()
            .filter(|(i, s)| self.index.get(s.id.as_str()) == Some(i))
            .map(|(_, s)| s)
    }

    pub fn entry(&self) -> Option<&'a str> {
        self.entry
    }

    pub fn entry_exists(&self) -> bool {
        self.entry.is_some_and(|e| self.contains(e))
    }

    /// Whether a control construct (loop, parallel or conditional) claims this step.
    pub fn is_owned(&self, id: &str) -> bool {
        self.owned.contains(id)
    }

    /// The loop whose body contains this step.
    pub fn loop_of(&self, id: &str) -> Option<&'a str> {
        self.loop_members.get(id).copied()
    }

    /// The step that follows `step` when its `next` field is left implicit.
    pub fn implicit_successor(&self, step: &Step) -> Option<&'a str> {
        if self.is_owned(&step.id) {
            return None;
        }
        if !matches!(
            step.kind,
            StepKind::Agent(_) | StepKind::Parallel(_) | StepKind::Loop(_) | StepKind::Unsupported(_)
        ) {
            return None;
        }
        let position = self.index_of(&step.id)?;
        self.definition.steps[position + 1..]
            .iter()
            .find(|s| !self.is_owned(&s.id))
            .map(|s| s.id.as_str())
    }

    /// The resolved sequential successor of a step, honoring its `next` field.
    pub fn successor(&self, step: &'a Step) -> Option<&'a str> {
        if self.loop_of(&step.id).is_some() || matches!(step.kind, StepKind::End) {
            return None;
        }
        match &step.next {
            Transition::Goto(target) => Some(target.as_str()),
            Transition::Stop => None,
            Transition::Implicit => self.implicit_successor(step),
        }
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn outgoing<'s>(&'s self, id: &'s str) -> impl Iterator<Item = &'s Link> + 's {
        self.links.iter().filter(move |l| l.source == id)
    }

    /// Every id referenced by a step's control-flow fields that is absent from the definition.
    pub fn dangling_references<'s>(&self, step: &'s Step) -> Vec<&'s str> {
        step.references()
            .into_iter()
            .filter(|id| !self.contains(id))
            .collect()
    }

    pub fn is_reachable(&self, id: &str) -> bool {
        self.reachable.contains(id)
    }

    pub fn issues(&self) -> &[StructuralIssue] {
        &self.issues
    }

    fn endpoint(&self, id: &str) -> Endpoint {
        if self.contains(id) {
            Endpoint::Step
        } else {
            Endpoint::Missing
        }
    }

    fn push_link(&mut self, source: &str, source_kind: Endpoint, target: &str, kind: EdgeKind) {
        self.push_keyed(source, source_kind, target, kind, None);
    }

    fn push_keyed(
        &mut self,
        source: &str,
        source_kind: Endpoint,
        target: &str,
        kind: EdgeKind,
        key: Option<String>,
    ) {
        let target_kind = self.endpoint(target);
        if target_kind == Endpoint::Missing {
            self.report_dangling(source, target);
        }
        self.links.push(Link {
            source: source.to_string(),
            source_kind,
            target: target.to_string(),
            target_kind,
            kind,
            key,
            back_edge: false,
        });
    }

    fn push_raw(
        &mut self,
        source: &str,
        source_kind: Endpoint,
        target: &str,
        target_kind: Endpoint,
        kind: EdgeKind,
    ) {
        self.links.push(Link {
            source: source.to_string(),
            source_kind,
            target: target.to_string(),
            target_kind,
            kind,
            key: None,
            back_edge: false,
        });
    }

    fn report_dangling(&mut self, step_id: &str, missing_id: &str) {
        let issue = StructuralIssue::DanglingReference {
            step_id: step_id.to_string(),
            missing_id: missing_id.to_string(),
        };
        if !self.issues.contains(&issue) {
            tracing::warn!(step = step_id, missing = missing_id, "dangling step reference");
            self.issues.push(issue);
        }
    }

    fn build_links(&mut self) {
        let steps: Vec<&'a Step> = self.steps().collect();
        for &step in &steps {
            let id = step.id.as_str();
            let successor = self.successor(step);
            match &step.kind {
                StepKind::Agent(_) | StepKind::Unsupported(_) => {
                    if let Some(next) = successor {
                        self.push_link(id, Endpoint::Step, next, EdgeKind::Next);
                    }
                }
                StepKind::Parallel(p) => {
                    let mut seen: AHashSet<&str> = AHashSet::new();
                    for (position, branch) in p.branches.iter().enumerate() {
                        match branch {
                            ParallelBranch::Step(target) => {
                                let key = (!seen.insert(target.as_str())).then(|| position.to_string());
                                self.push_keyed(id, Endpoint::Step, target, EdgeKind::Parallel, key);
                            }
                            ParallelBranch::Agent(agent) => {
                                let branch_id = branch_node_id(id, &agent.id);
                                self.push_raw(
                                    id,
                                    Endpoint::Step,
                                    &branch_id,
                                    Endpoint::Branch,
                                    EdgeKind::Parallel,
                                );
                            }
                        }
                    }
                    if let Some(next) = successor {
                        self.push_link(id, Endpoint::Step, next, EdgeKind::Next);
                    }
                }
                StepKind::Conditional(c) => {
                    for (key, target) in &c.conditional_branches {
                        self.push_keyed(
                            id,
                            Endpoint::Step,
                            target,
                            EdgeKind::Branch,
                            Some(key.clone()),
                        );
                    }
                    if let Some(next) = successor {
                        self.push_link(id, Endpoint::Step, next, EdgeKind::Next);
                    }
                }
                StepKind::Loop(l) => {
                    if let Some(first) = l.loop_steps.first() {
                        self.push_link(id, Endpoint::Step, first, EdgeKind::LoopEnter);
                        for pair in l.loop_steps.windows(2) {
                            let (from, to) = (self.endpoint(&pair[0]), self.endpoint(&pair[1]));
                            self.push_raw(&pair[0], from, &pair[1], to, EdgeKind::LoopContinue);
                        }
                        if let Some(last) = l.loop_steps.last() {
                            let from = self.endpoint(last);
                            self.push_raw(last, from, id, Endpoint::Step, EdgeKind::LoopBack);
                        }
                        for member in &l.loop_steps {
                            if !self.contains(member) {
                                self.report_dangling(id, member);
                            }
                        }
                    }
                    if let Some(next) = successor {
                        self.push_link(id, Endpoint::Step, next, EdgeKind::LoopExit);
                    }
                }
                StepKind::End => {}
            }
        }

        // Branches with nowhere else to go rejoin at the parallel step's successor.
        let mut joins = Vec::new();
        for &step in &steps {
            let StepKind::Parallel(p) = &step.kind else {
                continue;
            };
            let Some(next) = self.successor(step) else {
                continue;
            };
            for branch in &p.branches {
                let (source, source_kind) = match branch {
                    ParallelBranch::Step(target) => {
                        if !self.contains(target) || self.has_outgoing(target) {
                            continue;
                        }
                        let ends = self
                            .definition
                            .step(target)
                            .is_some_and(|s| matches!(s.kind, StepKind::End));
                        if ends {
                            continue;
                        }
                        (target.clone(), Endpoint::Step)
                    }
                    ParallelBranch::Agent(agent) => {
                        (branch_node_id(&step.id, &agent.id), Endpoint::Branch)
                    }
                };
                joins.push((source, source_kind, next.to_string()));
            }
        }
        for (source, source_kind, next) in joins {
            let target_kind = self.endpoint(&next);
            self.push_raw(&source, source_kind, &next, target_kind, EdgeKind::Join);
        }
    }

    fn has_outgoing(&self, id: &str) -> bool {
        self.links
            .iter()
            .any(|l| l.source == id && l.kind != EdgeKind::LoopBack)
    }

    /// Marks links that close a cycle. Loop back-edges are part of the loop construct
    /// and never count.
    fn detect_cycles(&mut self) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Open,
            Done,
        }

        let mut adjacency: AHashMap<&str, Vec<usize>> = AHashMap::new();
        for (i, link) in self.links.iter().enumerate() {
            if link.kind != EdgeKind::LoopBack {
                adjacency.entry(link.source.as_str()).or_default().push(i);
            }
        }

        let mut roots: Vec<&str> = Vec::new();
        if let Some(entry) = self.entry {
            roots.push(entry);
        }
        roots.extend(self.steps().map(|s| s.id.as_str()));

        let mut marks: AHashMap<&str, Mark> = AHashMap::new();
        let mut back_edges = Vec::new();
        for root in roots {
            if marks.contains_key(root) {
                continue;
            }
            marks.insert(root, Mark::Open);
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            while let Some((node, cursor)) = stack.pop() {
                let edges = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if cursor >= edges.len() {
                    marks.insert(node, Mark::Done);
                    continue;
                }
                stack.push((node, cursor + 1));
                let link_index = edges[cursor];
                let target = self.links[link_index].target.as_str();
                match marks.get(target) {
                    Some(Mark::Open) => back_edges.push(link_index),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(target, Mark::Open);
                        stack.push((target, 0));
                    }
                }
            }
        }

        for link_index in back_edges {
            let link = &mut self.links[link_index];
            link.back_edge = true;
            let issue = StructuralIssue::Cycle {
                step_id: link.target.clone(),
            };
            if !self.issues.contains(&issue) {
                tracing::warn!(step = %link.target, "cycle detected in workflow control flow");
                self.issues.push(issue);
            }
        }
    }

    fn compute_reachability(&mut self) {
        let Some(entry) = self.entry.filter(|e| self.contains(e)) else {
            // Without a resolvable entry nothing is reachable; report each step once.
            if self.entry.is_some() {
                let orphans: Vec<String> = self.steps().map(|s| s.id.clone()).collect();
                self.issues.extend(
                    orphans
                        .into_iter()
                        .map(|step_id| StructuralIssue::Orphaned { step_id }),
                );
            }
            return;
        };

        let mut queue = VecDeque::from([entry.to_string()]);
        self.reachable.insert(entry.to_string());
        while let Some(node) = queue.pop_front() {
            for link in self.links.iter().filter(|l| l.source == node) {
                if self.reachable.insert(link.target.clone()) {
                    queue.push_back(link.target.clone());
                }
            }
        }

        let orphans: Vec<String> = self
            .steps()
            .filter(|s| !self.reachable.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();
        for step_id in orphans {
            self.issues.push(StructuralIssue::Orphaned { step_id });
        }
    }
}

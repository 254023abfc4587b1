//! The canvas interaction shell.
//!
//! An [`EditSession`] owns the working copy of the graph while a workflow is open.
//! Structural edits are applied to the graph and immediately reconciled, then the
//! graph is projected again from the reconciled definition, so derived nodes and
//! edges (end nodes, joins, placeholders) never drift from the edge set. The base
//! definition only changes on an explicit save, reload or discard.

use crate::context::GraphContext;
use crate::error::{ReconcileError, SessionError, StructuralIssue};
use crate::graph::{CanvasEdge, CanvasGraph, EdgeKind, NodeKind, NodePayload, Position};
use crate::layout::LayoutConfig;
use crate::transform::{GraphProjector, GraphReconciler};
use crate::workflow::{Step, WorkflowDefinition};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Zoom limits of the canvas viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub initial_zoom: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            min_zoom: 0.25,
            max_zoom: 2.0,
            initial_zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    View,
    Edit,
}

/// How `save` treats a graph that reconciles with structural issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePolicy {
    /// Refuse to save.
    #[default]
    Strict,
    /// Save anyway and hand the issues to the caller.
    AllowIssues,
}

/// The user's answer to a save conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local edits and save them over the remote version.
    Overwrite,
    /// Drop the local edits and continue from the remote version.
    Reload,
}

/// What happened to a definition refreshed from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUpdate {
    /// No unsaved edits: the refresh replaced the base.
    Applied,
    /// Unsaved edits exist: the refresh is held until save or discard.
    Deferred,
    /// The refresh matches the base.
    Unchanged,
}

/// A definition ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub definition: WorkflowDefinition,
    /// Issues accepted under [`SavePolicy::AllowIssues`].
    pub issues: Vec<StructuralIssue>,
}

/// In-place label editing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEdit {
    pub node_id: String,
    pub draft: String,
}

pub struct EditSession {
    base: WorkflowDefinition,
    working: WorkflowDefinition,
    context: GraphContext,
    layout: LayoutConfig,
    viewport_config: ViewportConfig,
    graph: CanvasGraph,
    mode: Mode,
    dirty: bool,
    selection: Vec<String>,
    viewport: Viewport,
    label_edit: Option<LabelEdit>,
    pinned: AHashMap<String, Position>,
    pending_remote: Option<WorkflowDefinition>,
}

impl EditSession {
    /// Opens a definition in view mode with default layout and viewport settings.
    pub fn open(definition: WorkflowDefinition, context: GraphContext) -> Self {
        Self::open_with(
            definition,
            context,
            LayoutConfig::default(),
            ViewportConfig::default(),
        )
    }

    pub fn open_with(
        definition: WorkflowDefinition,
        context: GraphContext,
        layout: LayoutConfig,
        viewport_config: ViewportConfig,
    ) -> Self {
        let viewport = Viewport {
            x: 0.0,
            y: 0.0,
            zoom: viewport_config.initial_zoom.clamp(viewport_config.min_zoom, viewport_config.max_zoom),
        };
        let mut session = Self {
            working: definition.clone(),
            base: definition,
            context,
            layout,
            viewport_config,
            graph: CanvasGraph::default(),
            mode: Mode::View,
            dirty: false,
            selection: Vec::new(),
            viewport,
            label_edit: None,
            pinned: AHashMap::new(),
            pending_remote: None,
        };
        session.project();
        tracing::debug!(workflow = %session.base.id, "opened edit session");
        session
    }

    pub fn graph(&self) -> &CanvasGraph {
        &self.graph
    }

    /// The last persisted definition.
    pub fn base(&self) -> &WorkflowDefinition {
        &self.base
    }

    /// The definition as last reconciled from the working graph.
    pub fn working(&self) -> &WorkflowDefinition {
        &self.working
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn label_edit(&self) -> Option<&LabelEdit> {
        self.label_edit.as_ref()
    }

    pub fn pending_remote(&self) -> Option<&WorkflowDefinition> {
        self.pending_remote.as_ref()
    }

    pub fn begin_edit(&mut self) {
        self.mode = Mode::Edit;
    }

    /// Moves a node. Positions are part of the view only and survive re-projection
    /// for as long as the session lives.
    pub fn move_node(&mut self, node_id: &str, position: Position) -> Result<(), SessionError> {
        self.require_edit()?;
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| SessionError::UnknownNode(node_id.to_string()))?;
        node.position = position;
        self.pinned.insert(node_id.to_string(), position);
        Ok(())
    }

    /// Connects two nodes. The edge kind follows from the source: a trigger enters,
    /// a conditional branches, a parallel fans out, a loop enters its body (or exits
    /// once the body exists), the last member of a loop body extends the body, and
    /// anything else continues in sequence. Returns the new edge id.
    pub fn connect(
        &mut self,
        source_id: &str,
        target_id: &str,
        label: Option<&str>,
    ) -> Result<String, SessionError> {
        self.require_edit()?;
        let source = self
            .graph
            .node(source_id)
            .ok_or_else(|| SessionError::UnknownNode(source_id.to_string()))?;
        let target = self
            .graph
            .node(target_id)
            .ok_or_else(|| SessionError::UnknownNode(target_id.to_string()))?;
        let invalid = |message: &str| SessionError::InvalidConnection {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            message: message.to_string(),
        };

        if source_id == target_id {
            return Err(invalid("a node cannot connect to itself"));
        }
        let target_ok = target.kind.is_step()
            || target.kind == NodeKind::Missing
            || matches!(
                &target.data.payload,
                NodePayload::Branch { parallel_id, .. } if parallel_id == source_id
            );
        if !target_ok {
            return Err(invalid("the target is not a step"));
        }

        let outgoing = |kind: EdgeKind| {
            self.graph
                .edges
                .iter()
                .filter(move |e| e.source == source_id && e.kind == kind)
        };
        let mut edges = Vec::new();
        match source.kind {
            NodeKind::Trigger => {
                self.graph.edges.retain(|e| e.kind != EdgeKind::Entry);
                edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::Entry));
            }
            NodeKind::Conditional => {
                let key = label.unwrap_or(target_id);
                if outgoing(EdgeKind::Branch).any(|e| e.label.as_deref() == Some(key)) {
                    return Err(invalid("the branch key is already used"));
                }
                edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::Branch).with_label(key));
            }
            NodeKind::Parallel => {
                if outgoing(EdgeKind::Parallel).any(|e| e.target == target_id) {
                    return Err(invalid("the branch already exists"));
                }
                edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::Parallel));
            }
            NodeKind::Loop => {
                if outgoing(EdgeKind::LoopEnter).next().is_none() {
                    edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::LoopEnter));
                    edges.push(CanvasEdge::new(target_id, source_id, EdgeKind::LoopBack));
                } else if outgoing(EdgeKind::LoopExit).next().is_none() {
                    edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::LoopExit));
                } else {
                    return Err(invalid("the loop already has a body and an exit"));
                }
            }
            NodeKind::Agent | NodeKind::Unsupported => {
                if let Some(back) = outgoing(EdgeKind::LoopBack).next() {
                    let loop_id = back.target.clone();
                    let back_id = back.id.clone();
                    self.graph.edges.retain(|e| e.id != back_id);
                    edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::LoopContinue));
                    edges.push(CanvasEdge::new(target_id, &loop_id, EdgeKind::LoopBack));
                } else if outgoing(EdgeKind::LoopContinue).next().is_some() {
                    return Err(invalid("only the last step of a loop body can extend it"));
                } else if outgoing(EdgeKind::Next).next().is_some() {
                    return Err(invalid("the step already has a successor"));
                } else {
                    edges.push(CanvasEdge::new(source_id, target_id, EdgeKind::Next));
                }
            }
            NodeKind::Branch | NodeKind::End | NodeKind::Exit | NodeKind::Missing => {
                return Err(invalid("the source cannot have successors"));
            }
        }

        let edge_id = edges.first().map(|e| e.id.clone()).unwrap_or_default();
        tracing::debug!(source = source_id, target = target_id, edge = %edge_id, "connected nodes");
        self.graph.edges.extend(edges);
        self.commit_graph();
        Ok(edge_id)
    }

    /// Removes an edge and with it the reference it stands for.
    pub fn disconnect(&mut self, edge_id: &str) -> Result<(), SessionError> {
        self.require_edit()?;
        let edge = self
            .graph
            .edge(edge_id)
            .ok_or_else(|| SessionError::UnknownEdge(edge_id.to_string()))?;
        if edge.kind.is_derived() {
            return Err(SessionError::InvalidConnection {
                source_id: edge.source.clone(),
                target_id: edge.target.clone(),
                message: "derived edges disappear with the reference they follow".to_string(),
            });
        }
        tracing::debug!(edge = edge_id, "disconnected edge");
        self.graph.edges.retain(|e| e.id != edge_id);
        self.commit_graph();
        Ok(())
    }

    /// Renames the key of a conditional branch. Returns the edge's new id.
    pub fn relabel_edge(&mut self, edge_id: &str, label: &str) -> Result<String, SessionError> {
        self.require_edit()?;
        let edge = self
            .graph
            .edge(edge_id)
            .ok_or_else(|| SessionError::UnknownEdge(edge_id.to_string()))?;
        if edge.kind != EdgeKind::Branch {
            return Err(SessionError::NotEditable(edge_id.to_string()));
        }
        let source = edge.source.clone();
        let taken = self.graph.outgoing(&source).any(|e| {
            e.kind == EdgeKind::Branch && e.id != edge_id && e.label.as_deref() == Some(label)
        });
        if taken {
            return Err(SessionError::InvalidConnection {
                source_id: source,
                target_id: edge.target.clone(),
                message: format!("branch key '{}' is already used", label),
            });
        }
        let relabelled = edge.clone().with_label(label);
        let new_id = relabelled.id.clone();
        if let Some(slot) = self.graph.edge_mut(edge_id) {
            *slot = relabelled;
        }
        self.commit_graph();
        Ok(new_id)
    }

    /// Renames a step or inline branch.
    pub fn rename_node(&mut self, node_id: &str, name: &str) -> Result<(), SessionError> {
        self.require_edit()?;
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| SessionError::UnknownNode(node_id.to_string()))?;
        if !(node.kind.is_step() || node.kind == NodeKind::Branch) {
            return Err(SessionError::NotEditable(node_id.to_string()));
        }
        node.data.label = name.to_string();
        self.commit_graph();
        Ok(())
    }

    pub fn begin_label_edit(&mut self, node_id: &str) -> Result<(), SessionError> {
        self.require_edit()?;
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| SessionError::UnknownNode(node_id.to_string()))?;
        if !(node.kind.is_step() || node.kind == NodeKind::Branch) {
            return Err(SessionError::NotEditable(node_id.to_string()));
        }
        self.label_edit = Some(LabelEdit {
            node_id: node_id.to_string(),
            draft: node.data.label.clone(),
        });
        Ok(())
    }

    pub fn update_label_draft(&mut self, draft: &str) -> Result<(), SessionError> {
        let edit = self.label_edit.as_mut().ok_or(SessionError::NoLabelEdit)?;
        edit.draft = draft.to_string();
        Ok(())
    }

    pub fn commit_label_edit(&mut self) -> Result<(), SessionError> {
        let edit = self.label_edit.take().ok_or(SessionError::NoLabelEdit)?;
        self.rename_node(&edit.node_id, &edit.draft)
    }

    pub fn cancel_label_edit(&mut self) -> Result<(), SessionError> {
        self.label_edit.take().map(|_| ()).ok_or(SessionError::NoLabelEdit)
    }

    /// Replaces the type-specific data of a node. The payload must have the node's shape.
    /// Fields that describe control flow (branch keys, loop body) follow the edges and
    /// are recomputed.
    pub fn update_node(&mut self, node_id: &str, payload: NodePayload) -> Result<(), SessionError> {
        self.require_edit()?;
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| SessionError::UnknownNode(node_id.to_string()))?;
        if !(node.kind.is_step() || node.kind == NodeKind::Branch) {
            return Err(SessionError::NotEditable(node_id.to_string()));
        }
        if node.data.payload.shape() != payload.shape() {
            return Err(SessionError::PayloadMismatch {
                node_id: node_id.to_string(),
                expected: node.data.payload.shape().to_string(),
                found: payload.shape().to_string(),
            });
        }
        node.data.payload = payload;
        self.commit_graph();
        Ok(())
    }

    /// Appends a step to the working definition. Like any appended step it follows the
    /// last step of the array when that step continues implicitly.
    pub fn add_step(&mut self, step: Step) -> Result<(), SessionError> {
        self.require_edit()?;
        if self.graph.node(&step.id).is_some() {
            return Err(SessionError::NodeExists(step.id));
        }
        tracing::debug!(step = %step.id, step_type = step.kind.tag(), "added step");
        self.working.steps.push(step);
        self.dirty = true;
        self.project();
        Ok(())
    }

    /// Deletes a step or inline branch together with every edge touching it.
    pub fn remove_node(&mut self, node_id: &str) -> Result<(), SessionError> {
        self.require_edit()?;
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| SessionError::UnknownNode(node_id.to_string()))?;
        if !(node.kind.is_step() || node.kind == NodeKind::Branch) {
            return Err(SessionError::NotEditable(node_id.to_string()));
        }
        tracing::debug!(node = node_id, "removed node");
        self.graph.nodes.retain(|n| n.id != node_id);
        self.graph
            .edges
            .retain(|e| e.source != node_id && e.target != node_id);
        self.selection.retain(|id| id != node_id);
        self.pinned.remove(node_id);
        self.commit_graph();
        Ok(())
    }

    /// Selects a node or edge. Without `additive` the previous selection is replaced.
    pub fn select(&mut self, id: &str, additive: bool) -> Result<(), SessionError> {
        if self.graph.node(id).is_none() && self.graph.edge(id).is_none() {
            return Err(SessionError::UnknownElement(id.to_string()));
        }
        if !additive {
            self.selection.clear();
        }
        if !self.selection.iter().any(|s| s == id) {
            self.selection.push(id.to_string());
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Multiplies the zoom, clamped to the configured range.
    pub fn zoom_by(&mut self, factor: f64) -> f64 {
        let zoom = self.viewport.zoom * factor;
        self.viewport.zoom = if zoom.is_finite() {
            zoom.clamp(self.viewport_config.min_zoom, self.viewport_config.max_zoom)
        } else {
            self.viewport.zoom
        };
        self.viewport.zoom
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.viewport.x += dx;
        self.viewport.y += dy;
    }

    /// Reconciles the working graph without saving.
    pub fn preview(&self) -> Result<WorkflowDefinition, ReconcileError> {
        GraphReconciler::for_graph(&self.graph, &self.working).reconcile()
    }

    /// Takes a definition refreshed from the server. While there are unsaved edits the
    /// session keeps its working copy and holds the refresh back.
    pub fn apply_remote(&mut self, remote: WorkflowDefinition) -> RemoteUpdate {
        if remote == self.base {
            return RemoteUpdate::Unchanged;
        }
        if self.dirty {
            tracing::info!(
                workflow = %remote.id,
                remote_version = ?remote.version,
                "deferring remote update while the canvas has unsaved edits"
            );
            self.pending_remote = Some(remote);
            return RemoteUpdate::Deferred;
        }
        tracing::debug!(workflow = %remote.id, "applying remote update");
        self.working = remote.clone();
        self.base = remote;
        self.pending_remote = None;
        self.project();
        RemoteUpdate::Applied
    }

    /// Produces the definition to persist from the graph as last reconciled. Fails with
    /// a conflict when a differing remote update arrived during the edit.
    pub fn save(&self, policy: SavePolicy) -> Result<SaveRequest, SessionError> {
        if let Some(remote) = &self.pending_remote {
            return Err(SessionError::Conflict {
                local_version: self.base.version,
                remote_version: remote.version,
            });
        }
        let request = match self.preview() {
            Ok(definition) => SaveRequest {
                definition,
                issues: Vec::new(),
            },
            Err(err) if policy == SavePolicy::AllowIssues => {
                let issues = err.issues().to_vec();
                SaveRequest {
                    definition: err.into_definition(),
                    issues,
                }
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(
            workflow = %request.definition.id,
            steps = request.definition.steps.len(),
            issues = request.issues.len(),
            "prepared workflow save"
        );
        Ok(request)
    }

    /// Records a successful save: the saved definition becomes the new base.
    pub fn mark_saved(&mut self, saved: WorkflowDefinition) {
        tracing::info!(workflow = %saved.id, version = ?saved.version, "workflow saved");
        self.working = saved.clone();
        self.base = saved;
        self.dirty = false;
        self.pending_remote = None;
        self.label_edit = None;
        self.project();
    }

    pub fn resolve_conflict(&mut self, resolution: Resolution) -> Result<(), SessionError> {
        let remote = self.pending_remote.take().ok_or(SessionError::NoConflict)?;
        match resolution {
            Resolution::Overwrite => {
                tracing::info!(workflow = %remote.id, "keeping local edits over remote update");
                self.base.version = remote.version;
                self.working.version = remote.version;
            }
            Resolution::Reload => {
                tracing::info!(workflow = %remote.id, "dropping local edits for remote update");
                self.working = remote.clone();
                self.base = remote;
                self.dirty = false;
                self.label_edit = None;
                self.project();
            }
        }
        Ok(())
    }

    /// Throws away unsaved edits. A remote update held back during the edit is applied.
    pub fn discard(&mut self) {
        if let Some(remote) = self.pending_remote.take() {
            self.base = remote;
        }
        tracing::debug!(workflow = %self.base.id, "discarded unsaved edits");
        self.working = self.base.clone();
        self.dirty = false;
        self.mode = Mode::View;
        self.label_edit = None;
        self.selection.clear();
        self.pinned.clear();
        self.project();
    }

    fn require_edit(&self) -> Result<(), SessionError> {
        match self.mode {
            Mode::Edit => Ok(()),
            Mode::View => Err(SessionError::ReadOnly),
        }
    }

    /// Reconciles the edited graph into the working definition and projects it again.
    fn commit_graph(&mut self) {
        self.working = match self.preview() {
            Ok(definition) => definition,
            Err(err) => {
                tracing::debug!(issues = err.issues().len(), "working graph has structural issues");
                err.into_definition()
            }
        };
        self.dirty = true;
        self.project();
    }

    fn project(&mut self) {
        let mut graph = GraphProjector::builder(&self.working, &self.context)
            .with_layout(self.layout.clone())
            .build()
            .project();
        for node in &mut graph.nodes {
            if let Some(position) = self.pinned.get(&node.id) {
                node.position = *position;
            }
        }
        let known = |id: &String| graph.node(id).is_some() || graph.edge(id).is_some();
        self.selection.retain(known);
        self.graph = graph;
    }
}

//! The renderable node/edge graph handed to the canvas.
//!
//! Nothing here is persisted: a [`CanvasGraph`] is always derived from a
//! [`WorkflowDefinition`](crate::workflow::WorkflowDefinition) and reconciled back
//! into one before saving.

pub mod registry;

pub use registry::*;

use crate::error::StructuralIssue;
use crate::layout::LoopFrame;
use crate::status::NodeStatus;
use crate::workflow::{Aggregation, BranchAgent, SuggestedAgent};
use serde::{Deserialize, Serialize};

/// Id of the synthetic trigger node every graph starts from.
pub const TRIGGER_NODE_ID: &str = "trigger";

/// Id of the synthetic end node that terminates `step_id`.
pub fn end_node_id(step_id: &str) -> String {
    format!("end:{}", step_id)
}

/// Id of the placeholder node standing in for a referenced but absent step.
pub fn missing_node_id(reference: &str) -> String {
    format!("missing:{}", reference)
}

/// Id of the node rendering an inline agent branch of a parallel step.
pub fn branch_node_id(parallel_id: &str, branch_id: &str) -> String {
    format!("{}::{}", parallel_id, branch_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Agent,
    /// Inline agent branch of a parallel step.
    Branch,
    Parallel,
    Conditional,
    Loop,
    /// An `end` step of the definition.
    End,
    /// Synthetic terminal after a step with no successor.
    Exit,
    Missing,
    Unsupported,
}

impl NodeKind {
    /// Whether nodes of this kind correspond one-to-one with definition steps.
    pub fn is_step(self) -> bool {
        matches!(
            self,
            NodeKind::Agent
                | NodeKind::Parallel
                | NodeKind::Conditional
                | NodeKind::Loop
                | NodeKind::End
                | NodeKind::Unsupported
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Trigger to entry step.
    Entry,
    Next,
    /// Conditional branch; the label carries the branch key.
    Branch,
    /// Parallel fan-out.
    Parallel,
    /// Parallel branch rejoining the parallel step's successor.
    Join,
    LoopEnter,
    LoopContinue,
    LoopBack,
    LoopExit,
    /// Step to its synthetic end node.
    Terminal,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Entry => "entry",
            EdgeKind::Next => "next",
            EdgeKind::Branch => "branch",
            EdgeKind::Parallel => "parallel",
            EdgeKind::Join => "join",
            EdgeKind::LoopEnter => "loop_enter",
            EdgeKind::LoopContinue => "loop_continue",
            EdgeKind::LoopBack => "loop_back",
            EdgeKind::LoopExit => "loop_exit",
            EdgeKind::Terminal => "terminal",
        }
    }

    /// Derived edges are redrawn on every projection and carry no structure of their own.
    pub fn is_derived(self) -> bool {
        matches!(self, EdgeKind::Join | EdgeKind::Terminal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasNode {
    pub id: String,
    /// Renderer identifier understood by the canvas.
    #[serde(rename = "type")]
    pub renderer: String,
    pub kind: NodeKind,
    pub position: Position,
    pub data: NodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub label: String,
    pub status: NodeStatus,
    /// Human-readable problems annotated on the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub payload: NodePayload,
}

/// A connector a suggested agent needs, flagged with whether it is already connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBadge {
    pub id: String,
    pub connected: bool,
}

/// The type-specific part of a node's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum NodePayload {
    Trigger {
        webhook_url: Option<String>,
        entry_step: Option<String>,
    },
    Agent {
        agent_id: Option<String>,
        agent_name: Option<String>,
        suggested_agent: Option<SuggestedAgent>,
        #[serde(default)]
        tools: Vec<ToolBadge>,
    },
    Branch {
        parallel_id: String,
        branch: BranchAgent,
        agent_name: Option<String>,
    },
    Parallel {
        aggregation: Aggregation,
        branch_count: usize,
        show_empty_state: bool,
    },
    Conditional {
        condition_source: String,
        #[serde(default)]
        branch_keys: Vec<String>,
    },
    Loop {
        max_iterations: u32,
        exit_condition: String,
        #[serde(default)]
        body: Vec<String>,
    },
    End,
    Exit {
        after: String,
    },
    Missing {
        reference: String,
    },
    Unsupported {
        step_type: String,
        #[serde(default)]
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

impl NodePayload {
    pub fn shape(&self) -> &'static str {
        match self {
            NodePayload::Trigger { .. } => "trigger",
            NodePayload::Agent { .. } => "agent",
            NodePayload::Branch { .. } => "branch",
            NodePayload::Parallel { .. } => "parallel",
            NodePayload::Conditional { .. } => "conditional",
            NodePayload::Loop { .. } => "loop",
            NodePayload::End => "end",
            NodePayload::Exit { .. } => "exit",
            NodePayload::Missing { .. } => "missing",
            NodePayload::Unsupported { .. } => "unsupported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub animated: bool,
    pub kind: EdgeKind,
    /// Set on edges that point at a missing-step placeholder or close a cycle.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invalid: bool,
}

impl CanvasEdge {
    /// Builds an edge with the canonical id for its kind and endpoints.
    pub fn new(source: &str, target: &str, kind: EdgeKind) -> Self {
        Self {
            id: edge_id(source, target, kind, None),
            source: source.to_string(),
            target: target.to_string(),
            label: None,
            animated: matches!(kind, EdgeKind::Parallel | EdgeKind::LoopBack),
            kind,
            invalid: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.id = edge_id(&self.source, &self.target, self.kind, Some(&label));
        self.label = Some(label);
        self
    }
}

/// Canonical edge id: kind, endpoints and, for keyed edges, the key.
pub fn edge_id(source: &str, target: &str, kind: EdgeKind, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}:{}:{}->{}", kind.as_str(), source, key, target),
        None => format!("{}:{}->{}", kind.as_str(), source, target),
    }
}

/// The full projection of a workflow: nodes, edges, loop frames and the
/// structural issues found while building it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasGraph {
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
    #[serde(default)]
    pub frames: Vec<LoopFrame>,
    #[serde(default, skip_deserializing)]
    pub issues: Vec<StructuralIssue>,
}

impl CanvasGraph {
    pub fn node(&self, id: &str) -> Option<&CanvasNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut CanvasNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&CanvasEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut CanvasEdge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a CanvasEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a CanvasEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Nodes that stand for definition steps, in graph order.
    pub fn step_nodes(&self) -> impl Iterator<Item = &CanvasNode> {
        self.nodes.iter().filter(|n| n.kind.is_step())
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

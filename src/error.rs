use crate::workflow::WorkflowDefinition;
use serde::Serialize;
use thiserror::Error;

/// A structural problem found while projecting or reconciling a workflow.
///
/// These are never fatal to a transform: the forward direction still renders the
/// graph and the reverse direction still returns its best-effort definition.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum StructuralIssue {
    #[error("Step '{step_id}' references '{missing_id}', which does not exist in the workflow")]
    DanglingReference { step_id: String, missing_id: String },

    #[error("Entry step '{entry_id}' does not exist in the workflow")]
    MissingEntry { entry_id: String },

    #[error("The workflow has no entry step")]
    NoEntry,

    #[error("The trigger connects to more than one step ({targets:?}); only the first is used")]
    AmbiguousEntry { targets: Vec<String> },

    #[error("Step '{step_id}' is not reachable from the entry step")]
    Orphaned { step_id: String },

    #[error("A cycle passes through step '{step_id}'")]
    Cycle { step_id: String },

    #[error("Step id '{step_id}' is used by more than one step")]
    DuplicateStep { step_id: String },

    #[error("Step '{step_id}' has more than one outgoing sequence edge; only the first is kept")]
    AmbiguousSuccessor { step_id: String },

    #[error("Conditional step '{step_id}' uses branch key '{key}' more than once")]
    DuplicateBranchKey { step_id: String, key: String },

    #[error("Edge '{edge_id}' of kind '{kind}' cannot leave node '{source_id}'")]
    MisplacedEdge {
        edge_id: String,
        kind: String,
        source_id: String,
    },

    #[error("Edge '{edge_id}' connects to unknown node '{node_id}'")]
    UnknownNode { edge_id: String, node_id: String },
}

impl StructuralIssue {
    /// The node the issue should be annotated on, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            StructuralIssue::DanglingReference { step_id, .. }
            | StructuralIssue::Orphaned { step_id }
            | StructuralIssue::Cycle { step_id }
            | StructuralIssue::DuplicateStep { step_id }
            | StructuralIssue::AmbiguousSuccessor { step_id }
            | StructuralIssue::DuplicateBranchKey { step_id, .. } => Some(step_id.as_str()),
            StructuralIssue::MisplacedEdge { source_id, .. } => Some(source_id.as_str()),
            StructuralIssue::MissingEntry { .. }
            | StructuralIssue::NoEntry
            | StructuralIssue::AmbiguousEntry { .. }
            | StructuralIssue::UnknownNode { .. } => None,
        }
    }
}

/// Returned by the graph→definition transform when the edited graph does not
/// reconcile into a clean definition. The caller decides whether to block the save.
#[derive(Error, Debug, Clone)]
pub enum ReconcileError {
    #[error("The edited graph has {} structural issue(s)", .issues.len())]
    Structural {
        definition: Box<WorkflowDefinition>,
        issues: Vec<StructuralIssue>,
    },
}

impl ReconcileError {
    pub fn issues(&self) -> &[StructuralIssue] {
        match self {
            ReconcileError::Structural { issues, .. } => issues,
        }
    }

    /// The definition reconstructed despite the issues.
    pub fn into_definition(self) -> WorkflowDefinition {
        match self {
            ReconcileError::Structural { definition, .. } => *definition,
        }
    }
}

/// Errors raised by the canvas editing session.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Node '{0}' does not exist on the canvas")]
    UnknownNode(String),

    #[error("Edge '{0}' does not exist on the canvas")]
    UnknownEdge(String),

    #[error("'{0}' matches no node or edge on the canvas")]
    UnknownElement(String),

    #[error("A node with id '{0}' already exists on the canvas")]
    NodeExists(String),

    #[error("Cannot connect '{source_id}' to '{target_id}': {message}")]
    InvalidConnection {
        source_id: String,
        target_id: String,
        message: String,
    },

    #[error("Node '{0}' is derived from the workflow and cannot be edited directly")]
    NotEditable(String),

    #[error("Node '{node_id}' expects a '{expected}' payload, got '{found}'")]
    PayloadMismatch {
        node_id: String,
        expected: String,
        found: String,
    },

    #[error("The canvas is read-only; call begin_edit first")]
    ReadOnly,

    #[error("No label edit is in progress")]
    NoLabelEdit,

    #[error(
        "The workflow was changed remotely (local version {local_version:?}, remote version {remote_version:?}); choose to overwrite or reload"
    )]
    Conflict {
        local_version: Option<u64>,
        remote_version: Option<u64>,
    },

    #[error("No remote change is pending")]
    NoConflict,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Errors that can occur while loading workflow data from an external format.
#[derive(Error, Debug, Clone)]
pub enum ConversionError {
    #[error("Failed to parse JSON: {0}")]
    JsonParseError(String),

    #[error("Could not access file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Invalid workflow data: {0}")]
    ValidationError(String),
}

//! Prelude module for convenient imports
//!
//! This module re-exports the most commonly used types and traits from the flowcanvas
//! crate. Import this module to get access to the core functionality without having to
//! import each type individually.
//!
//! # Example
//!
//! ```rust,no_run
//! use flowcanvas::prelude::*;
//!
//! # fn run_example() -> Result<()> {
//! let definition = WorkflowDefinition::from_file("path/to/workflow.json")?;
//! let context = GraphContext::from_file("path/to/context.json")?;
//!
//! let graph = to_graph(&definition, &context);
//! let reconciled = from_graph(&graph, &definition)?;
//! assert_eq!(reconciled.steps.len(), definition.steps.len());
//! # Ok(())
//! # }
//! ```

// Definition model
pub use crate::workflow::{
    Aggregation, AgentStep, BranchAgent, ConditionalStep, LoopStep, OnError, ParallelBranch,
    ParallelStep, Step, StepKind, SuggestedAgent, Topology, Transition, WorkflowDefinition,
};

// Canvas graph and type registry
pub use crate::context::GraphContext;
pub use crate::graph::{
    CanvasEdge, CanvasGraph, CanvasNode, EdgeKind, NodeData, NodeKind, NodePayload,
    NodeRegistry, NodeRenderer, Position,
};

// Transforms, layout and status
pub use crate::layout::{LayoutConfig, LayoutEngine};
pub use crate::status::{NodeStatus, classify};
pub use crate::transform::{GraphProjector, GraphReconciler, from_graph, to_graph};

// Editing session and query cache
pub use crate::cache::{CacheStats, Mutation, QueryCache, Resource, ResourceKey};
pub use crate::session::{EditSession, Resolution, SavePolicy, ViewportConfig};

// Error types
pub use crate::error::{ConversionError, ReconcileError, SessionError, StructuralIssue};

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

//! Both directions between a [`WorkflowDefinition`] and its [`CanvasGraph`].
//!
//! The forward direction ([`GraphProjector`]) is total: any definition, however
//! broken, projects to a renderable graph with its problems annotated. The reverse
//! direction ([`GraphReconciler`]) treats the edge set as the only authority for
//! control flow and reports structural problems instead of repairing them.

mod forward;
mod reverse;

pub use reverse::GraphReconciler;

use crate::context::GraphContext;
use crate::error::ReconcileError;
use crate::graph::{CanvasGraph, NodeKind, NodeRegistry, NodeRenderer};
use crate::layout::{LayoutConfig, LayoutEngine};
use crate::workflow::WorkflowDefinition;

/// Projects a definition onto the canvas.
pub struct GraphProjector<'a> {
    definition: &'a WorkflowDefinition,
    context: &'a GraphContext,
    registry: NodeRegistry,
    engine: LayoutEngine,
}

pub struct GraphProjectorBuilder<'a> {
    definition: &'a WorkflowDefinition,
    context: &'a GraphContext,
    registry: NodeRegistry,
    layout: LayoutConfig,
}

impl<'a> GraphProjector<'a> {
    pub fn builder(
        definition: &'a WorkflowDefinition,
        context: &'a GraphContext,
    ) -> GraphProjectorBuilder<'a> {
        GraphProjectorBuilder::new(definition, context)
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }
}

impl<'a> GraphProjectorBuilder<'a> {
    pub fn new(definition: &'a WorkflowDefinition, context: &'a GraphContext) -> Self {
        Self {
            definition,
            context,
            registry: NodeRegistry::new(),
            layout: LayoutConfig::default(),
        }
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    /// Registers a renderer for its step type, replacing any built-in one.
    pub fn with_renderer(mut self, renderer: Box<dyn NodeRenderer>) -> Self {
        self.registry.register(renderer);
        self
    }

    /// Renders a step type with one of the built-in renderers, e.g. a server-side
    /// `llm` step as an `agent`.
    pub fn with_type_mapping(mut self, step_type: &str, builtin_type: &str) -> Self {
        if !self.registry.map_type(step_type, builtin_type) {
            tracing::warn!(step_type, builtin_type, "ignoring mapping to unknown step type");
        }
        self
    }

    /// Changes the renderer id of a synthetic node kind (trigger, branch, exit, missing).
    pub fn with_renderer_id(mut self, kind: NodeKind, renderer: &str) -> Self {
        self.registry.set_synthetic_renderer(kind, renderer);
        self
    }

    pub fn build(self) -> GraphProjector<'a> {
        GraphProjector {
            definition: self.definition,
            context: self.context,
            registry: self.registry,
            engine: LayoutEngine::new(self.layout),
        }
    }
}

/// Projects a definition with the default registry and layout.
pub fn to_graph(definition: &WorkflowDefinition, context: &GraphContext) -> CanvasGraph {
    GraphProjector::builder(definition, context).build().project()
}

/// Reconciles an edited graph back into a definition, carrying over everything the
/// canvas does not show from `previous`.
pub fn from_graph(
    graph: &CanvasGraph,
    previous: &WorkflowDefinition,
) -> Result<WorkflowDefinition, ReconcileError> {
    GraphReconciler::for_graph(graph, previous).reconcile()
}

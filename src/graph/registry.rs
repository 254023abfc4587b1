use super::{NodeKind, NodePayload, ToolBadge};
use crate::context::ContextIndex;
use crate::workflow::{Step, StepKind};
use ahash::AHashMap;

/// Turns one step kind into a renderable node: the renderer identifier the canvas
/// understands and the typed data payload that renderer needs.
pub trait NodeRenderer: Send + Sync {
    /// The step `type` tag handled by this renderer.
    fn step_type(&self) -> &str;
    fn renderer(&self) -> &str;
    fn kind(&self) -> NodeKind;
    fn render(&self, step: &Step, context: &ContextIndex<'_>) -> NodePayload;
}

fn agent_payload(step: &Step, context: &ContextIndex<'_>) -> NodePayload {
    let StepKind::Agent(agent) = &step.kind else {
        return unsupported_payload(step, context);
    };
    let tools = agent
        .suggested_agent
        .iter()
        .flat_map(|s| s.tools.iter())
        .map(|tool| ToolBadge {
            id: tool.clone(),
            connected: context.is_connected(tool),
        })
        .collect();
    NodePayload::Agent {
        agent_id: agent.agent_id.clone(),
        agent_name: agent.agent_id.as_deref().map(|id| context.display_agent(id)),
        suggested_agent: agent.suggested_agent.clone(),
        tools,
    }
}

fn parallel_payload(step: &Step, context: &ContextIndex<'_>) -> NodePayload {
    let StepKind::Parallel(parallel) = &step.kind else {
        return unsupported_payload(step, context);
    };
    NodePayload::Parallel {
        aggregation: parallel.aggregation,
        branch_count: parallel.branches.len(),
        show_empty_state: parallel.branches.is_empty(),
    }
}

fn conditional_payload(step: &Step, context: &ContextIndex<'_>) -> NodePayload {
    let StepKind::Conditional(conditional) = &step.kind else {
        return unsupported_payload(step, context);
    };
    NodePayload::Conditional {
        condition_source: conditional.condition_source.clone(),
        branch_keys: conditional.conditional_branches.keys().cloned().collect(),
    }
}

fn loop_payload(step: &Step, context: &ContextIndex<'_>) -> NodePayload {
    let StepKind::Loop(l) = &step.kind else {
        return unsupported_payload(step, context);
    };
    NodePayload::Loop {
        max_iterations: l.max_iterations,
        exit_condition: l.exit_condition.clone(),
        body: l.loop_steps.clone(),
    }
}

fn end_payload(_step: &Step, _context: &ContextIndex<'_>) -> NodePayload {
    NodePayload::End
}

fn unsupported_payload(step: &Step, _context: &ContextIndex<'_>) -> NodePayload {
    match &step.kind {
        StepKind::Unsupported(u) => NodePayload::Unsupported {
            step_type: u.step_type.clone(),
            fields: u.payload.clone(),
        },
        other => NodePayload::Unsupported {
            step_type: other.tag().to_string(),
            fields: serde_json::Map::new(),
        },
    }
}

/// Defines the built-in renderers, their registration and their lookup by type tag.
macro_rules! define_node_renderers {
    ( $( ($struct_name:ident, $step_type:literal, $renderer:literal, $kind:expr, $payload:path) ),* $(,)? ) => {
        $(
            struct $struct_name;
            impl NodeRenderer for $struct_name {
                fn step_type(&self) -> &str { $step_type }
                fn renderer(&self) -> &str { $renderer }
                fn kind(&self) -> NodeKind { $kind }
                fn render(&self, step: &Step, context: &ContextIndex<'_>) -> NodePayload {
                    $payload(step, context)
                }
            }
        )*

        fn register_default_renderers(registry: &mut AHashMap<String, Box<dyn NodeRenderer>>) {
            $( registry.insert($step_type.to_string(), Box::new($struct_name)); )*
        }

        /// Creates a fresh built-in renderer for a step type tag.
        pub fn create_renderer_by_type(step_type: &str) -> Option<Box<dyn NodeRenderer>> {
            match step_type {
                $( $step_type => Some(Box::new($struct_name)), )*
                _ => None,
            }
        }
    };
}

define_node_renderers! {
    (AgentRenderer, "agent", "agentNode", NodeKind::Agent, agent_payload),
    (ParallelRenderer, "parallel", "parallelNode", NodeKind::Parallel, parallel_payload),
    (ConditionalRenderer, "conditional", "conditionalNode", NodeKind::Conditional, conditional_payload),
    (LoopRenderer, "loop", "loopNode", NodeKind::Loop, loop_payload),
    (EndRenderer, "end", "endNode", NodeKind::End, end_payload),
}

/// Fallback for step types without a registered renderer.
struct UnsupportedRenderer;

impl NodeRenderer for UnsupportedRenderer {
    fn step_type(&self) -> &str {
        "unsupported"
    }
    fn renderer(&self) -> &str {
        "unsupportedNode"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Unsupported
    }
    fn render(&self, step: &Step, context: &ContextIndex<'_>) -> NodePayload {
        unsupported_payload(step, context)
    }
}

/// The node type registry: step type tag to renderer, plus renderer ids for the
/// synthetic nodes the transforms add.
pub struct NodeRegistry {
    renderers: AHashMap<String, Box<dyn NodeRenderer>>,
    synthetic: AHashMap<NodeKind, String>,
    fallback: UnsupportedRenderer,
}

impl NodeRegistry {
    pub fn new() -> Self {
        let mut renderers: AHashMap<String, Box<dyn NodeRenderer>> = AHashMap::new();
        register_default_renderers(&mut renderers);
        let synthetic = [
            (NodeKind::Trigger, "triggerNode"),
            (NodeKind::Branch, "agentNode"),
            (NodeKind::Exit, "endNode"),
            (NodeKind::Missing, "missingStepNode"),
        ]
        .into_iter()
        .map(|(kind, renderer)| (kind, renderer.to_string()))
        .collect();
        Self {
            renderers,
            synthetic,
            fallback: UnsupportedRenderer,
        }
    }

    /// Looks up the renderer for a step type; unknown types get the generic
    /// "unsupported step" renderer instead of failing.
    pub fn lookup(&self, step_type: &str) -> &dyn NodeRenderer {
        match self.renderers.get(step_type) {
            Some(renderer) => renderer.as_ref(),
            None => {
                tracing::debug!(step_type, "no renderer registered, using fallback");
                &self.fallback
            }
        }
    }

    pub fn for_step(&self, step: &Step) -> &dyn NodeRenderer {
        self.lookup(step.kind.tag())
    }

    pub fn is_registered(&self, step_type: &str) -> bool {
        self.renderers.contains_key(step_type)
    }

    pub fn register(&mut self, renderer: Box<dyn NodeRenderer>) {
        self.renderers
            .insert(renderer.step_type().to_string(), renderer);
    }

    /// Renders steps tagged `step_type` with the built-in renderer for `builtin_type`.
    /// Returns false when `builtin_type` is not a built-in step type.
    pub fn map_type(&mut self, step_type: &str, builtin_type: &str) -> bool {
        match create_renderer_by_type(builtin_type) {
            Some(renderer) => {
                self.renderers.insert(step_type.to_string(), renderer);
                true
            }
            None => false,
        }
    }

    /// Renames the renderer used for a synthetic node kind.
    pub fn set_synthetic_renderer(&mut self, kind: NodeKind, renderer: &str) {
        self.synthetic.insert(kind, renderer.to_string());
    }

    /// Renderer id for synthetic nodes (trigger, branch, exit, missing).
    pub fn synthetic_renderer(&self, kind: NodeKind) -> &str {
        self.synthetic
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(self.fallback.renderer())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

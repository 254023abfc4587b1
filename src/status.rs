use crate::workflow::{BranchAgent, ParallelBranch, Step, StepKind, WorkflowDefinition};
use serde::{Deserialize, Serialize};

/// Readiness of a node, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Fully configured and resolvable.
    Ready,
    /// Valid but incomplete by design, e.g. an agent that is only suggested.
    Draft,
    /// Structurally valid but likely to fail at run time.
    Warning,
    /// Structurally invalid.
    Error,
}

/// A status together with the reasons that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub status: NodeStatus,
    pub reasons: Vec<String>,
}

impl Assessment {
    fn new() -> Self {
        Self {
            status: NodeStatus::Ready,
            reasons: Vec::new(),
        }
    }

    /// Records a finding; the worst status seen wins.
    fn flag(&mut self, status: NodeStatus, reason: String) {
        self.status = self.status.max(status);
        self.reasons.push(reason);
    }
}

/// Classifies a step against the definition it belongs to.
pub fn classify(step: &Step, definition: &WorkflowDefinition) -> NodeStatus {
    assess(step, |id| definition.contains_step(id)).status
}

/// Classifies a step, resolving referenced ids through `exists`.
///
/// Precedence is error, warning, draft, ready: the most severe finding decides the
/// status while every finding is kept as a reason.
pub fn assess(step: &Step, exists: impl Fn(&str) -> bool) -> Assessment {
    let mut assessment = Assessment::new();

    for reference in step.references() {
        if reference == step.id {
            assessment.flag(
                NodeStatus::Error,
                format!("step '{}' refers to itself", step.id),
            );
        } else if !exists(reference) {
            assessment.flag(
                NodeStatus::Error,
                format!("references missing step '{}'", reference),
            );
        }
    }

    match &step.kind {
        StepKind::Agent(agent) => match (&agent.agent_id, &agent.suggested_agent) {
            (Some(_), _) => {}
            (None, Some(suggested)) => assessment.flag(
                NodeStatus::Draft,
                format!("suggested agent '{}' has not been created yet", suggested.name),
            ),
            (None, None) => {
                assessment.flag(NodeStatus::Warning, "no agent assigned".to_string())
            }
        },
        StepKind::Parallel(parallel) => {
            if parallel.branches.is_empty() {
                assessment.flag(NodeStatus::Warning, "parallel step has no branches".to_string());
            }
            for branch in &parallel.branches {
                if let ParallelBranch::Agent(agent) = branch {
                    if agent.agent_id.is_none() {
                        assessment.flag(
                            NodeStatus::Warning,
                            format!("branch '{}' has no agent assigned", agent.id),
                        );
                    }
                }
            }
        }
        StepKind::Conditional(conditional) => {
            if conditional.conditional_branches.is_empty() {
                assessment.flag(
                    NodeStatus::Warning,
                    "conditional step has no branches".to_string(),
                );
            }
            if conditional.condition_source.trim().is_empty() {
                assessment.flag(
                    NodeStatus::Warning,
                    "conditional step has no condition source".to_string(),
                );
            }
        }
        StepKind::Loop(l) => {
            if l.loop_steps.is_empty() {
                assessment.flag(NodeStatus::Warning, "loop body is empty".to_string());
            }
            if l.max_iterations == 0 {
                assessment.flag(
                    NodeStatus::Warning,
                    "loop can never run (max iterations is 0)".to_string(),
                );
            }
        }
        StepKind::Unsupported(unsupported) => assessment.flag(
            NodeStatus::Warning,
            format!("step type '{}' is not supported by this editor", unsupported.step_type),
        ),
        StepKind::End => {}
    }

    assessment
}

/// Classifies an inline parallel branch.
pub fn assess_branch(branch: &BranchAgent) -> Assessment {
    let mut assessment = Assessment::new();
    if branch.agent_id.is_none() {
        assessment.flag(NodeStatus::Warning, "no agent assigned".to_string());
    }
    assessment
}

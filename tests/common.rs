//! Common test utilities for building workflow definitions and contexts.
use flowcanvas::prelude::*;
use std::collections::BTreeMap;

/// Context with two known agents, one connected connector and a webhook base URL.
#[allow(dead_code)]
pub fn sample_context() -> GraphContext {
    GraphContext::default()
        .with_agent("agent-1", "Summarizer")
        .with_agent("agent-2", "Reviewer")
        .with_connector("slack")
        .with_webhook_base("https://hooks.example.com/")
}

/// One configured agent step and nothing else.
#[allow(dead_code)]
pub fn single_agent_workflow() -> WorkflowDefinition {
    let mut definition = WorkflowDefinition::new("wf-single", "Single agent");
    definition
        .steps
        .push(Step::agent("summarize", "Summarize", Some("agent-1")));
    definition
}

/// `research -> draft -> done`, with run-time settings the canvas never shows.
#[allow(dead_code)]
pub fn linear_workflow() -> WorkflowDefinition {
    let mut research = Step::agent("research", "Research", Some("agent-1")).with_input("{{input}}");
    research.timeout = Some(30);
    research.retries = Some(2);
    research.on_error = OnError::Continue;

    let mut definition = WorkflowDefinition::new("wf-linear", "Linear");
    definition.description = "Research a topic and draft a summary".to_string();
    definition.version = Some(1);
    definition.steps = vec![
        research,
        Step::agent("draft", "Draft", Some("agent-2")).with_input("{{steps.research.output}}"),
        Step::new("done", "Done", StepKind::End),
    ];
    definition
}

/// `classify -> route`, where `route` branches to `escalate` or `reply`, both of
/// which jump to `done`.
#[allow(dead_code)]
pub fn branching_workflow() -> WorkflowDefinition {
    let mut branches = BTreeMap::new();
    branches.insert("urgent".to_string(), "escalate".to_string());
    branches.insert("normal".to_string(), "reply".to_string());

    let mut definition = WorkflowDefinition::new("wf-branching", "Ticket routing");
    definition.steps = vec![
        Step::agent("classify", "Classify", Some("agent-1")),
        Step::new(
            "route",
            "Route",
            StepKind::Conditional(ConditionalStep {
                condition_source: "{{steps.classify.output}}".to_string(),
                conditional_branches: branches,
            }),
        ),
        Step::agent("escalate", "Escalate", Some("agent-2"))
            .with_next(Transition::Goto("done".to_string())),
        Step::agent("reply", "Reply", Some("agent-1"))
            .with_next(Transition::Goto("done".to_string())),
        Step::new("done", "Done", StepKind::End),
    ];
    definition
}

/// `fanout` runs the `search-web` step and an inline agent branch, then `combine`.
#[allow(dead_code)]
pub fn parallel_workflow() -> WorkflowDefinition {
    let mut definition = WorkflowDefinition::new("wf-parallel", "Parallel search");
    definition.steps = vec![
        Step::new(
            "fanout",
            "Fan out",
            StepKind::Parallel(ParallelStep {
                branches: vec![
                    ParallelBranch::Step("search-web".to_string()),
                    ParallelBranch::Agent(BranchAgent {
                        id: "b1".to_string(),
                        name: "Docs search".to_string(),
                        agent_id: Some("agent-2".to_string()),
                    }),
                ],
                aggregation: Aggregation::Merge,
            }),
        ),
        Step::agent("search-web", "Search the web", Some("agent-1")),
        Step::agent("combine", "Combine", Some("agent-1")),
        Step::new("done", "Done", StepKind::End),
    ];
    definition
}

/// `refine` loops over `critique -> revise`, then `publish` ends the workflow.
#[allow(dead_code)]
pub fn loop_workflow() -> WorkflowDefinition {
    let mut definition = WorkflowDefinition::new("wf-loop", "Refinement loop");
    definition.steps = vec![
        Step::new(
            "refine",
            "Refine",
            StepKind::Loop(LoopStep {
                loop_steps: vec!["critique".to_string(), "revise".to_string()],
                max_iterations: 3,
                exit_condition: "{{steps.critique.output.score}} > 8".to_string(),
            }),
        ),
        Step::agent("critique", "Critique", Some("agent-1")),
        Step::agent("revise", "Revise", Some("agent-2")),
        Step::agent("publish", "Publish", Some("agent-1")),
    ];
    definition
}

/// A conditional whose only branch points at a step that does not exist.
#[allow(dead_code)]
pub fn dangling_workflow() -> WorkflowDefinition {
    let mut branches = BTreeMap::new();
    branches.insert("urgent".to_string(), "stepX".to_string());

    let mut definition = WorkflowDefinition::new("wf-dangling", "Dangling branch");
    definition.steps = vec![Step::new(
        "triage",
        "Triage",
        StepKind::Conditional(ConditionalStep {
            condition_source: "{{input.priority}}".to_string(),
            conditional_branches: branches,
        }),
    )];
    definition
}

/// A support workflow using every construct, written the way the web client sends it.
#[allow(dead_code)]
pub const SUPPORT_WORKFLOW_JSON: &str = r#"{
  "id": "support-triage",
  "name": "Support triage",
  "description": "Route incoming tickets and draft replies",
  "steps": [
    {"id": "intake", "name": "Intake", "type": "agent", "agentId": "agent-1", "input": "{{input}}", "timeout": 60},
    {"id": "route", "name": "Route", "type": "conditional",
     "conditionSource": "{{steps.intake.output.priority}}",
     "conditionalBranches": {"high": "research", "low": "auto-reply"}},
    {"id": "research", "name": "Research", "type": "parallel", "aggregation": "best",
     "branches": ["kb-search", {"id": "web", "name": "Web search", "agentId": "agent-2"}],
     "next": "refine"},
    {"id": "kb-search", "name": "KB search", "type": "agent", "agentId": "agent-2"},
    {"id": "refine", "name": "Refine answer", "type": "loop", "loopSteps": ["critique", "rewrite"],
     "maxIterations": 3, "exitCondition": "{{score}} >= 8", "next": "send"},
    {"id": "critique", "type": "agent", "agentId": "agent-1"},
    {"id": "rewrite", "type": "agent",
     "suggestedAgent": {"name": "Rewriter", "goal": "Polish replies", "tools": ["slack", "grammarly"]}},
    {"id": "auto-reply", "name": "Auto reply", "type": "agent", "agentId": "agent-1", "next": "send"},
    {"id": "send", "name": "Send", "type": "agent", "agentId": "agent-1", "onError": "skip"},
    {"id": "done", "type": "end"}
  ]
}"#;

/// The step ids of a definition, in array order.
#[allow(dead_code)]
pub fn step_ids(definition: &WorkflowDefinition) -> Vec<&str> {
    definition.steps.iter().map(|s| s.id.as_str()).collect()
}

/// Edge ids of a graph, sorted.
#[allow(dead_code)]
pub fn edge_ids(graph: &CanvasGraph) -> Vec<String> {
    let mut ids: Vec<String> = graph.edges.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids
}

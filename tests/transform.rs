//! Tests for the definition to graph projection and the graph to definition reconciler.
mod common;
use common::*;
use flowcanvas::context::ContextIndex;
use flowcanvas::graph::{TRIGGER_NODE_ID, end_node_id, missing_node_id};
use flowcanvas::prelude::*;

fn node<'a>(graph: &'a CanvasGraph, id: &str) -> &'a CanvasNode {
    graph
        .node(id)
        .unwrap_or_else(|| panic!("node '{}' missing from graph", id))
}

// --- Definition -> Graph ---

#[test]
fn test_single_agent_projects_three_nodes() {
    let graph = to_graph(&single_agent_workflow(), &sample_context());

    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.is_clean());

    let agent = node(&graph, "summarize");
    assert_eq!(agent.renderer, "agentNode");
    assert_eq!(agent.data.status, NodeStatus::Ready);
    assert_eq!(agent.data.label, "Summarize");

    assert_eq!(node(&graph, TRIGGER_NODE_ID).kind, NodeKind::Trigger);
    assert_eq!(node(&graph, &end_node_id("summarize")).kind, NodeKind::Exit);
    assert_eq!(
        edge_ids(&graph),
        vec![
            "entry:trigger->summarize".to_string(),
            "terminal:summarize->end:summarize".to_string(),
        ]
    );
}

#[test]
fn test_nodes_flow_top_to_bottom() {
    let graph = to_graph(&single_agent_workflow(), &sample_context());

    assert_eq!(node(&graph, TRIGGER_NODE_ID).position, Position::new(0.0, 0.0));
    assert_eq!(node(&graph, "summarize").position, Position::new(0.0, 140.0));
    assert_eq!(node(&graph, "end:summarize").position, Position::new(0.0, 280.0));
}

#[test]
fn test_trigger_carries_webhook_and_entry() {
    let graph = to_graph(&single_agent_workflow(), &sample_context());

    let NodePayload::Trigger {
        webhook_url,
        entry_step,
    } = &node(&graph, TRIGGER_NODE_ID).data.payload
    else {
        panic!("expected a trigger payload");
    };
    assert_eq!(webhook_url.as_deref(), Some("https://hooks.example.com/wf-single"));
    assert_eq!(entry_step.as_deref(), Some("summarize"));
}

#[test]
fn test_unknown_agent_shows_raw_id() {
    let mut definition = single_agent_workflow();
    definition.steps[0] = Step::agent("summarize", "", Some("agent-404"));
    let graph = to_graph(&definition, &sample_context());

    let agent = node(&graph, "summarize");
    assert_eq!(agent.data.label, "summarize");
    let NodePayload::Agent { agent_name, .. } = &agent.data.payload else {
        panic!("expected an agent payload");
    };
    assert_eq!(agent_name.as_deref(), Some("agent-404"));
    assert_eq!(agent.data.status, NodeStatus::Ready);
}

#[test]
fn test_empty_parallel_shows_empty_state() {
    let definition = WorkflowDefinition::from_json(
        r#"{"id": "wf", "steps": [{"id": "fan", "name": "Fan", "type": "parallel", "branches": []}]}"#,
    )
    .unwrap();
    let graph = to_graph(&definition, &GraphContext::default());

    let parallel = node(&graph, "fan");
    assert_eq!(parallel.data.status, NodeStatus::Warning);
    assert_eq!(
        parallel.data.payload,
        NodePayload::Parallel {
            aggregation: Aggregation::All,
            branch_count: 0,
            show_empty_state: true,
        }
    );
    assert!(graph.node("end:fan").is_some());
}

#[test]
fn test_dangling_branch_routes_to_placeholder() {
    let graph = to_graph(&dangling_workflow(), &sample_context());

    assert_eq!(graph.nodes.len(), 3);
    let placeholder = node(&graph, &missing_node_id("stepX"));
    assert_eq!(placeholder.kind, NodeKind::Missing);
    assert_eq!(placeholder.renderer, "missingStepNode");

    let edge = graph
        .edge("branch:triage:urgent->missing:stepX")
        .expect("branch edge to the placeholder");
    assert_eq!(edge.label.as_deref(), Some("urgent"));
    assert!(edge.invalid);

    assert_eq!(node(&graph, "triage").data.status, NodeStatus::Error);
    assert!(graph.issues.contains(&StructuralIssue::DanglingReference {
        step_id: "triage".to_string(),
        missing_id: "stepX".to_string(),
    }));
}

#[test]
fn test_conditional_edges_are_labelled() {
    let graph = to_graph(&branching_workflow(), &sample_context());

    assert_eq!(graph.nodes.len(), 6);
    assert_eq!(graph.edges.len(), 6);
    assert!(graph.is_clean());

    let labels: Vec<&str> = graph
        .outgoing("route")
        .filter_map(|e| e.label.as_deref())
        .collect();
    assert_eq!(labels, vec!["normal", "urgent"]);
    assert!(graph.outgoing("classify").all(|e| e.label.is_none()));
}

#[test]
fn test_parallel_branches_fan_out_and_join() {
    let graph = to_graph(&parallel_workflow(), &sample_context());

    let branch = node(&graph, "fanout::b1");
    assert_eq!(branch.kind, NodeKind::Branch);
    assert_eq!(branch.renderer, "agentNode");
    let NodePayload::Branch { agent_name, .. } = &branch.data.payload else {
        panic!("expected a branch payload");
    };
    assert_eq!(agent_name.as_deref(), Some("Reviewer"));

    let fan_out: Vec<&CanvasEdge> = graph
        .outgoing("fanout")
        .filter(|e| e.kind == EdgeKind::Parallel)
        .collect();
    assert_eq!(fan_out.len(), 2);
    assert!(fan_out.iter().all(|e| e.animated));

    let joins: Vec<&str> = graph
        .incoming("combine")
        .filter(|e| e.kind == EdgeKind::Join)
        .map(|e| e.source.as_str())
        .collect();
    assert_eq!(joins, vec!["search-web", "fanout::b1"]);
    // Every path ends at the explicit end step.
    assert!(graph.nodes.iter().all(|n| n.kind != NodeKind::Exit));
}

#[test]
fn test_loop_edges_and_frame() {
    let graph = to_graph(&loop_workflow(), &sample_context());

    assert_eq!(graph.nodes.len(), 6);
    assert_eq!(
        edge_ids(&graph),
        vec![
            "entry:trigger->refine".to_string(),
            "loop_back:revise->refine".to_string(),
            "loop_continue:critique->revise".to_string(),
            "loop_enter:refine->critique".to_string(),
            "loop_exit:refine->publish".to_string(),
            "terminal:publish->end:publish".to_string(),
        ]
    );
    assert!(graph.edge("loop_back:revise->refine").unwrap().animated);
    assert_eq!(graph.frames.len(), 1);
    assert_eq!(graph.frames[0].loop_id, "refine");
}

#[test]
fn test_missing_entry_is_flagged_on_trigger() {
    let mut definition = linear_workflow();
    definition.entry_step = Some("ghost".to_string());
    let graph = to_graph(&definition, &sample_context());

    let trigger = node(&graph, TRIGGER_NODE_ID);
    assert_eq!(trigger.data.status, NodeStatus::Error);
    assert!(graph.edge("entry:trigger->missing:ghost").unwrap().invalid);
    assert_eq!(node(&graph, "research").data.status, NodeStatus::Error);
    assert!(graph.issues.contains(&StructuralIssue::MissingEntry {
        entry_id: "ghost".to_string(),
    }));
}

#[test]
fn test_unreachable_step_is_an_error() {
    let mut definition = WorkflowDefinition::new("wf", "Stops early");
    definition.steps = vec![
        Step::agent("a", "A", Some("agent-1")).with_next(Transition::Stop),
        Step::agent("b", "B", Some("agent-1")),
    ];
    let graph = to_graph(&definition, &sample_context());

    assert_eq!(node(&graph, "b").data.status, NodeStatus::Error);
    assert!(graph.issues.contains(&StructuralIssue::Orphaned {
        step_id: "b".to_string(),
    }));
}

#[test]
fn test_empty_workflow_still_renders() {
    let definition = WorkflowDefinition::new("wf-empty", "Empty");
    let graph = to_graph(&definition, &GraphContext::default());

    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(edge_ids(&graph), vec!["terminal:trigger->end:trigger".to_string()]);
    assert!(graph.is_clean());
}

#[test]
fn test_cycle_is_marked_not_followed() {
    let mut definition = WorkflowDefinition::new("wf", "Cycle");
    definition.steps = vec![
        Step::agent("a", "A", Some("agent-1")).with_next(Transition::Goto("b".to_string())),
        Step::agent("b", "B", Some("agent-1")).with_next(Transition::Goto("a".to_string())),
    ];
    let graph = to_graph(&definition, &sample_context());

    assert!(graph.edge("next:b->a").unwrap().invalid);
    assert_eq!(node(&graph, "a").data.status, NodeStatus::Error);
    assert!(graph.issues.contains(&StructuralIssue::Cycle {
        step_id: "a".to_string(),
    }));
}

#[test]
fn test_projection_is_pure() {
    let definition = WorkflowDefinition::from_json(SUPPORT_WORKFLOW_JSON).unwrap();
    let context = sample_context();

    assert_eq!(to_graph(&definition, &context), to_graph(&definition, &context));
}

// --- Projector configuration ---

struct WebhookRenderer;

impl NodeRenderer for WebhookRenderer {
    fn step_type(&self) -> &str {
        "webhook"
    }
    fn renderer(&self) -> &str {
        "webhookNode"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Unsupported
    }
    fn render(&self, step: &Step, _context: &ContextIndex<'_>) -> NodePayload {
        NodePayload::Unsupported {
            step_type: step.kind.tag().to_string(),
            fields: serde_json::Map::new(),
        }
    }
}

fn custom_step_workflow(step_type: &str) -> WorkflowDefinition {
    let json = format!(
        r#"{{"id": "wf", "steps": [{{"id": "custom", "type": "{}", "url": "https://x"}}]}}"#,
        step_type
    );
    WorkflowDefinition::from_json(&json).unwrap()
}

#[test]
fn test_unknown_step_type_degrades_gracefully() {
    let graph = to_graph(&custom_step_workflow("webhook"), &GraphContext::default());

    let custom = node(&graph, "custom");
    assert_eq!(custom.renderer, "unsupportedNode");
    assert_eq!(custom.kind, NodeKind::Unsupported);
    assert_eq!(custom.data.status, NodeStatus::Warning);
    let NodePayload::Unsupported { step_type, fields } = &custom.data.payload else {
        panic!("expected an unsupported payload");
    };
    assert_eq!(step_type, "webhook");
    assert_eq!(fields["url"], "https://x");
}

#[test]
fn test_custom_renderer() {
    let definition = custom_step_workflow("webhook");
    let context = GraphContext::default();
    let projector = GraphProjector::builder(&definition, &context)
        .with_renderer(Box::new(WebhookRenderer))
        .build();

    assert!(projector.registry().is_registered("webhook"));
    assert_eq!(node(&projector.project(), "custom").renderer, "webhookNode");
}

#[test]
fn test_type_mapping_and_renderer_ids() {
    let definition = custom_step_workflow("llm");
    let context = GraphContext::default();
    let graph = GraphProjector::builder(&definition, &context)
        .with_type_mapping("llm", "agent")
        .with_type_mapping("other", "no-such-type")
        .with_renderer_id(NodeKind::Exit, "terminalNode")
        .build()
        .project();

    let custom = node(&graph, "custom");
    assert_eq!(custom.renderer, "agentNode");
    assert_eq!(custom.kind, NodeKind::Agent);
    assert_eq!(custom.data.payload.shape(), "unsupported");
    assert_eq!(node(&graph, "end:custom").renderer, "terminalNode");
}

// --- Graph -> Definition ---

#[test]
fn test_round_trip_reproduces_definitions() {
    let context = sample_context();
    for definition in [
        single_agent_workflow(),
        linear_workflow(),
        branching_workflow(),
        parallel_workflow(),
        loop_workflow(),
        WorkflowDefinition::from_json(SUPPORT_WORKFLOW_JSON).unwrap(),
    ] {
        let graph = to_graph(&definition, &context);
        let reconciled = from_graph(&graph, &definition).unwrap();
        assert_eq!(reconciled, definition, "round trip of '{}'", definition.id);
    }
}

#[test]
fn test_repeated_parallel_branch_round_trips() {
    let mut definition = WorkflowDefinition::new("wf-twice", "Run twice");
    definition.steps = vec![
        Step::new(
            "fanout",
            "Fan out",
            StepKind::Parallel(ParallelStep {
                branches: vec![
                    ParallelBranch::Step("search-web".to_string()),
                    ParallelBranch::Step("search-web".to_string()),
                ],
                aggregation: Aggregation::Merge,
            }),
        ),
        Step::agent("search-web", "Search the web", Some("agent-1")),
        Step::agent("combine", "Combine", Some("agent-1")),
        Step::new("done", "Done", StepKind::End),
    ];
    let graph = to_graph(&definition, &sample_context());

    assert!(graph.edge("parallel:fanout->search-web").is_some());
    assert!(graph.edge("parallel:fanout:1->search-web").is_some());
    assert_eq!(
        graph
            .outgoing("fanout")
            .filter(|e| e.kind == EdgeKind::Parallel)
            .count(),
        2
    );
    assert_eq!(from_graph(&graph, &definition).unwrap(), definition);
}

#[test]
fn test_hidden_fields_are_carried_over() {
    let definition = linear_workflow();
    let graph = to_graph(&definition, &sample_context());
    let reconciled = from_graph(&graph, &definition).unwrap();

    let research = reconciled.step("research").unwrap();
    assert_eq!(research.timeout, Some(30));
    assert_eq!(research.retries, Some(2));
    assert_eq!(research.on_error, OnError::Continue);
    assert_eq!(reconciled.version, Some(1));
}

#[test]
fn test_explicit_entry_is_kept() {
    let mut definition = linear_workflow();
    definition.entry_step = Some("research".to_string());
    let graph = to_graph(&definition, &sample_context());

    let reconciled = from_graph(&graph, &definition).unwrap();
    assert_eq!(reconciled.entry_step.as_deref(), Some("research"));
}

#[test]
fn test_deleting_inline_branch_edge_removes_only_that_branch() {
    let definition = parallel_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.retain(|e| e.id != "parallel:fanout->fanout::b1");

    let reconciled = from_graph(&graph, &definition).unwrap();

    let mut expected = definition.clone();
    if let StepKind::Parallel(parallel) = &mut expected.steps[0].kind {
        parallel.branches.truncate(1);
    }
    assert_eq!(reconciled, expected);
}

#[test]
fn test_deleting_conditional_edge_removes_only_that_branch() {
    let definition = branching_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.retain(|e| e.id != "branch:route:urgent->escalate");

    let err = from_graph(&graph, &definition).unwrap_err();
    assert_eq!(
        err.issues(),
        &[StructuralIssue::Orphaned {
            step_id: "escalate".to_string(),
        }]
    );

    let mut expected = definition.clone();
    if let StepKind::Conditional(conditional) = &mut expected.steps[1].kind {
        conditional.conditional_branches.remove("urgent");
    }
    assert_eq!(err.into_definition(), expected);
}

#[test]
fn test_dangling_reference_is_not_silently_dropped() {
    let definition = dangling_workflow();
    let graph = to_graph(&definition, &sample_context());

    let err = from_graph(&graph, &definition).unwrap_err();
    assert!(err.issues().contains(&StructuralIssue::DanglingReference {
        step_id: "triage".to_string(),
        missing_id: "stepX".to_string(),
    }));

    let best_effort = err.into_definition();
    let StepKind::Conditional(conditional) = &best_effort.steps[0].kind else {
        panic!("expected a conditional step");
    };
    assert_eq!(conditional.conditional_branches["urgent"], "stepX");
}

#[test]
fn test_new_node_is_spliced_into_sequence() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());

    let mut polish = node(&graph, "draft").clone();
    polish.id = "polish".to_string();
    polish.data.label = "Polish".to_string();
    polish.data.input = None;
    graph.nodes.push(polish);
    graph.edges.retain(|e| e.id != "next:draft->done");
    graph.edges.push(CanvasEdge::new("draft", "polish", EdgeKind::Next));
    graph.edges.push(CanvasEdge::new("polish", "done", EdgeKind::Next));

    let reconciled = from_graph(&graph, &definition).unwrap();

    assert_eq!(step_ids(&reconciled), vec!["research", "draft", "polish", "done"]);
    let polish = reconciled.step("polish").unwrap();
    assert_eq!(polish.name, "Polish");
    assert_eq!(polish.next, Transition::Implicit);
    let StepKind::Agent(agent) = &polish.kind else {
        panic!("expected an agent step");
    };
    assert_eq!(agent.agent_id.as_deref(), Some("agent-2"));
}

#[test]
fn test_edited_label_and_payload_are_merged() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    let draft = graph.node_mut("draft").unwrap();
    draft.data.label = "Write draft".to_string();
    if let NodePayload::Agent { agent_id, .. } = &mut draft.data.payload {
        *agent_id = None;
    }

    let reconciled = from_graph(&graph, &definition).unwrap();
    let draft = reconciled.step("draft").unwrap();
    assert_eq!(draft.name, "Write draft");
    assert_eq!(draft.input.as_deref(), Some("{{steps.research.output}}"));
    assert!(matches!(&draft.kind, StepKind::Agent(a) if a.agent_id.is_none()));
}

#[test]
fn test_jump_that_skips_ahead_becomes_explicit() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.retain(|e| e.id != "next:research->draft");
    graph.edges.push(CanvasEdge::new("research", "done", EdgeKind::Next));
    graph.edges.push(CanvasEdge::new("trigger", "draft", EdgeKind::Entry));
    graph.edges.retain(|e| e.id != "entry:trigger->research");

    let reconciled = from_graph(&graph, &definition).unwrap_err().into_definition();

    // `research` is no longer reachable, but its jump to `done` survives.
    assert_eq!(
        reconciled.step("research").unwrap().next,
        Transition::Goto("done".to_string())
    );
    assert_eq!(reconciled.entry_step.as_deref(), Some("draft"));
}

#[test]
fn test_misplaced_edge_is_reported_and_ignored() {
    let definition = loop_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.push(CanvasEdge::new("refine", "publish", EdgeKind::Next));

    let err = from_graph(&graph, &definition).unwrap_err();
    assert_eq!(
        err.issues(),
        &[StructuralIssue::MisplacedEdge {
            edge_id: "next:refine->publish".to_string(),
            kind: "next".to_string(),
            source_id: "refine".to_string(),
        }]
    );
    assert_eq!(err.into_definition(), definition);
}

#[test]
fn test_ambiguous_successor_keeps_first() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.push(CanvasEdge::new("research", "done", EdgeKind::Next));

    let err = from_graph(&graph, &definition).unwrap_err();
    assert_eq!(
        err.issues(),
        &[StructuralIssue::AmbiguousSuccessor {
            step_id: "research".to_string(),
        }]
    );
    assert_eq!(err.into_definition(), definition);
}

#[test]
fn test_edges_to_unknown_nodes_are_reported() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.push(CanvasEdge::new("draft", "ghost", EdgeKind::Next));

    let err = from_graph(&graph, &definition).unwrap_err();
    assert!(err.issues().contains(&StructuralIssue::UnknownNode {
        edge_id: "next:draft->ghost".to_string(),
        node_id: "ghost".to_string(),
    }));
}

#[test]
fn test_two_entry_edges_are_ambiguous() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.push(CanvasEdge::new("trigger", "draft", EdgeKind::Entry));

    let err = from_graph(&graph, &definition).unwrap_err();
    assert!(err.issues().contains(&StructuralIssue::AmbiguousEntry {
        targets: vec!["research".to_string(), "draft".to_string()],
    }));
}

#[test]
fn test_missing_entry_edge_is_reported() {
    let definition = linear_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph.edges.retain(|e| e.kind != EdgeKind::Entry);

    let err = from_graph(&graph, &definition).unwrap_err();
    assert!(err.issues().contains(&StructuralIssue::NoEntry));
}

#[test]
fn test_duplicate_branch_keys_are_reported() {
    let definition = branching_workflow();
    let mut graph = to_graph(&definition, &sample_context());
    graph
        .edges
        .push(CanvasEdge::new("route", "done", EdgeKind::Branch).with_label("urgent"));

    let err = from_graph(&graph, &definition).unwrap_err();
    assert!(err.issues().contains(&StructuralIssue::DuplicateBranchKey {
        step_id: "route".to_string(),
        key: "urgent".to_string(),
    }));
}

#[test]
fn test_reconciler_over_node_and_edge_slices() {
    let definition = branching_workflow();
    let graph = to_graph(&definition, &sample_context());

    let reconciled = GraphReconciler::new(&graph.nodes, &graph.edges, &definition)
        .reconcile()
        .unwrap();
    assert_eq!(reconciled, definition);
}

//! Unit tests for the definition model, status classifier, type registry and topology.
mod common;
use common::*;
use flowcanvas::context::ContextIndex;
use flowcanvas::graph::TRIGGER_NODE_ID;
use flowcanvas::prelude::*;
use flowcanvas::status::assess;
use serde_json::json;

// --- Definition serde ---

#[test]
fn test_next_field_three_states() {
    let implicit: Step = serde_json::from_value(json!({"id": "a", "type": "agent"})).unwrap();
    let stop: Step =
        serde_json::from_value(json!({"id": "a", "type": "agent", "next": null})).unwrap();
    let goto: Step =
        serde_json::from_value(json!({"id": "a", "type": "agent", "next": "b"})).unwrap();

    assert_eq!(implicit.next, Transition::Implicit);
    assert_eq!(stop.next, Transition::Stop);
    assert_eq!(goto.next, Transition::Goto("b".to_string()));

    let implicit_json = serde_json::to_value(&implicit).unwrap();
    let stop_json = serde_json::to_value(&stop).unwrap();
    assert!(implicit_json.get("next").is_none());
    assert_eq!(stop_json.get("next"), Some(&serde_json::Value::Null));
    assert_eq!(serde_json::to_value(&goto).unwrap()["next"], "b");
}

#[test]
fn test_camel_case_aliases_are_accepted() {
    let definition = WorkflowDefinition::from_json(SUPPORT_WORKFLOW_JSON).unwrap();

    let StepKind::Agent(intake) = &definition.step("intake").unwrap().kind else {
        panic!("intake should be an agent step");
    };
    assert_eq!(intake.agent_id.as_deref(), Some("agent-1"));

    let StepKind::Conditional(route) = &definition.step("route").unwrap().kind else {
        panic!("route should be a conditional step");
    };
    assert_eq!(route.condition_source, "{{steps.intake.output.priority}}");
    assert_eq!(route.conditional_branches["low"], "auto-reply");

    let StepKind::Loop(refine) = &definition.step("refine").unwrap().kind else {
        panic!("refine should be a loop step");
    };
    assert_eq!(refine.loop_steps, vec!["critique", "rewrite"]);
    assert_eq!(refine.max_iterations, 3);

    assert_eq!(definition.step("send").unwrap().on_error, OnError::Skip);
    assert_eq!(definition.step("intake").unwrap().timeout, Some(60));
}

#[test]
fn test_defaults_for_omitted_fields() {
    let definition = WorkflowDefinition::from_json(
        r#"{"id": "wf", "steps": [
            {"id": "p", "type": "parallel"},
            {"id": "l", "type": "loop", "loop_steps": []}
        ]}"#,
    )
    .unwrap();

    let StepKind::Parallel(parallel) = &definition.steps[0].kind else {
        panic!("expected a parallel step");
    };
    assert_eq!(parallel.aggregation, Aggregation::All);
    assert!(parallel.branches.is_empty());

    let StepKind::Loop(l) = &definition.steps[1].kind else {
        panic!("expected a loop step");
    };
    assert_eq!(l.max_iterations, 5);
    assert_eq!(definition.steps[0].on_error, OnError::Fail);
    assert_eq!(definition.entry_id(), Some("p"));
}

#[test]
fn test_unknown_step_type_round_trips() {
    let definition = WorkflowDefinition::from_json(
        r#"{"id": "wf", "steps": [
            {"id": "hook", "name": "Call hook", "type": "webhook_call", "url": "https://example.com", "headers": {"x-token": "abc"}, "retries": 2}
        ]}"#,
    )
    .unwrap();

    let step = &definition.steps[0];
    assert_eq!(step.kind.tag(), "webhook_call");
    assert_eq!(step.retries, Some(2));
    assert!(matches!(step.kind, StepKind::Unsupported(_)));

    let value = serde_json::to_value(&definition).unwrap();
    assert_eq!(value["steps"][0]["type"], "webhook_call");
    assert_eq!(value["steps"][0]["url"], "https://example.com");
    assert_eq!(value["steps"][0]["headers"]["x-token"], "abc");

    let reparsed: WorkflowDefinition = serde_json::from_value(value).unwrap();
    assert_eq!(reparsed, definition);
}

#[test]
fn test_inline_and_step_parallel_branches() {
    let step: Step = serde_json::from_value(json!({
        "id": "p",
        "type": "parallel",
        "branches": ["other", {"id": "b1", "name": "Inline", "agentId": "agent-9"}]
    }))
    .unwrap();

    let StepKind::Parallel(parallel) = &step.kind else {
        panic!("expected a parallel step");
    };
    assert_eq!(parallel.branches[0], ParallelBranch::Step("other".to_string()));
    let ParallelBranch::Agent(inline) = &parallel.branches[1] else {
        panic!("expected an inline agent branch");
    };
    assert_eq!(inline.agent_id.as_deref(), Some("agent-9"));
}

#[test]
fn test_invalid_definitions_are_rejected() {
    let missing_type = WorkflowDefinition::from_json(r#"{"id": "wf", "steps": [{"id": "a"}]}"#);
    assert!(matches!(missing_type, Err(ConversionError::JsonParseError(_))));

    let empty_id = WorkflowDefinition::from_json(r#"{"id": " ", "steps": []}"#);
    assert!(matches!(empty_id, Err(ConversionError::ValidationError(_))));

    let empty_step_id =
        WorkflowDefinition::from_json(r#"{"id": "wf", "steps": [{"id": "", "type": "end"}]}"#);
    assert!(matches!(empty_step_id, Err(ConversionError::ValidationError(_))));

    let no_file = WorkflowDefinition::from_file("does/not/exist.json");
    assert!(matches!(no_file, Err(ConversionError::Io { .. })));
}

#[test]
fn test_step_references() {
    let definition = branching_workflow();
    let route = definition.step("route").unwrap();
    assert_eq!(route.references(), vec!["reply", "escalate"]);

    let escalate = definition.step("escalate").unwrap();
    assert_eq!(escalate.references(), vec!["done"]);
}

// --- Status classifier ---

#[test]
fn test_classify_agent_steps() {
    let definition = single_agent_workflow();
    let ready = Step::agent("a", "A", Some("agent-1"));
    let unassigned = Step::agent("b", "B", None);
    let mut suggested = Step::agent("c", "C", None);
    if let StepKind::Agent(agent) = &mut suggested.kind {
        agent.suggested_agent = Some(SuggestedAgent {
            name: "Writer".to_string(),
            goal: "Write".to_string(),
            tools: vec![],
        });
    }

    assert_eq!(classify(&ready, &definition), NodeStatus::Ready);
    assert_eq!(classify(&unassigned, &definition), NodeStatus::Warning);
    assert_eq!(classify(&suggested, &definition), NodeStatus::Draft);
}

#[test]
fn test_classify_empty_parallel_is_warning() {
    let step = Step::new("p", "P", StepKind::Parallel(ParallelStep::default()));
    let definition = single_agent_workflow();
    assert_eq!(classify(&step, &definition), NodeStatus::Warning);
}

#[test]
fn test_classify_dangling_reference_is_error() {
    let definition = dangling_workflow();
    let triage = definition.step("triage").unwrap();

    assert_eq!(classify(triage, &definition), NodeStatus::Error);
    // Pure and idempotent.
    assert_eq!(classify(triage, &definition), classify(triage, &definition));
}

#[test]
fn test_error_outranks_warning() {
    // Dangling goto and no agent: both findings are kept, the error decides.
    let step = Step::agent("a", "A", None).with_next(Transition::Goto("ghost".to_string()));
    let assessment = assess(&step, |_| false);

    assert_eq!(assessment.status, NodeStatus::Error);
    assert_eq!(assessment.reasons.len(), 2);
}

#[test]
fn test_self_reference_is_error() {
    let step = Step::agent("a", "A", Some("agent-1")).with_next(Transition::Goto("a".to_string()));
    assert_eq!(assess(&step, |_| true).status, NodeStatus::Error);
}

#[test]
fn test_loop_without_body_is_warning() {
    let step = Step::new("l", "L", StepKind::Loop(LoopStep::default()));
    assert_eq!(assess(&step, |_| true).status, NodeStatus::Warning);
}

// --- Type registry ---

#[test]
fn test_registry_lookup_and_fallback() {
    let registry = NodeRegistry::new();

    assert_eq!(registry.lookup("agent").renderer(), "agentNode");
    assert_eq!(registry.lookup("loop").kind(), NodeKind::Loop);
    assert!(registry.is_registered("conditional"));

    let unknown = registry.lookup("quantum_step");
    assert_eq!(unknown.renderer(), "unsupportedNode");
    assert_eq!(unknown.kind(), NodeKind::Unsupported);
    assert!(!registry.is_registered("quantum_step"));

    assert_eq!(registry.synthetic_renderer(NodeKind::Trigger), "triggerNode");
    assert_eq!(registry.synthetic_renderer(NodeKind::Missing), "missingStepNode");
}

#[test]
fn test_registry_type_mapping() {
    let mut registry = NodeRegistry::new();

    assert!(registry.map_type("llm", "agent"));
    assert_eq!(registry.lookup("llm").renderer(), "agentNode");
    assert_eq!(registry.lookup("llm").kind(), NodeKind::Agent);

    assert!(!registry.map_type("llm2", "not-a-builtin"));
    assert!(!registry.is_registered("llm2"));
}

#[test]
fn test_renderer_payload_for_agent() {
    let context = sample_context();
    let index = ContextIndex::new(&context);
    let mut step = Step::agent("a", "A", Some("agent-2"));
    if let StepKind::Agent(agent) = &mut step.kind {
        agent.suggested_agent = Some(SuggestedAgent {
            name: "Helper".to_string(),
            goal: String::new(),
            tools: vec!["slack".to_string(), "github".to_string()],
        });
    }

    let payload = NodeRegistry::new().for_step(&step).render(&step, &index);
    let NodePayload::Agent {
        agent_name, tools, ..
    } = payload
    else {
        panic!("expected an agent payload");
    };
    assert_eq!(agent_name.as_deref(), Some("Reviewer"));
    assert_eq!(tools.len(), 2);
    assert!(tools[0].connected);
    assert!(!tools[1].connected);
}

// --- Context ---

#[test]
fn test_context_index_lookups() {
    let context = sample_context();
    let index = ContextIndex::new(&context);

    assert_eq!(index.agent_name("agent-1"), Some("Summarizer"));
    assert_eq!(index.display_agent("agent-404"), "agent-404");
    assert!(index.is_connected("slack"));
    assert!(!index.is_connected("github"));
    assert_eq!(
        index.webhook_url("wf").as_deref(),
        Some("https://hooks.example.com/wf")
    );

    let empty = GraphContext::default();
    assert_eq!(ContextIndex::new(&empty).webhook_url("wf"), None);
}

#[test]
fn test_context_from_json() {
    let context = GraphContext::from_json(
        r#"{"agents": [{"id": "a1", "name": "Alpha"}], "connectedConnectorIds": ["slack"], "baseWebhookUrl": "https://h"}"#,
    )
    .unwrap();
    assert_eq!(context.agents[0].name, "Alpha");
    assert_eq!(context.connected_connector_ids, vec!["slack"]);
    assert_eq!(context.base_webhook_url, "https://h");
}

// --- Topology ---

#[test]
fn test_implicit_successor_skips_owned_steps() {
    let definition = parallel_workflow();
    let topology = Topology::resolve(&definition);

    let fanout = definition.step("fanout").unwrap();
    assert!(topology.is_owned("search-web"));
    assert!(!topology.is_owned("combine"));
    assert_eq!(topology.successor(fanout), Some("combine"));
    assert_eq!(topology.successor(definition.step("search-web").unwrap()), None);
    assert!(topology.issues().is_empty());
}

#[test]
fn test_loop_members_have_no_successor() {
    let definition = loop_workflow();
    let topology = Topology::resolve(&definition);

    assert_eq!(topology.loop_of("critique"), Some("refine"));
    assert_eq!(topology.successor(definition.step("revise").unwrap()), None);
    assert_eq!(topology.successor(definition.step("refine").unwrap()), Some("publish"));
    assert!(topology.is_reachable("revise"));
}

#[test]
fn test_explicit_stop_ends_the_chain() {
    let mut definition = linear_workflow();
    definition.steps[0].next = Transition::Stop;
    let topology = Topology::resolve(&definition);

    assert_eq!(topology.successor(&definition.steps[0]), None);
    assert!(
        topology
            .issues()
            .contains(&StructuralIssue::Orphaned { step_id: "draft".to_string() })
    );
}

#[test]
fn test_cycles_and_duplicates_are_reported() {
    let mut definition = WorkflowDefinition::new("wf", "Cycle");
    definition.steps = vec![
        Step::agent("a", "A", Some("agent-1")).with_next(Transition::Goto("b".to_string())),
        Step::agent("b", "B", Some("agent-1")).with_next(Transition::Goto("a".to_string())),
        Step::agent("b", "B again", Some("agent-1")),
    ];
    let topology = Topology::resolve(&definition);

    assert!(
        topology
            .issues()
            .contains(&StructuralIssue::Cycle { step_id: "a".to_string() })
    );
    assert!(
        topology
            .issues()
            .contains(&StructuralIssue::DuplicateStep { step_id: "b".to_string() })
    );
    assert_eq!(topology.steps().count(), 2);
    assert!(topology.links().iter().any(|l| l.back_edge && l.target == "a"));
}

#[test]
fn test_issue_node_ids() {
    let dangling = StructuralIssue::DanglingReference {
        step_id: "triage".to_string(),
        missing_id: "stepX".to_string(),
    };
    assert_eq!(dangling.node_id(), Some("triage"));
    assert_eq!(StructuralIssue::NoEntry.node_id(), None);
    assert_eq!(TRIGGER_NODE_ID, "trigger");
}

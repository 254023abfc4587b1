use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// The persisted workflow: an ordered list of steps plus an optional entry point.
///
/// Array order is the default execution order unless `entry_step`, an explicit
/// `next` or a control step says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, alias = "entryStep", skip_serializing_if = "Option::is_none")]
    pub entry_step: Option<String>,
    /// Server-side revision, used to detect concurrent edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            entry_step: None,
            version: None,
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn contains_step(&self, id: &str) -> bool {
        self.step_index(id).is_some()
    }

    /// The step execution starts from: `entry_step` when set, otherwise the first step.
    pub fn entry_id(&self) -> Option<&str> {
        self.entry_step
            .as_deref()
            .or_else(|| self.steps.first().map(|s| s.id.as_str()))
    }
}

/// One unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Reference expression for the step input, e.g. `{{input}}` or `{{steps.draft.output}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, alias = "onError")]
    pub on_error: OnError,
    #[serde(default, skip_serializing_if = "Transition::is_implicit")]
    pub next: Transition,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: None,
            timeout: None,
            retries: None,
            on_error: OnError::default(),
            next: Transition::Implicit,
            kind,
        }
    }

    pub fn agent(id: impl Into<String>, name: impl Into<String>, agent_id: Option<&str>) -> Self {
        Self::new(
            id,
            name,
            StepKind::Agent(AgentStep {
                agent_id: agent_id.map(str::to_string),
                suggested_agent: None,
            }),
        )
    }

    pub fn with_next(mut self, next: Transition) -> Self {
        self.next = next;
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Every step id named by this step's control-flow fields.
    pub fn references(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if !matches!(self.kind, StepKind::End) {
            ids.extend(self.next.target());
        }
        match &self.kind {
            StepKind::Parallel(p) => ids.extend(p.branches.iter().filter_map(|b| match b {
                ParallelBranch::Step(id) => Some(id.as_str()),
                ParallelBranch::Agent(_) => None,
            })),
            StepKind::Conditional(c) => {
                ids.extend(c.conditional_branches.values().map(String::as_str))
            }
            StepKind::Loop(l) => ids.extend(l.loop_steps.iter().map(String::as_str)),
            StepKind::Agent(_) | StepKind::End | StepKind::Unsupported(_) => {}
        }
        ids
    }
}

/// What happens when a step fails at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Fail,
    Continue,
    Skip,
}

/// The sequencing of a step.
///
/// Serialized as the `next` field: absent means [`Transition::Implicit`],
/// `null` means [`Transition::Stop`] and a string is a [`Transition::Goto`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Transition {
    /// Continue with the following unowned step in array order.
    #[default]
    Implicit,
    /// The workflow ends after this step.
    Stop,
    Goto(String),
}

impl Transition {
    pub fn is_implicit(&self) -> bool {
        matches!(self, Transition::Implicit)
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Transition::Goto(id) => Some(id),
            _ => None,
        }
    }
}

impl Serialize for Transition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Transition::Goto(id) => serializer.serialize_str(id),
            Transition::Stop | Transition::Implicit => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Transition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<String>::deserialize(deserializer)? {
            Some(id) => Transition::Goto(id),
            None => Transition::Stop,
        })
    }
}

/// The kind-specific part of a step, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Agent(AgentStep),
    Parallel(ParallelStep),
    Conditional(ConditionalStep),
    Loop(LoopStep),
    End,
    /// A kind this crate does not understand yet; kept verbatim.
    Unsupported(UnsupportedStep),
}

impl StepKind {
    /// The `type` tag as it appears in the serialized definition.
    pub fn tag(&self) -> &str {
        match self {
            StepKind::Agent(_) => "agent",
            StepKind::Parallel(_) => "parallel",
            StepKind::Conditional(_) => "conditional",
            StepKind::Loop(_) => "loop",
            StepKind::End => "end",
            StepKind::Unsupported(u) => &u.step_type,
        }
    }
}

/// Mirror of [`StepKind`] without the catch-all, used for the tagged serde format.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownKindRef<'a> {
    Agent(&'a AgentStep),
    Parallel(&'a ParallelStep),
    Conditional(&'a ConditionalStep),
    Loop(&'a LoopStep),
    End,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownKind {
    Agent(AgentStep),
    Parallel(ParallelStep),
    Conditional(ConditionalStep),
    Loop(LoopStep),
    End,
}

const KNOWN_KINDS: [&str; 5] = ["agent", "parallel", "conditional", "loop", "end"];

impl Serialize for StepKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StepKind::Agent(a) => KnownKindRef::Agent(a).serialize(serializer),
            StepKind::Parallel(p) => KnownKindRef::Parallel(p).serialize(serializer),
            StepKind::Conditional(c) => KnownKindRef::Conditional(c).serialize(serializer),
            StepKind::Loop(l) => KnownKindRef::Loop(l).serialize(serializer),
            StepKind::End => KnownKindRef::End.serialize(serializer),
            StepKind::Unsupported(u) => {
                let mut payload = u.payload.clone();
                payload.insert(
                    "type".to_string(),
                    serde_json::Value::String(u.step_type.clone()),
                );
                payload.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for StepKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = serde_json::Map::deserialize(deserializer)?;
        let step_type = match fields.get("type") {
            Some(serde_json::Value::String(t)) => t.clone(),
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "step type must be a string, found {}",
                    other
                )));
            }
            None => return Err(D::Error::missing_field("type")),
        };

        if KNOWN_KINDS.contains(&step_type.as_str()) {
            let known: KnownKind = serde_json::from_value(serde_json::Value::Object(fields))
                .map_err(D::Error::custom)?;
            Ok(match known {
                KnownKind::Agent(a) => StepKind::Agent(a),
                KnownKind::Parallel(p) => StepKind::Parallel(p),
                KnownKind::Conditional(c) => StepKind::Conditional(c),
                KnownKind::Loop(l) => StepKind::Loop(l),
                KnownKind::End => StepKind::End,
            })
        } else {
            fields.remove("type");
            Ok(StepKind::Unsupported(UnsupportedStep {
                step_type,
                payload: fields,
            }))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentStep {
    /// `None` while the step is still a draft.
    #[serde(default, alias = "agentId")]
    pub agent_id: Option<String>,
    /// Proposed agent, used only until a real agent is created.
    #[serde(default, alias = "suggestedAgent", skip_serializing_if = "Option::is_none")]
    pub suggested_agent: Option<SuggestedAgent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SuggestedAgent {
    pub name: String,
    #[serde(default)]
    pub goal: String,
    /// Connector ids the agent would need.
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParallelStep {
    #[serde(default)]
    pub branches: Vec<ParallelBranch>,
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// A fan-out branch: either another step of the workflow or an inline agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParallelBranch {
    Step(String),
    Agent(BranchAgent),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BranchAgent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "agentId")]
    pub agent_id: Option<String>,
}

/// How the results of parallel branches are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Collect every branch result.
    #[default]
    All,
    /// The first branch to complete wins.
    First,
    /// Concatenate the branch outputs.
    Merge,
    /// A secondary model picks the best result.
    Best,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionalStep {
    #[serde(default, alias = "conditionSource")]
    pub condition_source: String,
    /// Branch key to downstream step id.
    #[serde(default, alias = "conditionalBranches")]
    pub conditional_branches: BTreeMap<String, String>,
}

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStep {
    /// Ordered ids of the steps that form the loop body.
    #[serde(default, alias = "loopSteps")]
    pub loop_steps: Vec<String>,
    #[serde(default = "default_max_iterations", alias = "maxIterations")]
    pub max_iterations: u32,
    #[serde(default, alias = "exitCondition")]
    pub exit_condition: String,
}

impl Default for LoopStep {
    fn default() -> Self {
        Self {
            loop_steps: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            exit_condition: String::new(),
        }
    }
}

/// The raw fields of a step whose `type` is not known to this crate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnsupportedStep {
    pub step_type: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

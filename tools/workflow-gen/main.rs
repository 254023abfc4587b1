use clap::Parser;
use flowcanvas::context::GraphContext;
use flowcanvas::workflow::{
    Aggregation, BranchAgent, ConditionalStep, LoopStep, ParallelBranch, ParallelStep, Step,
    StepKind, SuggestedAgent, Transition, WorkflowDefinition,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;

/// A CLI tool to generate random, structurally valid workflow definitions
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// The path to write the generated workflow JSON file to
    #[arg(short, long, default_value = "generated_workflow.json")]
    output: String,

    /// Also write a matching context file (agent names, connected connectors)
    #[arg(short, long)]
    context: Option<String>,

    /// The number of top-level segments (agent, parallel, conditional or loop)
    #[arg(long, default_value_t = 6)]
    segments: usize,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

const TASKS: [&str; 10] = [
    "research", "summarize", "classify", "draft", "review", "translate", "extract", "score",
    "notify", "publish",
];

const CONNECTORS: [&str; 4] = ["slack", "github", "gmail", "notion"];

const AGENT_POOL: usize = 5;

struct Generator {
    rng: StdRng,
    steps: Vec<Step>,
    counter: usize,
}

impl Generator {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            steps: Vec::new(),
            counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        let task = TASKS[self.rng.random_range(0..TASKS.len())];
        self.counter += 1;
        format!("{}-{}", task, self.counter)
    }

    fn agent_step(&mut self) -> Step {
        let id = self.next_id();
        let name = title_case(&id);
        // One in five agent steps is left as a draft with a suggested agent.
        if self.rng.random_bool(0.2) {
            let tool_count = self.rng.random_range(0..=2);
            let tools = (0..tool_count)
                .map(|_| CONNECTORS[self.rng.random_range(0..CONNECTORS.len())].to_string())
                .collect();
            let mut step = Step::agent(id, name.clone(), None);
            if let StepKind::Agent(agent) = &mut step.kind {
                agent.suggested_agent = Some(SuggestedAgent {
                    name: format!("{} Agent", name),
                    goal: format!("Handle the '{}' task", name),
                    tools,
                });
            }
            step
        } else {
            let agent = format!("agent-{}", self.rng.random_range(1..=AGENT_POOL));
            Step::agent(id, name, Some(&agent))
        }
    }

    fn push_agent(&mut self) {
        let step = self.agent_step();
        self.steps.push(step);
    }

    fn push_parallel(&mut self) {
        let id = self.next_id();
        let branch_count = self.rng.random_range(2..=3);
        let mut branches = Vec::new();
        let mut owned = Vec::new();
        for b in 0..branch_count {
            if self.rng.random_bool(0.5) {
                let step = self.agent_step();
                branches.push(ParallelBranch::Step(step.id.clone()));
                owned.push(step);
            } else {
                branches.push(ParallelBranch::Agent(BranchAgent {
                    id: format!("b{}", b + 1),
                    name: format!("Branch {}", b + 1),
                    agent_id: Some(format!("agent-{}", self.rng.random_range(1..=AGENT_POOL))),
                }));
            }
        }
        let aggregation = match self.rng.random_range(0..4) {
            0 => Aggregation::All,
            1 => Aggregation::First,
            2 => Aggregation::Merge,
            _ => Aggregation::Best,
        };
        let name = title_case(&id);
        self.steps.push(Step::new(
            id,
            name,
            StepKind::Parallel(ParallelStep {
                branches,
                aggregation,
            }),
        ));
        self.steps.extend(owned);
    }

    /// A conditional whose branches rejoin at a common step.
    fn push_conditional(&mut self) {
        let id = self.next_id();
        let join = self.agent_step();
        let mut conditional_branches = BTreeMap::new();
        let mut owned = Vec::new();
        for key in ["yes", "no"] {
            let step = self.agent_step().with_next(Transition::Goto(join.id.clone()));
            conditional_branches.insert(key.to_string(), step.id.clone());
            owned.push(step);
        }
        let name = title_case(&id);
        self.steps.push(Step::new(
            id,
            name,
            StepKind::Conditional(ConditionalStep {
                condition_source: "{{previous.output}}".to_string(),
                conditional_branches,
            }),
        ));
        self.steps.extend(owned);
        self.steps.push(join);
    }

    fn push_loop(&mut self) {
        let id = self.next_id();
        let body_len = self.rng.random_range(1..=2);
        let body: Vec<Step> = (0..body_len).map(|_| self.agent_step()).collect();
        let name = title_case(&id);
        self.steps.push(Step::new(
            id,
            name,
            StepKind::Loop(LoopStep {
                loop_steps: body.iter().map(|s| s.id.clone()).collect(),
                max_iterations: self.rng.random_range(2..=10),
                exit_condition: "{{output.done}}".to_string(),
            }),
        ));
        self.steps.extend(body);
    }

    fn generate(mut self, segments: usize) -> Vec<Step> {
        self.push_agent();
        for _ in 1..segments {
            match self.rng.random_range(0..10) {
                0..=4 => self.push_agent(),
                5 | 6 => self.push_parallel(),
                7 | 8 => self.push_conditional(),
                _ => self.push_loop(),
            }
        }
        self.steps.push(Step::new("done", "Done", StepKind::End));
        self.steps
    }
}

fn title_case(id: &str) -> String {
    id.split('-')
        .filter(|part| !part.chars().all(|c| c.is_ascii_digit()))
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn generate_context(rng: &mut StdRng) -> GraphContext {
    let mut context = GraphContext::default().with_webhook_base("https://hooks.example.com");
    for n in 1..=AGENT_POOL {
        context = context.with_agent(format!("agent-{}", n), format!("Agent {}", n));
    }
    for connector in CONNECTORS {
        if rng.random_bool(0.5) {
            context = context.with_connector(connector);
        }
    }
    context
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.segments == 0 {
        eprintln!("Error: --segments must be at least 1");
        std::process::exit(1);
    }

    let seed = cli.seed.unwrap_or_else(|| rand::rng().random());
    println!(
        "Generating workflow with {} segment(s) (seed {})...",
        cli.segments, seed
    );

    let mut definition = WorkflowDefinition::new(
        format!("generated-{}", seed % 10_000),
        "Generated workflow",
    );
    definition.description = format!("Random workflow generated from seed {}", seed);
    definition.steps = Generator::new(seed).generate(cli.segments);
    println!("-> Generated {} step(s).", definition.steps.len());

    fs::write(&cli.output, definition.to_json_pretty()?)?;
    println!("Successfully saved workflow to '{}'", cli.output);

    if let Some(path) = &cli.context {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        let context = generate_context(&mut rng);
        fs::write(path, serde_json::to_string_pretty(&context)?)?;
        println!("Successfully saved context to '{}'", path);
    }

    Ok(())
}

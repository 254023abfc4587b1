//! # flowcanvas - Workflow Graph View-Model
//!
//! **flowcanvas** turns a declarative workflow definition (agent calls, parallel
//! fan-outs, conditional branches and bounded loops) into a renderable node/edge graph
//! for a canvas editor, and turns the edited graph back into a definition.
//!
//! ## Core Workflow
//!
//! 1.  **Load Your Data**: Parse a `WorkflowDefinition` and the `GraphContext` that
//!     resolves agent names, connected connectors and the webhook base URL.
//! 2.  **Project**: Use `GraphProjector::builder` (or `transform::to_graph`) to get a laid
//!     out `CanvasGraph`. Projection never fails; structural problems are annotated on
//!     the nodes they concern.
//! 3.  **Edit**: Open an `EditSession` to move nodes, connect and disconnect them, rename
//!     steps and track unsaved changes against concurrent remote updates.
//! 4.  **Reconcile**: Use `GraphReconciler` (or `transform::from_graph`) to rebuild the
//!     definition from the edited graph before saving it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowcanvas::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let definition = WorkflowDefinition::from_file("workflows/triage.json")?;
//!     let context = GraphContext::default()
//!         .with_agent("agent-7", "Triage Bot")
//!         .with_webhook_base("https://hooks.example.com");
//!
//!     // Project the definition onto the canvas.
//!     let graph = GraphProjector::builder(&definition, &context)
//!         .with_layout(LayoutConfig::default())
//!         .build()
//!         .project();
//!     println!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len());
//!     for issue in &graph.issues {
//!         println!("-> {}", issue);
//!     }
//!
//!     // Edit, then reconcile before saving.
//!     let mut session = EditSession::open(definition, context);
//!     session.begin_edit();
//!     session.rename_node("triage", "Classify ticket")?;
//!     let request = session.save(SavePolicy::Strict)?;
//!     println!("{}", request.definition.to_json_pretty()?);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod graph;
pub mod layout;
pub mod prelude;
pub mod session;
pub mod status;
pub mod transform;
pub mod workflow;

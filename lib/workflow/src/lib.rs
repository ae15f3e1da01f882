//! Workflow engine for leadflow marketing automation.
//!
//! This crate provides the engine core, including:
//!
//! - **Definitions**: Workflows as petgraph graphs of typed nodes, validated at save time
//! - **Triggers**: Domain events matched against workflow triggers
//! - **Enrollment**: Participants created under reentry rules
//! - **Execution**: The node executor state machine, bounded per invocation
//! - **Transport**: Job queue and event bus traits with in-memory and NATS implementations
//! - **Persistence**: A versioned store trait with an in-memory implementation

pub mod bus;
pub mod clock;
pub mod collaborator;
pub mod condition;
pub mod definition;
pub mod dispatcher;
pub mod edge;
pub mod enrollment;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod graph;
pub mod lead;
pub mod memory;
pub mod nats;
pub mod node;
pub mod participant;
pub mod queue;
pub mod store;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, InMemoryEventBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::Collaborators;
pub use definition::{EnrollmentSettings, Workflow, WorkflowMetrics, WorkflowStatus};
pub use dispatcher::{DispatchReport, TriggerDispatcher};
pub use edge::Edge;
pub use enrollment::EnrollmentService;
pub use error::{DefinitionError, EnrollmentError, ExecutionError, QueueError, StoreError};
pub use executor::{ExecutorConfig, NodeExecutor, StepOutcome};
pub use graph::WorkflowGraph;
pub use lead::Lead;
pub use memory::{InMemoryCollaborators, InMemoryStore};
pub use node::{Node, NodeId, NodeKind};
pub use participant::{Participant, ParticipantStatus};
pub use queue::{ExecutionJob, InMemoryJobQueue, JobQueue, JobReason};
pub use store::EngineStore;
pub use trigger::{DomainEvent, TriggerSpec, TriggerType};

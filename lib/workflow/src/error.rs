//! Error types for the workflow crate.
//!
//! Errors follow the layers of the engine:
//! - `DefinitionError`: invalid workflow definitions, raised at save time
//! - `StoreError`: persistence failures, including optimistic-lock conflicts
//! - `CollaboratorError`: failures of external services called by action nodes
//! - `TransitionError`: participant state changes its status forbids
//! - `ExecutionError`: failures at the step boundary of the node executor
//! - `QueueError` / `BusError`: transport failures
//! - `EnrollmentError` / `DispatchError`: trigger handling failures
//!
//! Service boundaries wrap these in `rootcause::Report` via `?`.

use crate::definition::WorkflowStatus;
use crate::node::NodeId;
use crate::participant::ParticipantStatus;
use leadflow_core::{LeadId, ParticipantId, WorkflowId};
use std::fmt;

/// Errors in a workflow definition.
///
/// Raised synchronously when a definition is saved or published, never
/// during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Two nodes share an id.
    DuplicateNode { node_id: NodeId },
    /// Two edges share an id.
    DuplicateEdge { edge_id: String },
    /// An edge references a node that does not exist.
    UnknownEdgeEndpoint { edge_id: String, node_id: NodeId },
    /// The graph has no trigger node.
    NoTriggerNode,
    /// The graph has more than one trigger node.
    MultipleTriggerNodes { count: usize },
    /// A node's config cannot be executed.
    InvalidNodeConfig { node_id: NodeId, reason: String },
    /// A split variant has a negative or non-finite weight.
    InvalidSplitWeight { node_id: NodeId, variant_id: String },
    /// A branching node lacks an outgoing edge for one of its labels.
    MissingBranchEdge { node_id: NodeId, branch: String },
    /// The trigger's matching config is invalid.
    InvalidTrigger { reason: String },
    /// The enrollment settings are invalid.
    InvalidSettings { reason: String },
    /// The requested status change is not allowed.
    InvalidStatusTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::DuplicateEdge { edge_id } => write!(f, "duplicate edge id: {edge_id}"),
            Self::UnknownEdgeEndpoint { edge_id, node_id } => {
                write!(f, "edge {edge_id} references unknown node {node_id}")
            }
            Self::NoTriggerNode => write!(f, "workflow has no trigger node"),
            Self::MultipleTriggerNodes { count } => {
                write!(f, "workflow has {count} trigger nodes, expected exactly one")
            }
            Self::InvalidNodeConfig { node_id, reason } => {
                write!(f, "invalid config for node {node_id}: {reason}")
            }
            Self::InvalidSplitWeight {
                node_id,
                variant_id,
            } => write!(
                f,
                "split node {node_id} has an invalid weight for variant {variant_id}"
            ),
            Self::MissingBranchEdge { node_id, branch } => {
                write!(f, "node {node_id} has no outgoing edge for branch '{branch}'")
            }
            Self::InvalidTrigger { reason } => write!(f, "invalid trigger: {reason}"),
            Self::InvalidSettings { reason } => write!(f, "invalid settings: {reason}"),
            Self::InvalidStatusTransition { from, to } => {
                write!(f, "invalid status transition from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Errors from the engine store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record does not exist.
    NotFound { entity: &'static str, id: String },
    /// The record changed since it was read.
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },
    /// The lead already has an active or waiting participant in the workflow.
    DuplicateEnrollment {
        workflow_id: WorkflowId,
        lead_id: LeadId,
    },
    /// The backing store could not be reached.
    Unavailable { reason: String },
}

impl StoreError {
    #[must_use]
    pub fn workflow_not_found(id: WorkflowId) -> Self {
        Self::NotFound {
            entity: "workflow",
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn participant_not_found(id: ParticipantId) -> Self {
        Self::NotFound {
            entity: "participant",
            id: id.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::VersionConflict {
                entity,
                id,
                expected,
                actual,
            } => write!(
                f,
                "{entity} {id} version conflict: expected {expected}, found {actual}"
            ),
            Self::DuplicateEnrollment {
                workflow_id,
                lead_id,
            } => write!(
                f,
                "lead {lead_id} already has an active participant in workflow {workflow_id}"
            ),
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from external collaborators (lead store, email, webhooks, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The lead does not exist in the lead store.
    LeadNotFound { lead_id: LeadId },
    /// The referenced email template does not exist.
    TemplateNotFound { template_id: String },
    /// The call did not finish within the configured timeout.
    Timeout { operation: &'static str },
    /// The call failed.
    Failed {
        operation: &'static str,
        reason: String,
    },
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeadNotFound { lead_id } => write!(f, "lead not found: {lead_id}"),
            Self::TemplateNotFound { template_id } => {
                write!(f, "email template not found: {template_id}")
            }
            Self::Timeout { operation } => write!(f, "{operation} timed out"),
            Self::Failed { operation, reason } => write!(f, "{operation} failed: {reason}"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// Errors from the job queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    Connection { reason: String },
    Enqueue { reason: String },
    Fetch { reason: String },
    Ack { reason: String },
    Decode { reason: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { reason } => write!(f, "job queue connection failed: {reason}"),
            Self::Enqueue { reason } => write!(f, "failed to enqueue job: {reason}"),
            Self::Fetch { reason } => write!(f, "failed to fetch jobs: {reason}"),
            Self::Ack { reason } => write!(f, "failed to acknowledge job: {reason}"),
            Self::Decode { reason } => write!(f, "failed to decode job: {reason}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Errors from the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    Connection { reason: String },
    Publish { reason: String },
    Subscribe { reason: String },
    Decode { reason: String },
    /// The subscription lagged and dropped events.
    Lagged { skipped: u64 },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { reason } => write!(f, "event bus connection failed: {reason}"),
            Self::Publish { reason } => write!(f, "failed to publish event: {reason}"),
            Self::Subscribe { reason } => write!(f, "failed to subscribe: {reason}"),
            Self::Decode { reason } => write!(f, "failed to decode event: {reason}"),
            Self::Lagged { skipped } => write!(f, "subscriber lagged, {skipped} events skipped"),
        }
    }
}

impl std::error::Error for BusError {}

/// A participant state change that its current status does not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub participant_id: ParticipantId,
    pub status: ParticipantStatus,
    pub action: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} participant {} while {}",
            self.action, self.participant_id, self.status
        )
    }
}

impl std::error::Error for TransitionError {}

/// Failures at the step boundary of the node executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The participant vanished between scheduling and execution.
    ParticipantNotFound { participant_id: ParticipantId },
    /// Another writer updated the participant first.
    Conflict { participant_id: ParticipantId },
    /// A node's logic failed unexpectedly.
    NodeFailed { node_id: NodeId, reason: String },
    /// The participant was not in a state that allows the step.
    Transition(TransitionError),
    /// Persistence failed.
    Store(StoreError),
    /// A continuation job could not be enqueued.
    Queue(QueueError),
}

impl ExecutionError {
    /// Returns true if re-running the step against fresh state may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::Store(StoreError::Unavailable { .. })
                | Self::Queue(_)
        )
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParticipantNotFound { participant_id } => {
                write!(f, "participant not found: {participant_id}")
            }
            Self::Conflict { participant_id } => {
                write!(f, "participant {participant_id} was modified concurrently")
            }
            Self::NodeFailed { node_id, reason } => write!(f, "node {node_id} failed: {reason}"),
            Self::Transition(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Queue(err) => write!(f, "queue error: {err}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<StoreError> for ExecutionError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<TransitionError> for ExecutionError {
    fn from(err: TransitionError) -> Self {
        Self::Transition(err)
    }
}

impl From<QueueError> for ExecutionError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

/// Why a lead was not enrolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The lead is active or waiting in the workflow and reentry is off.
    AlreadyEnrolled,
    /// The reentry delay since the last enrollment has not elapsed.
    ReentryDelay { days: u32 },
    /// The lead has reached the enrollment cap.
    MaxEnrollments { max: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyEnrolled => write!(f, "lead is already enrolled"),
            Self::ReentryDelay { days } => {
                write!(f, "reentry delay of {days} days has not elapsed")
            }
            Self::MaxEnrollments { max } => write!(f, "maximum of {max} enrollments reached"),
        }
    }
}

/// Errors from the enrollment service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentError {
    /// The workflow is not accepting enrollments.
    WorkflowNotActive {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
    },
    /// The workflow graph has no trigger node to start from.
    NoEntryNode { workflow_id: WorkflowId },
    /// The lead is not eligible.
    Ineligible(SkipReason),
    Store(StoreError),
}

impl EnrollmentError {
    /// Returns true when the lead was skipped rather than failed.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::Ineligible(_) | Self::Store(StoreError::DuplicateEnrollment { .. })
        )
    }
}

impl fmt::Display for EnrollmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotActive {
                workflow_id,
                status,
            } => write!(f, "workflow {workflow_id} is {status}, not active"),
            Self::NoEntryNode { workflow_id } => {
                write!(f, "workflow {workflow_id} has no entry node")
            }
            Self::Ineligible(reason) => write!(f, "not eligible: {reason}"),
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl std::error::Error for EnrollmentError {}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Errors from dispatching one event to one workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Matching workflows could not be listed.
    Store(StoreError),
    /// Enrolling the lead failed.
    Enrollment {
        workflow_id: WorkflowId,
        source: EnrollmentError,
    },
    /// The first execution job could not be enqueued.
    Enqueue {
        workflow_id: WorkflowId,
        participant_id: ParticipantId,
        source: QueueError,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "failed to load workflows: {err}"),
            Self::Enrollment {
                workflow_id,
                source,
            } => write!(f, "enrollment in workflow {workflow_id} failed: {source}"),
            Self::Enqueue {
                workflow_id,
                participant_id,
                source,
            } => write!(
                f,
                "failed to schedule participant {participant_id} of workflow {workflow_id}: {source}"
            ),
        }
    }
}

impl std::error::Error for DispatchError {}

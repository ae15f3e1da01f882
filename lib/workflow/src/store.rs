//! Persistence for workflows and participants.
//!
//! Every participant write is a compare-and-swap on `Participant::version`:
//! the caller passes the record it read, and the store rejects the write with
//! [`StoreError::VersionConflict`] if someone else wrote in between. Metric
//! deltas are applied in the same atomic write.

use crate::definition::{MetricsDelta, Workflow, WorkflowStatus};
use crate::error::StoreError;
use crate::participant::Participant;
use crate::trigger::TriggerType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::{LeadId, ParticipantId, WorkflowId};

#[async_trait]
pub trait EngineStore: Send + Sync {
    /// Stores a new workflow at version 1.
    async fn insert_workflow(&self, workflow: Workflow) -> Result<Workflow, StoreError>;

    /// Saves a changed definition.
    ///
    /// `workflow.version` must match the stored version; the stored copy's
    /// metrics are kept, since only participant writes change them.
    async fn update_workflow(&self, workflow: Workflow) -> Result<Workflow, StoreError>;

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// Lists workflows, optionally filtered by status.
    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Active workflows whose trigger has the given type.
    async fn active_workflows_for(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError>;

    async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError>;

    /// Every participant (any status) of a lead in a workflow, oldest first.
    async fn participants_for_lead(
        &self,
        workflow_id: WorkflowId,
        lead_id: &LeadId,
    ) -> Result<Vec<Participant>, StoreError>;

    /// Stores a new participant and applies `delta` to its workflow's metrics.
    ///
    /// With `exclusive`, fails with [`StoreError::DuplicateEnrollment`] if the
    /// lead already has an active or waiting participant in the workflow.
    async fn insert_participant(
        &self,
        participant: Participant,
        delta: MetricsDelta,
        exclusive: bool,
    ) -> Result<Participant, StoreError>;

    /// Writes a participant read at `participant.version` and applies `delta`.
    async fn update_participant(
        &self,
        participant: Participant,
        delta: MetricsDelta,
    ) -> Result<Participant, StoreError>;

    /// Waiting participants with `waiting_until <= now`, earliest first.
    async fn due_participants(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Participant>, StoreError>;

    /// Active participants whose last log entry is older than `before`.
    async fn stalled_participants(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Participant>, StoreError>;
}

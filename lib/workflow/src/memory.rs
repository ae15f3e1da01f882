//! In-memory implementations of the store and collaborators.
//!
//! Used by tests and by single-process deployments that do not need
//! durability across restarts.

use crate::collaborator::{
    Collaborators, EmailReceipt, EmailSender, EmailTemplate, LeadStore, Notification, Notifier,
    OutgoingEmail, SequenceEnroller, TaskCreator, TaskRequest, WebhookCaller, WebhookRequest,
    WebhookResponse,
};
use crate::definition::{MetricsDelta, Workflow, WorkflowStatus};
use crate::error::{CollaboratorError, StoreError};
use crate::lead::Lead;
use crate::participant::{Participant, ParticipantStatus};
use crate::store::EngineStore;
use crate::trigger::TriggerType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::{LeadId, ParticipantId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    workflows: HashMap<WorkflowId, Workflow>,
    participants: HashMap<ParticipantId, Participant>,
}

impl StoreState {
    fn apply_metrics(&mut self, workflow_id: WorkflowId, delta: &MetricsDelta) {
        if delta.is_empty() {
            return;
        }
        if let Some(workflow) = self.workflows.get_mut(&workflow_id) {
            workflow.metrics.apply(delta);
        }
    }
}

/// Engine store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored participants.
    pub async fn participant_count(&self) -> usize {
        self.state.read().await.participants.len()
    }
}

#[async_trait]
impl EngineStore for InMemoryStore {
    async fn insert_workflow(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        workflow.version = 1;
        self.state
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn update_workflow(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .workflows
            .get_mut(&workflow.id)
            .ok_or_else(|| StoreError::workflow_not_found(workflow.id))?;

        if stored.version != workflow.version {
            return Err(StoreError::VersionConflict {
                entity: "workflow",
                id: workflow.id.to_string(),
                expected: workflow.version,
                actual: stored.version,
            });
        }

        workflow.version += 1;
        workflow.metrics = stored.metrics;
        *stored = workflow.clone();
        Ok(workflow)
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.state.read().await.workflows.get(&id).cloned())
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.read().await;
        let mut workflows: Vec<_> = state
            .workflows
            .values()
            .filter(|wf| status.is_none_or(|status| wf.status == status))
            .cloned()
            .collect();
        workflows.sort_by_key(|wf| wf.id);
        Ok(workflows)
    }

    async fn active_workflows_for(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.read().await;
        let mut workflows: Vec<_> = state
            .workflows
            .values()
            .filter(|wf| wf.is_active() && wf.trigger.trigger_type() == trigger_type)
            .cloned()
            .collect();
        workflows.sort_by_key(|wf| wf.id);
        Ok(workflows)
    }

    async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        Ok(self.state.read().await.participants.get(&id).cloned())
    }

    async fn participants_for_lead(
        &self,
        workflow_id: WorkflowId,
        lead_id: &LeadId,
    ) -> Result<Vec<Participant>, StoreError> {
        let state = self.state.read().await;
        let mut participants: Vec<_> = state
            .participants
            .values()
            .filter(|p| p.workflow_id == workflow_id && &p.lead_id == lead_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| (p.entered_at, p.id));
        Ok(participants)
    }

    async fn insert_participant(
        &self,
        mut participant: Participant,
        delta: MetricsDelta,
        exclusive: bool,
    ) -> Result<Participant, StoreError> {
        let mut state = self.state.write().await;
        if !state.workflows.contains_key(&participant.workflow_id) {
            return Err(StoreError::workflow_not_found(participant.workflow_id));
        }

        if exclusive
            && state.participants.values().any(|p| {
                p.workflow_id == participant.workflow_id
                    && p.lead_id == participant.lead_id
                    && p.is_live()
            })
        {
            return Err(StoreError::DuplicateEnrollment {
                workflow_id: participant.workflow_id,
                lead_id: participant.lead_id,
            });
        }

        participant.version = 1;
        state.apply_metrics(participant.workflow_id, &delta);
        state.participants.insert(participant.id, participant.clone());
        Ok(participant)
    }

    async fn update_participant(
        &self,
        mut participant: Participant,
        delta: MetricsDelta,
    ) -> Result<Participant, StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .participants
            .get_mut(&participant.id)
            .ok_or_else(|| StoreError::participant_not_found(participant.id))?;

        if stored.version != participant.version {
            return Err(StoreError::VersionConflict {
                entity: "participant",
                id: participant.id.to_string(),
                expected: participant.version,
                actual: stored.version,
            });
        }

        participant.version += 1;
        *stored = participant.clone();
        state.apply_metrics(participant.workflow_id, &delta);
        Ok(participant)
    }

    async fn due_participants(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Participant>, StoreError> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .participants
            .values()
            .filter(|p| {
                p.status == ParticipantStatus::Waiting
                    && p.waiting_until.is_some_and(|until| until <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|p| (p.waiting_until, p.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn stalled_participants(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Participant>, StoreError> {
        let state = self.state.read().await;
        let last_activity = |p: &Participant| p.log.last().map_or(p.entered_at, |e| e.timestamp);
        let mut stalled: Vec<_> = state
            .participants
            .values()
            .filter(|p| p.status == ParticipantStatus::Active && last_activity(p) < before)
            .cloned()
            .collect();
        stalled.sort_by_key(|p| (last_activity(p), p.id));
        stalled.truncate(limit);
        Ok(stalled)
    }
}

#[derive(Debug, Default)]
struct CollaboratorState {
    leads: HashMap<LeadId, Lead>,
    templates: HashMap<String, EmailTemplate>,
    sent: Vec<OutgoingEmail>,
    webhooks: Vec<WebhookRequest>,
    webhook_status: Option<u16>,
    sequences: Vec<(LeadId, String)>,
    notifications: Vec<Notification>,
    tasks: Vec<TaskRequest>,
    failing: HashSet<&'static str>,
}

impl CollaboratorState {
    fn check(&self, operation: &'static str) -> Result<(), CollaboratorError> {
        if self.failing.contains(operation) {
            return Err(CollaboratorError::Failed {
                operation,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn lead_mut(&mut self, lead_id: &LeadId) -> Result<&mut Lead, CollaboratorError> {
        self.leads
            .get_mut(lead_id)
            .ok_or_else(|| CollaboratorError::LeadNotFound {
                lead_id: lead_id.clone(),
            })
    }
}

/// In-memory stand-in for every external collaborator.
///
/// Records each call so tests can assert on side effects. Any operation can
/// be made to fail with [`InMemoryCollaborators::fail`]. Operation names:
/// `get_lead`, `add_tag`, `remove_tag`, `set_score`, `set_field`,
/// `find_template`, `send_email`, `webhook`, `enroll_sequence`, `notify`,
/// `create_task`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollaborators {
    state: Arc<RwLock<CollaboratorState>>,
}

impl InMemoryCollaborators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundles this double as every collaborator.
    #[must_use]
    pub fn collaborators(&self, timeout: Duration) -> Collaborators {
        let this = Arc::new(self.clone());
        Collaborators {
            leads: this.clone(),
            email: this.clone(),
            webhooks: this.clone(),
            sequences: this.clone(),
            notifier: this.clone(),
            tasks: this,
            timeout,
        }
    }

    pub async fn insert_lead(&self, lead: Lead) {
        self.state.write().await.leads.insert(lead.id.clone(), lead);
    }

    pub async fn lead(&self, lead_id: &LeadId) -> Option<Lead> {
        self.state.read().await.leads.get(lead_id).cloned()
    }

    pub async fn add_template(&self, template: EmailTemplate) {
        self.state
            .write()
            .await
            .templates
            .insert(template.id.clone(), template);
    }

    /// Makes every later call of `operation` fail.
    pub async fn fail(&self, operation: &'static str) {
        self.state.write().await.failing.insert(operation);
    }

    /// Sets the status code returned to webhook calls (default 200).
    pub async fn set_webhook_status(&self, status: u16) {
        self.state.write().await.webhook_status = Some(status);
    }

    pub async fn sent_emails(&self) -> Vec<OutgoingEmail> {
        self.state.read().await.sent.clone()
    }

    pub async fn webhook_calls(&self) -> Vec<WebhookRequest> {
        self.state.read().await.webhooks.clone()
    }

    pub async fn sequence_enrollments(&self) -> Vec<(LeadId, String)> {
        self.state.read().await.sequences.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    pub async fn tasks(&self) -> Vec<TaskRequest> {
        self.state.read().await.tasks.clone()
    }
}

#[async_trait]
impl LeadStore for InMemoryCollaborators {
    async fn get_lead(&self, lead_id: &LeadId) -> Result<Lead, CollaboratorError> {
        let state = self.state.read().await;
        state.check("get_lead")?;
        state
            .leads
            .get(lead_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::LeadNotFound {
                lead_id: lead_id.clone(),
            })
    }

    async fn add_tag(&self, lead_id: &LeadId, tag: &str) -> Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("add_tag")?;
        state.lead_mut(lead_id)?.tags.insert(tag.to_string());
        Ok(())
    }

    async fn remove_tag(&self, lead_id: &LeadId, tag: &str) -> Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("remove_tag")?;
        state.lead_mut(lead_id)?.tags.remove(tag);
        Ok(())
    }

    async fn set_score(&self, lead_id: &LeadId, score: u8) -> Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("set_score")?;
        state.lead_mut(lead_id)?.score = score;
        Ok(())
    }

    async fn set_field(
        &self,
        lead_id: &LeadId,
        field: &str,
        value: JsonValue,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("set_field")?;
        let name = field.strip_prefix("customFields.").unwrap_or(field);
        state
            .lead_mut(lead_id)?
            .custom_fields
            .insert(name.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl EmailSender for InMemoryCollaborators {
    async fn find_template(
        &self,
        template_id: &str,
    ) -> Result<Option<EmailTemplate>, CollaboratorError> {
        let state = self.state.read().await;
        state.check("find_template")?;
        Ok(state.templates.get(template_id).cloned())
    }

    async fn send(&self, email: OutgoingEmail) -> Result<EmailReceipt, CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("send_email")?;
        state.sent.push(email);
        Ok(EmailReceipt {
            message_id: format!("msg-{}", state.sent.len()),
        })
    }
}

#[async_trait]
impl WebhookCaller for InMemoryCollaborators {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("webhook")?;
        state.webhooks.push(request);
        Ok(WebhookResponse {
            status_code: state.webhook_status.unwrap_or(200),
        })
    }
}

#[async_trait]
impl SequenceEnroller for InMemoryCollaborators {
    async fn enroll(&self, lead_id: &LeadId, sequence_id: &str) -> Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("enroll_sequence")?;
        state
            .sequences
            .push((lead_id.clone(), sequence_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Notifier for InMemoryCollaborators {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("notify")?;
        state.notifications.push(notification);
        Ok(())
    }
}

#[async_trait]
impl TaskCreator for InMemoryCollaborators {
    async fn create_task(&self, task: TaskRequest) -> Result<String, CollaboratorError> {
        let mut state = self.state.write().await;
        state.check("create_task")?;
        state.tasks.push(task);
        Ok(format!("task-{}", state.tasks.len()))
    }
}

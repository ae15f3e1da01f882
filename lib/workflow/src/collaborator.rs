//! External collaborators called by action nodes.
//!
//! The engine owns none of these services. Each is reached through a trait
//! so the executor can be tested with in-memory doubles and the binary can
//! plug in real transports.

use crate::error::CollaboratorError;
use crate::lead::Lead;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::LeadId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Access to the external lead store.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Fetches a lead snapshot.
    async fn get_lead(&self, lead_id: &LeadId) -> Result<Lead, CollaboratorError>;

    /// Adds a tag. Adding a present tag is a no-op.
    async fn add_tag(&self, lead_id: &LeadId, tag: &str) -> Result<(), CollaboratorError>;

    /// Removes a tag. Removing an absent tag is a no-op.
    async fn remove_tag(&self, lead_id: &LeadId, tag: &str) -> Result<(), CollaboratorError>;

    /// Stores a new score; the store derives the score level.
    async fn set_score(&self, lead_id: &LeadId, score: u8) -> Result<(), CollaboratorError>;

    /// Sets one custom field.
    async fn set_field(
        &self,
        lead_id: &LeadId,
        field: &str,
        value: JsonValue,
    ) -> Result<(), CollaboratorError>;
}

/// A stored email template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    pub subject: String,
    pub body: String,
}

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub template_id: String,
    pub lead_id: LeadId,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailReceipt {
    pub message_id: String,
}

/// Template lookup and email delivery.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn find_template(
        &self,
        template_id: &str,
    ) -> Result<Option<EmailTemplate>, CollaboratorError>;

    async fn send(&self, email: OutgoingEmail) -> Result<EmailReceipt, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status_code: u16,
}

impl WebhookResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Outbound HTTP calls.
#[async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, CollaboratorError>;
}

/// Enrollment in an external drip sequence.
#[async_trait]
pub trait SequenceEnroller: Send + Sync {
    async fn enroll(&self, lead_id: &LeadId, sequence_id: &str) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub title: String,
    pub message: String,
    pub lead_id: LeadId,
}

/// Internal notifications to staff.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub lead_id: LeadId,
}

/// Task creation in an external CRM.
#[async_trait]
pub trait TaskCreator: Send + Sync {
    /// Creates a task and returns its id.
    async fn create_task(&self, task: TaskRequest) -> Result<String, CollaboratorError>;
}

/// The set of collaborators handed to the executor.
#[derive(Clone)]
pub struct Collaborators {
    pub leads: Arc<dyn LeadStore>,
    pub email: Arc<dyn EmailSender>,
    pub webhooks: Arc<dyn WebhookCaller>,
    pub sequences: Arc<dyn SequenceEnroller>,
    pub notifier: Arc<dyn Notifier>,
    pub tasks: Arc<dyn TaskCreator>,
    /// Upper bound on any single collaborator call.
    pub timeout: Duration,
}

impl Collaborators {
    /// Runs a collaborator call under the configured timeout.
    pub async fn call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(CollaboratorError::Timeout { operation }))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

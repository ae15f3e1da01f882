//! Collaborators wired into the engine process.
//!
//! Webhooks go out over HTTP. Sequences, notifications and tasks belong to
//! services this process does not talk to, so they are recorded in the log.

use async_trait::async_trait;
use leadflow_core::LeadId;
use leadflow_workflow::collaborator::{
    Collaborators, Notification, Notifier, SequenceEnroller, TaskCreator, TaskRequest,
    WebhookCaller, WebhookRequest, WebhookResponse,
};
use leadflow_workflow::error::CollaboratorError;
use leadflow_workflow::memory::InMemoryCollaborators;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use ulid::Ulid;

/// Calls webhooks with reqwest.
#[derive(Debug, Clone)]
pub struct HttpWebhookCaller {
    client: reqwest::Client,
}

impl HttpWebhookCaller {
    /// Builds a caller whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn parse_method(method: &str) -> Result<Method, CollaboratorError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        CollaboratorError::Failed {
            operation: "webhook",
            reason: format!("invalid method '{method}'"),
        }
    })
}

#[async_trait]
impl WebhookCaller for HttpWebhookCaller {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, CollaboratorError> {
        let method = parse_method(&request.method)?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| CollaboratorError::Failed {
            operation: "webhook",
            reason: err.to_string(),
        })?;
        let status_code = response.status().as_u16();
        tracing::debug!(url = %request.url, status_code, "webhook called");
        Ok(WebhookResponse { status_code })
    }
}

/// Records sequence enrollments in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggedSequences;

#[async_trait]
impl SequenceEnroller for LoggedSequences {
    async fn enroll(&self, lead_id: &LeadId, sequence_id: &str) -> Result<(), CollaboratorError> {
        tracing::info!(lead_id = %lead_id, sequence_id, "sequence enrollment requested");
        Ok(())
    }
}

/// Records notifications in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggedNotifier;

#[async_trait]
impl Notifier for LoggedNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        tracing::info!(
            lead_id = %notification.lead_id,
            recipient = %notification.recipient,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}

/// Records tasks in the log and hands out task ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggedTasks;

#[async_trait]
impl TaskCreator for LoggedTasks {
    async fn create_task(&self, task: TaskRequest) -> Result<String, CollaboratorError> {
        let task_id = format!("task_{}", Ulid::new());
        tracing::info!(
            task_id = %task_id,
            lead_id = %task.lead_id,
            title = %task.title,
            assignee = task.assignee.as_deref().unwrap_or("unassigned"),
            "task created"
        );
        Ok(task_id)
    }
}

/// Builds the collaborator set for the engine.
///
/// Leads and email templates come from `local`, which the seed loader
/// fills. Email delivery is recorded there as well.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build(
    local: &InMemoryCollaborators,
    timeout: Duration,
) -> Result<Collaborators, reqwest::Error> {
    let mut collaborators = local.collaborators(timeout);
    collaborators.webhooks = Arc::new(HttpWebhookCaller::new(timeout)?);
    collaborators.sequences = Arc::new(LoggedSequences);
    collaborators.notifier = Arc::new(LoggedNotifier);
    collaborators.tasks = Arc::new(LoggedTasks);
    Ok(collaborators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn methods_are_case_insensitive() {
        assert_eq!(parse_method("post").expect("method"), Method::POST);
        assert_eq!(parse_method("PATCH").expect("method"), Method::PATCH);
        assert!(parse_method("not a method").is_err());
    }

    #[tokio::test]
    async fn invalid_url_is_a_collaborator_error() {
        let caller = HttpWebhookCaller::new(Duration::from_secs(1)).expect("client");
        let err = caller
            .call(WebhookRequest {
                url: "not a url".to_string(),
                method: "POST".to_string(),
                headers: BTreeMap::new(),
                body: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollaboratorError::Failed {
                operation: "webhook",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn logged_tasks_hand_out_distinct_ids() {
        let task = TaskRequest {
            title: "Call back".to_string(),
            description: None,
            assignee: None,
            due_at: None,
            lead_id: LeadId::new("lead-1"),
        };
        let first = LoggedTasks.create_task(task.clone()).await.expect("task");
        let second = LoggedTasks.create_task(task).await.expect("task");
        assert!(first.starts_with("task_"));
        assert_ne!(first, second);
    }
}

//! The node executor.
//!
//! `execute_step` walks one participant through the graph until it suspends,
//! finishes, or hits the per-invocation step limit. Each node transition is
//! persisted with a versioned write before the next node runs, so a crash
//! mid-walk leaves the participant at the last committed node.

use crate::clock::Clock;
use crate::collaborator::{Collaborators, Notification, OutgoingEmail, TaskRequest, WebhookRequest};
use crate::definition::{MetricsDelta, Workflow};
use crate::error::{CollaboratorError, ExecutionError, StoreError};
use crate::lead::{Lead, ScoreLevel};
use crate::node::{
    BRANCH_NO, BRANCH_YES, FailurePolicy, Node, NodeId, NodeKind, SplitVariant, WaitUntilConfig,
};
use crate::participant::{LogAction, LogEntry, Participant, ParticipantStatus};
use crate::queue::{ExecutionJob, JobQueue, JobReason};
use crate::store::EngineStore;
use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use leadflow_core::ParticipantId;
use rand::Rng;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::instrument;

/// Reason recorded when an exit node is reached.
pub const EXIT_NODE_REASON: &str = "Exit node reached";

/// Reason recorded when a goal ends the run.
pub const GOAL_ACHIEVED_REASON: &str = "Goal achieved";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Nodes executed per invocation before handing off to a continuation job.
    pub step_limit: usize,
    /// Upper bound on each collaborator call.
    pub collaborator_timeout: std::time::Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_limit: 50,
            collaborator_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// What one node produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeResult {
    pub message: String,
    pub metadata: JsonValue,
    /// Suspend the participant.
    pub wait: bool,
    pub wait_until: Option<DateTime<Utc>>,
    /// End the run early.
    pub exit: bool,
    pub exit_reason: Option<String>,
    /// Overrides the graph lookup for the next node.
    pub next_node_id: Option<NodeId>,
    pub branch_label: Option<String>,
    pub split_variant_id: Option<String>,
    pub goal_achieved: bool,
    /// A collaborator failure that was logged and skipped.
    pub error: Option<String>,
}

impl NodeResult {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    fn suspend(mut self, until: DateTime<Utc>) -> Self {
        self.wait = true;
        self.wait_until = Some(until);
        self
    }

    fn exit(mut self, reason: impl Into<String>) -> Self {
        self.exit = true;
        self.exit_reason = Some(reason.into());
        self
    }

    fn branch(mut self, label: impl Into<String>) -> Self {
        self.branch_label = Some(label.into());
        self
    }

    fn log_action(&self) -> LogAction {
        if self.wait {
            LogAction::Waiting
        } else if self.goal_achieved {
            LogAction::GoalAchieved
        } else if self.branch_label.is_some() {
            LogAction::Branched
        } else {
            LogAction::Executed
        }
    }
}

/// How an `execute_step` invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The participant or its workflow is not active; nothing ran.
    Skipped,
    Waiting { until: DateTime<Utc> },
    Completed,
    Exited { reason: String },
    Failed { error: String },
    /// The step limit was reached and a continuation job was queued.
    Continued,
}

enum Transition {
    Next(Participant),
    Stop(StepOutcome),
}

/// Runs participants through their workflow graph.
#[derive(Clone)]
pub struct NodeExecutor {
    store: Arc<dyn EngineStore>,
    collaborators: Collaborators,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
}

impl NodeExecutor {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        mut collaborators: Collaborators,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: ExecutorConfig,
    ) -> Self {
        collaborators.timeout = config.collaborator_timeout;
        Self {
            store,
            collaborators,
            queue,
            clock,
            config,
        }
    }

    /// Advances a participant until it suspends, finishes, or reaches the
    /// step limit.
    ///
    /// # Errors
    ///
    /// Returns an error only when state could not be read or written. Node
    /// failures are recorded on the participant and reported as
    /// [`StepOutcome::Failed`].
    #[instrument(skip_all, fields(participant_id = %participant_id))]
    pub async fn execute_step(
        &self,
        participant_id: ParticipantId,
    ) -> Result<StepOutcome, ExecutionError> {
        let Some(mut participant) = self.store.get_participant(participant_id).await? else {
            tracing::warn!("participant not found");
            return Err(ExecutionError::ParticipantNotFound { participant_id });
        };
        if participant.status != ParticipantStatus::Active {
            tracing::debug!(status = %participant.status, "participant is not active");
            return Ok(StepOutcome::Skipped);
        }

        let Some(workflow) = self.store.get_workflow(participant.workflow_id).await? else {
            let error = format!("workflow {} not found", participant.workflow_id);
            return self.fail(participant, None, error).await;
        };
        if !workflow.is_active() {
            tracing::debug!(workflow_status = %workflow.status, "workflow is not active");
            return Ok(StepOutcome::Skipped);
        }

        for _ in 0..self.config.step_limit.max(1) {
            let Some(node_id) = participant.current_node_id.clone() else {
                return self
                    .fail(participant, None, "participant has no current node".to_string())
                    .await;
            };
            let Some(node) = workflow.node(&node_id) else {
                let error = format!("node {node_id} not found in workflow");
                return self.fail(participant, None, error).await;
            };

            let result = match self.run_node(&workflow, &participant, node).await {
                Ok(result) => result,
                Err(err) => return self.fail(participant, Some(node), err.to_string()).await,
            };

            match self.transition(&workflow, participant, node, result).await? {
                Transition::Next(next) => participant = next,
                Transition::Stop(outcome) => return Ok(outcome),
            }
        }

        let now = self.clock.now();
        participant.append_log(
            LogEntry::new(LogAction::Continued, now)
                .with_result(format!("step limit of {} reached", self.config.step_limit)),
        );
        let participant = self.save(participant, MetricsDelta::default()).await?;
        self.queue
            .enqueue(ExecutionJob::new(participant.id, JobReason::Continuation, now))
            .await?;
        tracing::info!("step limit reached, continuation queued");
        Ok(StepOutcome::Continued)
    }

    /// Ends a live participant's run on request.
    ///
    /// # Errors
    ///
    /// Fails if the participant is missing, already finished, or was
    /// written concurrently.
    #[instrument(skip_all, fields(participant_id = %participant_id))]
    pub async fn exit_participant(
        &self,
        participant_id: ParticipantId,
        reason: &str,
    ) -> Result<Participant, ExecutionError> {
        let mut participant = self
            .store
            .get_participant(participant_id)
            .await?
            .ok_or(ExecutionError::ParticipantNotFound { participant_id })?;
        participant.exit(reason, self.clock.now())?;
        let participant = self.save(participant, MetricsDelta::exited()).await?;
        tracing::info!(reason, "participant exited manually");
        Ok(participant)
    }

    async fn run_node(
        &self,
        workflow: &Workflow,
        participant: &Participant,
        node: &Node,
    ) -> Result<NodeResult, ExecutionError> {
        let now = self.clock.now();
        let settings = &workflow.settings;
        let within_hours = |at: DateTime<Utc>| {
            settings
                .business_hours
                .as_ref()
                .map_or(at, |hours| hours.next_open(at))
        };

        let result = match &node.kind {
            NodeKind::Trigger => NodeResult::message("entered"),
            NodeKind::Wait(config) => {
                let until = now.checked_add_signed(config.duration()).ok_or_else(|| {
                    ExecutionError::NodeFailed {
                        node_id: node.id.clone(),
                        reason: "wait ends beyond the supported date range".to_string(),
                    }
                })?;
                let until = within_hours(until);
                NodeResult::message(format!("waiting until {until}")).suspend(until)
            }
            NodeKind::WaitUntil(config) => {
                let until = within_hours(next_occurrence(config, now));
                NodeResult::message(format!("waiting until {until}")).suspend(until)
            }
            NodeKind::Condition(config) => {
                match self.lead_for(participant).await {
                    Ok(lead) => {
                        let label = if config.evaluate(&lead) { BRANCH_YES } else { BRANCH_NO };
                        NodeResult::message(format!("condition resolved to {label}")).branch(label)
                    }
                    Err(err) => {
                        tracing::warn!(node_id = %node.id, error = %err, "lead lookup failed, taking no branch");
                        NodeResult {
                            error: Some(err.to_string()),
                            ..NodeResult::message("condition could not be evaluated").branch(BRANCH_NO)
                        }
                    }
                }
            }
            NodeKind::Split(config) => {
                let draw = rand::thread_rng().gen_range(0.0..1.0);
                let variant = select_variant(&config.variants, draw).ok_or_else(|| {
                    ExecutionError::NodeFailed {
                        node_id: node.id.clone(),
                        reason: "split has no variants".to_string(),
                    }
                })?;
                NodeResult {
                    split_variant_id: Some(variant.id.clone()),
                    ..NodeResult::message(format!("selected variant {}", variant.id))
                        .branch(variant.id.clone())
                }
            }
            NodeKind::Goal(config) => {
                let met = match self.lead_for(participant).await {
                    Ok(lead) => config.goal.is_met(&lead),
                    Err(err) => {
                        tracing::warn!(node_id = %node.id, error = %err, "lead lookup failed, goal not met");
                        false
                    }
                };
                if !met {
                    NodeResult::message("goal not met")
                } else if settings.exit_on_goal {
                    NodeResult {
                        goal_achieved: true,
                        ..NodeResult::message("goal achieved").exit(GOAL_ACHIEVED_REASON)
                    }
                } else {
                    NodeResult {
                        goal_achieved: true,
                        ..NodeResult::message("goal achieved")
                    }
                }
            }
            NodeKind::Exit(config) => {
                let reason = config.reason.as_deref().unwrap_or(EXIT_NODE_REASON);
                NodeResult::message("exit").exit(reason)
            }
            _ => match self.run_action(participant, node).await {
                Ok(result) => result,
                Err(err) if node.on_failure == FailurePolicy::Continue => {
                    tracing::warn!(
                        node_id = %node.id,
                        node_type = %node.node_type(),
                        error = %err,
                        "action failed, continuing"
                    );
                    NodeResult {
                        error: Some(err.to_string()),
                        ..NodeResult::message(format!("{} skipped", node.node_type()))
                    }
                }
                Err(err) => {
                    return Err(ExecutionError::NodeFailed {
                        node_id: node.id.clone(),
                        reason: err.to_string(),
                    });
                }
            },
        };
        Ok(result)
    }

    async fn lead_for(
        &self,
        participant: &Participant,
    ) -> Result<Lead, CollaboratorError> {
        let c = &self.collaborators;
        c.call("get_lead", c.leads.get_lead(&participant.lead_id))
            .await
    }

    async fn run_action(
        &self,
        participant: &Participant,
        node: &Node,
    ) -> Result<NodeResult, CollaboratorError> {
        let c = &self.collaborators;
        let lead_id = &participant.lead_id;

        match &node.kind {
            NodeKind::SendEmail(config) => {
                let lead = self.lead_for(participant).await?;
                let template = c
                    .call("find_template", c.email.find_template(&config.template_id))
                    .await?
                    .ok_or_else(|| CollaboratorError::TemplateNotFound {
                        template_id: config.template_id.clone(),
                    })?;
                let email = OutgoingEmail {
                    template_id: template.id.clone(),
                    lead_id: lead_id.clone(),
                    to: lead.email.clone(),
                    subject: lead.render(&template.subject),
                    body: lead.render(&template.body),
                };
                let receipt = c.call("send_email", c.email.send(email)).await?;
                Ok(NodeResult::message(format!("sent email {}", template.id)).with_metadata(
                    json!({ "templateId": template.id, "messageId": receipt.message_id }),
                ))
            }
            NodeKind::AddTag(config) => {
                c.call("add_tag", c.leads.add_tag(lead_id, &config.tag))
                    .await?;
                Ok(NodeResult::message(format!("added tag {}", config.tag)))
            }
            NodeKind::RemoveTag(config) => {
                c.call("remove_tag", c.leads.remove_tag(lead_id, &config.tag))
                    .await?;
                Ok(NodeResult::message(format!("removed tag {}", config.tag)))
            }
            NodeKind::UpdateScore(config) => {
                let lead = self.lead_for(participant).await?;
                let score = config.operation.apply(lead.score, config.amount);
                c.call("set_score", c.leads.set_score(lead_id, score))
                    .await?;
                Ok(
                    NodeResult::message(format!("score {} -> {score}", lead.score)).with_metadata(
                        json!({
                            "previousScore": lead.score,
                            "score": score,
                            "scoreLevel": ScoreLevel::from_score(score).as_str(),
                        }),
                    ),
                )
            }
            NodeKind::UpdateField(config) => {
                c.call(
                    "set_field",
                    c.leads.set_field(lead_id, &config.field, config.value.clone()),
                )
                .await?;
                Ok(NodeResult::message(format!("set field {}", config.field)))
            }
            NodeKind::EnrollInSequence(config) => {
                c.call("enroll_sequence", c.sequences.enroll(lead_id, &config.sequence_id))
                    .await?;
                Ok(NodeResult::message(format!(
                    "enrolled in sequence {}",
                    config.sequence_id
                )))
            }
            NodeKind::SendWebhook(config) => {
                let lead = self.lead_for(participant).await?;
                let request = WebhookRequest {
                    url: lead.render(&config.url),
                    method: config.method.clone(),
                    headers: config.headers.clone(),
                    body: config.body.as_ref().map(|body| lead.render_json(body)),
                };
                let response = c.call("webhook", c.webhooks.call(request)).await?;
                if !response.is_success() {
                    return Err(CollaboratorError::Failed {
                        operation: "webhook",
                        reason: format!("status {}", response.status_code),
                    });
                }
                Ok(NodeResult::message("webhook delivered")
                    .with_metadata(json!({ "statusCode": response.status_code })))
            }
            NodeKind::SendNotification(config) => {
                let lead = self.lead_for(participant).await?;
                let notification = Notification {
                    recipient: config.recipient.clone(),
                    title: lead.render(&config.title),
                    message: lead.render(&config.message),
                    lead_id: lead_id.clone(),
                };
                c.call("notify", c.notifier.notify(notification)).await?;
                Ok(NodeResult::message(format!("notified {}", config.recipient)))
            }
            NodeKind::CreateTask(config) => {
                let lead = self.lead_for(participant).await?;
                let task = TaskRequest {
                    title: lead.render(&config.title),
                    description: config.description.as_deref().map(|d| lead.render(d)),
                    assignee: config.assignee.clone(),
                    due_at: config
                        .due_in_days
                        .map(|days| {
                            self.clock
                                .now()
                                .checked_add_signed(Duration::days(i64::from(days)))
                                .ok_or_else(|| CollaboratorError::Failed {
                                    operation: "create_task",
                                    reason: format!("due date {days} days out is out of range"),
                                })
                        })
                        .transpose()?,
                    lead_id: lead_id.clone(),
                };
                let task_id = c.call("create_task", c.tasks.create_task(task)).await?;
                Ok(NodeResult::message(format!("created task {task_id}"))
                    .with_metadata(json!({ "taskId": task_id })))
            }
            other => Ok(NodeResult::message(format!(
                "{} has no action",
                other.node_type()
            ))),
        }
    }

    /// Records the node's result and moves the participant on.
    async fn transition(
        &self,
        workflow: &Workflow,
        mut participant: Participant,
        node: &Node,
        result: NodeResult,
    ) -> Result<Transition, ExecutionError> {
        let now = self.clock.now();

        let mut entry = LogEntry::new(result.log_action(), now)
            .for_node(node)
            .with_result(result.message.clone());
        if !result.metadata.is_null() {
            entry = entry.with_metadata(result.metadata.clone());
        }
        if let Some(error) = &result.error {
            entry = entry.with_error(error.clone());
        }
        participant.append_log(entry);

        let mut delta = MetricsDelta::default();
        if result.goal_achieved && participant.mark_goal(now) {
            delta = delta.with_goal();
        }
        if let Some(variant) = result.split_variant_id {
            participant.split_variant_id = Some(variant);
        }

        if result.wait {
            let until = result.wait_until.unwrap_or(now);
            participant.wait_until(until)?;
            self.save(participant, delta).await?;
            tracing::debug!(%until, "participant suspended");
            return Ok(Transition::Stop(StepOutcome::Waiting { until }));
        }

        if result.exit {
            let reason = result
                .exit_reason
                .unwrap_or_else(|| EXIT_NODE_REASON.to_string());
            participant.exit(reason.clone(), now)?;
            self.save(participant, MetricsDelta::exited().merge(delta))
                .await?;
            tracing::info!(reason = %reason, "participant exited");
            return Ok(Transition::Stop(StepOutcome::Exited { reason }));
        }

        let next = result.next_node_id.or_else(|| {
            workflow
                .graph
                .next_node(&node.id, result.branch_label.as_deref())
                .map(|next| next.id.clone())
        });

        match next {
            None => {
                participant.complete(now)?;
                self.save(participant, MetricsDelta::completed().merge(delta))
                    .await?;
                tracing::info!("participant completed");
                Ok(Transition::Stop(StepOutcome::Completed))
            }
            Some(next) => {
                participant.advance(next, result.branch_label)?;
                let participant = self.save(participant, delta).await?;
                Ok(Transition::Next(participant))
            }
        }
    }

    async fn fail(
        &self,
        mut participant: Participant,
        node: Option<&Node>,
        error: String,
    ) -> Result<StepOutcome, ExecutionError> {
        tracing::error!(error = %error, "participant failed");
        participant.fail(error.clone(), node, self.clock.now())?;
        self.save(participant, MetricsDelta::failed()).await?;
        Ok(StepOutcome::Failed { error })
    }

    async fn save(
        &self,
        participant: Participant,
        delta: MetricsDelta,
    ) -> Result<Participant, ExecutionError> {
        let participant_id = participant.id;
        self.store
            .update_participant(participant, delta)
            .await
            .map_err(|err| match err {
                StoreError::VersionConflict { .. } => ExecutionError::Conflict { participant_id },
                other => ExecutionError::Store(other),
            })
    }
}

/// Picks a split variant for a uniform draw in `[0, 1)`.
///
/// The draw is scaled to the total weight and walked through the variants
/// cumulatively. Falls back to the first variant if rounding leaves none
/// selected. Returns `None` only for an empty list.
#[must_use]
pub fn select_variant(variants: &[SplitVariant], draw: f64) -> Option<&SplitVariant> {
    let total: f64 = variants.iter().map(|v| v.weight.max(0.0)).sum();
    let mut remaining = draw * total;
    for variant in variants {
        let weight = variant.weight.max(0.0);
        if remaining < weight {
            return Some(variant);
        }
        remaining -= weight;
    }
    variants.first()
}

/// Next wall-clock occurrence of the configured time, strictly after `now`.
#[must_use]
pub fn next_occurrence(config: &WaitUntilConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let offset =
        FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    let fallback = |days| now.checked_add_signed(Duration::days(days)).unwrap_or(now);
    let Some(time) = NaiveTime::from_hms_opt(config.hour, config.minute, 0) else {
        return fallback(1);
    };
    let today = now.with_timezone(&offset).date_naive();

    for day in 0..=7 {
        let Some(date) = today.checked_add_days(Days::new(day)) else {
            break;
        };
        if config.weekday.is_some_and(|weekday| date.weekday() != weekday) {
            continue;
        }
        if let Some(at) = offset.from_local_datetime(&date.and_time(time)).single()
            && at > now
        {
            return at.with_timezone(&Utc);
        }
    }

    fallback(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ConditionConfig, ConditionOperator};
    use crate::definition::{BusinessHours, EnrollmentSettings};
    use crate::edge::Edge;
    use crate::collaborator::TaskCreator;
    use crate::node::{
        CreateTaskConfig, EnrollInSequenceConfig, ExitConfig, GoalCondition, GoalConfig,
        NodeType, NotificationConfig, ScoreOperation, SendEmailConfig, SplitConfig, TagConfig,
        UpdateFieldConfig, UpdateScoreConfig, WaitConfig, WaitUnit, WebhookConfig,
    };
    use async_trait::async_trait;
    use leadflow_core::LeadId;
    use crate::collaborator::EmailTemplate;
    use crate::testing::{Engine, chain, start, workflow};
    use chrono::Weekday;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tag(id: &str, tag: &str) -> Node {
        Node::new(
            id,
            format!("Tag {tag}"),
            NodeKind::AddTag(TagConfig {
                tag: tag.to_string(),
            }),
        )
    }

    fn wait_hours(id: &str, amount: u32) -> Node {
        Node::new(
            id,
            "Wait",
            NodeKind::Wait(WaitConfig {
                amount,
                unit: WaitUnit::Hours,
            }),
        )
    }

    fn email(id: &str, template_id: &str) -> Node {
        Node::new(
            id,
            "Email",
            NodeKind::SendEmail(SendEmailConfig {
                template_id: template_id.to_string(),
            }),
        )
    }

    fn exit(id: &str) -> Node {
        Node::new(id, "Exit", NodeKind::Exit(ExitConfig::default()))
    }

    #[tokio::test]
    async fn runs_until_wait_and_persists_suspension() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "ada@example.com")).await;
        let wf = engine
            .publish(chain(vec![
                tag("tag", "started"),
                wait_hours("wait", 1),
                email("email", "T1"),
                exit("exit"),
            ]))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine
            .executor()
            .execute_step(participant.id)
            .await
            .expect("step");

        let until = start() + Duration::hours(1);
        assert_eq!(outcome, StepOutcome::Waiting { until });
        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(lead.has_tag("started"));

        let participant = engine.participant(participant.id).await;
        assert_eq!(participant.status, ParticipantStatus::Waiting);
        assert_eq!(participant.waiting_until, Some(until));
        assert_eq!(participant.current_node_id, Some(NodeId::new("wait")));
        let actions: Vec<_> = participant.log.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![LogAction::Entered, LogAction::Executed, LogAction::Waiting]
        );
    }

    #[tokio::test]
    async fn resumed_participant_sends_email_and_exits() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "ada@example.com")).await;
        engine
            .collaborators
            .add_template(EmailTemplate {
                id: "T1".to_string(),
                subject: "Hi {{firstName}}".to_string(),
                body: "Welcome {{email}}".to_string(),
            })
            .await;
        let wf = engine
            .publish(chain(vec![wait_hours("wait", 1), email("email", "T1"), exit("exit")]))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;
        let executor = engine.executor();
        executor.execute_step(participant.id).await.expect("step");

        engine.clock.advance(Duration::hours(1));
        let mut waiting = engine.participant(participant.id).await;
        waiting
            .resume(NodeId::new("email"), engine.clock.now())
            .expect("resume");
        engine
            .store
            .update_participant(waiting, MetricsDelta::default())
            .await
            .expect("save");

        let outcome = executor.execute_step(participant.id).await.expect("step");
        assert_eq!(
            outcome,
            StepOutcome::Exited {
                reason: EXIT_NODE_REASON.to_string()
            }
        );

        let sent = engine.collaborators.sent_emails().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template_id, "T1");
        assert_eq!(sent[0].to, "ada@example.com");
        assert_eq!(sent[0].body, "Welcome ada@example.com");

        let participant = engine.participant(participant.id).await;
        assert_eq!(participant.status, ParticipantStatus::Exited);
        assert_eq!(participant.exit_reason.as_deref(), Some(EXIT_NODE_REASON));
        assert_eq!(participant.current_node_id, None);

        let metrics = engine.workflow(wf.id).await.metrics;
        assert_eq!(metrics.total_entered, 1);
        assert_eq!(metrics.currently_active, 0);
        assert_eq!(metrics.exited, 1);
    }

    #[tokio::test]
    async fn condition_routes_by_score() {
        let engine = Engine::new();
        engine.lead(Lead::new("hot", "hot@example.com").with_score(80)).await;
        engine.lead(Lead::new("cold", "cold@example.com").with_score(10)).await;

        let wf = engine
            .publish(workflow(
                vec![
                    Node::new("trigger", "Trigger", NodeKind::Trigger),
                    Node::new(
                        "cond",
                        "Score over 50",
                        NodeKind::Condition(ConditionConfig::new(
                            "score",
                            ConditionOperator::GreaterThan,
                            json!(50),
                        )),
                    ),
                    tag("high", "high"),
                    tag("low", "low"),
                ],
                vec![
                    Edge::new("e1", "trigger", "cond"),
                    Edge::new("e2", "cond", "high").with_branch(BRANCH_YES),
                    Edge::new("e3", "cond", "low").with_branch(BRANCH_NO),
                ],
            ))
            .await;

        let executor = engine.executor();
        for (lead, expected) in [("hot", BRANCH_YES), ("cold", BRANCH_NO)] {
            let participant = engine.enroll(&wf, lead).await;
            let outcome = executor.execute_step(participant.id).await.expect("step");
            assert_eq!(outcome, StepOutcome::Completed);
            let participant = engine.participant(participant.id).await;
            assert_eq!(participant.branch_path, vec![expected.to_string()]);
        }
    }

    #[tokio::test]
    async fn unconfigured_condition_takes_no_branch() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com").with_score(99)).await;
        let wf = engine
            .publish(workflow(
                vec![
                    Node::new("trigger", "Trigger", NodeKind::Trigger),
                    Node::new("cond", "Empty", NodeKind::Condition(ConditionConfig::default())),
                    tag("yes", "yes"),
                    tag("no", "no"),
                ],
                vec![
                    Edge::new("e1", "trigger", "cond"),
                    Edge::new("e2", "cond", "yes").with_branch(BRANCH_YES),
                    Edge::new("e3", "cond", "no").with_branch(BRANCH_NO),
                ],
            ))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(lead.has_tag("no"));
        assert!(!lead.has_tag("yes"));
    }

    #[tokio::test]
    async fn goal_with_exit_on_goal_ends_run() {
        let engine = Engine::new();
        engine
            .lead(Lead::new("lead-1", "a@example.com").with_tag("purchased"))
            .await;
        let goal = Node::new(
            "goal",
            "Purchased",
            NodeKind::Goal(GoalConfig {
                goal: GoalCondition::TagAdded {
                    tag: "purchased".to_string(),
                },
            }),
        );
        let wf = chain(vec![goal, tag("after", "after")]).with_settings(EnrollmentSettings {
            exit_on_goal: true,
            ..EnrollmentSettings::default()
        });
        let wf = engine.publish(wf).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine
            .executor()
            .execute_step(participant.id)
            .await
            .expect("step");
        assert_eq!(
            outcome,
            StepOutcome::Exited {
                reason: GOAL_ACHIEVED_REASON.to_string()
            }
        );

        let participant = engine.participant(participant.id).await;
        assert!(participant.goal_achieved);
        assert_eq!(participant.goal_achieved_at, Some(start()));
        let metrics = engine.workflow(wf.id).await.metrics;
        assert_eq!(metrics.goal_achieved, 1);
        assert_eq!(metrics.exited, 1);
        assert_eq!(metrics.currently_active, 0);
    }

    #[tokio::test]
    async fn goal_without_exit_continues() {
        let engine = Engine::new();
        engine
            .lead(Lead::new("lead-1", "a@example.com").with_score(90))
            .await;
        let goal = Node::new(
            "goal",
            "Hot",
            NodeKind::Goal(GoalConfig {
                goal: GoalCondition::ScoreAtLeast { score: 75 },
            }),
        );
        let wf = engine.publish(chain(vec![goal, tag("after", "after")])).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Completed);
        let participant = engine.participant(participant.id).await;
        assert!(participant.goal_achieved);
        let metrics = engine.workflow(wf.id).await.metrics;
        assert_eq!(metrics.goal_achieved, 1);
        assert_eq!(metrics.completed, 1);
    }

    #[tokio::test]
    async fn score_updates_are_clamped() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com").with_score(95)).await;
        let wf = engine
            .publish(chain(vec![Node::new(
                "score",
                "Bump",
                NodeKind::UpdateScore(UpdateScoreConfig {
                    operation: ScoreOperation::Add,
                    amount: 1_000,
                }),
            )]))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert_eq!(lead.score, 100);
        let participant = engine.participant(participant.id).await;
        let entry = &participant.log[1];
        assert_eq!(entry.metadata["scoreLevel"], "very_hot");
    }

    #[tokio::test]
    async fn missing_template_is_logged_and_skipped() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let wf = engine
            .publish(chain(vec![email("email", "missing"), tag("after", "after")]))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Completed);

        let participant = engine.participant(participant.id).await;
        let entry = &participant.log[1];
        assert!(entry.error.as_deref().is_some_and(|e| e.contains("missing")));
        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(lead.has_tag("after"));
    }

    #[tokio::test]
    async fn failing_action_with_fail_policy_fails_participant() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        engine.collaborators.set_webhook_status(500).await;
        let webhook = Node::new(
            "hook",
            "Notify CRM",
            NodeKind::SendWebhook(WebhookConfig {
                url: "https://crm.example.com/hook".to_string(),
                method: "POST".to_string(),
                headers: Default::default(),
                body: Some(json!({ "email": "{{email}}" })),
            }),
        )
        .with_failure_policy(FailurePolicy::Fail);
        let wf = engine.publish(chain(vec![webhook, tag("after", "after")])).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert!(matches!(outcome, StepOutcome::Failed { ref error } if error.contains("500")));

        let calls = engine.collaborators.webhook_calls().await;
        assert_eq!(calls[0].body, Some(json!({ "email": "a@example.com" })));
        let participant = engine.participant(participant.id).await;
        assert_eq!(participant.status, ParticipantStatus::Failed);
        assert!(participant.failed_at.is_some());
        let metrics = engine.workflow(wf.id).await.metrics;
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.currently_active, 0);
    }

    #[tokio::test]
    async fn missing_node_fails_participant() {
        let engine = Engine::new();
        let wf = engine.publish(chain(vec![tag("a", "a")])).await;
        let mut participant = engine.enroll(&wf, "lead-1").await;
        participant.current_node_id = Some(NodeId::new("gone"));
        engine
            .store
            .update_participant(participant.clone(), MetricsDelta::default())
            .await
            .expect("save");

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert!(matches!(outcome, StepOutcome::Failed { ref error } if error.contains("gone")));
    }

    #[tokio::test]
    async fn step_limit_queues_continuation() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let nodes = (0..10).map(|i| tag(&format!("n{i}"), &format!("t{i}"))).collect();
        let wf = engine.publish(chain(nodes)).await;
        let participant = engine.enroll(&wf, "lead-1").await;
        let executor = engine.executor_with(ExecutorConfig {
            step_limit: 4,
            ..ExecutorConfig::default()
        });

        let outcome = executor.execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Continued);
        let pending = engine.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason, JobReason::Continuation);
        let stored = engine.participant(participant.id).await;
        assert_eq!(stored.status, ParticipantStatus::Active);
        assert_eq!(stored.current_node_id, Some(NodeId::new("n4")));

        // two more invocations finish the chain
        assert_eq!(
            executor.execute_step(participant.id).await.expect("step"),
            StepOutcome::Continued
        );
        assert_eq!(
            executor.execute_step(participant.id).await.expect("step"),
            StepOutcome::Completed
        );
    }

    #[tokio::test]
    async fn paused_workflow_is_not_advanced() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let wf = engine.publish(chain(vec![tag("a", "a")])).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let mut paused = engine.workflow(wf.id).await;
        paused.pause().expect("pause");
        engine.store.update_workflow(paused).await.expect("update");

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Skipped);
        assert_eq!(
            engine.participant(participant.id).await.status,
            ParticipantStatus::Active
        );
    }

    #[tokio::test]
    async fn exit_participant_ends_waiting_run() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let wf = engine.publish(chain(vec![wait_hours("wait", 2)])).await;
        let participant = engine.enroll(&wf, "lead-1").await;
        let executor = engine.executor();
        executor.execute_step(participant.id).await.expect("step");

        let exited = executor
            .exit_participant(participant.id, "Unsubscribed")
            .await
            .expect("exit");
        assert_eq!(exited.status, ParticipantStatus::Exited);
        assert_eq!(exited.waiting_until, None);

        let err = executor
            .exit_participant(participant.id, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Transition(_)));
    }

    #[tokio::test]
    async fn missing_participant_is_reported() {
        let engine = Engine::new();
        let id = ParticipantId::new();
        let err = engine.executor().execute_step(id).await.unwrap_err();
        assert_eq!(err, ExecutionError::ParticipantNotFound { participant_id: id });
    }

    #[tokio::test]
    async fn wait_respects_business_hours() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        // 10:00 + 10h lands at 20:00, outside 9-17
        let wf = chain(vec![wait_hours("wait", 10)]).with_settings(EnrollmentSettings {
            business_hours: Some(BusinessHours {
                start_hour: 9,
                end_hour: 17,
                days: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                utc_offset_minutes: 0,
            }),
            ..EnrollmentSettings::default()
        });
        let wf = engine.publish(wf).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        let next_morning = start() + Duration::hours(23);
        assert_eq!(outcome, StepOutcome::Waiting { until: next_morning });
    }

    #[test]
    fn split_selection_is_weighted() {
        let variants = vec![
            SplitVariant {
                id: "A".to_string(),
                name: None,
                weight: 50.0,
            },
            SplitVariant {
                id: "B".to_string(),
                name: None,
                weight: 50.0,
            },
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 10_000;
        let a = (0..trials)
            .filter(|_| {
                select_variant(&variants, rng.gen_range(0.0..1.0)).map(|v| v.id.as_str()) == Some("A")
            })
            .count();
        let share = a as f64 / f64::from(trials);
        assert!((0.47..0.53).contains(&share), "share of A was {share}");
    }

    #[test]
    fn split_selection_edges() {
        let variants = vec![
            SplitVariant {
                id: "A".to_string(),
                name: None,
                weight: 0.0,
            },
            SplitVariant {
                id: "B".to_string(),
                name: None,
                weight: 30.0,
            },
        ];
        assert_eq!(select_variant(&variants, 0.0).map(|v| v.id.as_str()), Some("B"));
        assert_eq!(select_variant(&variants, 0.999).map(|v| v.id.as_str()), Some("B"));
        assert!(select_variant(&[], 0.5).is_none());

        let zero = vec![SplitVariant {
            id: "Z".to_string(),
            name: None,
            weight: 0.0,
        }];
        assert_eq!(select_variant(&zero, 0.5).map(|v| v.id.as_str()), Some("Z"));
    }

    #[tokio::test]
    async fn split_records_variant() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let wf = engine
            .publish(workflow(
                vec![
                    Node::new("trigger", "Trigger", NodeKind::Trigger),
                    Node::new(
                        "split",
                        "A/B",
                        NodeKind::Split(SplitConfig {
                            variants: vec![SplitVariant {
                                id: "only".to_string(),
                                name: None,
                                weight: 1.0,
                            }],
                        }),
                    ),
                    tag("a", "a"),
                ],
                vec![
                    Edge::new("e1", "trigger", "split"),
                    Edge::new("e2", "split", "a").with_branch("only"),
                ],
            ))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let participant = engine.participant(participant.id).await;
        assert_eq!(participant.split_variant_id.as_deref(), Some("only"));
        assert_eq!(participant.branch_path, vec!["only".to_string()]);
    }

    #[test]
    fn wait_until_is_strictly_future() {
        let config = WaitUntilConfig {
            hour: 10,
            minute: 0,
            weekday: None,
            utc_offset_minutes: 0,
        };
        // exactly 10:00 rolls to tomorrow
        assert_eq!(next_occurrence(&config, start()), start() + Duration::days(1));

        let earlier = start() - Duration::minutes(1);
        assert_eq!(next_occurrence(&config, earlier), start());

        for minutes in [0, 59, 600, 1439] {
            let now = start() + Duration::minutes(minutes);
            assert!(next_occurrence(&config, now) > now);
        }
    }

    #[test]
    fn wait_until_pins_weekday() {
        let config = WaitUntilConfig {
            hour: 9,
            minute: 30,
            weekday: Some(Weekday::Mon),
            utc_offset_minutes: 0,
        };
        // Wednesday -> next Monday 2026-03-09
        let expected = start() + Duration::days(5) - Duration::minutes(30);
        assert_eq!(next_occurrence(&config, start()), expected);
    }

    fn task(id: &str, due_in_days: Option<u32>) -> Node {
        Node::new(
            id,
            "Follow up",
            NodeKind::CreateTask(CreateTaskConfig {
                title: "Call {{email}}".to_string(),
                description: Some("Lead from {{email}}".to_string()),
                assignee: Some("rep-7".to_string()),
                due_in_days,
            }),
        )
    }

    fn entry_for<'a>(participant: &'a Participant, node_id: &str) -> &'a LogEntry {
        participant
            .log
            .iter()
            .find(|entry| entry.node_id.as_ref().is_some_and(|id| id.as_str() == node_id))
            .expect("log entry for node")
    }

    #[tokio::test]
    async fn enroll_in_sequence_records_enrollment() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let node = Node::new(
            "seq",
            "Nurture",
            NodeKind::EnrollInSequence(EnrollInSequenceConfig {
                sequence_id: "nurture".to_string(),
            }),
        );
        let wf = engine.publish(chain(vec![node])).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Completed);
        assert_eq!(
            engine.collaborators.sequence_enrollments().await,
            vec![(LeadId::new("lead-1"), "nurture".to_string())]
        );

        let participant = engine.participant(participant.id).await;
        let entry = entry_for(&participant, "seq");
        assert_eq!(entry.node_type, Some(NodeType::EnrollInSequence));
        assert_eq!(entry.result.as_deref(), Some("enrolled in sequence nurture"));
    }

    #[tokio::test]
    async fn send_notification_renders_lead_fields() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let node = Node::new(
            "ping",
            "Ping sales",
            NodeKind::SendNotification(NotificationConfig {
                recipient: "sales@example.com".to_string(),
                title: "New lead {{email}}".to_string(),
                message: "{{email}} finished onboarding".to_string(),
            }),
        );
        let wf = engine.publish(chain(vec![node])).await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let notifications = engine.collaborators.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].recipient, "sales@example.com");
        assert_eq!(notifications[0].title, "New lead a@example.com");
        assert_eq!(notifications[0].message, "a@example.com finished onboarding");
        assert_eq!(notifications[0].lead_id, LeadId::new("lead-1"));

        let participant = engine.participant(participant.id).await;
        let entry = entry_for(&participant, "ping");
        assert_eq!(entry.result.as_deref(), Some("notified sales@example.com"));
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn create_task_sets_due_date_and_records_task_id() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let wf = engine.publish(chain(vec![task("task", Some(3))])).await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let tasks = engine.collaborators.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Call a@example.com");
        assert_eq!(tasks[0].description.as_deref(), Some("Lead from a@example.com"));
        assert_eq!(tasks[0].assignee.as_deref(), Some("rep-7"));
        assert_eq!(tasks[0].due_at, Some(start() + Duration::days(3)));

        let participant = engine.participant(participant.id).await;
        let entry = entry_for(&participant, "task");
        assert_eq!(entry.result.as_deref(), Some("created task task-1"));
        assert_eq!(entry.metadata, json!({ "taskId": "task-1" }));
    }

    #[tokio::test]
    async fn remove_tag_drops_the_tag() {
        let engine = Engine::new();
        engine
            .lead(Lead::new("lead-1", "a@example.com").with_tag("trial"))
            .await;
        let node = Node::new(
            "untag",
            "Drop trial",
            NodeKind::RemoveTag(TagConfig {
                tag: "trial".to_string(),
            }),
        );
        let wf = engine.publish(chain(vec![node])).await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(!lead.has_tag("trial"));
        let participant = engine.participant(participant.id).await;
        assert_eq!(
            entry_for(&participant, "untag").result.as_deref(),
            Some("removed tag trial")
        );
    }

    #[tokio::test]
    async fn update_field_writes_custom_field() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let node = Node::new(
            "plan",
            "Set plan",
            NodeKind::UpdateField(UpdateFieldConfig {
                field: "customFields.plan".to_string(),
                value: json!("pro"),
            }),
        );
        let wf = engine.publish(chain(vec![node])).await;
        let participant = engine.enroll(&wf, "lead-1").await;
        engine.executor().execute_step(participant.id).await.expect("step");

        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert_eq!(lead.custom_fields.get("plan"), Some(&json!("pro")));
        let participant = engine.participant(participant.id).await;
        assert_eq!(
            entry_for(&participant, "plan").result.as_deref(),
            Some("set field customFields.plan")
        );
    }

    #[tokio::test]
    async fn wait_until_resumes_on_next_days_slot() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let morning = Node::new(
            "morning",
            "Next 09:00",
            NodeKind::WaitUntil(WaitUntilConfig {
                hour: 9,
                minute: 0,
                weekday: None,
                utc_offset_minutes: 0,
            }),
        );
        let wf = engine
            .publish(chain(vec![morning, tag("after", "after")]))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;
        let executor = engine.executor();

        // Wednesday 10:00 is past today's slot
        let until = start() + Duration::hours(23);
        let outcome = executor.execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Waiting { until });
        assert_eq!(engine.participant(participant.id).await.waiting_until, Some(until));

        engine.clock.set(until);
        let mut waiting = engine.participant(participant.id).await;
        waiting
            .resume(NodeId::new("after"), engine.clock.now())
            .expect("resume");
        engine
            .store
            .update_participant(waiting, MetricsDelta::default())
            .await
            .expect("save");

        let outcome = executor.execute_step(participant.id).await.expect("step");
        assert_eq!(outcome, StepOutcome::Completed);
        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(lead.has_tag("after"));
    }

    /// Task creator that never answers in time.
    struct SlowTasks;

    #[async_trait]
    impl TaskCreator for SlowTasks {
        async fn create_task(&self, _task: TaskRequest) -> Result<String, CollaboratorError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn slow_task_executor(engine: &Engine) -> NodeExecutor {
        let config = ExecutorConfig {
            collaborator_timeout: std::time::Duration::from_millis(20),
            ..ExecutorConfig::default()
        };
        let mut collaborators = engine.collaborators.collaborators(config.collaborator_timeout);
        collaborators.tasks = Arc::new(SlowTasks);
        NodeExecutor::new(
            Arc::new(engine.store.clone()),
            collaborators,
            Arc::new(engine.queue.clone()),
            Arc::new(engine.clock.clone()),
            config,
        )
    }

    #[tokio::test]
    async fn collaborator_timeout_is_skipped_under_continue_policy() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let wf = engine
            .publish(chain(vec![task("task", None), tag("after", "after")]))
            .await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = slow_task_executor(&engine)
            .execute_step(participant.id)
            .await
            .expect("step");
        assert_eq!(outcome, StepOutcome::Completed);

        let participant = engine.participant(participant.id).await;
        let entry = entry_for(&participant, "task");
        assert_eq!(entry.error.as_deref(), Some("create_task timed out"));
        assert_eq!(entry.result.as_deref(), Some("create_task skipped"));
        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(lead.has_tag("after"));
    }

    #[tokio::test]
    async fn collaborator_timeout_fails_participant_under_fail_policy() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let strict = task("task", None).with_failure_policy(FailurePolicy::Fail);
        let wf = engine.publish(chain(vec![strict, tag("after", "after")])).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = slow_task_executor(&engine)
            .execute_step(participant.id)
            .await
            .expect("step");
        assert!(matches!(outcome, StepOutcome::Failed { ref error } if error.contains("timed out")));

        let participant = engine.participant(participant.id).await;
        assert_eq!(participant.status, ParticipantStatus::Failed);
        let lead = engine.collaborators.lead(&"lead-1".into()).await.expect("lead");
        assert!(!lead.has_tag("after"));
    }

    #[tokio::test]
    async fn wait_past_the_calendar_fails_only_that_participant() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        engine.lead(Lead::new("lead-2", "b@example.com")).await;
        let endless = chain(vec![wait_hours("wait", u32::MAX), tag("after", "after")]);
        assert!(endless.validate().is_err());
        let endless = engine.force_active(endless).await;
        let healthy = engine.publish(chain(vec![tag("ok", "ok")])).await;

        let stuck = engine.enroll(&endless, "lead-1").await;
        let fine = engine.enroll(&healthy, "lead-2").await;
        let executor = engine.executor();

        let outcome = executor.execute_step(stuck.id).await.expect("step");
        assert!(
            matches!(outcome, StepOutcome::Failed { ref error } if error.contains("date range"))
        );
        let stuck = engine.participant(stuck.id).await;
        assert_eq!(stuck.status, ParticipantStatus::Failed);
        assert_eq!(engine.workflow(endless.id).await.metrics.failed, 1);

        assert_eq!(
            executor.execute_step(fine.id).await.expect("step"),
            StepOutcome::Completed
        );
    }

    #[tokio::test]
    async fn task_due_date_past_the_calendar_is_a_node_failure() {
        let engine = Engine::new();
        engine.lead(Lead::new("lead-1", "a@example.com")).await;
        let strict = task("task", Some(u32::MAX)).with_failure_policy(FailurePolicy::Fail);
        let wf = engine.force_active(chain(vec![strict])).await;
        let participant = engine.enroll(&wf, "lead-1").await;

        let outcome = engine.executor().execute_step(participant.id).await.expect("step");
        assert!(
            matches!(outcome, StepOutcome::Failed { ref error } if error.contains("out of range"))
        );
        assert!(engine.collaborators.tasks().await.is_empty());
    }
}

//! Participant state: one lead's run through one workflow.
//!
//! A participant is created on enrollment and mutated only by the node
//! executor and the wake sweep. Once it reaches a terminal status it no
//! longer changes.

use crate::error::TransitionError;
use crate::node::{Node, NodeId, NodeType};
use chrono::{DateTime, Utc};
use leadflow_core::{LeadId, ParticipantId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Waiting,
    Completed,
    Exited,
    Failed,
}

impl ParticipantStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Exited => "exited",
            Self::Failed => "failed",
        }
    }

    /// Active or waiting.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Waiting)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Entered,
    Executed,
    Waiting,
    Resumed,
    Branched,
    GoalAchieved,
    Continued,
    Completed,
    Exited,
    Failed,
}

/// One entry of a participant's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub action: LogAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub metadata: JsonValue,
}

impl LogEntry {
    #[must_use]
    pub fn new(action: LogAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            node_id: None,
            node_type: None,
            node_name: None,
            action,
            result: None,
            error: None,
            timestamp,
            metadata: JsonValue::Null,
        }
    }

    /// Attributes the entry to a node.
    #[must_use]
    pub fn for_node(mut self, node: &Node) -> Self {
        self.node_id = Some(node.id.clone());
        self.node_type = Some(node.node_type());
        self.node_name = Some(node.name.clone());
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One enrollment of a lead in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub workflow_id: WorkflowId,
    pub lead_id: LeadId,
    pub status: ParticipantStatus,
    /// Present while active or waiting.
    pub current_node_id: Option<NodeId>,
    pub entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Present while waiting.
    pub waiting_until: Option<DateTime<Utc>>,
    /// Branch labels taken, in order.
    pub branch_path: Vec<String>,
    pub split_variant_id: Option<String>,
    pub goal_achieved: bool,
    pub goal_achieved_at: Option<DateTime<Utc>>,
    pub log: Vec<LogEntry>,
    /// Payload of the event that caused enrollment.
    pub trigger_data: JsonValue,
    /// 1 for the first enrollment of this lead in this workflow.
    pub enrollment_count: u32,
    /// Optimistic concurrency version, bumped by the store on every write.
    pub version: u64,
}

impl Participant {
    /// Creates an active participant positioned at `start`.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        lead_id: LeadId,
        start: NodeId,
        trigger_data: JsonValue,
        enrollment_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut participant = Self {
            id: ParticipantId::new(),
            workflow_id,
            lead_id,
            status: ParticipantStatus::Active,
            current_node_id: Some(start),
            entered_at: now,
            completed_at: None,
            exited_at: None,
            exit_reason: None,
            failed_at: None,
            error: None,
            waiting_until: None,
            branch_path: Vec::new(),
            split_variant_id: None,
            goal_achieved: false,
            goal_achieved_at: None,
            log: Vec::new(),
            trigger_data: trigger_data.clone(),
            enrollment_count,
            version: 0,
        };
        participant.append_log(
            LogEntry::new(LogAction::Entered, now)
                .with_result(format!("enrollment #{enrollment_count}"))
                .with_metadata(trigger_data),
        );
        participant
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Appends a log entry, keeping timestamps non-decreasing.
    pub fn append_log(&mut self, mut entry: LogEntry) {
        if let Some(last) = self.log.last()
            && entry.timestamp < last.timestamp
        {
            entry.timestamp = last.timestamp;
        }
        self.log.push(entry);
    }

    fn require(
        &self,
        allowed: &[ParticipantStatus],
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(TransitionError {
                participant_id: self.id,
                status: self.status,
                action,
            })
        }
    }

    /// Suspends the participant until `until`.
    ///
    /// # Errors
    ///
    /// Fails unless the participant is active.
    pub fn wait_until(&mut self, until: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(&[ParticipantStatus::Active], "suspend")?;
        self.status = ParticipantStatus::Waiting;
        self.waiting_until = Some(until);
        Ok(())
    }

    /// Wakes a waiting participant at `next`.
    ///
    /// # Errors
    ///
    /// Fails unless the participant is waiting.
    pub fn resume(&mut self, next: NodeId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(&[ParticipantStatus::Waiting], "resume")?;
        self.status = ParticipantStatus::Active;
        self.waiting_until = None;
        self.current_node_id = Some(next.clone());
        self.append_log(
            LogEntry::new(LogAction::Resumed, now).with_result(format!("resumed at {next}")),
        );
        Ok(())
    }

    /// Moves an active participant to `next`, recording the branch taken.
    ///
    /// # Errors
    ///
    /// Fails unless the participant is active.
    pub fn advance(&mut self, next: NodeId, branch: Option<String>) -> Result<(), TransitionError> {
        self.require(&[ParticipantStatus::Active], "advance")?;
        if let Some(branch) = branch {
            self.branch_path.push(branch);
        }
        self.current_node_id = Some(next);
        Ok(())
    }

    /// Records goal achievement. Returns true the first time.
    pub fn mark_goal(&mut self, now: DateTime<Utc>) -> bool {
        if self.goal_achieved {
            return false;
        }
        self.goal_achieved = true;
        self.goal_achieved_at = Some(now);
        true
    }

    fn finish(&mut self, status: ParticipantStatus) {
        self.status = status;
        self.current_node_id = None;
        self.waiting_until = None;
    }

    /// Ends the run normally.
    ///
    /// # Errors
    ///
    /// Fails if the participant is already terminal.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require(&[ParticipantStatus::Active, ParticipantStatus::Waiting], "complete")?;
        self.finish(ParticipantStatus::Completed);
        self.completed_at = Some(now);
        self.append_log(LogEntry::new(LogAction::Completed, now));
        Ok(())
    }

    /// Ends the run early.
    ///
    /// # Errors
    ///
    /// Fails if the participant is already terminal.
    pub fn exit(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(&[ParticipantStatus::Active, ParticipantStatus::Waiting], "exit")?;
        let reason = reason.into();
        self.finish(ParticipantStatus::Exited);
        self.exited_at = Some(now);
        self.append_log(LogEntry::new(LogAction::Exited, now).with_result(reason.clone()));
        self.exit_reason = Some(reason);
        Ok(())
    }

    /// Ends the run with an error.
    ///
    /// `node` is the node that was executing, if known.
    ///
    /// # Errors
    ///
    /// Fails if the participant is already terminal.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        node: Option<&Node>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(&[ParticipantStatus::Active, ParticipantStatus::Waiting], "fail")?;
        let error = error.into();
        let mut entry = LogEntry::new(LogAction::Failed, now).with_error(error.clone());
        if let Some(node) = node {
            entry = entry.for_node(node);
        } else if let Some(node_id) = &self.current_node_id {
            entry.node_id = Some(node_id.clone());
        }
        self.finish(ParticipantStatus::Failed);
        self.failed_at = Some(now);
        self.error = Some(error);
        self.append_log(entry);
        Ok(())
    }
}

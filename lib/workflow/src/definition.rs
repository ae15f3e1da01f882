//! Workflow definition types.
//!
//! A workflow is a named, versioned automation that consists of:
//! - Metadata (name, description, status, timestamps)
//! - The trigger that enrolls leads
//! - A directed graph of nodes
//! - Enrollment settings and aggregate metrics

use crate::error::DefinitionError;
use crate::graph::WorkflowGraph;
use crate::node::{MAX_DELAY_DAYS, Node, NodeId};
use crate::trigger::TriggerSpec;
use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveTime, Offset, TimeZone, Timelike, Utc, Weekday,
};
use leadflow_core::WorkflowId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }

    /// Returns true if moving from `self` to `next` is allowed.
    ///
    /// Archived is terminal. Drafts can only be published or archived.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
                | (Self::Draft | Self::Active | Self::Paused, Self::Archived)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_business_days() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
}

/// Window in which suspended participants may wake up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    /// First hour of the window (inclusive).
    pub start_hour: u32,
    /// Last hour of the window (exclusive), up to 24.
    pub end_hour: u32,
    #[serde(default = "default_business_days")]
    pub days: Vec<Weekday>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl BusinessHours {
    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Returns `at` if it falls inside the window, otherwise the next
    /// window opening.
    #[must_use]
    pub fn next_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if self.days.is_empty() || self.start_hour >= self.end_hour {
            return at;
        }

        let offset = self.offset();
        let local = at.with_timezone(&offset);
        let Some(open_time) = NaiveTime::from_hms_opt(self.start_hour, 0, 0) else {
            return at;
        };

        for day in 0..=7 {
            let Some(date) = local.date_naive().checked_add_days(Days::new(day)) else {
                break;
            };
            if !self.days.contains(&date.weekday()) {
                continue;
            }
            if day == 0 && (self.start_hour..self.end_hour).contains(&local.hour()) {
                return at;
            }
            let Some(open) = offset.from_local_datetime(&date.and_time(open_time)).single() else {
                continue;
            };
            if open > local {
                return open.with_timezone(&Utc);
            }
        }

        at
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            return Err(DefinitionError::InvalidSettings {
                reason: format!(
                    "business hours {}-{} are not a valid window",
                    self.start_hour, self.end_hour
                ),
            });
        }
        if self.days.is_empty() {
            return Err(DefinitionError::InvalidSettings {
                reason: "business hours have no days".to_string(),
            });
        }
        Ok(())
    }
}

/// Enrollment rules for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrollmentSettings {
    /// Whether a lead may enroll again after a previous run.
    #[serde(default)]
    pub allow_reentry: bool,
    /// Days that must pass after the last enrollment before reentry.
    #[serde(default)]
    pub reentry_delay_days: u32,
    /// Cap on enrollments per lead.
    #[serde(default)]
    pub max_enrollments: Option<u32>,
    /// Exit the run as soon as a goal node is satisfied.
    #[serde(default)]
    pub exit_on_goal: bool,
    /// Restricts wake-up times of wait nodes.
    #[serde(default)]
    pub business_hours: Option<BusinessHours>,
}

impl EnrollmentSettings {
    fn validate(&self) -> Result<(), DefinitionError> {
        if self.max_enrollments == Some(0) {
            return Err(DefinitionError::InvalidSettings {
                reason: "max_enrollments must be at least 1".to_string(),
            });
        }
        if self.reentry_delay_days > MAX_DELAY_DAYS {
            return Err(DefinitionError::InvalidSettings {
                reason: format!("reentry_delay_days is above {MAX_DELAY_DAYS}"),
            });
        }
        match &self.business_hours {
            Some(hours) => hours.validate(),
            None => Ok(()),
        }
    }
}

/// Aggregate counters for a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub total_entered: u64,
    pub currently_active: u64,
    pub completed: u64,
    pub exited: u64,
    pub goal_achieved: u64,
    pub failed: u64,
}

impl WorkflowMetrics {
    /// Applies a delta, saturating at zero.
    pub fn apply(&mut self, delta: &MetricsDelta) {
        fn add(value: &mut u64, delta: i64) {
            *value = value.saturating_add_signed(delta);
        }
        add(&mut self.total_entered, delta.total_entered);
        add(&mut self.currently_active, delta.currently_active);
        add(&mut self.completed, delta.completed);
        add(&mut self.exited, delta.exited);
        add(&mut self.goal_achieved, delta.goal_achieved);
        add(&mut self.failed, delta.failed);
    }
}

/// Change to workflow metrics, committed together with a participant write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsDelta {
    pub total_entered: i64,
    pub currently_active: i64,
    pub completed: i64,
    pub exited: i64,
    pub goal_achieved: i64,
    pub failed: i64,
}

impl MetricsDelta {
    #[must_use]
    pub fn entered() -> Self {
        Self {
            total_entered: 1,
            currently_active: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn completed() -> Self {
        Self {
            currently_active: -1,
            completed: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn exited() -> Self {
        Self {
            currently_active: -1,
            exited: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed() -> Self {
        Self {
            currently_active: -1,
            failed: 1,
            ..Self::default()
        }
    }

    /// Adds one goal achievement.
    #[must_use]
    pub fn with_goal(mut self) -> Self {
        self.goal_achieved += 1;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Sums two deltas.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            total_entered: self.total_entered + other.total_entered,
            currently_active: self.currently_active + other.currently_active,
            completed: self.completed + other.completed,
            exited: self.exited + other.exited,
            goal_achieved: self.goal_achieved + other.goal_achieved,
            failed: self.failed + other.failed,
        }
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub trigger: TriggerSpec,
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub settings: EnrollmentSettings,
    #[serde(default)]
    pub metrics: WorkflowMetrics,
    /// Definition version, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a draft workflow with an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>, trigger: TriggerSpec) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            status: WorkflowStatus::Draft,
            trigger,
            graph: WorkflowGraph::new(),
            settings: EnrollmentSettings::default(),
            metrics: WorkflowMetrics::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_graph(mut self, graph: WorkflowGraph) -> Self {
        self.graph = graph;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EnrollmentSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.graph.node(node_id)
    }

    /// Validates the trigger, graph and settings.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        self.trigger.validate()?;
        self.graph.validate()?;
        self.settings.validate()
    }

    /// Moves the workflow to `next`.
    ///
    /// Publishing (any move to active) validates the definition first.
    ///
    /// # Errors
    ///
    /// Returns an error for disallowed transitions or an invalid definition.
    pub fn transition_to(&mut self, next: WorkflowStatus) -> Result<(), DefinitionError> {
        if !self.status.can_transition_to(next) {
            return Err(DefinitionError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        if next == WorkflowStatus::Active {
            self.validate()?;
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Publishes a draft or resumes a paused workflow.
    ///
    /// # Errors
    ///
    /// See [`Workflow::transition_to`].
    pub fn activate(&mut self) -> Result<(), DefinitionError> {
        self.transition_to(WorkflowStatus::Active)
    }

    /// Stops participants from advancing until reactivated.
    ///
    /// # Errors
    ///
    /// See [`Workflow::transition_to`].
    pub fn pause(&mut self) -> Result<(), DefinitionError> {
        self.transition_to(WorkflowStatus::Paused)
    }

    /// # Errors
    ///
    /// See [`Workflow::transition_to`].
    pub fn archive(&mut self) -> Result<(), DefinitionError> {
        self.transition_to(WorkflowStatus::Archived)
    }

    /// Marks the workflow as updated.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

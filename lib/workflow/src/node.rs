//! Workflow node types and configurations.
//!
//! Every node carries a [`NodeKind`], a tagged variant keyed by node type.
//! Configs are checked once when the definition is saved
//! ([`NodeKind::validate`]) so the executor never decodes free-form JSON.

use crate::condition::ConditionConfig;
use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Branch label produced by a condition that evaluated to true.
pub const BRANCH_YES: &str = "yes";
/// Branch label produced by a condition that evaluated to false.
pub const BRANCH_NO: &str = "no";

/// Longest relative delay a node may configure, in days.
pub const MAX_DELAY_DAYS: u32 = 3650;

/// Identifier of a node, unique within its workflow.
///
/// Definitions are authored externally, so ids are plain strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps an existing node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Flat node type, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    SendEmail,
    AddTag,
    RemoveTag,
    UpdateScore,
    UpdateField,
    EnrollInSequence,
    SendWebhook,
    SendNotification,
    CreateTask,
    Wait,
    WaitUntil,
    Condition,
    Split,
    Goal,
    Exit,
}

impl NodeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::SendEmail => "send_email",
            Self::AddTag => "add_tag",
            Self::RemoveTag => "remove_tag",
            Self::UpdateScore => "update_score",
            Self::UpdateField => "update_field",
            Self::EnrollInSequence => "enroll_in_sequence",
            Self::SendWebhook => "send_webhook",
            Self::SendNotification => "send_notification",
            Self::CreateTask => "create_task",
            Self::Wait => "wait",
            Self::WaitUntil => "wait_until",
            Self::Condition => "condition",
            Self::Split => "split",
            Self::Goal => "goal",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when an action node's collaborator call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and move on to the next node.
    #[default]
    Continue,
    /// Fail the participant.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailConfig {
    pub template_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    pub tag: String,
}

/// How an update-score node changes the lead's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOperation {
    Add,
    Subtract,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateScoreConfig {
    pub operation: ScoreOperation,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFieldConfig {
    pub field: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollInSequenceConfig {
    pub sequence_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body template; string values may contain `{{field}}` placeholders.
    #[serde(default)]
    pub body: Option<JsonValue>,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub recipient: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskConfig {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub due_in_days: Option<u32>,
}

/// Unit of a relative wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUnit {
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub amount: u32,
    pub unit: WaitUnit,
}

impl WaitConfig {
    /// Returns the wait as a chrono duration.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        let amount = i64::from(self.amount);
        match self.unit {
            WaitUnit::Minutes => chrono::Duration::minutes(amount),
            WaitUnit::Hours => chrono::Duration::hours(amount),
            WaitUnit::Days => chrono::Duration::days(amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitUntilConfig {
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    /// Pins the wake time to a weekday.
    #[serde(default)]
    pub weekday: Option<chrono::Weekday>,
    /// Offset of the wall clock the time is expressed in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// One weighted arm of a split node. The id doubles as the branch label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitVariant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub variants: Vec<SplitVariant>,
}

/// Success predicate evaluated by a goal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalCondition {
    /// The lead carries the tag.
    TagAdded { tag: String },
    /// The lead's score is at least this value.
    ScoreAtLeast { score: u8 },
    /// A lead field equals the value.
    FieldEquals { field: String, value: JsonValue },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalConfig {
    pub goal: GoalCondition,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Configuration for a node, keyed by node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Graph entry point.
    Trigger,
    SendEmail(SendEmailConfig),
    AddTag(TagConfig),
    RemoveTag(TagConfig),
    UpdateScore(UpdateScoreConfig),
    UpdateField(UpdateFieldConfig),
    EnrollInSequence(EnrollInSequenceConfig),
    SendWebhook(WebhookConfig),
    SendNotification(NotificationConfig),
    CreateTask(CreateTaskConfig),
    Wait(WaitConfig),
    WaitUntil(WaitUntilConfig),
    Condition(ConditionConfig),
    Split(SplitConfig),
    Goal(GoalConfig),
    Exit(ExitConfig),
}

impl NodeKind {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Trigger => NodeType::Trigger,
            Self::SendEmail(_) => NodeType::SendEmail,
            Self::AddTag(_) => NodeType::AddTag,
            Self::RemoveTag(_) => NodeType::RemoveTag,
            Self::UpdateScore(_) => NodeType::UpdateScore,
            Self::UpdateField(_) => NodeType::UpdateField,
            Self::EnrollInSequence(_) => NodeType::EnrollInSequence,
            Self::SendWebhook(_) => NodeType::SendWebhook,
            Self::SendNotification(_) => NodeType::SendNotification,
            Self::CreateTask(_) => NodeType::CreateTask,
            Self::Wait(_) => NodeType::Wait,
            Self::WaitUntil(_) => NodeType::WaitUntil,
            Self::Condition(_) => NodeType::Condition,
            Self::Split(_) => NodeType::Split,
            Self::Goal(_) => NodeType::Goal,
            Self::Exit(_) => NodeType::Exit,
        }
    }

    /// Branch labels this node can produce, each of which needs an outgoing edge.
    #[must_use]
    pub fn branch_labels(&self) -> Vec<String> {
        match self {
            Self::Condition(_) => vec![BRANCH_YES.to_string(), BRANCH_NO.to_string()],
            Self::Split(split) => split.variants.iter().map(|v| v.id.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Checks the config for values the executor cannot act on.
    ///
    /// Conditions are deliberately not checked: an unconfigured condition
    /// is valid and always takes the "no" branch.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidNodeConfig`] describing the problem.
    pub fn validate(&self, node_id: &NodeId) -> Result<(), DefinitionError> {
        let invalid = |reason: &str| DefinitionError::InvalidNodeConfig {
            node_id: node_id.clone(),
            reason: reason.to_string(),
        };

        match self {
            Self::SendEmail(config) if config.template_id.trim().is_empty() => {
                Err(invalid("template_id is empty"))
            }
            Self::AddTag(config) | Self::RemoveTag(config) if config.tag.trim().is_empty() => {
                Err(invalid("tag is empty"))
            }
            Self::UpdateField(config) if config.field.trim().is_empty() => {
                Err(invalid("field is empty"))
            }
            Self::SendWebhook(config) if config.url.trim().is_empty() => {
                Err(invalid("webhook url is empty"))
            }
            Self::Wait(config) if config.amount == 0 => Err(invalid("wait amount must be positive")),
            Self::Wait(config)
                if config.duration() > chrono::Duration::days(MAX_DELAY_DAYS.into()) =>
            {
                Err(invalid("wait is longer than the maximum delay"))
            }
            Self::CreateTask(config)
                if config.due_in_days.is_some_and(|days| days > MAX_DELAY_DAYS) =>
            {
                Err(invalid("task due date is beyond the maximum delay"))
            }
            Self::WaitUntil(config) if config.hour > 23 || config.minute > 59 => {
                Err(invalid("wait_until time is out of range"))
            }
            Self::Split(config) => {
                if config.variants.is_empty() {
                    return Err(invalid("split has no variants"));
                }
                if let Some(variant) = config
                    .variants
                    .iter()
                    .find(|v| !v.weight.is_finite() || v.weight < 0.0)
                {
                    return Err(DefinitionError::InvalidSplitWeight {
                        node_id: node_id.clone(),
                        variant_id: variant.id.clone(),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// Node configuration (determines type and behavior).
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            on_failure: FailurePolicy::default(),
        }
    }

    /// Sets the failure policy for action nodes.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

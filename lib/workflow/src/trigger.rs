//! Trigger types for workflow enrollment.
//!
//! A workflow names one trigger. When a [`DomainEvent`] of the same type
//! arrives, the trigger's predicate decides whether the event enrolls the
//! lead.

use crate::error::DefinitionError;
use chrono::{DateTime, Utc};
use leadflow_core::{LeadId, WorkflowId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Kind of business event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    LeadCreated,
    TagAdded,
    TagRemoved,
    ScoreChanged,
    PageVisited,
    PurchaseMade,
    EmailOpened,
    EmailClicked,
    FormSubmitted,
    FunnelEntered,
    FunnelStepCompleted,
    ChallengeJoined,
    ChallengeDayCompleted,
    ChallengeCompleted,
    CustomEvent,
    /// Calendar tick for a scheduled workflow.
    Scheduled,
    /// Enrollment requested by an operator.
    Manual,
}

impl TriggerType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadCreated => "lead_created",
            Self::TagAdded => "tag_added",
            Self::TagRemoved => "tag_removed",
            Self::ScoreChanged => "score_changed",
            Self::PageVisited => "page_visited",
            Self::PurchaseMade => "purchase_made",
            Self::EmailOpened => "email_opened",
            Self::EmailClicked => "email_clicked",
            Self::FormSubmitted => "form_submitted",
            Self::FunnelEntered => "funnel_entered",
            Self::FunnelStepCompleted => "funnel_step_completed",
            Self::ChallengeJoined => "challenge_joined",
            Self::ChallengeDayCompleted => "challenge_day_completed",
            Self::ChallengeCompleted => "challenge_completed",
            Self::CustomEvent => "custom_event",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a score threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDirection {
    /// From below the threshold to at or above it.
    Above,
    /// From at or above the threshold to below it.
    Below,
    /// Either direction.
    Crosses,
}

/// Trigger configuration, keyed by trigger type.
///
/// Optional identifiers act as filters: `None` matches any value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    LeadCreated {
        #[serde(default)]
        source: Option<String>,
    },
    TagAdded {
        tag: String,
    },
    TagRemoved {
        tag: String,
    },
    ScoreChanged {
        threshold: u8,
        direction: ScoreDirection,
    },
    PageVisited {
        /// URL glob; `*` matches any run of characters, `?` one character.
        url_pattern: String,
    },
    PurchaseMade {
        #[serde(default)]
        min_amount: f64,
        #[serde(default)]
        product_id: Option<String>,
    },
    EmailOpened {
        #[serde(default)]
        template_id: Option<String>,
    },
    EmailClicked {
        #[serde(default)]
        template_id: Option<String>,
    },
    FormSubmitted {
        #[serde(default)]
        form_id: Option<String>,
    },
    FunnelEntered {
        #[serde(default)]
        funnel_id: Option<String>,
    },
    FunnelStepCompleted {
        #[serde(default)]
        funnel_id: Option<String>,
        #[serde(default)]
        step: Option<u32>,
    },
    ChallengeJoined {
        #[serde(default)]
        challenge_id: Option<String>,
    },
    ChallengeDayCompleted {
        #[serde(default)]
        challenge_id: Option<String>,
        #[serde(default)]
        day: Option<u32>,
    },
    ChallengeCompleted {
        #[serde(default)]
        challenge_id: Option<String>,
    },
    CustomEvent {
        event_name: String,
    },
    /// Cron-style calendar trigger.
    Scheduled {
        /// Five-field cron expression (minute hour day-of-month month day-of-week).
        cron: String,
        /// Cohort handed to the cohort resolver on each tick.
        cohort: String,
    },
    Manual,
}

impl TriggerSpec {
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::LeadCreated { .. } => TriggerType::LeadCreated,
            Self::TagAdded { .. } => TriggerType::TagAdded,
            Self::TagRemoved { .. } => TriggerType::TagRemoved,
            Self::ScoreChanged { .. } => TriggerType::ScoreChanged,
            Self::PageVisited { .. } => TriggerType::PageVisited,
            Self::PurchaseMade { .. } => TriggerType::PurchaseMade,
            Self::EmailOpened { .. } => TriggerType::EmailOpened,
            Self::EmailClicked { .. } => TriggerType::EmailClicked,
            Self::FormSubmitted { .. } => TriggerType::FormSubmitted,
            Self::FunnelEntered { .. } => TriggerType::FunnelEntered,
            Self::FunnelStepCompleted { .. } => TriggerType::FunnelStepCompleted,
            Self::ChallengeJoined { .. } => TriggerType::ChallengeJoined,
            Self::ChallengeDayCompleted { .. } => TriggerType::ChallengeDayCompleted,
            Self::ChallengeCompleted { .. } => TriggerType::ChallengeCompleted,
            Self::CustomEvent { .. } => TriggerType::CustomEvent,
            Self::Scheduled { .. } => TriggerType::Scheduled,
            Self::Manual => TriggerType::Manual,
        }
    }

    /// Checks the matching config.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidTrigger`] for unusable configs.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let invalid = |reason: String| Err(DefinitionError::InvalidTrigger { reason });

        match self {
            Self::TagAdded { tag } | Self::TagRemoved { tag } if tag.trim().is_empty() => {
                invalid("tag is empty".to_string())
            }
            Self::ScoreChanged { threshold, .. } if *threshold > 100 => {
                invalid(format!("score threshold {threshold} is above 100"))
            }
            Self::PageVisited { url_pattern } => match glob_to_regex(url_pattern) {
                _ if url_pattern.trim().is_empty() => invalid("url pattern is empty".to_string()),
                Ok(_) => Ok(()),
                Err(err) => invalid(format!("url pattern {url_pattern:?}: {err}")),
            },
            Self::PurchaseMade { min_amount, .. } if !min_amount.is_finite() || *min_amount < 0.0 => {
                invalid("minimum purchase amount must be a non-negative number".to_string())
            }
            Self::CustomEvent { event_name } if event_name.trim().is_empty() => {
                invalid("custom event name is empty".to_string())
            }
            Self::Scheduled { cron, cohort } => {
                let fields = cron.split_whitespace().count();
                if fields != 5 {
                    return invalid(format!("cron expression needs 5 fields, found {fields}"));
                }
                if cohort.trim().is_empty() {
                    return invalid("scheduled trigger has no cohort".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Returns true if `event` should enroll its lead in the workflow
    /// identified by `workflow_id`.
    #[must_use]
    pub fn matches(&self, workflow_id: WorkflowId, event: &DomainEvent) -> bool {
        if event.event_type != self.trigger_type() {
            return false;
        }

        match self {
            Self::LeadCreated { source } => optional_eq(source.as_deref(), event.str("source")),
            Self::TagAdded { tag } | Self::TagRemoved { tag } => event.str("tag") == Some(tag.as_str()),
            Self::ScoreChanged {
                threshold,
                direction,
            } => match (event.number("oldScore"), event.number("newScore")) {
                (Some(old), Some(new)) => score_crossed(old, new, f64::from(*threshold), *direction),
                _ => false,
            },
            Self::PageVisited { url_pattern } => event
                .str("url")
                .is_some_and(|url| glob_to_regex(url_pattern).is_ok_and(|re| re.is_match(url))),
            Self::PurchaseMade {
                min_amount,
                product_id,
            } => {
                event.number("amount").is_some_and(|amount| amount >= *min_amount)
                    && optional_eq(product_id.as_deref(), event.str("productId"))
            }
            Self::EmailOpened { template_id } | Self::EmailClicked { template_id } => {
                optional_eq(template_id.as_deref(), event.str("templateId"))
            }
            Self::FormSubmitted { form_id } => optional_eq(form_id.as_deref(), event.str("formId")),
            Self::FunnelEntered { funnel_id } => {
                optional_eq(funnel_id.as_deref(), event.str("funnelId"))
            }
            Self::FunnelStepCompleted { funnel_id, step } => {
                optional_eq(funnel_id.as_deref(), event.str("funnelId"))
                    && optional_num(*step, event.number("step"))
            }
            Self::ChallengeJoined { challenge_id } | Self::ChallengeCompleted { challenge_id } => {
                optional_eq(challenge_id.as_deref(), event.str("challengeId"))
            }
            Self::ChallengeDayCompleted { challenge_id, day } => {
                optional_eq(challenge_id.as_deref(), event.str("challengeId"))
                    && optional_num(*day, event.number("day"))
            }
            Self::CustomEvent { event_name } => event.str("eventName") == Some(event_name.as_str()),
            // ticks and manual requests are addressed to one workflow
            Self::Scheduled { .. } | Self::Manual => {
                event.str("workflowId") == Some(workflow_id.to_string().as_str())
            }
        }
    }
}

fn optional_eq(expected: Option<&str>, actual: Option<&str>) -> bool {
    expected.is_none_or(|expected| actual == Some(expected))
}

fn optional_num(expected: Option<u32>, actual: Option<f64>) -> bool {
    expected.is_none_or(|expected| actual == Some(f64::from(expected)))
}

/// Returns true if a score change from `old` to `new` crosses `threshold`
/// in `direction`.
#[must_use]
pub fn score_crossed(old: f64, new: f64, threshold: f64, direction: ScoreDirection) -> bool {
    let rose = old < threshold && new >= threshold;
    let fell = old >= threshold && new < threshold;
    match direction {
        ScoreDirection::Above => rose,
        ScoreDirection::Below => fell,
        ScoreDirection::Crosses => rose || fell,
    }
}

/// Converts a URL glob into an anchored regex.
///
/// # Errors
///
/// Returns an error if the resulting pattern does not compile.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// A business event that may enroll a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub event_type: TriggerType,
    pub lead_id: LeadId,
    /// Type-specific payload, keyed in camelCase (`oldScore`, `url`, ...).
    #[serde(default)]
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    #[must_use]
    pub fn new(event_type: TriggerType, lead_id: impl Into<LeadId>) -> Self {
        Self {
            event_type,
            lead_id: lead_id.into(),
            data: JsonValue::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
        }
    }

    /// Creates a calendar tick for one lead of a scheduled workflow.
    #[must_use]
    pub fn scheduled(workflow_id: WorkflowId, lead_id: impl Into<LeadId>, at: DateTime<Utc>) -> Self {
        Self::new(TriggerType::Scheduled, lead_id)
            .with_data(serde_json::json!({ "workflowId": workflow_id.to_string() }))
            .at(at)
    }

    /// Creates an operator request to enroll a lead in one workflow.
    #[must_use]
    pub fn manual(workflow_id: WorkflowId, lead_id: impl Into<LeadId>) -> Self {
        Self::new(TriggerType::Manual, lead_id)
            .with_data(serde_json::json!({ "workflowId": workflow_id.to_string() }))
    }

    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reads a string from the payload.
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(JsonValue::as_str)
    }

    /// Reads a number from the payload, accepting numeric strings.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: TriggerType, data: JsonValue) -> DomainEvent {
        DomainEvent::new(event_type, "lead-1").with_data(data)
    }

    #[test]
    fn type_mismatch_never_matches() {
        let spec = TriggerSpec::TagAdded {
            tag: "vip".to_string(),
        };
        let ev = event(TriggerType::TagRemoved, json!({"tag": "vip"}));
        assert!(!spec.matches(WorkflowId::new(), &ev));
    }

    #[test]
    fn tag_trigger_matches_name() {
        let spec = TriggerSpec::TagAdded {
            tag: "vip".to_string(),
        };
        let wf = WorkflowId::new();
        assert!(spec.matches(wf, &event(TriggerType::TagAdded, json!({"tag": "vip"}))));
        assert!(!spec.matches(wf, &event(TriggerType::TagAdded, json!({"tag": "other"}))));
    }

    #[test]
    fn score_crossing_directions() {
        assert!(score_crossed(40.0, 55.0, 50.0, ScoreDirection::Above));
        assert!(!score_crossed(55.0, 60.0, 50.0, ScoreDirection::Above));
        assert!(score_crossed(55.0, 45.0, 50.0, ScoreDirection::Below));
        assert!(!score_crossed(40.0, 55.0, 50.0, ScoreDirection::Below));
        assert!(score_crossed(40.0, 50.0, 50.0, ScoreDirection::Crosses));
        assert!(score_crossed(50.0, 49.0, 50.0, ScoreDirection::Crosses));
        assert!(!score_crossed(10.0, 20.0, 50.0, ScoreDirection::Crosses));
    }

    #[test]
    fn score_trigger_reads_old_and_new() {
        let spec = TriggerSpec::ScoreChanged {
            threshold: 50,
            direction: ScoreDirection::Above,
        };
        let ev = event(TriggerType::ScoreChanged, json!({"oldScore": 45, "newScore": 70}));
        assert!(spec.matches(WorkflowId::new(), &ev));
        let missing = event(TriggerType::ScoreChanged, json!({"newScore": 70}));
        assert!(!spec.matches(WorkflowId::new(), &missing));
    }

    #[test]
    fn page_glob_is_anchored() {
        let re = glob_to_regex("https://example.com/pricing*").expect("regex");
        assert!(re.is_match("https://example.com/pricing"));
        assert!(re.is_match("https://example.com/pricing?plan=pro"));
        assert!(!re.is_match("https://evil.test/?u=https://example.com/pricing"));

        let dotted = glob_to_regex("*.example.com/?").expect("regex");
        assert!(dotted.is_match("https://www.example.com/a"));
        assert!(!dotted.is_match("https://wwwXexampleYcom/a"));
    }

    #[test]
    fn purchase_minimum_and_product() {
        let spec = TriggerSpec::PurchaseMade {
            min_amount: 100.0,
            product_id: Some("course".to_string()),
        };
        let wf = WorkflowId::new();
        let ok = event(TriggerType::PurchaseMade, json!({"amount": 149.0, "productId": "course"}));
        let cheap = event(TriggerType::PurchaseMade, json!({"amount": 99.0, "productId": "course"}));
        let other = event(TriggerType::PurchaseMade, json!({"amount": 500, "productId": "book"}));
        assert!(spec.matches(wf, &ok));
        assert!(!spec.matches(wf, &cheap));
        assert!(!spec.matches(wf, &other));
    }

    #[test]
    fn challenge_day_filters() {
        let spec = TriggerSpec::ChallengeDayCompleted {
            challenge_id: Some("c-5day".to_string()),
            day: Some(3),
        };
        let wf = WorkflowId::new();
        let day3 = event(
            TriggerType::ChallengeDayCompleted,
            json!({"challengeId": "c-5day", "day": 3}),
        );
        let day2 = event(
            TriggerType::ChallengeDayCompleted,
            json!({"challengeId": "c-5day", "day": 2}),
        );
        assert!(spec.matches(wf, &day3));
        assert!(!spec.matches(wf, &day2));

        let any_step = TriggerSpec::FunnelStepCompleted {
            funnel_id: None,
            step: None,
        };
        assert!(any_step.matches(wf, &event(TriggerType::FunnelStepCompleted, json!({}))));
    }

    #[test]
    fn scheduled_ticks_target_one_workflow() {
        let spec = TriggerSpec::Scheduled {
            cron: "0 9 * * 1".to_string(),
            cohort: "segment:trial".to_string(),
        };
        let wf = WorkflowId::new();
        let tick = DomainEvent::scheduled(wf, "lead-1", Utc::now());
        assert!(spec.matches(wf, &tick));
        assert!(!spec.matches(WorkflowId::new(), &tick));
    }

    #[test]
    fn custom_event_by_name() {
        let spec = TriggerSpec::CustomEvent {
            event_name: "webinar_attended".to_string(),
        };
        let ev = event(TriggerType::CustomEvent, json!({"eventName": "webinar_attended"}));
        assert!(spec.matches(WorkflowId::new(), &ev));
    }

    #[test]
    fn validate_rejects_bad_configs() {
        assert!(
            TriggerSpec::Scheduled {
                cron: "* * *".to_string(),
                cohort: "all".to_string()
            }
            .validate()
            .is_err()
        );
        assert!(
            TriggerSpec::PurchaseMade {
                min_amount: -1.0,
                product_id: None
            }
            .validate()
            .is_err()
        );
        assert!(
            TriggerSpec::PageVisited {
                url_pattern: String::new()
            }
            .validate()
            .is_err()
        );
        assert!(TriggerSpec::Manual.validate().is_ok());
    }

    #[test]
    fn trigger_spec_serde() {
        let spec: TriggerSpec = serde_json::from_value(json!({
            "type": "score_changed",
            "threshold": 70,
            "direction": "above"
        }))
        .expect("deserialize");
        assert_eq!(spec.trigger_type(), TriggerType::ScoreChanged);
    }

    #[test]
    fn domain_event_uses_camel_case() {
        let ev: DomainEvent = serde_json::from_value(json!({
            "eventType": "tag_added",
            "leadId": "lead-7",
            "data": {"tag": "vip"},
            "timestamp": "2026-01-01T00:00:00Z"
        }))
        .expect("deserialize");
        assert_eq!(ev.event_type, TriggerType::TagAdded);
        assert_eq!(ev.str("tag"), Some("vip"));
    }
}

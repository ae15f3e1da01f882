//! Lead snapshot as seen by the engine.
//!
//! Leads are owned by an external lead store. The executor fetches a
//! [`Lead`] before running a node and reads fields from it for conditions,
//! goals and template rendering.

use crate::node::ScoreOperation;
use leadflow_core::LeadId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

/// Highest lead score.
pub const MAX_SCORE: u8 = 100;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").ok());

/// Discrete band derived from a lead's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLevel {
    Cold,
    Warm,
    Hot,
    VeryHot,
}

impl ScoreLevel {
    /// Bands: 0-25 cold, 26-50 warm, 51-75 hot, 76-100 very hot.
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=25 => Self::Cold,
            26..=50 => Self::Warm,
            51..=75 => Self::Hot,
            _ => Self::VeryHot,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Hot => "hot",
            Self::VeryHot => "very_hot",
        }
    }
}

impl fmt::Display for ScoreLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ScoreOperation {
    /// Applies the operation to a score, clamping the result to 0..=100.
    #[must_use]
    pub fn apply(&self, current: u8, amount: i64) -> u8 {
        let current = i64::from(current);
        let next = match self {
            Self::Add => current.saturating_add(amount),
            Self::Subtract => current.saturating_sub(amount),
            Self::Set => amount,
        };
        // clamped into range, so the cast cannot truncate
        next.clamp(0, i64::from(MAX_SCORE)) as u8
    }
}

/// Snapshot of a lead from the external lead store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: LeadId,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, JsonValue>,
}

impl Lead {
    /// Creates a lead with only an id and email set.
    #[must_use]
    pub fn new(id: impl Into<LeadId>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            first_name: None,
            last_name: None,
            phone: None,
            company: None,
            source: None,
            status: None,
            score: 0,
            tags: BTreeSet::new(),
            custom_fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: u8) -> Self {
        self.score = score.min(MAX_SCORE);
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.custom_fields.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn score_level(&self) -> ScoreLevel {
        ScoreLevel::from_score(self.score)
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Resolves a field by path.
    ///
    /// Top-level fields are addressed by their camelCase name (snake_case is
    /// accepted too). `customFields.a.b` walks into custom fields; any other
    /// name falls back to a custom field of that name.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<JsonValue> {
        let path = path.trim();
        let text = |value: &Option<String>| value.clone().map(JsonValue::String);

        match path {
            "id" => Some(JsonValue::String(self.id.to_string())),
            "email" => Some(JsonValue::String(self.email.clone())),
            "firstName" | "first_name" => text(&self.first_name),
            "lastName" | "last_name" => text(&self.last_name),
            "fullName" | "full_name" => {
                let parts: Vec<_> = [&self.first_name, &self.last_name]
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .collect();
                (!parts.is_empty()).then(|| JsonValue::String(parts.join(" ")))
            }
            "phone" => text(&self.phone),
            "company" => text(&self.company),
            "source" => text(&self.source),
            "status" => text(&self.status),
            "score" => Some(JsonValue::from(self.score)),
            "scoreLevel" | "score_level" => {
                Some(JsonValue::String(self.score_level().as_str().to_string()))
            }
            "tags" => Some(JsonValue::Array(
                self.tags.iter().cloned().map(JsonValue::String).collect(),
            )),
            _ => {
                let custom = path
                    .strip_prefix("customFields.")
                    .or_else(|| path.strip_prefix("custom_fields."))
                    .unwrap_or(path);
                let mut segments = custom.split('.');
                let first = self.custom_fields.get(segments.next()?)?;
                segments
                    .try_fold(first, |value, segment| value.get(segment))
                    .filter(|value| !value.is_null())
                    .cloned()
            }
        }
    }

    /// Substitutes `{{field}}` placeholders with lead fields.
    ///
    /// Unknown fields render as an empty string.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let Some(placeholder) = PLACEHOLDER.as_ref() else {
            return template.to_string();
        };
        placeholder
            .replace_all(template, |caps: &regex::Captures<'_>| {
                self.field(&caps[1])
                    .map(|value| display_value(&value))
                    .unwrap_or_default()
            })
            .into_owned()
    }

    /// Renders every string inside a JSON value.
    #[must_use]
    pub fn render_json(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) => JsonValue::String(self.render(s)),
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|item| self.render_json(item)).collect())
            }
            JsonValue::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.render_json(item)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Returns the profile fields as a JSON object for template rendering.
    #[must_use]
    pub fn context(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Formats a JSON value for text output; strings lose their quotes.
#[must_use]
pub fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        JsonValue::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

//! Startup data loaded from a directory.
//!
//! ```text
//! seed/
//!   workflows/*.json   workflow definitions
//!   leads.json         lead snapshots
//!   templates.json     email templates
//!   cohorts.json       {"cohort-name": ["lead-id", ...]}
//! ```
//!
//! Every file is optional.

use crate::error::EngineError;
use leadflow_core::LeadId;
use leadflow_scheduler::StaticCohorts;
use leadflow_workflow::collaborator::EmailTemplate;
use leadflow_workflow::definition::{EnrollmentSettings, Workflow};
use leadflow_workflow::graph::WorkflowGraph;
use leadflow_workflow::lead::Lead;
use leadflow_workflow::memory::InMemoryCollaborators;
use leadflow_workflow::store::EngineStore;
use leadflow_workflow::trigger::TriggerSpec;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A workflow definition as written on disk.
#[derive(Debug, Deserialize)]
pub struct WorkflowFile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger: TriggerSpec,
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub settings: EnrollmentSettings,
    /// Publish on load. Inactive definitions are stored as drafts.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WorkflowFile {
    /// Builds the workflow, validating it when it is to be published.
    ///
    /// # Errors
    ///
    /// Returns an error if an active definition fails validation.
    pub fn into_workflow(self) -> Result<Workflow, EngineError> {
        let mut workflow = Workflow::new(self.name, self.trigger)
            .with_graph(self.graph)
            .with_settings(self.settings);
        if let Some(description) = self.description {
            workflow = workflow.with_description(description);
        }
        if self.active {
            workflow
                .activate()
                .map_err(|source| EngineError::Definition {
                    name: workflow.name.clone(),
                    source,
                })?;
        }
        Ok(workflow)
    }
}

/// Everything read from a seed directory.
#[derive(Debug, Default)]
pub struct Seed {
    pub workflows: Vec<Workflow>,
    pub leads: Vec<Lead>,
    pub templates: Vec<EmailTemplate>,
    pub cohorts: HashMap<String, Vec<LeadId>>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let seed_error = |reason: String| EngineError::Seed {
        path: path.to_path_buf(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|err| seed_error(err.to_string()))?;
    serde_json::from_str(&text).map_err(|err| seed_error(err.to_string()))
}

fn read_optional<T: DeserializeOwned + Default>(path: &Path) -> Result<T, EngineError> {
    if path.exists() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

impl Seed {
    /// Reads a seed directory.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first file that cannot be read, parsed
    /// or validated.
    pub fn load(dir: &Path) -> Result<Self, EngineError> {
        let mut workflows = Vec::new();
        let workflows_dir = dir.join("workflows");
        if workflows_dir.is_dir() {
            let entries = std::fs::read_dir(&workflows_dir).map_err(|err| EngineError::Seed {
                path: workflows_dir.clone(),
                reason: err.to_string(),
            })?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .collect();
            paths.sort();
            for path in paths {
                let file: WorkflowFile = read_json(&path)?;
                workflows.push(file.into_workflow()?);
            }
        }

        Ok(Self {
            workflows,
            leads: read_optional(&dir.join("leads.json"))?,
            templates: read_optional(&dir.join("templates.json"))?,
            cohorts: read_optional(&dir.join("cohorts.json"))?,
        })
    }

    /// Stores the workflows and fills the local collaborators. Returns the
    /// cohorts for the calendar ticker.
    ///
    /// # Errors
    ///
    /// Returns an error if a workflow cannot be stored.
    pub async fn apply(
        self,
        store: &dyn EngineStore,
        local: &InMemoryCollaborators,
    ) -> Result<StaticCohorts, EngineError> {
        for workflow in self.workflows {
            let workflow = store.insert_workflow(workflow).await?;
            tracing::info!(
                workflow_id = %workflow.id,
                name = %workflow.name,
                status = %workflow.status,
                "workflow loaded"
            );
        }
        for lead in self.leads {
            local.insert_lead(lead).await;
        }
        for template in self.templates {
            local.add_template(template).await;
        }
        Ok(self
            .cohorts
            .into_iter()
            .fold(StaticCohorts::new(), |cohorts, (name, leads)| {
                cohorts.with_cohort(name, leads)
            }))
    }
}

//! Calendar ticks for scheduled workflows.
//!
//! Once a minute the ticker checks every active workflow with a `scheduled`
//! trigger. When the cron schedule fires, the workflow's cohort is resolved
//! to leads and each lead is sent through the trigger dispatcher, so the
//! usual eligibility rules apply.

use crate::error::ScheduleError;
use crate::schedule::CronSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use leadflow_core::{LeadId, WorkflowId};
use leadflow_workflow::clock::Clock;
use leadflow_workflow::definition::Workflow;
use leadflow_workflow::dispatcher::TriggerDispatcher;
use leadflow_workflow::store::EngineStore;
use leadflow_workflow::trigger::{DomainEvent, TriggerSpec, TriggerType};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::instrument;

/// Resolves a named cohort to the leads in it.
#[async_trait]
pub trait CohortResolver: Send + Sync {
    async fn resolve(&self, workflow: &Workflow, cohort: &str)
    -> Result<Vec<LeadId>, ScheduleError>;
}

/// Cohorts held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StaticCohorts {
    cohorts: HashMap<String, Vec<LeadId>>,
}

impl StaticCohorts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cohort(
        mut self,
        name: impl Into<String>,
        leads: impl IntoIterator<Item = LeadId>,
    ) -> Self {
        self.cohorts
            .insert(name.into(), leads.into_iter().collect());
        self
    }
}

#[async_trait]
impl CohortResolver for StaticCohorts {
    async fn resolve(
        &self,
        workflow: &Workflow,
        cohort: &str,
    ) -> Result<Vec<LeadId>, ScheduleError> {
        self.cohorts
            .get(cohort)
            .cloned()
            .ok_or_else(|| ScheduleError::CohortFailed {
                workflow_id: workflow.id,
                reason: format!("unknown cohort '{cohort}'"),
            })
    }
}

/// Configuration for the calendar ticker.
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// Seconds between checks. Below 60 so no minute is skipped.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_poll_interval_seconds() -> u64 {
    20
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Workflows whose schedule fired.
    pub fired: Vec<WorkflowId>,
    pub enrolled: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Fires scheduled workflows.
pub struct CalendarTicker {
    store: Arc<dyn EngineStore>,
    dispatcher: TriggerDispatcher,
    cohorts: Arc<dyn CohortResolver>,
    clock: Arc<dyn Clock>,
    config: CalendarConfig,
    last_minute: Mutex<Option<DateTime<Utc>>>,
}

impl CalendarTicker {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        dispatcher: TriggerDispatcher,
        cohorts: Arc<dyn CohortResolver>,
        clock: Arc<dyn Clock>,
        config: CalendarConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            cohorts,
            clock,
            config,
            last_minute: Mutex::new(None),
        }
    }

    /// Fires every scheduled workflow due in the current minute.
    ///
    /// A minute that has already been handled is skipped, so polling more
    /// than once a minute never enrolls a cohort twice.
    ///
    /// # Errors
    ///
    /// Fails only if scheduled workflows cannot be loaded. Bad schedules and
    /// cohort failures are logged and skip that workflow.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> leadflow_core::Result<TickReport, ScheduleError> {
        let mut report = TickReport::default();
        let minute = self.current_minute();
        {
            let mut last = self.last_minute.lock().await;
            if last.is_some_and(|last| last >= minute) {
                return Ok(report);
            }
            *last = Some(minute);
        }

        let workflows = self
            .store
            .active_workflows_for(TriggerType::Scheduled)
            .await
            .map_err(ScheduleError::Store)?;

        for workflow in &workflows {
            let TriggerSpec::Scheduled { cron, cohort } = &workflow.trigger else {
                continue;
            };
            let schedule = match CronSchedule::parse(cron) {
                Ok(schedule) => schedule,
                Err(err) => {
                    tracing::warn!(workflow_id = %workflow.id, error = %err, "skipping bad schedule");
                    continue;
                }
            };
            if !schedule.matches(minute) {
                continue;
            }

            let leads = match self.cohorts.resolve(workflow, cohort).await {
                Ok(leads) => leads,
                Err(err) => {
                    tracing::warn!(workflow_id = %workflow.id, error = %err, "cohort resolution failed");
                    report.errors += 1;
                    continue;
                }
            };
            tracing::info!(
                workflow_id = %workflow.id,
                cohort = %cohort,
                leads = leads.len(),
                "scheduled workflow fired"
            );
            report.fired.push(workflow.id);

            for lead_id in leads {
                let event = DomainEvent::scheduled(workflow.id, lead_id, minute);
                let dispatch = self.dispatcher.dispatch(&event).await;
                report.enrolled += dispatch.enrolled.len();
                report.skipped += dispatch.skipped.len();
                report.errors += dispatch.errors.len();
            }
        }

        Ok(report)
    }

    /// Ticks on the configured interval until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.poll_interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::warn!(error = %err, "calendar tick failed");
                    }
                }
            }
        }
        tracing::info!("calendar ticker stopped");
    }

    fn current_minute(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
    }
}

//! The wake sweep.
//!
//! Waiting participants hold no task or timer. Each sweep loads the ones
//! whose wait has expired, moves them past their wait node and runs them.
//! The same loop re-queues active participants that have made no progress
//! for a while, which covers jobs lost between enrollment and the queue.

use crate::error::SweepError;
use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, stream};
use leadflow_core::{ParticipantId, WorkflowId};
use leadflow_workflow::clock::Clock;
use leadflow_workflow::definition::{MetricsDelta, Workflow};
use leadflow_workflow::error::{ExecutionError, StoreError};
use leadflow_workflow::executor::NodeExecutor;
use leadflow_workflow::participant::Participant;
use leadflow_workflow::queue::{ExecutionJob, JobQueue, JobReason};
use leadflow_workflow::store::EngineStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;

/// Configuration for the wake sweep.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Maximum participants loaded per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum participants executed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// An active participant with no log entry for this long is re-queued.
    #[serde(default = "default_stall_after_seconds")]
    pub stall_after_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_batch_size() -> usize {
    500
}

fn default_concurrency() -> usize {
    16
}

fn default_stall_after_seconds() -> u64 {
    600
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            stall_after_seconds: default_stall_after_seconds(),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Due participants found.
    pub due: usize,
    /// Moved past their wait node and executed.
    pub resumed: usize,
    /// Completed because their wait node was the last one.
    pub completed: usize,
    /// Left waiting because their workflow is not active.
    pub held: usize,
    /// Failed because their workflow or node no longer exists.
    pub failed: usize,
    /// Skipped because another writer got there first.
    pub conflicts: usize,
    /// Queued again after a retryable execution error.
    pub requeued: usize,
    pub errors: usize,
}

enum Wake {
    Resumed(ParticipantId),
    Completed,
    Held,
    Failed,
}

/// Wakes due participants and recovers stalled ones.
pub struct WakeSweeper {
    store: Arc<dyn EngineStore>,
    executor: NodeExecutor,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
}

impl WakeSweeper {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        executor: NodeExecutor,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            executor,
            queue,
            clock,
            config,
        }
    }

    /// Resumes every participant whose wait has expired.
    ///
    /// Participants of paused or archived workflows stay waiting and are
    /// picked up again once the workflow is reactivated.
    ///
    /// # Errors
    ///
    /// Fails only if due participants cannot be loaded. Per-participant
    /// problems are counted in the report.
    #[instrument(skip_all)]
    pub async fn sweep(&self) -> leadflow_core::Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let due = self
            .store
            .due_participants(now, self.config.batch_size)
            .await
            .map_err(SweepError::Store)?;

        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };
        let mut workflows: HashMap<WorkflowId, Option<Workflow>> = HashMap::new();
        let mut resumed = Vec::new();

        for participant in due {
            let workflow_id = participant.workflow_id;
            if !workflows.contains_key(&workflow_id) {
                match self.store.get_workflow(workflow_id).await {
                    Ok(workflow) => {
                        workflows.insert(workflow_id, workflow);
                    }
                    Err(err) => {
                        tracing::warn!(workflow_id = %workflow_id, error = %err, "failed to load workflow");
                        report.errors += 1;
                        continue;
                    }
                }
            }
            let workflow = workflows.get(&workflow_id).and_then(Option::as_ref);

            let participant_id = participant.id;
            match self.wake(participant, workflow).await {
                Ok(Wake::Resumed(id)) => resumed.push(id),
                Ok(Wake::Completed) => report.completed += 1,
                Ok(Wake::Held) => report.held += 1,
                Ok(Wake::Failed) => report.failed += 1,
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(participant_id = %participant_id, "participant changed during sweep");
                    report.conflicts += 1;
                }
                Err(err) => {
                    tracing::warn!(participant_id = %participant_id, error = %err, "failed to wake participant");
                    report.errors += 1;
                }
            }
        }

        let outcomes: Vec<(ParticipantId, Result<_, ExecutionError>)> = stream::iter(resumed)
            .map(|participant_id| async move {
                (participant_id, self.executor.execute_step(participant_id).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (participant_id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.resumed += 1,
                Err(err) if err.is_retryable() => {
                    let job = ExecutionJob::new(participant_id, JobReason::Resumed, self.clock.now());
                    match self.queue.enqueue(job).await {
                        Ok(()) => report.requeued += 1,
                        Err(queue_err) => {
                            tracing::warn!(
                                participant_id = %participant_id,
                                error = %queue_err,
                                "failed to queue resumed participant"
                            );
                            report.errors += 1;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(participant_id = %participant_id, error = %err, "resumed step failed");
                    report.errors += 1;
                }
            }
        }

        if report.due > 0 {
            tracing::info!(
                due = report.due,
                resumed = report.resumed,
                completed = report.completed,
                held = report.held,
                "wake sweep finished"
            );
        }
        Ok(report)
    }

    async fn wake(
        &self,
        mut participant: Participant,
        workflow: Option<&Workflow>,
    ) -> Result<Wake, StoreError> {
        let now = self.clock.now();
        let Some(workflow) = workflow else {
            let error = format!("workflow {} not found", participant.workflow_id);
            return self.fail(participant, error).await;
        };
        if !workflow.is_active() {
            return Ok(Wake::Held);
        }

        let Some(node_id) = participant.current_node_id.clone() else {
            return self
                .fail(participant, "participant has no current node".to_string())
                .await;
        };
        if !workflow.graph.contains(&node_id) {
            return self
                .fail(participant, format!("node {node_id} not found in workflow"))
                .await;
        }

        match workflow.graph.next_node(&node_id, None) {
            Some(next) => {
                let next = next.id.clone();
                if participant.resume(next, now).is_err() {
                    return Ok(Wake::Held);
                }
                let participant = self
                    .store
                    .update_participant(participant, MetricsDelta::default())
                    .await?;
                Ok(Wake::Resumed(participant.id))
            }
            None => {
                if participant.complete(now).is_err() {
                    return Ok(Wake::Held);
                }
                self.store
                    .update_participant(participant, MetricsDelta::completed())
                    .await?;
                Ok(Wake::Completed)
            }
        }
    }

    async fn fail(&self, mut participant: Participant, error: String) -> Result<Wake, StoreError> {
        tracing::error!(participant_id = %participant.id, error = %error, "waiting participant failed");
        if participant.fail(error, None, self.clock.now()).is_err() {
            return Ok(Wake::Held);
        }
        self.store
            .update_participant(participant, MetricsDelta::failed())
            .await?;
        Ok(Wake::Failed)
    }

    /// Re-queues active participants of active workflows that have not
    /// logged anything within the stall window. Returns how many were queued.
    ///
    /// # Errors
    ///
    /// Fails only if stalled participants cannot be loaded.
    #[instrument(skip_all)]
    pub async fn requeue_stalled(&self) -> leadflow_core::Result<usize, SweepError> {
        let now = self.clock.now();
        let stall_after = i64::try_from(self.config.stall_after_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::days(365));
        let before = now
            .checked_sub_signed(stall_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stalled = self
            .store
            .stalled_participants(before, self.config.batch_size)
            .await
            .map_err(SweepError::Store)?;

        let mut active: HashMap<WorkflowId, bool> = HashMap::new();
        let mut queued = 0;
        for participant in stalled {
            let workflow_id = participant.workflow_id;
            let is_active = match active.get(&workflow_id) {
                Some(is_active) => *is_active,
                None => {
                    let is_active = self
                        .store
                        .get_workflow(workflow_id)
                        .await
                        .map_err(SweepError::Store)?
                        .is_some_and(|workflow| workflow.is_active());
                    active.insert(workflow_id, is_active);
                    is_active
                }
            };
            if !is_active {
                continue;
            }

            let job = ExecutionJob::new(participant.id, JobReason::Recovered, now);
            match self.queue.enqueue(job).await {
                Ok(()) => {
                    tracing::info!(participant_id = %participant.id, "stalled participant re-queued");
                    queued += 1;
                }
                Err(err) => {
                    tracing::warn!(participant_id = %participant.id, error = %err, "failed to re-queue participant");
                }
            }
        }
        Ok(queued)
    }

    /// Sweeps on the configured interval until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.sweep().await {
                        tracing::warn!(error = %err, "wake sweep failed");
                    }
                    if let Err(err) = self.requeue_stalled().await {
                        tracing::warn!(error = %err, "stalled participant sweep failed");
                    }
                }
            }
        }
        tracing::info!("wake sweeper stopped");
    }
}

//! Trigger dispatch: domain events in, enrollments and execution jobs out.

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::enrollment::EnrollmentService;
use crate::error::{BusError, DispatchError, EnrollmentError};
use crate::queue::{ExecutionJob, JobQueue, JobReason};
use crate::store::EngineStore;
use crate::trigger::DomainEvent;
use futures::StreamExt;
use leadflow_core::{ParticipantId, WorkflowId};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;

/// What dispatching one event did.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Participants created, each with a queued first step.
    pub enrolled: Vec<(WorkflowId, ParticipantId)>,
    /// Workflows that matched but did not admit the lead.
    pub skipped: Vec<(WorkflowId, EnrollmentError)>,
    pub errors: Vec<DispatchError>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enrolled.is_empty() && self.skipped.is_empty() && self.errors.is_empty()
    }
}

/// Matches events against active workflows and enrolls leads.
#[derive(Clone)]
pub struct TriggerDispatcher {
    store: Arc<dyn EngineStore>,
    enrollment: EnrollmentService,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl TriggerDispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enrollment: EnrollmentService::new(store.clone(), clock.clone()),
            store,
            queue,
            clock,
        }
    }

    /// Enrolls the event's lead in every active workflow whose trigger
    /// matches, and queues each new participant's first step.
    ///
    /// A failure for one workflow is recorded in the report and does not
    /// stop dispatch to the others.
    #[instrument(skip_all, fields(event_type = %event.event_type, lead_id = %event.lead_id))]
    pub async fn dispatch(&self, event: &DomainEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        let workflows = match self.store.active_workflows_for(event.event_type).await {
            Ok(workflows) => workflows,
            Err(err) => {
                tracing::error!(error = %err, "failed to load workflows");
                report.errors.push(DispatchError::Store(err));
                return report;
            }
        };

        for workflow in workflows
            .iter()
            .filter(|workflow| workflow.trigger.matches(workflow.id, event))
        {
            let participant = match self.enrollment.enroll(workflow, event).await {
                Ok(participant) => participant,
                Err(err) if err.is_skip() => {
                    tracing::debug!(workflow_id = %workflow.id, reason = %err, "enrollment skipped");
                    report.skipped.push((workflow.id, err));
                    continue;
                }
                Err(err) => {
                    tracing::warn!(workflow_id = %workflow.id, error = %err, "enrollment failed");
                    report.errors.push(DispatchError::Enrollment {
                        workflow_id: workflow.id,
                        source: err,
                    });
                    continue;
                }
            };

            let job = ExecutionJob::new(participant.id, JobReason::Enrolled, self.clock.now());
            match self.queue.enqueue(job).await {
                Ok(()) => report.enrolled.push((workflow.id, participant.id)),
                Err(err) => {
                    // the stalled-participant sweep picks this one up later
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        participant_id = %participant.id,
                        error = %err,
                        "failed to queue first step"
                    );
                    report.errors.push(DispatchError::Enqueue {
                        workflow_id: workflow.id,
                        participant_id: participant.id,
                        source: err,
                    });
                }
            }
        }

        report
    }

    /// Consumes events from the bus until `shutdown` flips or the stream
    /// ends. Each event is dispatched on its own task.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    pub async fn listen(
        &self,
        bus: &dyn EventBus,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        let mut events = bus.subscribe().await?;
        tracing::info!("trigger dispatcher listening");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            let report = dispatcher.dispatch(&event).await;
                            if !report.errors.is_empty() {
                                tracing::warn!(
                                    errors = report.errors.len(),
                                    enrolled = report.enrolled.len(),
                                    "dispatch finished with errors"
                                );
                            }
                        });
                    }
                    Some(Err(err)) => tracing::warn!(error = %err, "event bus error"),
                    None => break,
                },
            }
        }

        tracing::info!("trigger dispatcher stopped");
        Ok(())
    }
}

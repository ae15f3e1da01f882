//! Enrollment of leads into workflows.

use crate::clock::Clock;
use crate::definition::{EnrollmentSettings, MetricsDelta, Workflow};
use crate::error::{EnrollmentError, SkipReason};
use crate::participant::Participant;
use crate::store::EngineStore;
use crate::trigger::DomainEvent;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::instrument;

/// Decides whether a lead with the given enrollment history may enter again.
///
/// `history` holds every participant of the lead in the workflow.
///
/// # Errors
///
/// Returns the reason the enrollment must be skipped.
pub fn check_eligibility(
    settings: &EnrollmentSettings,
    history: &[Participant],
    now: DateTime<Utc>,
) -> Result<(), SkipReason> {
    if !settings.allow_reentry {
        if history.iter().any(Participant::is_live) {
            return Err(SkipReason::AlreadyEnrolled);
        }
        return Ok(());
    }

    if let Some(max) = settings.max_enrollments
        && history.len() >= max as usize
    {
        return Err(SkipReason::MaxEnrollments { max });
    }

    if settings.reentry_delay_days > 0
        && let Some(last) = history.iter().map(|p| p.entered_at).max()
        && last
            .checked_add_signed(Duration::days(i64::from(settings.reentry_delay_days)))
            .is_none_or(|ready| now < ready)
    {
        return Err(SkipReason::ReentryDelay {
            days: settings.reentry_delay_days,
        });
    }

    Ok(())
}

/// Creates participants.
#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn EngineStore>,
    clock: Arc<dyn Clock>,
}

impl EnrollmentService {
    #[must_use]
    pub fn new(store: Arc<dyn EngineStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Enrolls the event's lead at the workflow's entry node.
    ///
    /// The participant and the `total_entered`/`currently_active` metrics
    /// are written together. When reentry is off the store also rejects a
    /// second live participant, closing the race between two concurrent
    /// triggers for the same lead.
    ///
    /// # Errors
    ///
    /// Fails if the workflow is not active, the lead is not eligible, or the
    /// store rejects the write. [`EnrollmentError::is_skip`] separates the
    /// expected skips from real failures.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, lead_id = %event.lead_id))]
    pub async fn enroll(
        &self,
        workflow: &Workflow,
        event: &DomainEvent,
    ) -> Result<Participant, EnrollmentError> {
        if !workflow.is_active() {
            return Err(EnrollmentError::WorkflowNotActive {
                workflow_id: workflow.id,
                status: workflow.status,
            });
        }
        let entry = workflow
            .graph
            .entry_node()
            .ok_or(EnrollmentError::NoEntryNode {
                workflow_id: workflow.id,
            })?;

        let now = self.clock.now();
        let history = self
            .store
            .participants_for_lead(workflow.id, &event.lead_id)
            .await?;
        check_eligibility(&workflow.settings, &history, now).map_err(EnrollmentError::Ineligible)?;

        let enrollment_count = u32::try_from(history.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let participant = Participant::new(
            workflow.id,
            event.lead_id.clone(),
            entry.id.clone(),
            event.data.clone(),
            enrollment_count,
            now,
        );

        let participant = self
            .store
            .insert_participant(
                participant,
                MetricsDelta::entered(),
                !workflow.settings.allow_reentry,
            )
            .await?;
        tracing::info!(
            participant_id = %participant.id,
            enrollment_count,
            "lead enrolled"
        );
        Ok(participant)
    }
}

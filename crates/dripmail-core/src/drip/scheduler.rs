//! Step Scheduler - Arms, fires and chains each contact's sequence steps

use super::delivery::{Mailer, OutgoingEmail};
use super::template::TemplateRenderer;
use super::timers::{Clock, TimerError, TimerRegistry};
use chrono::{DateTime, Duration, Utc};
use dripmail_common::types::{CampaignId, ContactId};
use dripmail_storage::models::{Campaign, CampaignContact, ContactStatus, ScheduleRecord};
use dripmail_storage::repository::Repositories;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Engine errors
#[derive(Error, Debug)]
pub enum DripError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Cannot {action} a campaign that is {current}")]
    InvalidTransition {
        current: String,
        action: &'static str,
    },

    #[error(transparent)]
    Storage(#[from] dripmail_common::Error),

    #[error("Scheduling failed: {0}")]
    Scheduling(#[from] TimerError),
}

impl From<DripError> for dripmail_common::Error {
    fn from(e: DripError) -> Self {
        match e {
            DripError::NotFound(what) => dripmail_common::Error::NotFound(what),
            e @ DripError::InvalidTransition { .. } => {
                dripmail_common::Error::Conflict(e.to_string())
            }
            DripError::Storage(e) => e,
            DripError::Scheduling(e) => dripmail_common::Error::Internal(e.to_string()),
        }
    }
}

/// What `advance` did for a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The contact row no longer exists
    Missing,
    /// The campaign is not active; the contact was paused
    Paused,
    /// The contact is not pending or active, or changed state concurrently
    Skipped { status: String },
    /// No further step exists; the contact completed its sequence
    Completed,
    /// The next step was armed and recorded
    Scheduled {
        step_number: i32,
        job_id: String,
        due: DateTime<Utc>,
    },
}

type FireFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct SchedulerInner {
    repos: Repositories,
    timers: Arc<TimerRegistry>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    renderer: TemplateRenderer,
}

/// Step Scheduler.
///
/// Cheap to clone; every clone drives the same timer registry.
#[derive(Clone)]
pub struct StepScheduler {
    inner: Arc<SchedulerInner>,
}

impl StepScheduler {
    /// Create a new step scheduler
    pub fn new(
        repos: Repositories,
        timers: Arc<TimerRegistry>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                repos,
                timers,
                mailer,
                clock,
                renderer: TemplateRenderer::new(),
            }),
        }
    }

    /// The timer registry this scheduler arms
    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.inner.timers
    }

    /// Current time according to the scheduler's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Arm the contact's next step `delay_days` (plus `extra_delay_secs`)
    /// from now, or finish the contact when its sequence is exhausted.
    ///
    /// The schedule is persisted before the timer is armed, and only while
    /// the contact is still pending or active.
    pub async fn advance(
        &self,
        contact_id: ContactId,
        extra_delay_secs: u64,
    ) -> Result<Advance, DripError> {
        let repos = &self.inner.repos;

        let Some(contact) = repos.contacts.get(contact_id).await? else {
            self.inner.timers.cancel(contact_id).await;
            return Ok(Advance::Missing);
        };

        let Some(campaign) = repos.campaigns.get(contact.campaign_id).await? else {
            self.inner.timers.cancel(contact_id).await;
            return Ok(Advance::Missing);
        };

        if !campaign.is_active() {
            self.inner.timers.cancel(contact_id).await;
            repos.contacts.mark_paused(contact_id).await?;
            debug!(
                contact_id = %contact_id,
                campaign_id = %campaign.id,
                campaign_status = %campaign.status,
                "Campaign not active, contact paused"
            );
            return Ok(Advance::Paused);
        }

        if !contact.is_schedulable() {
            return Ok(Advance::Skipped {
                status: contact.status,
            });
        }

        let step_number = contact.current_step_number + 1;
        let Some(step) = repos
            .sequences
            .get_step(campaign.sequence_id, step_number)
            .await?
        else {
            self.inner.timers.cancel(contact_id).await;
            if repos.contacts.mark_completed(contact_id).await? {
                info!(
                    contact_id = %contact_id,
                    campaign_id = %campaign.id,
                    steps = contact.current_step_number,
                    "Contact completed sequence"
                );
                self.complete_campaign_if_finished(campaign.id).await?;
            }
            return Ok(Advance::Completed);
        };

        let now = self.now();
        let Some(due) = due_time(now, step.delay_days, extra_delay_secs) else {
            return self
                .fail_scheduling(contact_id, step_number, TimerError::OutOfRange)
                .await;
        };
        let job_id = TimerRegistry::job_id(contact_id, step_number);

        let record = ScheduleRecord {
            job_id: job_id.clone(),
            next_send_time: due,
            current_step_number: contact.current_step_number,
        };
        if !repos.contacts.record_schedule(contact_id, &record).await? {
            let status = repos
                .contacts
                .get(contact_id)
                .await?
                .map(|c| c.status)
                .unwrap_or_default();
            debug!(
                contact_id = %contact_id,
                status = %status,
                "Contact changed state before its step was recorded"
            );
            return Ok(Advance::Skipped { status });
        }

        let fire = self.fire_task(contact_id, step_number, job_id.clone());
        if let Err(e) = self
            .inner
            .timers
            .arm(contact_id, job_id.clone(), due, now, fire)
            .await
        {
            return self.fail_scheduling(contact_id, step_number, e).await;
        }

        info!(
            contact_id = %contact_id,
            campaign_id = %campaign.id,
            step_number,
            job_id = %job_id,
            due = %due,
            "Step scheduled"
        );

        Ok(Advance::Scheduled {
            step_number,
            job_id,
            due,
        })
    }

    /// Mark a contact failed because its step could not be scheduled
    async fn fail_scheduling(
        &self,
        contact_id: ContactId,
        step_number: i32,
        e: TimerError,
    ) -> Result<Advance, DripError> {
        warn!(
            contact_id = %contact_id,
            step_number,
            error = %e,
            "Failed to arm step timer"
        );
        self.inner
            .repos
            .contacts
            .mark_failed(contact_id, &format!("Failed to schedule step {}: {}", step_number, e))
            .await?;
        Err(e.into())
    }

    /// Re-arm a persisted schedule at its stored due time.
    ///
    /// Used on startup; the timer fires through the same path as a freshly
    /// armed step.
    pub async fn rearm(&self, contact: &CampaignContact) -> Result<Option<Advance>, DripError> {
        let Some(due) = contact.next_send_time else {
            return Ok(None);
        };
        let step_number = contact.current_step_number + 1;
        let job_id = contact
            .scheduled_job_id
            .clone()
            .unwrap_or_else(|| TimerRegistry::job_id(contact.id, step_number));

        let fire = self.fire_task(contact.id, step_number, job_id.clone());
        self.inner
            .timers
            .arm(contact.id, job_id.clone(), due, self.now(), fire)
            .await?;

        Ok(Some(Advance::Scheduled {
            step_number,
            job_id,
            due,
        }))
    }

    fn fire_task(&self, contact_id: ContactId, step_number: i32, job_id: String) -> FireFuture {
        let scheduler = self.clone();
        Box::pin(async move {
            scheduler.fire(contact_id, step_number, job_id).await;
        })
    }

    /// Timer callback: send the armed step, then chain to the next one
    async fn fire(&self, contact_id: ContactId, step_number: i32, job_id: String) {
        if !self.inner.timers.release(contact_id, &job_id).await {
            debug!(contact_id = %contact_id, job_id = %job_id, "Timer superseded, not firing");
            return;
        }

        match self.send_step(contact_id, step_number, &job_id).await {
            Ok(true) => match self.advance(contact_id, 0).await {
                Ok(_) => {}
                Err(e) => {
                    error!(
                        contact_id = %contact_id,
                        step_number,
                        error = %e,
                        "Failed to schedule following step"
                    );
                }
            },
            Ok(false) => {}
            Err(e) => {
                error!(
                    contact_id = %contact_id,
                    step_number,
                    error = %e,
                    "Step delivery aborted"
                );
                let reason = format!("Step {} aborted: {}", step_number, e);
                if let Err(e) = self.inner.repos.contacts.mark_failed(contact_id, &reason).await {
                    error!(contact_id = %contact_id, error = %e, "Failed to mark contact failed");
                }
            }
        }
    }

    /// Deliver one fired step. Returns true when the step was sent and
    /// recorded, i.e. the sequence should continue.
    async fn send_step(
        &self,
        contact_id: ContactId,
        step_number: i32,
        job_id: &str,
    ) -> Result<bool, DripError> {
        let repos = &self.inner.repos;

        let Some(contact) = repos.contacts.get(contact_id).await? else {
            return Ok(false);
        };
        let Some(campaign) = repos.campaigns.get(contact.campaign_id).await? else {
            return Ok(false);
        };

        if !campaign.is_active() {
            repos.contacts.mark_paused(contact_id).await?;
            info!(
                contact_id = %contact_id,
                campaign_id = %campaign.id,
                "Campaign no longer active, step not sent"
            );
            return Ok(false);
        }

        if contact.status_enum() != Some(ContactStatus::Active)
            || contact.scheduled_job_id.as_deref() != Some(job_id)
            || contact.current_step_number >= step_number
        {
            debug!(
                contact_id = %contact_id,
                step_number,
                status = %contact.status,
                "Contact no longer expects this step"
            );
            return Ok(false);
        }

        let Some(step) = repos
            .sequences
            .get_step(campaign.sequence_id, step_number)
            .await?
        else {
            repos
                .contacts
                .mark_failed(contact_id, &format!("Step {} no longer exists", step_number))
                .await?;
            return Ok(false);
        };

        let email = match self.compose(&campaign, &contact, &step.subject_template, &step.body_template) {
            Ok(email) => email,
            Err(reason) => {
                repos.contacts.mark_failed(contact_id, &reason).await?;
                return Ok(false);
            }
        };

        let smtp = match campaign.smtp_settings() {
            Ok(smtp) => smtp,
            Err(e) => {
                repos
                    .contacts
                    .mark_failed(contact_id, &format!("Invalid SMTP settings: {}", e))
                    .await?;
                return Ok(false);
            }
        };

        match self.inner.mailer.send(&smtp, &email).await {
            Ok(()) => {
                let recorded = repos.contacts.record_sent(contact_id, step_number).await?;
                info!(
                    contact_id = %contact_id,
                    campaign_id = %campaign.id,
                    step_number,
                    to = %email.to,
                    "Step sent"
                );
                if !recorded {
                    debug!(contact_id = %contact_id, "Contact left active state during send");
                }
                Ok(recorded)
            }
            Err(e) => {
                warn!(
                    contact_id = %contact_id,
                    campaign_id = %campaign.id,
                    step_number,
                    error = %e,
                    "Step delivery failed"
                );
                repos.contacts.mark_failed(contact_id, &e.to_string()).await?;
                Ok(false)
            }
        }
    }

    fn compose(
        &self,
        campaign: &Campaign,
        contact: &CampaignContact,
        subject: &str,
        body: &str,
    ) -> Result<OutgoingEmail, String> {
        let rendered = self
            .inner
            .renderer
            .render_step(subject, body, &contact.data_map());

        if !rendered.missing.is_empty() {
            warn!(
                contact_id = %contact.id,
                missing = ?rendered.missing,
                "Unresolved template placeholders"
            );
        }

        if rendered.subject.trim().is_empty() {
            return Err("Rendered subject is empty".to_string());
        }

        Ok(OutgoingEmail {
            from: campaign.from_email.clone(),
            to: contact.contact_email.clone(),
            subject: rendered.subject,
            html_body: rendered.body,
        })
    }

    async fn complete_campaign_if_finished(&self, campaign_id: CampaignId) -> Result<(), DripError> {
        if self
            .inner
            .repos
            .campaigns
            .complete_if_finished(campaign_id)
            .await?
        {
            info!(campaign_id = %campaign_id, "Campaign completed");
        }
        Ok(())
    }
}

/// Due time of a step `delay_days` days plus `extra_delay_secs` seconds
/// after `now`, or `None` when it is not representable
fn due_time(now: DateTime<Utc>, delay_days: i32, extra_delay_secs: u64) -> Option<DateTime<Utc>> {
    let days = Duration::try_days(i64::from(delay_days))?;
    let extra = Duration::try_seconds(i64::try_from(extra_delay_secs).ok()?)?;
    now.checked_add_signed(days)?.checked_add_signed(extra)
}

//! Campaign Controller - Batch lifecycle operations over a campaign's contacts

use super::scheduler::{Advance, DripError, StepScheduler};
use dripmail_common::config::SchedulerConfig;
use dripmail_common::types::{CampaignId, ContactId};
use dripmail_storage::models::{
    BatchLock, BatchSelect, CampaignContact, CampaignStatus, Enrollment, NewContact,
};
use dripmail_storage::repository::Repositories;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Cumulative send staggering for a batch of contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    min_secs: u64,
    max_secs: u64,
}

impl Jitter {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs: min_secs.min(max_secs),
            max_secs: min_secs.max(max_secs),
        }
    }

    /// Extra delay for each of `n` contacts: the running sum of one random
    /// increment per contact, so every contact goes out after the previous one
    pub fn offsets(&self, n: usize) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        let mut total = 0u64;
        (0..n)
            .map(|_| {
                total += rng.gen_range(self.min_secs..=self.max_secs);
                total
            })
            .collect()
    }
}

impl From<&SchedulerConfig> for Jitter {
    fn from(config: &SchedulerConfig) -> Self {
        Self::new(config.jitter_min_secs, config.jitter_max_secs)
    }
}

/// Result of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Contacts the operation acted on
    pub affected: usize,
    /// Contacts with a step armed afterwards
    pub scheduled: usize,
    /// Contacts that could not be scheduled and were marked failed
    pub failed: usize,
}

/// A contact that could not be added
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactError {
    /// Position in the submitted list
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub message: String,
}

/// Result of adding contacts to a running campaign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddContactsReport {
    pub added: usize,
    pub errors: Vec<ContactError>,
}

/// Campaign Controller
#[derive(Clone)]
pub struct CampaignController {
    repos: Repositories,
    scheduler: StepScheduler,
    jitter: Jitter,
}

impl CampaignController {
    /// Create a new campaign controller
    pub fn new(repos: Repositories, scheduler: StepScheduler, jitter: Jitter) -> Self {
        Self {
            repos,
            scheduler,
            jitter,
        }
    }

    fn locked(
        lock: BatchLock,
        campaign_id: CampaignId,
        action: &'static str,
    ) -> Result<Vec<CampaignContact>, DripError> {
        match lock {
            BatchLock::NotFound => Err(DripError::NotFound(format!("Campaign {}", campaign_id))),
            BatchLock::Rejected { current } => {
                Err(DripError::InvalidTransition { current, action })
            }
            BatchLock::Locked { contacts, .. } => Ok(contacts),
        }
    }

    /// Activate a draft or paused campaign and schedule every contact that
    /// has not started yet, plus contacts left paused by a pause
    pub async fn start(&self, campaign_id: CampaignId) -> Result<BatchReport, DripError> {
        let lock = self
            .repos
            .campaigns
            .lock_batch(
                campaign_id,
                &[CampaignStatus::Draft, CampaignStatus::Paused],
                CampaignStatus::Active,
                BatchSelect::Startable,
            )
            .await?;
        let contacts = Self::locked(lock, campaign_id, "start")?;

        info!(
            campaign_id = %campaign_id,
            contacts = contacts.len(),
            "Campaign started"
        );

        let ids: Vec<ContactId> = contacts.iter().map(|c| c.id).collect();
        Ok(self.schedule_batch(&ids).await)
    }

    /// Pause an active campaign, cancelling every armed step
    pub async fn pause(&self, campaign_id: CampaignId) -> Result<BatchReport, DripError> {
        let lock = self
            .repos
            .campaigns
            .lock_batch(
                campaign_id,
                &[CampaignStatus::Active],
                CampaignStatus::Paused,
                BatchSelect::Scheduled,
            )
            .await?;
        let contacts = Self::locked(lock, campaign_id, "pause")?;

        let mut report = BatchReport::default();
        for contact in &contacts {
            if self.scheduler.timers().cancel(contact.id).await.is_none() {
                warn!(
                    contact_id = %contact.id,
                    job_id = ?contact.scheduled_job_id,
                    "No armed timer in this process for scheduled contact"
                );
            }
            if self.repos.contacts.mark_paused(contact.id).await? {
                report.affected += 1;
            }
        }

        info!(
            campaign_id = %campaign_id,
            paused = report.affected,
            "Campaign paused"
        );

        Ok(report)
    }

    /// Reset every failed contact of an active campaign and schedule it again
    pub async fn retry_failed(&self, campaign_id: CampaignId) -> Result<BatchReport, DripError> {
        let lock = self
            .repos
            .campaigns
            .lock_batch(
                campaign_id,
                &[CampaignStatus::Active],
                CampaignStatus::Active,
                BatchSelect::Failed,
            )
            .await?;
        let contacts = Self::locked(lock, campaign_id, "retry failed contacts of")?;

        info!(
            campaign_id = %campaign_id,
            contacts = contacts.len(),
            "Retrying failed contacts"
        );

        let ids: Vec<ContactId> = contacts.iter().map(|c| c.id).collect();
        Ok(self.schedule_batch(&ids).await)
    }

    /// Enroll recipient records into an active campaign and schedule them.
    /// Invalid and duplicate records are reported per contact.
    pub async fn add_contacts(
        &self,
        campaign_id: CampaignId,
        records: &[serde_json::Value],
    ) -> Result<AddContactsReport, DripError> {
        let campaign = self
            .repos
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| DripError::NotFound(format!("Campaign {}", campaign_id)))?;
        if !campaign.is_active() {
            return Err(DripError::InvalidTransition {
                current: campaign.status,
                action: "add contacts to",
            });
        }

        let mut report = AddContactsReport::default();
        let mut valid = Vec::with_capacity(records.len());
        let mut positions = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match NewContact::from_record(record) {
                Ok(contact) => {
                    valid.push(contact);
                    positions.push(index);
                }
                Err(violation) => report.errors.push(ContactError {
                    index,
                    email: record
                        .get("email")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    message: format!("{} {}", violation.field, violation.message),
                }),
            }
        }

        let emails: Vec<String> = valid.iter().map(|c| c.email.clone()).collect();
        let (inserted, duplicates) = match self.repos.campaigns.enroll(campaign_id, valid).await? {
            Enrollment::NotFound => {
                return Err(DripError::NotFound(format!("Campaign {}", campaign_id)))
            }
            Enrollment::Rejected { current } => {
                return Err(DripError::InvalidTransition {
                    current,
                    action: "add contacts to",
                })
            }
            Enrollment::Enrolled {
                inserted,
                duplicates,
            } => (inserted, duplicates),
        };

        // A repeated email is reported once per occurrence after the first
        let mut reported = vec![false; emails.len()];
        for duplicate in &duplicates {
            let first = inserted.iter().any(|c| &c.contact_email == duplicate);
            let mut seen_first = false;
            for (i, email) in emails.iter().enumerate() {
                if email != duplicate || reported[i] {
                    continue;
                }
                if first && !seen_first {
                    seen_first = true;
                    continue;
                }
                reported[i] = true;
                report.errors.push(ContactError {
                    index: positions[i],
                    email: Some(email.clone()),
                    message: "Contact is already enrolled in this campaign".to_string(),
                });
                break;
            }
        }
        report.errors.sort_by_key(|e| e.index);
        report.added = inserted.len();

        info!(
            campaign_id = %campaign_id,
            added = report.added,
            rejected = report.errors.len(),
            "Contacts added"
        );

        let ids: Vec<ContactId> = inserted.iter().map(|c| c.id).collect();
        self.schedule_batch(&ids).await;

        Ok(report)
    }

    /// Delete a campaign with its contacts and drop their armed timers
    pub async fn delete(&self, campaign_id: CampaignId) -> Result<usize, DripError> {
        let removed = self
            .repos
            .campaigns
            .delete(campaign_id)
            .await?
            .ok_or_else(|| DripError::NotFound(format!("Campaign {}", campaign_id)))?;

        let mut cancelled = 0;
        for contact_id in &removed {
            if self.scheduler.timers().cancel(*contact_id).await.is_some() {
                cancelled += 1;
            }
        }

        info!(
            campaign_id = %campaign_id,
            contacts = removed.len(),
            cancelled,
            "Campaign deleted"
        );

        Ok(removed.len())
    }

    /// Advance each contact with a cumulative jitter offset. A contact that
    /// cannot be scheduled is marked failed without affecting the rest.
    async fn schedule_batch(&self, contact_ids: &[ContactId]) -> BatchReport {
        let offsets = self.jitter.offsets(contact_ids.len());
        let mut report = BatchReport {
            affected: contact_ids.len(),
            ..BatchReport::default()
        };

        for (contact_id, offset) in contact_ids.iter().zip(offsets) {
            match self.scheduler.advance(*contact_id, offset).await {
                Ok(Advance::Scheduled { .. }) => report.scheduled += 1,
                Ok(outcome) => {
                    debug!(contact_id = %contact_id, outcome = ?outcome, "Contact not scheduled");
                }
                Err(e) => {
                    warn!(contact_id = %contact_id, error = %e, "Failed to schedule contact");
                    report.failed += 1;
                    // Scheduling errors already left their cause on the contact
                    if matches!(e, DripError::Scheduling(_)) {
                        continue;
                    }
                    if let Err(mark_err) = self
                        .repos
                        .contacts
                        .mark_failed(*contact_id, &e.to_string())
                        .await
                    {
                        warn!(
                            contact_id = %contact_id,
                            error = %mark_err,
                            "Failed to mark contact failed"
                        );
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drip::testing::Fixture;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_jitter_offsets_are_cumulative() {
        let offsets = Jitter::new(10, 40).offsets(50);
        assert_eq!(offsets.len(), 50);
        assert!((10..=40).contains(&offsets[0]));
        for pair in offsets.windows(2) {
            let step = pair[1] - pair[0];
            assert!((10..=40).contains(&step), "increment {} out of range", step);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_step_scenario() {
        let fx = Fixture::new(&[0, 2], &["ana@example.com"]).await;
        let contact = fx.contacts[0].id;
        let started = fx.scheduler.now();

        let report = fx.controller.start(fx.campaign_id).await.unwrap();
        assert_eq!(report.affected, 1);
        assert_eq!(report.scheduled, 1);

        let row = fx.contact(contact).await;
        assert_eq!(row.status, "active");
        assert_eq!(row.current_step_number, 0);
        let first_due = row.next_send_time.unwrap();
        assert!(first_due >= started + Duration::seconds(10));
        assert!(first_due <= started + Duration::seconds(40));

        tokio::time::sleep(StdDuration::from_secs(60)).await;
        let row = fx.contact(contact).await;
        assert_eq!(row.status, "active");
        assert_eq!(row.current_step_number, 1);
        let second_due = row.next_send_time.unwrap();
        let expected = fx.mailer.sent()[0].sent_at + Duration::days(2);
        assert!((second_due - expected).num_seconds().abs() <= 1);

        tokio::time::sleep(StdDuration::from_secs(2 * 86_400)).await;
        let row = fx.contact(contact).await;
        assert_eq!(row.status, "completed");
        assert_eq!(row.current_step_number, 2);
        assert_eq!(row.next_send_time, None);
        assert_eq!(fx.mailer.sent().len(), 2);
        assert_eq!(fx.campaign().await.status, "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_active_campaign() {
        let fx = Fixture::new(&[0], &["ana@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();

        let err = fx.controller.start(fx.campaign_id).await.unwrap_err();
        assert!(matches!(
            err,
            DripError::InvalidTransition { ref current, .. } if current == "active"
        ));
        assert_eq!(
            err.to_string(),
            "Cannot start a campaign that is active"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_staggers_contacts() {
        let emails = ["a@example.com", "b@example.com", "c@example.com"];
        let fx = Fixture::new(&[0], &emails).await;
        fx.controller.start(fx.campaign_id).await.unwrap();

        let mut dues = Vec::new();
        for contact in &fx.contacts {
            dues.push(fx.contact(contact.id).await.next_send_time.unwrap());
        }
        assert!(dues[0] < dues[1] && dues[1] < dues[2]);
        assert_eq!(fx.timers.armed_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_cancels_timers_and_resume_continues() {
        let fx = Fixture::new(&[0, 1], &["a@example.com", "b@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();

        let report = fx.controller.pause(fx.campaign_id).await.unwrap();
        assert_eq!(report.affected, 2);
        assert_eq!(fx.timers.armed_count().await, 0);
        for contact in &fx.contacts {
            let row = fx.contact(contact.id).await;
            assert_eq!(row.status, "paused");
            assert_eq!(row.next_send_time, None);
            assert_eq!(row.scheduled_job_id, None);
        }

        tokio::time::sleep(StdDuration::from_secs(3 * 86_400)).await;
        assert!(fx.mailer.sent().is_empty());

        let report = fx.controller.start(fx.campaign_id).await.unwrap();
        assert_eq!(report.scheduled, 2);
        tokio::time::sleep(StdDuration::from_secs(3 * 86_400)).await;
        assert_eq!(fx.mailer.sent().len(), 4);
        assert_eq!(fx.campaign().await.status, "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_isolates_unschedulable_contact() {
        let emails = ["a@example.com", "b@example.com", "c@example.com"];
        let fx = Fixture::new(&[0, i32::MAX], &emails).await;
        let stuck = fx.contacts[1].id;

        // b already sent step 1 and was paused; its step 2 cannot be dated
        fx.repos
            .contacts
            .record_schedule(
                stuck,
                &dripmail_storage::models::ScheduleRecord {
                    job_id: "drip-old".to_string(),
                    next_send_time: fx.scheduler.now(),
                    current_step_number: 1,
                },
            )
            .await
            .unwrap();
        assert!(fx.repos.contacts.mark_paused(stuck).await.unwrap());

        let report = fx.controller.start(fx.campaign_id).await.unwrap();
        assert_eq!(
            report,
            BatchReport {
                affected: 3,
                scheduled: 2,
                failed: 1
            }
        );
        assert_eq!(fx.timers.armed_count().await, 2);

        let row = fx.contact(stuck).await;
        assert_eq!(row.status, "failed");
        assert_eq!(row.next_send_time, None);
        assert!(row
            .last_error
            .unwrap()
            .contains("Failed to schedule step 2"));

        for sibling in [fx.contacts[0].id, fx.contacts[2].id] {
            let row = fx.contact(sibling).await;
            assert_eq!(row.status, "active");
            assert!(row.next_send_time.is_some());
        }
        assert_eq!(fx.campaign().await.status, "active");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_rejects_draft_campaign() {
        let fx = Fixture::new(&[0], &["a@example.com"]).await;
        let err = fx.controller.pause(fx.campaign_id).await.unwrap_err();
        assert!(matches!(err, DripError::InvalidTransition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_tolerates_missing_timer() {
        let fx = Fixture::new(&[0], &["a@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();
        // Simulate a restart that lost the in-memory timers
        fx.timers.cancel_all().await;

        let report = fx.controller.pause(fx.campaign_id).await.unwrap();
        assert_eq!(report.affected, 1);
        assert_eq!(fx.contact(fx.contacts[0].id).await.status, "paused");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_only_touches_failed_contacts() {
        let fx = Fixture::new(&[0, 5], &["a@example.com", "b@example.com"]).await;
        fx.mailer.fail_for("b@example.com");
        fx.controller.start(fx.campaign_id).await.unwrap();
        tokio::time::sleep(StdDuration::from_secs(120)).await;

        let a = fx.contact(fx.contacts[0].id).await;
        let b = fx.contact(fx.contacts[1].id).await;
        assert_eq!(a.status, "active");
        assert_eq!(a.current_step_number, 1);
        assert_eq!(b.status, "failed");

        fx.mailer.heal();
        let report = fx.controller.retry_failed(fx.campaign_id).await.unwrap();
        assert_eq!(report.affected, 1);
        assert_eq!(report.scheduled, 1);

        let a_after = fx.contact(fx.contacts[0].id).await;
        assert_eq!(a_after.scheduled_job_id, a.scheduled_job_id);
        assert_eq!(a_after.next_send_time, a.next_send_time);

        let b = fx.contact(fx.contacts[1].id).await;
        assert_eq!(b.status, "active");
        assert_eq!(b.last_error, None);

        tokio::time::sleep(StdDuration::from_secs(120)).await;
        let b = fx.contact(fx.contacts[1].id).await;
        assert_eq!(b.current_step_number, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_requires_active_campaign() {
        let fx = Fixture::new(&[0], &["a@example.com"]).await;
        let err = fx.controller.retry_failed(fx.campaign_id).await.unwrap_err();
        assert!(matches!(err, DripError::InvalidTransition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_contacts_reports_duplicates_and_invalid_records() {
        let fx = Fixture::new(&[0], &["a@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();

        let records = vec![
            json!({"email": "a@example.com"}),
            json!({"email": "c@example.com", "firstName": "Cy"}),
            json!({"firstName": "NoEmail"}),
            json!({"email": "c@example.com"}),
        ];
        let report = fx
            .controller
            .add_contacts(fx.campaign_id, &records)
            .await
            .unwrap();

        assert_eq!(report.added, 1);
        let indexes: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 2, 3]);
        assert_eq!(report.errors[2].email.as_deref(), Some("c@example.com"));

        let contacts = fx.repos.contacts.list_by_campaign(fx.campaign_id).await.unwrap();
        assert_eq!(contacts.len(), 2);
        let added = contacts.iter().find(|c| c.contact_email == "c@example.com").unwrap();
        assert_eq!(added.status, "active");
        assert!(added.next_send_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_contacts_requires_active_campaign() {
        let fx = Fixture::new(&[0], &[]).await;
        let err = fx
            .controller
            .add_contacts(fx.campaign_id, &[json!({"email": "a@example.com"})])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DripError::InvalidTransition { ref current, .. } if current == "draft"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_timers() {
        let fx = Fixture::new(&[0], &["a@example.com", "b@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();
        assert_eq!(fx.timers.armed_count().await, 2);

        assert_eq!(fx.controller.delete(fx.campaign_id).await.unwrap(), 2);
        assert_eq!(fx.timers.armed_count().await, 0);

        tokio::time::sleep(StdDuration::from_secs(600)).await;
        assert!(fx.mailer.sent().is_empty());
    }
}

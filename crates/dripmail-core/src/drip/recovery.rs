//! Recovery Loader - Re-arms persisted schedules after a restart

use super::scheduler::{DripError, StepScheduler};
use dripmail_storage::repository::Repositories;
use serde::Serialize;
use tracing::{error, info, warn};

/// Outcome of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Schedules armed again at their stored due time
    pub rearmed: usize,
    /// Schedules whose due time passed while the process was down
    pub missed: usize,
    /// Schedules that could not be armed for another reason
    pub failed: usize,
}

/// Recovery Loader
pub struct RecoveryLoader {
    repos: Repositories,
    scheduler: StepScheduler,
}

impl RecoveryLoader {
    /// Create a new recovery loader
    pub fn new(repos: Repositories, scheduler: StepScheduler) -> Self {
        Self { repos, scheduler }
    }

    /// Arm a timer for every active contact of an active campaign that has a
    /// persisted due time. Due times that already passed are not sent; the
    /// contact is failed so the gap can be retried explicitly.
    pub async fn run(&self) -> Result<RecoveryReport, DripError> {
        let armed = self.repos.contacts.list_armed().await?;
        let now = self.scheduler.now();
        let mut report = RecoveryReport::default();

        for contact in &armed {
            let Some(due) = contact.next_send_time else {
                continue;
            };

            if due < now {
                let reason = format!("Missed schedule during downtime (was due at {})", due);
                warn!(
                    contact_id = %contact.id,
                    campaign_id = %contact.campaign_id,
                    due = %due,
                    "Missed schedule during downtime"
                );
                if self.repos.contacts.mark_failed(contact.id, &reason).await? {
                    report.missed += 1;
                }
                continue;
            }

            match self.scheduler.rearm(contact).await {
                Ok(Some(_)) => report.rearmed += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(contact_id = %contact.id, error = %e, "Failed to re-arm schedule");
                    self.repos
                        .contacts
                        .mark_failed(contact.id, &format!("Failed to restore schedule: {}", e))
                        .await?;
                    report.failed += 1;
                }
            }
        }

        info!(
            rearmed = report.rearmed,
            missed = report.missed,
            failed = report.failed,
            "Schedule recovery finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drip::testing::Fixture;
    use chrono::Duration;
    use dripmail_storage::models::ScheduleRecord;
    use pretty_assertions::assert_eq;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn test_restart_fires_at_original_due_time() {
        let fx = Fixture::new(&[1], &["ana@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();
        let contact = fx.contacts[0].id;
        let due = fx.contact(contact).await.next_send_time.unwrap();

        tokio::time::sleep(StdDuration::from_secs(3600)).await;

        // Process dies: in-memory timers are lost, storage survives
        fx.timers.cancel_all().await;
        let restarted = fx.restart();

        let report = restarted.recovery.run().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                rearmed: 1,
                missed: 0,
                failed: 0
            }
        );
        assert_eq!(restarted.timers.armed_count().await, 1);

        tokio::time::sleep(StdDuration::from_secs(86_400)).await;
        let sent = restarted.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!((sent[0].sent_at - due).num_seconds().abs() <= 1);

        let row = fx.contact(contact).await;
        assert_eq!(row.status, "completed");
        assert_eq!(row.current_step_number, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_schedule_is_failed_not_sent() {
        let fx = Fixture::new(&[0], &["ana@example.com"]).await;
        fx.activate().await;
        let contact = fx.contacts[0].id;

        fx.repos
            .contacts
            .record_schedule(
                contact,
                &ScheduleRecord {
                    job_id: "drip-stale".to_string(),
                    next_send_time: fx.scheduler.now() - Duration::hours(2),
                    current_step_number: 0,
                },
            )
            .await
            .unwrap();

        let report = fx.recovery.run().await.unwrap();
        assert_eq!(report.missed, 1);
        assert_eq!(report.rearmed, 0);

        tokio::time::sleep(StdDuration::from_secs(600)).await;
        assert!(fx.mailer.sent().is_empty());

        let row = fx.contact(contact).await;
        assert_eq!(row.status, "failed");
        assert!(row.last_error.unwrap().contains("Missed schedule"));
        assert_eq!(row.next_send_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_seconds_overdue_is_missed() {
        let fx = Fixture::new(&[0], &["ana@example.com"]).await;
        fx.activate().await;
        let contact = fx.contacts[0].id;

        fx.repos
            .contacts
            .record_schedule(
                contact,
                &ScheduleRecord {
                    job_id: "drip-late".to_string(),
                    next_send_time: fx.scheduler.now() - Duration::seconds(3),
                    current_step_number: 0,
                },
            )
            .await
            .unwrap();

        let report = fx.recovery.run().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                rearmed: 0,
                missed: 1,
                failed: 0
            }
        );
        assert_eq!(fx.timers.armed_count().await, 0);

        tokio::time::sleep(StdDuration::from_secs(60)).await;
        assert!(fx.mailer.sent().is_empty());
        assert_eq!(fx.contact(contact).await.status, "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_campaign_is_not_recovered() {
        let fx = Fixture::new(&[1], &["ana@example.com"]).await;
        fx.controller.start(fx.campaign_id).await.unwrap();
        fx.timers.cancel_all().await;
        fx.set_campaign_status(dripmail_storage::CampaignStatus::Paused)
            .await;

        let report = fx.recovery.run().await.unwrap();
        assert_eq!(report, RecoveryReport::default());
        assert_eq!(fx.timers.armed_count().await, 0);
    }
}

//! Drip Engine - Wires the scheduler, controller and recovery loader together

use super::controller::{CampaignController, Jitter};
use super::delivery::{Mailer, SmtpMailer};
use super::recovery::{RecoveryLoader, RecoveryReport};
use super::scheduler::{DripError, StepScheduler};
use super::timers::{Clock, SystemClock, TimerRegistry};
use dripmail_common::config::SchedulerConfig;
use dripmail_storage::repository::Repositories;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The scheduling engine owned by the process
pub struct DripEngine {
    pub scheduler: StepScheduler,
    pub controller: CampaignController,
    pub recovery: RecoveryLoader,
}

impl DripEngine {
    /// Build an engine around an explicit mailer and clock
    pub fn new(
        repos: Repositories,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        let tolerance = Duration::from_secs(config.past_due_tolerance_secs);
        let timers = Arc::new(TimerRegistry::new(tolerance));
        let scheduler = StepScheduler::new(repos.clone(), timers, mailer, clock);
        let controller =
            CampaignController::new(repos.clone(), scheduler.clone(), Jitter::from(config));
        let recovery = RecoveryLoader::new(repos, scheduler.clone());

        Self {
            scheduler,
            controller,
            recovery,
        }
    }

    /// Build an engine that delivers over SMTP on the system clock
    pub fn from_config(repos: Repositories, config: &SchedulerConfig) -> Self {
        let mailer = SmtpMailer::new(Duration::from_secs(config.smtp_timeout_secs));
        Self::new(repos, Arc::new(mailer), Arc::new(SystemClock), config)
    }

    /// Process-local timer registry
    pub fn timers(&self) -> &Arc<TimerRegistry> {
        self.scheduler.timers()
    }

    /// Re-arm persisted schedules; run once before serving requests
    pub async fn recover(&self) -> Result<RecoveryReport, DripError> {
        self.recovery.run().await
    }

    /// Cancel every armed timer. Persisted schedules are left in place for
    /// the next start.
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.timers().cancel_all().await;
        info!(cancelled, "Drip engine stopped");
        cancelled
    }
}

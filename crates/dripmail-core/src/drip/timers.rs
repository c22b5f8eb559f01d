//! Timer Registry - Process-local index of armed step timers
//!
//! The persisted `next_send_time`/`scheduled_job_id` columns are the source of
//! truth for what is scheduled. This registry only tracks which of those
//! schedules the current process has armed, holding at most one timer per
//! contact, and is rebuilt by the recovery loader on startup.

use chrono::{DateTime, Duration, Utc};
use dripmail_common::types::ContactId;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

/// Source of wall-clock time for due-time arithmetic
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock derived from the tokio timer clock.
///
/// Advances with `tokio::time`, so a paused runtime moves this clock and the
/// armed timers together.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.started.elapsed()).unwrap_or(Duration::zero());
        self.origin + elapsed
    }
}

/// Timer registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("due time {due} is already {late_secs}s in the past")]
    PastDue { due: DateTime<Utc>, late_secs: i64 },

    #[error("due time is out of range")]
    OutOfRange,
}

struct ArmedTimer {
    job_id: String,
    due: DateTime<Utc>,
    handle: AbortHandle,
}

/// Registry of armed step timers, keyed by contact
pub struct TimerRegistry {
    timers: Mutex<HashMap<ContactId, ArmedTimer>>,
    /// How late a due time may be and still be armed (fires immediately)
    past_due_tolerance: Duration,
}

impl TimerRegistry {
    /// Create a new registry
    pub fn new(past_due_tolerance: std::time::Duration) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            past_due_tolerance: Duration::from_std(past_due_tolerance)
                .unwrap_or(Duration::zero()),
        }
    }

    /// Deterministic job id for a contact's step
    pub fn job_id(contact_id: ContactId, step_number: i32) -> String {
        format!("drip-{}-step-{}", contact_id, step_number)
    }

    /// Arm `task` to run at `due`, replacing any timer already armed for the
    /// contact.
    pub async fn arm<F>(
        &self,
        contact_id: ContactId,
        job_id: String,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
        task: F,
    ) -> Result<(), TimerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = due - now;
        if delay < -self.past_due_tolerance {
            return Err(TimerError::PastDue {
                due,
                late_secs: -delay.num_seconds(),
            });
        }
        let sleep_for = delay.to_std().unwrap_or(std::time::Duration::ZERO);

        let mut timers = self.timers.lock().await;

        if let Some(previous) = timers.remove(&contact_id) {
            debug!(
                contact_id = %contact_id,
                job_id = %previous.job_id,
                "Replacing armed timer"
            );
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;
            task.await;
        })
        .abort_handle();

        timers.insert(
            contact_id,
            ArmedTimer {
                job_id,
                due,
                handle,
            },
        );

        Ok(())
    }

    /// Consume a fired timer. Returns false when the timer was cancelled or
    /// replaced in the meantime, in which case the firing must not proceed.
    pub async fn release(&self, contact_id: ContactId, job_id: &str) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.get(&contact_id) {
            Some(armed) if armed.job_id == job_id => {
                timers.remove(&contact_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel the contact's timer, returning its job id if one was armed
    pub async fn cancel(&self, contact_id: ContactId) -> Option<String> {
        let armed = self.timers.lock().await.remove(&contact_id)?;
        armed.handle.abort();
        Some(armed.job_id)
    }

    /// Cancel the contact's timer only if it is the given job
    pub async fn cancel_job(&self, contact_id: ContactId, job_id: &str) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.get(&contact_id) {
            Some(armed) if armed.job_id == job_id => {
                if let Some(armed) = timers.remove(&contact_id) {
                    armed.handle.abort();
                }
                true
            }
            _ => false,
        }
    }

    /// Job id and due time armed for a contact
    pub async fn armed(&self, contact_id: ContactId) -> Option<(String, DateTime<Utc>)> {
        self.timers
            .lock()
            .await
            .get(&contact_id)
            .map(|a| (a.job_id.clone(), a.due))
    }

    /// Number of armed timers
    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Cancel every armed timer
    pub async fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, armed) in timers.drain() {
            armed.handle.abort();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn registry() -> TimerRegistry {
        TimerRegistry::new(std::time::Duration::from_secs(5))
    }

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_due_time() {
        let timers = registry();
        let clock = TokioClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let contact = Uuid::now_v7();

        let due = clock.now() + Duration::seconds(30);
        timers
            .arm(contact, "job".to_string(), due, clock.now(), counting_task(&fired))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(29)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let timers = registry();
        let clock = TokioClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let contact = Uuid::now_v7();

        for secs in [10, 20] {
            timers
                .arm(
                    contact,
                    format!("job-{}", secs),
                    clock.now() + Duration::seconds(secs),
                    clock.now(),
                    counting_task(&fired),
                )
                .await
                .unwrap();
        }

        assert_eq!(timers.armed_count().await, 1);
        assert_eq!(timers.armed(contact).await.unwrap().0, "job-20");

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let timers = registry();
        let clock = TokioClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let contact = Uuid::now_v7();

        timers
            .arm(
                contact,
                "job".to_string(),
                clock.now() + Duration::seconds(10),
                clock.now(),
                counting_task(&fired),
            )
            .await
            .unwrap();

        assert_eq!(timers.cancel(contact).await, Some("job".to_string()));
        assert_eq!(timers.cancel(contact).await, None);

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_past_due_rejected_beyond_tolerance() {
        let timers = registry();
        let now = Utc::now();
        let contact = Uuid::now_v7();

        let err = timers
            .arm(contact, "late".to_string(), now - Duration::minutes(10), now, async {})
            .await
            .unwrap_err();
        assert!(matches!(err, TimerError::PastDue { late_secs: 600, .. }));
        assert_eq!(timers.armed_count().await, 0);

        timers
            .arm(contact, "slightly-late".to_string(), now - Duration::seconds(2), now, async {})
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_only_matches_current_job() {
        let timers = registry();
        let now = Utc::now();
        let contact = Uuid::now_v7();

        timers
            .arm(contact, "a".to_string(), now + Duration::hours(1), now, async {})
            .await
            .unwrap();

        assert!(!timers.release(contact, "b").await);
        assert!(!timers.cancel_job(contact, "b").await);
        assert!(timers.release(contact, "a").await);
        assert_eq!(timers.armed_count().await, 0);
    }

    #[test]
    fn test_job_id_is_deterministic() {
        let contact = Uuid::now_v7();
        assert_eq!(
            TimerRegistry::job_id(contact, 2),
            TimerRegistry::job_id(contact, 2)
        );
        assert_ne!(
            TimerRegistry::job_id(contact, 1),
            TimerRegistry::job_id(contact, 2)
        );
    }
}

//! Campaign contact repository
//!
//! Every status-changing write carries a `WHERE status ...` precondition, so a
//! write that lost a race against another transition affects zero rows and
//! reports `false` instead of clobbering the newer state.

use crate::db::{db_err, DatabasePool};
use crate::models::{CampaignContact, ContactCounts, ScheduleRecord};
use async_trait::async_trait;
use dripmail_common::types::{CampaignId, ContactId};
use dripmail_common::Result;

/// Campaign contact repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn get(&self, id: ContactId) -> Result<Option<CampaignContact>>;

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignContact>>;

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<ContactCounts>;

    /// Persist an armed step; only applies to pending or active contacts
    async fn record_schedule(&self, id: ContactId, record: &ScheduleRecord) -> Result<bool>;

    /// Record a delivered step; only applies to active contacts
    async fn record_sent(&self, id: ContactId, step_number: i32) -> Result<bool>;

    /// Pause and clear the schedule; only applies to pending or active contacts
    async fn mark_paused(&self, id: ContactId) -> Result<bool>;

    /// Finish the sequence; only applies to pending or active contacts
    async fn mark_completed(&self, id: ContactId) -> Result<bool>;

    /// Fail with a cause; never overrides a completed contact
    async fn mark_failed(&self, id: ContactId, error: &str) -> Result<bool>;

    /// Active contacts with a persisted due time whose campaign is active
    async fn list_armed(&self) -> Result<Vec<CampaignContact>>;
}

/// Database contact repository
pub struct DbContactRepository {
    pool: DatabasePool,
}

impl DbContactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for DbContactRepository {
    async fn get(&self, id: ContactId) -> Result<Option<CampaignContact>> {
        sqlx::query_as::<_, CampaignContact>("SELECT * FROM campaign_contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignContact>> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            SELECT * FROM campaign_contacts
            WHERE campaign_id = $1
            ORDER BY created_at ASC, contact_email ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<ContactCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM campaign_contacts
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        let mut counts = ContactCounts::default();
        for (status, n) in rows {
            counts.add(&status, n);
        }
        Ok(counts)
    }

    async fn record_schedule(&self, id: ContactId, record: &ScheduleRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'active',
                scheduled_job_id = $2,
                next_send_time = $3,
                current_step_number = $4,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'active')
            "#,
        )
        .bind(id)
        .bind(&record.job_id)
        .bind(record.next_send_time)
        .bind(record.current_step_number)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_sent(&self, id: ContactId, step_number: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET current_step_number = $2,
                scheduled_job_id = NULL,
                next_send_time = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(step_number)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_paused(&self, id: ContactId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'paused',
                scheduled_job_id = NULL,
                next_send_time = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'active')
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: ContactId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'completed',
                scheduled_job_id = NULL,
                next_send_time = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'active')
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: ContactId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'failed',
                last_error = $2,
                scheduled_job_id = NULL,
                next_send_time = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_armed(&self) -> Result<Vec<CampaignContact>> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            SELECT cc.* FROM campaign_contacts cc
            JOIN campaigns c ON c.id = cc.campaign_id
            WHERE cc.status = 'active'
              AND cc.next_send_time IS NOT NULL
              AND c.status = 'active'
            ORDER BY cc.next_send_time ASC
            "#,
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }
}

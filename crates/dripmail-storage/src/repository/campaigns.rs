//! Campaign repository

use crate::db::{db_err, DatabasePool};
use crate::models::{
    BatchLock, BatchSelect, Campaign, CampaignContact, CampaignCreated, CampaignStatus,
    CreateCampaign, Enrollment, NewContact,
};
use async_trait::async_trait;
use dripmail_common::types::{CampaignId, ContactId};
use dripmail_common::{Error, Result};
use sqlx::PgConnection;
use uuid::Uuid;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Create a draft campaign with its initial contacts. Repeated emails in
    /// the input are skipped and reported.
    async fn create(&self, input: CreateCampaign) -> Result<CampaignCreated>;

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    async fn list(&self) -> Result<Vec<Campaign>>;

    /// Delete a campaign and its contacts, returning the removed contact ids
    async fn delete(&self, id: CampaignId) -> Result<Option<Vec<ContactId>>>;

    /// In one transaction: lock the campaign row, check its status against
    /// `allowed`, move it to `target`, and read (or reset) the contact batch
    /// named by `select`.
    async fn lock_batch(
        &self,
        id: CampaignId,
        allowed: &[CampaignStatus],
        target: CampaignStatus,
        select: BatchSelect,
    ) -> Result<BatchLock>;

    /// Insert contacts into an active campaign
    async fn enroll(&self, id: CampaignId, contacts: Vec<NewContact>) -> Result<Enrollment>;

    /// Move an active campaign to completed when every contact is completed
    async fn complete_if_finished(&self, id: CampaignId) -> Result<bool>;
}

/// Order contacts by enrollment time, then email
pub(crate) fn sort_contacts(contacts: &mut [CampaignContact]) {
    contacts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.contact_email.cmp(&b.contact_email))
    });
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert one contact, or `None` when the email is already enrolled
    async fn insert_contact(
        conn: &mut PgConnection,
        campaign_id: CampaignId,
        contact: &NewContact,
    ) -> Result<Option<CampaignContact>> {
        sqlx::query_as::<_, CampaignContact>(
            r#"
            INSERT INTO campaign_contacts (id, campaign_id, contact_email, contact_data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (campaign_id, contact_email) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign_id)
        .bind(&contact.email)
        .bind(serde_json::Value::Object(contact.data.clone()))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
    }

    async fn lock_campaign(conn: &mut PgConnection, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<CampaignCreated> {
        let smtp_config = serde_json::to_value(&input.smtp_config)
            .map_err(|e| Error::Internal(format!("Failed to encode SMTP settings: {}", e)))?;

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let sequence: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM sequences WHERE id = $1 FOR KEY SHARE")
                .bind(input.sequence_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        if sequence.is_none() {
            return Err(Error::NotFound(format!(
                "Sequence {} not found",
                input.sequence_id
            )));
        }

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, name, sequence_id, from_email, smtp_config, status)
            VALUES ($1, $2, $3, $4, $5, 'draft')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.name.trim())
        .bind(input.sequence_id)
        .bind(&input.from_email)
        .bind(smtp_config)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut contacts = Vec::with_capacity(input.contacts.len());
        let mut duplicates = Vec::new();
        for contact in &input.contacts {
            match Self::insert_contact(&mut tx, campaign.id, contact).await? {
                Some(row) => contacts.push(row),
                None => duplicates.push(contact.email.clone()),
            }
        }

        tx.commit().await.map_err(db_err)?;

        Ok(CampaignCreated {
            campaign,
            contacts,
            duplicates,
        })
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list(&self) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns ORDER BY created_at DESC")
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn delete(&self, id: CampaignId) -> Result<Option<Vec<ContactId>>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        if Self::lock_campaign(&mut tx, id).await?.is_none() {
            return Ok(None);
        }

        let removed: Vec<(ContactId,)> =
            sqlx::query_as("DELETE FROM campaign_contacts WHERE campaign_id = $1 RETURNING id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?;

        sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Some(removed.into_iter().map(|(id,)| id).collect()))
    }

    async fn lock_batch(
        &self,
        id: CampaignId,
        allowed: &[CampaignStatus],
        target: CampaignStatus,
        select: BatchSelect,
    ) -> Result<BatchLock> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let Some(mut campaign) = Self::lock_campaign(&mut tx, id).await? else {
            return Ok(BatchLock::NotFound);
        };

        let current = campaign.status_enum();
        if !current.is_some_and(|s| allowed.contains(&s)) {
            return Ok(BatchLock::Rejected {
                current: campaign.status,
            });
        }

        if current != Some(target) {
            campaign = sqlx::query_as::<_, Campaign>(
                r#"
                UPDATE campaigns
                SET status = $2,
                    started_at = CASE WHEN $2 = 'active' THEN COALESCE(started_at, NOW())
                                      ELSE started_at END,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(target.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let mut contacts = match select {
            BatchSelect::Startable => {
                let resumed: Vec<(ContactId,)> = sqlx::query_as(
                    r#"
                    UPDATE campaign_contacts
                    SET status = 'pending', updated_at = NOW()
                    WHERE campaign_id = $1 AND status = 'paused'
                    RETURNING id
                    "#,
                )
                .bind(id)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?;
                let resumed: Vec<ContactId> = resumed.into_iter().map(|(id,)| id).collect();

                sqlx::query_as::<_, CampaignContact>(
                    r#"
                    SELECT * FROM campaign_contacts
                    WHERE campaign_id = $1 AND status = 'pending'
                      AND (current_step_number = 0 OR id = ANY($2))
                    "#,
                )
                .bind(id)
                .bind(&resumed)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?
            }
            BatchSelect::Scheduled => sqlx::query_as::<_, CampaignContact>(
                r#"
                SELECT * FROM campaign_contacts
                WHERE campaign_id = $1 AND status = 'active' AND scheduled_job_id IS NOT NULL
                "#,
            )
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?,
            BatchSelect::Failed => sqlx::query_as::<_, CampaignContact>(
                r#"
                UPDATE campaign_contacts
                SET status = 'pending', last_error = NULL, updated_at = NOW()
                WHERE campaign_id = $1 AND status = 'failed'
                RETURNING *
                "#,
            )
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?,
        };

        tx.commit().await.map_err(db_err)?;

        sort_contacts(&mut contacts);
        Ok(BatchLock::Locked { campaign, contacts })
    }

    async fn enroll(&self, id: CampaignId, contacts: Vec<NewContact>) -> Result<Enrollment> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let Some(campaign) = Self::lock_campaign(&mut tx, id).await? else {
            return Ok(Enrollment::NotFound);
        };

        if !campaign.is_active() {
            return Ok(Enrollment::Rejected {
                current: campaign.status,
            });
        }

        let mut inserted = Vec::with_capacity(contacts.len());
        let mut duplicates = Vec::new();
        for contact in &contacts {
            match Self::insert_contact(&mut tx, id, contact).await? {
                Some(row) => inserted.push(row),
                None => duplicates.push(contact.email.clone()),
            }
        }

        tx.commit().await.map_err(db_err)?;

        Ok(Enrollment::Enrolled {
            inserted,
            duplicates,
        })
    }

    async fn complete_if_finished(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'active'
              AND NOT EXISTS (
                  SELECT 1 FROM campaign_contacts
                  WHERE campaign_id = $1 AND status <> 'completed'
              )
            "#,
        )
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }
}

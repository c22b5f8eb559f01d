//! In-memory storage backend
//!
//! Mirrors the PostgreSQL repositories, including their status
//! preconditions, behind a single async mutex. Used for the `memory`
//! backend and in tests.

use crate::models::{
    BatchLock, BatchSelect, Campaign, CampaignContact, CampaignCreated, CampaignStatus,
    ContactCounts, ContactStatus, CreateCampaign, CreateSequence, Enrollment, NewContact,
    ScheduleRecord, Sequence, SequenceChange, SequenceWithSteps, Step,
};
use crate::repository::sequences::{build_steps, validation_error};
use crate::repository::{CampaignRepository, ContactRepository, SequenceRepository};
use async_trait::async_trait;
use chrono::Utc;
use dripmail_common::types::{CampaignId, ContactId, SequenceId};
use dripmail_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    sequences: Vec<SequenceWithSteps>,
    campaigns: Vec<Campaign>,
    /// Insertion order doubles as enrollment order
    contacts: Vec<CampaignContact>,
}

impl MemoryState {
    fn contact_mut(&mut self, id: ContactId) -> Option<&mut CampaignContact> {
        self.contacts.iter_mut().find(|c| c.id == id)
    }

    fn campaign_mut(&mut self, id: CampaignId) -> Option<&mut Campaign> {
        self.campaigns.iter_mut().find(|c| c.id == id)
    }

    fn sequence_in_use(&self, id: SequenceId) -> bool {
        self.campaigns.iter().any(|c| c.sequence_id == id)
    }

    fn insert_contact(
        &mut self,
        campaign_id: CampaignId,
        contact: &NewContact,
    ) -> Option<CampaignContact> {
        let exists = self
            .contacts
            .iter()
            .any(|c| c.campaign_id == campaign_id && c.contact_email == contact.email);
        if exists {
            return None;
        }

        let now = Utc::now();
        let row = CampaignContact {
            id: Uuid::now_v7(),
            campaign_id,
            contact_email: contact.email.clone(),
            contact_data: serde_json::Value::Object(contact.data.clone()),
            status: ContactStatus::Pending.to_string(),
            current_step_number: 0,
            next_send_time: None,
            scheduled_job_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.contacts.push(row.clone());
        Some(row)
    }

    /// Apply `f` to a contact whose status is in `allowed`
    fn update_contact(
        &mut self,
        id: ContactId,
        allowed: impl Fn(ContactStatus) -> bool,
        f: impl FnOnce(&mut CampaignContact),
    ) -> bool {
        match self.contact_mut(id) {
            Some(contact) if contact.status_enum().is_some_and(&allowed) => {
                f(contact);
                contact.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

fn schedulable(status: ContactStatus) -> bool {
    ContactStatus::SCHEDULABLE.contains(&status)
}

fn clear_schedule(contact: &mut CampaignContact) {
    contact.scheduled_job_id = None;
    contact.next_send_time = None;
}

/// In-memory store implementing every repository trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceRepository for MemoryStore {
    async fn create(&self, input: CreateSequence) -> Result<SequenceWithSteps> {
        let violations = input.validate();
        if !violations.is_empty() {
            return Err(validation_error(&violations));
        }

        let now = Utc::now();
        let id = Uuid::now_v7();
        let created = SequenceWithSteps {
            sequence: Sequence {
                id,
                name: input.name.trim().to_string(),
                created_at: now,
                updated_at: now,
            },
            steps: build_steps(id, &input.steps),
        };

        self.state.lock().await.sequences.push(created.clone());
        Ok(created)
    }

    async fn get(&self, id: SequenceId) -> Result<Option<SequenceWithSteps>> {
        let state = self.state.lock().await;
        Ok(state.sequences.iter().find(|s| s.sequence.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Sequence>> {
        let state = self.state.lock().await;
        Ok(state
            .sequences
            .iter()
            .rev()
            .map(|s| s.sequence.clone())
            .collect())
    }

    async fn replace(
        &self,
        id: SequenceId,
        input: CreateSequence,
    ) -> Result<SequenceChange<SequenceWithSteps>> {
        let violations = input.validate();
        if !violations.is_empty() {
            return Err(validation_error(&violations));
        }

        let mut state = self.state.lock().await;
        if state.sequence_in_use(id) {
            return Ok(SequenceChange::InUse);
        }

        let Some(existing) = state.sequences.iter_mut().find(|s| s.sequence.id == id) else {
            return Ok(SequenceChange::NotFound);
        };

        existing.sequence.name = input.name.trim().to_string();
        existing.sequence.updated_at = Utc::now();
        existing.steps = build_steps(id, &input.steps);

        Ok(SequenceChange::Applied(existing.clone()))
    }

    async fn delete(&self, id: SequenceId) -> Result<SequenceChange<()>> {
        let mut state = self.state.lock().await;
        if !state.sequences.iter().any(|s| s.sequence.id == id) {
            return Ok(SequenceChange::NotFound);
        }
        if state.sequence_in_use(id) {
            return Ok(SequenceChange::InUse);
        }

        state.sequences.retain(|s| s.sequence.id != id);
        Ok(SequenceChange::Applied(()))
    }

    async fn get_step(&self, sequence_id: SequenceId, step_number: i32) -> Result<Option<Step>> {
        let state = self.state.lock().await;
        Ok(state
            .sequences
            .iter()
            .find(|s| s.sequence.id == sequence_id)
            .and_then(|s| s.step(step_number))
            .cloned())
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<CampaignCreated> {
        let smtp_config = serde_json::to_value(&input.smtp_config)
            .map_err(|e| Error::Internal(format!("Failed to encode SMTP settings: {}", e)))?;

        let mut state = self.state.lock().await;
        if !state
            .sequences
            .iter()
            .any(|s| s.sequence.id == input.sequence_id)
        {
            return Err(Error::NotFound(format!(
                "Sequence {} not found",
                input.sequence_id
            )));
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            name: input.name.trim().to_string(),
            sequence_id: input.sequence_id,
            from_email: input.from_email,
            smtp_config,
            status: CampaignStatus::Draft.to_string(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        state.campaigns.push(campaign.clone());

        let mut contacts = Vec::with_capacity(input.contacts.len());
        let mut duplicates = Vec::new();
        for contact in &input.contacts {
            match state.insert_contact(campaign.id, contact) {
                Some(row) => contacts.push(row),
                None => duplicates.push(contact.email.clone()),
            }
        }

        Ok(CampaignCreated {
            campaign,
            contacts,
            duplicates,
        })
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let state = self.state.lock().await;
        Ok(state.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Campaign>> {
        let state = self.state.lock().await;
        Ok(state.campaigns.iter().rev().cloned().collect())
    }

    async fn delete(&self, id: CampaignId) -> Result<Option<Vec<ContactId>>> {
        let mut state = self.state.lock().await;
        if !state.campaigns.iter().any(|c| c.id == id) {
            return Ok(None);
        }

        let removed = state
            .contacts
            .iter()
            .filter(|c| c.campaign_id == id)
            .map(|c| c.id)
            .collect();
        state.contacts.retain(|c| c.campaign_id != id);
        state.campaigns.retain(|c| c.id != id);

        Ok(Some(removed))
    }

    async fn lock_batch(
        &self,
        id: CampaignId,
        allowed: &[CampaignStatus],
        target: CampaignStatus,
        select: BatchSelect,
    ) -> Result<BatchLock> {
        let mut state = self.state.lock().await;

        let Some(campaign) = state.campaign_mut(id) else {
            return Ok(BatchLock::NotFound);
        };

        let current = campaign.status_enum();
        if !current.is_some_and(|s| allowed.contains(&s)) {
            return Ok(BatchLock::Rejected {
                current: campaign.status.clone(),
            });
        }

        if current != Some(target) {
            let now = Utc::now();
            campaign.status = target.to_string();
            campaign.updated_at = now;
            if target == CampaignStatus::Active && campaign.started_at.is_none() {
                campaign.started_at = Some(now);
            }
        }
        let campaign = campaign.clone();

        let now = Utc::now();
        let mut contacts = Vec::new();
        for contact in state.contacts.iter_mut().filter(|c| c.campaign_id == id) {
            let status = contact.status_enum();
            let selected = match select {
                BatchSelect::Startable => match status {
                    Some(ContactStatus::Paused) => {
                        contact.status = ContactStatus::Pending.to_string();
                        contact.updated_at = now;
                        true
                    }
                    Some(ContactStatus::Pending) => contact.current_step_number == 0,
                    _ => false,
                },
                BatchSelect::Scheduled => {
                    status == Some(ContactStatus::Active) && contact.scheduled_job_id.is_some()
                }
                BatchSelect::Failed => {
                    if status == Some(ContactStatus::Failed) {
                        contact.status = ContactStatus::Pending.to_string();
                        contact.last_error = None;
                        contact.updated_at = now;
                        true
                    } else {
                        false
                    }
                }
            };
            if selected {
                contacts.push(contact.clone());
            }
        }

        Ok(BatchLock::Locked { campaign, contacts })
    }

    async fn enroll(&self, id: CampaignId, contacts: Vec<NewContact>) -> Result<Enrollment> {
        let mut state = self.state.lock().await;

        let Some(campaign) = state.campaigns.iter().find(|c| c.id == id) else {
            return Ok(Enrollment::NotFound);
        };
        if !campaign.is_active() {
            return Ok(Enrollment::Rejected {
                current: campaign.status.clone(),
            });
        }

        let mut inserted = Vec::with_capacity(contacts.len());
        let mut duplicates = Vec::new();
        for contact in &contacts {
            match state.insert_contact(id, contact) {
                Some(row) => inserted.push(row),
                None => duplicates.push(contact.email.clone()),
            }
        }

        Ok(Enrollment::Enrolled {
            inserted,
            duplicates,
        })
    }

    async fn complete_if_finished(&self, id: CampaignId) -> Result<bool> {
        let mut state = self.state.lock().await;

        let finished = state
            .contacts
            .iter()
            .filter(|c| c.campaign_id == id)
            .all(|c| c.status_enum() == Some(ContactStatus::Completed));
        if !finished {
            return Ok(false);
        }

        match state.campaign_mut(id) {
            Some(campaign) if campaign.is_active() => {
                let now = Utc::now();
                campaign.status = CampaignStatus::Completed.to_string();
                campaign.completed_at = Some(now);
                campaign.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn get(&self, id: ContactId) -> Result<Option<CampaignContact>> {
        let state = self.state.lock().await;
        Ok(state.contacts.iter().find(|c| c.id == id).cloned())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignContact>> {
        let state = self.state.lock().await;
        Ok(state
            .contacts
            .iter()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<ContactCounts> {
        let state = self.state.lock().await;
        let mut counts = ContactCounts::default();
        for contact in state.contacts.iter().filter(|c| c.campaign_id == campaign_id) {
            counts.add(&contact.status, 1);
        }
        Ok(counts)
    }

    async fn record_schedule(&self, id: ContactId, record: &ScheduleRecord) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_contact(id, schedulable, |c| {
            c.status = ContactStatus::Active.to_string();
            c.scheduled_job_id = Some(record.job_id.clone());
            c.next_send_time = Some(record.next_send_time);
            c.current_step_number = record.current_step_number;
        }))
    }

    async fn record_sent(&self, id: ContactId, step_number: i32) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_contact(
            id,
            |s| s == ContactStatus::Active,
            |c| {
                c.current_step_number = step_number;
                c.last_error = None;
                clear_schedule(c);
            },
        ))
    }

    async fn mark_paused(&self, id: ContactId) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_contact(id, schedulable, |c| {
            c.status = ContactStatus::Paused.to_string();
            clear_schedule(c);
        }))
    }

    async fn mark_completed(&self, id: ContactId) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_contact(id, schedulable, |c| {
            c.status = ContactStatus::Completed.to_string();
            c.last_error = None;
            clear_schedule(c);
        }))
    }

    async fn mark_failed(&self, id: ContactId, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.update_contact(
            id,
            |s| s != ContactStatus::Completed,
            |c| {
                c.status = ContactStatus::Failed.to_string();
                c.last_error = Some(error.to_string());
                clear_schedule(c);
            },
        ))
    }

    async fn list_armed(&self) -> Result<Vec<CampaignContact>> {
        let state = self.state.lock().await;
        let mut armed: Vec<CampaignContact> = state
            .contacts
            .iter()
            .filter(|c| {
                c.status_enum() == Some(ContactStatus::Active) && c.next_send_time.is_some()
            })
            .filter(|c| {
                state
                    .campaigns
                    .iter()
                    .any(|camp| camp.id == c.campaign_id && camp.is_active())
            })
            .cloned()
            .collect();
        armed.sort_by_key(|c| c.next_send_time);
        Ok(armed)
    }
}

//! Database models

use chrono::{DateTime, Utc};
use dripmail_common::types::{
    CampaignId, ContactData, ContactId, EmailAddress, FieldViolation, SequenceId, SmtpSettings,
    StepId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Sequence model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sequence {
    pub id: SequenceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sequence step model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub sequence_id: SequenceId,
    pub step_number: i32,
    pub subject_template: String,
    pub body_template: String,
    /// Days to wait before this step fires, relative to the previous step
    /// (or to campaign start for step 1)
    pub delay_days: i32,
}

/// A sequence together with its ordered steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceWithSteps {
    #[serde(flatten)]
    pub sequence: Sequence,
    pub steps: Vec<Step>,
}

impl SequenceWithSteps {
    /// Find the step with the given number
    pub fn step(&self, step_number: i32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }
}

/// Step input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStep {
    pub step_number: i32,
    pub subject_template: String,
    pub body_template: String,
    #[serde(default)]
    pub delay_days: i32,
}

/// Longest delay a step may declare, about a century
pub const MAX_DELAY_DAYS: i32 = 36_500;

/// Create (or replace) sequence input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSequence {
    pub name: String,
    pub steps: Vec<NewStep>,
}

impl CreateSequence {
    /// Check the sequence shape: a name and steps numbered 1..N with no gaps
    pub fn validate(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push(FieldViolation::new("name", "must not be empty"));
        }

        if self.steps.is_empty() {
            violations.push(FieldViolation::new("steps", "at least one step is required"));
        }

        let mut numbers: Vec<i32> = self.steps.iter().map(|s| s.step_number).collect();
        numbers.sort_unstable();
        let contiguous = numbers
            .iter()
            .enumerate()
            .all(|(i, n)| *n == i as i32 + 1);
        if !contiguous {
            violations.push(FieldViolation::new(
                "steps",
                "step numbers must run 1..N without gaps or duplicates",
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.subject_template.trim().is_empty() {
                violations.push(FieldViolation::new(
                    format!("steps[{}].subject_template", i),
                    "must not be empty",
                ));
            }
            if step.body_template.trim().is_empty() {
                violations.push(FieldViolation::new(
                    format!("steps[{}].body_template", i),
                    "must not be empty",
                ));
            }
            if step.delay_days < 0 {
                violations.push(FieldViolation::new(
                    format!("steps[{}].delay_days", i),
                    "must not be negative",
                ));
            } else if step.delay_days > MAX_DELAY_DAYS {
                violations.push(FieldViolation::new(
                    format!("steps[{}].delay_days", i),
                    format!("must not exceed {}", MAX_DELAY_DAYS),
                ));
            }
        }

        violations
    }
}

/// Outcome of changing a sequence
#[derive(Debug, Clone)]
pub enum SequenceChange<T> {
    Applied(T),
    NotFound,
    /// At least one campaign references the sequence
    InUse,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub sequence_id: SequenceId,
    pub from_email: String,
    pub smtp_config: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Whether the campaign is currently sending
    pub fn is_active(&self) -> bool {
        self.status_enum() == Some(CampaignStatus::Active)
    }

    /// Decode the stored SMTP settings
    pub fn smtp_settings(&self) -> Result<SmtpSettings, serde_json::Error> {
        serde_json::from_value(self.smtp_config.clone())
    }
}

/// Create campaign input
#[derive(Debug, Clone)]
pub struct CreateCampaign {
    pub name: String,
    pub sequence_id: SequenceId,
    pub from_email: String,
    pub smtp_config: SmtpSettings,
    pub contacts: Vec<NewContact>,
}

/// Result of creating a campaign with its initial contacts
#[derive(Debug, Clone)]
pub struct CampaignCreated {
    pub campaign: Campaign,
    pub contacts: Vec<CampaignContact>,
    /// Emails skipped because they appeared more than once
    pub duplicates: Vec<String>,
}

/// Campaign contact status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Active,
    Paused,
    Failed,
    Completed,
}

impl ContactStatus {
    /// Statuses from which the scheduler may arm a step
    pub const SCHEDULABLE: [ContactStatus; 2] = [ContactStatus::Pending, ContactStatus::Active];
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactStatus::Pending => write!(f, "pending"),
            ContactStatus::Active => write!(f, "active"),
            ContactStatus::Paused => write!(f, "paused"),
            ContactStatus::Failed => write!(f, "failed"),
            ContactStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContactStatus::Pending),
            "active" => Ok(ContactStatus::Active),
            "paused" => Ok(ContactStatus::Paused),
            "failed" => Ok(ContactStatus::Failed),
            "completed" => Ok(ContactStatus::Completed),
            _ => Err(format!("Invalid contact status: {}", s)),
        }
    }
}

/// One recipient's progress within one campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignContact {
    pub id: ContactId,
    pub campaign_id: CampaignId,
    pub contact_email: String,
    pub contact_data: serde_json::Value,
    pub status: String,
    /// Last step sent successfully (0 = nothing sent yet)
    pub current_step_number: i32,
    pub next_send_time: Option<DateTime<Utc>>,
    pub scheduled_job_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignContact {
    /// Get status enum
    pub fn status_enum(&self) -> Option<ContactStatus> {
        self.status.parse().ok()
    }

    /// Whether the scheduler may arm a step for this contact
    pub fn is_schedulable(&self) -> bool {
        self.status_enum()
            .is_some_and(|s| ContactStatus::SCHEDULABLE.contains(&s))
    }

    /// Placeholder data as a map (empty if the stored value is not an object)
    pub fn data_map(&self) -> ContactData {
        self.contact_data.as_object().cloned().unwrap_or_default()
    }
}

/// Contact enrollment input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    pub email: String,
    pub data: ContactData,
}

impl NewContact {
    /// Build from a free-form recipient record that must carry `email`
    pub fn from_record(record: &serde_json::Value) -> Result<Self, FieldViolation> {
        let object = record
            .as_object()
            .ok_or_else(|| FieldViolation::new("contact", "must be a JSON object"))?;

        let raw = object
            .get("email")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FieldViolation::new("email", "is required"))?;

        let email = EmailAddress::parse(raw)
            .ok_or_else(|| FieldViolation::new("email", format!("'{}' is not a valid address", raw)))?
            .to_string()
            .to_lowercase();

        let mut data = object.clone();
        data.insert("email".to_string(), serde_json::Value::String(email.clone()));

        Ok(Self { email, data })
    }
}

/// Schedule fields written when a step is armed
#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    pub job_id: String,
    pub next_send_time: DateTime<Utc>,
    /// Last completed step, i.e. the armed step minus one
    pub current_step_number: i32,
}

/// Which contacts a campaign batch operation reads (and possibly resets)
/// inside its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSelect {
    /// Pending contacts that never sent a step, plus contacts left paused by a
    /// pause (reset to pending, progress kept)
    Startable,
    /// Active contacts holding a scheduled job
    Scheduled,
    /// Failed contacts, reset to pending with last_error cleared
    Failed,
}

/// Outcome of a locked campaign batch read
#[derive(Debug, Clone)]
pub enum BatchLock {
    NotFound,
    /// Campaign status did not allow the operation
    Rejected { current: String },
    Locked {
        campaign: Campaign,
        contacts: Vec<CampaignContact>,
    },
}

/// Outcome of adding contacts to a campaign
#[derive(Debug, Clone)]
pub enum Enrollment {
    NotFound,
    Rejected { current: String },
    Enrolled {
        inserted: Vec<CampaignContact>,
        /// Emails already enrolled in the campaign
        duplicates: Vec<String>,
    },
}

/// Contact counts per status for one campaign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCounts {
    pub pending: i64,
    pub active: i64,
    pub paused: i64,
    pub failed: i64,
    pub completed: i64,
}

impl ContactCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.active + self.paused + self.failed + self.completed
    }

    /// Add `n` contacts with the given status string
    pub fn add(&mut self, status: &str, n: i64) {
        match status.parse::<ContactStatus>() {
            Ok(ContactStatus::Pending) => self.pending += n,
            Ok(ContactStatus::Active) => self.active += n,
            Ok(ContactStatus::Paused) => self.paused += n,
            Ok(ContactStatus::Failed) => self.failed += n,
            Ok(ContactStatus::Completed) => self.completed += n,
            Err(_) => {}
        }
    }
}

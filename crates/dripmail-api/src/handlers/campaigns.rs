//! Campaign handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use dripmail_common::types::{EmailAddress, FieldViolation, SmtpSettings};
use dripmail_core::{AddContactsReport, BatchReport, ContactError};
use dripmail_storage::models::{
    Campaign, CampaignContact, ContactCounts, CreateCampaign, NewContact,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, not_found, validation_failed, ApiError};
use crate::state::AppState;

/// SMTP settings as returned to clients; the password never leaves the server
#[derive(Debug, Serialize, Deserialize)]
pub struct SmtpSummary {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub secure: bool,
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub sequence_id: Uuid,
    pub from_email: String,
    pub smtp: Option<SmtpSummary>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<ContactCounts>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let smtp = c.smtp_settings().ok().map(|s| SmtpSummary {
            host: s.host,
            port: s.port,
            user: s.user,
            secure: s.secure,
        });
        Self {
            id: c.id,
            name: c.name,
            sequence_id: c.sequence_id,
            from_email: c.from_email,
            smtp,
            status: c.status,
            contacts: None,
            started_at: c.started_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
}

/// Campaign contact response
#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub id: Uuid,
    pub email: String,
    pub data: serde_json::Value,
    pub status: String,
    pub current_step_number: i32,
    pub next_send_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CampaignContact> for ContactResponse {
    fn from(c: CampaignContact) -> Self {
        Self {
            id: c.id,
            email: c.contact_email,
            data: c.contact_data,
            status: c.status,
            current_step_number: c.current_step_number,
            next_send_time: c.next_send_time,
            last_error: c.last_error,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Contact list response
#[derive(Debug, Serialize)]
pub struct ContactListResponse {
    pub data: Vec<ContactResponse>,
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub sequence_id: Uuid,
    pub from_email: String,
    pub smtp_config: SmtpSettings,
    /// Recipient records, each with an `email` and any placeholder fields
    #[serde(default)]
    pub contacts: Vec<serde_json::Value>,
}

/// Response for a created campaign
#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub campaign: CampaignResponse,
    pub added: usize,
    pub errors: Vec<ContactError>,
}

impl CreateCampaignRequest {
    /// Validate and convert into storage input
    fn into_input(self) -> Result<CreateCampaign, Vec<FieldViolation>> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push(FieldViolation::new("name", "must not be empty"));
        }
        if EmailAddress::parse(&self.from_email).is_none() {
            violations.push(FieldViolation::new("from_email", "must be a valid email address"));
        }
        if self.smtp_config.host.trim().is_empty() {
            violations.push(FieldViolation::new("smtp_config.host", "must not be empty"));
        }
        if self.smtp_config.port == 0 {
            violations.push(FieldViolation::new("smtp_config.port", "must not be 0"));
        }

        let mut contacts = Vec::with_capacity(self.contacts.len());
        for (i, record) in self.contacts.iter().enumerate() {
            match NewContact::from_record(record) {
                Ok(contact) => contacts.push(contact),
                Err(v) => violations.push(FieldViolation::new(
                    format!("contacts[{}].{}", i, v.field),
                    v.message,
                )),
            }
        }

        if !violations.is_empty() {
            return Err(violations);
        }

        Ok(CreateCampaign {
            name: self.name.trim().to_string(),
            sequence_id: self.sequence_id,
            from_email: self.from_email.trim().to_string(),
            smtp_config: self.smtp_config,
            contacts,
        })
    }
}

/// List campaigns
///
/// GET /api/v1/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CampaignListResponse>, ApiError> {
    let campaigns = state.repos.campaigns.list().await.map_err(api_error)?;
    let data = campaigns.into_iter().map(CampaignResponse::from).collect();
    Ok(Json(CampaignListResponse { data }))
}

/// Create a draft campaign
///
/// POST /api/v1/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CreateCampaignResponse>), ApiError> {
    let input = req.into_input().map_err(validation_failed)?;

    // Positions of valid records, for reporting repeated emails
    let emails: Vec<String> = input.contacts.iter().map(|c| c.email.clone()).collect();

    let created = state.repos.campaigns.create(input).await.map_err(api_error)?;

    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (index, email) in emails.iter().enumerate() {
        if !seen.insert(email) {
            errors.push(ContactError {
                index,
                email: Some(email.clone()),
                message: "Contact appears more than once".to_string(),
            });
        }
    }

    info!(
        campaign_id = %created.campaign.id,
        contacts = created.contacts.len(),
        "Campaign created"
    );

    let added = created.contacts.len();
    let mut campaign = CampaignResponse::from(created.campaign);
    campaign.contacts = Some(ContactCounts {
        pending: added as i64,
        ..ContactCounts::default()
    });

    Ok((
        StatusCode::CREATED,
        Json(CreateCampaignResponse {
            campaign,
            added,
            errors,
        }),
    ))
}

/// Get a campaign with contact counts
///
/// GET /api/v1/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .repos
        .campaigns
        .get(campaign_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found(format!("Campaign {}", campaign_id)))?;

    let counts = state
        .repos
        .contacts
        .count_by_status(campaign_id)
        .await
        .map_err(api_error)?;

    let mut response = CampaignResponse::from(campaign);
    response.contacts = Some(counts);
    Ok(Json(response))
}

/// Delete a campaign and its contacts
///
/// DELETE /api/v1/campaigns/:campaign_id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .controller
        .delete(campaign_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start (or resume) a campaign
///
/// POST /api/v1/campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<BatchReport>, ApiError> {
    state
        .engine
        .controller
        .start(campaign_id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Pause a campaign
///
/// POST /api/v1/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<BatchReport>, ApiError> {
    state
        .engine
        .controller
        .pause(campaign_id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Reschedule failed contacts
///
/// POST /api/v1/campaigns/:campaign_id/retry-failed
pub async fn retry_failed(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<BatchReport>, ApiError> {
    state
        .engine
        .controller
        .retry_failed(campaign_id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// Add contacts to a running campaign
///
/// POST /api/v1/campaigns/:campaign_id/contacts
pub async fn add_contacts(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
    Json(records): Json<Vec<serde_json::Value>>,
) -> Result<Json<AddContactsReport>, ApiError> {
    state
        .engine
        .controller
        .add_contacts(campaign_id, &records)
        .await
        .map(Json)
        .map_err(api_error)
}

/// List a campaign's contacts
///
/// GET /api/v1/campaigns/:campaign_id/contacts
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<ContactListResponse>, ApiError> {
    if state
        .repos
        .campaigns
        .get(campaign_id)
        .await
        .map_err(api_error)?
        .is_none()
    {
        return Err(not_found(format!("Campaign {}", campaign_id)));
    }

    let contacts = state
        .repos
        .contacts
        .list_by_campaign(campaign_id)
        .await
        .map_err(api_error)?;

    Ok(Json(ContactListResponse {
        data: contacts.into_iter().map(ContactResponse::from).collect(),
    }))
}

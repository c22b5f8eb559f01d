//! OpenAPI documentation
//!
//! Serves a hand-maintained OpenAPI 3.0 description of the dripmail API.

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

/// Create OpenAPI routes
pub fn create_openapi_routes() -> Router {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// OpenAPI JSON document endpoint
async fn openapi_json() -> impl IntoResponse {
    Json(get_openapi_spec())
}

fn id_param(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "in": "path",
        "required": true,
        "schema": {"type": "string", "format": "uuid"}
    })
}

fn error_responses() -> serde_json::Value {
    json!({
        "404": {"description": "Not found", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}},
        "409": {"description": "Conflicting state", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}},
        "422": {"description": "Validation failed", "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}}
    })
}

fn batch_operation(summary: &str) -> serde_json::Value {
    let mut responses = error_responses();
    responses["200"] = json!({
        "description": "Contacts affected by the operation",
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/BatchReport"}}}
    });
    json!({
        "post": {
            "tags": ["campaigns"],
            "summary": summary,
            "parameters": [id_param("campaign_id")],
            "responses": responses
        }
    })
}

/// Get the OpenAPI document as JSON
fn get_openapi_spec() -> serde_json::Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Dripmail API",
            "description": "Multi-step, time-delayed email sequences sent through campaign-supplied SMTP servers.",
            "version": env!("CARGO_PKG_VERSION"),
            "license": {
                "name": "Apache-2.0",
                "url": "https://www.apache.org/licenses/LICENSE-2.0"
            }
        },
        "tags": [
            {"name": "health", "description": "Health check endpoints"},
            {"name": "sequences", "description": "Sequence templates"},
            {"name": "campaigns", "description": "Campaign lifecycle and contacts"}
        ],
        "paths": {
            "/health": {"get": {"tags": ["health"], "summary": "Basic health check", "responses": {"200": {"description": "Service is healthy"}}}},
            "/health/live": {"get": {"tags": ["health"], "summary": "Liveness check", "responses": {"200": {"description": "Process is running"}}}},
            "/health/ready": {"get": {"tags": ["health"], "summary": "Readiness check", "responses": {"200": {"description": "Storage reachable"}, "503": {"description": "Storage unreachable"}}}},
            "/api/v1/sequences": {
                "get": {"tags": ["sequences"], "summary": "List sequences", "responses": {"200": {"description": "Sequences"}}},
                "post": {
                    "tags": ["sequences"],
                    "summary": "Create a sequence",
                    "requestBody": {"required": true, "content": {"application/json": {"schema": {"$ref": "#/components/schemas/CreateSequence"}}}},
                    "responses": {"201": {"description": "Created sequence with steps"}, "422": {"description": "Validation failed"}}
                }
            },
            "/api/v1/sequences/{sequence_id}": {
                "get": {"tags": ["sequences"], "summary": "Get a sequence", "parameters": [id_param("sequence_id")], "responses": {"200": {"description": "Sequence with steps"}, "404": {"description": "Not found"}}},
                "put": {
                    "tags": ["sequences"],
                    "summary": "Replace a sequence not used by any campaign",
                    "parameters": [id_param("sequence_id")],
                    "requestBody": {"required": true, "content": {"application/json": {"schema": {"$ref": "#/components/schemas/CreateSequence"}}}},
                    "responses": error_responses()
                },
                "delete": {"tags": ["sequences"], "summary": "Delete a sequence not used by any campaign", "parameters": [id_param("sequence_id")], "responses": {"204": {"description": "Deleted"}, "404": {"description": "Not found"}, "409": {"description": "Sequence in use"}}}
            },
            "/api/v1/campaigns": {
                "get": {"tags": ["campaigns"], "summary": "List campaigns", "responses": {"200": {"description": "Campaigns"}}},
                "post": {
                    "tags": ["campaigns"],
                    "summary": "Create a draft campaign",
                    "requestBody": {"required": true, "content": {"application/json": {"schema": {"$ref": "#/components/schemas/CreateCampaign"}}}},
                    "responses": {"201": {"description": "Created campaign"}, "404": {"description": "Sequence not found"}, "422": {"description": "Validation failed"}}
                }
            },
            "/api/v1/campaigns/{campaign_id}": {
                "get": {"tags": ["campaigns"], "summary": "Get a campaign with contact counts", "parameters": [id_param("campaign_id")], "responses": {"200": {"description": "Campaign"}, "404": {"description": "Not found"}}},
                "delete": {"tags": ["campaigns"], "summary": "Delete a campaign and its contacts", "parameters": [id_param("campaign_id")], "responses": {"204": {"description": "Deleted"}, "404": {"description": "Not found"}}}
            },
            "/api/v1/campaigns/{campaign_id}/start": batch_operation("Start or resume a campaign"),
            "/api/v1/campaigns/{campaign_id}/pause": batch_operation("Pause an active campaign"),
            "/api/v1/campaigns/{campaign_id}/retry-failed": batch_operation("Reschedule failed contacts"),
            "/api/v1/campaigns/{campaign_id}/contacts": {
                "get": {"tags": ["campaigns"], "summary": "List campaign contacts", "parameters": [id_param("campaign_id")], "responses": {"200": {"description": "Contacts"}, "404": {"description": "Not found"}}},
                "post": {
                    "tags": ["campaigns"],
                    "summary": "Add contacts to an active campaign",
                    "parameters": [id_param("campaign_id")],
                    "requestBody": {"required": true, "content": {"application/json": {"schema": {"type": "array", "items": {"$ref": "#/components/schemas/ContactRecord"}}}}},
                    "responses": {"200": {"description": "Added count and per-contact errors"}, "404": {"description": "Not found"}, "409": {"description": "Campaign not active"}}
                }
            },
            "/openapi.json": {"get": {"summary": "This document", "responses": {"200": {"description": "OpenAPI document"}}}}
        },
        "components": {
            "schemas": {
                "ErrorResponse": {
                    "type": "object",
                    "required": ["error", "message"],
                    "properties": {
                        "error": {"type": "string"},
                        "message": {"type": "string"},
                        "details": {"type": "array", "items": {"type": "object", "properties": {"field": {"type": "string"}, "message": {"type": "string"}}}}
                    }
                },
                "BatchReport": {
                    "type": "object",
                    "properties": {
                        "affected": {"type": "integer"},
                        "scheduled": {"type": "integer"},
                        "failed": {"type": "integer"}
                    }
                },
                "CreateSequence": {
                    "type": "object",
                    "required": ["name", "steps"],
                    "properties": {
                        "name": {"type": "string"},
                        "steps": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["step_number", "subject_template", "body_template"],
                                "properties": {
                                    "step_number": {"type": "integer", "minimum": 1},
                                    "subject_template": {"type": "string"},
                                    "body_template": {"type": "string"},
                                    "delay_days": {"type": "integer", "minimum": 0, "maximum": 36500}
                                }
                            }
                        }
                    }
                },
                "ContactRecord": {
                    "type": "object",
                    "required": ["email"],
                    "properties": {"email": {"type": "string", "format": "email"}},
                    "additionalProperties": true
                },
                "CreateCampaign": {
                    "type": "object",
                    "required": ["name", "sequence_id", "from_email", "smtp_config"],
                    "properties": {
                        "name": {"type": "string"},
                        "sequence_id": {"type": "string", "format": "uuid"},
                        "from_email": {"type": "string", "format": "email"},
                        "smtp_config": {
                            "type": "object",
                            "required": ["host", "port"],
                            "properties": {
                                "host": {"type": "string"},
                                "port": {"type": "integer"},
                                "user": {"type": "string"},
                                "password": {"type": "string"},
                                "secure": {"type": "boolean"}
                            }
                        },
                        "contacts": {"type": "array", "items": {"$ref": "#/components/schemas/ContactRecord"}}
                    }
                }
            }
        }
    })
}

// src/opportunities.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Opportunity, OpportunityStage};
use crate::validation::{flexible_date, not_blank, Valid};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOpportunityRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    pub description: Option<String>,
    pub stage: Option<OpportunityStage>,
    #[validate(range(min = 0.0, message = "Must be greater than or equal to 0"))]
    pub amount: Option<f64>,
    #[validate(range(max = 100, message = "Must be between 0 and 100"))]
    pub probability: Option<u8>,
    #[serde(default, deserialize_with = "flexible_date")]
    pub expected_close_date: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
    pub contact_id: Option<String>,
}

fn link(id: Option<String>) -> Option<String> {
    id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())
}

/// GET /opportunities
pub async fn list_opportunities(data: web::Data<AppState>, actor: Actor) -> Result<HttpResponse, CrmError> {
    let opportunities = data.opportunities.list(&actor.scope()).await?;
    Ok(HttpResponse::Ok().json(opportunities))
}

/// POST /opportunities
pub async fn create_opportunity(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Valid<CreateOpportunityRequest>,
) -> Result<HttpResponse, CrmError> {
    let request = payload.into_inner();
    let opportunity = Opportunity {
        id: Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        description: request.description.filter(|d| !d.trim().is_empty()),
        stage: request.stage.unwrap_or_default(),
        amount: request.amount,
        probability: request.probability.unwrap_or(0),
        expected_close_date: request.expected_close_date,
        account_id: link(request.account_id),
        contact_id: link(request.contact_id),
        assigned_to_id: actor.user_id.clone(),
        created_at: Utc::now(),
    };
    data.opportunities.insert(&opportunity).await?;
    info!("Opportunity created: {} by {}", opportunity.id, actor.user_id);
    Ok(HttpResponse::Created().json(opportunity))
}

// src/door_activity.rs

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::info;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::leads::page_request;
use crate::models::{address_key, ActivityView, DoorActivity, Lead, Outcome, Page, Pagination, PersonSummary};
use crate::store::{ActivityDraft, VisitPlan, VisitTarget};
use crate::validation::{rule, Valid};

const DOOR_KNOCKER: &str = "Door Knocker";

/// Address parts may be blank (reverse geocoding often leaves the city
/// empty); street and zip are only needed when no `leadId` is given.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "visit_rules"))]
pub struct RecordVisitRequest {
    #[validate(required(message = "Required"))]
    pub outcome: Option<Outcome>,
    pub notes: Option<String>,
    #[serde(default)]
    pub left_materials: bool,
    pub materials_type: Option<String>,
    #[validate(
        required(message = "Required"),
        range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90")
    )]
    pub latitude: Option<f64>,
    #[validate(
        required(message = "Required"),
        range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180")
    )]
    pub longitude: Option<f64>,
    pub photo_url: Option<String>,
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip_code: String,
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn present(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn visit_rules(request: &RecordVisitRequest) -> Result<(), ValidationError> {
    if blank(&request.lead_id) {
        if request.street.trim().is_empty() {
            return Err(rule("street", "Required when no leadId is given"));
        }
        if request.zip_code.trim().is_empty() {
            return Err(rule("zipCode", "Required when no leadId is given"));
        }
    }
    if request.left_materials
        && request.materials_type.as_deref() == Some(DOOR_KNOCKER)
        && blank(&request.photo_url)
    {
        return Err(rule("photoUrl", "A photo is required when leaving a door knocker"));
    }
    Ok(())
}

/// Turns a validated request into the unit of work the store executes.
pub fn plan_visit(actor: &Actor, request: RecordVisitRequest, now: DateTime<Utc>) -> Result<VisitPlan, CrmError> {
    let (Some(outcome), Some(latitude), Some(longitude)) = (request.outcome, request.latitude, request.longitude)
    else {
        return Err(CrmError::invalid("body", "outcome and coordinates are required"));
    };
    let photo_url = request.photo_url.filter(|url| !url.trim().is_empty());

    let target = match request.lead_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => VisitTarget::Lead {
            id,
            scope: actor.scope(),
        },
        None => {
            let mut candidate = Lead::new("Unknown", "Resident", now);
            candidate.street = present(&request.street);
            candidate.city = present(&request.city);
            candidate.state = present(&request.state);
            candidate.zip_code = present(&request.zip_code);
            candidate.latitude = Some(latitude);
            candidate.longitude = Some(longitude);
            candidate.photo_url = photo_url.clone();
            candidate.status = outcome.initial_status();
            candidate.assigned_to_id = Some(actor.user_id.clone());
            VisitTarget::Address {
                key: address_key(&request.street, &request.zip_code),
                candidate: Box::new(candidate),
            }
        }
    };

    let activity = ActivityDraft {
        id: Uuid::new_v4().to_string(),
        outcome,
        notes: request.notes.filter(|notes| !notes.trim().is_empty()),
        left_materials: request.left_materials,
        materials_type: request.materials_type.filter(|_| request.left_materials),
        latitude,
        longitude,
        photo_url,
        user_id: actor.user_id.clone(),
        contact_id: request.contact_id.filter(|id| !id.trim().is_empty()),
        created_at: now,
    };

    Ok(VisitPlan { target, activity })
}

/// Records one door visit: resolves or creates the lead, applies the visit to
/// it and appends the activity as one unit.
pub async fn record_visit(state: &AppState, actor: &Actor, request: RecordVisitRequest) -> Result<ActivityView, CrmError> {
    let plan = plan_visit(actor, request, Utc::now())?;

    let contact = match &plan.activity.contact_id {
        Some(contact_id) => {
            let found = state.contacts.find_by_ids(std::slice::from_ref(contact_id)).await?;
            Some(found.first().map(PersonSummary::from).ok_or(CrmError::NotFound("Contact"))?)
        }
        None => None,
    };

    let (lead, activity) = state.activities.record_visit(plan).await?;
    info!(
        "Door activity {} ({}) recorded by {} on lead {}",
        activity.id,
        activity.outcome.as_str(),
        actor.user_id,
        lead.id
    );

    Ok(ActivityView {
        activity,
        lead: Some(PersonSummary::from(&lead)),
        contact,
    })
}

/// Attaches lead/contact name summaries to a page of activities.
async fn with_summaries(state: &AppState, activities: Vec<DoorActivity>) -> Result<Vec<ActivityView>, CrmError> {
    let mut lead_ids: Vec<String> = activities.iter().map(|a| a.lead_id.clone()).collect();
    lead_ids.sort();
    lead_ids.dedup();
    let mut contact_ids: Vec<String> = activities.iter().filter_map(|a| a.contact_id.clone()).collect();
    contact_ids.sort();
    contact_ids.dedup();

    let leads: HashMap<String, PersonSummary> = state
        .leads
        .find_by_ids(&lead_ids)
        .await?
        .iter()
        .map(|lead| (lead.id.clone(), PersonSummary::from(lead)))
        .collect();
    let contacts: HashMap<String, PersonSummary> = if contact_ids.is_empty() {
        HashMap::new()
    } else {
        state
            .contacts
            .find_by_ids(&contact_ids)
            .await?
            .iter()
            .map(|contact| (contact.id.clone(), PersonSummary::from(contact)))
            .collect()
    };

    Ok(activities
        .into_iter()
        .map(|activity| ActivityView {
            lead: leads.get(&activity.lead_id).cloned(),
            contact: activity.contact_id.as_ref().and_then(|id| contacts.get(id).cloned()),
            activity,
        })
        .collect())
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub date: Option<String>,
}

/// Inclusive bounds of a UTC calendar day given as `YYYY-MM-DD`.
pub fn day_window(date: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), CrmError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| CrmError::invalid("date", "Expected a date in YYYY-MM-DD format"))?;
    let start = day.and_time(NaiveTime::MIN).and_utc();
    Ok((start, start + Duration::days(1) - Duration::milliseconds(1)))
}

pub async fn list_activities(
    state: &AppState,
    actor: &Actor,
    query: ActivityQuery,
) -> Result<Page<ActivityView>, CrmError> {
    let page = page_request(query.page, query.limit, 50)?;
    let window = match query.date.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(date) => Some(day_window(date)?),
        None => None,
    };
    let (activities, total) = state.activities.list_for_user(&actor.user_id, window, page).await?;
    Ok(Page {
        data: with_summaries(state, activities).await?,
        pagination: Pagination::new(page, total),
    })
}

/// POST /door-activity
pub async fn create_activity_handler(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Valid<RecordVisitRequest>,
) -> Result<HttpResponse, CrmError> {
    let view = record_visit(&data, &actor, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(view))
}

/// GET /door-activity
pub async fn list_activities_handler(
    data: web::Data<AppState>,
    actor: Actor,
    query: web::Query<ActivityQuery>,
) -> Result<HttpResponse, CrmError> {
    let page = list_activities(&data, &actor, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(page))
}

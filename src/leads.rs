// src/leads.rs

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{DoorActivity, Lead, LeadStatus, Page, PageRequest, Pagination, Role, Task};
use crate::store::{LeadFilter, UserDirectory};
use crate::validation::{double_option, not_blank, Valid};

const RECENT_ACTIVITY_LIMIT: u64 = 10;
const OPEN_TASK_LIMIT: u64 = 5;

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub first_name: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub last_name: String,
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub status: Option<LeadStatus>,
    pub source: Option<String>,
    #[validate(range(min = 0.0, message = "Must be greater than or equal to 0"))]
    pub estimated_value: Option<f64>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: Option<f64>,
    pub territory_id: Option<String>,
}

/// PATCH body. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeadRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub mobile: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub company: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub job_title: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub website: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<LeadStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub source: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_value: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub street: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub state: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub zip_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub latitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub longitude: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub territory_id: Option<Option<String>>,
    pub assigned_to_id: Option<String>,
}

/// The checkable values of a PATCH body; cleared and absent fields are skipped.
#[derive(Validate)]
struct LeadChanges {
    #[validate(custom(function = "not_blank"))]
    first_name: Option<String>,
    #[validate(custom(function = "not_blank"))]
    last_name: Option<String>,
    #[validate(custom(function = "not_blank"))]
    assigned_to_id: Option<String>,
    #[validate(email(message = "Invalid email"))]
    email: Option<String>,
    #[validate(range(min = 0.0, message = "Must be greater than or equal to 0"))]
    estimated_value: Option<f64>,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    longitude: Option<f64>,
}

impl Validate for UpdateLeadRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        LeadChanges {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            assigned_to_id: self.assigned_to_id.clone(),
            email: self.email.clone().flatten(),
            estimated_value: self.estimated_value.flatten(),
            latitude: self.latitude.flatten(),
            longitude: self.longitude.flatten(),
        }
        .validate()
    }
}

fn patch<T>(field: &mut Option<T>, change: Option<Option<T>>) {
    if let Some(value) = change {
        *field = value;
    }
}

impl UpdateLeadRequest {
    /// Applies everything except ownership, which goes through [`reassign_lead`].
    fn apply_to(self, lead: &mut Lead) {
        if let Some(first_name) = self.first_name {
            lead.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = self.last_name {
            lead.last_name = last_name.trim().to_string();
        }
        if let Some(status) = self.status {
            lead.status = status;
        }
        patch(&mut lead.email, self.email);
        patch(&mut lead.phone, self.phone);
        patch(&mut lead.mobile, self.mobile);
        patch(&mut lead.company, self.company);
        patch(&mut lead.job_title, self.job_title);
        patch(&mut lead.website, self.website);
        patch(&mut lead.description, self.description);
        patch(&mut lead.source, self.source);
        patch(&mut lead.estimated_value, self.estimated_value);
        patch(&mut lead.street, self.street);
        patch(&mut lead.city, self.city);
        patch(&mut lead.state, self.state);
        patch(&mut lead.zip_code, self.zip_code);
        patch(&mut lead.country, self.country);
        patch(&mut lead.latitude, self.latitude);
        patch(&mut lead.longitude, self.longitude);
        patch(&mut lead.territory_id, self.territory_id);
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub assigned_to_id: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BulkAssignRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Array must contain at least 1 element(s)"))]
    pub lead_ids: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub assigned_to_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListLeadsQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl ListLeadsQuery {
    fn into_parts(self) -> Result<(LeadFilter, PageRequest), CrmError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<LeadStatus>().map_err(|e| CrmError::invalid("status", e))?),
        };
        let search = self
            .search
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty());
        let page = page_request(self.page, self.limit, 20)?;
        Ok((LeadFilter { status, search }, page))
    }
}

#[derive(Validate)]
struct PageBounds {
    #[validate(range(min = 1, max = 1_000_000, message = "Must be between 1 and 1000000"))]
    page: u64,
    #[validate(range(min = 1, max = 100, message = "Must be between 1 and 100"))]
    limit: u64,
}

/// Applies defaults and bounds to `page`/`limit` query parameters.
pub fn page_request(page: Option<u64>, limit: Option<u64>, default_limit: u64) -> Result<PageRequest, CrmError> {
    let bounds = PageBounds {
        page: page.unwrap_or(1),
        limit: limit.unwrap_or(default_limit),
    };
    bounds.validate()?;
    Ok(PageRequest {
        page: bounds.page,
        limit: bounds.limit,
    })
}

/// A lead with its open tasks and most recent door visits.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDetail {
    #[serde(flatten)]
    pub lead: Lead,
    pub tasks: Vec<Task>,
    pub door_activities: Vec<DoorActivity>,
}

/// Admin oversight chain: when a lead leaves an admin owner and nobody is
/// recorded as overseeing it yet, that admin becomes the overseer.
pub fn oversight_after_transfer(lead: &Lead, current_owner_role: Option<Role>, new_owner_id: &str) -> Option<String> {
    let current_owner = lead.assigned_to_id.as_deref()?;
    if current_owner == new_owner_id || lead.assigned_admin_id.is_some() {
        return None;
    }
    match current_owner_role {
        Some(Role::Admin) => Some(current_owner.to_string()),
        _ => None,
    }
}

async fn owner_role(
    users: &dyn UserDirectory,
    lead: &Lead,
    cache: &mut HashMap<String, Option<Role>>,
) -> Result<Option<Role>, CrmError> {
    let Some(owner_id) = lead.assigned_to_id.as_deref() else {
        return Ok(None);
    };
    if let Some(role) = cache.get(owner_id) {
        return Ok(*role);
    }
    let role = users.find_by_id(owner_id).await?.map(|user| user.role);
    cache.insert(owner_id.to_string(), role);
    Ok(role)
}

async fn require_user(users: &dyn UserDirectory, user_id: &str) -> Result<(), CrmError> {
    match users.find_by_id(user_id).await? {
        Some(_) => Ok(()),
        None => Err(CrmError::NotFound("Target user")),
    }
}

pub async fn list_leads(
    state: &AppState,
    actor: &Actor,
    filter: &LeadFilter,
    page: PageRequest,
) -> Result<Page<Lead>, CrmError> {
    let (data, total) = state.leads.list(&actor.scope(), filter, page).await?;
    Ok(Page {
        data,
        pagination: Pagination::new(page, total),
    })
}

pub async fn create_lead(state: &AppState, actor: &Actor, request: CreateLeadRequest) -> Result<Lead, CrmError> {
    let mut lead = Lead::new(request.first_name.trim(), request.last_name.trim(), Utc::now());
    lead.email = request.email;
    lead.phone = request.phone;
    lead.mobile = request.mobile;
    lead.company = request.company;
    lead.job_title = request.job_title;
    lead.website = request.website;
    lead.description = request.description;
    lead.status = request.status.unwrap_or(LeadStatus::New);
    lead.source = request.source;
    lead.estimated_value = request.estimated_value;
    lead.street = request.street;
    lead.city = request.city;
    lead.state = request.state;
    lead.zip_code = request.zip_code;
    lead.country = request.country;
    lead.latitude = request.latitude;
    lead.longitude = request.longitude;
    lead.territory_id = request.territory_id;
    lead.assigned_to_id = Some(actor.user_id.clone());

    state.leads.insert(&lead).await?;
    info!("Lead created: {} by {}", lead.id, actor.user_id);
    Ok(lead)
}

pub async fn get_lead(state: &AppState, actor: &Actor, id: &str) -> Result<LeadDetail, CrmError> {
    let lead = state
        .leads
        .find(&actor.scope(), id)
        .await?
        .ok_or(CrmError::NotFound("Lead"))?;
    let tasks = state.tasks.open_for_lead(&lead.id, OPEN_TASK_LIMIT).await?;
    let door_activities = state.activities.recent_for_lead(&lead.id, RECENT_ACTIVITY_LIMIT).await?;
    Ok(LeadDetail {
        lead,
        tasks,
        door_activities,
    })
}

pub async fn update_lead(
    state: &AppState,
    actor: &Actor,
    id: &str,
    mut request: UpdateLeadRequest,
) -> Result<Lead, CrmError> {
    let scope = actor.scope();
    let mut lead = state.leads.find(&scope, id).await?.ok_or(CrmError::NotFound("Lead"))?;

    let new_owner = request.assigned_to_id.take();
    request.apply_to(&mut lead);

    if let Some(new_owner) = new_owner {
        require_user(state.users.as_ref(), &new_owner).await?;
        let role = owner_role(state.users.as_ref(), &lead, &mut HashMap::new()).await?;
        if let Some(admin_id) = oversight_after_transfer(&lead, role, &new_owner) {
            lead.assigned_admin_id = Some(admin_id);
        }
        lead.assigned_to_id = Some(new_owner);
    }

    if !state.leads.replace(&scope, &lead).await? {
        return Err(CrmError::NotFound("Lead"));
    }
    info!("Lead updated: {} by {}", lead.id, actor.user_id);
    Ok(lead)
}

pub async fn delete_lead(state: &AppState, actor: &Actor, id: &str) -> Result<(), CrmError> {
    if !state.leads.delete(&actor.scope(), id).await? {
        return Err(CrmError::NotFound("Lead"));
    }
    info!("Lead deleted: {} by {}", id, actor.user_id);
    Ok(())
}

/// Transfers one lead. Reps may only hand off leads they own.
pub async fn reassign_lead(
    state: &AppState,
    actor: &Actor,
    id: &str,
    new_owner_id: &str,
) -> Result<Lead, CrmError> {
    let mut lead = state
        .leads
        .find(&actor.scope(), id)
        .await?
        .ok_or(CrmError::NotFound("Lead"))?;
    require_user(state.users.as_ref(), new_owner_id).await?;

    if lead.assigned_to_id.as_deref() == Some(new_owner_id) {
        debug!("Lead {} already assigned to {}", id, new_owner_id);
        return Ok(lead);
    }

    let role = owner_role(state.users.as_ref(), &lead, &mut HashMap::new()).await?;
    let oversight = oversight_after_transfer(&lead, role, new_owner_id);
    state.leads.assign(&lead.id, new_owner_id, oversight.as_deref()).await?;

    if let Some(admin_id) = oversight {
        lead.assigned_admin_id = Some(admin_id);
    }
    lead.assigned_to_id = Some(new_owner_id.to_string());
    info!("Lead {} reassigned to {} by {}", lead.id, new_owner_id, actor.user_id);
    Ok(lead)
}

/// Admin-only mass transfer. Each lead's current owner is inspected on its
/// own so the oversight chain is kept per lead. Unknown ids are skipped.
pub async fn bulk_reassign(
    state: &AppState,
    actor: &Actor,
    lead_ids: &[String],
    new_owner_id: &str,
) -> Result<u64, CrmError> {
    actor.require_admin()?;
    require_user(state.users.as_ref(), new_owner_id).await?;

    let leads = state.leads.find_by_ids(lead_ids).await?;
    let mut roles = HashMap::new();
    for lead in &leads {
        if lead.assigned_to_id.as_deref() == Some(new_owner_id) {
            continue;
        }
        let role = owner_role(state.users.as_ref(), lead, &mut roles).await?;
        let oversight = oversight_after_transfer(lead, role, new_owner_id);
        state.leads.assign(&lead.id, new_owner_id, oversight.as_deref()).await?;
    }

    info!(
        "Bulk reassigned {} of {} requested leads to {} by {}",
        leads.len(),
        lead_ids.len(),
        new_owner_id,
        actor.user_id
    );
    Ok(leads.len() as u64)
}

/// GET /leads
pub async fn list_leads_handler(
    data: web::Data<AppState>,
    actor: Actor,
    query: web::Query<ListLeadsQuery>,
) -> Result<HttpResponse, CrmError> {
    let (filter, page) = query.into_inner().into_parts()?;
    let leads = list_leads(&data, &actor, &filter, page).await?;
    Ok(HttpResponse::Ok().json(leads))
}

/// POST /leads
pub async fn create_lead_handler(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Valid<CreateLeadRequest>,
) -> Result<HttpResponse, CrmError> {
    let lead = create_lead(&data, &actor, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(lead))
}

/// GET /leads/{id}
pub async fn get_lead_handler(
    data: web::Data<AppState>,
    actor: Actor,
    id: web::Path<String>,
) -> Result<HttpResponse, CrmError> {
    let detail = get_lead(&data, &actor, &id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// PATCH /leads/{id}
pub async fn update_lead_handler(
    data: web::Data<AppState>,
    actor: Actor,
    id: web::Path<String>,
    payload: Valid<UpdateLeadRequest>,
) -> Result<HttpResponse, CrmError> {
    let lead = update_lead(&data, &actor, &id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(lead))
}

/// DELETE /leads/{id}
pub async fn delete_lead_handler(
    data: web::Data<AppState>,
    actor: Actor,
    id: web::Path<String>,
) -> Result<HttpResponse, CrmError> {
    delete_lead(&data, &actor, &id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// POST /leads/{id}/assign
pub async fn assign_lead_handler(
    data: web::Data<AppState>,
    actor: Actor,
    id: web::Path<String>,
    payload: Valid<AssignRequest>,
) -> Result<HttpResponse, CrmError> {
    let lead = reassign_lead(&data, &actor, &id, &payload.0.assigned_to_id).await?;
    Ok(HttpResponse::Ok().json(lead))
}

/// POST /leads/bulk-assign
pub async fn bulk_assign_handler(
    data: web::Data<AppState>,
    actor: Actor,
    payload: web::Json<BulkAssignRequest>,
) -> Result<HttpResponse, CrmError> {
    // Role is checked before the body so non-admins never learn about schema details.
    actor.require_admin()?;
    payload.validate()?;

    let count = bulk_reassign(&data, &actor, &payload.lead_ids, &payload.assigned_to_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Successfully reassigned {} leads", count),
        "count": count,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Scope;
    use crate::test_support::{bearer, seed_user, test_app, test_state};
    use actix_web::{http::StatusCode, test as actix_test};
    use serde_json::{json, Value};

    fn lead_owned_by(owner: &str, admin: Option<&str>) -> Lead {
        let mut lead = Lead::new("Ada", "Lovelace", Utc::now());
        lead.assigned_to_id = Some(owner.to_string());
        lead.assigned_admin_id = admin.map(str::to_string);
        lead
    }

    #[test]
    fn oversight_is_recorded_only_when_leaving_an_admin() {
        let lead = lead_owned_by("admin-1", None);
        assert_eq!(
            oversight_after_transfer(&lead, Some(Role::Admin), "rep-1"),
            Some("admin-1".to_string())
        );
        assert_eq!(oversight_after_transfer(&lead, Some(Role::Rep), "rep-1"), None);
        assert_eq!(oversight_after_transfer(&lead, Some(Role::Admin), "admin-1"), None);

        let already = lead_owned_by("admin-2", Some("admin-1"));
        assert_eq!(oversight_after_transfer(&already, Some(Role::Admin), "rep-1"), None);
    }

    #[test]
    fn list_query_rejects_unknown_status() {
        let query = ListLeadsQuery {
            status: Some("WON".into()),
            search: None,
            page: None,
            limit: None,
        };
        assert!(matches!(query.into_parts(), Err(CrmError::Validation(_))));
    }

    #[test]
    fn page_bounds_are_enforced() {
        assert_eq!(page_request(None, None, 20).unwrap(), PageRequest { page: 1, limit: 20 });
        assert!(page_request(Some(0), None, 20).is_err());
        assert!(page_request(None, Some(500), 20).is_err());
        assert!(page_request(Some(PageRequest::MAX_PAGE), Some(PageRequest::MAX_LIMIT), 20).is_ok());
        assert!(page_request(Some(PageRequest::MAX_PAGE + 1), None, 20).is_err());
    }

    #[actix_web::test]
    async fn reassigning_off_an_admin_keeps_the_oversight_chain() {
        let state = test_state();
        let admin = seed_user(&state, "Boss", Role::Admin).await;
        let rep_a = seed_user(&state, "Rep A", Role::Rep).await;
        let rep_b = seed_user(&state, "Rep B", Role::Rep).await;
        let admin_actor = Actor::new(admin.id.clone(), Role::Admin);

        let lead = create_lead(
            &state,
            &admin_actor,
            CreateLeadRequest {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let moved = reassign_lead(&state, &admin_actor, &lead.id, &rep_a.id).await.unwrap();
        assert_eq!(moved.assigned_admin_id.as_deref(), Some(admin.id.as_str()));
        assert_eq!(moved.assigned_to_id.as_deref(), Some(rep_a.id.as_str()));

        // A second transfer must not overwrite the recorded overseer.
        let other_admin = seed_user(&state, "Other Boss", Role::Admin).await;
        reassign_lead(&state, &admin_actor, &lead.id, &other_admin.id).await.unwrap();
        let again = reassign_lead(&state, &admin_actor, &lead.id, &rep_b.id).await.unwrap();
        assert_eq!(again.assigned_admin_id.as_deref(), Some(admin.id.as_str()));

        let stored = state.leads.find(&admin_actor.scope(), &lead.id).await.unwrap().unwrap();
        assert_eq!(stored.assigned_admin_id.as_deref(), Some(admin.id.as_str()));
        assert_eq!(stored.assigned_to_id.as_deref(), Some(rep_b.id.as_str()));
    }

    #[actix_web::test]
    async fn reassigning_to_the_current_owner_changes_nothing() {
        let state = test_state();
        let admin = seed_user(&state, "Boss", Role::Admin).await;
        let actor = Actor::new(admin.id.clone(), Role::Admin);
        let lead = create_lead(
            &state,
            &actor,
            CreateLeadRequest {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let same = reassign_lead(&state, &actor, &lead.id, &admin.id).await.unwrap();
        assert_eq!(same, lead);
    }

    #[actix_web::test]
    async fn bulk_reassign_counts_only_existing_leads() {
        let state = test_state();
        let admin = seed_user(&state, "Boss", Role::Admin).await;
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let rep_actor = Actor::new(rep.id.clone(), Role::Rep);
        let admin_actor = Actor::new(admin.id.clone(), Role::Admin);

        let mut ids = Vec::new();
        for name in ["One", "Two", "Three"] {
            let lead = create_lead(
                &state,
                &admin_actor,
                CreateLeadRequest {
                    first_name: name.into(),
                    last_name: "Lead".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            ids.push(lead.id);
        }
        ids.push("missing-id".to_string());

        assert!(matches!(
            bulk_reassign(&state, &rep_actor, &ids, &rep.id).await,
            Err(CrmError::Forbidden(_))
        ));
        assert!(matches!(
            bulk_reassign(&state, &admin_actor, &ids, "nobody").await,
            Err(CrmError::NotFound(_))
        ));

        assert_eq!(bulk_reassign(&state, &admin_actor, &ids, &rep.id).await.unwrap(), 3);
        let page = list_leads(&state, &rep_actor, &LeadFilter::default(), PageRequest { page: 1, limit: 20 })
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 3);
        assert!(page
            .data
            .iter()
            .all(|lead| lead.assigned_admin_id.as_deref() == Some(admin.id.as_str())));
    }

    #[actix_web::test]
    async fn reps_get_not_found_for_other_reps_leads() {
        let state = test_state();
        let owner = seed_user(&state, "Owner", Role::Rep).await;
        let intruder = seed_user(&state, "Intruder", Role::Rep).await;
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::post()
            .uri("/leads")
            .insert_header(bearer(&state, &owner))
            .set_json(json!({ "firstName": "Ada", "lastName": "Lovelace" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = actix_test::read_body_json(resp).await;
        let uri = format!("/leads/{}", created["id"].as_str().unwrap());

        for req in [
            actix_test::TestRequest::get().uri(&uri),
            actix_test::TestRequest::patch().uri(&uri).set_json(json!({ "company": "Acme" })),
            actix_test::TestRequest::delete().uri(&uri),
        ] {
            let resp = actix_test::call_service(&app, req.insert_header(bearer(&state, &intruder)).to_request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }

        let req = actix_test::TestRequest::get()
            .uri("/leads")
            .insert_header(bearer(&state, &intruder))
            .to_request();
        let listed: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed["pagination"]["total"], 0);

        let req = actix_test::TestRequest::get()
            .uri(&uri)
            .insert_header(bearer(&state, &owner))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn create_rejects_bad_payloads() {
        let state = test_state();
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::post()
            .uri("/leads")
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "firstName": "Ada" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"][0]["path"], "lastName");

        let req = actix_test::TestRequest::post()
            .uri("/leads")
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "firstName": "Ada", "lastName": "Lovelace", "status": "WON" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::post()
            .uri("/leads")
            .set_json(json!({ "firstName": "Ada", "lastName": "Lovelace" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn list_filters_by_status_and_search() {
        let state = test_state();
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let actor = Actor::new(rep.id.clone(), Role::Rep);
        for (first, company, status) in [
            ("Ada", "Analytical Engines", LeadStatus::New),
            ("Grace", "Navy", LeadStatus::Contacted),
            ("Alan", "Bletchley", LeadStatus::Contacted),
        ] {
            create_lead(
                &state,
                &actor,
                CreateLeadRequest {
                    first_name: first.into(),
                    last_name: "Pioneer".into(),
                    company: Some(company.into()),
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::get()
            .uri("/leads?status=CONTACTED&search=bletch")
            .insert_header(bearer(&state, &rep))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["firstName"], "Alan");

        let req = actix_test::TestRequest::get()
            .uri("/leads?limit=2&page=2")
            .insert_header(bearer(&state, &rep))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["pagination"]["pages"], 2);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn bulk_assign_endpoint_follows_the_contract() {
        let state = test_state();
        let admin = seed_user(&state, "Boss", Role::Admin).await;
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let lead = create_lead(
            &state,
            &Actor::new(admin.id.clone(), Role::Admin),
            CreateLeadRequest {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::post()
            .uri("/leads/bulk-assign")
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "leadIds": [lead.id], "assignedToId": rep.id }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::post()
            .uri("/leads/bulk-assign")
            .insert_header(bearer(&state, &admin))
            .set_json(json!({ "leadIds": [lead.id], "assignedToId": "ghost" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = actix_test::TestRequest::post()
            .uri("/leads/bulk-assign")
            .insert_header(bearer(&state, &admin))
            .set_json(json!({ "leadIds": [], "assignedToId": rep.id }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::post()
            .uri("/leads/bulk-assign")
            .insert_header(bearer(&state, &admin))
            .set_json(json!({ "leadIds": [lead.id, "missing"], "assignedToId": rep.id }))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["message"], "Successfully reassigned 1 leads");
    }

    #[actix_web::test]
    async fn patch_clears_nullable_fields_and_reassigns() {
        let state = test_state();
        let admin = seed_user(&state, "Boss", Role::Admin).await;
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let lead = create_lead(
            &state,
            &Actor::new(admin.id.clone(), Role::Admin),
            CreateLeadRequest {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                phone: Some("555-0100".into()),
                company: Some("Engines".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::patch()
            .uri(&format!("/leads/{}", lead.id))
            .insert_header(bearer(&state, &admin))
            .set_json(json!({ "phone": null, "status": "QUALIFIED", "assignedToId": rep.id }))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert!(body["phone"].is_null());
        assert_eq!(body["company"], "Engines");
        assert_eq!(body["status"], "QUALIFIED");
        assert_eq!(body["assignedToId"], rep.id.as_str());
        assert_eq!(body["assignedAdminId"], admin.id.as_str());
    }

    #[actix_web::test]
    async fn patch_rejects_unknown_status_and_blank_names() {
        let state = test_state();
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let lead = create_lead(
            &state,
            &Actor::new(rep.id.clone(), Role::Rep),
            CreateLeadRequest {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let app = actix_test::init_service(test_app(state.clone())).await;
        let uri = format!("/leads/{}", lead.id);

        let req = actix_test::TestRequest::patch()
            .uri(&uri)
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "status": "MAYBE" }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::patch()
            .uri(&uri)
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "firstName": "  ", "email": "nope", "latitude": 95.0 }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = actix_test::read_body_json(resp).await;
        let paths: Vec<_> = body["error"]
            .as_array()
            .unwrap()
            .iter()
            .map(|issue| issue["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, ["email", "firstName", "latitude"]);

        let stored = state.leads.find(&Scope::All, &lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::New);
        assert_eq!(stored.first_name, "Ada");
    }

    #[actix_web::test]
    async fn huge_page_numbers_are_rejected_not_overflowed() {
        let state = test_state();
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let app = actix_test::init_service(test_app(state.clone())).await;

        for uri in [
            "/leads?page=18446744073709551615&limit=100",
            "/door-activity?page=18446744073709551615&limit=100",
        ] {
            let req = actix_test::TestRequest::get()
                .uri(uri)
                .insert_header(bearer(&state, &rep))
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = actix_test::read_body_json(resp).await;
            assert_eq!(body["error"][0]["path"], "page");
        }

        let max = format!("/leads?page={}&limit=100", PageRequest::MAX_PAGE);
        let req = actix_test::TestRequest::get()
            .uri(&max)
            .insert_header(bearer(&state, &rep))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}

use actix_web::{web, HttpResponse};
use log::info;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Role, UserProfile};
use crate::validation::{rule, Valid};

fn known_role(role: &str) -> Result<(), ValidationError> {
    role.parse::<Role>()
        .map(|_| ())
        .map_err(|_| rule("role", "Expected 'admin' | 'rep'"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    #[validate(custom(function = "known_role"))]
    pub role: String,
}

impl UpdateRoleRequest {
    fn parsed(&self) -> Result<Role, CrmError> {
        self.role.parse().map_err(|e: String| CrmError::invalid("role", e))
    }
}

/// GET /users
pub async fn list_users(data: web::Data<AppState>, _actor: Actor) -> Result<HttpResponse, CrmError> {
    let users: Vec<UserProfile> = data.users.list().await?.iter().map(UserProfile::from).collect();
    Ok(HttpResponse::Ok().json(users))
}

/// PUT /users/{id}/role
pub async fn update_role(
    data: web::Data<AppState>,
    actor: Actor,
    user_id: web::Path<String>,
    payload: Valid<UpdateRoleRequest>,
) -> Result<HttpResponse, CrmError> {
    actor.require_admin()?;
    let role = payload.into_inner().parsed()?;

    if !data.users.set_role(&user_id, role).await? {
        return Err(CrmError::NotFound("User"));
    }
    info!("User {} set to {:?} by {}", user_id, role, actor.user_id);

    let user = data.users.find_by_id(&user_id).await?.ok_or(CrmError::NotFound("User"))?;
    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}

/// Startup seed: promotes the configured emails to admin.
pub async fn seed_roles(state: &AppState) -> Result<u64, CrmError> {
    if state.config.seed_admin_emails.is_empty() {
        return Ok(0);
    }
    let promoted = state.users.promote_admins(&state.config.seed_admin_emails).await?;
    info!("Role seed promoted {} user(s) to admin", promoted);
    Ok(promoted)
}

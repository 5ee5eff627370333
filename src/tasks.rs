// src/tasks.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Task, TaskPriority, TaskStatus};
use crate::validation::{flexible_date, not_blank, Valid};

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "flexible_date")]
    pub due_date: Option<DateTime<Utc>>,
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub opportunity_id: Option<String>,
}

fn link(id: Option<String>) -> Option<String> {
    id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())
}

/// Creates a task owned by the actor. A linked lead must be visible to the
/// actor and a linked contact must exist.
pub async fn create_task(state: &AppState, actor: &Actor, request: CreateTaskRequest) -> Result<Task, CrmError> {
    let lead_id = link(request.lead_id);
    if let Some(lead_id) = &lead_id {
        state
            .leads
            .find(&actor.scope(), lead_id)
            .await?
            .ok_or(CrmError::NotFound("Lead"))?;
    }
    let contact_id = link(request.contact_id);
    if let Some(contact_id) = &contact_id {
        if state.contacts.find_by_ids(std::slice::from_ref(contact_id)).await?.is_empty() {
            return Err(CrmError::NotFound("Contact"));
        }
    }

    let task = Task {
        id: Uuid::new_v4().to_string(),
        title: request.title.trim().to_string(),
        description: request.description.filter(|d| !d.trim().is_empty()),
        status: request.status.unwrap_or_default(),
        priority: request.priority.unwrap_or_default(),
        due_date: request.due_date,
        assigned_to_id: actor.user_id.clone(),
        lead_id,
        contact_id,
        opportunity_id: link(request.opportunity_id),
        created_at: Utc::now(),
    };
    state.tasks.insert(&task).await?;
    info!("Task created: {} by {}", task.id, actor.user_id);
    Ok(task)
}

/// GET /tasks
pub async fn list_tasks(data: web::Data<AppState>, actor: Actor) -> Result<HttpResponse, CrmError> {
    let tasks = data.tasks.list(&actor.scope()).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// POST /tasks
pub async fn create_task_handler(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Valid<CreateTaskRequest>,
) -> Result<HttpResponse, CrmError> {
    let task = create_task(&data, &actor, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(task))
}

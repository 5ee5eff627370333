// src/contacts.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::info;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Account, Contact};
use crate::validation::{not_blank, Valid};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub first_name: String,
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub last_name: String,
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    pub industry: Option<String>,
    pub billing_city: Option<String>,
    pub billing_state: Option<String>,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub longitude: Option<f64>,
}

pub async fn list_contacts(data: web::Data<AppState>, actor: Actor) -> Result<HttpResponse, CrmError> {
    let contacts = data.contacts.list(&actor.scope()).await?;
    Ok(HttpResponse::Ok().json(contacts))
}

pub async fn create_contact(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Valid<CreateContactRequest>,
) -> Result<HttpResponse, CrmError> {
    let request = payload.into_inner();
    let contact = Contact {
        id: Uuid::new_v4().to_string(),
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        email: request.email,
        phone: request.phone,
        city: request.city,
        state: request.state,
        latitude: request.latitude,
        longitude: request.longitude,
        owner_id: Some(actor.user_id.clone()),
        created_at: Utc::now(),
    };
    data.contacts.insert(&contact).await?;
    info!("Contact created: {} by {}", contact.id, actor.user_id);
    Ok(HttpResponse::Created().json(contact))
}

pub async fn list_accounts(data: web::Data<AppState>, actor: Actor) -> Result<HttpResponse, CrmError> {
    let accounts = data.accounts.list(&actor.scope()).await?;
    Ok(HttpResponse::Ok().json(accounts))
}

pub async fn create_account(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Valid<CreateAccountRequest>,
) -> Result<HttpResponse, CrmError> {
    let request = payload.into_inner();
    let account = Account {
        id: Uuid::new_v4().to_string(),
        name: request.name.trim().to_string(),
        industry: request.industry,
        billing_city: request.billing_city,
        billing_state: request.billing_state,
        latitude: request.latitude,
        longitude: request.longitude,
        owner_id: Some(actor.user_id.clone()),
        created_at: Utc::now(),
    };
    data.accounts.insert(&account).await?;
    info!("Account created: {} by {}", account.id, actor.user_id);
    Ok(HttpResponse::Created().json(account))
}

#[cfg(test)]
mod tests {
    use crate::models::Role;
    use crate::test_support::{bearer, seed_user, test_app, test_state};
    use actix_web::{http::StatusCode, test as actix_test};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn contacts_and_accounts_are_owner_scoped() {
        let state = test_state();
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let other = seed_user(&state, "Other", Role::Rep).await;
        let admin = seed_user(&state, "Boss", Role::Admin).await;
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::post()
            .uri("/contacts")
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "firstName": "Grace", "lastName": "Hopper", "latitude": 38.9, "longitude": -77.0 }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = actix_test::TestRequest::post()
            .uri("/accounts")
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "name": "Acme", "industry": "Roofing" }))
            .to_request();
        let account: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(account["ownerId"], rep.id.as_str());

        let req = actix_test::TestRequest::post()
            .uri("/accounts")
            .insert_header(bearer(&state, &rep))
            .set_json(json!({ "name": " " }))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        for (user, expected) in [(&other, 0), (&rep, 1), (&admin, 1)] {
            let req = actix_test::TestRequest::get()
                .uri("/contacts")
                .insert_header(bearer(&state, user))
                .to_request();
            let contacts: Value = actix_test::call_and_read_body_json(&app, req).await;
            assert_eq!(contacts.as_array().unwrap().len(), expected);

            let req = actix_test::TestRequest::get()
                .uri("/accounts")
                .insert_header(bearer(&state, user))
                .to_request();
            let accounts: Value = actix_test::call_and_read_body_json(&app, req).await;
            assert_eq!(accounts.as_array().unwrap().len(), expected);
        }
    }
}

//! Shared fixtures for handler tests: an in-memory app, seeded users and tokens.

use std::sync::Arc;

use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    http::header,
    web, App,
};
use chrono::Utc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{create_jwt, Authentication};
use crate::config::Config;
use crate::models::{Role, User};
use crate::store::MemoryStore;
use crate::validation::{json_config, query_config};

pub const TEST_PASSWORD: &str = "correct-horse";

pub fn test_state() -> AppState {
    AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
}

/// The production route table and middleware over `state`.
pub fn test_app(
    state: AppState,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .wrap(Authentication::new(state.config.jwt_secret.clone()))
        .app_data(web::Data::new(state))
        .app_data(json_config())
        .app_data(query_config())
        .configure(crate::configure_routes)
}

/// Inserts a user named `name` with [`TEST_PASSWORD`]; email is derived from the name.
pub async fn seed_user(state: &AppState, name: &str, role: Role) -> User {
    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        password_hash: bcrypt::hash(TEST_PASSWORD, 4).unwrap(),
        role,
        created_at: Utc::now(),
    };
    state.users.insert(&user).await.unwrap();
    user
}

pub fn bearer(state: &AppState, user: &User) -> (header::HeaderName, String) {
    let token = create_jwt(&user.id, &state.config.jwt_secret).unwrap();
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

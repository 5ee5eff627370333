// src/auth.rs

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, HttpMessage, HttpResponse,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures::future::{ok, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::actor::SessionUser;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Role, User, UserProfile};
use crate::validation::{not_blank, Valid};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupInfo {
    #[validate(custom(function = "not_blank"))]
    pub name: String,
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(min = 8, message = "Must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginInfo {
    #[validate(custom(function = "not_blank"))]
    pub email: String,
    #[validate(custom(function = "not_blank"))]
    pub password: String,
}

pub fn create_jwt(user_id: &str, secret: &str) -> Result<String, CrmError> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| CrmError::Storage(format!("token encoding failed: {}", e)))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Bearer-token middleware. A valid token puts a [`SessionUser`] into the
/// request extensions; a bad token is rejected here; no token passes through
/// and is turned away by the `Actor` extractor on protected routes.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: String,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Authentication { secret: secret.into() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = bearer {
            match validate_jwt(&token, &self.secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(SessionUser(claims.sub));
                }
                Err(e) => {
                    info!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .json(serde_json::json!({ "error": "Invalid token" }))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

/// POST /auth/signup
pub async fn signup(
    data: web::Data<AppState>,
    signup_info: Valid<SignupInfo>,
) -> Result<HttpResponse, CrmError> {
    let SignupInfo { name, email, password } = signup_info.into_inner();

    let password_hash = web::block(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| CrmError::Storage(format!("hashing task failed: {}", e)))?
        .map_err(|e| CrmError::Storage(format!("error hashing password: {}", e)))?;

    let new_user = User {
        id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        email: email.trim().to_lowercase(),
        password_hash,
        role: Role::Rep,
        created_at: Utc::now(),
    };
    data.users.insert(&new_user).await?;
    info!("User created: {}", new_user.id);

    Ok(HttpResponse::Created().json(UserProfile::from(&new_user)))
}

/// POST /auth/login
pub async fn login(
    data: web::Data<AppState>,
    login_info: Valid<LoginInfo>,
) -> Result<HttpResponse, CrmError> {
    let LoginInfo { email, password } = login_info.into_inner();

    let user = match data.users.find_by_email(email.trim()).await? {
        Some(user) => user,
        None => return Err(CrmError::Unauthenticated),
    };

    let stored_hash = user.password_hash.clone();
    let matches = web::block(move || verify(password, &stored_hash))
        .await
        .map_err(|e| CrmError::Storage(format!("verification task failed: {}", e)))?
        .unwrap_or_else(|e| {
            error!("Unreadable password hash for user {}: {}", user.id, e);
            false
        });
    if !matches {
        return Err(CrmError::Unauthenticated);
    }

    let token = create_jwt(&user.id, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "userId": user.id,
        "role": user.role,
    })))
}

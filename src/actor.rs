// src/actor.rs

use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest};
use futures::future::LocalBoxFuture;
use log::warn;

use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::Role;

/// User id placed into request extensions by the bearer-token middleware.
#[derive(Debug, Clone)]
pub struct SessionUser(pub String);

/// The authenticated caller, passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Visibility of this actor: admins see everything, reps only what they own.
    pub fn scope(&self) -> Scope {
        if self.is_admin() {
            Scope::All
        } else {
            Scope::OwnedBy(self.user_id.clone())
        }
    }

    pub fn require_admin(&self) -> Result<(), CrmError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(CrmError::Forbidden("admin role required".to_string()))
        }
    }
}

/// Ownership restriction baked into repository lookups. A record outside the
/// scope is indistinguishable from a missing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    OwnedBy(String),
}

impl Scope {
    pub fn permits(&self, owner: Option<&str>) -> bool {
        match self {
            Scope::All => true,
            Scope::OwnedBy(user_id) => owner == Some(user_id.as_str()),
        }
    }
}

impl FromRequest for Actor {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let session = req.extensions().get::<SessionUser>().cloned();
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let (Some(SessionUser(user_id)), Some(state)) = (session, state) else {
                return Err(CrmError::Unauthenticated.into());
            };
            match state.users.find_by_id(&user_id).await? {
                Some(user) => Ok(Actor::new(user.id, user.role)),
                None => {
                    warn!("Token for unknown user {}", user_id);
                    Err(CrmError::Unauthenticated.into())
                }
            }
        })
    }
}

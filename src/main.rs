// src/main.rs

mod actor;
mod app_state;
mod auth;
mod config;
mod contacts;
mod csv_import;
mod door_activity;
mod error;
mod leads;
mod map;
mod models;
mod opportunities;
mod store;
mod tasks;
mod user_management;
mod validation;

#[cfg(test)]
mod test_support;

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use crate::app_state::AppState;
use crate::auth::{login, signup, Authentication};
use crate::config::{Config, StorageBackend};
use crate::contacts::{create_account, create_contact, list_accounts, list_contacts};
use crate::csv_import::{import_handler, preview_handler};
use crate::door_activity::{create_activity_handler, list_activities_handler};
use crate::leads::{
    assign_lead_handler, bulk_assign_handler, create_lead_handler, delete_lead_handler, get_lead_handler,
    list_leads_handler, update_lead_handler,
};
use crate::map::map_handler;
use crate::opportunities::{create_opportunity, list_opportunities};
use crate::store::{MemoryStore, MongoStore};
use crate::tasks::{create_task_handler, list_tasks};
use crate::user_management::{list_users, seed_roles, update_role};
use crate::validation::{json_config, query_config};

/// Every API route. Static `/leads/...` paths are registered before `/leads/{id}`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/signup", web::post().to(signup))
            .route("/login", web::post().to(login)),
    )
    // USERS
    .service(
        web::scope("/users")
            .route("", web::get().to(list_users))
            .route("/{id}/role", web::put().to(update_role)),
    )
    // LEADS
    .service(
        web::scope("/leads")
            .route("", web::get().to(list_leads_handler))
            .route("", web::post().to(create_lead_handler))
            .route("/bulk-assign", web::post().to(bulk_assign_handler))
            .route("/import", web::post().to(import_handler))
            .route("/import/preview", web::post().to(preview_handler))
            .route("/{id}", web::get().to(get_lead_handler))
            .route("/{id}", web::patch().to(update_lead_handler))
            .route("/{id}", web::delete().to(delete_lead_handler))
            .route("/{id}/assign", web::post().to(assign_lead_handler)),
    )
    // FIELD ACTIVITY
    .service(
        web::scope("/door-activity")
            .route("", web::get().to(list_activities_handler))
            .route("", web::post().to(create_activity_handler)),
    )
    .service(
        web::scope("/contacts")
            .route("", web::get().to(list_contacts))
            .route("", web::post().to(create_contact)),
    )
    .service(
        web::scope("/accounts")
            .route("", web::get().to(list_accounts))
            .route("", web::post().to(create_account)),
    )
    .service(
        web::scope("/tasks")
            .route("", web::get().to(list_tasks))
            .route("", web::post().to(create_task_handler)),
    )
    .service(
        web::scope("/opportunities")
            .route("", web::get().to(list_opportunities))
            .route("", web::post().to(create_opportunity)),
    )
    .service(web::resource("/map").route(web::get().to(map_handler)));
}

fn startup_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

async fn build_state(config: Config) -> io::Result<AppState> {
    match config.storage {
        StorageBackend::Mongo => {
            let uri = config
                .mongo_uri
                .clone()
                .ok_or_else(|| startup_error("MONGO_URI must be set"))?;
            let store = MongoStore::connect(&uri, &config.database_name)
                .await
                .map_err(startup_error)?;
            store.ensure_indexes().await.map_err(startup_error)?;
            info!("Connected to MongoDB database {}", config.database_name);
            Ok(AppState::new(Arc::new(store), config))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Ok(AppState::new(Arc::new(MemoryStore::new()), config))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(startup_error)?;
    let bind_addr = config.bind_addr.clone();
    let frontend_origin = config.frontend_origin.clone();

    let state = build_state(config).await?;
    seed_roles(&state).await.map_err(startup_error)?;

    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PATCH", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication::new(state.config.jwt_secret.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(json_config())
            .app_data(query_config())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}

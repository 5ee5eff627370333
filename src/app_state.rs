use std::sync::Arc;

use crate::config::Config;
use crate::store::{
    AccountRepository, ContactRepository, DoorActivityRepository, LeadRepository, OpportunityRepository,
    TaskRepository, UserDirectory,
};

#[derive(Clone)]
pub struct AppState {
    pub leads: Arc<dyn LeadRepository>,
    pub activities: Arc<dyn DoorActivityRepository>,
    pub users: Arc<dyn UserDirectory>,
    pub contacts: Arc<dyn ContactRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub opportunities: Arc<dyn OpportunityRepository>,
    pub config: Config,
}

impl AppState {
    /// Wires every repository to one backing store.
    pub fn new<S>(store: Arc<S>, config: Config) -> Self
    where
        S: LeadRepository
            + DoorActivityRepository
            + UserDirectory
            + ContactRepository
            + AccountRepository
            + TaskRepository
            + OpportunityRepository
            + 'static,
    {
        AppState {
            leads: store.clone(),
            activities: store.clone(),
            users: store.clone(),
            contacts: store.clone(),
            accounts: store.clone(),
            tasks: store.clone(),
            opportunities: store,
            config,
        }
    }
}

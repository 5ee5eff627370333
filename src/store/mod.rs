//! Repository seams between the handlers and the database.
//!
//! Every lookup that is subject to ownership takes a [`Scope`]; the scope
//! becomes part of the query, so an out-of-scope record behaves exactly like
//! a missing one.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::actor::Scope;
use crate::error::CrmError;
use crate::models::{
    Account, Contact, DoorActivity, Lead, LeadStatus, Opportunity, Outcome, PageRequest, Role, Task, User,
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub search: Option<String>,
}

impl LeadFilter {
    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(status) = self.status {
            if lead.status != status {
                return false;
            }
        }
        match &self.search {
            Some(term) => {
                let term = term.to_lowercase();
                [
                    Some(lead.first_name.as_str()),
                    Some(lead.last_name.as_str()),
                    lead.email.as_deref(),
                    lead.company.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&term))
            }
            None => true,
        }
    }
}

/// How a door visit finds the lead it belongs to.
#[derive(Debug, Clone)]
pub enum VisitTarget {
    /// Caller named the lead explicitly; it must be visible in `scope`.
    Lead { id: String, scope: Scope },
    /// Match on street+zip; `candidate` is inserted when nothing matches.
    Address { key: Option<String>, candidate: Box<Lead> },
}

/// A door activity before it is linked to its lead.
#[derive(Debug, Clone)]
pub struct ActivityDraft {
    pub id: String,
    pub outcome: Outcome,
    pub notes: Option<String>,
    pub left_materials: bool,
    pub materials_type: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub photo_url: Option<String>,
    pub user_id: String,
    pub contact_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivityDraft {
    pub fn link(self, lead_id: &str) -> DoorActivity {
        DoorActivity {
            id: self.id,
            outcome: self.outcome,
            notes: self.notes,
            left_materials: self.left_materials,
            materials_type: self.materials_type,
            latitude: self.latitude,
            longitude: self.longitude,
            photo_url: self.photo_url,
            user_id: self.user_id,
            lead_id: lead_id.to_string(),
            contact_id: self.contact_id,
            created_at: self.created_at,
        }
    }
}

/// Everything the store needs to record a visit as one unit of work.
#[derive(Debug, Clone)]
pub struct VisitPlan {
    pub target: VisitTarget,
    pub activity: ActivityDraft,
}

impl VisitPlan {
    /// Lead-side effects of the visit: photo, activity time, status cascade.
    pub fn apply(&self, lead: &mut Lead) {
        if let Some(photo) = &self.activity.photo_url {
            lead.photo_url = Some(photo.clone());
        }
        lead.last_activity_at = Some(self.activity.created_at);
        lead.status = self.activity.outcome.cascade(lead.status);
    }
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn list(
        &self,
        scope: &Scope,
        filter: &LeadFilter,
        page: PageRequest,
    ) -> Result<(Vec<Lead>, u64), CrmError>;

    async fn find(&self, scope: &Scope, id: &str) -> Result<Option<Lead>, CrmError>;

    /// Unscoped lookup; callers must have established visibility already.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Lead>, CrmError>;

    /// Fails with `Conflict` when another lead already holds the address.
    async fn insert(&self, lead: &Lead) -> Result<(), CrmError>;

    /// Replaces the stored lead if it is within `scope`; `false` otherwise.
    async fn replace(&self, scope: &Scope, lead: &Lead) -> Result<bool, CrmError>;

    async fn delete(&self, scope: &Scope, id: &str) -> Result<bool, CrmError>;

    /// Sets the owner, and the overseeing admin when `oversight` is given.
    async fn assign(
        &self,
        id: &str,
        assigned_to_id: &str,
        oversight: Option<&str>,
    ) -> Result<bool, CrmError>;

    /// Inserts what it can, skipping address duplicates. Returns the count inserted.
    async fn insert_many_skip_duplicates(&self, leads: Vec<Lead>) -> Result<u64, CrmError>;

    /// Leads in scope that carry both coordinates.
    async fn located(&self, scope: &Scope) -> Result<Vec<Lead>, CrmError>;
}

#[async_trait]
pub trait DoorActivityRepository: Send + Sync {
    /// Resolves or creates the lead, applies the visit to it and appends the
    /// activity, all or nothing.
    async fn record_visit(&self, plan: VisitPlan) -> Result<(Lead, DoorActivity), CrmError>;

    async fn list_for_user(
        &self,
        user_id: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        page: PageRequest,
    ) -> Result<(Vec<DoorActivity>, u64), CrmError>;

    async fn recent_for_lead(&self, lead_id: &str, limit: u64) -> Result<Vec<DoorActivity>, CrmError>;

    /// Newest first; scope applies to the recording user.
    async fn recent(&self, scope: &Scope, limit: u64) -> Result<Vec<DoorActivity>, CrmError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, CrmError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CrmError>;

    async fn insert(&self, user: &User) -> Result<(), CrmError>;

    async fn list(&self) -> Result<Vec<User>, CrmError>;

    async fn set_role(&self, id: &str, role: Role) -> Result<bool, CrmError>;

    /// Role seed step: promotes the listed emails to admin.
    async fn promote_admins(&self, emails: &[String]) -> Result<u64, CrmError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn insert(&self, contact: &Contact) -> Result<(), CrmError>;

    async fn list(&self, scope: &Scope) -> Result<Vec<Contact>, CrmError>;

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Contact>, CrmError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn insert(&self, account: &Account) -> Result<(), CrmError>;

    async fn list(&self, scope: &Scope) -> Result<Vec<Account>, CrmError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), CrmError>;

    /// Earliest due date first.
    async fn list(&self, scope: &Scope) -> Result<Vec<Task>, CrmError>;

    /// Tasks on the lead that are not completed, earliest due date first.
    async fn open_for_lead(&self, lead_id: &str, limit: u64) -> Result<Vec<Task>, CrmError>;
}

#[async_trait]
pub trait OpportunityRepository: Send + Sync {
    async fn insert(&self, opportunity: &Opportunity) -> Result<(), CrmError>;

    async fn list(&self, scope: &Scope) -> Result<Vec<Opportunity>, CrmError>;
}

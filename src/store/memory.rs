//! In-process store used for local runs (`STORAGE_BACKEND=memory`) and tests.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AccountRepository, ContactRepository, DoorActivityRepository, LeadFilter, LeadRepository,
    OpportunityRepository, TaskRepository, UserDirectory, VisitPlan, VisitTarget,
};
use crate::actor::Scope;
use crate::error::CrmError;
use crate::models::{
    by_due_date, Account, Contact, DoorActivity, Lead, Opportunity, PageRequest, Role, Task, User,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    leads: Vec<Lead>,
    activities: Vec<DoorActivity>,
    contacts: Vec<Contact>,
    accounts: Vec<Account>,
    tasks: Vec<Task>,
    opportunities: Vec<Opportunity>,
}

impl Tables {
    fn address_taken(&self, lead: &Lead) -> bool {
        match lead.address_key() {
            Some(key) => self
                .leads
                .iter()
                .any(|other| other.id != lead.id && other.address_key().as_deref() == Some(key.as_str())),
            None => false,
        }
    }
}

/// All tables behind one lock, so multi-step writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(rows: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
}

fn paginate<T: Clone>(rows: &[T], page: PageRequest) -> Vec<T> {
    rows.iter()
        .skip(page.skip() as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl LeadRepository for MemoryStore {
    async fn list(
        &self,
        scope: &Scope,
        filter: &LeadFilter,
        page: PageRequest,
    ) -> Result<(Vec<Lead>, u64), CrmError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Lead> = tables
            .leads
            .iter()
            .filter(|lead| scope.permits(lead.assigned_to_id.as_deref()) && filter.matches(lead))
            .cloned()
            .collect();
        newest_first(&mut matching, |lead| lead.created_at);
        let total = matching.len() as u64;
        Ok((paginate(&matching, page), total))
    }

    async fn find(&self, scope: &Scope, id: &str) -> Result<Option<Lead>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .iter()
            .find(|lead| lead.id == id && scope.permits(lead.assigned_to_id.as_deref()))
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Lead>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .iter()
            .filter(|lead| ids.contains(&lead.id))
            .cloned()
            .collect())
    }

    async fn insert(&self, lead: &Lead) -> Result<(), CrmError> {
        let mut tables = self.tables.write().await;
        if tables.address_taken(lead) {
            return Err(CrmError::Conflict("A lead already exists at this address".to_string()));
        }
        tables.leads.push(lead.clone());
        Ok(())
    }

    async fn replace(&self, scope: &Scope, lead: &Lead) -> Result<bool, CrmError> {
        let mut tables = self.tables.write().await;
        if tables.address_taken(lead) {
            return Err(CrmError::Conflict("A lead already exists at this address".to_string()));
        }
        match tables
            .leads
            .iter_mut()
            .find(|stored| stored.id == lead.id && scope.permits(stored.assigned_to_id.as_deref()))
        {
            Some(stored) => {
                *stored = lead.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, scope: &Scope, id: &str) -> Result<bool, CrmError> {
        let mut tables = self.tables.write().await;
        let before = tables.leads.len();
        tables
            .leads
            .retain(|lead| !(lead.id == id && scope.permits(lead.assigned_to_id.as_deref())));
        Ok(tables.leads.len() < before)
    }

    async fn assign(
        &self,
        id: &str,
        assigned_to_id: &str,
        oversight: Option<&str>,
    ) -> Result<bool, CrmError> {
        let mut tables = self.tables.write().await;
        match tables.leads.iter_mut().find(|lead| lead.id == id) {
            Some(lead) => {
                lead.assigned_to_id = Some(assigned_to_id.to_string());
                if let Some(admin_id) = oversight {
                    lead.assigned_admin_id = Some(admin_id.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_many_skip_duplicates(&self, leads: Vec<Lead>) -> Result<u64, CrmError> {
        let mut tables = self.tables.write().await;
        let mut taken: HashSet<String> = tables.leads.iter().filter_map(Lead::address_key).collect();
        let mut inserted = 0;
        for lead in leads {
            if let Some(key) = lead.address_key() {
                if !taken.insert(key) {
                    continue;
                }
            }
            tables.leads.push(lead);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn located(&self, scope: &Scope) -> Result<Vec<Lead>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables
            .leads
            .iter()
            .filter(|lead| {
                lead.latitude.is_some()
                    && lead.longitude.is_some()
                    && scope.permits(lead.assigned_to_id.as_deref())
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DoorActivityRepository for MemoryStore {
    async fn record_visit(&self, plan: VisitPlan) -> Result<(Lead, DoorActivity), CrmError> {
        let mut tables = self.tables.write().await;

        let index = match &plan.target {
            VisitTarget::Lead { id, scope } => tables
                .leads
                .iter()
                .position(|lead| &lead.id == id && scope.permits(lead.assigned_to_id.as_deref()))
                .ok_or(CrmError::NotFound("Lead"))?,
            VisitTarget::Address { key, candidate } => {
                let existing = key.as_ref().and_then(|key| {
                    tables
                        .leads
                        .iter()
                        .position(|lead| lead.address_key().as_ref() == Some(key))
                });
                match existing {
                    Some(index) => index,
                    None => {
                        tables.leads.push(candidate.as_ref().clone());
                        tables.leads.len() - 1
                    }
                }
            }
        };

        plan.apply(&mut tables.leads[index]);
        let lead = tables.leads[index].clone();
        let activity = plan.activity.link(&lead.id);
        tables.activities.push(activity.clone());
        Ok((lead, activity))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        page: PageRequest,
    ) -> Result<(Vec<DoorActivity>, u64), CrmError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<DoorActivity> = tables
            .activities
            .iter()
            .filter(|activity| activity.user_id == user_id)
            .filter(|activity| match window {
                Some((start, end)) => activity.created_at >= start && activity.created_at <= end,
                None => true,
            })
            .cloned()
            .collect();
        newest_first(&mut matching, |activity| activity.created_at);
        let total = matching.len() as u64;
        Ok((paginate(&matching, page), total))
    }

    async fn recent_for_lead(&self, lead_id: &str, limit: u64) -> Result<Vec<DoorActivity>, CrmError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<DoorActivity> = tables
            .activities
            .iter()
            .filter(|activity| activity.lead_id == lead_id)
            .cloned()
            .collect();
        newest_first(&mut matching, |activity| activity.created_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn recent(&self, scope: &Scope, limit: u64) -> Result<Vec<DoorActivity>, CrmError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<DoorActivity> = tables
            .activities
            .iter()
            .filter(|activity| scope.permits(Some(activity.user_id.as_str())))
            .cloned()
            .collect();
        newest_first(&mut matching, |activity| activity.created_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), CrmError> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|other| other.email.eq_ignore_ascii_case(&user.email)) {
            return Err(CrmError::Conflict("Email already registered".to_string()));
        }
        tables.users.push(user.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables.users.clone())
    }

    async fn set_role(&self, id: &str, role: Role) -> Result<bool, CrmError> {
        let mut tables = self.tables.write().await;
        match tables.users.iter_mut().find(|user| user.id == id) {
            Some(user) => {
                user.role = role;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn promote_admins(&self, emails: &[String]) -> Result<u64, CrmError> {
        let mut tables = self.tables.write().await;
        let mut promoted = 0;
        for user in tables.users.iter_mut() {
            if user.role != Role::Admin && emails.iter().any(|e| e.eq_ignore_ascii_case(&user.email)) {
                user.role = Role::Admin;
                promoted += 1;
            }
        }
        Ok(promoted)
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn insert(&self, contact: &Contact) -> Result<(), CrmError> {
        self.tables.write().await.contacts.push(contact.clone());
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Contact>, CrmError> {
        let tables = self.tables.read().await;
        let mut contacts: Vec<Contact> = tables
            .contacts
            .iter()
            .filter(|contact| scope.permits(contact.owner_id.as_deref()))
            .cloned()
            .collect();
        newest_first(&mut contacts, |contact| contact.created_at);
        Ok(contacts)
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Contact>, CrmError> {
        let tables = self.tables.read().await;
        Ok(tables
            .contacts
            .iter()
            .filter(|contact| ids.contains(&contact.id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert(&self, account: &Account) -> Result<(), CrmError> {
        self.tables.write().await.accounts.push(account.clone());
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Account>, CrmError> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .iter()
            .filter(|account| scope.permits(account.owner_id.as_deref()))
            .cloned()
            .collect();
        newest_first(&mut accounts, |account| account.created_at);
        Ok(accounts)
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn insert(&self, task: &Task) -> Result<(), CrmError> {
        self.tables.write().await.tasks.push(task.clone());
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Task>, CrmError> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .iter()
            .filter(|task| scope.permits(Some(task.assigned_to_id.as_str())))
            .cloned()
            .collect();
        by_due_date(&mut tasks);
        Ok(tasks)
    }

    async fn open_for_lead(&self, lead_id: &str, limit: u64) -> Result<Vec<Task>, CrmError> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<Task> = tables
            .tasks
            .iter()
            .filter(|task| task.lead_id.as_deref() == Some(lead_id) && task.is_open())
            .cloned()
            .collect();
        by_due_date(&mut tasks);
        tasks.truncate(limit as usize);
        Ok(tasks)
    }
}

#[async_trait]
impl OpportunityRepository for MemoryStore {
    async fn insert(&self, opportunity: &Opportunity) -> Result<(), CrmError> {
        self.tables.write().await.opportunities.push(opportunity.clone());
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Opportunity>, CrmError> {
        let tables = self.tables.read().await;
        let mut opportunities: Vec<Opportunity> = tables
            .opportunities
            .iter()
            .filter(|opportunity| scope.permits(Some(opportunity.assigned_to_id.as_str())))
            .cloned()
            .collect();
        newest_first(&mut opportunities, |opportunity| opportunity.created_at);
        Ok(opportunities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead_at(street: &str, zip: &str, owner: &str) -> Lead {
        let mut lead = Lead::new("Ada", "Lovelace", Utc::now());
        lead.street = Some(street.to_string());
        lead.zip_code = Some(zip.to_string());
        lead.assigned_to_id = Some(owner.to_string());
        lead
    }

    #[tokio::test]
    async fn scoped_find_hides_other_owners_leads() {
        let store = MemoryStore::new();
        let lead = lead_at("1 Elm St", "10001", "rep-1");
        LeadRepository::insert(&store, &lead).await.unwrap();

        let own = Scope::OwnedBy("rep-1".into());
        let other = Scope::OwnedBy("rep-2".into());
        assert!(store.find(&own, &lead.id).await.unwrap().is_some());
        assert!(store.find(&other, &lead.id).await.unwrap().is_none());
        assert!(!store.delete(&other, &lead.id).await.unwrap());
        assert!(store.find(&Scope::All, &lead.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_lead_at_same_address_conflicts() {
        let store = MemoryStore::new();
        LeadRepository::insert(&store, &lead_at("1 Elm St", "10001", "rep-1")).await.unwrap();
        let result = LeadRepository::insert(&store, &lead_at("1 ELM ST", "10001", "rep-2")).await;
        assert!(matches!(result, Err(CrmError::Conflict(_))));
    }

    #[tokio::test]
    async fn bulk_insert_skips_address_duplicates() {
        let store = MemoryStore::new();
        LeadRepository::insert(&store, &lead_at("1 Elm St", "10001", "rep-1")).await.unwrap();

        let batch = vec![
            lead_at("1 elm st", "10001", "rep-1"),
            lead_at("2 Elm St", "10001", "rep-1"),
            lead_at("2 Elm St", "10001", "rep-1"),
            Lead::new("Grace", "Hopper", Utc::now()),
            Lead::new("Alan", "Turing", Utc::now()),
        ];
        assert_eq!(store.insert_many_skip_duplicates(batch).await.unwrap(), 3);
    }
}

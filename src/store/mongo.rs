//! MongoDB-backed repositories.
//!
//! Timestamps are stored as BSON dates so range queries and sorting work;
//! the models themselves keep `chrono` types and RFC 3339 on the wire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{info, warn};
use mongodb::bson::{self, doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, Cursor, Database, IndexModel};
use serde::{de::DeserializeOwned, Serialize};

use super::{
    AccountRepository, ContactRepository, DoorActivityRepository, LeadFilter, LeadRepository,
    OpportunityRepository, TaskRepository, UserDirectory, VisitPlan, VisitTarget,
};
use crate::actor::Scope;
use crate::error::CrmError;
use crate::models::{
    Account, Contact, DoorActivity, Lead, Opportunity, PageRequest, Role, Task, TaskStatus, User,
};

const DUPLICATE_KEY: i32 = 11000;

const LEAD_DATES: &[&str] = &["createdAt", "lastActivityAt"];
const CREATED_AT: &[&str] = &["createdAt"];
const TASK_DATES: &[&str] = &["createdAt", "dueDate"];
const OPPORTUNITY_DATES: &[&str] = &["createdAt", "expectedCloseDate"];

pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, CrmError> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoStore { client, db })
    }

    fn users(&self) -> Collection<Document> {
        self.db.collection("users")
    }

    fn leads(&self) -> Collection<Document> {
        self.db.collection("leads")
    }

    fn activities(&self) -> Collection<Document> {
        self.db.collection("door_activities")
    }

    fn contacts(&self) -> Collection<Document> {
        self.db.collection("contacts")
    }

    fn accounts(&self) -> Collection<Document> {
        self.db.collection("accounts")
    }

    fn tasks(&self) -> Collection<Document> {
        self.db.collection("tasks")
    }

    fn opportunities(&self) -> Collection<Document> {
        self.db.collection("opportunities")
    }

    pub async fn ensure_indexes(&self) -> Result<(), CrmError> {
        let unique = || IndexOptions::builder().unique(true).build();

        for coll in [
            self.users(),
            self.leads(),
            self.activities(),
            self.contacts(),
            self.accounts(),
            self.tasks(),
            self.opportunities(),
        ] {
            coll.create_index(IndexModel::builder().keys(doc! { "id": 1 }).options(unique()).build())
                .await?;
        }
        self.users()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique()).build())
            .await?;

        // One lead per street+zip; leads without a full address are exempt.
        let address_options = IndexOptions::builder()
            .unique(true)
            .partial_filter_expression(doc! { "addressKey": { "$exists": true } })
            .build();
        self.leads()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "addressKey": 1 })
                    .options(address_options)
                    .build(),
            )
            .await?;
        self.leads()
            .create_index(IndexModel::builder().keys(doc! { "assignedToId": 1, "createdAt": -1 }).build())
            .await?;
        self.activities()
            .create_index(IndexModel::builder().keys(doc! { "userId": 1, "createdAt": -1 }).build())
            .await?;
        self.activities()
            .create_index(IndexModel::builder().keys(doc! { "leadId": 1, "createdAt": -1 }).build())
            .await?;
        self.tasks()
            .create_index(IndexModel::builder().keys(doc! { "assignedToId": 1, "dueDate": 1 }).build())
            .await?;
        self.tasks()
            .create_index(IndexModel::builder().keys(doc! { "leadId": 1, "dueDate": 1 }).build())
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }

    async fn record_visit_in(
        &self,
        session: &mut ClientSession,
        plan: &VisitPlan,
    ) -> Result<(Lead, DoorActivity), CrmError> {
        let leads = self.leads();

        let stored = match &plan.target {
            VisitTarget::Lead { id, scope } => {
                let mut query = scope_filter(scope, "assignedToId");
                query.insert("id", id.as_str());
                leads.find_one(query).session(&mut *session).await?
            }
            VisitTarget::Address { key: Some(key), candidate } => {
                let mut on_insert = lead_document(candidate)?;
                on_insert.remove("addressKey");
                // The unique addressKey index turns concurrent upserts into one insert.
                leads
                    .find_one_and_update(doc! { "addressKey": key.as_str() }, doc! { "$setOnInsert": on_insert })
                    .upsert(true)
                    .return_document(ReturnDocument::After)
                    .session(&mut *session)
                    .await?
            }
            VisitTarget::Address { key: None, candidate } => {
                let document = lead_document(candidate)?;
                leads.insert_one(document.clone()).session(&mut *session).await?;
                Some(document)
            }
        };

        let mut lead: Lead = from_document(stored.ok_or(CrmError::NotFound("Lead"))?, LEAD_DATES)?;
        plan.apply(&mut lead);

        let last_activity = lead.last_activity_at.map(bson_date);
        leads
            .update_one(
                doc! { "id": lead.id.as_str() },
                doc! { "$set": {
                    "photoUrl": lead.photo_url.clone(),
                    "lastActivityAt": last_activity,
                    "status": lead.status.as_str(),
                } },
            )
            .session(&mut *session)
            .await?;

        let activity = plan.activity.clone().link(&lead.id);
        self.activities()
            .insert_one(to_document(&activity, CREATED_AT)?)
            .session(&mut *session)
            .await?;

        Ok((lead, activity))
    }
}

fn bson_date(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

/// Serializes a model, storing the named timestamp fields as BSON dates.
fn to_document<T: Serialize>(value: &T, dates: &[&str]) -> Result<Document, CrmError> {
    let mut document = bson::to_document(value)?;
    for key in dates {
        if let Some(Bson::String(text)) = document.get(*key) {
            let parsed = DateTime::parse_from_rfc3339(text)
                .map_err(|e| CrmError::Storage(format!("bad timestamp in {}: {}", key, e)))?;
            document.insert(*key, bson_date(parsed.with_timezone(&Utc)));
        }
    }
    Ok(document)
}

fn from_document<T: DeserializeOwned>(mut document: Document, dates: &[&str]) -> Result<T, CrmError> {
    for key in dates {
        if let Some(Bson::DateTime(stored)) = document.get(*key) {
            let at = DateTime::<Utc>::from_timestamp_millis(stored.timestamp_millis())
                .ok_or_else(|| CrmError::Storage(format!("timestamp out of range in {}", key)))?;
            document.insert(*key, at.to_rfc3339());
        }
    }
    Ok(bson::from_document(document)?)
}

fn lead_document(lead: &Lead) -> Result<Document, CrmError> {
    let mut document = to_document(lead, LEAD_DATES)?;
    if let Some(key) = lead.address_key() {
        document.insert("addressKey", key);
    }
    Ok(document)
}

async fn collect<T: DeserializeOwned>(mut cursor: Cursor<Document>, dates: &[&str]) -> Result<Vec<T>, CrmError> {
    let mut rows = Vec::new();
    while let Some(document) = cursor.next().await {
        rows.push(from_document(document?, dates)?);
    }
    Ok(rows)
}

fn scope_filter(scope: &Scope, owner_field: &str) -> Document {
    let mut filter = Document::new();
    if let Scope::OwnedBy(user_id) = scope {
        filter.insert(owner_field, user_id.clone());
    }
    filter
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

fn lead_filter(scope: &Scope, filter: &LeadFilter) -> Document {
    let mut query = scope_filter(scope, "assignedToId");
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(term) = &filter.search {
        let pattern = regex::escape(term);
        let fields = ["firstName", "lastName", "email", "company"];
        let clauses: Vec<Document> = fields
            .iter()
            .map(|field| {
                let mut clause = Document::new();
                clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
                clause
            })
            .collect();
        query.insert("$or", clauses);
    }
    query
}

#[async_trait]
impl LeadRepository for MongoStore {
    async fn list(
        &self,
        scope: &Scope,
        filter: &LeadFilter,
        page: PageRequest,
    ) -> Result<(Vec<Lead>, u64), CrmError> {
        let query = lead_filter(scope, filter);
        let total = self.leads().count_documents(query.clone()).await?;
        let cursor = self
            .leads()
            .find(query)
            .sort(doc! { "createdAt": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .await?;
        Ok((collect(cursor, LEAD_DATES).await?, total))
    }

    async fn find(&self, scope: &Scope, id: &str) -> Result<Option<Lead>, CrmError> {
        let mut query = scope_filter(scope, "assignedToId");
        query.insert("id", id);
        match self.leads().find_one(query).await? {
            Some(document) => Ok(Some(from_document(document, LEAD_DATES)?)),
            None => Ok(None),
        }
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Lead>, CrmError> {
        let cursor = self.leads().find(doc! { "id": { "$in": ids } }).await?;
        collect(cursor, LEAD_DATES).await
    }

    async fn insert(&self, lead: &Lead) -> Result<(), CrmError> {
        match self.leads().insert_one(lead_document(lead)?).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(CrmError::Conflict("A lead already exists at this address".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, scope: &Scope, lead: &Lead) -> Result<bool, CrmError> {
        let mut query = scope_filter(scope, "assignedToId");
        query.insert("id", lead.id.as_str());
        match self.leads().replace_one(query, lead_document(lead)?).await {
            Ok(result) => Ok(result.matched_count == 1),
            Err(e) if is_duplicate_key(&e) => {
                Err(CrmError::Conflict("A lead already exists at this address".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, scope: &Scope, id: &str) -> Result<bool, CrmError> {
        let mut query = scope_filter(scope, "assignedToId");
        query.insert("id", id);
        let result = self.leads().delete_one(query).await?;
        Ok(result.deleted_count == 1)
    }

    async fn assign(
        &self,
        id: &str,
        assigned_to_id: &str,
        oversight: Option<&str>,
    ) -> Result<bool, CrmError> {
        let mut set = doc! { "assignedToId": assigned_to_id };
        if let Some(admin_id) = oversight {
            set.insert("assignedAdminId", admin_id);
        }
        let result = self.leads().update_one(doc! { "id": id }, doc! { "$set": set }).await?;
        Ok(result.matched_count == 1)
    }

    async fn insert_many_skip_duplicates(&self, leads: Vec<Lead>) -> Result<u64, CrmError> {
        if leads.is_empty() {
            return Ok(0);
        }
        let documents = leads.iter().map(lead_document).collect::<Result<Vec<_>, _>>()?;
        let attempted = documents.len() as u64;

        match self.leads().insert_many(documents).ordered(false).await {
            Ok(result) => Ok(result.inserted_ids.len() as u64),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::InsertMany(failure) => {
                    let write_errors = failure.write_errors.as_deref().unwrap_or_default();
                    let only_duplicates = failure.write_concern_error.is_none()
                        && write_errors.iter().all(|w| w.code == DUPLICATE_KEY);
                    if only_duplicates {
                        Ok(attempted - write_errors.len() as u64)
                    } else {
                        Err(e.into())
                    }
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn located(&self, scope: &Scope) -> Result<Vec<Lead>, CrmError> {
        let mut query = scope_filter(scope, "assignedToId");
        query.insert("latitude", doc! { "$ne": Bson::Null });
        query.insert("longitude", doc! { "$ne": Bson::Null });
        let cursor = self.leads().find(query).await?;
        collect(cursor, LEAD_DATES).await
    }
}

#[async_trait]
impl DoorActivityRepository for MongoStore {
    async fn record_visit(&self, plan: VisitPlan) -> Result<(Lead, DoorActivity), CrmError> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        match self.record_visit_in(&mut session, &plan).await {
            Ok(recorded) => {
                session.commit_transaction().await?;
                Ok(recorded)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction().await {
                    warn!("Failed to abort door activity transaction: {}", abort);
                }
                Err(e)
            }
        }
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        page: PageRequest,
    ) -> Result<(Vec<DoorActivity>, u64), CrmError> {
        let mut query = doc! { "userId": user_id };
        if let Some((start, end)) = window {
            query.insert("createdAt", doc! { "$gte": bson_date(start), "$lte": bson_date(end) });
        }
        let total = self.activities().count_documents(query.clone()).await?;
        let cursor = self
            .activities()
            .find(query)
            .sort(doc! { "createdAt": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .await?;
        Ok((collect(cursor, CREATED_AT).await?, total))
    }

    async fn recent_for_lead(&self, lead_id: &str, limit: u64) -> Result<Vec<DoorActivity>, CrmError> {
        let cursor = self
            .activities()
            .find(doc! { "leadId": lead_id })
            .sort(doc! { "createdAt": -1 })
            .limit(limit as i64)
            .await?;
        collect(cursor, CREATED_AT).await
    }

    async fn recent(&self, scope: &Scope, limit: u64) -> Result<Vec<DoorActivity>, CrmError> {
        let cursor = self
            .activities()
            .find(scope_filter(scope, "userId"))
            .sort(doc! { "createdAt": -1 })
            .limit(limit as i64)
            .await?;
        collect(cursor, CREATED_AT).await
    }
}

#[async_trait]
impl UserDirectory for MongoStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, CrmError> {
        match self.users().find_one(doc! { "id": id }).await? {
            Some(document) => Ok(Some(from_document(document, CREATED_AT)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CrmError> {
        match self.users().find_one(doc! { "email": email.to_lowercase() }).await? {
            Some(document) => Ok(Some(from_document(document, CREATED_AT)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, user: &User) -> Result<(), CrmError> {
        match self.users().insert_one(to_document(user, CREATED_AT)?).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(CrmError::Conflict("Email already registered".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<User>, CrmError> {
        let cursor = self.users().find(doc! {}).sort(doc! { "name": 1 }).await?;
        collect(cursor, CREATED_AT).await
    }

    async fn set_role(&self, id: &str, role: Role) -> Result<bool, CrmError> {
        let role = bson::to_bson(&role)?;
        let result = self
            .users()
            .update_one(doc! { "id": id }, doc! { "$set": { "role": role } })
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn promote_admins(&self, emails: &[String]) -> Result<u64, CrmError> {
        if emails.is_empty() {
            return Ok(0);
        }
        let emails: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let result = self
            .users()
            .update_many(
                doc! { "email": { "$in": emails }, "role": { "$ne": "admin" } },
                doc! { "$set": { "role": "admin" } },
            )
            .await?;
        Ok(result.modified_count)
    }
}

#[async_trait]
impl ContactRepository for MongoStore {
    async fn insert(&self, contact: &Contact) -> Result<(), CrmError> {
        self.contacts().insert_one(to_document(contact, CREATED_AT)?).await?;
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Contact>, CrmError> {
        let cursor = self
            .contacts()
            .find(scope_filter(scope, "ownerId"))
            .sort(doc! { "createdAt": -1 })
            .await?;
        collect(cursor, CREATED_AT).await
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Contact>, CrmError> {
        let cursor = self.contacts().find(doc! { "id": { "$in": ids } }).await?;
        collect(cursor, CREATED_AT).await
    }
}

#[async_trait]
impl AccountRepository for MongoStore {
    async fn insert(&self, account: &Account) -> Result<(), CrmError> {
        self.accounts().insert_one(to_document(account, CREATED_AT)?).await?;
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Account>, CrmError> {
        let cursor = self
            .accounts()
            .find(scope_filter(scope, "ownerId"))
            .sort(doc! { "createdAt": -1 })
            .await?;
        collect(cursor, CREATED_AT).await
    }
}

#[async_trait]
impl TaskRepository for MongoStore {
    async fn insert(&self, task: &Task) -> Result<(), CrmError> {
        self.tasks().insert_one(to_document(task, TASK_DATES)?).await?;
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Task>, CrmError> {
        let cursor = self
            .tasks()
            .find(scope_filter(scope, "assignedToId"))
            .sort(doc! { "dueDate": 1 })
            .await?;
        collect(cursor, TASK_DATES).await
    }

    async fn open_for_lead(&self, lead_id: &str, limit: u64) -> Result<Vec<Task>, CrmError> {
        let cursor = self
            .tasks()
            .find(open_tasks_filter(lead_id))
            .sort(doc! { "dueDate": 1 })
            .limit(limit as i64)
            .await?;
        collect(cursor, TASK_DATES).await
    }
}

fn open_tasks_filter(lead_id: &str) -> Document {
    doc! { "leadId": lead_id, "status": { "$ne": TaskStatus::Completed.as_str() } }
}

#[async_trait]
impl OpportunityRepository for MongoStore {
    async fn insert(&self, opportunity: &Opportunity) -> Result<(), CrmError> {
        self.opportunities()
            .insert_one(to_document(opportunity, OPPORTUNITY_DATES)?)
            .await?;
        Ok(())
    }

    async fn list(&self, scope: &Scope) -> Result<Vec<Opportunity>, CrmError> {
        let cursor = self
            .opportunities()
            .find(scope_filter(scope, "assignedToId"))
            .sort(doc! { "createdAt": -1 })
            .await?;
        collect(cursor, OPPORTUNITY_DATES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadStatus;

    #[test]
    fn timestamps_round_trip_through_bson_dates() {
        let mut lead = Lead::new("Ada", "Lovelace", Utc::now());
        lead.last_activity_at = Some(Utc::now());
        let document = lead_document(&lead).unwrap();
        assert!(matches!(document.get("createdAt"), Some(Bson::DateTime(_))));

        let restored: Lead = from_document(document, LEAD_DATES).unwrap();
        assert_eq!(restored.created_at.timestamp_millis(), lead.created_at.timestamp_millis());
        assert_eq!(restored.status, LeadStatus::New);
    }

    #[test]
    fn address_key_is_stored_only_for_full_addresses() {
        let mut lead = Lead::new("Ada", "Lovelace", Utc::now());
        assert!(lead_document(&lead).unwrap().get("addressKey").is_none());

        lead.street = Some("123 Main St".into());
        lead.zip_code = Some("78701".into());
        assert_eq!(
            lead_document(&lead).unwrap().get_str("addressKey").unwrap(),
            "123 main st|78701"
        );
    }

    #[test]
    fn rep_scope_becomes_an_owner_filter() {
        let filter = LeadFilter {
            status: Some(LeadStatus::Contacted),
            search: Some("a.b".into()),
        };
        let query = lead_filter(&Scope::OwnedBy("rep-1".into()), &filter);
        assert_eq!(query.get_str("assignedToId").unwrap(), "rep-1");
        assert_eq!(query.get_str("status").unwrap(), "CONTACTED");
        assert_eq!(query.get_array("$or").unwrap().len(), 4);

        let admin_query = lead_filter(&Scope::All, &LeadFilter::default());
        assert!(admin_query.is_empty());
    }

    #[test]
    fn open_task_filter_excludes_completed_work() {
        let filter = open_tasks_filter("lead-1");
        assert_eq!(filter.get_str("leadId").unwrap(), "lead-1");
        assert_eq!(
            filter.get_document("status").unwrap().get_str("$ne").unwrap(),
            "COMPLETED"
        );
    }
}

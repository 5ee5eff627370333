use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lead::PersonSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Contact> for PersonSummary {
    fn from(contact: &Contact) -> Self {
        PersonSummary {
            id: contact.id.clone(),
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
        }
    }
}

/// A company record (`CRMAccount` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub industry: Option<String>,
    pub billing_city: Option<String>,
    pub billing_state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

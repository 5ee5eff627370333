use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline position of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Unqualified,
    Converted,
    Dead,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Qualified,
        LeadStatus::Unqualified,
        LeadStatus::Converted,
        LeadStatus::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Contacted => "CONTACTED",
            LeadStatus::Qualified => "QUALIFIED",
            LeadStatus::Unqualified => "UNQUALIFIED",
            LeadStatus::Converted => "CONVERTED",
            LeadStatus::Dead => "DEAD",
        }
    }

    /// Position on the forward path. Closed-out statuses have none.
    fn progress(self) -> Option<u8> {
        match self {
            LeadStatus::New => Some(0),
            LeadStatus::Contacted => Some(1),
            LeadStatus::Qualified => Some(2),
            LeadStatus::Converted => Some(3),
            LeadStatus::Unqualified | LeadStatus::Dead => None,
        }
    }

    /// Moves toward `target` only if that is further along the forward path.
    pub fn advanced_to(self, target: LeadStatus) -> LeadStatus {
        match (self.progress(), target.progress()) {
            (Some(current), Some(next)) if next > current => target,
            _ => self,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Invalid enum value. Expected {}, received '{}'",
                    LeadStatus::ALL.map(|s| format!("'{}'", s)).join(" | "),
                    s
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub website: Option<String>,
    pub source: Option<String>,
    pub estimated_value: Option<f64>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    pub status: LeadStatus,
    pub assigned_to_id: Option<String>,
    /// Admin who held the lead before it was handed to someone else.
    pub assigned_admin_id: Option<String>,
    pub territory_id: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// A bare lead with the required names and everything else empty.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Lead {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            phone: None,
            mobile: None,
            company: None,
            job_title: None,
            website: None,
            source: None,
            estimated_value: None,
            street: None,
            city: None,
            state: None,
            zip_code: None,
            country: None,
            latitude: None,
            longitude: None,
            description: None,
            photo_url: None,
            status: LeadStatus::New,
            assigned_to_id: None,
            assigned_admin_id: None,
            territory_id: None,
            last_activity_at: None,
            created_at: now,
        }
    }

    pub fn address_key(&self) -> Option<String> {
        address_key(self.street.as_deref()?, self.zip_code.as_deref()?)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Normalized street+zip used to match door visits to existing leads.
/// Comparison is case-insensitive exact equality; blank parts never match.
pub fn address_key(street: &str, zip_code: &str) -> Option<String> {
    let street = street.trim();
    let zip_code = zip_code.trim();
    if street.is_empty() || zip_code.is_empty() {
        return None;
    }
    Some(format!("{}|{}", street.to_lowercase(), zip_code.to_lowercase()))
}

/// `{id, firstName, lastName}` as nested into activity responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<&Lead> for PersonSummary {
    fn from(lead: &Lead) -> Self {
        PersonSummary {
            id: lead.id.clone(),
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
        }
    }
}

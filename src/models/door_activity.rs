use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lead::{LeadStatus, PersonSummary};

/// Result of one knock on one door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    NoAnswer,
    LeftMaterials,
    SpokeWithResident,
    NotInterested,
    Interested,
    AppointmentSet,
    WrongAddress,
    DoNotContact,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::NoAnswer => "NO_ANSWER",
            Outcome::LeftMaterials => "LEFT_MATERIALS",
            Outcome::SpokeWithResident => "SPOKE_WITH_RESIDENT",
            Outcome::NotInterested => "NOT_INTERESTED",
            Outcome::Interested => "INTERESTED",
            Outcome::AppointmentSet => "APPOINTMENT_SET",
            Outcome::WrongAddress => "WRONG_ADDRESS",
            Outcome::DoNotContact => "DO_NOT_CONTACT",
        }
    }

    /// Status this outcome pushes a lead toward, if any.
    pub fn lead_status(self) -> Option<LeadStatus> {
        match self {
            Outcome::Interested => Some(LeadStatus::Contacted),
            Outcome::AppointmentSet => Some(LeadStatus::Qualified),
            _ => None,
        }
    }

    /// Status for a lead created by this visit.
    pub fn initial_status(self) -> LeadStatus {
        self.lead_status().unwrap_or(LeadStatus::New)
    }

    /// Status of an existing lead after this visit.
    pub fn cascade(self, current: LeadStatus) -> LeadStatus {
        match self.lead_status() {
            Some(target) => current.advanced_to(target),
            None => current,
        }
    }
}

/// Append-only record of a field visit. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorActivity {
    pub id: String,
    pub outcome: Outcome,
    pub notes: Option<String>,
    pub left_materials: bool,
    pub materials_type: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub photo_url: Option<String>,
    pub user_id: String,
    pub lead_id: String,
    pub contact_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Activity as returned by the API, with linked lead/contact names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityView {
    #[serde(flatten)]
    pub activity: DoorActivity,
    pub lead: Option<PersonSummary>,
    pub contact: Option<PersonSummary>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sales stage of a deal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityStage {
    #[default]
    Prospecting,
    Qualification,
    NeedsAnalysis,
    ValueProposition,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub stage: OpportunityStage,
    pub amount: Option<f64>,
    /// Win likelihood in percent.
    pub probability: u8,
    pub expected_close_date: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
    pub contact_id: Option<String>,
    pub assigned_to_id: String,
    pub created_at: DateTime<Utc>,
}

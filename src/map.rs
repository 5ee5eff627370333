// src/map.rs

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Account, Contact, DoorActivity, Lead, LeadStatus};

/// Owner colors handed out in first-seen order, cycling when exhausted.
pub const OWNER_PALETTE: [&str; 10] = [
    "#e11d48", "#2563eb", "#16a34a", "#d97706", "#7c3aed", "#0891b2", "#db2777", "#65a30d", "#ea580c", "#4f46e5",
];

const DEFAULT_COLOR: &str = "#64748b";

fn status_color(status: LeadStatus) -> &'static str {
    match status {
        LeadStatus::New => "#3b82f6",
        LeadStatus::Contacted => "#8b5cf6",
        LeadStatus::Qualified => "#10b981",
        LeadStatus::Unqualified => "#f59e0b",
        LeadStatus::Converted => "#059669",
        LeadStatus::Dead => "#ef4444",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Lead,
    Contact,
    Account,
    Activity,
}

impl MarkerKind {
    fn prefix(self) -> &'static str {
        match self {
            MarkerKind::Lead => "lead",
            MarkerKind::Contact => "contact",
            MarkerKind::Account => "account",
            MarkerKind::Activity => "activity",
        }
    }

    fn color(self) -> &'static str {
        match self {
            MarkerKind::Activity => "#6366f1",
            MarkerKind::Contact => "#06b6d4",
            MarkerKind::Account => "#f97316",
            MarkerKind::Lead => DEFAULT_COLOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMarker {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type")]
    pub kind: MarkerKind,
    pub status: Option<String>,
    pub title: String,
    pub description: String,
    pub color: &'static str,
    /// Only filled in for admin viewers.
    pub owner_color: Option<&'static str>,
}

/// Which entity types to draw.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MapLayers {
    pub leads: bool,
    pub contacts: bool,
    pub accounts: bool,
    pub activities: bool,
}

impl Default for MapLayers {
    fn default() -> Self {
        MapLayers {
            leads: true,
            contacts: true,
            accounts: true,
            activities: false,
        }
    }
}

/// The four collections, each already scoped to the viewer.
#[derive(Debug, Default)]
pub struct MapSources {
    pub leads: Vec<Lead>,
    pub contacts: Vec<Contact>,
    pub accounts: Vec<Account>,
    pub activities: Vec<DoorActivity>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MapStats {
    pub leads: usize,
    pub contacts: usize,
    pub accounts: usize,
    pub activities: usize,
}

#[derive(Debug, Serialize)]
pub struct MapView {
    pub markers: Vec<MapMarker>,
    pub stats: MapStats,
}

fn place(city: Option<&str>, state: Option<&str>) -> String {
    [city, state]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Palette index per owner, in first-seen order leads → contacts → accounts → activities.
fn owner_colors(sources: &MapSources) -> HashMap<&str, &'static str> {
    let owners = sources
        .leads
        .iter()
        .filter_map(|lead| lead.assigned_to_id.as_deref())
        .chain(sources.contacts.iter().filter_map(|c| c.owner_id.as_deref()))
        .chain(sources.accounts.iter().filter_map(|a| a.owner_id.as_deref()))
        .chain(sources.activities.iter().map(|a| a.user_id.as_str()));

    let mut colors = HashMap::new();
    for owner in owners {
        let next = OWNER_PALETTE[colors.len() % OWNER_PALETTE.len()];
        colors.entry(owner).or_insert(next);
    }
    colors
}

struct MarkerBuilder<'a> {
    markers: Vec<MapMarker>,
    owners: Option<HashMap<&'a str, &'static str>>,
}

impl<'a> MarkerBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        kind: MarkerKind,
        id: &str,
        coordinates: (Option<f64>, Option<f64>),
        status: Option<String>,
        title: String,
        description: String,
        owner: Option<&str>,
    ) {
        let (Some(latitude), Some(longitude)) = coordinates else {
            return;
        };
        let color = status
            .as_deref()
            .and_then(|s| s.parse::<LeadStatus>().ok())
            .map(status_color)
            .unwrap_or_else(|| kind.color());
        let owner_color = self
            .owners
            .as_ref()
            .and_then(|owners| owners.get(owner?).copied());
        self.markers.push(MapMarker {
            id: format!("{}-{}", kind.prefix(), id),
            latitude,
            longitude,
            kind,
            status,
            title,
            description,
            color,
            owner_color,
        });
    }
}

/// Projects the sources into one flat marker list. Entities without both
/// coordinates produce nothing; no dedup happens across types.
pub fn aggregate(sources: &MapSources, layers: MapLayers, viewer: &Actor) -> Vec<MapMarker> {
    let mut builder = MarkerBuilder {
        markers: Vec::new(),
        owners: viewer.is_admin().then(|| owner_colors(sources)),
    };

    if layers.leads {
        for lead in &sources.leads {
            builder.push(
                MarkerKind::Lead,
                &lead.id,
                (lead.latitude, lead.longitude),
                Some(lead.status.as_str().to_string()),
                lead.full_name(),
                lead.company
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| place(lead.city.as_deref(), lead.state.as_deref())),
                lead.assigned_to_id.as_deref(),
            );
        }
    }

    if layers.contacts {
        for contact in &sources.contacts {
            builder.push(
                MarkerKind::Contact,
                &contact.id,
                (contact.latitude, contact.longitude),
                None,
                format!("{} {}", contact.first_name, contact.last_name),
                place(contact.city.as_deref(), contact.state.as_deref()),
                contact.owner_id.as_deref(),
            );
        }
    }

    if layers.accounts {
        for account in &sources.accounts {
            builder.push(
                MarkerKind::Account,
                &account.id,
                (account.latitude, account.longitude),
                None,
                account.name.clone(),
                account
                    .industry
                    .clone()
                    .filter(|i| !i.trim().is_empty())
                    .unwrap_or_else(|| place(account.billing_city.as_deref(), account.billing_state.as_deref())),
                account.owner_id.as_deref(),
            );
        }
    }

    if layers.activities {
        for activity in &sources.activities {
            let description = match activity.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                Some(notes) => notes.chars().take(50).collect(),
                None => activity.created_at.format("%Y-%m-%d").to_string(),
            };
            builder.push(
                MarkerKind::Activity,
                &activity.id,
                (Some(activity.latitude), Some(activity.longitude)),
                Some(activity.outcome.as_str().to_string()),
                activity.outcome.as_str().replace('_', " "),
                description,
                Some(activity.user_id.as_str()),
            );
        }
    }

    builder.markers
}

/// Loads the viewer's four scoped collections.
pub async fn load_sources(state: &AppState, viewer: &Actor) -> Result<MapSources, CrmError> {
    let scope = viewer.scope();
    let located = |lat: Option<f64>, lng: Option<f64>| lat.is_some() && lng.is_some();

    let leads = state.leads.located(&scope).await?;
    let mut contacts = state.contacts.list(&scope).await?;
    contacts.retain(|c| located(c.latitude, c.longitude));
    let mut accounts = state.accounts.list(&scope).await?;
    accounts.retain(|a| located(a.latitude, a.longitude));
    let activities = state.activities.recent(&scope, state.config.map_activity_limit).await?;

    Ok(MapSources {
        leads,
        contacts,
        accounts,
        activities,
    })
}

/// GET /map
pub async fn map_handler(
    data: web::Data<AppState>,
    actor: Actor,
    layers: web::Query<MapLayers>,
) -> Result<HttpResponse, CrmError> {
    let sources = load_sources(&data, &actor).await?;
    let markers = aggregate(&sources, layers.into_inner(), &actor);
    let stats = MapStats {
        leads: sources.leads.len(),
        contacts: sources.contacts.len(),
        accounts: sources.accounts.len(),
        activities: sources.activities.len(),
    };
    Ok(HttpResponse::Ok().json(MapView { markers, stats }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, Role};
    use crate::test_support::{bearer, seed_user, test_app, test_state};
    use actix_web::test as actix_test;
    use chrono::Utc;
    use serde_json::Value;

    fn lead(owner: &str, coords: Option<(f64, f64)>) -> Lead {
        let mut lead = Lead::new("Ada", "Lovelace", Utc::now());
        lead.assigned_to_id = Some(owner.to_string());
        lead.city = Some("Austin".into());
        lead.state = Some("TX".into());
        lead.latitude = coords.map(|c| c.0);
        lead.longitude = coords.map(|c| c.1);
        lead
    }

    fn activity(user: &str, notes: Option<&str>) -> DoorActivity {
        DoorActivity {
            id: "a1".into(),
            outcome: Outcome::SpokeWithResident,
            notes: notes.map(str::to_string),
            left_materials: false,
            materials_type: None,
            latitude: 30.0,
            longitude: -97.0,
            photo_url: None,
            user_id: user.into(),
            lead_id: "l1".into(),
            contact_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn entities_without_coordinates_are_not_drawn() {
        let mut half = lead("rep-1", Some((30.0, -97.0)));
        half.longitude = None;
        let sources = MapSources {
            leads: vec![lead("rep-1", None), half, lead("rep-1", Some((30.0, -97.0)))],
            ..Default::default()
        };
        let markers = aggregate(&sources, MapLayers::default(), &Actor::new("rep-1", Role::Rep));
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].title, "Ada Lovelace");
        assert_eq!(markers[0].description, "Austin, TX");
        assert_eq!(markers[0].color, "#3b82f6");
        assert_eq!(markers[0].owner_color, None);
    }

    #[test]
    fn layers_toggle_independently() {
        let sources = MapSources {
            leads: vec![lead("rep-1", Some((1.0, 1.0)))],
            activities: vec![activity("rep-1", Some("Talked about solar panels on the garage roof and the side shed"))],
            ..Default::default()
        };
        let viewer = Actor::new("rep-1", Role::Rep);

        let defaults = aggregate(&sources, MapLayers::default(), &viewer);
        assert!(defaults.iter().all(|m| m.kind == MarkerKind::Lead));

        let only_activities = MapLayers {
            leads: false,
            contacts: false,
            accounts: false,
            activities: true,
        };
        let markers = aggregate(&sources, only_activities, &viewer);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id, "activity-a1");
        assert_eq!(markers[0].title, "SPOKE WITH RESIDENT");
        assert_eq!(markers[0].description.chars().count(), 50);
        assert_eq!(markers[0].color, "#6366f1");
    }

    #[test]
    fn admins_get_owner_colors_in_first_seen_order() {
        let sources = MapSources {
            leads: vec![lead("rep-2", Some((1.0, 1.0))), lead("rep-1", Some((2.0, 2.0)))],
            activities: vec![activity("rep-2", None), activity("rep-3", None)],
            ..Default::default()
        };
        let markers = aggregate(
            &sources,
            MapLayers {
                activities: true,
                ..Default::default()
            },
            &Actor::new("admin", Role::Admin),
        );
        let colors: Vec<_> = markers.iter().map(|m| m.owner_color).collect();
        assert_eq!(
            colors,
            [
                Some(OWNER_PALETTE[0]),
                Some(OWNER_PALETTE[1]),
                Some(OWNER_PALETTE[0]),
                Some(OWNER_PALETTE[2])
            ]
        );
    }

    #[test]
    fn palette_cycles_past_ten_owners() {
        let leads = (0..12)
            .map(|i| lead(&format!("rep-{}", i), Some((1.0, 1.0))))
            .collect();
        let sources = MapSources {
            leads,
            ..Default::default()
        };
        let markers = aggregate(&sources, MapLayers::default(), &Actor::new("admin", Role::Admin));
        assert_eq!(markers[10].owner_color, Some(OWNER_PALETTE[0]));
        assert_eq!(markers[11].owner_color, Some(OWNER_PALETTE[1]));
    }

    #[actix_web::test]
    async fn map_endpoint_is_scoped_and_reports_stats() {
        let state = test_state();
        let rep = seed_user(&state, "Rep", Role::Rep).await;
        let other = seed_user(&state, "Other", Role::Rep).await;
        state.leads.insert(&lead(&rep.id, Some((1.0, 1.0)))).await.unwrap();
        state.leads.insert(&lead(&rep.id, None)).await.unwrap();
        state.leads.insert(&lead(&other.id, Some((2.0, 2.0)))).await.unwrap();
        let app = actix_test::init_service(test_app(state.clone())).await;

        let req = actix_test::TestRequest::get()
            .uri("/map?contacts=false&activities=true")
            .insert_header(bearer(&state, &rep))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stats"]["leads"], 1);
        assert_eq!(body["markers"].as_array().unwrap().len(), 1);
        assert_eq!(body["markers"][0]["type"], "lead");
        assert!(body["markers"][0]["ownerColor"].is_null());
    }
}

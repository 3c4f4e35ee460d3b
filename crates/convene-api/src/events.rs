use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveTime;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use convene_db::Store;
use convene_db::models::{EventChanges, EventRow, NewEvent, ParticipantRow};
use convene_types::api::{
    ActingUserQuery, CreatedResponse, EventRequest, ListEventsQuery, MessageResponse,
};
use convene_types::is_admin;
use convene_types::models::{EventView, HostRef};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Event CRUD and the host/participants projection.
pub struct Events<'a> {
    store: &'a dyn Store,
}

impl<'a> Events<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub fn create(&self, req: &EventRequest) -> ApiResult<i64> {
        if req.name.trim().is_empty() {
            return Err(ApiError::invalid("Event name is required"));
        }
        validate_schedule(&req.time, req.end_time.as_deref())?;

        let event = NewEvent {
            name: req.name.trim().to_string(),
            description: req.description.clone(),
            location: req.location.clone(),
            venue: req.venue.clone(),
            address: req.address.clone(),
            coordinates: encode_coordinates(req.coordinates.as_ref()),
            date: req.date.clone(),
            time: req.time.clone(),
            end_time: non_blank(req.end_time.as_deref()),
            category: req.category.clone(),
            subcategory: non_blank(req.subcategory.as_deref()),
            languages: encode_json(&req.languages)?,
            is_public: req.is_public,
            event_type: req.event_type.clone(),
            capacity: req.capacity,
            image_url: req.image_url.clone(),
            created_by: non_blank(req.created_by.as_deref()),
            is_featured: req.is_featured,
            template_event_id: req.template_event_id,
            target_interests: req.target_interests.as_ref().map(encode_json).transpose()?,
            target_cite_connection: req
                .target_cite_connection
                .as_ref()
                .map(encode_json)
                .transpose()?,
            target_reasons: req.target_reasons.as_ref().map(encode_json).transpose()?,
        };

        let id = self.store.create_event(&event)?;
        info!(
            "Created event {} '{}' hosted by {}",
            id,
            event.name,
            event.created_by.as_deref().unwrap_or("nobody")
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> ApiResult<EventView> {
        let row = self
            .store
            .get_event(id)?
            .ok_or_else(|| ApiError::not_found("Event not found"))?;
        let mut views = self.assemble(vec![row])?;
        views
            .pop()
            .ok_or_else(|| ApiError::not_found("Event not found"))
    }

    pub fn list(&self, include_archived: bool) -> ApiResult<Vec<EventView>> {
        let rows = self.store.list_public_events(include_archived)?;
        self.assemble(rows)
    }

    pub fn list_for_user(&self, username: &str) -> ApiResult<Vec<EventView>> {
        let rows = self.store.list_events_for_participant(username.trim())?;
        self.assemble(rows)
    }

    /// Replaces the mutable fields. `acting_user` falls back to the body's
    /// `created_by`, which is only used for the permission check.
    pub fn update(&self, id: i64, req: &EventRequest, acting_user: Option<&str>) -> ApiResult<()> {
        let event = self.require(id)?;
        ensure_can_modify(&event, acting_user.or(req.created_by.as_deref()))?;

        if req.name.trim().is_empty() {
            return Err(ApiError::invalid("Event name is required"));
        }
        validate_schedule(&req.time, req.end_time.as_deref())?;

        let changes = EventChanges {
            name: req.name.trim().to_string(),
            description: req.description.clone(),
            location: req.location.clone(),
            venue: req.venue.clone(),
            address: req.address.clone(),
            coordinates: encode_coordinates(req.coordinates.as_ref()),
            date: req.date.clone(),
            time: req.time.clone(),
            end_time: non_blank(req.end_time.as_deref()),
            category: req.category.clone(),
            subcategory: non_blank(req.subcategory.as_deref()),
            languages: encode_json(&req.languages)?,
            capacity: req.capacity,
            image_url: req.image_url.clone(),
        };

        if !self.store.update_event(id, &changes)? {
            return Err(ApiError::not_found("Event not found"));
        }
        info!("Updated event {}", id);
        Ok(())
    }

    pub fn delete(&self, id: i64, acting_user: Option<&str>) -> ApiResult<()> {
        let event = self.require(id)?;
        ensure_can_modify(&event, acting_user)?;

        if !self.store.delete_event(id)? {
            return Err(ApiError::not_found("Event not found"));
        }
        info!("Deleted event {}", id);
        Ok(())
    }

    pub fn set_archived(&self, id: i64, acting_user: Option<&str>, archived: bool) -> ApiResult<()> {
        let event = self.require(id)?;
        ensure_can_modify(&event, acting_user)?;

        if !self.store.set_event_archived(id, archived)? {
            return Err(ApiError::not_found("Event not found"));
        }
        info!("Event {} archived={}", id, archived);
        Ok(())
    }

    fn require(&self, id: i64) -> ApiResult<EventRow> {
        self.store
            .get_event(id)?
            .ok_or_else(|| ApiError::not_found("Event not found"))
    }

    /// Builds views for a batch of rows with a single participant query.
    fn assemble(&self, rows: Vec<EventRow>) -> ApiResult<Vec<EventView>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut by_event: HashMap<i64, Vec<ParticipantRow>> = HashMap::new();
        for p in self.store.participants_for_events(&ids)? {
            by_event.entry(p.event_id).or_default().push(p);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let participants = by_event.remove(&row.id).unwrap_or_default();
                event_view(row, &participants)
            })
            .collect())
    }
}

/// Host or admin only. A missing acting user is always refused.
pub fn ensure_can_modify(event: &EventRow, acting_user: Option<&str>) -> ApiResult<()> {
    let acting = acting_user.map(str::trim).unwrap_or_default();
    let is_creator = !acting.is_empty() && event.created_by.as_deref() == Some(acting);
    if is_creator || is_admin(acting) {
        return Ok(());
    }
    Err(ApiError::Forbidden(
        "Only the host or admin can modify this event".into(),
    ))
}

/// Start and end must differ. An end before the start crosses midnight.
pub fn validate_schedule(start: &str, end: Option<&str>) -> ApiResult<()> {
    let start = start.trim();
    let end = end.map(str::trim).unwrap_or_default();
    if start.is_empty() || end.is_empty() {
        return Ok(());
    }

    match (parse_clock(start), parse_clock(end)) {
        (Some(s), Some(e)) => {
            if s == e {
                return Err(ApiError::invalid("End time must differ from start time"));
            }
            if e < s {
                debug!("Event runs past midnight: {} -> {}", start, end);
            }
        }
        _ => {
            if start == end {
                return Err(ApiError::invalid("End time must differ from start time"));
            }
        }
    }
    Ok(())
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

fn event_view(row: EventRow, participants: &[ParticipantRow]) -> EventView {
    let host = participants
        .iter()
        .find(|p| p.is_host)
        .map(|p| HostRef {
            name: p.username.clone(),
        });
    let members: Vec<String> = participants
        .iter()
        .filter(|p| !p.is_host)
        .map(|p| p.username.clone())
        .collect();

    let id = row.id;
    EventView {
        id,
        name: row.name,
        description: row.description.unwrap_or_default(),
        location: row.location.unwrap_or_default(),
        venue: row.venue.unwrap_or_default(),
        address: row.address.unwrap_or_default(),
        coordinates: decode_json(id, "coordinates", row.coordinates.as_deref()),
        date: row.date.unwrap_or_default(),
        time: row.time.unwrap_or_default(),
        end_time: row.end_time,
        category: row.category.unwrap_or_default(),
        subcategory: row.subcategory,
        languages: decode_json(id, "languages", row.languages.as_deref()).unwrap_or_default(),
        is_public: row.is_public,
        event_type: row.event_type.unwrap_or_else(|| "custom".to_string()),
        capacity: row.capacity,
        image_url: row.image_url.unwrap_or_default(),
        created_by: row.created_by,
        is_featured: row.is_featured,
        is_archived: row.is_archived,
        template_event_id: row.template_event_id,
        target_interests: decode_json(id, "target_interests", row.target_interests.as_deref()),
        target_cite_connection: decode_json(
            id,
            "target_cite_connection",
            row.target_cite_connection.as_deref(),
        ),
        target_reasons: decode_json(id, "target_reasons", row.target_reasons.as_deref()),
        created_at: row.created_at,
        host,
        crew: members.clone(),
        participants: members,
    }
}

/// Stored JSON that fails to decode is logged and treated as absent.
fn decode_json<T: DeserializeOwned>(event_id: i64, field: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Corrupt {} on event {}: {}", field, event_id, e);
            None
        }
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> ApiResult<String> {
    serde_json::to_string(value).map_err(|e| ApiError::Internal(e.into()))
}

fn encode_coordinates(value: Option<&serde_json::Value>) -> Option<String> {
    value.filter(|v| !v.is_null()).map(|v| v.to_string())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// -- Handlers --

pub async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> ApiResult<Json<CreatedResponse>> {
    let id = state.run(move |store| Events::new(store).create(&req)).await?;
    Ok(Json(CreatedResponse {
        id,
        message: "Event created".into(),
    }))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> ApiResult<Json<Vec<EventView>>> {
    let events = state
        .run(move |store| Events::new(store).list(query.include_archived))
        .await?;
    Ok(Json(events))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<EventView>> {
    let event = state.run(move |store| Events::new(store).get(id)).await?;
    Ok(Json(event))
}

pub async fn user_events(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<EventView>>> {
    let events = state
        .run(move |store| Events::new(store).list_for_user(&username))
        .await?;
    Ok(Json(events))
}

pub async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(acting): Query<ActingUserQuery>,
    Json(req): Json<EventRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| Events::new(store).update(id, &req, acting.username.as_deref()))
        .await?;
    Ok(Json(MessageResponse::new("Event updated")))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(acting): Query<ActingUserQuery>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| Events::new(store).delete(id, acting.username.as_deref()))
        .await?;
    Ok(Json(MessageResponse::new("Event deleted")))
}

pub async fn archive_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(acting): Query<ActingUserQuery>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| Events::new(store).set_archived(id, acting.username.as_deref(), true))
        .await?;
    Ok(Json(MessageResponse::new("Event archived")))
}

pub async fn unarchive_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(acting): Query<ActingUserQuery>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| Events::new(store).set_archived(id, acting.username.as_deref(), false))
        .await?;
    Ok(Json(MessageResponse::new("Event unarchived")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_db::SqliteStore;

    fn request(host: &str) -> EventRequest {
        EventRequest {
            name: "Board games".into(),
            date: "2025-03-14".into(),
            time: "19:00".into(),
            end_time: Some("21:00".into()),
            languages: vec!["fr".into(), "en".into()],
            created_by: Some(host.into()),
            ..Default::default()
        }
    }

    #[test]
    fn create_then_get_projects_host_and_crew() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let id = events.create(&request("Kat")).unwrap();
        store.add_participant(id, "Zine", false).unwrap();

        let view = events.get(id).unwrap();
        assert_eq!(view.host, Some(HostRef { name: "Kat".into() }));
        assert_eq!(view.participants, vec!["Zine".to_string()]);
        assert_eq!(view.crew, view.participants);
        assert_eq!(view.languages, vec!["fr".to_string(), "en".to_string()]);
        assert!(view.is_public);
        assert!(!view.is_featured);
        assert!(!view.is_archived);
        assert_eq!(view.event_type, "custom");
    }

    #[test]
    fn projection_uses_camel_case_names() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let id = events.create(&request("Kat")).unwrap();

        let json = serde_json::to_value(events.get(id).unwrap()).unwrap();
        assert_eq!(json["endTime"], "21:00");
        assert_eq!(json["isPublic"], true);
        assert_eq!(json["type"], "custom");
        assert_eq!(json["createdBy"], "Kat");
        assert_eq!(json["host"]["name"], "Kat");
    }

    #[test]
    fn missing_event_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            Events::new(&store).get(404).unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[test]
    fn blank_name_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut req = request("Kat");
        req.name = "   ".into();
        assert!(matches!(
            Events::new(&store).create(&req).unwrap_err(),
            ApiError::InvalidInput(_)
        ));
    }

    #[test]
    fn equal_start_and_end_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut req = request("Kat");
        req.end_time = Some("19:00".into());
        assert!(matches!(
            Events::new(&store).create(&req).unwrap_err(),
            ApiError::InvalidInput(_)
        ));
        assert!(validate_schedule("19:00", Some("19:00:00")).is_err());
    }

    #[test]
    fn cross_midnight_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let mut req = request("Kat");
        req.time = "22:30".into();
        req.end_time = Some("02:00".into());

        let id = events.create(&req).unwrap();
        let view = events.get(id).unwrap();
        assert_eq!(view.time, "22:30");
        assert_eq!(view.end_time.as_deref(), Some("02:00"));
    }

    #[test]
    fn schedule_without_end_is_accepted() {
        assert!(validate_schedule("19:00", None).is_ok());
        assert!(validate_schedule("19:00", Some("  ")).is_ok());
        assert!(validate_schedule("evening", Some("late")).is_ok());
        assert!(validate_schedule("evening", Some("evening")).is_err());
    }

    #[test]
    fn update_requires_host_or_admin() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let id = events.create(&request("Kat")).unwrap();

        let mut changes = request("Kat");
        changes.name = "Chess night".into();
        changes.created_by = None;

        let err = events.update(id, &changes, Some("Zine")).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        let err = events.update(id, &changes, None).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        events.update(id, &changes, Some("Kat")).unwrap();
        assert_eq!(events.get(id).unwrap().name, "Chess night");

        changes.name = "Go night".into();
        events.update(id, &changes, Some("Admin")).unwrap();
        assert_eq!(events.get(id).unwrap().name, "Go night");
    }

    #[test]
    fn update_keeps_immutable_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let id = events.create(&request("Kat")).unwrap();

        let mut changes = request("Kat");
        changes.is_public = false;
        changes.is_featured = true;
        changes.end_time = Some("23:00".into());
        changes.subcategory = Some("strategy".into());
        events.update(id, &changes, None).unwrap();

        let view = events.get(id).unwrap();
        assert!(view.is_public);
        assert!(!view.is_featured);
        assert_eq!(view.created_by.as_deref(), Some("Kat"));
        assert_eq!(view.end_time.as_deref(), Some("23:00"));
        assert_eq!(view.subcategory.as_deref(), Some("strategy"));
    }

    #[test]
    fn update_of_missing_event_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = Events::new(&store)
            .update(9, &request("Kat"), Some("admin"))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn delete_checks_permission() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let id = events.create(&request("Kat")).unwrap();

        assert!(matches!(
            events.delete(id, Some("Zine")).unwrap_err(),
            ApiError::Forbidden(_)
        ));
        events.delete(id, Some("ADMIN")).unwrap();
        assert!(matches!(events.get(id).unwrap_err(), ApiError::NotFound(_)));
    }

    #[test]
    fn archived_events_hidden_unless_requested() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events = Events::new(&store);
        let kept = events.create(&request("Kat")).unwrap();
        let archived = events.create(&request("Kat")).unwrap();
        events.set_archived(archived, Some("Kat"), true).unwrap();

        let ids: Vec<i64> = events.list(false).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![kept]);
        let ids: Vec<i64> = events.list(true).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![kept, archived]);

        events.set_archived(archived, Some("Kat"), false).unwrap();
        assert_eq!(events.list(false).unwrap().len(), 2);
    }

    #[test]
    fn corrupt_stored_json_falls_back_to_defaults() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create_event(&NewEvent {
                name: "Legacy".into(),
                languages: "not json".into(),
                coordinates: Some("{broken".into()),
                is_public: true,
                ..Default::default()
            })
            .unwrap();

        let view = Events::new(&store).get(id).unwrap();
        assert!(view.languages.is_empty());
        assert_eq!(view.coordinates, None);
        assert_eq!(view.host, None);
    }
}

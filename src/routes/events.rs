use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection, Params};
use serde::Deserialize;
use serde_json::json;

use crate::db::membership::{self, JoinTable};
use crate::db::models::{Event, User};
use crate::error::{AppError, AppResult, FieldErrors, OptionalRow};
use crate::extractors::{BaseUrl, CurrentUser, IdPath, JsonBody};
use crate::routes::users::UserView;
use crate::routes::{created, no_content, toggled, SearchQuery};
use crate::state::AppState;
use crate::validation::{self, format_datetime, Presence};

const NEWEST_START: &str = "ORDER BY e.start_time DESC, e.id DESC";
const NEWEST_CREATED: &str = "ORDER BY e.created_at DESC, e.id DESC";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events/", get(list_events).post(create_event))
        .route("/api/events/search/", get(search_events))
        .route("/api/events/user/{user_id}/", get(user_events))
        .route(
            "/api/events/{pk}/",
            get(get_event)
                .put(replace_event)
                .patch(patch_event)
                .delete(delete_event),
        )
        .route("/api/events/{pk}/interest/", post(toggle_interest))
        .route("/api/events/{pk}/attendees/", get(attendees))
        .route("/api/events/{pk}/attendees/stats/", get(attendee_stats))
}

#[derive(Debug, Deserialize, Default)]
pub struct EventInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Default)]
struct EventChanges {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

/// Validate the supplied fields. `stored` holds the current (start, end) of an
/// event being edited, so a partial update is still checked as a whole.
fn validate(
    input: EventInput,
    presence: Presence,
    stored: Option<(&str, &str)>,
) -> AppResult<EventChanges> {
    let mut errors = FieldErrors::new();
    let changes = EventChanges {
        title: validation::text(&mut errors, "title", input.title, presence, Some(255)),
        description: validation::text(&mut errors, "description", input.description, presence, None),
        location: validation::text(&mut errors, "location", input.location, presence, Some(255)),
        start_time: validation::datetime(&mut errors, "start_time", input.start_time, presence)
            .map(|dt| format_datetime(&dt)),
        end_time: validation::datetime(&mut errors, "end_time", input.end_time, presence)
            .map(|dt| format_datetime(&dt)),
    };

    // Timestamps share one fixed-width UTC format, so string order is time order.
    let start = changes.start_time.as_deref().or(stored.map(|s| s.0));
    let end = changes.end_time.as_deref().or(stored.map(|s| s.1));
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            errors.add("end_time", "End time must be after start time.");
        }
    }

    errors.into_result()?;
    Ok(changes)
}

/// GET /api/events/
async fn list_events(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<Event>>> {
    let conn = state.db.get()?;
    Ok(Json(query_events(&conn, "", NEWEST_START, [])?))
}

/// POST /api/events/
async fn create_event(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<EventInput>,
) -> AppResult<Response> {
    let event = validate(input, Presence::Required, None)?;

    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO events (title, description, location, start_time, end_time, created_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.title,
            event.description,
            event.location,
            event.start_time,
            event.end_time,
            user.id
        ],
    )?;
    let event = Event::find(&conn, conn.last_insert_rowid())?;
    tracing::info!(event_id = event.id, created_by = user.id, "event created");
    Ok(created(event))
}

/// GET /api/events/{pk}/
async fn get_event(
    State(state): State<AppState>,
    _user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Json<Event>> {
    let conn = state.db.get()?;
    Ok(Json(Event::find(&conn, pk).or_not_found()?))
}

async fn replace_event(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<EventInput>,
) -> AppResult<Json<Event>> {
    edit_event(&state, &user, pk, input, Presence::Required)
}

async fn patch_event(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<EventInput>,
) -> AppResult<Json<Event>> {
    edit_event(&state, &user, pk, input, Presence::Partial)
}

fn edit_event(
    state: &AppState,
    user: &CurrentUser,
    pk: i64,
    input: EventInput,
    presence: Presence,
) -> AppResult<Json<Event>> {
    let conn = state.db.get()?;
    let event = Event::find(&conn, pk).or_not_found()?;
    if event.created_by != user.id {
        return Err(AppError::Forbidden(
            "You can only edit your own event.".into(),
        ));
    }

    let changes = validate(
        input,
        presence,
        Some((event.start_time.as_str(), event.end_time.as_str())),
    )?;
    conn.execute(
        "UPDATE events SET \
             title = COALESCE(?1, title), \
             description = COALESCE(?2, description), \
             location = COALESCE(?3, location), \
             start_time = COALESCE(?4, start_time), \
             end_time = COALESCE(?5, end_time) \
         WHERE id = ?6",
        params![
            changes.title,
            changes.description,
            changes.location,
            changes.start_time,
            changes.end_time,
            pk
        ],
    )?;
    Ok(Json(Event::find(&conn, pk)?))
}

/// DELETE /api/events/{pk}/
async fn delete_event(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let event = Event::find(&conn, pk).or_not_found()?;
    if event.created_by != user.id {
        return Err(AppError::Forbidden(
            "You can only delete your own event.".into(),
        ));
    }
    conn.execute("DELETE FROM events WHERE id = ?1", params![pk])?;
    tracing::info!(event_id = pk, "event deleted");
    Ok(no_content())
}

/// GET /api/events/user/{user_id}/
async fn user_events(
    State(state): State<AppState>,
    IdPath(user_id): IdPath,
) -> AppResult<Json<Vec<Event>>> {
    let conn = state.db.get()?;
    if !User::exists(&conn, user_id)? {
        return Err(AppError::NotFound);
    }
    Ok(Json(query_events(
        &conn,
        "WHERE e.created_by = ?1",
        NEWEST_CREATED,
        params![user_id],
    )?))
}

/// GET /api/events/search/?q=: matches on title
async fn search_events(
    State(state): State<AppState>,
    Query(search): Query<SearchQuery>,
) -> AppResult<Json<Vec<Event>>> {
    let conn = state.db.get()?;
    Ok(Json(query_events(
        &conn,
        "WHERE icontains(e.title, ?1)",
        NEWEST_CREATED,
        params![search.q],
    )?))
}

/// POST /api/events/{pk}/interest/
async fn toggle_interest(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    Event::find(&conn, pk).or_not_found()?;
    let result = membership::toggle(&conn, JoinTable::EventInterest, pk, user.id)?;
    tracing::debug!(event_id = pk, user_id = user.id, ?result, "event interest toggled");
    Ok(toggled(result, "Interest shown", "Interest removed"))
}

/// GET /api/events/{pk}/attendees/stats/
async fn attendee_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    Event::find(&conn, pk).or_not_found()?;
    let count = membership::count(&conn, JoinTable::EventInterest, pk)?;
    Ok(Json(json!({ "event_id": pk, "attendees_count": count })))
}

/// GET /api/events/{pk}/attendees/
async fn attendees(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<Vec<UserView>>> {
    let conn = state.db.get()?;
    Event::find(&conn, pk).or_not_found()?;
    let users = membership::members(&conn, JoinTable::EventInterest, pk)?;
    Ok(Json(UserView::many(&users, &base)))
}

fn query_events<P: Params>(
    conn: &Connection,
    filter: &str,
    order: &str,
    params: P,
) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!("{} {} {}", Event::SELECT, filter, order))?;
    let events = stmt
        .query_map(params, Event::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

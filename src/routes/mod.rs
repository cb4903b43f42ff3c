pub mod auth;
pub mod chat;
pub mod docs;
pub mod events;
pub mod home;
pub mod jobs;
pub mod media;
pub mod posts;
pub mod users;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::membership::Toggle;
use crate::state::AppState;

/// The full application: every API area, docs, media and the welcome page.
pub fn app(state: AppState) -> Router {
    let max_upload = state.config.storage.max_upload_bytes;
    let allow_all_origins = state.config.cors.allow_all_origins;

    let mut app = Router::new()
        .route("/", get(home::index))
        .merge(docs::router())
        .merge(media::router())
        .merge(auth::router())
        .merge(posts::router())
        .merge(jobs::router())
        .merge(events::router())
        .merge(chat::router())
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http());

    if allow_all_origins {
        app = app.layer(CorsLayer::permissive());
    }

    app.with_state(state)
}

/// `?q=` for the search endpoints; a missing query matches everything.
#[derive(Debug, Deserialize, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// 201 when a membership was created, 200 when it was removed.
pub fn toggled(result: Toggle, added: &str, removed: &str) -> Response {
    match result {
        Toggle::Added => message(StatusCode::CREATED, added),
        Toggle::Removed => message(StatusCode::OK, removed),
    }
}

pub fn created<T: serde::Serialize>(body: T) -> Response {
    (StatusCode::CREATED, Json(body)).into_response()
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::models::{ChatMessage, User};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::extractors::{BaseUrl, CurrentUser, IdPath, JsonBody};
use crate::routes::created;
use crate::routes::users::UserView;
use crate::state::AppState;
use crate::validation::{self, Presence};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/send/", post(send))
        .route("/api/chat/{user_id}/", get(conversation))
        .route("/api/chat/{user_id}/send/", post(send_to))
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub message: String,
    pub sender: UserView,
    pub receiver: UserView,
    pub timestamp: String,
}

impl MessageView {
    fn load(conn: &Connection, msg: ChatMessage, base: &BaseUrl) -> rusqlite::Result<Self> {
        let sender = User::find(conn, msg.sender_id)?;
        let receiver = User::find(conn, msg.receiver_id)?;
        Ok(Self {
            id: msg.id,
            message: msg.message,
            sender: UserView::new(&sender, base),
            receiver: UserView::new(&receiver, base),
            timestamp: msg.timestamp,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SendInput {
    pub receiver_id: Option<i64>,
    pub message: Option<String>,
}

/// GET /api/chat/{user_id}/: both directions, oldest first
async fn conversation(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    IdPath(user_id): IdPath,
) -> AppResult<Json<Vec<MessageView>>> {
    let conn = state.db.get()?;
    if !User::exists(&conn, user_id)? {
        return Err(AppError::NotFound);
    }

    let messages = between(&conn, user.id, user_id)?;
    let views = messages
        .into_iter()
        .map(|m| MessageView::load(&conn, m, &base))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

/// POST /api/chat/{user_id}/send/
async fn send_to(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    IdPath(user_id): IdPath,
    JsonBody(input): JsonBody<SendInput>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    let text = validation::text(&mut errors, "message", input.message, Presence::Required, None);
    errors.into_result()?;

    let conn = state.db.get()?;
    if !User::exists(&conn, user_id)? {
        return Err(AppError::NotFound);
    }
    deliver(&conn, &user, user_id, text, &base)
}

/// POST /api/chat/send/: receiver given in the body
async fn send(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    JsonBody(input): JsonBody<SendInput>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    let mut errors = FieldErrors::new();
    let text = validation::text(&mut errors, "message", input.message, Presence::Required, None);
    match input.receiver_id {
        None => errors.add("receiver_id", validation::REQUIRED),
        Some(id) if !User::exists(&conn, id)? => errors.add(
            "receiver_id",
            format!("Invalid pk \"{}\" - object does not exist.", id),
        ),
        Some(_) => {}
    }
    errors.into_result()?;

    let receiver = input
        .receiver_id
        .ok_or_else(|| AppError::field("receiver_id", validation::REQUIRED))?;
    deliver(&conn, &user, receiver, text, &base)
}

fn deliver(
    conn: &Connection,
    sender: &CurrentUser,
    receiver_id: i64,
    text: Option<String>,
    base: &BaseUrl,
) -> AppResult<Response> {
    let text = text.ok_or_else(|| AppError::field("message", validation::REQUIRED))?;
    conn.execute(
        "INSERT INTO chat_messages (sender_id, receiver_id, message) VALUES (?1, ?2, ?3)",
        params![sender.id, receiver_id, text],
    )?;
    let msg = ChatMessage::find(conn, conn.last_insert_rowid())?;
    tracing::debug!(message_id = msg.id, sender_id = sender.id, receiver_id, "chat message sent");
    Ok(created(MessageView::load(conn, msg, base)?))
}

fn between(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM chat_messages m \
         WHERE (m.sender_id = ?1 AND m.receiver_id = ?2) \
            OR (m.sender_id = ?2 AND m.receiver_id = ?1) \
         ORDER BY m.timestamp ASC, m.id ASC",
        ChatMessage::COLUMNS
    ))?;
    let messages = stmt
        .query_map(params![a, b], ChatMessage::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

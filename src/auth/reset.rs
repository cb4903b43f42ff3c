use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::auth::tokens::generate_token;
use crate::config::AuthConfig;

#[derive(Debug, Clone, Serialize)]
pub struct ResetLink {
    pub reset_link: String,
    pub uid: String,
    pub token: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResetCheck {
    Valid(i64),
    InvalidUid,
    InvalidToken,
}

/// Opaque user reference for reset links: the user id's decimal digits, hex encoded.
pub fn encode_uid(user_id: i64) -> String {
    hex::encode(user_id.to_string())
}

pub fn decode_uid(uid: &str) -> Option<i64> {
    let bytes = hex::decode(uid).ok()?;
    String::from_utf8(bytes).ok()?.parse().ok()
}

pub fn create_reset_link(
    conn: &Connection,
    user_id: i64,
    config: &AuthConfig,
) -> rusqlite::Result<ResetLink> {
    let token = generate_token();
    conn.execute(
        "INSERT INTO password_reset_tokens (token, user_id, expires_at) \
         VALUES (?1, ?2, datetime('now', ?3))",
        params![token, user_id, format!("+{} hours", config.reset_token_hours)],
    )?;

    let uid = encode_uid(user_id);
    let reset_link = format!(
        "{}/reset-password/{}/{}",
        config.frontend_base_url.trim_end_matches('/'),
        uid,
        token
    );
    Ok(ResetLink {
        reset_link,
        uid,
        token,
    })
}

/// Check a (uid, token) pair without consuming it.
pub fn check_reset_token(conn: &Connection, uid: &str, token: &str) -> rusqlite::Result<ResetCheck> {
    let Some(user_id) = decode_uid(uid) else {
        return Ok(ResetCheck::InvalidUid);
    };
    let user_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    if !user_exists {
        return Ok(ResetCheck::InvalidUid);
    }

    let matched: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM password_reset_tokens \
             WHERE token = ?1 AND user_id = ?2 AND expires_at > datetime('now')",
            params![token, user_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(match matched {
        Some(id) => ResetCheck::Valid(id),
        None => ResetCheck::InvalidToken,
    })
}

/// Invalidate every outstanding reset token for a user; called whenever the password changes.
pub fn clear_reset_tokens(conn: &Connection, user_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM password_reset_tokens WHERE user_id = ?1",
        params![user_id],
    )
}

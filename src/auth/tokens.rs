use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }

    fn lifetime(self, config: &AuthConfig) -> String {
        match self {
            TokenKind::Access => format!("+{} minutes", config.access_token_minutes),
            TokenKind::Refresh => format!("+{} hours", config.refresh_token_hours),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

/// Generate a cryptographically random 32-byte hex token.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

fn issue(
    conn: &Connection,
    user_id: i64,
    kind: TokenKind,
    config: &AuthConfig,
) -> rusqlite::Result<String> {
    let token = generate_token();
    conn.execute(
        "INSERT INTO auth_tokens (token, user_id, kind, expires_at) \
         VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![token, user_id, kind.as_str(), kind.lifetime(config)],
    )?;
    Ok(token)
}

/// Issue a fresh refresh/access pair for a user that just logged in.
pub fn issue_pair(
    conn: &Connection,
    user_id: i64,
    config: &AuthConfig,
) -> rusqlite::Result<TokenPair> {
    let refresh = issue(conn, user_id, TokenKind::Refresh, config)?;
    let access = issue(conn, user_id, TokenKind::Access, config)?;
    Ok(TokenPair { refresh, access })
}

/// Resolve an unexpired token of the given kind to its user id.
pub fn lookup(conn: &Connection, token: &str, kind: TokenKind) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT user_id FROM auth_tokens \
         WHERE token = ?1 AND kind = ?2 AND expires_at > datetime('now')",
        params![token, kind.as_str()],
        |row| row.get(0),
    )
    .optional()
}

/// Exchange a valid refresh token for a new access token.
/// Returns `None` when the refresh token is unknown or expired.
pub fn refresh_access(
    conn: &Connection,
    refresh: &str,
    config: &AuthConfig,
) -> rusqlite::Result<Option<String>> {
    match lookup(conn, refresh, TokenKind::Refresh)? {
        Some(user_id) => issue(conn, user_id, TokenKind::Access, config).map(Some),
        None => Ok(None),
    }
}

/// Delete a token. Returns whether anything was removed.
pub fn revoke(conn: &Connection, token: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM auth_tokens WHERE token = ?1", params![token])?;
    Ok(rows > 0)
}

/// Drop expired tokens of every kind.
pub fn purge_expired(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM auth_tokens WHERE expires_at <= datetime('now')",
        [],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_user, test_pool};

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn issued_pair_resolves_by_kind() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");
        let pair = issue_pair(&conn, alice, &AuthConfig::default()).unwrap();

        assert_eq!(lookup(&conn, &pair.access, TokenKind::Access).unwrap(), Some(alice));
        assert_eq!(lookup(&conn, &pair.refresh, TokenKind::Refresh).unwrap(), Some(alice));
        // A refresh token is not an access token and vice versa.
        assert_eq!(lookup(&conn, &pair.refresh, TokenKind::Access).unwrap(), None);
        assert_eq!(lookup(&conn, &pair.access, TokenKind::Refresh).unwrap(), None);
    }

    #[test]
    fn refresh_issues_new_access_token() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");
        let config = AuthConfig::default();
        let pair = issue_pair(&conn, alice, &config).unwrap();

        let access = refresh_access(&conn, &pair.refresh, &config).unwrap().unwrap();
        assert_ne!(access, pair.access);
        assert_eq!(lookup(&conn, &access, TokenKind::Access).unwrap(), Some(alice));

        assert!(refresh_access(&conn, "bogus", &config).unwrap().is_none());
        assert!(refresh_access(&conn, &pair.access, &config).unwrap().is_none());
    }

    #[test]
    fn expired_tokens_do_not_resolve() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");
        conn.execute(
            "INSERT INTO auth_tokens (token, user_id, kind, expires_at) \
             VALUES ('stale', ?1, 'access', datetime('now', '-1 minutes'))",
            params![alice],
        )
        .unwrap();

        assert_eq!(lookup(&conn, "stale", TokenKind::Access).unwrap(), None);
        assert_eq!(purge_expired(&conn).unwrap(), 1);
    }

    #[test]
    fn revoked_refresh_token_stops_working() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");
        let config = AuthConfig::default();
        let pair = issue_pair(&conn, alice, &config).unwrap();

        assert!(revoke(&conn, &pair.refresh).unwrap());
        assert!(!revoke(&conn, &pair.refresh).unwrap());
        assert!(refresh_access(&conn, &pair.refresh, &config).unwrap().is_none());
    }
}

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;

use crate::auth::password::{check_password_rules, hash_in_background, verify_in_background};
use crate::auth::reset::{self, ResetCheck};
use crate::auth::tokens;
use crate::db::is_unique_violation;
use crate::db::models::User;
use crate::error::{AppError, AppResult, FieldErrors, OptionalRow};
use crate::extractors::{BaseUrl, CurrentUser, JsonBody};
use crate::media;
use crate::routes::users::{user_not_found, UserView};
use crate::routes::{created, message};
use crate::state::AppState;
use crate::validation::{self, Presence};

const USERNAME_TAKEN: &str = "A user with that username already exists.";
const EMAIL_TAKEN: &str = "A user with that email already exists.";

// -- Request types --

/// Signup and profile update body. Every field is optional at the type level;
/// `Presence` decides which ones must be supplied.
#[derive(Debug, Deserialize, Default)]
pub struct UserInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetConfirmRequest {
    pub uid: Option<String>,
    pub token: Option<String>,
    pub new_password: Option<String>,
}

/// A validated `UserInput`. Absent fields are left untouched on update.
#[derive(Debug, Default)]
struct UserChanges {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    bio: Option<String>,
}

fn validate_user(
    conn: &Connection,
    input: UserInput,
    presence: Presence,
    existing: Option<i64>,
) -> AppResult<UserChanges> {
    let mut errors = FieldErrors::new();

    let username = validation::username(&mut errors, input.username, presence);
    let email = validation::email(&mut errors, input.email, presence);
    let first_name = validation::optional_text(&mut errors, "first_name", input.first_name, Some(150));
    let last_name = validation::optional_text(&mut errors, "last_name", input.last_name, Some(150));
    let bio = input.bio.map(|b| b.trim().to_string());

    let password = input.password;
    if let Some(ref plain) = password {
        check_password_rules(&mut errors, "password", plain);
    }

    check_unique(conn, &mut errors, username.as_deref(), email.as_deref(), existing)?;
    errors.into_result()?;

    Ok(UserChanges {
        username,
        email,
        password,
        first_name,
        last_name,
        bio,
    })
}

/// Record a field error for each of `username` / `email` already held by a
/// user other than `existing`.
fn check_unique(
    conn: &Connection,
    errors: &mut FieldErrors,
    username: Option<&str>,
    email: Option<&str>,
    existing: Option<i64>,
) -> rusqlite::Result<()> {
    if let Some(username) = username {
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE username = ?1 AND id IS NOT ?2",
            params![username, existing],
            |row| row.get(0),
        )?;
        if taken {
            errors.add("username", USERNAME_TAKEN);
        }
    }
    if let Some(email) = email {
        // users.email is COLLATE NOCASE
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1 AND id IS NOT ?2",
            params![email, existing],
            |row| row.get(0),
        )?;
        if taken {
            errors.add("email", EMAIL_TAKEN);
        }
    }
    Ok(())
}

/// A unique index fired after validation passed: another request claimed the
/// name in between. Report it the same way validation would have.
fn unique_race(
    conn: &Connection,
    changes: &UserChanges,
    existing: Option<i64>,
) -> AppResult<AppError> {
    let mut errors = FieldErrors::new();
    check_unique(
        conn,
        &mut errors,
        changes.username.as_deref(),
        changes.email.as_deref(),
        existing,
    )?;
    if errors.is_empty() {
        errors.add("username", USERNAME_TAKEN);
    }
    Ok(AppError::Validation(errors))
}

// -- Account handlers --

/// POST /api/auth/signup/
pub async fn signup(
    State(state): State<AppState>,
    base: BaseUrl,
    JsonBody(input): JsonBody<UserInput>,
) -> AppResult<Response> {
    let changes = {
        let conn = state.db.get()?;
        validate_user(&conn, input, Presence::Required, None)?
    };

    let password_hash = match changes.password.clone() {
        Some(plain) => Some(hash_in_background(plain, state.config.auth.bcrypt_cost).await?),
        None => None,
    };

    let conn = state.db.get()?;
    let inserted = conn.execute(
        "INSERT INTO users (username, email, first_name, last_name, bio, password_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            changes.username,
            changes.email,
            changes.first_name.clone().unwrap_or_default(),
            changes.last_name.clone().unwrap_or_default(),
            changes.bio,
            password_hash
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(unique_race(&conn, &changes, None)?),
        Err(e) => return Err(e.into()),
    }

    let user = User::find(&conn, conn.last_insert_rowid())?;
    tracing::info!(user_id = user.id, username = %user.username, "user signed up");
    Ok(created(UserView::new(&user, &base)))
}

/// POST /api/auth/login/: `username` may also be an email address
pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> AppResult<Response> {
    let user = {
        let conn = state.db.get()?;
        match User::find_by_username(&conn, &req.username)? {
            Some(user) => Some(user),
            None => User::find_by_email(&conn, &req.username)?,
        }
    };
    let Some(user) = user else {
        tracing::info!(username = %req.username, "login for unknown user");
        return Ok(user_not_found());
    };

    if !verify_in_background(req.password, user.password_hash.clone()).await? {
        tracing::warn!(user_id = user.id, "login failed: bad password");
        return Err(AppError::BadRequest("Invalid credentials".into()));
    }

    let conn = state.db.get()?;
    tokens::purge_expired(&conn)?;
    let pair = tokens::issue_pair(&conn, user.id, &state.config.auth)?;
    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(pair).into_response())
}

/// POST /api/auth/token/refresh/
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let access = tokens::refresh_access(&conn, &req.refresh, &state.config.auth)?
        .ok_or(AppError::InvalidToken)?;
    Ok(Json(json!({ "access": access })).into_response())
}

/// POST /api/auth/logout/: revoke a refresh token
pub async fn logout(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RefreshRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if tokens::revoke(&conn, &req.refresh)? {
        tracing::debug!("refresh token revoked");
    }
    Ok(message(StatusCode::OK, "Logged out"))
}

// -- Profile handlers --

/// GET /api/auth/profile/ and GET /api/auth/profile/update/
pub async fn profile(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
) -> AppResult<Json<UserView>> {
    let conn = state.db.get()?;
    let me = User::find(&conn, user.id).or_not_found()?;
    Ok(Json(UserView::new(&me, &base)))
}

/// PUT /api/auth/profile/update/
pub async fn replace_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    JsonBody(input): JsonBody<UserInput>,
) -> AppResult<Json<UserView>> {
    update_profile(&state, &user, &base, input, Presence::Required).await
}

/// PATCH /api/auth/profile/update/
pub async fn patch_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    JsonBody(input): JsonBody<UserInput>,
) -> AppResult<Json<UserView>> {
    update_profile(&state, &user, &base, input, Presence::Partial).await
}

async fn update_profile(
    state: &AppState,
    user: &CurrentUser,
    base: &BaseUrl,
    input: UserInput,
    presence: Presence,
) -> AppResult<Json<UserView>> {
    let changes = {
        let conn = state.db.get()?;
        validate_user(&conn, input, presence, Some(user.id))?
    };

    let password_hash = match changes.password.clone() {
        Some(plain) => Some(hash_in_background(plain, state.config.auth.bcrypt_cost).await?),
        None => None,
    };

    let conn = state.db.get()?;
    let updated = conn.execute(
        "UPDATE users SET \
             username = COALESCE(?1, username), \
             email = COALESCE(?2, email), \
             first_name = COALESCE(?3, first_name), \
             last_name = COALESCE(?4, last_name), \
             bio = COALESCE(?5, bio), \
             password_hash = COALESCE(?6, password_hash) \
         WHERE id = ?7",
        params![
            changes.username,
            changes.email,
            changes.first_name,
            changes.last_name,
            changes.bio,
            password_hash,
            user.id
        ],
    );
    match updated {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(unique_race(&conn, &changes, Some(user.id))?)
        }
        Err(e) => return Err(e.into()),
    }

    if password_hash.is_some() {
        reset::clear_reset_tokens(&conn, user.id)?;
    }

    let me = User::find(&conn, user.id).or_not_found()?;
    tracing::info!(user_id = me.id, "profile updated");
    Ok(Json(UserView::new(&me, base)))
}

/// POST /api/auth/profile/picture/: multipart upload, field `file` or `profile_pic`
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    mut multipart: Multipart,
) -> AppResult<Json<UserView>> {
    let (filename, data) = media::read_upload(&mut multipart, &["file", "profile_pic"])
        .await?
        .ok_or_else(|| AppError::field("profile_pic", "No file was submitted."))?;

    if !media::is_image(&filename) {
        return Err(AppError::field(
            "profile_pic",
            "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
        ));
    }

    let root = state.config.media_path();
    let relative = media::save_upload(&root, media::PROFILE_PICS, &filename, &data).await?;

    let previous = {
        let conn = state.db.get()?;
        let previous = User::find(&conn, user.id).or_not_found()?.profile_pic;
        conn.execute(
            "UPDATE users SET profile_pic = ?1 WHERE id = ?2",
            params![relative, user.id],
        )?;
        previous
    };

    if let Some(old) = previous.as_deref() {
        media::discard(&root, old).await;
    }

    let conn = state.db.get()?;
    let me = User::find(&conn, user.id).or_not_found()?;
    tracing::info!(user_id = me.id, path = %relative, "profile picture updated");
    Ok(Json(UserView::new(&me, &base)))
}

// -- Password reset --

fn new_password(errors: &mut FieldErrors, value: Option<String>) -> Option<String> {
    let value = validation::text(errors, "new_password", value, Presence::Required, None)?;
    check_password_rules(errors, "new_password", &value);
    Some(value)
}

async fn set_password(state: &AppState, user_id: i64, plain: String) -> AppResult<()> {
    let hash = hash_in_background(plain, state.config.auth.bcrypt_cost).await?;
    let conn = state.db.get()?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash, user_id],
    )?;
    reset::clear_reset_tokens(&conn, user_id)?;
    Ok(())
}

/// POST /api/auth/password-reset/: `{email, new_password}`, no token
pub async fn password_reset(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ResetRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    let email = validation::email(&mut errors, req.email, Presence::Required);
    let plain = new_password(&mut errors, req.new_password);
    errors.into_result()?;
    let (Some(email), Some(plain)) = (email, plain) else {
        return Err(AppError::Internal("validated reset fields missing".into()));
    };

    let user = {
        let conn = state.db.get()?;
        User::find_by_email(&conn, &email)?
    };
    let Some(user) = user else {
        return Err(AppError::field("email", "No user with this email."));
    };

    set_password(&state, user.id, plain).await?;
    tracing::info!(user_id = user.id, "password reset without token");
    Ok(message(StatusCode::OK, "Password has been reset successfully."))
}

/// POST /api/auth/password-reset/request/
pub async fn password_reset_request(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ResetRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    let email = validation::email(&mut errors, req.email, Presence::Required);
    errors.into_result()?;
    let Some(email) = email else {
        return Err(AppError::Internal("validated email missing".into()));
    };

    let conn = state.db.get()?;
    let user = User::find_by_email(&conn, &email)?
        .ok_or_else(|| AppError::field("email", "No user with this email."))?;

    let link = reset::create_reset_link(&conn, user.id, &state.config.auth)?;
    tracing::info!(user_id = user.id, "password reset requested");
    Ok(Json(link).into_response())
}

/// POST /api/auth/password-reset/confirm/
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<ResetConfirmRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    let uid = validation::text(&mut errors, "uid", req.uid, Presence::Required, None);
    let token = validation::text(&mut errors, "token", req.token, Presence::Required, None);
    let plain = new_password(&mut errors, req.new_password);
    errors.into_result()?;
    let (Some(uid), Some(token), Some(plain)) = (uid, token, plain) else {
        return Err(AppError::Internal("validated reset fields missing".into()));
    };

    let check = {
        let conn = state.db.get()?;
        reset::check_reset_token(&conn, &uid, &token)?
    };
    let user_id = match check {
        ResetCheck::Valid(id) => id,
        ResetCheck::InvalidUid => {
            return Err(AppError::field("non_field_errors", "Invalid UID"));
        }
        ResetCheck::InvalidToken => {
            tracing::warn!("password reset with invalid or expired token");
            return Err(AppError::field("non_field_errors", "Invalid or expired token"));
        }
    };

    set_password(&state, user_id, plain).await?;
    tracing::info!(user_id, "password reset confirmed");
    Ok(message(StatusCode::OK, "Password has been reset successfully."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert_user, test_pool};

    fn input(username: &str, email: &str) -> UserInput {
        UserInput {
            username: Some(username.into()),
            email: Some(email.into()),
            ..Default::default()
        }
    }

    fn field_errors(err: AppError) -> FieldErrors {
        match err {
            AppError::Validation(errors) => errors,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn signup_requires_username_and_email() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let errors = field_errors(
            validate_user(&conn, UserInput::default(), Presence::Required, None).unwrap_err(),
        );
        assert!(errors.contains("username"));
        assert!(errors.contains("email"));
        assert!(!errors.contains("password"));
    }

    #[test]
    fn duplicate_username_and_email_are_reported() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        insert_user(&conn, "alice");

        let errors = field_errors(
            validate_user(
                &conn,
                input("alice", "ALICE@example.com"),
                Presence::Required,
                None,
            )
            .unwrap_err(),
        );
        assert!(errors.contains("username"));
        assert!(errors.contains("email"));
    }

    #[test]
    fn own_username_is_not_a_duplicate_on_update() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");

        let changes = validate_user(
            &conn,
            input("alice", "alice@example.com"),
            Presence::Required,
            Some(alice),
        )
        .unwrap();
        assert_eq!(changes.username.as_deref(), Some("alice"));
    }

    #[test]
    fn partial_update_accepts_empty_body() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");

        let changes =
            validate_user(&conn, UserInput::default(), Presence::Partial, Some(alice)).unwrap();
        assert!(changes.username.is_none());
        assert!(changes.password.is_none());
    }

    #[test]
    fn short_password_rejected() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let mut body = input("bob", "bob@example.com");
        body.password = Some("123".into());

        let errors =
            field_errors(validate_user(&conn, body, Presence::Required, None).unwrap_err());
        assert!(errors.contains("password"));
    }
}

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::membership::{self, JoinTable};
use crate::db::models::User;
use crate::error::{AppError, AppResult, OptionalRow};
use crate::extractors::{BaseUrl, CurrentUser, IdPath};
use crate::media;
use crate::routes::toggled;
use crate::state::AppState;

// --- Representations ---

/// Public representation of a user. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
    pub avatar: Option<String>,
}

impl UserView {
    pub fn new(user: &User, base: &BaseUrl) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            bio: user.bio.clone(),
            profile_pic: picture_path(user),
            avatar: avatar_url(user, base),
        }
    }

    pub fn many(users: &[User], base: &BaseUrl) -> Vec<Self> {
        users.iter().map(|u| Self::new(u, base)).collect()
    }
}

/// The compact form used by the like listings.
#[derive(Debug, Clone, Serialize)]
pub struct LikerView {
    pub id: i64,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LikesView {
    pub count: usize,
    pub likes: Vec<LikerView>,
}

impl LikesView {
    pub fn new(users: &[User], base: &BaseUrl) -> Self {
        let likes: Vec<LikerView> = users
            .iter()
            .map(|u| LikerView {
                id: u.id,
                username: u.username.clone(),
                avatar: avatar_url(u, base),
            })
            .collect();
        Self {
            count: likes.len(),
            likes,
        }
    }
}

fn picture_path(user: &User) -> Option<String> {
    user.profile_pic
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(media::url_path)
}

pub fn avatar_url(user: &User, base: &BaseUrl) -> Option<String> {
    picture_path(user).map(|path| base.absolute(&path))
}

// --- Handlers ---

/// GET /api/auth/users/
pub async fn list_users(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
) -> AppResult<Json<Vec<UserView>>> {
    let conn = state.db.get()?;
    let users = User::all(&conn)?;
    Ok(Json(UserView::many(&users, &base)))
}

/// GET /api/auth/users/{id}/
pub async fn get_user(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(id): IdPath,
) -> AppResult<Json<UserView>> {
    let conn = state.db.get()?;
    let user = User::find(&conn, id).or_not_found()?;
    Ok(Json(UserView::new(&user, &base)))
}

/// POST /api/auth/users/{id}/follow/: follow or unfollow
pub async fn toggle_follow(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(id): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !User::exists(&conn, id)? {
        return Err(AppError::NotFound);
    }
    if id == user.id {
        return Err(AppError::BadRequest("You cannot follow yourself.".into()));
    }

    let result = membership::toggle(&conn, JoinTable::Follows, id, user.id)?;
    tracing::info!(follower = user.id, following = id, ?result, "follow toggled");
    Ok(toggled(result, "Followed", "Unfollowed"))
}

/// GET /api/auth/users/{id}/followers/
pub async fn followers(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(id): IdPath,
) -> AppResult<Json<Vec<UserView>>> {
    let conn = state.db.get()?;
    if !User::exists(&conn, id)? {
        return Err(AppError::NotFound);
    }
    let users = membership::members(&conn, JoinTable::Follows, id)?;
    Ok(Json(UserView::many(&users, &base)))
}

/// GET /api/auth/users/{id}/following/
pub async fn following(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(id): IdPath,
) -> AppResult<Json<Vec<UserView>>> {
    let conn = state.db.get()?;
    if !User::exists(&conn, id)? {
        return Err(AppError::NotFound);
    }
    let users = membership::following(&conn, id)?;
    Ok(Json(UserView::many(&users, &base)))
}

/// Login reports an unknown user as `{"error": ...}` rather than a `detail`.
pub fn user_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "User not found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(profile_pic: Option<&str>) -> User {
        User {
            id: 7,
            username: "alice".into(),
            email: "alice@example.com".into(),
            first_name: "Alice".into(),
            last_name: "Liddell".into(),
            bio: Some("curious".into()),
            profile_pic: profile_pic.map(str::to_string),
            password_hash: Some("hash".into()),
            date_joined: "2025-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn avatar_is_absolute_when_host_known() {
        let base = BaseUrl(Some("http://localhost:8000".into()));
        let view = UserView::new(&user(Some("profile_pics/a.png")), &base);
        assert_eq!(
            view.avatar.as_deref(),
            Some("http://localhost:8000/media/profile_pics/a.png")
        );
        assert_eq!(view.profile_pic.as_deref(), Some("/media/profile_pics/a.png"));
    }

    #[test]
    fn missing_picture_means_no_avatar() {
        let view = UserView::new(&user(None), &BaseUrl::default());
        assert!(view.avatar.is_none());
        assert!(view.profile_pic.is_none());
    }

    #[test]
    fn user_view_has_no_password_field() {
        let json = serde_json::to_value(UserView::new(&user(None), &BaseUrl::default())).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn likes_view_counts_entries() {
        let likes = LikesView::new(&[user(None), user(Some("x.png"))], &BaseUrl::default());
        assert_eq!(likes.count, 2);
        assert_eq!(likes.likes[1].avatar.as_deref(), Some("/media/x.png"));
    }
}

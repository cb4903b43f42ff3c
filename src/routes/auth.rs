use axum::routing::{get, post};
use axum::Router;

use crate::auth::handlers;
use crate::routes::users;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup/", post(handlers::signup))
        .route("/api/auth/login/", post(handlers::login))
        .route("/api/auth/token/refresh/", post(handlers::refresh))
        .route("/api/auth/logout/", post(handlers::logout))
        .route("/api/auth/profile/", get(handlers::profile))
        .route(
            "/api/auth/profile/update/",
            get(handlers::profile)
                .put(handlers::replace_profile)
                .patch(handlers::patch_profile),
        )
        .route("/api/auth/profile/picture/", post(handlers::upload_profile_picture))
        .route("/api/auth/users/", get(users::list_users))
        .route("/api/auth/users/{id}/", get(users::get_user))
        .route("/api/auth/users/{id}/follow/", post(users::toggle_follow))
        .route("/api/auth/users/{id}/followers/", get(users::followers))
        .route("/api/auth/users/{id}/following/", get(users::following))
        .route("/api/auth/password-reset/", post(handlers::password_reset))
        .route(
            "/api/auth/password-reset/request/",
            post(handlers::password_reset_request),
        )
        .route(
            "/api/auth/password-reset/confirm/",
            post(handlers::password_reset_confirm),
        )
}

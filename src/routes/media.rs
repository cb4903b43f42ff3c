use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::media;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/media/{*path}", get(serve))
}

/// GET /media/{*path}: uploaded files from the media root
pub async fn serve(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let Some(file) = media::resolve(&state.config.media_path(), &path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&file).await {
        Ok(data) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
                ],
                data,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to read media file {}: {}", file.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

use std::convert::Infallible;

use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::Json;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
}

/// Extractor that requires a bearer access token.
/// Returns 401 when the header is missing or the token is unknown or expired.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;

        let conn = state.db.get()?;
        conn.query_row(
            "SELECT u.id, u.username FROM auth_tokens t \
             JOIN users u ON u.id = t.user_id \
             WHERE t.token = ?1 AND t.kind = 'access' AND t.expires_at > datetime('now')",
            params![token],
            |row| {
                Ok(CurrentUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or(AppError::InvalidToken)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// JSON body extractor whose rejections are 400s in the API's error format.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

/// Integer id from the route path. A segment that is not an integer matches
/// no resource, so the rejection is a 404.
pub struct IdPath(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for IdPath {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<i64>::from_request_parts(parts, state).await {
            Ok(Path(id)) => Ok(IdPath(id)),
            Err(rejection) => {
                tracing::debug!(%rejection, "path id rejected");
                Err(AppError::NotFound)
            }
        }
    }
}

/// Scheme and authority the client used to reach us, for building absolute media URLs.
/// `None` when the request carried no Host.
#[derive(Debug, Clone, Default)]
pub struct BaseUrl(pub Option<String>);

impl BaseUrl {
    pub fn absolute(&self, path: &str) -> String {
        match &self.0 {
            Some(base) => format!("{}{}", base, path),
            None => path.to_string(),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for BaseUrl {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));

        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|h| h.to_str().ok())
            .filter(|s| *s == "http" || *s == "https")
            .unwrap_or("http");

        Ok(BaseUrl(host.map(|host| format!("{}://{}", scheme, host))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let p = parts(HttpRequest::builder().header("Authorization", "Bearer abc123"));
        assert_eq!(bearer_token(&p), Some("abc123"));

        let p = parts(HttpRequest::builder().header("Authorization", "Token abc123"));
        assert_eq!(bearer_token(&p), None);

        let p = parts(HttpRequest::builder().header("Authorization", "Bearer "));
        assert_eq!(bearer_token(&p), None);

        let p = parts(HttpRequest::builder());
        assert_eq!(bearer_token(&p), None);
    }

    #[tokio::test]
    async fn base_url_from_host_and_forwarded_proto() {
        let mut p = parts(
            HttpRequest::builder()
                .header("Host", "api.example.com")
                .header("X-Forwarded-Proto", "https"),
        );
        let base = BaseUrl::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(
            base.absolute("/media/a.png"),
            "https://api.example.com/media/a.png"
        );
    }

    #[tokio::test]
    async fn base_url_without_host_stays_relative() {
        let mut p = parts(HttpRequest::builder().uri("/api/posts/"));
        let base = BaseUrl::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(base.absolute("/media/a.png"), "/media/a.png");
    }
}

//! Self-describing API: an OpenAPI 3 document built from a static endpoint
//! catalogue, rendered by Swagger UI and by ReDoc.

use askama::Template;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use crate::routes::home::Html;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/docs/", get(swagger_ui))
        .route("/api/docs/openapi.json", get(openapi))
        .route("/api/redoc/", get(redoc))
}

#[derive(Template)]
#[template(path = "docs.html")]
pub struct DocsTemplate {
    pub spec_url: &'static str,
}

#[derive(Template)]
#[template(path = "redoc.html")]
pub struct RedocTemplate {
    pub spec_url: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub method: &'static str,
    pub path: &'static str,
    pub tag: &'static str,
    pub summary: &'static str,
    pub auth: bool,
}

const fn ep(
    method: &'static str,
    path: &'static str,
    tag: &'static str,
    summary: &'static str,
    auth: bool,
) -> Endpoint {
    Endpoint {
        method,
        path,
        tag,
        summary,
        auth,
    }
}

pub const ENDPOINTS: &[Endpoint] = &[
    ep("post", "/api/auth/signup/", "auth", "Create an account", false),
    ep("post", "/api/auth/login/", "auth", "Log in with username or email", false),
    ep("post", "/api/auth/token/refresh/", "auth", "Exchange a refresh token for an access token", false),
    ep("post", "/api/auth/logout/", "auth", "Revoke a refresh token", false),
    ep("get", "/api/auth/profile/", "auth", "Current user", true),
    ep("get", "/api/auth/profile/update/", "auth", "Current user", true),
    ep("put", "/api/auth/profile/update/", "auth", "Replace profile fields", true),
    ep("patch", "/api/auth/profile/update/", "auth", "Update some profile fields", true),
    ep("post", "/api/auth/profile/picture/", "auth", "Upload a profile picture (multipart)", true),
    ep("get", "/api/auth/users/", "users", "All users", true),
    ep("get", "/api/auth/users/{id}/", "users", "One user", true),
    ep("post", "/api/auth/users/{id}/follow/", "users", "Follow or unfollow a user", true),
    ep("get", "/api/auth/users/{id}/followers/", "users", "Followers of a user", true),
    ep("get", "/api/auth/users/{id}/following/", "users", "Users a user follows", true),
    ep("post", "/api/auth/password-reset/", "auth", "Reset a password by email", false),
    ep("post", "/api/auth/password-reset/request/", "auth", "Request a password reset link", false),
    ep("post", "/api/auth/password-reset/confirm/", "auth", "Set a new password with a reset token", false),
    ep("get", "/api/posts/", "posts", "All posts, newest first", true),
    ep("post", "/api/posts/", "posts", "Create a post (JSON, or multipart with a media file)", true),
    ep("get", "/api/posts/{pk}/", "posts", "One post", true),
    ep("put", "/api/posts/{pk}/", "posts", "Replace a post", true),
    ep("patch", "/api/posts/{pk}/", "posts", "Edit a post", true),
    ep("delete", "/api/posts/{pk}/", "posts", "Delete a post", true),
    ep("post", "/api/posts/{pk}/media/", "posts", "Attach media to a post (multipart)", true),
    ep("get", "/api/posts/{pk}/author-avatar/", "posts", "Avatar of a post's author", false),
    ep("get", "/api/posts/user/{user_id}/", "posts", "Posts by a user", false),
    ep("get", "/api/posts/search/", "posts", "Search posts by content", false),
    ep("get", "/api/posts/{pk}/like/", "posts", "Users who liked a post", true),
    ep("post", "/api/posts/{pk}/like/", "posts", "Like or unlike a post", true),
    ep("get", "/api/posts/{pk}/comments/", "comments", "Comments on a post", true),
    ep("post", "/api/posts/{pk}/comments/", "comments", "Comment on a post", true),
    ep("get", "/api/posts/comments/{pk}/", "comments", "One comment", true),
    ep("delete", "/api/posts/comments/{pk}/", "comments", "Delete a comment", true),
    ep("get", "/api/posts/comments/{pk}/like/", "comments", "Users who liked a comment", true),
    ep("post", "/api/posts/comments/{pk}/like/", "comments", "Like or unlike a comment", true),
    ep("get", "/api/jobs/", "jobs", "All job listings", true),
    ep("post", "/api/jobs/", "jobs", "Post a job", true),
    ep("get", "/api/jobs/{pk}/", "jobs", "One job listing", true),
    ep("put", "/api/jobs/{pk}/", "jobs", "Replace a job listing", true),
    ep("patch", "/api/jobs/{pk}/", "jobs", "Edit a job listing", true),
    ep("delete", "/api/jobs/{pk}/", "jobs", "Delete a job listing", true),
    ep("get", "/api/jobs/user/{user_id}/", "jobs", "Jobs posted by a user", false),
    ep("post", "/api/jobs/{pk}/interest/", "jobs", "Show or remove interest in a job", true),
    ep("get", "/api/jobs/{pk}/applicants/stats/", "jobs", "Number of interested users", true),
    ep("get", "/api/jobs/search/", "jobs", "Search jobs by title", false),
    ep("get", "/api/events/", "events", "All events by start time", true),
    ep("post", "/api/events/", "events", "Create an event", true),
    ep("get", "/api/events/{pk}/", "events", "One event", true),
    ep("put", "/api/events/{pk}/", "events", "Replace an event", true),
    ep("patch", "/api/events/{pk}/", "events", "Edit an event", true),
    ep("delete", "/api/events/{pk}/", "events", "Delete an event", true),
    ep("get", "/api/events/user/{user_id}/", "events", "Events created by a user", false),
    ep("post", "/api/events/{pk}/interest/", "events", "Show or remove interest in an event", true),
    ep("get", "/api/events/{pk}/attendees/stats/", "events", "Number of interested users", true),
    ep("get", "/api/events/{pk}/attendees/", "events", "Interested users", true),
    ep("get", "/api/events/search/", "events", "Search events by title", false),
    ep("get", "/api/chat/{user_id}/", "chat", "Conversation with a user", true),
    ep("post", "/api/chat/{user_id}/send/", "chat", "Send a message to a user", true),
    ep("post", "/api/chat/send/", "chat", "Send a message", true),
];

/// Names of `{param}` segments in a route path.
fn path_params(path: &str) -> Vec<&str> {
    path.split('/')
        .filter_map(|seg| seg.strip_prefix('{')?.strip_suffix('}'))
        .collect()
}

fn operation(endpoint: &Endpoint) -> Value {
    let mut parameters: Vec<Value> = path_params(endpoint.path)
        .into_iter()
        .map(|name| {
            json!({
                "name": name,
                "in": "path",
                "required": true,
                "schema": { "type": "integer" }
            })
        })
        .collect();
    if endpoint.path.ends_with("/search/") {
        parameters.push(json!({
            "name": "q",
            "in": "query",
            "required": false,
            "schema": { "type": "string" }
        }));
    }

    let mut op = json!({
        "tags": [endpoint.tag],
        "summary": endpoint.summary,
        "parameters": parameters,
        "responses": { "default": { "description": "JSON response" } }
    });
    if endpoint.auth {
        op["security"] = json!([{ "bearerAuth": [] }]);
    }
    op
}

/// OpenAPI 3 document for every endpoint in `ENDPOINTS`.
pub fn openapi_document() -> Value {
    let mut paths = Map::new();
    for endpoint in ENDPOINTS {
        let item = paths
            .entry(endpoint.path.to_string())
            .or_insert_with(|| json!({}));
        item[endpoint.method] = operation(endpoint);
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Social Hub API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Accounts, posts, jobs, events and chat."
        },
        "paths": paths,
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" }
            }
        }
    })
}

/// GET /api/docs/openapi.json
pub async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

const SPEC_URL: &str = "/api/docs/openapi.json";

/// GET /api/docs/
pub async fn swagger_ui() -> Html<DocsTemplate> {
    Html(DocsTemplate { spec_url: SPEC_URL })
}

/// GET /api/redoc/
pub async fn redoc() -> Html<RedocTemplate> {
    Html(RedocTemplate { spec_url: SPEC_URL })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_path_params() {
        assert_eq!(path_params("/api/posts/{pk}/like/"), vec!["pk"]);
        assert!(path_params("/api/posts/").is_empty());
    }

    #[test]
    fn document_groups_methods_per_path() {
        let doc = openapi_document();
        let post = &doc["paths"]["/api/posts/{pk}/"];
        for method in ["get", "put", "patch", "delete"] {
            assert!(post.get(method).is_some(), "missing {}", method);
        }
        assert_eq!(post["get"]["parameters"][0]["name"], "pk");
    }

    #[test]
    fn public_endpoints_have_no_security() {
        let doc = openapi_document();
        assert!(doc["paths"]["/api/auth/login/"]["post"].get("security").is_none());
        assert!(doc["paths"]["/api/auth/profile/"]["get"].get("security").is_some());
    }

    #[test]
    fn search_endpoints_take_query() {
        let doc = openapi_document();
        let params = doc["paths"]["/api/jobs/search/"]["get"]["parameters"]
            .as_array()
            .unwrap();
        assert!(params.iter().any(|p| p["name"] == "q" && p["in"] == "query"));
    }
}

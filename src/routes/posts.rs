use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection, Params};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::membership::{self, JoinTable};
use crate::db::models::{Comment, Post, User};
use crate::error::{AppError, AppResult, FieldErrors, OptionalRow};
use crate::extractors::{BaseUrl, CurrentUser, IdPath, JsonBody};
use crate::media;
use crate::routes::users::{avatar_url, LikesView, UserView};
use crate::routes::{created, no_content, toggled, SearchQuery};
use crate::state::AppState;
use crate::validation::{self, Presence};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts/", get(list_posts).post(create_post))
        .route("/api/posts/search/", get(search_posts))
        .route("/api/posts/user/{user_id}/", get(user_posts))
        .route(
            "/api/posts/{pk}/",
            get(get_post)
                .put(replace_post)
                .patch(patch_post)
                .delete(delete_post),
        )
        .route("/api/posts/{pk}/media/", post(upload_media))
        .route("/api/posts/{pk}/author-avatar/", get(author_avatar))
        .route("/api/posts/{pk}/like/", get(post_likes).post(toggle_post_like))
        .route(
            "/api/posts/{pk}/comments/",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/posts/comments/{pk}/",
            get(get_comment).delete(delete_comment),
        )
        .route(
            "/api/posts/comments/{pk}/like/",
            get(comment_likes).post(toggle_comment_like),
        )
}

// -- Representations --

#[derive(Debug, Serialize)]
pub struct PostView {
    pub id: i64,
    pub author: UserView,
    pub content: String,
    pub media: Option<String>,
    pub created_at: String,
    pub likes_count: usize,
    pub liked_by_users: Vec<UserView>,
}

impl PostView {
    fn load(conn: &Connection, post: Post, base: &BaseUrl) -> rusqlite::Result<Self> {
        let author = User::find(conn, post.author_id)?;
        let liked_by = membership::members(conn, JoinTable::PostLikes, post.id)?;
        Ok(Self {
            id: post.id,
            author: UserView::new(&author, base),
            content: post.content,
            media: post
                .media
                .as_deref()
                .filter(|m| !m.is_empty())
                .map(|m| base.absolute(&media::url_path(m))),
            created_at: post.created_at,
            likes_count: liked_by.len(),
            liked_by_users: UserView::many(&liked_by, base),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub post: i64,
    pub user: UserView,
    pub content: String,
    pub created_at: String,
    pub likes_count: usize,
    pub liked_by_users: Vec<UserView>,
}

impl CommentView {
    fn load(conn: &Connection, comment: Comment, base: &BaseUrl) -> rusqlite::Result<Self> {
        let user = User::find(conn, comment.user_id)?;
        let liked_by = membership::members(conn, JoinTable::CommentLikes, comment.id)?;
        Ok(Self {
            id: comment.id,
            post: comment.post_id,
            user: UserView::new(&user, base),
            content: comment.content,
            created_at: comment.created_at,
            likes_count: liked_by.len(),
            liked_by_users: UserView::many(&liked_by, base),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ContentInput {
    pub content: Option<String>,
}

fn content(input: ContentInput, presence: Presence) -> AppResult<Option<String>> {
    let mut errors = FieldErrors::new();
    let value = validation::text(&mut errors, "content", input.content, presence, None);
    errors.into_result()?;
    Ok(value)
}

// -- Posts --

/// GET /api/posts/
async fn list_posts(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
) -> AppResult<Json<Vec<PostView>>> {
    let conn = state.db.get()?;
    let posts = query_posts(&conn, "", [])?;
    Ok(Json(post_views(&conn, posts, &base)?))
}

/// POST /api/posts/: JSON `{content}`, or multipart with `content` and an optional `media` file
async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    req: Request,
) -> AppResult<Response> {
    let (input, upload) = if is_multipart(&req) {
        let mut multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        read_post_form(&mut multipart).await?
    } else {
        let JsonBody(input) = JsonBody::<ContentInput>::from_request(req, &state).await?;
        (input, None)
    };
    let text = content(input, Presence::Required)?;

    let media_path = match upload {
        Some((filename, data)) => Some(
            media::save_upload(&state.config.media_path(), media::POST_MEDIA, &filename, &data)
                .await?,
        ),
        None => None,
    };

    let inserted = insert_post(&state, user.id, text.as_deref(), media_path.as_deref());
    let post_id = match inserted {
        Ok(id) => id,
        Err(e) => {
            if let Some(stored) = media_path.as_deref() {
                media::discard(&state.config.media_path(), stored).await;
            }
            return Err(e);
        }
    };

    let conn = state.db.get()?;
    let post = Post::find(&conn, post_id)?;
    tracing::info!(post_id = post.id, author_id = user.id, "post created");
    Ok(created(PostView::load(&conn, post, &base)?))
}

fn insert_post(
    state: &AppState,
    author_id: i64,
    text: Option<&str>,
    media_path: Option<&str>,
) -> AppResult<i64> {
    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO posts (author_id, content, media) VALUES (?1, ?2, ?3)",
        params![author_id, text, media_path],
    )?;
    Ok(conn.last_insert_rowid())
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn read_post_form(
    multipart: &mut Multipart,
) -> AppResult<(ContentInput, Option<(String, Bytes)>)> {
    let mut input = ContentInput::default();
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("content") => {
                input.content = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?,
                );
            }
            Some("media") | Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                if !data.is_empty() {
                    upload = Some((filename, data));
                }
            }
            _ => {}
        }
    }
    Ok((input, upload))
}

/// GET /api/posts/{pk}/
async fn get_post(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<PostView>> {
    let conn = state.db.get()?;
    let post = Post::find(&conn, pk).or_not_found()?;
    Ok(Json(PostView::load(&conn, post, &base)?))
}

async fn replace_post(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<ContentInput>,
) -> AppResult<Json<PostView>> {
    edit_post(&state, &user, &base, pk, input, Presence::Required)
}

async fn patch_post(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<ContentInput>,
) -> AppResult<Json<PostView>> {
    edit_post(&state, &user, &base, pk, input, Presence::Partial)
}

fn edit_post(
    state: &AppState,
    user: &CurrentUser,
    base: &BaseUrl,
    pk: i64,
    input: ContentInput,
    presence: Presence,
) -> AppResult<Json<PostView>> {
    let conn = state.db.get()?;
    let post = Post::find(&conn, pk).or_not_found()?;
    if post.author_id != user.id {
        return Err(AppError::Forbidden("You can only edit your own post.".into()));
    }

    if let Some(text) = content(input, presence)? {
        conn.execute(
            "UPDATE posts SET content = ?1 WHERE id = ?2",
            params![text, pk],
        )?;
    }
    let post = Post::find(&conn, pk)?;
    Ok(Json(PostView::load(&conn, post, base)?))
}

/// DELETE /api/posts/{pk}/
async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let post = {
        let conn = state.db.get()?;
        let post = Post::find(&conn, pk).or_not_found()?;
        if post.author_id != user.id {
            return Err(AppError::Forbidden(
                "You can only delete your own post.".into(),
            ));
        }
        conn.execute("DELETE FROM posts WHERE id = ?1", params![pk])?;
        post
    };

    if let Some(stored) = post.media.as_deref() {
        media::discard(&state.config.media_path(), stored).await;
    }
    tracing::info!(post_id = pk, "post deleted");
    Ok(no_content())
}

/// POST /api/posts/{pk}/media/: multipart field `file` or `media`
async fn upload_media(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
    mut multipart: Multipart,
) -> AppResult<Json<PostView>> {
    let previous = {
        let conn = state.db.get()?;
        let post = Post::find(&conn, pk).or_not_found()?;
        if post.author_id != user.id {
            return Err(AppError::Forbidden("You can only edit your own post.".into()));
        }
        post.media
    };

    let (filename, data) = media::read_upload(&mut multipart, &["file", "media"])
        .await?
        .ok_or_else(|| AppError::field("media", "No file was submitted."))?;

    let root = state.config.media_path();
    let relative = media::save_upload(&root, media::POST_MEDIA, &filename, &data).await?;

    if let Some(old) = previous.as_deref() {
        media::discard(&root, old).await;
    }

    let conn = state.db.get()?;
    conn.execute(
        "UPDATE posts SET media = ?1 WHERE id = ?2",
        params![relative, pk],
    )?;
    let post = Post::find(&conn, pk)?;
    tracing::info!(post_id = pk, path = %relative, "post media attached");
    Ok(Json(PostView::load(&conn, post, &base)?))
}

/// GET /api/posts/{pk}/author-avatar/
async fn author_avatar(
    State(state): State<AppState>,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let post = Post::find(&conn, pk).or_not_found()?;
    let author = User::find(&conn, post.author_id)?;
    Ok(Json(json!({
        "author_id": author.id,
        "username": author.username,
        "avatar": avatar_url(&author, &base),
    })))
}

/// GET /api/posts/user/{user_id}/
async fn user_posts(
    State(state): State<AppState>,
    base: BaseUrl,
    IdPath(user_id): IdPath,
) -> AppResult<Json<Vec<PostView>>> {
    let conn = state.db.get()?;
    if !User::exists(&conn, user_id)? {
        return Err(AppError::NotFound);
    }
    let posts = query_posts(&conn, "WHERE p.author_id = ?1", params![user_id])?;
    Ok(Json(post_views(&conn, posts, &base)?))
}

/// GET /api/posts/search/?q=
async fn search_posts(
    State(state): State<AppState>,
    base: BaseUrl,
    Query(search): Query<SearchQuery>,
) -> AppResult<Json<Vec<PostView>>> {
    let conn = state.db.get()?;
    let posts = query_posts(&conn, "WHERE icontains(p.content, ?1)", params![search.q])?;
    Ok(Json(post_views(&conn, posts, &base)?))
}

// -- Post likes --

/// POST /api/posts/{pk}/like/
async fn toggle_post_like(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    Post::find(&conn, pk).or_not_found()?;
    let result = membership::toggle(&conn, JoinTable::PostLikes, pk, user.id)?;
    tracing::debug!(post_id = pk, user_id = user.id, ?result, "post like toggled");
    Ok(toggled(result, "Post liked.", "Post unliked."))
}

/// GET /api/posts/{pk}/like/
async fn post_likes(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<LikesView>> {
    let conn = state.db.get()?;
    Post::find(&conn, pk).or_not_found()?;
    let users = membership::members(&conn, JoinTable::PostLikes, pk)?;
    Ok(Json(LikesView::new(&users, &base)))
}

// -- Comments --

/// GET /api/posts/{pk}/comments/
async fn list_comments(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<Vec<CommentView>>> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c WHERE c.post_id = ?1 ORDER BY c.created_at DESC, c.id DESC",
        Comment::COLUMNS
    ))?;
    let comments = stmt
        .query_map(params![pk], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let views = comments
        .into_iter()
        .map(|c| CommentView::load(&conn, c, &base))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

/// POST /api/posts/{pk}/comments/
async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<ContentInput>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    Post::find(&conn, pk).or_not_found()?;
    let text = content(input, Presence::Required)?;

    conn.execute(
        "INSERT INTO comments (post_id, user_id, content) VALUES (?1, ?2, ?3)",
        params![pk, user.id, text],
    )?;
    let comment = Comment::find(&conn, conn.last_insert_rowid())?;
    tracing::info!(comment_id = comment.id, post_id = pk, "comment created");
    Ok(created(CommentView::load(&conn, comment, &base)?))
}

/// GET /api/posts/comments/{pk}/
async fn get_comment(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<CommentView>> {
    let conn = state.db.get()?;
    let comment = Comment::find(&conn, pk).or_not_found()?;
    Ok(Json(CommentView::load(&conn, comment, &base)?))
}

/// DELETE /api/posts/comments/{pk}/
async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let comment = Comment::find(&conn, pk).or_not_found()?;
    if comment.user_id != user.id {
        return Err(AppError::Forbidden(
            "You can only delete your own comment.".into(),
        ));
    }
    conn.execute("DELETE FROM comments WHERE id = ?1", params![pk])?;
    Ok(no_content())
}

/// POST /api/posts/comments/{pk}/like/
async fn toggle_comment_like(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    Comment::find(&conn, pk).or_not_found()?;
    let result = membership::toggle(&conn, JoinTable::CommentLikes, pk, user.id)?;
    Ok(toggled(result, "Comment liked.", "Comment unliked."))
}

/// GET /api/posts/comments/{pk}/like/
async fn comment_likes(
    State(state): State<AppState>,
    _user: CurrentUser,
    base: BaseUrl,
    IdPath(pk): IdPath,
) -> AppResult<Json<LikesView>> {
    let conn = state.db.get()?;
    Comment::find(&conn, pk).or_not_found()?;
    let users = membership::members(&conn, JoinTable::CommentLikes, pk)?;
    Ok(Json(LikesView::new(&users, &base)))
}

// -- Queries --

fn query_posts<P: Params>(conn: &Connection, filter: &str, params: P) -> rusqlite::Result<Vec<Post>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM posts p {} ORDER BY p.created_at DESC, p.id DESC",
        Post::COLUMNS,
        filter
    ))?;
    let posts = stmt
        .query_map(params, Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

fn post_views(conn: &Connection, posts: Vec<Post>, base: &BaseUrl) -> rusqlite::Result<Vec<PostView>> {
    posts
        .into_iter()
        .map(|p| PostView::load(conn, p, base))
        .collect()
}

use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection, Params};
use serde::Deserialize;
use serde_json::json;

use crate::db::membership::{self, JoinTable};
use crate::db::models::{Job, User};
use crate::error::{AppError, AppResult, FieldErrors, OptionalRow};
use crate::extractors::{CurrentUser, IdPath, JsonBody};
use crate::routes::{created, no_content, toggled, SearchQuery};
use crate::state::AppState;
use crate::validation::{self, Presence};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/jobs/", get(list_jobs).post(create_job))
        .route("/api/jobs/search/", get(search_jobs))
        .route("/api/jobs/user/{user_id}/", get(user_jobs))
        .route(
            "/api/jobs/{pk}/",
            get(get_job).put(replace_job).patch(patch_job).delete(delete_job),
        )
        .route("/api/jobs/{pk}/interest/", post(toggle_interest))
        .route("/api/jobs/{pk}/applicants/stats/", get(applicant_stats))
}

#[derive(Debug, Deserialize, Default)]
pub struct JobInput {
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub salary_range: Option<String>,
    pub deadline: Option<String>,
}

/// Validated job fields; `None` leaves the stored value alone.
#[derive(Debug, Default)]
struct JobChanges {
    title: Option<String>,
    company_name: Option<String>,
    location: Option<String>,
    description: Option<String>,
    salary_range: Option<String>,
    deadline: Option<String>,
}

fn validate(input: JobInput, presence: Presence) -> AppResult<JobChanges> {
    let mut errors = FieldErrors::new();
    let changes = JobChanges {
        title: validation::text(&mut errors, "title", input.title, presence, Some(255)),
        company_name: validation::text(
            &mut errors,
            "company_name",
            input.company_name,
            presence,
            Some(255),
        ),
        location: validation::text(&mut errors, "location", input.location, presence, Some(255)),
        description: validation::text(&mut errors, "description", input.description, presence, None),
        salary_range: validation::optional_text(
            &mut errors,
            "salary_range",
            input.salary_range,
            Some(100),
        ),
        deadline: validation::date(&mut errors, "deadline", input.deadline, presence)
            .map(|d| d.format("%Y-%m-%d").to_string()),
    };
    errors.into_result()?;
    Ok(changes)
}

/// GET /api/jobs/
async fn list_jobs(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<Vec<Job>>> {
    let conn = state.db.get()?;
    Ok(Json(query_jobs(&conn, "", [])?))
}

/// POST /api/jobs/
async fn create_job(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<JobInput>,
) -> AppResult<Response> {
    let job = validate(input, Presence::Required)?;

    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO jobs (title, company_name, location, description, salary_range, deadline, created_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            job.title,
            job.company_name,
            job.location,
            job.description,
            job.salary_range.unwrap_or_default(),
            job.deadline,
            user.id
        ],
    )?;
    let job = Job::find(&conn, conn.last_insert_rowid())?;
    tracing::info!(job_id = job.id, created_by = user.id, "job posted");
    Ok(created(job))
}

/// GET /api/jobs/{pk}/
async fn get_job(
    State(state): State<AppState>,
    _user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Json<Job>> {
    let conn = state.db.get()?;
    Ok(Json(Job::find(&conn, pk).or_not_found()?))
}

async fn replace_job(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<JobInput>,
) -> AppResult<Json<Job>> {
    edit_job(&state, &user, pk, input, Presence::Required)
}

async fn patch_job(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
    JsonBody(input): JsonBody<JobInput>,
) -> AppResult<Json<Job>> {
    edit_job(&state, &user, pk, input, Presence::Partial)
}

fn edit_job(
    state: &AppState,
    user: &CurrentUser,
    pk: i64,
    input: JobInput,
    presence: Presence,
) -> AppResult<Json<Job>> {
    let conn = state.db.get()?;
    let job = Job::find(&conn, pk).or_not_found()?;
    if job.created_by != user.id {
        return Err(AppError::Forbidden(
            "You can only edit your own job post.".into(),
        ));
    }

    let changes = validate(input, presence)?;
    conn.execute(
        "UPDATE jobs SET \
             title = COALESCE(?1, title), \
             company_name = COALESCE(?2, company_name), \
             location = COALESCE(?3, location), \
             description = COALESCE(?4, description), \
             salary_range = COALESCE(?5, salary_range), \
             deadline = COALESCE(?6, deadline) \
         WHERE id = ?7",
        params![
            changes.title,
            changes.company_name,
            changes.location,
            changes.description,
            changes.salary_range,
            changes.deadline,
            pk
        ],
    )?;
    Ok(Json(Job::find(&conn, pk)?))
}

/// DELETE /api/jobs/{pk}/
async fn delete_job(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let job = Job::find(&conn, pk).or_not_found()?;
    if job.created_by != user.id {
        return Err(AppError::Forbidden(
            "You can only delete your own job post.".into(),
        ));
    }
    conn.execute("DELETE FROM jobs WHERE id = ?1", params![pk])?;
    tracing::info!(job_id = pk, "job deleted");
    Ok(no_content())
}

/// GET /api/jobs/user/{user_id}/
async fn user_jobs(
    State(state): State<AppState>,
    IdPath(user_id): IdPath,
) -> AppResult<Json<Vec<Job>>> {
    let conn = state.db.get()?;
    if !User::exists(&conn, user_id)? {
        return Err(AppError::NotFound);
    }
    Ok(Json(query_jobs(&conn, "WHERE j.created_by = ?1", params![user_id])?))
}

/// GET /api/jobs/search/?q=: matches on title
async fn search_jobs(
    State(state): State<AppState>,
    Query(search): Query<SearchQuery>,
) -> AppResult<Json<Vec<Job>>> {
    let conn = state.db.get()?;
    Ok(Json(query_jobs(
        &conn,
        "WHERE icontains(j.title, ?1)",
        params![search.q],
    )?))
}

/// POST /api/jobs/{pk}/interest/
async fn toggle_interest(
    State(state): State<AppState>,
    user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    Job::find(&conn, pk).or_not_found()?;
    let result = membership::toggle(&conn, JoinTable::JobInterest, pk, user.id)?;
    tracing::debug!(job_id = pk, user_id = user.id, ?result, "job interest toggled");
    Ok(toggled(result, "Interest shown", "Interest removed"))
}

/// GET /api/jobs/{pk}/applicants/stats/
async fn applicant_stats(
    State(state): State<AppState>,
    _user: CurrentUser,
    IdPath(pk): IdPath,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    Job::find(&conn, pk).or_not_found()?;
    let count = membership::count(&conn, JoinTable::JobInterest, pk)?;
    Ok(Json(json!({ "job_id": pk, "applicants_count": count })))
}

fn query_jobs<P: Params>(conn: &Connection, filter: &str, params: P) -> rusqlite::Result<Vec<Job>> {
    let mut stmt = conn.prepare(&format!(
        "{} {} ORDER BY j.created_at DESC, j.id DESC",
        Job::SELECT,
        filter
    ))?;
    let jobs = stmt
        .query_map(params, Job::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_input() -> JobInput {
        JobInput {
            title: Some("Rust Developer".into()),
            company_name: Some("Ferris Inc".into()),
            location: Some("Remote".into()),
            description: Some("Build things".into()),
            salary_range: None,
            deadline: Some("2030-01-31".into()),
        }
    }

    #[test]
    fn create_requires_core_fields() {
        let err = validate(JobInput::default(), Presence::Required).unwrap_err();
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        for field in ["title", "company_name", "location", "description", "deadline"] {
            assert!(errors.contains(field), "{} should be required", field);
        }
        assert!(!errors.contains("salary_range"));
    }

    #[test]
    fn deadline_is_normalised() {
        let changes = validate(full_input(), Presence::Required).unwrap();
        assert_eq!(changes.deadline.as_deref(), Some("2030-01-31"));
        assert!(changes.salary_range.is_none());
    }

    #[test]
    fn patch_validates_only_present_fields() {
        let changes = validate(
            JobInput {
                title: Some("Senior Rust Developer".into()),
                ..Default::default()
            },
            Presence::Partial,
        )
        .unwrap();
        assert_eq!(changes.title.as_deref(), Some("Senior Rust Developer"));
        assert!(changes.deadline.is_none());
    }

    #[test]
    fn bad_deadline_rejected() {
        let mut input = full_input();
        input.deadline = Some("next week".into());
        assert!(matches!(
            validate(input, Presence::Required),
            Err(AppError::Validation(ref e)) if e.contains("deadline")
        ));
    }
}

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use pereval_db::models::{UserRow, UserWrite};
use pereval_types::api::{
    UserListQuery, UserPayload, UserResponse, UserSearchQuery, UserUpdateRequest,
};

use crate::error::ApiError;
use crate::{AppState, run_db};

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    query.validate()?;
    let rows = run_db(&state, move |db| db.list_users(query.limit, query.offset)).await?;
    Ok(Json(rows.into_iter().map(to_response).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let row = run_db(&state, move |db| db.get_user(id))
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(to_response(row)))
}

/// Substring match on email; an absent or empty `email` lists everyone.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let fragment = query.email.filter(|e| !e.is_empty());
    let rows = run_db(&state, move |db| db.search_users(fragment.as_deref())).await?;
    Ok(Json(rows.into_iter().map(to_response).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<UserPayload>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let email = req.email.clone();

    match run_db(&state, move |db| db.create_user(&req)).await? {
        UserWrite::Written(row) => Ok((StatusCode::CREATED, Json(to_response(row)))),
        UserWrite::EmailTaken => Err(email_taken(&email)),
        UserWrite::NotFound => Err(ApiError::Internal(anyhow::anyhow!(
            "user row vanished right after insert"
        ))),
    }
}

/// PATCH /users/{id} — partial update of the provided fields.
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UserUpdateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    req.validate()?;

    if req.is_empty() {
        let exists = run_db(&state, move |db| db.get_user(id)).await?.is_some();
        return Err(if exists {
            ApiError::BadRequest("No fields to update".into())
        } else {
            not_found(id)
        });
    }

    let email = req.email.clone().unwrap_or_default();
    match run_db(&state, move |db| db.update_user(id, &req)).await? {
        UserWrite::Written(row) => Ok(Json(to_response(row))),
        UserWrite::NotFound => Err(not_found(id)),
        UserWrite::EmailTaken => Err(email_taken(&email)),
    }
}

fn not_found(id: i64) -> ApiError {
    ApiError::NotFound(format!("User with id {} not found", id))
}

fn email_taken(email: &str) -> ApiError {
    ApiError::Conflict(format!("User with email {} already exists", email))
}

fn to_response(row: UserRow) -> UserResponse {
    UserResponse {
        id: row.id,
        email: row.email,
        phone: row.phone,
        fam: row.fam,
        name: row.name,
        otc: row.otc,
    }
}

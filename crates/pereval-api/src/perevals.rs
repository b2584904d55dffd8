use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::NaiveDateTime;
use tracing::{info, warn};
use validator::Validate;

use pereval_db::models::{ImageRow, NewImage, PerevalRow, UpdateOutcome};
use pereval_types::api::{
    CoordsPayload, ImagePayload, PerevalListQuery, PerevalResponse, PerevalSummary,
    SubmitPerevalRequest, SubmitResponse, UpdateResponse, UserPayload,
};

use crate::error::ApiError;
use crate::{AppState, run_db};

/// POST /submitData — store a new pass. Always answers with the
/// `{status, message, id}` envelope; the HTTP status mirrors `status`.
pub async fn submit_data(
    State(state): State<AppState>,
    payload: Result<Json<SubmitPerevalRequest>, JsonRejection>,
) -> Response {
    match submit(&state, payload).await {
        Ok(id) => Json(SubmitResponse {
            status: StatusCode::OK.as_u16(),
            message: "Submitted successfully".to_string(),
            id: Some(id),
        })
        .into_response(),
        Err(err) => {
            let status = err.status();
            let body = SubmitResponse {
                status: status.as_u16(),
                message: err.public_message(),
                id: None,
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn submit(
    state: &AppState,
    payload: Result<Json<SubmitPerevalRequest>, JsonRejection>,
) -> Result<i64, ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    if req.images.is_empty() {
        return Err(ApiError::BadRequest("At least one image is required".into()));
    }
    let images = decode_images(&req.images)?;

    run_db(state, move |db| db.submit_pereval(&req, &images)).await
}

/// GET /submitData/{id}
pub async fn get_pereval(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PerevalResponse>, ApiError> {
    let (row, images) = run_db(&state, move |db| db.get_pereval(id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Pereval not found".into()))?;

    Ok(Json(to_response(row, images)))
}

/// PATCH /submitData/{id} — replace a pass while it is still `new`.
/// Business rejections answer 200 with `state: 0`.
pub async fn update_pereval(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<SubmitPerevalRequest>, JsonRejection>,
) -> Response {
    let (status, state_flag, message) = match update(&state, id, payload).await {
        Ok(UpdateOutcome::Updated) => {
            info!("Pereval {} updated", id);
            (StatusCode::OK, 1, "Pereval updated successfully".to_string())
        }
        Ok(UpdateOutcome::NotFound) => (StatusCode::OK, 0, "Pereval not found".to_string()),
        Ok(UpdateOutcome::NotEditable(current)) => {
            warn!("Refused edit of pereval {} in status '{}'", id, current);
            (
                StatusCode::OK,
                0,
                format!(
                    "Pereval can't be edited because it's not in 'new' status (current status: '{}')",
                    current
                ),
            )
        }
        Err(ApiError::BadRequest(message)) => (StatusCode::OK, 0, message),
        Err(err) => (err.status(), 0, err.public_message()),
    };

    (
        status,
        Json(UpdateResponse {
            state: state_flag,
            message,
        }),
    )
        .into_response()
}

async fn update(
    state: &AppState,
    id: i64,
    payload: Result<Json<SubmitPerevalRequest>, JsonRejection>,
) -> Result<UpdateOutcome, ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    // Images are decoded before the pass is looked up, so a bad payload is
    // reported even for an unknown id.
    let images = decode_images(&req.images)?;

    run_db(state, move |db| db.update_pereval(id, &req, &images)).await
}

/// GET /submitData/?user__email=...
pub async fn list_perevals(
    State(state): State<AppState>,
    Query(query): Query<PerevalListQuery>,
) -> Result<Json<Vec<PerevalSummary>>, ApiError> {
    let rows = run_db(&state, move |db| db.list_perevals_by_email(&query.user_email)).await?;

    let summaries = rows
        .into_iter()
        .map(|row| PerevalSummary {
            id: row.id,
            beauty_title: row.beauty_title,
            title: row.title,
            status: row.status,
        })
        .collect();

    Ok(Json(summaries))
}

fn decode_images(images: &[ImagePayload]) -> Result<Vec<NewImage>, ApiError> {
    images
        .iter()
        .map(|image| {
            let data = B64
                .decode(image.img.trim())
                .map_err(|_| ApiError::BadRequest("Invalid image data (must be base64)".into()))?;
            Ok(NewImage {
                data,
                title: image.title.clone(),
            })
        })
        .collect()
}

fn to_response(row: PerevalRow, images: Vec<ImageRow>) -> PerevalResponse {
    // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
    let date_added = NaiveDateTime::parse_from_str(&row.date_added, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| warn!("Corrupt date_added '{}' on pereval {}: {}", row.date_added, row.id, e))
        .ok();

    PerevalResponse {
        id: row.id,
        date_added,
        status: row.status,
        beauty_title: row.beauty_title,
        title: row.title,
        other_titles: row.other_titles,
        connect: row.connect,
        add_time: row.add_time,
        coords: CoordsPayload {
            latitude: row.latitude,
            longitude: row.longitude,
            height: row.height,
        },
        user: UserPayload {
            email: row.email,
            phone: row.phone,
            fam: row.fam,
            name: row.name,
            otc: row.otc,
        },
        images: images
            .into_iter()
            .map(|image| ImagePayload {
                img: B64.encode(&image.img),
                title: image.title,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use pereval_types::models::PassStatus;
    use serde_json::json;

    use crate::test_support::{PIXEL, app, send, submission};

    #[tokio::test]
    async fn submit_returns_new_id() {
        let (app, _) = app();
        let (status, body) =
            send(&app, "POST", "/submitData/", Some(submission("test@example.com", "Тест"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 200);
        assert!(body["id"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn submit_rejects_out_of_range_latitude() {
        let (app, state) = app();
        let mut payload = submission("test@example.com", "Тест");
        payload["coords"]["latitude"] = json!(100);

        let (status, body) = send(&app, "POST", "/submitData", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);
        assert!(body["id"].is_null());
        assert!(state.db.search_users(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_bad_base64_and_missing_images() {
        let (app, _) = app();

        let mut payload = submission("test@example.com", "Тест");
        payload["images"][0]["img"] = json!("***not base64***");
        let (status, body) = send(&app, "POST", "/submitData", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid image data (must be base64)");

        let mut payload = submission("test@example.com", "Тест");
        payload["images"] = json!([]);
        let (status, _) = send(&app, "POST", "/submitData", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn read_back_matches_submission() {
        let (app, _) = app();
        let (_, created) =
            send(&app, "POST", "/submitData", Some(submission("test@example.com", "Тест"))).await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(&app, "GET", &format!("/submitData/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id);
        assert_eq!(body["status"], "new");
        assert_eq!(body["title"], "Тест");
        assert_eq!(body["add_time"], "12:34:56");
        assert_eq!(body["coords"]["height"], 2500);
        assert_eq!(body["coords"]["latitude"], 45.123456);
        assert_eq!(body["user"]["otc"], "Иванович");
        assert_eq!(body["images"].as_array().unwrap().len(), 1);
        assert_eq!(body["images"][0]["img"], PIXEL);
        assert!(body["date_added"].is_string());
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let (app, _) = app();
        let (status, _) = send(&app, "GET", "/submitData/9999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_new_pass_is_visible() {
        let (app, _) = app();
        let (_, created) =
            send(&app, "POST", "/submitData", Some(submission("test@example.com", "Тест"))).await;
        let id = created["id"].as_i64().unwrap();

        let mut edit = submission("test@example.com", "Обновленный тест");
        edit["images"] = json!([
            { "img": PIXEL, "title": "one" },
            { "img": PIXEL, "title": "two" }
        ]);
        let (status, body) = send(&app, "PATCH", &format!("/submitData/{}", id), Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], 1);

        let (_, read) = send(&app, "GET", &format!("/submitData/{}", id), None).await;
        assert_eq!(read["title"], "Обновленный тест");
        assert_eq!(read["images"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_refused_when_not_new() {
        let (app, state) = app();
        let (_, created) =
            send(&app, "POST", "/submitData", Some(submission("test@example.com", "Тест"))).await;
        let id = created["id"].as_i64().unwrap();

        state
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE pereval_added SET status = ?1 WHERE id = ?2",
                    (PassStatus::Pending.as_str(), id),
                )?;
                Ok(())
            })
            .unwrap();

        let edit = submission("test@example.com", "Не должно обновиться");
        let (status, body) = send(&app, "PATCH", &format!("/submitData/{}", id), Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], 0);
        assert!(body["message"].as_str().unwrap().contains("not in 'new' status"));

        let (_, read) = send(&app, "GET", &format!("/submitData/{}", id), None).await;
        assert_eq!(read["title"], "Тест");
        assert_eq!(read["status"], "pending");
    }

    #[tokio::test]
    async fn update_missing_and_invalid() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            "PATCH",
            "/submitData/404",
            Some(submission("test@example.com", "Тест")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], 0);
        assert_eq!(body["message"], "Pereval not found");

        let mut bad = submission("test@example.com", "Тест");
        bad["add_time"] = json!("noon");
        let (status, body) = send(&app, "PATCH", "/submitData/1", Some(bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["state"], 0);
    }

    #[tokio::test]
    async fn submit_wraps_unreadable_body_in_envelope() {
        let (app, _) = app();
        let mut payload = submission("test@example.com", "Тест");
        payload.as_object_mut().unwrap().remove("title");

        let (status, body) = send(&app, "POST", "/submitData", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);
        assert!(body["message"].as_str().unwrap().contains("title"));
        assert!(body["id"].is_null());

        let mut payload = submission("test@example.com", "Тест");
        payload["coords"]["latitude"] = json!("north");
        let (status, body) = send(&app, "POST", "/submitData", Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);
    }

    #[tokio::test]
    async fn update_wraps_unreadable_body_in_envelope() {
        let (app, _) = app();
        let (_, created) =
            send(&app, "POST", "/submitData", Some(submission("test@example.com", "Тест"))).await;
        let id = created["id"].as_i64().unwrap();

        let mut payload = submission("test@example.com", "Тест");
        payload.as_object_mut().unwrap().remove("title");
        let (status, body) = send(&app, "PATCH", &format!("/submitData/{}", id), Some(payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["state"], 0);
        assert!(body["message"].as_str().unwrap().contains("title"));
    }

    #[tokio::test]
    async fn update_with_bad_base64_keeps_stored_pass() {
        let (app, _) = app();
        let (_, created) =
            send(&app, "POST", "/submitData", Some(submission("test@example.com", "Тест"))).await;
        let id = created["id"].as_i64().unwrap();

        let mut edit = submission("test@example.com", "Не должно обновиться");
        edit["images"][0]["img"] = json!("***");
        let (status, body) = send(&app, "PATCH", &format!("/submitData/{}", id), Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], 0);
        assert_eq!(body["message"], "Invalid image data (must be base64)");

        let (_, read) = send(&app, "GET", &format!("/submitData/{}", id), None).await;
        assert_eq!(read["title"], "Тест");
        assert_eq!(read["images"].as_array().unwrap().len(), 1);
        assert_eq!(read["images"][0]["img"], PIXEL);
        assert_eq!(read["images"][0]["title"], "Тестовое изображение");
    }

    #[tokio::test]
    async fn list_by_email() {
        let (app, _) = app();
        send(&app, "POST", "/submitData", Some(submission("test@example.com", "Тест"))).await;
        send(&app, "POST", "/submitData", Some(submission("test@example.com", "Второй перевал"))).await;
        send(&app, "POST", "/submitData", Some(submission("other@example.com", "Чужой"))).await;

        let (status, body) =
            send(&app, "GET", "/submitData/?user__email=test@example.com", None).await;
        assert_eq!(status, StatusCode::OK);
        let mut titles: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["title"].as_str().unwrap())
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["Второй перевал", "Тест"]);
        assert!(body.as_array().unwrap().iter().all(|p| p["status"] == "new"));

        let (status, body) =
            send(&app, "GET", "/submitData/?user__email=empty@example.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}

//! Video upload and classification (/predict)

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;

use super::auth::AuthUser;
use crate::AppState;
use crate::constants::CREATED_AT_FORMAT;
use crate::domain::history;
use crate::inference::Label;
use crate::services::error::{ApiError, LogErr};
use crate::storage;

/// Multipart field carrying the video
const VIDEO_FIELD: &str = "video";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/predict", post(predict))
}

#[derive(Serialize)]
struct PredictResponse {
    label: Label,
    confidence: f64,
    inference_time: f64,
    model: String,
    created_at: String,
    id: i64,
}

struct Upload {
    filename: String,
    data: Bytes,
}

/// First `video` field of the form, if any. Other fields are skipped.
async fn read_video_field(multipart: &mut Multipart) -> Result<Option<Upload>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .log_status("Multipart read error", StatusCode::BAD_REQUEST)?
    {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .log_status("Upload read error", StatusCode::BAD_REQUEST)?;

        return Ok(Some(Upload { filename, data }));
    }

    Ok(None)
}

/// POST /predict - Classify an uploaded video and record it in history
async fn predict(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let upload = read_video_field(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::bad_request("No video file uploaded"))?;

    if upload.filename.is_empty() {
        return Err(ApiError::bad_request("Empty filename"));
    }
    let filename = storage::sanitize_filename(&upload.filename)
        .ok_or_else(|| ApiError::bad_request("Invalid filename"))?
        .to_string();

    let path = storage::save_upload(&state.config.upload_dir, &filename, &upload.data)
        .await
        .log_500("Failed to save upload")?;

    let pipeline = state.pipeline.clone();
    let prediction = tokio::task::spawn_blocking(move || pipeline.predict(&path))
        .await
        .log_500("Prediction task failed")??;

    let created_at = Local::now().format(CREATED_AT_FORMAT).to_string();
    let id = history::insert_history(&state.db, user_id, &filename, &prediction, &created_at)
        .await
        .log_500("Insert history error")?;

    Ok(Json(PredictResponse {
        label: prediction.label,
        confidence: prediction.confidence,
        inference_time: prediction.inference_time_seconds,
        model: prediction.model_identifier,
        created_at,
        id,
    }))
}

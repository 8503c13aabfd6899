//! Prediction history - DB queries for the per-user history log

use serde::Serialize;
use sqlx::{Executor, Sqlite};

use crate::inference::PredictionResult;

/// A history row as returned by `/api/history`
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub filename: String,
    pub label: String,
    pub confidence: f64,
    pub created_at: String,
}

/// Record a prediction for `user_id`, returning the new id.
/// `filename` is the name the client uploaded, not the stored name.
pub async fn insert_history<'e, E>(
    executor: E,
    user_id: i64,
    filename: &str,
    prediction: &PredictionResult,
    created_at: &str,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO history (user_id, filename, label, confidence, inference_time, model, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(filename)
    .bind(prediction.label.as_str())
    .bind(prediction.confidence)
    .bind(prediction.inference_time_seconds)
    .bind(&prediction.model_identifier)
    .bind(created_at)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// All history for a user, newest first
pub async fn list_history<'e, E>(executor: E, user_id: i64) -> Result<Vec<HistoryEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, filename, label, confidence, created_at
        FROM history
        WHERE user_id = $1
        ORDER BY id DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

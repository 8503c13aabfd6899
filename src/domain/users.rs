//! User domain - DB queries for users
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&SqlitePool` (for standalone queries) and `&mut SqliteConnection` (for transactions).

use sqlx::{Executor, Sqlite};

#[derive(Debug, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password: String,
}

/// Insert a user, returning the new id
pub async fn create_user<'e, E>(
    executor: E,
    email: &str,
    password_hash: &str,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO users (email, password)
        VALUES ($1, $2)
        RETURNING id
        "#,
    )
    .bind(email)
    .bind(password_hash)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

/// Look up a user by email
pub async fn get_user_by_email<'e, E>(executor: E, email: &str) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT id, email, password FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await
}

/// Look up a user by id
pub async fn get_user_by_id<'e, E>(executor: E, user_id: i64) -> Result<Option<User>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("SELECT id, email, password FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

/// True when the error is a UNIQUE constraint violation (duplicate email)
pub fn is_duplicate(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

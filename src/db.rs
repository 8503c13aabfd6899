//! Database connection and schema setup
//!
//! Domain functions take any sqlx `Executor`, so they can be called with
//! either the pool or an open transaction:
//!
//! ```ignore
//! let mut tx = state.db.begin().await?;
//! let id = users::create_user(&mut *tx, email, &hash).await?;
//! tx.commit().await?;
//! ```

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if missing) the SQLite database at `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
}

/// Apply embedded migrations from `migrations/`.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Fresh in-memory database with the schema applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // One long-lived connection: each in-memory connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    migrate(&pool).await.expect("apply migrations");
    pool
}

//! Application constants

/// Default SQLite database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://deepcheck.db?mode=rwc";

/// Default directory for uploaded videos
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Default classifier artifact
pub const DEFAULT_MODEL_PATH: &str = "deepfake_model.onnx";

/// Default listen port
pub const DEFAULT_PORT: u16 = 5000;

/// Maximum upload size for videos (200 MB)
pub const MAX_UPLOAD_SIZE: usize = 200 * 1024 * 1024;

/// Signing secret used when JWT_SECRET is unset outside production
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Display format for history timestamps, e.g. `16/10/2026, 02:05:09 PM`
pub const CREATED_AT_FORMAT: &str = "%d/%m/%Y, %I:%M:%S %p";

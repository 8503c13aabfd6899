//! Runtime configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | `sqlite://deepcheck.db?mode=rwc` |
//! | `UPLOAD_DIR` | `uploads` |
//! | `MODEL_PATH` | `deepfake_model.onnx` |
//! | `MODEL_OUTPUT_HEAD` | `auto` (`softmax`, `sigmoid`) |
//! | `MODEL_CHANNEL_ORDER` | `bgr` (`rgb`) |
//! | `MAX_FRAMES` | `30` (also the upper bound) |
//! | `JWT_SECRET` | dev fallback, required when `ENV=prod` |
//! | `PASSWORD_HASH_ITERATIONS` | `600000` |
//! | `PORT` | `5000` |
//! | `MAX_UPLOAD_BYTES` | 200 MB |
//! | `FFMPEG_BIN` / `FFPROBE_BIN` | `ffmpeg` / `ffprobe` |

use std::path::PathBuf;

use crate::constants::{
    DEFAULT_DATABASE_URL, DEFAULT_MODEL_PATH, DEFAULT_PORT, DEFAULT_UPLOAD_DIR, DEV_JWT_SECRET,
    MAX_UPLOAD_SIZE,
};
use crate::inference::{ChannelOrder, MAX_FRAMES, OutputHead, PipelineOptions};
use crate::services::password::DEFAULT_ITERATIONS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("JWT_SECRET must be set when ENV=prod")]
    MissingSecret,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub model_path: PathBuf,
    /// `None` resolves the head from the model's output shape
    pub output_head: Option<OutputHead>,
    pub channel_order: ChannelOrder,
    pub max_frames: usize,
    pub jwt_secret: Vec<u8>,
    pub password_iterations: u32,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let is_prod = get("ENV").as_deref() == Some("prod");

        let jwt_secret = match get("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret.into_bytes(),
            None if is_prod => return Err(ConfigError::MissingSecret),
            None => {
                log::warn!("JWT_SECRET not set, using development secret");
                DEV_JWT_SECRET.as_bytes().to_vec()
            }
        };

        let output_head = match get("MODEL_OUTPUT_HEAD") {
            None => None,
            Some(v) if v.trim().eq_ignore_ascii_case("auto") => None,
            Some(v) => Some(v.parse::<OutputHead>().map_err(|reason| ConfigError::Invalid {
                name: "MODEL_OUTPUT_HEAD",
                value: v.clone(),
                reason,
            })?),
        };

        let channel_order = match get("MODEL_CHANNEL_ORDER") {
            None => ChannelOrder::default(),
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                name: "MODEL_CHANNEL_ORDER",
                value: v.clone(),
                reason,
            })?,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            upload_dir: PathBuf::from(
                get("UPLOAD_DIR").unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            ),
            model_path: PathBuf::from(
                get("MODEL_PATH").unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            ),
            output_head,
            channel_order,
            max_frames: positive(&get, "MAX_FRAMES")
                .map(|n: usize| {
                    if n > MAX_FRAMES {
                        log::warn!("MAX_FRAMES={} exceeds the cap, using {}", n, MAX_FRAMES);
                    }
                    n.min(MAX_FRAMES)
                })
                .unwrap_or(MAX_FRAMES),
            jwt_secret,
            password_iterations: positive(&get, "PASSWORD_HASH_ITERATIONS")
                .unwrap_or(DEFAULT_ITERATIONS),
            port: positive(&get, "PORT").unwrap_or(DEFAULT_PORT),
            max_upload_bytes: positive(&get, "MAX_UPLOAD_BYTES").unwrap_or(MAX_UPLOAD_SIZE),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_bin: get("FFPROBE_BIN").unwrap_or_else(|| "ffprobe".to_string()),
            secure_cookies: is_prod,
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_frames: self.max_frames,
            channel_order: self.channel_order,
        }
    }
}

/// Parsed numeric variable; missing, unparsable, or zero values fall back.
fn positive<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    get(key)
        .and_then(|s| s.trim().parse().ok())
        .filter(|v: &T| *v > T::default())
}

#[cfg(test)]
pub(crate) fn test_config(upload_dir: PathBuf) -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        upload_dir,
        model_path: PathBuf::from("stub_model.onnx"),
        output_head: None,
        channel_order: ChannelOrder::Bgr,
        max_frames: MAX_FRAMES,
        jwt_secret: b"test-secret".to_vec(),
        password_iterations: 1_000,
        port: DEFAULT_PORT,
        max_upload_bytes: MAX_UPLOAD_SIZE,
        ffmpeg_bin: "ffmpeg".to_string(),
        ffprobe_bin: "ffprobe".to_string(),
        secure_cookies: false,
    }
}

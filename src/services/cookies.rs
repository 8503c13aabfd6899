//! Cookie building utilities for session management
//!
//! Centralizes cookie formatting so login and logout stay consistent.

use axum::http::{HeaderValue, StatusCode};

/// Cookie configuration constants
pub mod config {
    /// Access token cookie name
    pub const ACCESS_TOKEN_NAME: &str = "access_token";
    /// Access token max-age in seconds (12 hours)
    pub const ACCESS_TOKEN_MAX_AGE_SECS: u32 = 12 * 60 * 60;
    /// Path for access token cookie (all routes)
    pub const ACCESS_COOKIE_PATH: &str = "/";
}

/// Build an access token Set-Cookie header value
pub fn build_access_cookie(token: &str, secure: bool) -> Result<HeaderValue, StatusCode> {
    let secure = if secure { " Secure;" } else { "" };
    let cookie = format!(
        "{}={}; HttpOnly;{} SameSite=Lax; Path={}; Max-Age={}",
        config::ACCESS_TOKEN_NAME,
        token,
        secure,
        config::ACCESS_COOKIE_PATH,
        config::ACCESS_TOKEN_MAX_AGE_SECS
    );
    cookie.parse().map_err(|_| {
        log::error!("Failed to parse access cookie header");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Build a Set-Cookie header to clear the access token
pub fn build_clear_access_cookie() -> HeaderValue {
    HeaderValue::from_static("access_token=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_cookie_attributes() {
        let cookie = build_access_cookie("abc", false).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("access_token=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Secure"));

        let secure = build_access_cookie("abc", true).unwrap();
        assert!(secure.to_str().unwrap().contains("Secure;"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = build_clear_access_cookie();
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
    }
}

use std::env;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider settings resolved from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub gemini_api_base: String,
    pub gemini_api_key: Option<String>,
    /// `None` leaves request duration to the remote side.
    pub request_timeout: Option<Duration>,
    pub image_model: Option<String>,
    pub text_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_api_key: None,
            request_timeout: None,
            image_model: None,
            text_model: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_base: first_non_empty_env(&["GEMINI_API_BASE"])
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            gemini_api_key: first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            request_timeout: first_non_empty_env(&["ARCHIVE_REQUEST_TIMEOUT"])
                .and_then(|value| parse_timeout_seconds(&value)),
            image_model: first_non_empty_env(&["ARCHIVE_IMAGE_MODEL"]),
            text_model: first_non_empty_env(&["ARCHIVE_TEXT_MODEL"]),
        }
    }
}

pub fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn parse_timeout_seconds(raw: &str) -> Option<Duration> {
    let seconds: f64 = raw.trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_parsing_rejects_nonsense() {
        assert_eq!(parse_timeout_seconds("90"), Some(Duration::from_secs(90)));
        assert_eq!(
            parse_timeout_seconds(" 1.5 "),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_timeout_seconds("0"), None);
        assert_eq!(parse_timeout_seconds("-3"), None);
        assert_eq!(parse_timeout_seconds("soon"), None);
    }

    #[test]
    fn default_points_at_public_gemini_endpoint() {
        let config = EngineConfig::default();
        assert_eq!(config.gemini_api_base, DEFAULT_GEMINI_API_BASE);
        assert!(config.request_timeout.is_none());
    }
}

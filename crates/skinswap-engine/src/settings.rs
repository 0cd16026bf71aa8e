use std::env;
use std::path::PathBuf;

use skinswap_contracts::history::DEFAULT_HISTORY_LIMIT;

pub const DEFAULT_BACKEND: &str = "gemini";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

/// Runtime configuration for a studio session.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioSettings {
    pub home: PathBuf,
    pub events_path: PathBuf,
    pub history_limit: usize,
    pub backend: String,
    pub image_model: String,
    /// Cap on concurrent backend calls within a batch; `None` sends all at once.
    pub max_in_flight: Option<usize>,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
}

impl StudioSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let home = value("SKINSWAP_HOME")
            .map(PathBuf::from)
            .or_else(|| value("HOME").map(|home| PathBuf::from(home).join(".skinswap")))
            .unwrap_or_else(|| PathBuf::from(".skinswap"));
        let events_path = value("SKINSWAP_EVENTS")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join("events.jsonl"));
        let history_limit = value("SKINSWAP_HISTORY_LIMIT")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|limit| *limit >= 1)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);
        let max_in_flight = value("SKINSWAP_MAX_IN_FLIGHT")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|cap| *cap > 0);
        let request_timeout_s = value("SKINSWAP_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|seconds| seconds.is_finite())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
            .clamp(15.0, 300.0);
        let transport_retries = value("SKINSWAP_TRANSPORT_RETRIES")
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0)
            .min(4);

        Self {
            home,
            events_path,
            history_limit,
            backend: value("SKINSWAP_BACKEND").unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            image_model: value("SKINSWAP_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            max_in_flight,
            request_timeout_s,
            transport_retries,
            gemini_api_key: value("GEMINI_API_KEY").or_else(|| value("GOOGLE_API_KEY")),
            gemini_api_base: value("GEMINI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.home.join("history.json")
    }

    /// Point the session at another data directory, moving the default events file with it.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        if self.events_path == self.home.join("events.jsonl") {
            self.events_path = home.join("events.jsonl");
        }
        self.home = home;
        self
    }
}

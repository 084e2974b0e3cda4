// Local manager configuration and the remote messaging configuration served
// by the backend

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{PushError, PushResult};

/// Sentinel values the backend ships before the project is set up
/// (`YOUR_API_KEY`, `YOUR_VAPID_PUBLIC_KEY`, ...)
static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(YOUR_[A-Z0-9_]+|<[^>]*>|changeme)\s*$").ok());

/// True when `value` is empty or one of the placeholder sentinels.
pub fn is_placeholder(value: &str) -> bool {
    if value.trim().is_empty() {
        return true;
    }
    match PLACEHOLDER.as_ref() {
        Some(re) => re.is_match(value),
        None => value.trim_start().starts_with("YOUR_"),
    }
}

/// Manager settings. Every field has a default matching the deployed web app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Path of the background worker script
    pub worker_script_path: String,
    /// Scope the worker is registered and looked up under
    pub worker_scope: String,
    /// Upper bound for the whole enable flow
    pub enable_timeout_ms: u64,
    pub icon_path: String,
    pub badge_path: String,
    /// Vibration pattern for foreground notifications (on, off, on ... ms)
    pub foreground_vibration: Vec<u32>,
    pub default_title: String,
    pub default_body: String,
    /// Prefix of the per-message uniqueness tag
    pub tag_prefix: String,
    pub locale: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_script_path: "/firebase-messaging-sw.js".to_string(),
            worker_scope: "/".to_string(),
            enable_timeout_ms: 15_000,
            icon_path: "/static/img/logo.svg".to_string(),
            badge_path: "/static/img/logo.svg".to_string(),
            foreground_vibration: vec![500, 200, 500],
            default_title: "DietNotify Reminder".to_string(),
            default_body: "Time to eat!".to_string(),
            tag_prefix: "diet-notification-".to_string(),
            locale: "en-US".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn enable_timeout(&self) -> Duration {
        Duration::from_millis(self.enable_timeout_ms)
    }

    pub fn with_enable_timeout(mut self, timeout: Duration) -> Self {
        self.enable_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_worker_script(mut self, path: impl Into<String>, scope: impl Into<String>) -> Self {
        self.worker_script_path = path.into();
        self.worker_scope = scope.into();
        self
    }

    /// Worker script URL with a fresh cache-busting query parameter, so a
    /// stale cached script is never served.
    pub fn cache_busted_worker_url(&self, nonce: i64) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("v", &nonce.to_string())
            .finish();
        let separator = if self.worker_script_path.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}{}", self.worker_script_path, separator, query)
    }
}

/// SDK configuration block as served by `/api/notifications/firebase-config`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
}

impl SdkConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !is_placeholder(key))
    }
}

/// Remote configuration payload: `{config, vapidKey}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub config: Option<SdkConfig>,
    #[serde(default, rename = "vapidKey")]
    pub vapid_key: Option<String>,
}

impl RemoteConfig {
    /// SDK config, or `NotConfigured` when missing or placeholder
    pub fn sdk_config(&self) -> PushResult<&SdkConfig> {
        match &self.config {
            Some(config) if config.is_configured() => Ok(config),
            Some(_) => Err(PushError::NotConfigured(
                "SDK api key is a placeholder".to_string(),
            )),
            None => Err(PushError::NotConfigured(
                "backend returned no SDK config".to_string(),
            )),
        }
    }

    pub fn vapid_key(&self) -> PushResult<VapidKey> {
        self.vapid_key
            .as_deref()
            .and_then(VapidKey::parse)
            .ok_or_else(|| PushError::NotConfigured("VAPID public key is not set".to_string()))
    }
}

/// Public key authorizing push subscriptions. Only constructible from a
/// non-placeholder value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VapidKey(String);

impl VapidKey {
    pub fn parse(value: &str) -> Option<Self> {
        if is_placeholder(value) {
            None
        } else {
            Some(Self(value.trim().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

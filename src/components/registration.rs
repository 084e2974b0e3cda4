// Contract with the remote registration service: request/response bodies for
// each /api/notifications endpoint and the service seam itself

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::RemoteConfig;
use super::{BoxFuture, DeviceToken, PushResult};

/// Device metadata sent alongside a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
}

impl DeviceInfo {
    pub fn new(user_agent: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            platform: platform.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Successful `/register` answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReceipt {
    #[serde(default)]
    pub message: Option<String>,
    /// Meal reminders the backend scheduled for this device
    #[serde(default)]
    pub scheduled_meals: Option<u32>,
}

/// Stored notification preferences. Missing fields take the backend defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub enabled: bool,
    pub lead_time_minutes: u32,
    pub custom_timings: HashMap<String, serde_json::Value>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: false,
            lead_time_minutes: 5,
            custom_timings: HashMap::new(),
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }
}

/// Partial preference update; unset fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_time_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_timings: Option<HashMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_end: Option<String>,
}

impl PreferenceUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn with_lead_time(mut self, minutes: u32) -> Self {
        self.lead_time_minutes = Some(minutes);
        self
    }
}

/// Successful preference update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceUpdateReceipt {
    #[serde(default)]
    pub message: Option<String>,
    /// Reminders rescheduled after enabling
    #[serde(default)]
    pub scheduled_meals: Option<u32>,
    /// Reminders cancelled after disabling
    #[serde(default)]
    pub cancelled: Option<u32>,
}

/// `/status` answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    pub registered_devices: u32,
    pub enabled: bool,
    pub lead_time_minutes: u32,
    pub scheduled_reminders: u32,
    pub reminders: Vec<serde_json::Value>,
}

/// Remote registration service. Implementations convert every transport or
/// server failure into a `PushError`; none of these calls panic or retry.
pub trait RegistrationService: Send + Sync {
    /// `GET /api/notifications/firebase-config`
    fn remote_config(&self) -> BoxFuture<'_, PushResult<RemoteConfig>>;

    /// `POST /api/notifications/register`
    fn register(
        &self,
        token: DeviceToken,
        device: DeviceInfo,
    ) -> BoxFuture<'_, PushResult<RegisterReceipt>>;

    /// `POST /api/notifications/unregister`
    fn unregister(&self, token: DeviceToken) -> BoxFuture<'_, PushResult<()>>;

    /// `GET /api/notifications/preferences`
    fn preferences(&self) -> BoxFuture<'_, PushResult<Preferences>>;

    /// `POST /api/notifications/preferences`
    fn update_preferences(
        &self,
        update: PreferenceUpdate,
    ) -> BoxFuture<'_, PushResult<PreferenceUpdateReceipt>>;

    /// `GET /api/notifications/status`
    fn status(&self) -> BoxFuture<'_, PushResult<StatusReport>>;

    /// `POST /api/notifications/test`. Without a token the backend falls back
    /// to the user's first registered device.
    fn send_test(&self, token: Option<DeviceToken>) -> BoxFuture<'_, PushResult<()>>;
}

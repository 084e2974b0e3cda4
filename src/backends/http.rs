// HTTP registration backend - reqwest client for /api/notifications/*

use std::time::Duration;

use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::components::{
    BoxFuture, DeviceInfo, DeviceToken, PreferenceUpdate, PreferenceUpdateReceipt, Preferences,
    PushError, PushResult, RegisterReceipt, RegistrationService, RemoteConfig, StatusReport,
};

const CONFIG_PATH: &str = "api/notifications/firebase-config";
const REGISTER_PATH: &str = "api/notifications/register";
const UNREGISTER_PATH: &str = "api/notifications/unregister";
const PREFERENCES_PATH: &str = "api/notifications/preferences";
const STATUS_PATH: &str = "api/notifications/status";
const TEST_PATH: &str = "api/notifications/test";

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServiceConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Session cookie forwarded on every request; the endpoints are
    /// authenticated by the web session
    pub session_cookie: Option<String>,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: concat!("dietnotify-push/", env!("CARGO_PKG_VERSION")).to_string(),
            session_cookie: None,
        }
    }
}

/// Success flag and error message most endpoints wrap their body in
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: T,
}

impl<T> Envelope<T> {
    /// `required` endpoints must say `success: true`; the others only fail on
    /// an explicit `success: false`.
    fn into_body(self, required: bool, operation: &str) -> PushResult<T> {
        let ok = match self.success {
            Some(flag) => flag,
            None => !required,
        };
        if ok {
            Ok(self.body)
        } else {
            Err(PushError::Rejected(
                self.error
                    .unwrap_or_else(|| format!("{operation} was not accepted")),
            ))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    token: &'a str,
    device_info: &'a DeviceInfo,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    token: Option<&'a str>,
}

/// Registration service backed by the web app's REST endpoints
#[derive(Debug, Clone)]
pub struct HttpRegistrationService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRegistrationService {
    pub fn new(base_url: Url) -> PushResult<Self> {
        Self::with_config(base_url, HttpServiceConfig::default())
    }

    pub fn with_config(base_url: Url, config: HttpServiceConfig) -> PushResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| PushError::Transport(format!("invalid session cookie: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| PushError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: normalize_base(base_url),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> PushResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PushError::Transport(format!("invalid endpoint '{path}': {e}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> PushResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            tracing::debug!(status = status.as_u16(), %message, "registration service error");
            return Err(PushError::Server {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&body)
            .map_err(|e| PushError::Transport(format!("invalid response body: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> PushResult<T> {
        let url = self.endpoint(path)?;
        self.send(self.client.get(url)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> PushResult<T> {
        let url = self.endpoint(path)?;
        self.send(self.client.post(url).json(body)).await
    }
}

/// Make sure relative joins land under the base path instead of replacing
/// its last segment.
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

impl RegistrationService for HttpRegistrationService {
    fn remote_config(&self) -> BoxFuture<'_, PushResult<RemoteConfig>> {
        Box::pin(async move { self.get(CONFIG_PATH).await })
    }

    fn register(
        &self,
        token: DeviceToken,
        device: DeviceInfo,
    ) -> BoxFuture<'_, PushResult<RegisterReceipt>> {
        Box::pin(async move {
            let request = RegisterRequest {
                token: token.as_str(),
                device_info: &device,
            };
            let envelope: Envelope<RegisterReceipt> = self.post(REGISTER_PATH, &request).await?;
            envelope.into_body(true, "registration")
        })
    }

    fn unregister(&self, token: DeviceToken) -> BoxFuture<'_, PushResult<()>> {
        Box::pin(async move {
            let request = TokenRequest {
                token: Some(token.as_str()),
            };
            let envelope: Envelope<Empty> = self.post(UNREGISTER_PATH, &request).await?;
            envelope.into_body(true, "unregistration").map(|_| ())
        })
    }

    fn preferences(&self) -> BoxFuture<'_, PushResult<Preferences>> {
        Box::pin(async move { self.get(PREFERENCES_PATH).await })
    }

    fn update_preferences(
        &self,
        update: PreferenceUpdate,
    ) -> BoxFuture<'_, PushResult<PreferenceUpdateReceipt>> {
        Box::pin(async move {
            let envelope: Envelope<PreferenceUpdateReceipt> =
                self.post(PREFERENCES_PATH, &update).await?;
            envelope.into_body(false, "preference update")
        })
    }

    fn status(&self) -> BoxFuture<'_, PushResult<StatusReport>> {
        Box::pin(async move {
            let envelope: Envelope<StatusReport> = self.get(STATUS_PATH).await?;
            envelope.into_body(false, "status check")
        })
    }

    fn send_test(&self, token: Option<DeviceToken>) -> BoxFuture<'_, PushResult<()>> {
        Box::pin(async move {
            let request = TokenRequest {
                token: token.as_ref().map(DeviceToken::as_str),
            };
            let envelope: Envelope<Empty> = self.post(TEST_PATH, &request).await?;
            envelope.into_body(true, "test notification").map(|_| ())
        })
    }
}

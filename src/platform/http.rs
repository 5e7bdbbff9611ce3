//! HTTP bridge implementation of the platform session API.
//!
//! Talks to a session bridge service that owns the actual client
//! protocol. Each connection is identified by an opaque session token;
//! the token is the on-disk session artifact, so a restart can resume an
//! authorized session without a new code. New messages are received by
//! long-polling the bridge's updates endpoint and dispatched to the
//! handlers registered per channel id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AuthError, TransportError};
use crate::platform::{
    EventHandler, NewMessage, PlatformCredentials, PlatformGateway, PlatformSession,
    SubscriptionToken,
};

/// Long-poll wait requested from the bridge, in seconds.
const UPDATES_POLL_TIMEOUT_SECS: u64 = 25;

/// Backoff after a failed updates poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Gateway opening sessions against an HTTP session bridge.
pub struct HttpPlatformGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPlatformGateway {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { base_url, client })
    }
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    session_token: String,
    #[serde(default)]
    authorized: bool,
}

#[async_trait]
impl PlatformGateway for HttpPlatformGateway {
    async fn connect(
        &self,
        session_file: &Path,
        creds: &PlatformCredentials,
    ) -> Result<Arc<dyn PlatformSession>, TransportError> {
        let stored_token = read_artifact(session_file).await;

        let body = serde_json::json!({
            "api_id": creds.api_id,
            "api_hash": creds.api_hash.expose_secret(),
            "session_token": stored_token,
        });

        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(TransportError::Api { status, message });
        }

        let connected: ConnectResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("connect response: {e}")))?;

        write_artifact(session_file, &connected.session_token).await?;
        debug!(
            artifact = %session_file.display(),
            authorized = connected.authorized,
            "Platform session connected"
        );

        Ok(Arc::new(HttpPlatformSession {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            token: connected.session_token,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
            poll_task: Mutex::new(None),
        }))
    }
}

/// One bridge-backed connection.
pub struct HttpPlatformSession {
    base_url: String,
    client: reqwest::Client,
    token: String,
    /// Registered new-message handlers: token → (channel filter, callback).
    handlers: Arc<Mutex<HashMap<u64, (i64, EventHandler)>>>,
    next_token: AtomicU64,
    /// The long-poll dispatch loop, started on first subscription.
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct SessionStateResponse {
    #[serde(default)]
    authorized: bool,
}

#[derive(Debug, Deserialize)]
struct UpdateDto {
    update_id: i64,
    channel_id: i64,
    message_id: i64,
    #[serde(default)]
    text: String,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfoResponse {
    title: Option<String>,
}

impl HttpPlatformSession {
    fn url(&self, path: &str) -> String {
        session_url(&self.base_url, &self.token, path)
    }

    /// Start the long-poll loop if it isn't running yet.
    fn ensure_polling(&self) {
        let mut slot = match self.poll_task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let client = self.client.clone();
        let url = self.url("updates");
        let handlers = Arc::clone(&self.handlers);

        *slot = Some(tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Platform update loop started");

            loop {
                let resp = match client
                    .get(&url)
                    .query(&[
                        ("offset", offset.to_string()),
                        ("timeout", UPDATES_POLL_TIMEOUT_SECS.to_string()),
                    ])
                    // Long poll: allow the bridge its full wait plus headroom.
                    .timeout(Duration::from_secs(UPDATES_POLL_TIMEOUT_SECS + 10))
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Update poll error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                if !resp.status().is_success() {
                    warn!(status = ?resp.status(), "Update poll rejected");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }

                let updates: Vec<UpdateDto> = match resp.json().await {
                    Ok(u) => u,
                    Err(e) => {
                        warn!("Update parse error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = offset.max(update.update_id + 1);

                    let matching: Vec<EventHandler> = {
                        let handlers = match handlers.lock() {
                            Ok(h) => h,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        handlers
                            .values()
                            .filter(|(channel, _)| *channel == update.channel_id)
                            .map(|(_, handler)| Arc::clone(handler))
                            .collect()
                    };
                    if matching.is_empty() {
                        continue;
                    }

                    let message = NewMessage {
                        channel_id: update.channel_id,
                        message_id: update.message_id,
                        text: update.text.clone(),
                        date: update.date.unwrap_or_else(Utc::now),
                    };
                    for handler in matching {
                        handler(message.clone());
                    }
                }
            }
        }));
    }

    async fn check_status(resp: reqwest::Response, what: &str) -> Result<(), TransportError> {
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        Err(TransportError::Api {
            status,
            message: format!("{what}: {message}"),
        })
    }
}

#[async_trait]
impl PlatformSession for HttpPlatformSession {
    async fn is_authorized(&self) -> Result<bool, TransportError> {
        let resp = self
            .client
            .get(self.url(""))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(TransportError::Api { status, message });
        }

        let state: SessionStateResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("session state: {e}")))?;
        Ok(state.authorized)
    }

    async fn request_code(&self, phone: &str) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(self.url("send_code"))
            .json(&serde_json::json!({ "phone": phone }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(TransportError::Http(e.to_string())))?;

        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(map_auth_error(status, &body))
    }

    async fn sign_in(&self, phone: &str, code: &str) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(self.url("sign_in"))
            .json(&serde_json::json!({ "phone": phone, "code": code }))
            .send()
            .await
            .map_err(|e| AuthError::Transport(TransportError::Http(e.to_string())))?;

        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(map_auth_error(status, &body))
    }

    async fn subscribe_new_messages(
        &self,
        channel_id: i64,
        handler: EventHandler,
    ) -> Result<SubscriptionToken, TransportError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        {
            let mut handlers = match self.handlers.lock() {
                Ok(h) => h,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers.insert(token, (channel_id, handler));
        }
        self.ensure_polling();
        Ok(SubscriptionToken(token))
    }

    async fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), TransportError> {
        let mut handlers = match self.handlers.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.remove(&token.0);
        Ok(())
    }

    async fn send_message(&self, channel_id: i64, text: &str) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(self.url("messages"))
            .json(&serde_json::json!({ "channel_id": channel_id, "text": text }))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::check_status(resp, "send_message").await
    }

    async fn send_photo(
        &self,
        channel_id: i64,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError> {
        let part = reqwest::multipart::Part::bytes(image).file_name("image.png");
        let form = reqwest::multipart::Form::new()
            .text("channel_id", channel_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);

        let resp = self
            .client
            .post(self.url("photos"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Self::check_status(resp, "send_photo").await
    }

    async fn resolve_channel_title(
        &self,
        channel_id: i64,
    ) -> Result<Option<String>, TransportError> {
        let resp = self
            .client
            .get(self.url(&format!("channels/{channel_id}")))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(TransportError::Api { status, message });
        }

        let info: ChannelInfoResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("channel info: {e}")))?;
        Ok(info.title)
    }

    async fn disconnect(&self) {
        if let Ok(mut slot) = self.poll_task.lock()
            && let Some(task) = slot.take()
        {
            task.abort();
        }
        let _ = self.client.post(self.url("disconnect")).send().await;
        debug!("Platform session disconnected");
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn session_url(base: &str, token: &str, path: &str) -> String {
    if path.is_empty() {
        format!("{base}/sessions/{token}")
    } else {
        format!("{base}/sessions/{token}/{path}")
    }
}

/// Read the stored session token, if the artifact exists and is non-empty.
async fn read_artifact(path: &Path) -> Option<String> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    let token = contents.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Persist the session token as the on-disk artifact.
async fn write_artifact(path: &Path, token: &str) -> Result<(), TransportError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, token).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// Map a bridge auth failure body to the auth taxonomy.
fn map_auth_error(status: u16, body: &str) -> AuthError {
    let parsed: AuthErrorBody = serde_json::from_str(body).unwrap_or(AuthErrorBody {
        error: String::new(),
        message: body.to_string(),
    });

    let reason = if parsed.message.is_empty() {
        format!("HTTP {status}")
    } else {
        parsed.message.clone()
    };

    match parsed.error.as_str() {
        "phone_code_expired" => AuthError::CodeExpired,
        "phone_code_invalid" => AuthError::CodeInvalid { reason },
        "session_password_needed" => AuthError::TwoFactorUnsupported,
        "api_id_invalid" | "api_hash_invalid" | "phone_number_invalid" => {
            AuthError::InvalidCredentials { reason }
        }
        _ => AuthError::SignInFailed { reason },
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::platform::artifact_path;

    #[test]
    fn session_url_shapes() {
        assert_eq!(
            session_url("http://bridge:8081", "tok123", ""),
            "http://bridge:8081/sessions/tok123"
        );
        assert_eq!(
            session_url("http://bridge:8081", "tok123", "send_code"),
            "http://bridge:8081/sessions/tok123/send_code"
        );
        assert_eq!(
            session_url("http://bridge:8081", "tok123", "channels/-100"),
            "http://bridge:8081/sessions/tok123/channels/-100"
        );
    }

    #[test]
    fn artifact_path_uses_session_suffix() {
        let path = artifact_path(Path::new("/data/sessions"), "session_42");
        assert_eq!(path, PathBuf::from("/data/sessions/session_42.session"));
    }

    #[test]
    fn map_auth_error_code_expired() {
        let err = map_auth_error(400, r#"{"error": "phone_code_expired"}"#);
        assert!(matches!(err, AuthError::CodeExpired));
    }

    #[test]
    fn map_auth_error_code_invalid() {
        let err = map_auth_error(400, r#"{"error": "phone_code_invalid", "message": "nope"}"#);
        match err {
            AuthError::CodeInvalid { reason } => assert_eq!(reason, "nope"),
            other => panic!("Expected CodeInvalid, got {other:?}"),
        }
    }

    #[test]
    fn map_auth_error_two_factor() {
        let err = map_auth_error(401, r#"{"error": "session_password_needed"}"#);
        assert!(matches!(err, AuthError::TwoFactorUnsupported));
    }

    #[test]
    fn map_auth_error_bad_credentials() {
        let err = map_auth_error(401, r#"{"error": "api_id_invalid"}"#);
        assert!(matches!(err, AuthError::InvalidCredentials { .. }));
    }

    #[test]
    fn map_auth_error_unparseable_body_falls_back() {
        let err = map_auth_error(500, "boom");
        match err {
            AuthError::SignInFailed { reason } => assert_eq!(reason, "boom"),
            other => panic!("Expected SignInFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact_path(dir.path(), "session_1");

        assert!(read_artifact(&path).await.is_none());
        write_artifact(&path, "tok-abc").await.unwrap();
        assert_eq!(read_artifact(&path).await.as_deref(), Some("tok-abc"));
    }

    #[tokio::test]
    async fn blank_artifact_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact_path(dir.path(), "session_1");
        write_artifact(&path, "  \n").await.unwrap();
        assert!(read_artifact(&path).await.is_none());
    }

    #[tokio::test]
    async fn connect_against_unreachable_bridge_errors() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = HttpPlatformGateway::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(200),
        )
        .unwrap();

        let creds = PlatformCredentials {
            api_id: 1,
            api_hash: secrecy::SecretString::from("hash".to_string()),
            phone: "+15550100".to_string(),
        };
        let result = gateway
            .connect(&artifact_path(dir.path(), "session_x"), &creds)
            .await;
        assert!(result.is_err());
    }
}

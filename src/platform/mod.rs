//! Platform session API — the seam between the relay core and the
//! messaging platform's client protocol.
//!
//! The core only sees these traits. The HTTP bridge implementation lives
//! in [`http`]; tests substitute in-memory fakes.

pub mod http;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::{AuthError, TransportError};

/// Credentials needed to open a platform connection for one account.
#[derive(Debug, Clone)]
pub struct PlatformCredentials {
    pub api_id: i64,
    pub api_hash: SecretString,
    pub phone: String,
}

/// One inbound message event from a subscribed channel.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: i64,
    pub message_id: i64,
    pub text: String,
    pub date: DateTime<Utc>,
}

/// Callback invoked for every new message on a subscribed channel.
///
/// Handlers must be cheap: the dispatch loop calls them inline, so any
/// real work is spawned onto the runtime by the handler itself.
pub type EventHandler = Arc<dyn Fn(NewMessage) + Send + Sync>;

/// Opaque token identifying one event-handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Opens platform connections backed by per-account session artifacts.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    /// Connect using the session artifact at `session_file` (created if
    /// absent). The returned session may or may not be authorized yet.
    async fn connect(
        &self,
        session_file: &Path,
        creds: &PlatformCredentials,
    ) -> Result<Arc<dyn PlatformSession>, TransportError>;
}

/// A live connection to the platform for one account.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Whether the underlying connection is signed in.
    async fn is_authorized(&self) -> Result<bool, TransportError>;

    /// Ask the platform to send a one-time confirmation code.
    async fn request_code(&self, phone: &str) -> Result<(), AuthError>;

    /// Complete sign-in with a previously requested code.
    async fn sign_in(&self, phone: &str, code: &str) -> Result<(), AuthError>;

    /// Register a new-message handler scoped to one channel id.
    async fn subscribe_new_messages(
        &self,
        channel_id: i64,
        handler: EventHandler,
    ) -> Result<SubscriptionToken, TransportError>;

    /// Remove a previously registered handler.
    async fn unsubscribe(&self, token: SubscriptionToken) -> Result<(), TransportError>;

    /// Send a text message to a channel.
    async fn send_message(&self, channel_id: i64, text: &str) -> Result<(), TransportError>;

    /// Send a photo with a caption to a channel.
    async fn send_photo(
        &self,
        channel_id: i64,
        image: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError>;

    /// Look up a channel's display title, if the platform knows it.
    async fn resolve_channel_title(
        &self,
        channel_id: i64,
    ) -> Result<Option<String>, TransportError>;

    /// Best-effort disconnect. Safe to call more than once.
    async fn disconnect(&self);
}

/// Where the session artifact for `session_name` lives under
/// `sessions_dir`. The file contents are opaque to the core.
pub fn artifact_path(sessions_dir: &Path, session_name: &str) -> PathBuf {
    sessions_dir.join(format!("{session_name}.session"))
}

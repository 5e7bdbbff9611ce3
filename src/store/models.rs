//! Persistent data model.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

/// Authentication state of an account's platform session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Account exists but has no stored credentials yet.
    Unconfigured,
    /// Credentials stored; no authorized session.
    CredentialsStored,
    /// A confirmation code has been requested and a connection is parked.
    AwaitingCode,
    /// A live, authorized session exists (or existed last run).
    Authorized,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unconfigured => "unconfigured",
            AuthState::CredentialsStored => "credentials_stored",
            AuthState::AwaitingCode => "awaiting_code",
            AuthState::Authorized => "authorized",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "credentials_stored" => AuthState::CredentialsStored,
            "awaiting_code" => AuthState::AwaitingCode,
            "authorized" => AuthState::Authorized,
            _ => AuthState::Unconfigured,
        }
    }
}

/// One end-user of the control surface: platform credentials plus the
/// reference to the persisted session artifact.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    /// The user's id on the control-surface platform (unique).
    pub external_user_id: i64,
    pub api_id: i64,
    pub api_hash: SecretString,
    pub phone: String,
    /// Name of the on-disk session artifact, if one was ever created.
    pub session_name: Option<String>,
    pub auth_state: AuthState,
}

impl Account {
    /// Whether the account has usable platform credentials.
    pub fn has_credentials(&self) -> bool {
        self.auth_state != AuthState::Unconfigured
    }
}

/// A channel an account listens to for inbound messages.
#[derive(Debug, Clone)]
pub struct SourceChannel {
    pub id: Uuid,
    pub account_id: Uuid,
    pub channel_id: i64,
    pub title: Option<String>,
}

/// A channel an account re-publishes posts to, gated by a topic allow-list.
#[derive(Debug, Clone)]
pub struct DestinationChannel {
    pub id: Uuid,
    pub account_id: Uuid,
    pub channel_id: i64,
    pub title: Option<String>,
    /// Rewrite instruction; empty means deliver the text unmodified.
    pub rewrite_prompt: String,
    /// Extra instruction appended to the image generation prompt.
    pub image_prompt: String,
    /// Whether to attach a generated image to deliveries.
    pub include_image: bool,
}

/// A classification label from the fixed global vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
}

/// One ingested inbound message.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: Uuid,
    pub channel_id: i64,
    pub message_id: i64,
    pub text: String,
    pub ts: DateTime<Utc>,
}

/// A destination channel joined with its allowed topics.
#[derive(Debug, Clone)]
pub struct DestinationWithTopics {
    pub channel: DestinationChannel,
    pub allowed_topics: Vec<Topic>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_state_round_trips() {
        for state in [
            AuthState::Unconfigured,
            AuthState::CredentialsStored,
            AuthState::AwaitingCode,
            AuthState::Authorized,
        ] {
            assert_eq!(AuthState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn unknown_auth_state_parses_as_unconfigured() {
        assert_eq!(AuthState::parse("garbage"), AuthState::Unconfigured);
    }
}

//! Async `Database` trait — the credential store's CRUD surface.
//!
//! Absent rows come back as `Option`/`bool`, never as errors; callers in
//! the control surface turn those into user-facing messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::models::{
    Account, AuthState, DestinationChannel, DestinationWithTopics, Post, SourceChannel, Topic,
};

/// Backend-agnostic persistence trait covering accounts, channels, topics,
/// and posts.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Accounts ────────────────────────────────────────────────────

    /// Look up an account by its control-surface user id, creating an
    /// unconfigured one if absent.
    async fn get_or_create_account(&self, external_user_id: i64)
    -> Result<Account, DatabaseError>;

    /// Get an account by id.
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    /// Store platform credentials and the derived session-artifact name;
    /// moves the account to `credentials_stored`. Returns false if the
    /// account does not exist.
    async fn set_account_credentials(
        &self,
        id: Uuid,
        api_id: i64,
        api_hash: &str,
        phone: &str,
        session_name: &str,
    ) -> Result<bool, DatabaseError>;

    /// Update the auth state.
    async fn update_auth_state(&self, id: Uuid, state: AuthState) -> Result<(), DatabaseError>;

    /// Set the session-artifact name for an account.
    async fn set_account_session_name(&self, id: Uuid, name: &str) -> Result<(), DatabaseError>;

    /// Drop the session-artifact reference and fall back to
    /// `credentials_stored`. Credentials are retained.
    async fn clear_session_artifact(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// All accounts that have stored credentials.
    async fn list_configured_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    // ── Source channels ─────────────────────────────────────────────

    /// Add a source channel for an account. Returns false if it already
    /// exists for that account.
    async fn add_source_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
        title: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Remove a source channel. Returns false if absent.
    async fn remove_source_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<bool, DatabaseError>;

    async fn list_source_channels(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<SourceChannel>, DatabaseError>;

    /// Store a resolved display title for a source channel.
    async fn set_source_channel_title(
        &self,
        account_id: Uuid,
        channel_id: i64,
        title: &str,
    ) -> Result<(), DatabaseError>;

    // ── Destination channels ────────────────────────────────────────

    /// Add a destination channel for an account. Returns false if it
    /// already exists for that account.
    async fn add_destination_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
        title: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Remove a destination channel and, by cascade, its topic
    /// associations. Returns false if absent.
    async fn remove_destination_channel(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<bool, DatabaseError>;

    async fn list_destination_channels(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<DestinationChannel>, DatabaseError>;

    /// Set (or clear, with "") the rewrite prompt. Returns false if the
    /// destination is absent.
    async fn set_rewrite_prompt(
        &self,
        account_id: Uuid,
        channel_id: i64,
        prompt: &str,
    ) -> Result<bool, DatabaseError>;

    /// Set (or clear, with "") the image prompt. Returns false if the
    /// destination is absent.
    async fn set_image_prompt(
        &self,
        account_id: Uuid,
        channel_id: i64,
        prompt: &str,
    ) -> Result<bool, DatabaseError>;

    /// Toggle image generation for deliveries. Returns false if the
    /// destination is absent.
    async fn set_include_image(
        &self,
        account_id: Uuid,
        channel_id: i64,
        include: bool,
    ) -> Result<bool, DatabaseError>;

    // ── Topics ──────────────────────────────────────────────────────

    /// Insert the fixed topic vocabulary if the table is empty.
    async fn seed_topics(&self, names: &[&str]) -> Result<(), DatabaseError>;

    async fn list_topics(&self) -> Result<Vec<Topic>, DatabaseError>;

    /// Allow a topic for a destination. Returns false if the destination
    /// or topic does not exist, or the association is already present.
    async fn add_topic_to_destination(
        &self,
        account_id: Uuid,
        channel_id: i64,
        topic_name: &str,
    ) -> Result<bool, DatabaseError>;

    /// Remove a topic from a destination's allow-list. Returns false if
    /// nothing was removed.
    async fn remove_topic_from_destination(
        &self,
        account_id: Uuid,
        channel_id: i64,
        topic_name: &str,
    ) -> Result<bool, DatabaseError>;

    async fn topics_for_destination(
        &self,
        account_id: Uuid,
        channel_id: i64,
    ) -> Result<Vec<Topic>, DatabaseError>;

    /// Every destination channel across all accounts, each with its
    /// allow-list. The fan-out router's working set.
    async fn all_destinations_with_topics(
        &self,
    ) -> Result<Vec<DestinationWithTopics>, DatabaseError>;

    // ── Posts ───────────────────────────────────────────────────────

    /// Persist an ingested message; returns the new post id.
    async fn insert_post(
        &self,
        channel_id: i64,
        message_id: i64,
        text: &str,
        ts: DateTime<Utc>,
    ) -> Result<Uuid, DatabaseError>;

    /// Associate topics (by name) with a post. Unknown names are skipped;
    /// returns the number of associations written.
    async fn add_post_topics(
        &self,
        post_id: Uuid,
        topic_names: &[String],
    ) -> Result<usize, DatabaseError>;

    async fn topics_for_post(&self, post_id: Uuid) -> Result<Vec<Topic>, DatabaseError>;

    async fn get_post(&self, post_id: Uuid) -> Result<Option<Post>, DatabaseError>;

    /// Look up a post by its platform-native (channel, message) ids.
    async fn find_post(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> Result<Option<Post>, DatabaseError>;
}

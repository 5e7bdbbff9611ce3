//! Session manager — authenticates accounts and tracks live sessions.
//!
//! Drives the per-account state machine
//! `credentials_stored → awaiting_code → authorized`. A connection that is
//! waiting for its confirmation code is parked in the pending map; the
//! follow-up call with the code retrieves it and completes sign-in. On
//! authorization the account's stored source channels are (re)subscribed
//! through the listener registry, which makes `start_session` idempotent
//! for already-live accounts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::platform::{PlatformCredentials, PlatformGateway, PlatformSession, artifact_path};
use crate::sessions::map::SessionMap;
use crate::sessions::registry::ListenerRegistry;
use crate::store::{Account, AuthState, Database};

/// Outcome of a successful `start_session` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    /// A confirmation code was sent; call again with the code.
    AwaitingCode,
    /// The session is live and source channels are subscribed.
    Started,
}

/// Owns the live-session map writes and the pending-connection parking lot.
pub struct SessionManager {
    db: Arc<dyn Database>,
    gateway: Arc<dyn PlatformGateway>,
    registry: Arc<ListenerRegistry>,
    live: SessionMap,
    /// Connections that have requested a code and await sign-in.
    pending: Mutex<HashMap<Uuid, Arc<dyn PlatformSession>>>,
    sessions_dir: PathBuf,
}

impl SessionManager {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn PlatformGateway>,
        registry: Arc<ListenerRegistry>,
        live: SessionMap,
        sessions_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            gateway,
            registry,
            live,
            pending: Mutex::new(HashMap::new()),
            sessions_dir,
        }
    }

    /// Start (or resume) the platform session for an account.
    ///
    /// Without a code: connects with the stored artifact and either comes
    /// up authorized or requests a confirmation code and parks the
    /// connection. With a code: completes sign-in on the parked
    /// connection. An expired or rejected code discards the parked
    /// connection; the account falls back to `credentials_stored`.
    pub async fn start_session(
        &self,
        account_id: Uuid,
        code: Option<&str>,
    ) -> Result<SessionStart, AuthError> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .filter(Account::has_credentials)
            .ok_or(AuthError::AccountNotConfigured(account_id))?;

        // Already live: re-run the idempotent subscription pass only.
        if let Some(session) = self.live.get(account_id).await {
            self.resubscribe(account_id, &session).await;
            return Ok(SessionStart::Started);
        }

        let session_name = match account.session_name.clone() {
            Some(name) => name,
            None => {
                let name = format!("session_{}", account.external_user_id);
                self.db.set_account_session_name(account_id, &name).await?;
                name
            }
        };
        let artifact = artifact_path(&self.sessions_dir, &session_name);

        // With a code in hand, prefer the connection parked by the
        // previous call; fall back to a fresh connect.
        let parked = match code {
            Some(_) => self.pending.lock().await.remove(&account_id),
            None => None,
        };
        let session = match parked {
            Some(session) => session,
            None => self.gateway.connect(&artifact, &credentials_of(&account)).await?,
        };

        if !session.is_authorized().await? {
            match code {
                None => {
                    session.request_code(&account.phone).await?;
                    let replaced = self.pending.lock().await.insert(account_id, session);
                    if let Some(old) = replaced {
                        old.disconnect().await;
                    }
                    self.db
                        .update_auth_state(account_id, AuthState::AwaitingCode)
                        .await?;
                    info!(account = %account_id, "Confirmation code requested");
                    return Ok(SessionStart::AwaitingCode);
                }
                Some(code) => {
                    if let Err(e) = session.sign_in(&account.phone, code).await {
                        // The parked connection is spent; the caller
                        // restarts from stored credentials.
                        session.disconnect().await;
                        self.db
                            .update_auth_state(account_id, AuthState::CredentialsStored)
                            .await?;
                        return Err(e);
                    }
                }
            }
        }

        self.finish_authorized(&account, session).await?;
        Ok(SessionStart::Started)
    }

    /// The live session for an account, if any. Pure map lookup.
    pub async fn get_session(&self, account_id: Uuid) -> Option<Arc<dyn PlatformSession>> {
        self.live.get(account_id).await
    }

    /// Whether a parked connection is waiting for its code.
    pub async fn is_pending(&self, account_id: Uuid) -> bool {
        self.pending.lock().await.contains_key(&account_id)
    }

    /// Best-effort disconnect and removal. Idempotent. Also discards any
    /// parked pending connection for the account.
    pub async fn stop_session(&self, account_id: Uuid) {
        if let Some(session) = self.live.remove(account_id).await {
            session.disconnect().await;
            info!(account = %account_id, "Session stopped");
        }
        if let Some(parked) = self.pending.lock().await.remove(&account_id) {
            parked.disconnect().await;
        }
    }

    /// Process-start recovery: resume every account whose session
    /// artifact is still on disk and still authorized. Accounts whose
    /// artifact is missing or no longer authorized are flagged —
    /// credentials retained, artifact reference cleared — never treated
    /// as fatal. No confirmation codes are requested here.
    pub async fn recover_all(&self) {
        let accounts = match self.db.list_configured_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "Cannot list accounts for recovery");
                return;
            }
        };
        if accounts.is_empty() {
            info!("No configured accounts to recover");
            return;
        }

        info!(count = accounts.len(), "Recovering platform sessions");
        for account in accounts {
            let Some(name) = account.session_name.clone() else {
                debug!(account = %account.id, "No session artifact on file; skipping");
                continue;
            };
            let artifact = artifact_path(&self.sessions_dir, &name);
            if !artifact.exists() {
                warn!(account = %account.id, "Session artifact missing; clearing reference");
                self.flag_account(account.id).await;
                continue;
            }

            match self.try_resume(&account, &artifact).await {
                Ok(true) => info!(account = %account.id, "Session recovered"),
                Ok(false) => {
                    warn!(
                        account = %account.id,
                        "Session artifact no longer authorized; clearing reference"
                    );
                    self.flag_account(account.id).await;
                }
                Err(e) => {
                    warn!(account = %account.id, error = %e, "Recovery failed; skipping account");
                }
            }
        }
    }

    /// Connect with the on-disk artifact; finish startup if authorized.
    /// Returns false when the artifact no longer yields an authorized
    /// session.
    async fn try_resume(&self, account: &Account, artifact: &Path) -> Result<bool, AuthError> {
        let session = self
            .gateway
            .connect(artifact, &credentials_of(account))
            .await?;
        if !session.is_authorized().await? {
            session.disconnect().await;
            return Ok(false);
        }
        self.finish_authorized(account, session).await?;
        Ok(true)
    }

    async fn finish_authorized(
        &self,
        account: &Account,
        session: Arc<dyn PlatformSession>,
    ) -> Result<(), AuthError> {
        self.live.insert(account.id, Arc::clone(&session)).await;
        self.db
            .update_auth_state(account.id, AuthState::Authorized)
            .await?;
        self.resubscribe(account.id, &session).await;
        info!(account = %account.id, "Session authorized");
        Ok(())
    }

    /// Attach every stored source channel; idempotent per channel.
    /// Channels saved without a display title get one resolved here.
    async fn resubscribe(&self, account_id: Uuid, session: &Arc<dyn PlatformSession>) {
        let channels = match self.db.list_source_channels(account_id).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(account = %account_id, error = %e, "Cannot list source channels");
                return;
            }
        };
        for channel in channels {
            if channel.title.is_none()
                && let Ok(Some(title)) = session.resolve_channel_title(channel.channel_id).await
                && let Err(e) = self
                    .db
                    .set_source_channel_title(account_id, channel.channel_id, &title)
                    .await
            {
                warn!(channel = channel.channel_id, error = %e, "Failed to store channel title");
            }
            if let Err(e) = self
                .registry
                .attach(channel.channel_id, Arc::clone(session))
                .await
            {
                warn!(
                    account = %account_id,
                    channel = channel.channel_id,
                    error = %e,
                    "Failed to subscribe source channel"
                );
            }
        }
    }

    async fn flag_account(&self, account_id: Uuid) {
        if let Err(e) = self.db.clear_session_artifact(account_id).await {
            error!(account = %account_id, error = %e, "Failed to clear session artifact");
        }
    }
}

fn credentials_of(account: &Account) -> PlatformCredentials {
    PlatformCredentials {
        api_id: account.api_id,
        api_hash: account.api_hash.clone(),
        phone: account.phone.clone(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::TransportError;
    use crate::platform::{EventHandler, SubscriptionToken};
    use crate::store::LibSqlBackend;

    /// Session whose authorization and sign-in behavior is scripted.
    #[derive(Default)]
    struct ScriptedSession {
        authorized: AtomicBool,
        sign_in_error: std::sync::Mutex<Option<AuthError>>,
        code_requests: AtomicUsize,
        subscribes: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ScriptedSession {
        fn authorized() -> Self {
            let s = Self::default();
            s.authorized.store(true, Ordering::SeqCst);
            s
        }

        fn failing_sign_in(err: AuthError) -> Self {
            let s = Self::default();
            *s.sign_in_error.lock().unwrap() = Some(err);
            s
        }
    }

    #[async_trait]
    impl PlatformSession for ScriptedSession {
        async fn is_authorized(&self) -> Result<bool, TransportError> {
            Ok(self.authorized.load(Ordering::SeqCst))
        }
        async fn request_code(&self, _phone: &str) -> Result<(), AuthError> {
            self.code_requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn sign_in(&self, _phone: &str, _code: &str) -> Result<(), AuthError> {
            if let Some(err) = self.sign_in_error.lock().unwrap().take() {
                return Err(err);
            }
            self.authorized.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn subscribe_new_messages(
            &self,
            _channel_id: i64,
            _handler: EventHandler,
        ) -> Result<SubscriptionToken, TransportError> {
            let n = self.subscribes.fetch_add(1, Ordering::SeqCst);
            Ok(SubscriptionToken(n as u64))
        }
        async fn unsubscribe(&self, _token: SubscriptionToken) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_message(&self, _channel_id: i64, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_photo(
            &self,
            _channel_id: i64,
            _image: Vec<u8>,
            _caption: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        async fn resolve_channel_title(
            &self,
            channel_id: i64,
        ) -> Result<Option<String>, TransportError> {
            Ok(Some(format!("Channel {channel_id}")))
        }
        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Gateway that always hands out the same scripted session.
    struct ScriptedGateway {
        session: Arc<ScriptedSession>,
    }

    impl ScriptedGateway {
        fn new(session: Arc<ScriptedSession>) -> Self {
            Self { session }
        }
    }

    #[async_trait]
    impl PlatformGateway for ScriptedGateway {
        async fn connect(
            &self,
            _session_file: &Path,
            _creds: &PlatformCredentials,
        ) -> Result<Arc<dyn PlatformSession>, TransportError> {
            Ok(self.session.clone())
        }
    }

    struct Fixture {
        db: Arc<dyn Database>,
        manager: SessionManager,
        registry: Arc<ListenerRegistry>,
        session: Arc<ScriptedSession>,
        account_id: Uuid,
        _dir: tempfile::TempDir,
    }

    async fn fixture(session: ScriptedSession) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let account = db.get_or_create_account(42).await.unwrap();
        db.set_account_credentials(account.id, 1234, "hash", "+15550100", "session_42")
            .await
            .unwrap();

        let session = Arc::new(session);
        let registry = Arc::new(ListenerRegistry::new(Arc::new(|_msg| {})));
        let manager = SessionManager::new(
            Arc::clone(&db),
            Arc::new(ScriptedGateway::new(session.clone())),
            Arc::clone(&registry),
            SessionMap::new(),
            dir.path().to_path_buf(),
        );

        Fixture {
            db,
            manager,
            registry,
            session,
            account_id: account.id,
            _dir: dir,
        }
    }

    async fn auth_state(db: &Arc<dyn Database>, id: Uuid) -> AuthState {
        db.get_account(id).await.unwrap().unwrap().auth_state
    }

    #[tokio::test]
    async fn unconfigured_account_cannot_start() {
        let fx = fixture(ScriptedSession::default()).await;
        let blank = fx.db.get_or_create_account(99).await.unwrap();

        let err = fx.manager.start_session(blank.id, None).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountNotConfigured(id) if id == blank.id));
    }

    #[tokio::test]
    async fn unauthorized_connect_requests_code_and_parks() {
        let fx = fixture(ScriptedSession::default()).await;

        let outcome = fx.manager.start_session(fx.account_id, None).await.unwrap();
        assert_eq!(outcome, SessionStart::AwaitingCode);

        assert!(fx.manager.is_pending(fx.account_id).await);
        assert!(fx.manager.get_session(fx.account_id).await.is_none());
        assert_eq!(fx.session.code_requests.load(Ordering::SeqCst), 1);
        assert_eq!(
            auth_state(&fx.db, fx.account_id).await,
            AuthState::AwaitingCode
        );
    }

    #[tokio::test]
    async fn valid_code_authorizes_and_subscribes_sources() {
        let fx = fixture(ScriptedSession::default()).await;
        fx.db
            .add_source_channel(fx.account_id, 100, None)
            .await
            .unwrap();
        fx.db
            .add_source_channel(fx.account_id, 101, None)
            .await
            .unwrap();

        assert_eq!(
            fx.manager.start_session(fx.account_id, None).await.unwrap(),
            SessionStart::AwaitingCode
        );
        let outcome = fx
            .manager
            .start_session(fx.account_id, Some("12345"))
            .await
            .unwrap();
        assert_eq!(outcome, SessionStart::Started);

        assert!(fx.manager.get_session(fx.account_id).await.is_some());
        assert!(!fx.manager.is_pending(fx.account_id).await);
        assert_eq!(fx.registry.len().await, 2);
        assert_eq!(
            auth_state(&fx.db, fx.account_id).await,
            AuthState::Authorized
        );
    }

    #[tokio::test]
    async fn invalid_code_falls_back_to_credentials_stored() {
        let fx = fixture(ScriptedSession::failing_sign_in(AuthError::CodeInvalid {
            reason: "wrong".into(),
        }))
        .await;

        assert_eq!(
            fx.manager.start_session(fx.account_id, None).await.unwrap(),
            SessionStart::AwaitingCode
        );
        let err = fx
            .manager
            .start_session(fx.account_id, Some("00000"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CodeInvalid { .. }));

        // Parked connection discarded; account resumable from scratch.
        assert!(!fx.manager.is_pending(fx.account_id).await);
        assert!(fx.manager.get_session(fx.account_id).await.is_none());
        assert_eq!(fx.session.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            auth_state(&fx.db, fx.account_id).await,
            AuthState::CredentialsStored
        );
    }

    #[tokio::test]
    async fn two_factor_is_terminal_but_resumable() {
        let fx = fixture(ScriptedSession::failing_sign_in(
            AuthError::TwoFactorUnsupported,
        ))
        .await;

        fx.manager.start_session(fx.account_id, None).await.unwrap();
        let err = fx
            .manager
            .start_session(fx.account_id, Some("12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TwoFactorUnsupported));
        assert_eq!(
            auth_state(&fx.db, fx.account_id).await,
            AuthState::CredentialsStored
        );
    }

    #[tokio::test]
    async fn start_while_live_is_idempotent() {
        let fx = fixture(ScriptedSession::authorized()).await;
        fx.db
            .add_source_channel(fx.account_id, 100, None)
            .await
            .unwrap();

        assert_eq!(
            fx.manager.start_session(fx.account_id, None).await.unwrap(),
            SessionStart::Started
        );
        assert_eq!(fx.registry.len().await, 1);
        assert_eq!(fx.session.subscribes.load(Ordering::SeqCst), 1);

        // Second start re-runs only the (idempotent) subscription pass.
        assert_eq!(
            fx.manager.start_session(fx.account_id, None).await.unwrap(),
            SessionStart::Started
        );
        assert_eq!(fx.registry.len().await, 1);
        assert_eq!(fx.session.subscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscription_pass_backfills_missing_titles() {
        let fx = fixture(ScriptedSession::authorized()).await;
        fx.db
            .add_source_channel(fx.account_id, 100, None)
            .await
            .unwrap();
        fx.db
            .add_source_channel(fx.account_id, 101, Some("Kept"))
            .await
            .unwrap();

        fx.manager.start_session(fx.account_id, None).await.unwrap();

        let channels = fx.db.list_source_channels(fx.account_id).await.unwrap();
        let titles: Vec<_> = channels
            .iter()
            .map(|c| (c.channel_id, c.title.clone()))
            .collect();
        assert_eq!(
            titles,
            vec![
                (100, Some("Channel 100".to_string())),
                (101, Some("Kept".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn stop_session_is_idempotent() {
        let fx = fixture(ScriptedSession::authorized()).await;
        fx.manager.start_session(fx.account_id, None).await.unwrap();

        fx.manager.stop_session(fx.account_id).await;
        assert!(fx.manager.get_session(fx.account_id).await.is_none());
        assert_eq!(fx.session.disconnects.load(Ordering::SeqCst), 1);

        fx.manager.stop_session(fx.account_id).await;
        assert_eq!(fx.session.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovery_resumes_authorized_artifact() {
        let fx = fixture(ScriptedSession::authorized()).await;
        fx.db
            .add_source_channel(fx.account_id, 100, None)
            .await
            .unwrap();
        std::fs::write(fx._dir.path().join("session_42.session"), "tok").unwrap();

        fx.manager.recover_all().await;

        assert!(fx.manager.get_session(fx.account_id).await.is_some());
        assert_eq!(fx.registry.len().await, 1);
        assert_eq!(
            auth_state(&fx.db, fx.account_id).await,
            AuthState::Authorized
        );
    }

    #[tokio::test]
    async fn recovery_flags_missing_artifact() {
        let fx = fixture(ScriptedSession::authorized()).await;
        // No artifact file written.

        fx.manager.recover_all().await;

        assert!(fx.manager.get_session(fx.account_id).await.is_none());
        let account = fx.db.get_account(fx.account_id).await.unwrap().unwrap();
        assert!(account.session_name.is_none());
        assert_eq!(account.auth_state, AuthState::CredentialsStored);
    }

    #[tokio::test]
    async fn recovery_flags_unauthorized_artifact_without_requesting_code() {
        let fx = fixture(ScriptedSession::default()).await;
        std::fs::write(fx._dir.path().join("session_42.session"), "tok").unwrap();

        fx.manager.recover_all().await;

        assert!(fx.manager.get_session(fx.account_id).await.is_none());
        assert_eq!(fx.session.code_requests.load(Ordering::SeqCst), 0);
        let account = fx.db.get_account(fx.account_id).await.unwrap().unwrap();
        assert!(account.session_name.is_none());
        assert_eq!(account.auth_state, AuthState::CredentialsStored);
    }
}

//! Listener registry — the live binding of source channels to sessions.
//!
//! Keeps at most one new-message subscription per channel id. The
//! subscription table is the only state; attach/detach touch the platform
//! session's event registration and nothing else (no database writes).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::platform::{EventHandler, PlatformSession, SubscriptionToken};

/// One registered subscription.
struct Subscription {
    token: SubscriptionToken,
    session: Arc<dyn PlatformSession>,
}

/// Registry of live channel subscriptions.
///
/// The table lock is held across the underlying subscribe call, so two
/// concurrent `attach` calls for the same channel cannot both register.
pub struct ListenerRegistry {
    subscriptions: Mutex<HashMap<i64, Subscription>>,
    /// Ingestion entry point handed to every subscription.
    on_message: EventHandler,
}

impl ListenerRegistry {
    pub fn new(on_message: EventHandler) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            on_message,
        }
    }

    /// Subscribe a channel on the given session. No-op (returns false) if
    /// the channel is already subscribed.
    pub async fn attach(
        &self,
        channel_id: i64,
        session: Arc<dyn PlatformSession>,
    ) -> Result<bool, TransportError> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(&channel_id) {
            debug!(channel = channel_id, "Already subscribed");
            return Ok(false);
        }

        let token = session
            .subscribe_new_messages(channel_id, Arc::clone(&self.on_message))
            .await?;
        subscriptions.insert(channel_id, Subscription { token, session });
        info!(channel = channel_id, "Subscription added");
        Ok(true)
    }

    /// Drop a channel's subscription. No-op (returns false) if absent.
    /// The platform-side unsubscribe is best-effort; the registry entry is
    /// removed regardless.
    pub async fn detach(&self, channel_id: i64) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.remove(&channel_id)
        };

        match removed {
            Some(sub) => {
                if let Err(e) = sub.session.unsubscribe(sub.token).await {
                    warn!(channel = channel_id, error = %e, "Unsubscribe failed");
                }
                info!(channel = channel_id, "Subscription removed");
                true
            }
            None => false,
        }
    }

    pub async fn is_subscribed(&self, channel_id: i64) -> bool {
        self.subscriptions.lock().await.contains_key(&channel_id)
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }
}

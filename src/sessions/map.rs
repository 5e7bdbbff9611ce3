//! Live-session map — the one shared registry of authorized connections.
//!
//! Owned here and handed to both the session manager (writes) and the
//! fan-out router (reads), so neither touches a free-floating global.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::platform::PlatformSession;

/// Account id → live authorized session. Cheap to clone; all clones share
/// the same underlying map.
#[derive(Clone, Default)]
pub struct SessionMap {
    inner: Arc<RwLock<HashMap<Uuid, Arc<dyn PlatformSession>>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live session for an account, if any. Never blocks on I/O.
    pub async fn get(&self, account_id: Uuid) -> Option<Arc<dyn PlatformSession>> {
        self.inner.read().await.get(&account_id).cloned()
    }

    /// Install the live session for an account, replacing any previous one.
    pub async fn insert(&self, account_id: Uuid, session: Arc<dyn PlatformSession>) {
        self.inner.write().await.insert(account_id, session);
    }

    /// Remove and return the live session for an account.
    pub async fn remove(&self, account_id: Uuid) -> Option<Arc<dyn PlatformSession>> {
        self.inner.write().await.remove(&account_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

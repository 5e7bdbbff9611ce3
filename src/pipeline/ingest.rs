//! Ingestion handler — the callback behind every source subscription.
//!
//! Per inbound message: persist the post, assign topics, then hand off to
//! the fan-out router. Topic associations are fully persisted before
//! routing starts, since routing reads them back. Every step is
//! fault-contained: nothing thrown here reaches the dispatch loop.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::pipeline::router::FanoutRouter;
use crate::platform::{EventHandler, NewMessage};
use crate::services::Classifier;
use crate::store::Database;
use crate::worker::WorkerPool;

/// Processes one inbound message end to end. Cheap to clone; all clones
/// share the same collaborators.
#[derive(Clone)]
pub struct IngestionHandler {
    db: Arc<dyn Database>,
    classifier: Arc<dyn Classifier>,
    router: Arc<FanoutRouter>,
    pool: WorkerPool,
}

impl IngestionHandler {
    pub fn new(
        db: Arc<dyn Database>,
        classifier: Arc<dyn Classifier>,
        router: Arc<FanoutRouter>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            db,
            classifier,
            router,
            pool,
        }
    }

    /// Build the event callback handed to the listener registry. Each
    /// event is processed in its own task so the dispatch loop never
    /// waits on persistence or external services.
    pub fn event_handler(&self) -> EventHandler {
        let handler = self.clone();
        Arc::new(move |message| {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.handle(message).await;
            });
        })
    }

    /// Persist, classify, route. Never returns an error; failures are
    /// logged with the offending channel/message ids.
    pub async fn handle(&self, message: NewMessage) {
        info!(
            channel = message.channel_id,
            message = message.message_id,
            "Inbound message"
        );

        let post_id = match self
            .db
            .insert_post(
                message.channel_id,
                message.message_id,
                &message.text,
                message.date,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    channel = message.channel_id,
                    message = message.message_id,
                    error = %e,
                    "Failed to persist post"
                );
                return;
            }
        };

        let topics = self.assign_topics(&message.text).await;
        if !topics.is_empty() {
            match self.db.add_post_topics(post_id, &topics).await {
                Ok(written) => debug!(post = %post_id, topics = written, "Topics persisted"),
                Err(e) => error!(post = %post_id, error = %e, "Failed to persist topics"),
            }
        }

        self.router.route(post_id, &message.text).await;
    }

    /// Classify against the stored vocabulary. Any failure degrades to an
    /// empty set; labels the service invented are dropped.
    async fn assign_topics(&self, text: &str) -> Vec<String> {
        let candidates = match self.db.list_topics().await {
            Ok(topics) => topics,
            Err(e) => {
                error!(error = %e, "Cannot load topic vocabulary");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            return Vec::new();
        }
        let names: Vec<String> = candidates.into_iter().map(|t| t.name).collect();

        let labels = match self.pool.run(self.classifier.classify(text, &names)).await {
            Ok(labels) => labels,
            Err(e) => {
                warn!(error = %e, "Classifier unavailable; no topics assigned");
                return Vec::new();
            }
        };

        let known: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        labels
            .into_iter()
            .filter(|label| known.contains(label.as_str()) && seen.insert(label.clone()))
            .collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

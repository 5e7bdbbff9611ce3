//! Fan-out router — matches a post's topics against destination
//! allow-lists and delivers to every match.
//!
//! Each matching destination is processed in its own task: a rewrite or
//! image failure, a dead session, or a failed send degrades that one
//! destination and never its siblings. There is no retry within a single
//! `route` call.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::{GenerationOutcome, ImageGenerator, Rewriter};
use crate::sessions::SessionMap;
use crate::store::{Database, DestinationWithTopics};
use crate::worker::WorkerPool;

/// Routes classified posts to destination channels. Cheap to clone; all
/// clones share the same collaborators.
#[derive(Clone)]
pub struct FanoutRouter {
    db: Arc<dyn Database>,
    sessions: SessionMap,
    rewriter: Arc<dyn Rewriter>,
    images: Arc<dyn ImageGenerator>,
    pool: WorkerPool,
}

impl FanoutRouter {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: SessionMap,
        rewriter: Arc<dyn Rewriter>,
        images: Arc<dyn ImageGenerator>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            db,
            sessions,
            rewriter,
            images,
            pool,
        }
    }

    /// Deliver a post to every destination whose allow-list intersects
    /// the post's topics. Never returns an error: every failure is scoped
    /// to one destination and logged.
    pub async fn route(&self, post_id: Uuid, text: &str) {
        let topics = match self.db.topics_for_post(post_id).await {
            Ok(topics) => topics,
            Err(e) => {
                error!(post = %post_id, error = %e, "Cannot load post topics");
                return;
            }
        };
        if topics.is_empty() {
            debug!(post = %post_id, "No topics assigned; nothing to deliver");
            return;
        }

        let destinations = match self.db.all_destinations_with_topics().await {
            Ok(destinations) => destinations,
            Err(e) => {
                error!(post = %post_id, error = %e, "Cannot load destinations");
                return;
            }
        };

        let topic_ids: HashSet<Uuid> = topics.iter().map(|t| t.id).collect();
        let matches: Vec<DestinationWithTopics> = destinations
            .into_iter()
            .filter(|d| d.allowed_topics.iter().any(|t| topic_ids.contains(&t.id)))
            .collect();

        if matches.is_empty() {
            debug!(post = %post_id, "No destination allows these topics");
            return;
        }
        info!(post = %post_id, destinations = matches.len(), "Fanning out");

        let tasks: Vec<_> = matches
            .into_iter()
            .map(|destination| {
                let router = self.clone();
                let text = text.to_string();
                tokio::spawn(async move { router.deliver_one(destination, text).await })
            })
            .collect();

        for task in join_all(tasks).await {
            if let Err(e) = task {
                error!(post = %post_id, error = %e, "Delivery task panicked");
            }
        }
    }

    /// Transform and deliver to a single destination.
    async fn deliver_one(&self, destination: DestinationWithTopics, text: String) {
        let dest = &destination.channel;

        // Rewrite failures fall back to the unmodified text.
        let body = if dest.rewrite_prompt.is_empty() {
            text.clone()
        } else {
            match self
                .pool
                .run(self.rewriter.rewrite(&text, &dest.rewrite_prompt))
                .await
            {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    warn!(
                        channel = dest.channel_id,
                        error = %e,
                        "Rewrite failed; delivering original text"
                    );
                    text.clone()
                }
            }
        };

        // Image failures degrade to text-only delivery.
        let image = if dest.include_image {
            match self
                .pool
                .run(self.images.generate(&text, &dest.image_prompt))
                .await
            {
                Ok(GenerationOutcome::Done(files)) => files.into_iter().next(),
                Ok(GenerationOutcome::Rejected(reason)) => {
                    warn!(channel = dest.channel_id, reason, "Image rejected; text-only");
                    None
                }
                Ok(GenerationOutcome::TimedOut) => {
                    warn!(channel = dest.channel_id, "Image generation timed out; text-only");
                    None
                }
                Err(e) => {
                    warn!(channel = dest.channel_id, error = %e, "Image generation failed; text-only");
                    None
                }
            }
        } else {
            None
        };

        let Some(session) = self.sessions.get(dest.account_id).await else {
            warn!(
                channel = dest.channel_id,
                account = %dest.account_id,
                "Owner has no live session; skipping destination"
            );
            return;
        };

        let sent = match image {
            Some(bytes) => session.send_photo(dest.channel_id, bytes, &body).await,
            None => session.send_message(dest.channel_id, &body).await,
        };
        match sent {
            Ok(()) => info!(channel = dest.channel_id, "Delivered"),
            Err(e) => error!(channel = dest.channel_id, error = %e, "Delivery failed"),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::error::{AuthError, ImageError, RewriteError, TransportError};
    use crate::platform::{EventHandler, PlatformSession, SubscriptionToken};
    use crate::store::{DEFAULT_TOPICS, LibSqlBackend};

    /// Session that records what it was asked to send.
    #[derive(Default)]
    struct RecordingSession {
        messages: Mutex<Vec<(i64, String)>>,
        photos: Mutex<Vec<(i64, String, Vec<u8>)>>,
        fail_channel: Option<i64>,
    }

    impl RecordingSession {
        fn messages(&self) -> Vec<(i64, String)> {
            self.messages.lock().unwrap().clone()
        }

        fn photos(&self) -> Vec<(i64, String, Vec<u8>)> {
            self.photos.lock().unwrap().clone()
        }

        fn sends_to(&self, channel_id: i64) -> usize {
            self.messages().iter().filter(|(c, _)| *c == channel_id).count()
                + self.photos().iter().filter(|(c, _, _)| *c == channel_id).count()
        }
    }

    #[async_trait]
    impl PlatformSession for RecordingSession {
        async fn is_authorized(&self) -> Result<bool, TransportError> {
            Ok(true)
        }
        async fn request_code(&self, _phone: &str) -> Result<(), AuthError> {
            Ok(())
        }
        async fn sign_in(&self, _phone: &str, _code: &str) -> Result<(), AuthError> {
            Ok(())
        }
        async fn subscribe_new_messages(
            &self,
            _channel_id: i64,
            _handler: EventHandler,
        ) -> Result<SubscriptionToken, TransportError> {
            Ok(SubscriptionToken(0))
        }
        async fn unsubscribe(&self, _token: SubscriptionToken) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send_message(&self, channel_id: i64, text: &str) -> Result<(), TransportError> {
            if self.fail_channel == Some(channel_id) {
                return Err(TransportError::Http("send refused".into()));
            }
            self.messages
                .lock()
                .unwrap()
                .push((channel_id, text.to_string()));
            Ok(())
        }
        async fn send_photo(
            &self,
            channel_id: i64,
            image: Vec<u8>,
            caption: &str,
        ) -> Result<(), TransportError> {
            if self.fail_channel == Some(channel_id) {
                return Err(TransportError::Http("send refused".into()));
            }
            self.photos
                .lock()
                .unwrap()
                .push((channel_id, caption.to_string(), image));
            Ok(())
        }
        async fn resolve_channel_title(
            &self,
            _channel_id: i64,
        ) -> Result<Option<String>, TransportError> {
            Ok(None)
        }
        async fn disconnect(&self) {}
    }

    /// Rewriter that uppercases, or fails on a marker prompt.
    struct FakeRewriter;

    #[async_trait]
    impl Rewriter for FakeRewriter {
        async fn rewrite(&self, text: &str, prompt: &str) -> Result<String, RewriteError> {
            if prompt == "boom" {
                return Err(RewriteError::Http("rewrite down".into()));
            }
            Ok(format!("{}!", text.to_uppercase()))
        }
    }

    /// Image generator with a scripted outcome.
    struct FakeImages {
        outcome: Mutex<Option<Result<GenerationOutcome, ImageError>>>,
    }

    impl FakeImages {
        fn with(outcome: Result<GenerationOutcome, ImageError>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
            }
        }

        fn unused() -> Self {
            Self {
                outcome: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        async fn generate(
            &self,
            _post_text: &str,
            _user_prompt: &str,
        ) -> Result<GenerationOutcome, ImageError> {
            self.outcome
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(GenerationOutcome::TimedOut))
        }
    }

    struct Fixture {
        db: Arc<dyn Database>,
        router: Arc<FanoutRouter>,
        session: Arc<RecordingSession>,
        account_id: Uuid,
    }

    async fn fixture(session: RecordingSession, images: FakeImages) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.seed_topics(DEFAULT_TOPICS).await.unwrap();
        let account = db.get_or_create_account(1).await.unwrap();

        let session = Arc::new(session);
        let sessions = SessionMap::new();
        sessions
            .insert(account.id, session.clone() as Arc<dyn PlatformSession>)
            .await;

        let router = Arc::new(FanoutRouter::new(
            Arc::clone(&db),
            sessions,
            Arc::new(FakeRewriter),
            Arc::new(images),
            WorkerPool::new(5),
        ));

        Fixture {
            db,
            router,
            session,
            account_id: account.id,
        }
    }

    impl Fixture {
        async fn destination(&self, channel_id: i64, topics: &[&str]) {
            self.db
                .add_destination_channel(self.account_id, channel_id, None)
                .await
                .unwrap();
            for topic in topics {
                assert!(
                    self.db
                        .add_topic_to_destination(self.account_id, channel_id, topic)
                        .await
                        .unwrap()
                );
            }
        }

        async fn post_with_topics(&self, text: &str, topics: &[&str]) -> Uuid {
            let post_id = self
                .db
                .insert_post(100, 1, text, Utc::now())
                .await
                .unwrap();
            let names: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
            self.db.add_post_topics(post_id, &names).await.unwrap();
            post_id
        }
    }

    #[tokio::test]
    async fn post_without_topics_reaches_nobody() {
        let fx = fixture(RecordingSession::default(), FakeImages::unused()).await;
        fx.destination(200, &["Sport"]).await;

        let post_id = fx.post_with_topics("plain text", &[]).await;
        fx.router.route(post_id, "plain text").await;

        assert!(fx.session.messages().is_empty());
        assert!(fx.session.photos().is_empty());
    }

    #[tokio::test]
    async fn delivery_requires_topic_intersection() {
        let fx = fixture(RecordingSession::default(), FakeImages::unused()).await;
        fx.destination(200, &["Sport"]).await;
        fx.destination(300, &["Politics"]).await;
        fx.destination(400, &[]).await; // empty allow-list never matches

        let post_id = fx.post_with_topics("match report", &["Sport"]).await;
        fx.router.route(post_id, "match report").await;

        assert_eq!(fx.session.sends_to(200), 1);
        assert_eq!(fx.session.sends_to(300), 0);
        assert_eq!(fx.session.sends_to(400), 0);
    }

    #[tokio::test]
    async fn rewrite_prompt_transforms_the_text() {
        let fx = fixture(RecordingSession::default(), FakeImages::unused()).await;
        fx.destination(200, &["Sport"]).await;
        fx.db
            .set_rewrite_prompt(fx.account_id, 200, "punchier")
            .await
            .unwrap();

        let post_id = fx.post_with_topics("goal scored", &["Sport"]).await;
        fx.router.route(post_id, "goal scored").await;

        assert_eq!(fx.session.messages(), vec![(200, "GOAL SCORED!".to_string())]);
    }

    #[tokio::test]
    async fn rewrite_failure_falls_back_and_spares_siblings() {
        let fx = fixture(RecordingSession::default(), FakeImages::unused()).await;
        fx.destination(200, &["Sport"]).await;
        fx.destination(300, &["Sport"]).await;
        fx.destination(400, &["Sport"]).await;
        // The middle destination's rewrite always fails.
        fx.db
            .set_rewrite_prompt(fx.account_id, 300, "boom")
            .await
            .unwrap();

        let post_id = fx.post_with_topics("derby tonight", &["Sport"]).await;
        fx.router.route(post_id, "derby tonight").await;

        assert_eq!(fx.session.sends_to(200), 1);
        assert_eq!(fx.session.sends_to(300), 1);
        assert_eq!(fx.session.sends_to(400), 1);
        // Failed rewrite delivered the original text.
        let to_300 = fx
            .session
            .messages()
            .into_iter()
            .find(|(c, _)| *c == 300)
            .unwrap();
        assert_eq!(to_300.1, "derby tonight");
    }

    #[tokio::test]
    async fn generated_image_is_sent_as_photo_with_caption() {
        let image = vec![0x89, 0x50, 0x4E, 0x47];
        let fx = fixture(
            RecordingSession::default(),
            FakeImages::with(Ok(GenerationOutcome::Done(vec![
                image.clone(),
                vec![0xFF],
            ]))),
        )
        .await;
        fx.destination(200, &["Sport"]).await;
        fx.db
            .set_include_image(fx.account_id, 200, true)
            .await
            .unwrap();

        let post_id = fx.post_with_topics("cup final", &["Sport"]).await;
        fx.router.route(post_id, "cup final").await;

        assert!(fx.session.messages().is_empty());
        let photos = fx.session.photos();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].1, "cup final");
        // The first generated file is used.
        assert_eq!(photos[0].2, image);
    }

    #[tokio::test]
    async fn rejected_image_degrades_to_text_only() {
        let fx = fixture(
            RecordingSession::default(),
            FakeImages::with(Ok(GenerationOutcome::Rejected("policy".into()))),
        )
        .await;
        fx.destination(200, &["Sport"]).await;
        fx.db
            .set_include_image(fx.account_id, 200, true)
            .await
            .unwrap();

        let post_id = fx.post_with_topics("cup final", &["Sport"]).await;
        fx.router.route(post_id, "cup final").await;

        assert!(fx.session.photos().is_empty());
        assert_eq!(fx.session.messages(), vec![(200, "cup final".to_string())]);
    }

    #[tokio::test]
    async fn image_service_error_degrades_to_text_only() {
        let fx = fixture(
            RecordingSession::default(),
            FakeImages::with(Err(ImageError::Http("down".into()))),
        )
        .await;
        fx.destination(200, &["Sport"]).await;
        fx.db
            .set_include_image(fx.account_id, 200, true)
            .await
            .unwrap();

        let post_id = fx.post_with_topics("cup final", &["Sport"]).await;
        fx.router.route(post_id, "cup final").await;

        assert_eq!(fx.session.sends_to(200), 1);
        assert!(fx.session.photos().is_empty());
    }

    #[tokio::test]
    async fn failed_send_does_not_block_other_destinations() {
        let fx = fixture(
            RecordingSession {
                fail_channel: Some(300),
                ..Default::default()
            },
            FakeImages::unused(),
        )
        .await;
        fx.destination(200, &["Sport"]).await;
        fx.destination(300, &["Sport"]).await;
        fx.destination(400, &["Sport"]).await;

        let post_id = fx.post_with_topics("derby", &["Sport"]).await;
        fx.router.route(post_id, "derby").await;

        assert_eq!(fx.session.sends_to(200), 1);
        assert_eq!(fx.session.sends_to(300), 0);
        assert_eq!(fx.session.sends_to(400), 1);
    }

    #[tokio::test]
    async fn missing_owner_session_skips_only_that_destination() {
        let fx = fixture(RecordingSession::default(), FakeImages::unused()).await;
        fx.destination(200, &["Sport"]).await;

        // A second account owns channel 500 but has no live session.
        let orphan = fx.db.get_or_create_account(2).await.unwrap();
        fx.db
            .add_destination_channel(orphan.id, 500, None)
            .await
            .unwrap();
        fx.db
            .add_topic_to_destination(orphan.id, 500, "Sport")
            .await
            .unwrap();

        let post_id = fx.post_with_topics("derby", &["Sport"]).await;
        fx.router.route(post_id, "derby").await;

        assert_eq!(fx.session.sends_to(200), 1);
        assert_eq!(fx.session.sends_to(500), 0);
    }
}

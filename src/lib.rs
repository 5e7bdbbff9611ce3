//! channel-relay — topic-routed repost pipeline.
//!
//! Listens to source channels on a messaging platform through per-account
//! authenticated sessions, classifies every inbound post by topic, and
//! re-publishes matching posts to destination channels with optional
//! per-destination rewriting and image generation.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod services;
pub mod sessions;
pub mod store;
pub mod worker;

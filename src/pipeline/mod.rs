//! Content pipeline — ingestion and topic-routed fan-out.

pub mod ingest;
pub mod router;

pub use ingest::IngestionHandler;
pub use router::FanoutRouter;

//! Persistence layer — SQLite-backed credential store.

pub mod libsql_backend;
pub mod migrations;
pub mod models;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use models::{
    Account, AuthState, DestinationChannel, DestinationWithTopics, Post, SourceChannel, Topic,
};
pub use traits::Database;

/// Fixed topic vocabulary, inserted at bootstrap. The classifier only
/// selects from this set; it never invents new topics.
pub const DEFAULT_TOPICS: &[&str] = &[
    "Politics",
    "Economy",
    "Technology",
    "Gaming",
    "Culture",
    "Health",
    "Sport",
    "Education",
    "Science",
    "Entertainment",
    "Artificial Intelligence",
    "Finance",
    "Business",
    "Law",
    "Incidents",
    "Ecology",
    "Cybersecurity",
    "Medicine",
    "Music",
    "Movies",
];

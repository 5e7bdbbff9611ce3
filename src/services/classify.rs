//! Topic classifier adapter.
//!
//! Sends the post text plus the current topic vocabulary to the
//! classification service and returns the subset of labels it picked.
//! The service cannot add to the vocabulary: callers intersect the
//! response with the candidate set.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::ClassifyError;

/// Assigns topics to a piece of text from a fixed candidate set.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> Result<Vec<String>, ClassifyError>;
}

/// HTTP classifier client.
pub struct HttpClassifier {
    url: String,
    client: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(url: String, timeout: std::time::Duration) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifyError::Http(e.to_string()))?;
        Ok(Self { url, client })
    }
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    labels: Vec<String>,
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> Result<Vec<String>, ClassifyError> {
        let body = serde_json::json!({
            "text": text,
            "candidate_labels": candidate_labels,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ClassifyError::Http(format!(
                "classifier returned {}",
                resp.status()
            )));
        }

        let parsed: ClassifyResponse = resp
            .json()
            .await
            .map_err(|e| ClassifyError::BadResponse(e.to_string()))?;

        debug!(labels = parsed.labels.len(), "Classifier responded");
        Ok(parsed.labels)
    }
}

//! Text rewrite adapter.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RewriteError;

/// Rewrites a post's text according to a destination's prompt.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, text: &str, prompt: &str) -> Result<String, RewriteError>;
}

/// HTTP rewrite client. Applies the same explicit request timeout the
/// other adapters use; it does not rely on transport defaults.
pub struct HttpRewriter {
    url: String,
    client: reqwest::Client,
}

impl HttpRewriter {
    pub fn new(url: String, timeout: std::time::Duration) -> Result<Self, RewriteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RewriteError::Http(e.to_string()))?;
        Ok(Self { url, client })
    }
}

#[derive(Debug, Deserialize)]
struct RewriteResponse {
    rewritten_text: String,
}

#[async_trait]
impl Rewriter for HttpRewriter {
    async fn rewrite(&self, text: &str, prompt: &str) -> Result<String, RewriteError> {
        let body = serde_json::json!({ "text": text, "prompt": prompt });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RewriteError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RewriteError::Http(format!(
                "rewrite service returned {}",
                resp.status()
            )));
        }

        let parsed: RewriteResponse = resp
            .json()
            .await
            .map_err(|e| RewriteError::BadResponse(e.to_string()))?;
        Ok(parsed.rewritten_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_rewritten_text() {
        let parsed: RewriteResponse =
            serde_json::from_str(r#"{"rewritten_text": "shorter version"}"#).unwrap();
        assert_eq!(parsed.rewritten_text, "shorter version");
    }

    #[test]
    fn response_missing_field_is_an_error() {
        let parsed: Result<RewriteResponse, _> = serde_json::from_str(r#"{"other": 1}"#);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let rewriter = HttpRewriter::new(
            "http://127.0.0.1:1/rewrite".into(),
            std::time::Duration::from_millis(200),
        )
        .unwrap();

        let result = rewriter.rewrite("text", "make it pop").await;
        assert!(matches!(result, Err(RewriteError::Http(_))));
    }
}

//! Image generation adapter.
//!
//! Two-phase protocol: submit a job against a named pipeline, then poll
//! the status endpoint at a fixed interval up to a bounded attempt count.
//! Terminal states come back as a tagged [`GenerationOutcome`] rather
//! than an error per case; only transport and protocol problems are
//! `ImageError`s.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::ImageOptions;
use crate::error::ImageError;

/// Terminal result of a generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Decoded image payloads; at least one. Callers use the first.
    Done(Vec<Vec<u8>>),
    /// The service refused the prompt on content-policy grounds.
    Rejected(String),
    /// The poll attempt limit ran out before the job finished.
    TimedOut,
}

/// Generates an illustration for a post.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        post_text: &str,
        user_prompt: &str,
    ) -> Result<GenerationOutcome, ImageError>;
}

/// HTTP image service client with key/secret header authentication.
pub struct HttpImageGenerator {
    base_url: String,
    client: reqwest::Client,
    api_key: SecretString,
    api_secret: SecretString,
    options: ImageOptions,
    /// First advertised pipeline id, fetched once.
    pipeline: OnceCell<String>,
}

impl HttpImageGenerator {
    pub fn new(
        base_url: String,
        api_key: SecretString,
        api_secret: SecretString,
        options: ImageOptions,
        timeout: std::time::Duration,
    ) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ImageError::Http(e.to_string()))?;
        Ok(Self {
            base_url,
            client,
            api_key,
            api_secret,
            options,
            pipeline: OnceCell::new(),
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-Key", format!("Key {}", self.api_key.expose_secret()))
            .header(
                "X-Secret",
                format!("Secret {}", self.api_secret.expose_secret()),
            )
    }

    async fn pipeline_id(&self) -> Result<&str, ImageError> {
        self.pipeline
            .get_or_try_init(|| async {
                let resp = self
                    .authed(self.client.get(format!("{}/pipelines", self.base_url)))
                    .send()
                    .await
                    .map_err(|e| ImageError::Http(e.to_string()))?;

                if !resp.status().is_success() {
                    return Err(ImageError::Http(format!(
                        "pipelines returned {}",
                        resp.status()
                    )));
                }

                let pipelines: Vec<PipelineDto> = resp
                    .json()
                    .await
                    .map_err(|e| ImageError::BadResponse(e.to_string()))?;
                pipelines
                    .into_iter()
                    .next()
                    .map(|p| p.id)
                    .ok_or(ImageError::NoPipeline)
            })
            .await
            .map(String::as_str)
    }

    async fn submit(&self, prompt: &str) -> Result<String, ImageError> {
        let pipeline_id = self.pipeline_id().await?;
        let body = serde_json::json!({
            "pipeline_id": pipeline_id,
            "prompt": prompt,
            "width": self.options.width,
            "height": self.options.height,
            "count": self.options.count,
        });

        let resp = self
            .authed(self.client.post(format!("{}/pipeline/run", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ImageError::Http(format!(
                "pipeline/run returned {}",
                resp.status()
            )));
        }

        let run: RunResponse = resp
            .json()
            .await
            .map_err(|e| ImageError::BadResponse(e.to_string()))?;
        Ok(run.job_id)
    }

    async fn poll_status(&self, job_id: &str) -> Result<StatusResponse, ImageError> {
        let resp = self
            .authed(
                self.client
                    .get(format!("{}/pipeline/status/{job_id}", self.base_url)),
            )
            .send()
            .await
            .map_err(|e| ImageError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ImageError::Http(format!(
                "pipeline/status returned {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| ImageError::BadResponse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct PipelineDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    result: Option<StatusResult>,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    #[serde(default)]
    censored: bool,
    #[serde(default)]
    files: Vec<String>,
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(
        &self,
        post_text: &str,
        user_prompt: &str,
    ) -> Result<GenerationOutcome, ImageError> {
        let prompt = build_generation_prompt(post_text, user_prompt);
        let job_id = self.submit(&prompt).await?;
        debug!(job = %job_id, "Generation job submitted");

        for _ in 0..self.options.poll_attempts {
            let status = self.poll_status(&job_id).await?;
            if let Some(outcome) = interpret_status(status)? {
                return Ok(outcome);
            }
            tokio::time::sleep(self.options.poll_delay).await;
        }

        Ok(GenerationOutcome::TimedOut)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Fixed instruction embedding the post text, with the destination's own
/// requirements appended when present.
fn build_generation_prompt(post_text: &str, user_prompt: &str) -> String {
    let mut prompt = format!(
        "Generate an illustration for a messenger post that matches its \
         meaning. Post text: {post_text}."
    );
    if !user_prompt.is_empty() {
        prompt.push_str(&format!(" Make sure to honor these requirements: {user_prompt}"));
    }
    prompt
}

/// Map one status poll to a terminal outcome, or `None` to keep polling.
fn interpret_status(
    status: StatusResponse,
) -> Result<Option<GenerationOutcome>, ImageError> {
    match status.status.as_str() {
        "DONE" => {
            let result = status
                .result
                .ok_or_else(|| ImageError::BadResponse("DONE without result".into()))?;
            if result.censored {
                return Ok(Some(GenerationOutcome::Rejected(
                    "rejected by content policy".into(),
                )));
            }
            let mut files = Vec::with_capacity(result.files.len());
            for encoded in &result.files {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| ImageError::BadResponse(format!("file decode: {e}")))?;
                files.push(bytes);
            }
            if files.is_empty() {
                return Err(ImageError::BadResponse("DONE with no files".into()));
            }
            Ok(Some(GenerationOutcome::Done(files)))
        }
        "FAIL" => Err(ImageError::Failed),
        _ => Ok(None),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

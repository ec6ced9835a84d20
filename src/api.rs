//! LLM API interaction with exponential backoff retry logic.
//!
//! This module provides the enrichment backend used by the
//! [`Enricher`](crate::processor::enricher::Enricher): an
//! OpenAI-compatible chat completion client plus automatic retry with
//! exponential backoff and jitter.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`ChatCompletion`]: One persona (system prompt) against `/chat/completions`
//! - [`RetryAsk`]: Decorator that adds retry logic to any `AskAsync` implementation
//! - [`OpenAiBackend`]: Summary and classification on top of two retrying personas
//!
//! # Retry Strategy
//!
//! - Maximum 3 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//! - Client errors other than 429 are not retried

use rand::{Rng, rng};
use serde_json::json;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::error::EnrichError;
use crate::processor::enricher::EnrichmentBackend;
use crate::utils::truncate_for_log;

/// Categories offered to the classifier.
pub const EVENT_CATEGORIES: &[&str] = &[
    "Concert",
    "Festival",
    "Exhibition",
    "Theatre",
    "Conference",
    "Sport",
    "Food & Wine",
    "Religious",
    "Market",
    "Other",
];

/// Trait for async LLM interaction.
///
/// Implementors of this trait can send text to an LLM and receive a response.
/// This abstraction allows for different LLM backends or decorators (like retry logic).
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, EnrichError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Create a new retry wrapper around an existing [`AskAsync`] implementation.
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

/// Whether a failed call is worth repeating.
fn is_retryable(e: &EnrichError) -> bool {
    match e {
        EnrichError::Api { status, .. } => *status == 429 || *status >= 500,
        EnrichError::Request(_) | EnrichError::Malformed(_) | EnrichError::Empty => true,
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, EnrichError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || !is_retryable(&e) {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() giving up"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub timeout: StdDuration,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A single chat persona: fixed system prompt, sampling settings, and model.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    http: reqwest::Client,
    config: LlmConfig,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletion {
    pub fn new(
        http: reqwest::Client,
        config: LlmConfig,
        system_prompt: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            http,
            config,
            system_prompt: system_prompt.into(),
            temperature,
            max_tokens,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl AskAsync for ChatCompletion {
    type Response = String;

    #[instrument(level = "debug", skip_all, fields(model = %self.config.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response, EnrichError> {
        let t0 = Instant::now();
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": text }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "n": 1
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                body = %truncate_for_log(&message, 300),
                "API call failed"
            );
            return Err(EnrichError::Api {
                status: status.as_u16(),
                message: truncate_for_log(&message, 300),
            });
        }

        let value: serde_json::Value = response.json().await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EnrichError::Malformed(format!(
                    "missing choices[0].message.content in {}",
                    truncate_for_log(&value.to_string(), 200)
                ))
            })?
            .trim()
            .to_string();

        if content.is_empty() {
            return Err(EnrichError::Empty);
        }
        Ok(content)
    }
}

/// Map a free-form classifier answer onto the known category list.
///
/// Known labels come back in their canonical spelling; an unrecognized,
/// non-empty answer is kept as-is.
pub fn normalize_category(answer: &str, categories: &[&str]) -> Option<String> {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '*')
        .trim();
    let cleaned = cleaned
        .strip_prefix("Category:")
        .map(str::trim)
        .unwrap_or(cleaned);
    if cleaned.is_empty() {
        return None;
    }
    Some(
        categories
            .iter()
            .find(|c| c.eq_ignore_ascii_case(cleaned))
            .map(|c| c.to_string())
            .unwrap_or_else(|| cleaned.to_string()),
    )
}

fn summary_prompt(text: &str, min_chars: usize, max_chars: usize) -> String {
    format!(
        "Rewrite the following event description in English. Create a compelling and informative summary suitable for a tourist audience.\n\
         Include all essential details like what the event is, where, and any specific highlights mentioned.\n\
         The summary should be between {min_chars} and {max_chars} characters long. Do not include the date unless it's part of the core description.\n\n\
         Original Text:\n\"\"\"\n{text}\n\"\"\"\n\n\
         English Summary ({min_chars}-{max_chars} characters):"
    )
}

fn classify_prompt(text: &str, categories: &[&str]) -> String {
    format!(
        "Classify the following event into exactly one of these categories: {}. Respond with only the category name.\n\n{text}",
        categories.join(", ")
    )
}

/// Enrichment backend speaking the OpenAI chat completion protocol.
#[derive(Debug)]
pub struct OpenAiBackend {
    summarizer: RetryAsk<ChatCompletion>,
    classifier: RetryAsk<ChatCompletion>,
    categories: Vec<&'static str>,
}

impl OpenAiBackend {
    pub fn new(config: LlmConfig) -> Result<Self, EnrichError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let summarizer = ChatCompletion::new(
            http.clone(),
            config.clone(),
            "You are a helpful assistant that summarizes event descriptions for tourists in clear and engaging English.",
            0.6,
            300,
        );
        let classifier = ChatCompletion::new(
            http,
            config,
            "You classify local event listings. Answer with a single category name and nothing else.",
            0.2,
            16,
        );
        info!("OpenAI enrichment backend initialized");
        Ok(Self {
            summarizer: RetryAsk::new(summarizer, 3, StdDuration::from_secs(1)),
            classifier: RetryAsk::new(classifier, 3, StdDuration::from_secs(1)),
            categories: EVENT_CATEGORIES.to_vec(),
        })
    }
}

impl EnrichmentBackend for OpenAiBackend {
    #[instrument(level = "info", skip_all, fields(input_chars = text.chars().count()))]
    async fn summarize(
        &self,
        text: &str,
        min_chars: usize,
        max_chars: usize,
    ) -> Result<String, EnrichError> {
        let summary = self
            .summarizer
            .ask(&summary_prompt(text, min_chars, max_chars))
            .await?;
        let len = summary.chars().count();
        if len * 2 < min_chars || len * 5 > max_chars * 6 {
            warn!(
                len,
                min_chars, max_chars, "Summary length outside target range; using it anyway"
            );
        }
        Ok(summary)
    }

    #[instrument(level = "info", skip_all)]
    async fn classify(&self, text: &str) -> Result<String, EnrichError> {
        let answer = self
            .classifier
            .ask(&classify_prompt(text, &self.categories))
            .await?;
        normalize_category(&answer, &self.categories).ok_or(EnrichError::Empty)
    }
}

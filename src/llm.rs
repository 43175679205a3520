//! Chat-completion client for the optimiser.
//!
//! [`ChatClient`] is the seam: [`OpenRouterClient`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint, tests plug in canned
//! responses.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::post_json_with_retry;
use crate::error::PipelineError;

pub const TEMPERATURE: f64 = 0.3;
pub const MAX_TOKENS: u32 = 4000;

#[async_trait]
pub trait ChatClient: Send + Sync {
    fn model(&self) -> &str;

    /// Send one system + user exchange and return the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct OpenRouterClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenRouterClient {
    /// Fails with [`PipelineError::LlmUnavailable`] when the API key is unset.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::LlmUnavailable(format!(
                    "{} environment variable not set",
                    config.api_key_env
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building LLM HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatClient for OpenRouterClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        tracing::info!(model = %self.model, "requesting chat completion");
        let response = post_json_with_retry(self.max_retries, "LLM", || {
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .header("X-Title", "cvPRD")
                .json(&body)
        })
        .await?;

        completion_text(&response)
    }
}

/// Pull `choices[0].message.content` out of a chat-completion response.
pub fn completion_text(response: &serde_json::Value) -> Result<String> {
    match response["choices"][0]["message"]["content"].as_str() {
        Some(text) => Ok(text.to_string()),
        None => bail!("LLM response has no message content"),
    }
}

/// Find the first JSON object in free-form model output.
///
/// Markdown code fences are stripped first. The object is delimited by
/// brace counting that ignores braces inside string literals, so trailing
/// prose after the object is tolerated.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value> {
    let body = strip_fences(text);

    let start = body
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("no JSON object in response"))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;

    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or_else(|| anyhow::anyhow!("unbalanced JSON object in response"))?;
    serde_json::from_str(&body[start..end]).context("invalid JSON object in response")
}

fn strip_fences(text: &str) -> &str {
    if let Some((_, rest)) = text.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    let mut parts = text.split("```");
    match (parts.next(), parts.next()) {
        (Some(_), Some(inner)) => inner.trim(),
        _ => text,
    }
}

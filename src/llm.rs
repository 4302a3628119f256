//! LLM Translator
//!
//! Turns a question (or a repair prompt) into a candidate SQL query through an
//! OpenAI-compatible chat completions endpoint.

use crate::config::LlmConfig;
use crate::error::{RepairError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Natural-language to query capability.
///
/// Implementations are treated as opaque: whatever non-empty text comes back
/// is a candidate query, and only execution tells whether it is valid.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T: Translator + ?Sized> Translator for Arc<T> {
    async fn translate(&self, prompt: &str) -> Result<String> {
        (**self).translate(prompt).await
    }
}

/// Translator backed by an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmTranslator {
    client: reqwest::Client,
    config: LlmConfig,
    schema_ddl: String,
}

impl LlmTranslator {
    pub fn new(config: LlmConfig, schema_ddl: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            schema_ddl: schema_ddl.into(),
        }
    }

    fn system_prompt(&self) -> String {
        let mut parts = vec![
            "You translate questions into SQLite SQL.".to_string(),
            "Return exactly one SQL statement, no explanation, no markdown.".to_string(),
        ];
        if !self.schema_ddl.trim().is_empty() {
            parts.push(format!("\nDatabase schema:\n{}", self.schema_ddl.trim()));
        }
        parts.join("\n")
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": self.system_prompt()},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RepairError::Translation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RepairError::Translation(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RepairError::Translation(format!("Failed to parse LLM response: {}", e)))?;

        content_from_response(&response_json)
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(&self, prompt: &str) -> Result<String> {
        let raw = self.call_llm(prompt).await?;
        let sql = extract_sql(&raw)?;
        debug!("Translator produced: {}", sql);
        Ok(sql)
    }
}

fn content_from_response(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(RepairError::Translation(format!("LLM API error: {}", error)));
    }

    let choice = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| RepairError::Translation("No choices in LLM response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => {
            return Err(RepairError::Translation(
                "LLM response was filtered by content policy".to_string(),
            ));
        }
        Some("length") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    choice["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| RepairError::Translation("No content in LLM response".to_string()))
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

/// Pull the query out of raw model output.
///
/// Prefers the first fenced code block; otherwise takes the text as-is.
pub fn extract_sql(raw: &str) -> Result<String> {
    let body = match fence_regex()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
    {
        Some(m) => m.as_str(),
        None => raw.trim().trim_matches('`'),
    };

    let sql = body.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(RepairError::Translation(
            "translator returned no usable text".to_string(),
        ));
    }
    Ok(sql.to_string())
}

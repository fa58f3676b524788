//! AI moderation client.
//!
//! Sends one chat-completion request per risky comment and maps the
//! loosely structured reply to a verdict. Every failure mode along the
//! way (missing credential, transport error, timeout, bad status,
//! unparseable reply) resolves through the same default-allow policy:
//! when the AI path is degraded the system publishes rather than
//! censors, and logs enough to audit false negatives afterwards.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::ModerationConfig;

/// Instruction prompt sent with the comment. The remote model is asked
/// for a minimal JSON object and nothing else.
const MODERATION_PROMPT: &str = r#"你是一个内容审核助手。请判断以下用户评论是否符合文明规范。

需要检测的内容类型：
1. 辱骂、攻击性言论
2. 色情、低俗内容
3. 广告、垃圾信息
4. 政治敏感内容
5. 其他违规内容

用户评论内容：
"{content}"

请用JSON格式回复：
- 如果内容合规，回复：{"pass": true, "reason": ""}
- 如果内容违规，回复：{"pass": false, "reason": "简短说明违规原因"}

只需要回复JSON，不要其他内容。"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub pass: bool,
    pub reason: String,
}

/// Outcome of parsing the model's reply text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyParse {
    Verdict(ModerationVerdict),
    Unparseable { raw: String },
}

/// The single place where "the AI path failed" becomes a verdict.
/// Swapping this for a fail-closed policy changes every failure branch
/// at once.
pub fn default_allow() -> ModerationVerdict {
    ModerationVerdict { pass: true, reason: String::new() }
}

pub struct ModerationClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl ModerationClient {
    pub fn new(config: &ModerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build moderation http client")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Classifies one comment body. Never returns an error: every
    /// failure resolves to [`default_allow`].
    pub async fn classify(&self, content: &str) -> ModerationVerdict {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("moderation api key not configured, skipping ai review");
            return default_allow();
        };

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": MODERATION_PROMPT.replace("{content}", content),
            }],
            "temperature": 0.1,
            "max_tokens": 100,
        });

        let response = match self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if err.is_timeout() {
                    tracing::warn!("moderation api timed out");
                } else {
                    tracing::error!("moderation api request failed: {err}");
                }
                return default_allow();
            },
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("moderation api returned {status}: {text}");
            return default_allow();
        }

        let payload: Value = match response.json().await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("moderation api body was not json: {err}");
                return default_allow();
            },
        };

        let reply = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");

        match parse_moderation_reply(reply) {
            ReplyParse::Verdict(verdict) => verdict,
            ReplyParse::Unparseable { raw } => {
                tracing::warn!("moderation reply could not be parsed, defaulting to pass: {raw:?}");
                default_allow()
            },
        }
    }
}

/// Parses the raw reply text into a verdict: strip code-fence markers,
/// extract the first brace-delimited substring without nested braces,
/// parse it as a JSON object. A `pass` field given as a string maps
/// `"true"`/`"1"`/`"yes"` to true and anything else to false; a missing
/// `pass` counts as true. Anything that does not survive this sequence
/// is reported as unparseable.
pub fn parse_moderation_reply(raw: &str) -> ReplyParse {
    let unfenced = strip_code_fences(raw.trim());
    let candidate = extract_json_object(&unfenced).unwrap_or(unfenced.trim());

    let unparseable = || ReplyParse::Unparseable { raw: raw.to_string() };

    let data: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(_) => return unparseable(),
    };
    let Value::Object(map) = data else {
        // Valid JSON but not an object, e.g. a bare string or array.
        return unparseable();
    };

    let pass = match map.get("pass") {
        None => true,
        Some(Value::Bool(value)) => *value,
        Some(Value::String(value)) => {
            matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        },
        Some(Value::Number(value)) => value.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(_) => false,
    };
    let reason = match map.get("reason") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
    };

    ReplyParse::Verdict(ModerationVerdict { pass, reason })
}

/// Removes markdown code-fence markers when the reply arrives wrapped
/// in a fenced block.
fn strip_code_fences(reply: &str) -> String {
    if !reply.starts_with("```") {
        return reply.to_string();
    }

    let lines: Vec<&str> = reply.split('\n').collect();
    let drop_last = lines
        .last()
        .map(|line| {
            let trimmed = line.trim();
            trimmed == "```" || trimmed == "```json"
        })
        .unwrap_or(false);
    let end = if drop_last { lines.len().saturating_sub(1) } else { lines.len() };
    lines.get(1..end).unwrap_or_default().join("\n").trim().to_string()
}

/// First `{...}` substring containing no nested braces.
fn extract_json_object(raw: &str) -> Option<&str> {
    let mut start = None;
    for (idx, ch) in raw.char_indices() {
        match ch {
            '{' => start = Some(idx),
            '}' => {
                if let Some(begin) = start {
                    return Some(&raw[begin..idx + ch.len_utf8()]);
                }
            },
            _ => {},
        }
    }
    None
}

//! Text-completion client: Gemini-style wire contract plus a deterministic
//! mock, behind one trait seam so the conversation engine never knows which
//! it is talking to.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;
use crate::lead::{ChatTurn, Role};
use crate::shared::CoreConfig;

/// Suffix line the model may append to offer clickable replies.
pub const QUICK_REPLY_PREFIX: &str = "QUICK_REPLIES:";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;
/// Conversation turns included in the prompt, newest last.
const PROMPT_HISTORY_TURNS: usize = 6;

/// Opaque text-completion service consumed by the conversation engine.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

// Gemini generateContent wire shapes.
#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

/// Live client for a Gemini-style `generateContent` endpoint. The API key is
/// sent as a query parameter; requests carry a bounded timeout and are
/// retried with exponential backoff plus jitter on retryable failures.
pub struct GeminiClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_url: api_url.into(),
            api_key: api_key.into().trim().to_string(),
            client,
        }
    }

    /// Builds a client from config; `NotConfigured` when the URL or key is
    /// missing or blank.
    pub fn from_config(config: &CoreConfig) -> Result<Self, LlmError> {
        let url = config.llm_api_url.as_deref().unwrap_or("").trim();
        let key = config.llm_api_key.as_deref().unwrap_or("").trim();
        if url.is_empty() {
            return Err(LlmError::NotConfigured("llm_api_url is not set".to_string()));
        }
        if key.is_empty() {
            return Err(LlmError::NotConfigured("llm_api_key is not set".to_string()));
        }
        Ok(Self::new(url, key))
    }

    async fn try_once(&self, body: &GenerateRequest) -> Result<String, LlmError> {
        let res = self
            .client
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let parsed: GenerateResponse = res
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| LlmError::Malformed("no candidates in response".to_string()))
    }
}

#[async_trait]
impl TextCompletion for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt.to_string() }],
            }],
        };

        let mut last_err = LlmError::Request("no attempt made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 2);
                let jitter = rand::thread_rng().gen_range(0..BACKOFF_BASE_MS / 2);
                tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            }
            match self.try_once(&body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        target: "leadchat::llm",
                        attempt,
                        error = %e,
                        "completion attempt failed, retrying"
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

/// Deterministic mock in the shape of a live completion. Used when
/// `llm_mode = "mock"` and throughout the tests, so the whole conversation
/// flow works without an API key.
pub struct MockCompletion;

#[async_trait]
impl TextCompletion for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let preview: String = prompt
            .lines()
            .last()
            .unwrap_or("")
            .chars()
            .take(60)
            .collect();
        Ok(format!(
            "Thanks for asking! Here's the short answer based on what you said ({}). \
             Does that cover it? And would you also like a callback, or anything else?",
            preview.trim()
        ))
    }
}

/// Everything the prompt composer needs, gathered by the engine.
pub struct PromptContext<'a> {
    pub business_context: &'a str,
    pub knowledge_excerpt: &'a str,
    pub state_snapshot: String,
    pub history: &'a [ChatTurn],
    pub discussed_topics: Vec<String>,
    pub user_message: &'a str,
}

/// Composes the completion prompt: business context, knowledge excerpt,
/// state snapshot, last-N turns, discussed-topics summary, the current
/// message, and the quick-replies formatting instruction.
pub fn compose_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(ctx.business_context);
    prompt.push_str("\n\n");

    if !ctx.knowledge_excerpt.is_empty() {
        prompt.push_str("Reference notes:\n");
        prompt.push_str(ctx.knowledge_excerpt);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Current visitor state: ");
    prompt.push_str(&ctx.state_snapshot);
    prompt.push_str("\n\n");

    if !ctx.discussed_topics.is_empty() {
        prompt.push_str("Topics already covered: ");
        prompt.push_str(&ctx.discussed_topics.join(", "));
        prompt.push_str("\n\n");
    }

    let recent = ctx
        .history
        .iter()
        .rev()
        .take(PROMPT_HISTORY_TURNS)
        .collect::<Vec<_>>();
    if !recent.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for turn in recent.into_iter().rev() {
            let who = match turn.role {
                Role::User => "Visitor",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{}: {}\n", who, turn.content));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Answer the visitor's question in at most two short sentences. \
         If clickable suggestions would help, end with one extra line of the form \
         `QUICK_REPLIES: option a|option b|option c`.\n\n",
    );
    prompt.push_str("Visitor: ");
    prompt.push_str(ctx.user_message);
    prompt
}

/// Splits an optional trailing `QUICK_REPLIES: a|b|c` line off a completion.
pub fn split_quick_replies(raw: &str) -> (String, Vec<String>) {
    let mut text_lines = Vec::new();
    let mut replies = Vec::new();
    for line in raw.lines() {
        match line.trim().strip_prefix(QUICK_REPLY_PREFIX) {
            Some(rest) => {
                replies = rest
                    .split('|')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            None => text_lines.push(line),
        }
    }
    (text_lines.join("\n").trim().to_string(), replies)
}

/// Enforces the single-question constraint: keeps everything up to and
/// including the first question mark and drops the rest, so the widget never
/// asks the visitor two things at once.
pub fn enforce_single_question(text: &str) -> String {
    match text.find('?') {
        Some(idx) => text[..=idx].trim().to_string(),
        None => text.trim().to_string(),
    }
}

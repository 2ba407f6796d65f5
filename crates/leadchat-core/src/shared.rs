//! Shared configuration types used across all leadchat crates.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::script::TopicId;

/// Chatbot instance id used when the embed snippet does not carry one.
pub const DEFAULT_CHATBOT_ID: &str = "default";

/// Global application configuration (gateway + conversation defaults).
/// Load from TOML or env. Secrets (API keys, webhook URLs) live here on the
/// server side only; they are never part of the widget embed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application identity shown in logs and the status endpoint.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base directory for the Sled lead store.
    pub storage_path: String,
    /// LLM mode ("mock" or "live").
    pub llm_mode: String,
    /// Text-completion endpoint (Gemini-style generateContent URL).
    #[serde(default)]
    pub llm_api_url: Option<String>,
    /// Text-completion API key, sent as a query parameter.
    #[serde(default)]
    pub llm_api_key: Option<String>,
    /// Spreadsheet-sync webhook; absent means the mirror tier is unavailable.
    #[serde(default)]
    pub sheets_webhook_url: Option<String>,
    /// Phone number offered to the visitor when automation fails.
    pub fallback_phone: String,
    /// Minimum interval between processed messages for one conversation.
    pub debounce_ms: u64,
    /// Greeting sent when a conversation starts.
    pub welcome_message: String,
    /// Fixed business-context block injected into every completion prompt.
    pub business_context: String,
    /// Condensed knowledge-base excerpt injected into completion prompts.
    #[serde(default)]
    pub knowledge_excerpt: String,
}

impl CoreConfig {
    /// Load config from file and environment.
    /// Precedence: env `LEADCHAT_CONFIG` path > `config/gateway.toml` > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("LEADCHAT_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "LeadChat Gateway")?
            .set_default("port", 8010_i64)?
            .set_default("storage_path", "./data")?
            .set_default("llm_mode", "mock")?
            .set_default("fallback_phone", "(631) 555-7100")?
            .set_default("debounce_ms", 1000_i64)?
            .set_default(
                "welcome_message",
                "Hi! I can walk you through how our pool care service works and get you a quote.",
            )?
            .set_default(
                "business_context",
                "Harbor Pool Care is a full-service pool company on the East End of Long Island. \
                 We handle cleaning, repairs, seasonal openings and closings, and weekly maintenance. \
                 Answer as a friendly, concise service representative.",
            )?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("LEADCHAT").separator("__"))
            .build()?;

        built.try_deserialize()
    }
}

/// Per-topic override supplied by the embed config (title/info/question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicOverride {
    pub id: TopicId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
}

/// Canonical form of the embed snippet's `data-config` JSON attribute.
/// Unknown fields are ignored; missing fields take widget defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub position: String,
    pub animation: String,
    pub trigger_delay_ms: u64,
    pub primary_color: String,
    pub topic_overrides: Vec<TopicOverride>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            position: "bottom-right".to_string(),
            animation: "slide-up".to_string(),
            trigger_delay_ms: 3000,
            primary_color: "#0b7285".to_string(),
            topic_overrides: Vec::new(),
        }
    }
}

impl WidgetConfig {
    /// Parses the raw `data-config` attribute value. Malformed JSON is an
    /// input-validation error recovered locally by the caller (defaults).
    pub fn from_data_attr(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

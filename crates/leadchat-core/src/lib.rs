//! leadchat-core: the topic-driven lead conversation engine.
//!
//! Shared configuration, the fixed topic script, the conversation state
//! machine, opportunistic field extraction, the completion client, and the
//! tiered lead persistence chain. The gateway add-on wires these together
//! behind an HTTP API.

mod convo;
mod error;
mod extract;
mod lead;
mod llm;
mod script;
mod shared;
mod store;

pub use shared::{CoreConfig, TopicOverride, WidgetConfig, DEFAULT_CHATBOT_ID};

pub use script::{Speaker, Topic, TopicId, TopicResponse, TopicScript};

pub use convo::{
    ConversationEngine, EngineConfig, EngineReply, MessageOutcome, Mode, QuickReply,
};

pub use extract::scan_message;

pub use lead::{
    quality_score, CapturedFields, ChatTurn, ContactInfo, LeadRecord, LeadStatus, Role,
};

pub use llm::{
    compose_prompt, enforce_single_question, split_quick_replies, GeminiClient, MockCompletion,
    PromptContext, TextCompletion, QUICK_REPLY_PREFIX,
};

pub use store::{
    LeadBackend, MemoryFallbackStore, PersistenceGateway, SaveOutcome, SheetsMirror,
    SledLeadStore,
};

pub use error::{LlmError, StoreError};

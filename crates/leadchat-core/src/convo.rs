//! The topic-driven conversation engine.
//!
//! One engine instance owns one visitor session. The engine walks the fixed
//! topic script in order: present a topic's static info and question, collect
//! the visitor's answer, offer a question round about that topic, then move
//! on. Freeform questions are answered by the completion service; everything
//! else is deterministic. Every visitor message also passes through the
//! field extractor, so contact details are captured wherever they appear.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::extract;
use crate::lead::{self, CapturedFields, ChatTurn, LeadRecord, LeadStatus, Role};
use crate::llm::{compose_prompt, enforce_single_question, split_quick_replies, PromptContext, TextCompletion};
use crate::script::{Speaker, TopicResponse, TopicScript};
use crate::store::PersistenceGateway;

/// What the engine is waiting for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Constructed but `start` not yet called.
    Idle,
    /// A topic's question was asked; the next message is its answer.
    AwaitingTopicAnswer,
    /// "Any questions about X?" was asked; the next message is yes or no.
    AwaitingQuestionConfirm,
    /// The visitor said yes; the next message is a freeform question.
    AnsweringFreeform,
    /// Every topic is done and the lead is finalized.
    Complete,
}

/// A clickable suggestion rendered under the composer.
#[derive(Debug, Clone, Serialize)]
pub struct QuickReply {
    pub label: String,
    pub value: String,
}

impl QuickReply {
    fn new(label: &str, value: &str) -> Self {
        Self { label: label.to_string(), value: value.to_string() }
    }
}

/// One engine turn: the assistant messages to render, in order, plus
/// optional quick replies for the last one.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReply {
    pub messages: Vec<String>,
    pub quick_replies: Vec<QuickReply>,
    pub completed: bool,
}

impl EngineReply {
    fn plain(messages: Vec<String>) -> Self {
        Self { messages, quick_replies: Vec::new(), completed: false }
    }
}

/// Result of feeding one visitor message to the engine.
#[derive(Debug)]
pub enum MessageOutcome {
    Reply(EngineReply),
    /// The message arrived inside the debounce window or was empty. Nothing
    /// changed. (Messages racing an in-flight one are rejected upstream,
    /// at the gateway's per-session lock.)
    Dropped,
}

/// Per-session settings handed to the engine at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub session_id: String,
    pub welcome_message: String,
    pub business_context: String,
    pub knowledge_excerpt: String,
    pub fallback_phone: String,
    pub debounce: Duration,
}

pub struct ConversationEngine {
    config: EngineConfig,
    script: TopicScript,
    mode: Mode,
    current_topic: usize,
    fields: CapturedFields,
    history: Vec<ChatTurn>,
    started_at: DateTime<Utc>,
    llm: Arc<dyn TextCompletion>,
    store: Arc<PersistenceGateway>,
    created: Instant,
    last_message_at: Option<Instant>,
}

impl ConversationEngine {
    pub fn new(
        config: EngineConfig,
        script: TopicScript,
        llm: Arc<dyn TextCompletion>,
        store: Arc<PersistenceGateway>,
    ) -> Self {
        Self {
            config,
            script,
            mode: Mode::Idle,
            current_topic: 0,
            fields: CapturedFields::default(),
            history: Vec::new(),
            started_at: Utc::now(),
            llm,
            store,
            created: Instant::now(),
            last_message_at: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn completion_percentage(&self) -> u32 {
        self.script.completion_percentage()
    }

    /// Time since the last processed message (or construction).
    pub fn idle_for(&self) -> Duration {
        self.last_message_at
            .map(|at| at.elapsed())
            .unwrap_or_else(|| self.created.elapsed())
    }

    /// Opens the conversation: greeting plus the first topic.
    pub fn start(&mut self) -> EngineReply {
        let messages = self.opening_messages();
        self.push_assistant(&messages);
        tracing::info!(
            target: "leadchat::convo",
            session_id = %self.config.session_id,
            "conversation started"
        );
        EngineReply::plain(messages)
    }

    fn opening_messages(&mut self) -> Vec<String> {
        let mut messages = vec![self.config.welcome_message.clone()];
        messages.extend(self.present_topic(self.current_topic));
        self.mode = Mode::AwaitingTopicAnswer;
        messages
    }

    /// Feeds one visitor message through the state machine. Infallible:
    /// every failure downstream (completion, persistence) is converted into
    /// a visitor-facing message rather than an error. Cancellation-safe in
    /// the sense that dropping the returned future mid-await leaves the
    /// engine able to process the next message.
    pub async fn handle_message(&mut self, text: &str) -> MessageOutcome {
        let text = text.trim();
        if text.is_empty() {
            return MessageOutcome::Dropped;
        }
        if let Some(last) = self.last_message_at {
            if last.elapsed() < self.config.debounce {
                tracing::debug!(
                    target: "leadchat::convo",
                    session_id = %self.config.session_id,
                    "message dropped inside debounce window"
                );
                return MessageOutcome::Dropped;
            }
        }
        self.last_message_at = Some(Instant::now());

        self.history.push(ChatTurn::user(text));
        extract::scan_message(&mut self.fields, text);

        let reply = match self.mode {
            Mode::Idle => {
                // `start` was skipped; open the conversation instead.
                EngineReply::plain(self.opening_messages())
            }
            Mode::AwaitingTopicAnswer => self.on_topic_answer(text),
            Mode::AwaitingQuestionConfirm => self.on_question_confirm(text).await,
            Mode::AnsweringFreeform => self.on_freeform_question(text).await,
            Mode::Complete => self.on_post_completion(text).await,
        };

        self.push_assistant(&reply.messages);
        MessageOutcome::Reply(reply)
    }

    fn on_topic_answer(&mut self, text: &str) -> EngineReply {
        self.script
            .record_response(self.current_topic, TopicResponse::now(Speaker::User, text));
        let title = self
            .script
            .get(self.current_topic)
            .map(|t| t.title.clone())
            .unwrap_or_default();
        self.mode = Mode::AwaitingQuestionConfirm;
        EngineReply {
            messages: vec![format!("Got it. Any questions about {}?", title)],
            quick_replies: vec![
                QuickReply::new("No questions", "No questions"),
                QuickReply::new("Yes, I have a question", "Yes, I have a question"),
            ],
            completed: false,
        }
    }

    async fn on_question_confirm(&mut self, text: &str) -> EngineReply {
        // "no" anywhere in the message declines, and it is checked first so
        // that "No questions" is a decline even though it mentions a question.
        if text.to_lowercase().contains("no") {
            self.advance_topic().await
        } else {
            self.mode = Mode::AnsweringFreeform;
            EngineReply::plain(vec!["Sure! What would you like to know?".to_string()])
        }
    }

    async fn on_freeform_question(&mut self, text: &str) -> EngineReply {
        if self.fields.specific_query.is_none() {
            self.fields.specific_query = Some(text.to_string());
        }
        self.script
            .record_response(self.current_topic, TopicResponse::now(Speaker::User, text));

        match self.ask_llm(text).await {
            Ok((answer, quick_replies)) => {
                self.script.record_response(
                    self.current_topic,
                    TopicResponse::now(Speaker::Assistant, answer.clone()),
                );
                let mut reply = self.advance_topic().await;
                reply.messages.insert(0, answer);
                if reply.quick_replies.is_empty() {
                    reply.quick_replies = quick_replies;
                }
                reply
            }
            Err(e) => {
                tracing::warn!(
                    target: "leadchat::convo",
                    session_id = %self.config.session_id,
                    error = %e,
                    "completion failed, sending apology"
                );
                // Stay in the freeform state so the visitor can re-ask.
                EngineReply::plain(vec![format!(
                    "Sorry, I'm having trouble answering right now. You can try again in a \
                     moment, or call us directly at {}.",
                    self.config.fallback_phone
                )])
            }
        }
    }

    async fn on_post_completion(&mut self, text: &str) -> EngineReply {
        let lower = text.to_lowercase();
        if lower.contains("question") || lower.contains("help") {
            match self.ask_llm(text).await {
                Ok((answer, quick_replies)) => {
                    return EngineReply { messages: vec![answer], quick_replies, completed: true };
                }
                Err(e) => {
                    tracing::warn!(
                        target: "leadchat::convo",
                        session_id = %self.config.session_id,
                        error = %e,
                        "post-completion completion failed"
                    );
                }
            }
        }
        EngineReply {
            messages: vec![format!(
                "Thanks again! We have everything we need and will be in touch shortly. \
                 If anything is urgent, call us at {}.",
                self.config.fallback_phone
            )],
            quick_replies: Vec::new(),
            completed: true,
        }
    }

    /// Marks the current topic done and moves on: either the next topic's
    /// presentation or, when the script is exhausted, finalization.
    async fn advance_topic(&mut self) -> EngineReply {
        self.script.mark_completed(self.current_topic);
        self.current_topic += 1;

        if self.current_topic >= self.script.len() {
            return self.finish().await;
        }

        // Partial save so an abandoned session still leaves a lead behind.
        let record = self.build_record(LeadStatus::InProgress);
        if let Err(e) = self.store.save(&record).await {
            tracing::debug!(
                target: "leadchat::convo",
                session_id = %self.config.session_id,
                error = %e,
                "partial save failed"
            );
        }

        let mut reply = EngineReply::plain(self.present_topic(self.current_topic));
        self.mode = Mode::AwaitingTopicAnswer;
        reply.completed = false;
        reply
    }

    async fn finish(&mut self) -> EngineReply {
        self.mode = Mode::Complete;
        let record = self.build_record(LeadStatus::Complete);
        let mut messages = vec![
            "That's everything on my list, thank you! A team member will reach out shortly \
             to get you set up."
                .to_string(),
        ];
        match self.store.save(&record).await {
            Ok(outcome) => {
                tracing::info!(
                    target: "leadchat::convo",
                    session_id = %self.config.session_id,
                    backend = outcome.backend,
                    quality_score = record.quality_score,
                    "lead finalized"
                );
            }
            Err(e) => {
                tracing::error!(
                    target: "leadchat::convo",
                    session_id = %self.config.session_id,
                    error = %e,
                    "lead could not be persisted anywhere"
                );
                messages.push(format!(
                    "One more thing: our systems are having a moment, so to be safe please \
                     call us directly at {} to confirm.",
                    self.config.fallback_phone
                ));
            }
        }
        EngineReply { messages, quick_replies: Vec::new(), completed: true }
    }

    async fn ask_llm(&self, question: &str) -> Result<(String, Vec<QuickReply>), crate::error::LlmError> {
        let ctx = PromptContext {
            business_context: &self.config.business_context,
            knowledge_excerpt: &self.config.knowledge_excerpt,
            state_snapshot: self.state_snapshot(),
            history: &self.history,
            discussed_topics: self
                .script
                .topics()
                .iter()
                .filter(|t| t.completed)
                .map(|t| t.title.clone())
                .collect(),
            user_message: question,
        };
        let raw = self.llm.complete(&compose_prompt(&ctx)).await?;
        let (text, replies) = split_quick_replies(&raw);
        let answer = enforce_single_question(&text);
        let quick_replies = replies
            .into_iter()
            .map(|r| QuickReply { label: r.clone(), value: r })
            .collect();
        Ok((answer, quick_replies))
    }

    fn present_topic(&self, index: usize) -> Vec<String> {
        match self.script.get(index) {
            Some(topic) => vec![topic.static_info.clone(), topic.question.clone()],
            None => Vec::new(),
        }
    }

    fn push_assistant(&mut self, messages: &[String]) {
        for message in messages {
            self.history.push(ChatTurn::assistant(message.clone()));
        }
    }

    fn state_snapshot(&self) -> String {
        let mut parts = Vec::new();
        if let Some(location) = &self.fields.location {
            parts.push(format!("location={}", location));
        }
        if let Some(timing) = &self.fields.timing {
            parts.push(format!("timing={}", timing));
        }
        if let Some(service) = &self.fields.service_needed {
            parts.push(format!("service={}", service));
        }
        parts.push(format!(
            "contact_captured={}",
            if self.fields.contact.is_empty() { "no" } else { "yes" }
        ));
        parts.push(format!(
            "topic={}/{}",
            (self.current_topic + 1).min(self.script.len()),
            self.script.len()
        ));
        parts.join(", ")
    }

    fn build_record(&self, status: LeadStatus) -> LeadRecord {
        let completed_at = match status {
            LeadStatus::Complete => Some(Utc::now()),
            LeadStatus::InProgress => None,
        };
        let user_messages = self
            .history
            .iter()
            .filter(|t| t.role == Role::User)
            .count();
        let quality_score = lead::quality_score(
            self.script.completion_percentage(),
            user_messages,
            self.fields.specific_query.is_some(),
            Utc::now() - self.started_at,
        );
        LeadRecord {
            session_id: self.config.session_id.clone(),
            contact: self.fields.contact.clone(),
            location: self.fields.location.clone(),
            timing: self.fields.timing.clone(),
            service_needed: self.fields.service_needed.clone(),
            specific_query: self.fields.specific_query.clone(),
            brand_alignment: self.fields.brand_alignment,
            topic_responses: self.script.responses_by_topic(),
            conversation_history: self.history.clone(),
            started_at: self.started_at,
            completed_at,
            status,
            quality_score,
        }
    }
}

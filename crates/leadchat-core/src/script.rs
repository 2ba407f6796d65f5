//! The fixed five-topic interview script the widget walks a visitor through.
//!
//! Topics are processed in array order. The script is constructed once (with
//! optional per-topic overrides from the embed config) and is read-only at
//! runtime except for the `completed` flag and `collected_responses`, which
//! the conversation engine mutates in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::shared::TopicOverride;

/// The five fixed conversation stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopicId {
    Where,
    When,
    What,
    Why,
    Who,
}

impl TopicId {
    pub const COUNT: usize = 5;

    /// All topic ids in script order.
    pub fn all() -> [TopicId; Self::COUNT] {
        [
            TopicId::Where,
            TopicId::When,
            TopicId::What,
            TopicId::Why,
            TopicId::Who,
        ]
    }
}

/// Who produced a collected topic response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One message collected while a topic was active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResponse {
    pub content: String,
    pub speaker: Speaker,
    pub timestamp: DateTime<Utc>,
}

impl TopicResponse {
    pub fn now(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            speaker,
            timestamp: Utc::now(),
        }
    }
}

/// A single interview stage: static info shown first, then a follow-up question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub title: String,
    pub static_info: String,
    pub question: String,
    pub completed: bool,
    pub collected_responses: Vec<TopicResponse>,
}

impl Topic {
    fn new(id: TopicId, title: &str, static_info: &str, question: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            static_info: static_info.to_string(),
            question: question.to_string(),
            completed: false,
            collected_responses: Vec::new(),
        }
    }
}

/// The ordered script. No insertion, deletion, or reordering at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScript {
    topics: Vec<Topic>,
}

impl TopicScript {
    /// The standard five-topic script for the pool-care widget.
    pub fn standard() -> Self {
        Self {
            topics: vec![
                Topic::new(
                    TopicId::Where,
                    "Service area",
                    "We serve the East End year-round: Southampton, East Hampton, Sag Harbor, \
                     Bridgehampton, Water Mill, and Montauk.",
                    "Where is your pool located?",
                ),
                Topic::new(
                    TopicId::When,
                    "Scheduling",
                    "Weekly service runs April through October; openings and closings usually \
                     book out about two weeks ahead.",
                    "When would you like us to come out?",
                ),
                Topic::new(
                    TopicId::What,
                    "Services",
                    "We handle cleaning, equipment repair, seasonal openings and closings, and \
                     ongoing maintenance plans.",
                    "What does your pool need?",
                ),
                Topic::new(
                    TopicId::Why,
                    "Water care",
                    "Green or cloudy water usually means circulation or chemistry trouble; we \
                     test on-site and rebalance in the same visit.",
                    "What's going on with your water?",
                ),
                Topic::new(
                    TopicId::Who,
                    "Contact",
                    "A dedicated technician is assigned to every account, with a direct line \
                     for questions between visits.",
                    "What's the best phone number or email to reach you?",
                ),
            ],
        }
    }

    /// Standard script with embed-config overrides merged in.
    pub fn with_overrides(overrides: &[TopicOverride]) -> Self {
        let mut script = Self::standard();
        for over in overrides {
            if let Some(topic) = script.topics.iter_mut().find(|t| t.id == over.id) {
                if let Some(title) = &over.title {
                    topic.title = title.clone();
                }
                if let Some(info) = &over.info {
                    topic.static_info = info.clone();
                }
                if let Some(question) = &over.question {
                    topic.question = question.clone();
                }
            }
        }
        script
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Topic> {
        self.topics.get(index)
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Appends a response to the topic at `index`.
    pub(crate) fn record_response(&mut self, index: usize, response: TopicResponse) {
        if let Some(topic) = self.topics.get_mut(index) {
            topic.collected_responses.push(response);
        }
    }

    /// Sets the `completed` flag for the topic at `index`. The flag is set
    /// exactly once; returns whether this call performed the transition.
    pub(crate) fn mark_completed(&mut self, index: usize) -> bool {
        match self.topics.get_mut(index) {
            Some(topic) if !topic.completed => {
                topic.completed = true;
                true
            }
            _ => false,
        }
    }

    /// Percentage of topics completed, 0..=100.
    pub fn completion_percentage(&self) -> u32 {
        if self.topics.is_empty() {
            return 0;
        }
        let done = self.topics.iter().filter(|t| t.completed).count();
        (done * 100 / self.topics.len()) as u32
    }

    /// Per-topic response lists for the final lead record.
    pub fn responses_by_topic(&self) -> BTreeMap<TopicId, Vec<TopicResponse>> {
        self.topics
            .iter()
            .map(|t| (t.id, t.collected_responses.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_script_has_five_topics_in_order() {
        let script = TopicScript::standard();
        assert_eq!(script.len(), TopicId::COUNT);
        let ids: Vec<TopicId> = script.topics().iter().map(|t| t.id).collect();
        assert_eq!(ids, TopicId::all());
        assert!(script.topics().iter().all(|t| !t.completed));
    }

    #[test]
    fn mark_completed_transitions_exactly_once() {
        let mut script = TopicScript::standard();
        assert!(script.mark_completed(0));
        assert!(!script.mark_completed(0), "second call must be a no-op");
        assert!(script.get(0).unwrap().completed);
        assert!(!script.mark_completed(99));
    }

    #[test]
    fn completion_percentage_tracks_progress() {
        let mut script = TopicScript::standard();
        assert_eq!(script.completion_percentage(), 0);
        script.mark_completed(0);
        script.mark_completed(1);
        assert_eq!(script.completion_percentage(), 40);
        for i in 2..script.len() {
            script.mark_completed(i);
        }
        assert_eq!(script.completion_percentage(), 100);
    }

    #[test]
    fn overrides_replace_only_named_fields() {
        let overrides = vec![TopicOverride {
            id: TopicId::Where,
            title: None,
            info: None,
            question: Some("Which town is your pool in?".to_string()),
        }];
        let script = TopicScript::with_overrides(&overrides);
        let topic = script.get(0).unwrap();
        assert_eq!(topic.question, "Which town is your pool in?");
        assert_eq!(topic.title, "Service area");
    }

    #[test]
    fn topic_id_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TopicId::Where).unwrap(), "\"WHERE\"");
        let parsed: TopicId = serde_json::from_str("\"WHO\"").unwrap();
        assert_eq!(parsed, TopicId::Who);
    }
}

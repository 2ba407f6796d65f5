//! Lead record assembly and the advisory quality score.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::script::{TopicId, TopicResponse};

/// Contact details captured opportunistically during the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub preferred_channel: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none()
    }
}

/// All fields the extractor (and the engine, for `specific_query`) may set.
/// First successful match wins; fields are never overwritten within a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapturedFields {
    pub contact: ContactInfo,
    pub location: Option<String>,
    pub timing: Option<String>,
    pub service_needed: Option<String>,
    pub specific_query: Option<String>,
    pub brand_alignment: bool,
}

/// Role of a conversation-history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the full conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    InProgress,
    Complete,
}

/// The captured conversation outcome, keyed by `session_id` in every backend.
/// Created incrementally (`in_progress`) and finalized once when the script
/// is exhausted or the visitor declines further questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub session_id: String,
    pub contact: ContactInfo,
    pub location: Option<String>,
    pub timing: Option<String>,
    pub service_needed: Option<String>,
    pub specific_query: Option<String>,
    pub brand_alignment: bool,
    pub topic_responses: BTreeMap<TopicId, Vec<TopicResponse>>,
    pub conversation_history: Vec<ChatTurn>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: LeadStatus,
    /// Advisory score in [0, 100], used for dashboard sorting only.
    pub quality_score: u8,
}

impl LeadRecord {
    /// Serializes this record to JSON bytes for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Deserializes a record from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Weighted quality score:
/// 0.4 x topic completion percentage, plus an engagement bucket from the
/// message count, a bonus for a concrete question, and a duration bonus.
/// Always clamped to [0, 100].
pub fn quality_score(
    completion_pct: u32,
    user_message_count: usize,
    has_specific_query: bool,
    duration: Duration,
) -> u8 {
    let completion = f64::from(completion_pct.min(100)) * 0.4;
    let engagement = f64::from(engagement_bucket(user_message_count));
    let specific = if has_specific_query { 15.0 } else { 0.0 };
    let staying = f64::from(duration_bonus(duration));
    (completion + engagement + specific + staying).round().clamp(0.0, 100.0) as u8
}

fn engagement_bucket(user_message_count: usize) -> u32 {
    match user_message_count {
        0..=1 => 0,
        2..=4 => 10,
        5..=9 => 18,
        _ => 25,
    }
}

fn duration_bonus(duration: Duration) -> u32 {
    let secs = duration.num_seconds().max(0);
    if secs >= 300 {
        10
    } else if secs >= 120 {
        6
    } else if secs >= 30 {
        3
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_zero_for_an_empty_conversation() {
        assert_eq!(quality_score(0, 0, false, Duration::zero()), 0);
    }

    #[test]
    fn score_never_exceeds_one_hundred() {
        let max = quality_score(100, 500, true, Duration::hours(2));
        assert!(max <= 100, "got {}", max);
        // Overstated completion input is clamped before weighting.
        assert!(quality_score(400, 500, true, Duration::hours(2)) <= 100);
    }

    #[test]
    fn score_never_goes_negative_with_backwards_clock() {
        let score = quality_score(0, 0, false, Duration::seconds(-30));
        assert_eq!(score, 0);
    }

    #[test]
    fn completion_dominates_the_score() {
        let done = quality_score(100, 10, true, Duration::minutes(5));
        let fresh = quality_score(20, 10, true, Duration::minutes(5));
        assert!(done > fresh);
        assert_eq!(done, 90);
    }

    #[test]
    fn record_round_trips_through_bytes() {
        let record = LeadRecord {
            session_id: "s-1".into(),
            contact: ContactInfo { phone: Some("555-0100".into()), ..Default::default() },
            location: Some("Southampton".into()),
            timing: None,
            service_needed: None,
            specific_query: None,
            brand_alignment: false,
            topic_responses: BTreeMap::new(),
            conversation_history: vec![ChatTurn::user("hello")],
            started_at: Utc::now(),
            completed_at: None,
            status: LeadStatus::InProgress,
            quality_score: 12,
        };
        let back = LeadRecord::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(back.session_id, "s-1");
        assert_eq!(back.contact.phone.as_deref(), Some("555-0100"));
        assert_eq!(back.status, LeadStatus::InProgress);
    }
}

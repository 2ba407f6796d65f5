//! Opportunistic field extraction from free-text visitor messages.
//!
//! Pure heuristics: pattern matches for phone/email, keyword-set membership
//! for location, timing, service category, and brand alignment. Extraction
//! never fails; unmatched input leaves fields untouched, and the first
//! successful match for a field wins for the rest of the session.

use regex::Regex;
use std::sync::OnceLock;

use crate::lead::CapturedFields;

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\+?1[\s.\-]?)?(?:\(\d{3}\)|\d{3})?[\s.\-]?\d{3}[\s.\-]?\d{4}")
            .expect("phone pattern")
    })
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email pattern")
    })
}

/// Prompt-echo phrases: when the message repeats the widget's own contact
/// prompt, the digits inside it are not treated as the visitor's number.
const PHONE_GUARD_PHRASES: &[&str] = &[
    "phone number is",
    "call me at",
    "call us at",
    "best phone number",
];

const EMAIL_GUARD_PHRASES: &[&str] = &["email address is", "our email"];

/// Named service-area strings. Multi-word names first so they win over any
/// shorter overlap.
const SERVICE_AREAS: &[&str] = &[
    "east hampton",
    "hampton bays",
    "sag harbor",
    "water mill",
    "shelter island",
    "north haven",
    "southampton",
    "bridgehampton",
    "westhampton",
    "montauk",
    "amagansett",
    "noyac",
];

const TIMING_KEYWORDS: &[&str] = &[
    "as soon as possible",
    "next week",
    "this week",
    "this weekend",
    "next month",
    "this month",
    "right away",
    "tomorrow",
    "today",
    "asap",
    "urgent",
    "emergency",
    "soon",
];

/// Keyword fragment -> categorical service tag, checked in order.
const SERVICE_TAGS: &[(&str, &str)] = &[
    ("clean", "cleaning"),
    ("vacuum", "cleaning"),
    ("repair", "repair"),
    ("broken", "repair"),
    ("leak", "repair"),
    ("fix", "repair"),
    ("winteriz", "closing"),
    ("closing", "closing"),
    ("close", "closing"),
    ("opening", "opening"),
    ("open", "opening"),
    ("maintenance", "maintenance"),
    ("maintain", "maintenance"),
    ("weekly", "maintenance"),
    ("install", "installation"),
    ("algae", "water_treatment"),
    ("green", "water_treatment"),
    ("cloudy", "water_treatment"),
];

const BRAND_KEYWORDS: &[&str] = &["green", "environment", "sustainab", "chemical-free", "organic"];

/// Runs every extractor over the message, filling only unset fields.
pub fn scan_message(fields: &mut CapturedFields, message: &str) {
    let lower = message.to_lowercase();

    if fields.contact.phone.is_none() {
        if let Some(phone) = extract_phone(message, &lower) {
            tracing::debug!(target: "leadchat::extract", "captured phone from message");
            fields.contact.phone = Some(phone);
            fields
                .contact
                .preferred_channel
                .get_or_insert_with(|| "phone".to_string());
        }
    }

    if fields.contact.email.is_none() {
        if let Some(email) = extract_email(message, &lower) {
            tracing::debug!(target: "leadchat::extract", "captured email from message");
            fields.contact.email = Some(email);
            fields
                .contact
                .preferred_channel
                .get_or_insert_with(|| "email".to_string());
        }
    }

    if fields.location.is_none() {
        fields.location = extract_location(message, &lower);
    }

    if fields.timing.is_none() {
        fields.timing = TIMING_KEYWORDS
            .iter()
            .find(|kw| lower.contains(*kw))
            .map(|kw| kw.to_string());
    }

    if fields.service_needed.is_none() {
        fields.service_needed = SERVICE_TAGS
            .iter()
            .find(|(kw, _)| lower.contains(kw))
            .map(|(_, tag)| tag.to_string());
    }

    if !fields.brand_alignment {
        let eco_token = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|tok| tok == "eco");
        fields.brand_alignment = eco_token || BRAND_KEYWORDS.iter().any(|kw| lower.contains(kw));
    }
}

fn extract_phone(message: &str, lower: &str) -> Option<String> {
    if PHONE_GUARD_PHRASES.iter().any(|p| lower.contains(p)) {
        return None;
    }
    let candidate = phone_re().find(message)?.as_str().trim();
    let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();
    let valid = match digits.len() {
        7 | 10 => true,
        11 => digits.starts_with('1'),
        _ => false,
    };
    valid.then(|| candidate.to_string())
}

fn extract_email(message: &str, lower: &str) -> Option<String> {
    if EMAIL_GUARD_PHRASES.iter().any(|p| lower.contains(p)) {
        return None;
    }
    let candidate = email_re().find(message)?.as_str().to_string();
    // Re-test the captured candidate before accepting it.
    email_re().is_match(&candidate).then_some(candidate)
}

fn extract_location(message: &str, lower: &str) -> Option<String> {
    for area in SERVICE_AREAS {
        if let Some(start) = lower.find(area) {
            let end = start + area.len();
            if message.is_char_boundary(start) && message.is_char_boundary(end) {
                // Preserve the visitor's own casing of the area name.
                return Some(message[start..end].to_string());
            }
            return Some((*area).to_string());
        }
    }
    None
}

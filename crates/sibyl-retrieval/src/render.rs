//! Rendering structured records into embeddable text.
//!
//! Each record category has a pure formatter; unknown categories fall back
//! to the plain note layout. Rendered text is what gets hashed, split,
//! embedded, and stored as the parent's `full_text`.

use std::fmt::Write;

use sibyl_memory::DocumentId;

/// One record submitted for indexing.
#[derive(Debug, Clone)]
pub struct IndexInput {
    /// Caller-supplied id for re-indexing; `None` mints a fresh one.
    pub id: Option<DocumentId>,
    pub collection: String,
    pub title: String,
    pub category: Option<String>,
    pub author: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    pub metadata: serde_json::Value,
    pub body: String,
}

/// Record categories with dedicated formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Article,
    Conversation,
    Profile,
    Event,
    /// Default for unknown or absent categories.
    Note,
}

impl RecordKind {
    #[must_use]
    pub fn from_category(category: Option<&str>) -> Self {
        match category {
            Some("article") => Self::Article,
            Some("conversation") => Self::Conversation,
            Some("profile") => Self::Profile,
            Some("event") => Self::Event,
            _ => Self::Note,
        }
    }
}

/// Render a record to embeddable text. Pure and deterministic, so the
/// content hash of the output decides whether re-indexing is a no-op.
#[must_use]
pub fn render_record(input: &IndexInput) -> String {
    match RecordKind::from_category(input.category.as_deref()) {
        RecordKind::Article => render_article(input),
        RecordKind::Conversation => render_conversation(input),
        RecordKind::Profile => render_profile(input),
        RecordKind::Event => render_event(input),
        RecordKind::Note => render_note(input),
    }
}

fn render_article(input: &IndexInput) -> String {
    let mut text = input.title.clone();
    if let Some(ref author) = input.author {
        let _ = write!(text, " (by {author})");
    }
    text.push_str(". ");
    text.push_str(&input.body);
    text
}

fn render_conversation(input: &IndexInput) -> String {
    let speaker = input.author.as_deref().unwrap_or("someone");
    format!("{}. {speaker} said: {}", input.title, input.body)
}

fn render_profile(input: &IndexInput) -> String {
    let mut text = format!("Profile of {}. ", input.title);
    if let Some(fields) = input.metadata.as_object() {
        for (key, value) in fields {
            if let Some(s) = value.as_str() {
                let _ = write!(text, "{key}: {s}. ");
            }
        }
    }
    text.push_str(&input.body);
    text
}

fn render_event(input: &IndexInput) -> String {
    let mut text = format!("Event: {}. ", input.title);
    if let Some(location) = input.metadata.get("location").and_then(|v| v.as_str()) {
        let _ = write!(text, "Location: {location}. ");
    }
    text.push_str(&input.body);
    text
}

fn render_note(input: &IndexInput) -> String {
    format!("{}. {}", input.title, input.body)
}

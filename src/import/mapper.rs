//! Positional CSV decoding and defensive record coercion
//!
//! The column table pins each recognized position of the Umami v2 CSV
//! export to a wire field name; positions with no destination are
//! discarded. `canonicalize` turns any loosely-typed wire record into a
//! [`CanonicalEvent`] with every field present as a string.

use csv::StringRecord;
use serde_json::Value;

use crate::models::event::{CanonicalEvent, RawEvent};

/// Position-to-field table for the Umami v2 CSV export layout.
///
/// Unlisted positions (website id, visit/event ids, referrer path and
/// query, tag, distinct id, job id) have no destination here.
pub const UMAMI_COLUMNS: &[(usize, &str)] = &[
    (1, "session_id"),
    (4, "hostname"),
    (5, "browser"),
    (6, "os"),
    (7, "device"),
    (8, "screen"),
    (9, "language"),
    (10, "country"),
    (11, "subdivision1"),
    (12, "city"),
    (13, "url_path"),
    (14, "url_query"),
    (15, "utm_source"),
    (16, "utm_medium"),
    (17, "utm_campaign"),
    (18, "utm_content"),
    (19, "utm_term"),
    (22, "referrer_domain"),
    (23, "page_title"),
    (24, "event_type"),
    (25, "event_name"),
    (28, "created_at"),
];

/// Decode one CSV row into the wire shape, keeping only positions that
/// have a destination field.
pub fn map_umami_row(record: &StringRecord) -> RawEvent {
    let mut event = RawEvent::new();
    for (position, field) in UMAMI_COLUMNS {
        let value = record.get(*position).unwrap_or("").trim();
        event.insert((*field).to_string(), Value::String(value.to_string()));
    }
    event
}

/// Coerce one wire field to a string. Missing fields and fields with no
/// string rendering become the empty string.
pub fn field_str(event: &RawEvent, key: &str) -> String {
    match event.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Map a Umami-shaped wire record to the canonical field set.
///
/// Purely defensive coercion: every canonical field is populated, empty
/// string when the source has nothing for it. Validity of `created_at`
/// is the caller's concern.
pub fn canonicalize_umami(event: &RawEvent) -> CanonicalEvent {
    CanonicalEvent {
        created_at: field_str(event, "created_at"),
        session_id: field_str(event, "session_id"),
        hostname: field_str(event, "hostname"),
        pathname: field_str(event, "url_path"),
        query: field_str(event, "url_query"),
        page_title: field_str(event, "page_title"),
        referrer: field_str(event, "referrer_domain"),
        browser: field_str(event, "browser"),
        operating_system: field_str(event, "os"),
        device_type: field_str(event, "device"),
        screen_resolution: field_str(event, "screen"),
        language: field_str(event, "language"),
        country: field_str(event, "country"),
        region: field_str(event, "subdivision1"),
        city: field_str(event, "city"),
        utm_source: field_str(event, "utm_source"),
        utm_medium: field_str(event, "utm_medium"),
        utm_campaign: field_str(event, "utm_campaign"),
        utm_content: field_str(event, "utm_content"),
        utm_term: field_str(event, "utm_term"),
        event_type: field_str(event, "event_type"),
        event_name: field_str(event, "event_name"),
    }
}

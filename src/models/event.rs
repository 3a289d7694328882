//! Event shapes used across the import pipeline
//!
//! A `RawEvent` is the loosely-typed wire shape a client uploads; the
//! server never trusts its layout. A `CanonicalEvent` is the normalized
//! all-string record produced by a platform mapper, and a `StoredEvent`
//! is the row that reaches the event store.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Loosely-typed external record as it travels client -> server.
///
/// Field names follow the source platform's own vocabulary; platform
/// detection sniffs this shape on the first batch of a session.
pub type RawEvent = serde_json::Map<String, serde_json::Value>;

/// Normalized event record with a fixed field set.
///
/// Every field is a string and defaults to empty when the source record
/// lacks it. A record whose `created_at` is empty after mapping is
/// invalid and never reaches storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalEvent {
    /// Creation timestamp, `yyyy-MM-dd HH:mm:ss` in UTC
    pub created_at: String,
    pub session_id: String,
    pub hostname: String,
    pub pathname: String,
    pub query: String,
    pub page_title: String,
    pub referrer: String,
    pub browser: String,
    pub operating_system: String,
    pub device_type: String,
    pub screen_resolution: String,
    pub language: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
    pub event_type: String,
    pub event_name: String,
}

/// Row shape for the event store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredEvent {
    pub site_id: i64,
    /// Unix seconds parsed from the canonical `created_at`
    pub timestamp: i64,
    pub session_id: String,
    pub hostname: String,
    pub pathname: String,
    pub query: String,
    pub page_title: String,
    pub referrer: String,
    pub browser: String,
    pub operating_system: String,
    pub device_type: String,
    pub screen_resolution: String,
    pub language: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_content: String,
    pub utm_term: String,
    pub event_type: String,
    pub event_name: String,
}

impl StoredEvent {
    /// Build a storage row from an admitted canonical event.
    pub fn from_canonical(site_id: i64, timestamp: i64, event: CanonicalEvent) -> Self {
        Self {
            site_id,
            timestamp,
            session_id: event.session_id,
            hostname: event.hostname,
            pathname: event.pathname,
            query: event.query,
            page_title: event.page_title,
            referrer: event.referrer,
            browser: event.browser,
            operating_system: event.operating_system,
            device_type: event.device_type,
            screen_resolution: event.screen_resolution,
            language: event.language,
            country: event.country,
            region: event.region,
            city: event.city,
            utm_source: event.utm_source,
            utm_medium: event.utm_medium,
            utm_campaign: event.utm_campaign,
            utm_content: event.utm_content,
            utm_term: event.utm_term,
            event_type: event.event_type,
            event_name: event.event_name,
        }
    }
}

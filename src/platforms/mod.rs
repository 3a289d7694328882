//! Source-platform importers
//!
//! Each supported source system is a [`PlatformImporter`] variant. The
//! variant for a session is selected by schema-matching the first event
//! of the session's first batch; adding a platform means adding a
//! variant here, not touching the dispatch.

pub mod umami;

use crate::models::event::{CanonicalEvent, RawEvent};

pub trait PlatformImporter: Send + Sync {
    /// Tag persisted on the import session (e.g. "umami").
    fn name(&self) -> &'static str;

    /// Whether a wire record looks like this platform's export shape.
    fn matches(&self, event: &RawEvent) -> bool;

    /// Normalize one wire record. Returns `None` when the record lacks
    /// a creation timestamp and must be dropped.
    fn transform(&self, event: &RawEvent) -> Option<CanonicalEvent>;
}

static IMPORTERS: &[&dyn PlatformImporter] = &[&umami::UmamiImporter];

/// Sniff the platform from the first event of a session's first batch.
pub fn detect_platform(event: &RawEvent) -> Option<&'static dyn PlatformImporter> {
    IMPORTERS.iter().copied().find(|imp| imp.matches(event))
}

/// Resolve the importer persisted on an existing session.
pub fn importer_for(name: &str) -> Option<&'static dyn PlatformImporter> {
    IMPORTERS.iter().copied().find(|imp| imp.name() == name)
}

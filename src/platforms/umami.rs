//! Umami v2 export importer

use crate::import::mapper;
use crate::models::event::{CanonicalEvent, RawEvent};
use crate::platforms::PlatformImporter;

/// Keys that identify a record as Umami-shaped. `url_path` in
/// particular does not appear in other known export formats.
const SIGNATURE_KEYS: &[&str] = &["session_id", "url_path", "created_at"];

pub struct UmamiImporter;

impl PlatformImporter for UmamiImporter {
    fn name(&self) -> &'static str {
        "umami"
    }

    fn matches(&self, event: &RawEvent) -> bool {
        SIGNATURE_KEYS.iter().all(|key| event.contains_key(*key))
    }

    fn transform(&self, event: &RawEvent) -> Option<CanonicalEvent> {
        let canonical = mapper::canonicalize_umami(event);
        if canonical.created_at.is_empty() {
            return None;
        }
        Some(canonical)
    }
}

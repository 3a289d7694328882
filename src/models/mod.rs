pub mod event;
pub mod import;

pub use event::{CanonicalEvent, RawEvent, StoredEvent};
pub use import::{ImportSession, ImportStatus, Site};

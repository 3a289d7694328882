//! Client-side import pipeline
//!
//! A CSV file is streamed through the parser, which maps each row to
//! the wire shape, filters it against the server-granted date window,
//! and hands off fixed-size batches. The upload coordinator then posts
//! batches strictly one at a time and aggregates progress.

pub mod date_filter;
pub mod mapper;
pub mod parser;
pub mod progress;
pub mod uploader;

pub use date_filter::DateWindow;
pub use parser::{CsvParser, ParseStats, ParsedBatch, BATCH_SIZE};
pub use progress::{ImportPhase, ImportProgress, ProgressCallback};
pub use uploader::{BatchTransport, HttpTransport, ImportOutcome, UploadCoordinator};

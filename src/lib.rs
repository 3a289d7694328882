pub mod api;
pub mod config;
pub mod import;
pub mod models;
pub mod platforms;
pub mod quota;
pub mod storage;

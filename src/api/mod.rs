pub mod handlers;
pub mod import;
pub mod routes;

pub use routes::create_api_router;

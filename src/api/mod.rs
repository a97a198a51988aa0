//! API module - HTTP routes and handlers for the calling integration

pub mod handlers;
pub mod routes;

pub use routes::create_router;

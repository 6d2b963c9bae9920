pub mod admin;
pub mod buckets;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metadata;
pub mod middleware;
pub mod routes;
pub mod search;

pub use routes::create_router;

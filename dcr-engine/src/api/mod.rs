//! HTTP API handlers for dcr-engine

pub mod batches;
pub mod catalog;
pub mod health;
pub mod knowledge;
pub mod review;

pub use batches::batch_routes;
pub use catalog::catalog_routes;
pub use health::health_routes;
pub use knowledge::knowledge_routes;
pub use review::review_routes;

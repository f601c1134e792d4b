//! HTTP API handlers for calyx-id
//!
//! Thin adapters: parse the request, call one service operation, map the
//! outcome through [`crate::error::ApiError`].

pub mod catalogue;
pub mod feedback;
pub mod health;
pub mod identify;
pub mod species;

pub use catalogue::catalogue_routes;
pub use feedback::feedback_routes;
pub use health::health_routes;
pub use identify::identify_routes;
pub use species::species_routes;

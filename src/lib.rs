// Library exports for Social Hub
// This allows integration tests and the binary to share the application modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod media;
pub mod routes;
pub mod state;
pub mod validation;

//! Shared building blocks for the Trellis gateway: service errors,
//! RFC 7807 problem responses, and the plugin system the server is
//! assembled from.

pub mod error;
pub mod error_builder;
pub mod plugin;
pub mod problemdetails;

pub use error::{ServiceError, ServiceResult};
pub use error_builder::ErrorBuilder;

/// Timestamp type used by persisted models.
pub type DbDateTime = chrono::DateTime<chrono::Utc>;

//! Backend descriptor management for the Trellis gateway: persistence,
//! validation, connection verification, and the `/configs` HTTP surface.

pub mod handler;
pub mod plugin;
pub mod service;
pub mod store;

pub use handler::{configure_routes, ConfigsApiDoc, ConfigsState};
pub use plugin::ConfigsPlugin;
pub use service::{ConfigService, ConfigServiceError, DatabaseConfigPayload};
pub use store::SeaOrmDescriptorStore;

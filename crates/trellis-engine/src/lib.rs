//! The Trellis execution pipeline: context registry, schema cache, request
//! orchestration and the `/query` HTTP surface.

pub mod engine;
pub mod handler;
pub mod plugin;
pub mod registry;

pub use engine::FetchEngine;
pub use handler::{configure_routes, QueryApiDoc, QueryState};
pub use plugin::EnginePlugin;
pub use registry::{connect_context, verify_descriptor, ContextRegistry};

//! Persisted models for the Trellis metadata database.

pub mod database_configs;

pub mod prelude {
    pub use super::database_configs::Entity as DatabaseConfigs;
}

//! Database migrations for the Trellis metadata store

pub use sea_orm_migration::prelude::*;

mod migration;

pub use migration::Migrator;

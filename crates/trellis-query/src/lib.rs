//! # trellis-query
//!
//! Core abstractions for the Trellis query gateway.
//!
//! This crate turns one JSON request shape into parameterized SQL and back:
//!
//! - **types**: the request model (`QueryRequest`, `Search`, `JoinRequest`),
//!   backend descriptors, canonical SQL types and typed bind values
//! - **coerce**: raw JSON scalars/arrays → typed SQL values under an explicit
//!   cast or an inferred column type
//! - **filter**: one filter descriptor → a SQL condition fragment; a filter
//!   list → a left-associatively combined WHERE tree
//! - **statement**: SELECT / SELECT COUNT / DELETE assembly with aliased base
//!   table, joins, ordering and pagination
//! - **shape**: result row → JSON object with stable key disambiguation
//! - **traits**: the `QueryContext` every backend implements and the
//!   `DescriptorStore` the gateway reads stored descriptors from
//!
//! Backend crates (`trellis-query-postgres`, `trellis-query-mysql`) implement
//! `QueryContext`; the engine crate orchestrates the pieces per request.

pub mod coerce;
pub mod error;
pub mod filter;
pub mod shape;
pub mod statement;
pub mod traits;
pub mod types;

pub use error::{QueryError, Result};
pub use filter::{build_condition, FilterScope, SqlFragment};
pub use shape::shape_row;
pub use statement::{assemble_count, assemble_delete, assemble_select, SelectColumn, Statement};
pub use traits::{DescriptorStore, JsonRow, QueryContext, RowStream};
pub use types::{
    ColumnInfo, DatabaseDescriptor, DirectDatabaseConfig, FilterOperator, JoinRequest, JoinType,
    LogicalOperator, OrderDirection, QueryRequest, Search, SqlDialect, SqlType, SqlValue,
    TableSchema,
};

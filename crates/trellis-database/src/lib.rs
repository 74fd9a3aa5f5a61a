//! Connection bootstrap for the Trellis metadata database.

mod connection;
pub mod test_utils;

pub use connection::{establish_connection, DbConnection};

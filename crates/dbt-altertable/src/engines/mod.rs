//! Engine implementations.
//!
//! - `flight` - Arrow Flight SQL client for Altertable
//! - `duckdb` - Embedded DuckDB database with the same dialect

mod duckdb;
mod flight;

pub use self::duckdb::{DuckdbConnector, DuckdbSession};
pub use self::flight::{FlightSqlConnector, FlightSqlSession};

//! dbt-altertable
//!
//! dbt adapter for Altertable, an analytics database reached over
//! Arrow Flight SQL and speaking the DuckDB SQL dialect.
//!
//! This crate provides:
//! - Credentials and profiles.yml loading with Jinja `env_var` rendering
//! - Connection management with retries and plain-SQL transactions
//! - Engines: Arrow Flight SQL client and an embedded DuckDB database
//! - Catalog operations (schemas, relations, columns) over `information_schema`

pub mod adapter;
pub mod connection;
pub mod credentials;
pub mod engines;
pub mod error;
pub mod profile;
pub mod relation;
pub mod response;
pub mod session;
pub mod table;
pub mod template;

pub use adapter::AltertableAdapter;
pub use connection::{Connection, ConnectionManager, ConnectionState, RetryPolicy};
pub use credentials::{AltertableCredentials, ADAPTER_TYPE};
pub use engines::{DuckdbConnector, FlightSqlConnector};
pub use error::AdapterError;
pub use profile::{ProfileLoader, TargetConfig};
pub use relation::{Column, QuotePolicy, Relation, RelationType};
pub use response::AdapterResponse;
pub use session::{Connector, Session};
pub use table::Table;
pub use template::ProfileRenderer;

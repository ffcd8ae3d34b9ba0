//! Engine sessions and connectors.
//!
//! A [`Connector`] opens [`Session`]s for a set of credentials. The connection
//! manager only talks to these traits, so the Flight SQL client and the
//! embedded DuckDB engine are interchangeable.

use async_trait::async_trait;

use crate::credentials::AltertableCredentials;
use crate::error::AdapterError;
use crate::table::Table;

/// An open engine session.
#[async_trait]
pub trait Session: Send {
    /// Engine name, for logging.
    fn engine(&self) -> &'static str;

    /// Run a statement and fetch its result rows.
    async fn query(&mut self, sql: &str) -> Result<Table, AdapterError>;

    /// Run a statement without fetching rows.
    ///
    /// Returns the affected row count when the engine reports one.
    async fn execute(&mut self, sql: &str) -> Result<Option<i64>, AdapterError>;

    /// Release engine resources.
    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector name, for logging.
    fn name(&self) -> &'static str;

    /// Open a new session.
    async fn connect(
        &self,
        credentials: &AltertableCredentials,
    ) -> Result<Box<dyn Session>, AdapterError>;
}

//! Arrow Flight SQL engine.
//!
//! Connects to Altertable's Flight SQL endpoint, authenticates with the basic
//! auth handshake and runs statements. No transaction id is ever attached to
//! a request, so every statement autocommits and dbt drives transactions with
//! plain SQL.

use arrow_array::RecordBatch;
use arrow_flight::sql::client::FlightSqlServiceClient;
use arrow_flight::{FlightInfo, Ticket};
use arrow_schema::{ArrowError, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::credentials::AltertableCredentials;
use crate::error::AdapterError;
use crate::session::{Connector, Session};
use crate::table::Table;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Opens Flight SQL sessions.
#[derive(Debug, Clone)]
pub struct FlightSqlConnector {
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl FlightSqlConnector {
    /// Create a connector with default timeouts.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set a per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the channel endpoint for the credentials.
    fn endpoint(&self, credentials: &AltertableCredentials) -> Result<Endpoint, AdapterError> {
        let uri = credentials.channel_uri();
        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| AdapterError::Configuration(format!("Invalid Flight SQL URI '{}': {}", uri, e)))?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(Some(DEFAULT_KEEPALIVE));

        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }

        if credentials.tls {
            let tls = ClientTlsConfig::new()
                .with_native_roots()
                .domain_name(credentials.host.clone());
            endpoint = endpoint.tls_config(tls)?;
        }

        Ok(endpoint)
    }
}

impl Default for FlightSqlConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for FlightSqlConnector {
    fn name(&self) -> &'static str {
        "flight_sql"
    }

    async fn connect(
        &self,
        credentials: &AltertableCredentials,
    ) -> Result<Box<dyn Session>, AdapterError> {
        let endpoint = self.endpoint(credentials)?;

        tracing::debug!(uri = %credentials.flight_uri(), "Connecting to Flight SQL endpoint");

        let channel = endpoint.connect().await?;
        let mut client = FlightSqlServiceClient::new(channel);

        // Handshake stores the returned bearer token on the client
        client
            .handshake(&credentials.username, &credentials.password)
            .await
            .map_err(handshake_error)?;

        Ok(Box::new(FlightSqlSession { client }))
    }
}

/// A Flight SQL session.
pub struct FlightSqlSession {
    client: FlightSqlServiceClient<Channel>,
}

#[async_trait]
impl Session for FlightSqlSession {
    fn engine(&self) -> &'static str {
        "flight_sql"
    }

    async fn query(&mut self, sql: &str) -> Result<Table, AdapterError> {
        let info = self
            .client
            .execute(sql.to_string(), None)
            .await
            .map_err(|e| AdapterError::Database(format!("Query failed: {}", e)))?;

        // Some servers leave the FlightInfo schema empty
        let info_schema = info.clone().try_decode_schema().ok();

        let mut batches = Vec::new();
        for ticket in endpoint_tickets(&info) {
            let stream = self
                .client
                .do_get(ticket)
                .await
                .map_err(|e| AdapterError::Database(format!("Failed to fetch results: {}", e)))?;

            let mut fetched: Vec<_> = stream
                .try_collect()
                .await
                .map_err(|e| AdapterError::Database(format!("Failed to read results: {}", e)))?;
            batches.append(&mut fetched);
        }

        let schema = result_schema(&batches, info_schema);
        Table::from_record_batches(&schema, &batches)
    }

    async fn execute(&mut self, sql: &str) -> Result<Option<i64>, AdapterError> {
        let affected = self
            .client
            .execute_update(sql.to_string(), None)
            .await
            .map_err(|e| AdapterError::Database(format!("Execute failed: {}", e)))?;

        Ok(affected_rows(affected))
    }
}

fn handshake_error(e: ArrowError) -> AdapterError {
    AdapterError::Auth(format!("Flight SQL handshake failed: {}", e))
}

/// Tickets of every endpoint that carries one, in endpoint order.
fn endpoint_tickets(info: &FlightInfo) -> Vec<Ticket> {
    info.endpoint
        .iter()
        .filter_map(|endpoint| endpoint.ticket.clone())
        .collect()
}

/// Schema of a result: the batches' own, else the one the FlightInfo announced.
fn result_schema(batches: &[RecordBatch], info_schema: Option<Schema>) -> Schema {
    match (batches.first(), info_schema) {
        (Some(batch), _) => batch.schema().as_ref().clone(),
        (None, Some(schema)) => schema,
        (None, None) => Schema::empty(),
    }
}

/// Flight SQL uses -1 for an unknown count.
fn affected_rows(count: i64) -> Option<i64> {
    (count >= 0).then_some(count)
}

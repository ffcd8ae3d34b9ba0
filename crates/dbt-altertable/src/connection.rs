//! Connection management.
//!
//! Connections are keyed by name (dbt uses one per worker thread) and opened
//! lazily through a [`Connector`]. Opening retries on any error; statements
//! run with autocommit and transactions are plain `BEGIN`/`COMMIT` SQL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::credentials::{AltertableCredentials, ADAPTER_TYPE};
use crate::error::AdapterError;
use crate::response::AdapterResponse;
use crate::session::{Connector, Session};
use crate::table::Table;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created but never opened.
    Init,
    /// Open with a live session.
    Open,
    /// Closed after use.
    Closed,
    /// Opening failed.
    Fail,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Init => write!(f, "init"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Fail => write!(f, "fail"),
        }
    }
}

/// A named connection and its engine session.
pub struct Connection {
    pub name: String,
    pub state: ConnectionState,
    pub credentials: AltertableCredentials,
    pub transaction_open: bool,
    session: Option<Box<dyn Session>>,
}

impl Connection {
    /// Create a connection in the `Init` state.
    pub fn new(name: impl Into<String>, credentials: AltertableCredentials) -> Self {
        Self {
            name: name.into(),
            state: ConnectionState::Init,
            credentials,
            transaction_open: false,
            session: None,
        }
    }

    /// Returns true if the connection has a live session.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.session.is_some()
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn Session>, AdapterError> {
        let name = self.name.clone();
        self.session
            .as_mut()
            .ok_or_else(|| AdapterError::Runtime(format!("Connection '{}' is not open", name)))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("transaction_open", &self.transaction_open)
            .field("engine", &self.session.as_ref().map(|s| s.engine()))
            .finish()
    }
}

/// Retry behavior when opening connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first failure.
    pub retry_limit: u32,
}

impl RetryPolicy {
    pub fn new(retry_limit: u32) -> Self {
        Self { retry_limit }
    }

    /// Delay before retry `attempt` (0-based): `attempt²` seconds.
    pub fn timeout(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt).pow(2))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retry_limit: 1 }
    }
}

/// Shared handle to a named connection.
pub type ConnectionHandle = Arc<Mutex<Connection>>;

/// Opens, tracks and closes named connections.
pub struct ConnectionManager {
    credentials: AltertableCredentials,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionManager {
    /// Adapter type managed by this connection manager.
    pub const TYPE: &'static str = ADAPTER_TYPE;

    /// Create a manager for the given credentials and connector.
    pub fn new(credentials: AltertableCredentials, connector: Arc<dyn Connector>) -> Self {
        Self {
            credentials,
            connector,
            retry: RetryPolicy::default(),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn credentials(&self) -> &AltertableCredentials {
        &self.credentials
    }

    /// Name of the underlying connector.
    pub fn connector_name(&self) -> &'static str {
        self.connector.name()
    }

    /// Open a connection, retrying on failure.
    ///
    /// An already open connection is returned untouched.
    pub async fn open(&self, connection: &mut Connection) -> Result<(), AdapterError> {
        if connection.is_open() {
            tracing::debug!(connection = %connection.name, "Connection is already open, skipping open");
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            match self.connector.connect(&connection.credentials).await {
                Ok(session) => {
                    tracing::debug!(
                        connection = %connection.name,
                        engine = session.engine(),
                        attempt,
                        "Opened connection"
                    );
                    connection.session = Some(session);
                    connection.state = ConnectionState::Open;
                    connection.transaction_open = false;
                    return Ok(());
                }
                Err(e) if attempt < self.retry.retry_limit => {
                    let timeout = self.retry.timeout(attempt);
                    tracing::debug!(
                        connection = %connection.name,
                        attempts_remaining = self.retry.retry_limit - attempt,
                        retry_in_secs = timeout.as_secs(),
                        error = %e,
                        "Got a retryable error when attempting to open a {} connection",
                        ADAPTER_TYPE
                    );
                    tokio::time::sleep(timeout).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(connection = %connection.name, error = %e, "Giving up on opening connection");
                    connection.session = None;
                    connection.state = ConnectionState::Fail;
                    return Err(match e {
                        AdapterError::FailedToConnect(msg) => AdapterError::FailedToConnect(msg),
                        other => AdapterError::FailedToConnect(other.to_string()),
                    });
                }
            }
        }
    }

    /// Wrap a statement failure as a runtime error, logging the SQL.
    pub fn exception_handler<T>(
        &self,
        sql: &str,
        result: Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        result.map_err(|e| {
            tracing::error!("Error executing SQL: {}", sql);
            match e {
                AdapterError::Runtime(msg) => AdapterError::Runtime(msg),
                other => AdapterError::Runtime(other.to_string()),
            }
        })
    }

    /// Request cancellation of a running query.
    ///
    /// Flight SQL cancellation is not wired up; this only logs.
    pub fn cancel(&self, connection: &Connection) {
        tracing::debug!("Attempting to cancel connection: {}", connection.name);
    }

    /// Build the response reported for a statement.
    pub fn get_response(rows_affected: Option<i64>) -> AdapterResponse {
        AdapterResponse::ok().with_rows_affected(rows_affected)
    }

    /// Get a connection by name if it exists.
    pub async fn get_if_exists(&self, name: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(name).cloned()
    }

    /// Get or create a named connection and make sure it is open.
    pub async fn connection_named(&self, name: &str) -> Result<ConnectionHandle, AdapterError> {
        let existing = self.get_if_exists(name).await;

        let handle = match existing {
            Some(handle) => handle,
            None => {
                let mut connections = self.connections.write().await;
                connections
                    .entry(name.to_string())
                    .or_insert_with(|| {
                        tracing::debug!(connection = %name, "Acquiring new {} connection", ADAPTER_TYPE);
                        Arc::new(Mutex::new(Connection::new(name, self.credentials.clone())))
                    })
                    .clone()
            }
        };

        {
            let mut conn = handle.lock().await;
            self.open(&mut conn).await?;
        }

        Ok(handle)
    }

    /// Names and states of all tracked connections.
    pub async fn list_connections(&self) -> Vec<(String, ConnectionState)> {
        let handles: Vec<(String, ConnectionHandle)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut result = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            result.push((name, handle.lock().await.state));
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Send a statement on a named connection, opening it if needed.
    pub async fn add_query(
        &self,
        name: &str,
        sql: &str,
        fetch: bool,
    ) -> Result<(AdapterResponse, Table), AdapterError> {
        let handle = self.connection_named(name).await?;
        let mut conn = handle.lock().await;
        self.run_on(&mut conn, sql, fetch).await
    }

    /// Run a statement on a named connection.
    ///
    /// With `fetch` the result rows are returned; otherwise the statement is
    /// executed and the table is empty.
    pub async fn execute(
        &self,
        name: &str,
        sql: &str,
        fetch: bool,
    ) -> Result<(AdapterResponse, Table), AdapterError> {
        let (response, table) = self.add_query(name, sql, fetch).await?;
        Ok((response, if fetch { table } else { Table::empty() }))
    }

    async fn run_on(
        &self,
        conn: &mut Connection,
        sql: &str,
        fetch: bool,
    ) -> Result<(AdapterResponse, Table), AdapterError> {
        tracing::debug!(connection = %conn.name, "Using {} connection", ADAPTER_TYPE);
        tracing::debug!(connection = %conn.name, "On {}: {}", conn.name, sql);

        let start = Instant::now();

        let result = match conn.session_mut() {
            Ok(session) if fetch => session.query(sql).await.map(|t| (None, t)),
            Ok(session) => session.execute(sql).await.map(|rows| (rows, Table::empty())),
            Err(e) => Err(e),
        };
        let (rows_affected, table) = self.exception_handler(sql, result)?;

        let elapsed = start.elapsed();
        tracing::debug!(
            connection = %conn.name,
            elapsed_ms = elapsed.as_millis() as u64,
            "SQL status: OK in {:.3} seconds",
            elapsed.as_secs_f64()
        );

        let response = Self::get_response(rows_affected).with_elapsed(elapsed.as_millis() as u64);
        Ok((response, table))
    }

    /// Start a transaction on a named connection.
    pub async fn begin(&self, name: &str) -> Result<(), AdapterError> {
        let handle = self.connection_named(name).await?;
        let mut conn = handle.lock().await;
        if conn.transaction_open {
            return Err(AdapterError::Transaction(format!(
                "Tried to begin a new transaction on connection \"{}\", but it already had one open!",
                conn.name
            )));
        }
        self.run_on(&mut conn, "BEGIN", false).await?;
        conn.transaction_open = true;
        Ok(())
    }

    /// Commit the open transaction on a named connection.
    pub async fn commit(&self, name: &str) -> Result<(), AdapterError> {
        self.finish_transaction(name, "COMMIT").await
    }

    /// Roll back the open transaction on a named connection.
    pub async fn rollback(&self, name: &str) -> Result<(), AdapterError> {
        self.finish_transaction(name, "ROLLBACK").await
    }

    async fn finish_transaction(&self, name: &str, statement: &str) -> Result<(), AdapterError> {
        let handle = self.get_if_exists(name).await.ok_or_else(|| {
            AdapterError::Transaction(format!("Connection \"{}\" does not exist", name))
        })?;
        let mut conn = handle.lock().await;
        if !conn.transaction_open {
            return Err(AdapterError::Transaction(format!(
                "Tried to {} transaction on connection \"{}\", but it does not have one open!",
                statement.to_lowercase(),
                conn.name
            )));
        }
        // The flag clears even if the statement fails
        conn.transaction_open = false;
        self.run_on(&mut conn, statement, false).await?;
        Ok(())
    }

    /// Close a named connection, rolling back any open transaction.
    pub async fn close(&self, name: &str) -> Result<(), AdapterError> {
        if let Some(handle) = self.get_if_exists(name).await {
            let mut conn = handle.lock().await;
            self.close_connection(&mut conn).await;
        }
        Ok(())
    }

    /// Release a named connection once its work is done.
    pub async fn release(&self, name: &str) -> Result<(), AdapterError> {
        self.close(name).await
    }

    async fn close_connection(&self, conn: &mut Connection) {
        if conn.transaction_open && conn.session.is_some() {
            tracing::debug!(connection = %conn.name, "On {}: ROLLBACK", conn.name);
            if let Err(e) = self.run_on(conn, "ROLLBACK", false).await {
                tracing::warn!(connection = %conn.name, error = %e, "Rollback on close failed");
            }
        }

        if let Some(mut session) = conn.session.take() {
            if let Err(e) = session.close().await {
                tracing::warn!(connection = %conn.name, error = %e, "Failed to close session");
            }
        }

        conn.transaction_open = false;
        if conn.state != ConnectionState::Fail {
            conn.state = ConnectionState::Closed;
        }
    }

    /// Close and forget every connection.
    pub async fn cleanup_all(&self) {
        let drained: Vec<(String, ConnectionHandle)> =
            self.connections.write().await.drain().collect();

        for (name, handle) in drained {
            let mut conn = handle.lock().await;
            if conn.state == ConnectionState::Open {
                tracing::debug!(connection = %name, "Connection '{}' was left open", name);
            }
            self.close_connection(&mut conn).await;
        }
    }

    /// Cancel every open connection except `current`, returning their names.
    pub async fn cancel_open(&self, current: Option<&str>) -> Vec<String> {
        let handles: Vec<(String, ConnectionHandle)> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != current)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut cancelled = Vec::new();
        for (name, handle) in handles {
            match handle.try_lock() {
                Ok(conn) if conn.state != ConnectionState::Open => continue,
                Ok(conn) => self.cancel(&conn),
                // Busy means a statement is running on it
                Err(_) => tracing::debug!("Attempting to cancel connection: {}", name),
            }
            cancelled.push(name);
        }
        cancelled.sort();
        cancelled
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("credentials", &self.credentials)
            .field("connector", &self.connector.name())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Log = Arc<std::sync::Mutex<Vec<String>>>;

    struct MockSession {
        log: Log,
    }

    #[async_trait]
    impl Session for MockSession {
        fn engine(&self) -> &'static str {
            "mock"
        }

        async fn query(&mut self, sql: &str) -> Result<Table, AdapterError> {
            self.log.lock().unwrap().push(sql.to_string());
            if sql.contains("boom") {
                return Err(AdapterError::Database("syntax error".to_string()));
            }
            Ok(Table::new(
                vec![crate::table::TableColumn::new("id", None)],
                vec![vec![serde_json::json!(1)]],
            ))
        }

        async fn execute(&mut self, sql: &str) -> Result<Option<i64>, AdapterError> {
            self.log.lock().unwrap().push(sql.to_string());
            Ok(Some(3))
        }
    }

    /// Fails the first `failures` connects, then succeeds.
    struct MockConnector {
        failures: u32,
        attempts: AtomicU32,
        log: Log,
    }

    impl MockConnector {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                log: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn connect(
            &self,
            _credentials: &AltertableCredentials,
        ) -> Result<Box<dyn Session>, AdapterError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(AdapterError::Database("connection refused".to_string()));
            }
            Ok(Box::new(MockSession {
                log: self.log.clone(),
            }))
        }
    }

    fn credentials() -> AltertableCredentials {
        AltertableCredentials::new("test_user", "test_password", "test_db", "test_schema")
            .with_host("test.altertable.ai")
            .with_port(15002)
            .with_tls(false)
    }

    fn manager(connector: Arc<MockConnector>) -> ConnectionManager {
        ConnectionManager::new(credentials(), connector)
    }

    #[tokio::test]
    async fn test_open_connection_success() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());
        let mut conn = Connection::new("test_connection", credentials());

        manager.open(&mut conn).await.unwrap();
        assert_eq!(conn.state, ConnectionState::Open);
        assert!(conn.is_open());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_already_open_connection() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());
        let mut conn = Connection::new("test_connection", credentials());

        manager.open(&mut conn).await.unwrap();
        manager.open(&mut conn).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(conn.state, ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_open_state_without_session_reconnects() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());
        let mut conn = Connection::new("test_connection", credentials());
        conn.state = ConnectionState::Open;
        assert!(!conn.is_open());

        manager.open(&mut conn).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(conn.is_open());

        let (_, table) = manager.run_on(&mut conn, "select 1", true).await.unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[tokio::test]
    async fn test_open_retries_once() {
        let connector = Arc::new(MockConnector::new(1));
        let manager = manager(connector.clone());
        let mut conn = Connection::new("retry", credentials());

        manager.open(&mut conn).await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(conn.state, ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_open_fails_after_retries() {
        let connector = Arc::new(MockConnector::new(5));
        let manager = manager(connector.clone());
        let mut conn = Connection::new("fail", credentials());

        let result = manager.open(&mut conn).await;
        assert!(matches!(result, Err(AdapterError::FailedToConnect(ref m)) if m.contains("connection refused")));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(conn.state, ConnectionState::Fail);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_open_without_retries() {
        let connector = Arc::new(MockConnector::new(5));
        let manager = manager(connector.clone()).with_retry(RetryPolicy::new(0));
        let mut conn = Connection::new("fail", credentials());

        assert!(manager.open(&mut conn).await.is_err());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_timeout() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_limit, 1);
        assert_eq!(policy.timeout(0), Duration::from_secs(0));
        assert_eq!(policy.timeout(3), Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_execute_fetch_and_no_fetch() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());

        let (response, table) = manager.execute("main", "select 1 as id", true).await.unwrap();
        assert_eq!(response.message, "OK");
        assert_eq!(response.rows_affected, None);
        assert_eq!(table.row_count(), 1);

        let (response, table) = manager.execute("main", "delete from t", false).await.unwrap();
        assert_eq!(response.rows_affected, Some(3));
        assert_eq!(table, Table::empty());

        // Same named connection is reused
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            *connector.log.lock().unwrap(),
            vec!["select 1 as id".to_string(), "delete from t".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exception_handler_wraps_errors() {
        let manager = manager(Arc::new(MockConnector::new(0)));
        let result = manager.execute("main", "select boom", true).await;
        match result {
            Err(AdapterError::Runtime(msg)) => assert!(msg.contains("syntax error")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transactions() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());

        assert!(matches!(
            manager.commit("main").await,
            Err(AdapterError::Transaction(_))
        ));

        manager.begin("main").await.unwrap();
        assert!(matches!(
            manager.begin("main").await,
            Err(AdapterError::Transaction(_))
        ));
        manager.commit("main").await.unwrap();
        assert!(manager.commit("main").await.is_err());

        assert_eq!(
            *connector.log.lock().unwrap(),
            vec!["BEGIN".to_string(), "COMMIT".to_string()]
        );
    }

    #[tokio::test]
    async fn test_close_rolls_back_open_transaction() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());

        manager.begin("main").await.unwrap();
        manager.release("main").await.unwrap();

        let handle = manager.get_if_exists("main").await.unwrap();
        let conn = handle.lock().await;
        assert_eq!(conn.state, ConnectionState::Closed);
        assert!(!conn.transaction_open);
        assert_eq!(
            *connector.log.lock().unwrap(),
            vec!["BEGIN".to_string(), "ROLLBACK".to_string()]
        );
    }

    #[tokio::test]
    async fn test_closed_connection_reopens() {
        let connector = Arc::new(MockConnector::new(0));
        let manager = manager(connector.clone());

        manager.execute("main", "select 1", true).await.unwrap();
        manager.close("main").await.unwrap();
        manager.execute("main", "select 1", true).await.unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cleanup_all_and_cancel_open() {
        let manager = manager(Arc::new(MockConnector::new(0)));
        manager.connection_named("a").await.unwrap();
        manager.connection_named("b").await.unwrap();
        manager.connection_named("c").await.unwrap();
        manager.close("c").await.unwrap();

        assert_eq!(manager.cancel_open(Some("a")).await, vec!["b".to_string()]);
        assert_eq!(
            manager.list_connections().await,
            vec![
                ("a".to_string(), ConnectionState::Open),
                ("b".to_string(), ConnectionState::Open),
                ("c".to_string(), ConnectionState::Closed),
            ]
        );

        manager.cleanup_all().await;
        assert!(manager.list_connections().await.is_empty());
    }

    #[test]
    fn test_get_response() {
        let response = ConnectionManager::get_response(None);
        assert_eq!(response.message, "OK");
        assert_eq!(ConnectionManager::TYPE, "altertable");
    }
}

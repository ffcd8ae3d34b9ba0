//! Altertable connection credentials.
//!
//! Credentials come from a dbt `profiles.yml` output. Numeric and boolean
//! fields accept either native YAML values or strings, since values rendered
//! through `env_var()` are always text.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::error::AdapterError;

/// Adapter type name, as written in `profiles.yml`.
pub const ADAPTER_TYPE: &str = "altertable";

const DEFAULT_HOST: &str = "flight.altertable.ai";
const DEFAULT_PORT: u16 = 443;

const CONNECTION_KEYS: [&str; 7] = [
    "username", "password", "database", "schema", "host", "port", "tls",
];

/// Credentials for an Altertable Flight SQL endpoint.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AltertableCredentials {
    /// Login name used for the Flight SQL handshake.
    pub username: String,

    /// Password used for the Flight SQL handshake.
    pub password: String,

    /// Catalog that models are built into.
    pub database: String,

    /// Default schema for the target.
    pub schema: String,

    /// Flight SQL host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Flight SQL port.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether the channel uses TLS.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default = "default_tls")]
    pub tls: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_tls() -> bool {
    true
}

impl AltertableCredentials {
    /// Create credentials with the default host, port and TLS settings.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            database: database.into(),
            schema: schema.into(),
            host: default_host(),
            port: default_port(),
            tls: default_tls(),
        }
    }

    /// Set the Flight SQL host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the Flight SQL port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable TLS.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Parse credentials from a rendered profile output.
    pub fn from_value(value: serde_json::Value) -> Result<Self, AdapterError> {
        let credentials: Self = serde_json::from_value(value)
            .map_err(|e| AdapterError::Configuration(format!("Invalid altertable credentials: {}", e)))?;
        credentials.validate()?;
        Ok(credentials)
    }

    /// Check required fields are non-empty.
    pub fn validate(&self) -> Result<(), AdapterError> {
        for (key, value) in [
            ("username", &self.username),
            ("database", &self.database),
            ("schema", &self.schema),
            ("host", &self.host),
        ] {
            if value.trim().is_empty() {
                return Err(AdapterError::Configuration(format!(
                    "'{}' must not be empty",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Adapter type these credentials belong to.
    pub fn type_name(&self) -> &'static str {
        ADAPTER_TYPE
    }

    /// Field that identifies the warehouse for anonymous usage tracking.
    pub fn unique_field(&self) -> &'static str {
        "host"
    }

    /// Value of [`Self::unique_field`].
    pub fn unique_value(&self) -> &str {
        &self.host
    }

    /// Flight SQL URI in ADBC form (`grpc+tls://host:port`).
    pub fn flight_uri(&self) -> String {
        let scheme = if self.tls { "grpc+tls" } else { "grpc" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// URI the gRPC channel dials.
    pub fn channel_uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Keys shown by `dbt debug`, in display order.
    pub fn connection_keys(&self) -> &'static [&'static str] {
        &CONNECTION_KEYS
    }

    /// Key/value pairs for display, with the password masked.
    pub fn connection_info(&self) -> Vec<(&'static str, String)> {
        CONNECTION_KEYS
            .iter()
            .map(|key| {
                let value = match *key {
                    "username" => self.username.clone(),
                    "password" => mask(&self.password),
                    "database" => self.database.clone(),
                    "schema" => self.schema.clone(),
                    "host" => self.host.clone(),
                    "port" => self.port.to_string(),
                    _ => self.tls.to_string(),
                };
                (*key, value)
            })
            .collect()
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "*".repeat(8)
    }
}

impl std::fmt::Debug for AltertableCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AltertableCredentials")
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credentials() -> serde_json::Value {
        serde_json::json!({
            "username": "test_user",
            "password": "test_password",
            "database": "test_db",
            "schema": "test_schema",
            "host": "test.altertable.ai",
            "port": 15002,
            "tls": false
        })
    }

    fn minimal_credentials() -> serde_json::Value {
        serde_json::json!({
            "username": "test_user",
            "password": "test_password",
            "database": "test_db",
            "schema": "test_schema"
        })
    }

    #[test]
    fn test_credentials_type() {
        let creds = AltertableCredentials::from_value(sample_credentials()).unwrap();
        assert_eq!(creds.type_name(), "altertable");
        assert_eq!(creds.unique_field(), "host");
        assert_eq!(creds.unique_value(), "test.altertable.ai");
    }

    #[test]
    fn test_credentials_defaults() {
        let creds = AltertableCredentials::from_value(minimal_credentials()).unwrap();
        assert_eq!(creds.host, "flight.altertable.ai");
        assert_eq!(creds.port, 443);
        assert!(creds.tls);
    }

    #[test]
    fn test_flight_uri_with_tls() {
        let creds = AltertableCredentials::from_value(minimal_credentials()).unwrap();
        assert_eq!(creds.flight_uri(), "grpc+tls://flight.altertable.ai:443");
        assert_eq!(creds.channel_uri(), "https://flight.altertable.ai:443");
    }

    #[test]
    fn test_flight_uri_without_tls() {
        let creds = AltertableCredentials::from_value(sample_credentials()).unwrap();
        assert_eq!(creds.flight_uri(), "grpc://test.altertable.ai:15002");
        assert_eq!(creds.channel_uri(), "http://test.altertable.ai:15002");
    }

    #[test]
    fn test_string_port_and_tls() {
        let mut value = minimal_credentials();
        value["port"] = serde_json::json!("15002");
        value["tls"] = serde_json::json!("false");

        let creds = AltertableCredentials::from_value(value).unwrap();
        assert_eq!(creds.port, 15002);
        assert!(!creds.tls);
    }

    #[test]
    fn test_port_out_of_range() {
        let mut value = minimal_credentials();
        value["port"] = serde_json::json!(70000);

        let result = AltertableCredentials::from_value(value);
        assert!(matches!(result, Err(AdapterError::Configuration(_))));
    }

    #[test]
    fn test_missing_password() {
        let mut value = minimal_credentials();
        value.as_object_mut().unwrap().remove("password");

        let result = AltertableCredentials::from_value(value);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_schema_rejected() {
        let creds = AltertableCredentials::new("u", "p", "db", " ");
        assert!(creds.validate().is_err());
    }

    #[test]
    fn test_connection_keys_order() {
        let creds = AltertableCredentials::new("u", "p", "db", "s");
        assert_eq!(
            creds.connection_keys(),
            &["username", "password", "database", "schema", "host", "port", "tls"]
        );
    }

    #[test]
    fn test_connection_info_masks_password() {
        let creds = AltertableCredentials::new("u", "hunter2", "db", "s").with_port(15002);
        let info = creds.connection_info();

        assert_eq!(info.len(), 7);
        assert_eq!(info[1], ("password", "********".to_string()));
        assert_eq!(info[5], ("port", "15002".to_string()));
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}

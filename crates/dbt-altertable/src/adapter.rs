//! The Altertable adapter.
//!
//! Catalog operations are plain DuckDB-dialect SQL against
//! `information_schema`, run on named connections from the
//! [`ConnectionManager`].

use std::sync::Arc;

use crate::connection::{ConnectionManager, RetryPolicy};
use crate::credentials::{AltertableCredentials, ADAPTER_TYPE};
use crate::engines::FlightSqlConnector;
use crate::error::AdapterError;
use crate::profile::TargetConfig;
use crate::relation::{quote_identifier, quote_literal, Column, QuotePolicy, Relation, RelationType};
use crate::response::AdapterResponse;
use crate::session::Connector;
use crate::table::Table;

/// dbt adapter for Altertable.
pub struct AltertableAdapter {
    connections: ConnectionManager,
    quote_policy: QuotePolicy,
    threads: usize,
}

impl AltertableAdapter {
    /// Adapter type name.
    pub const TYPE: &'static str = ADAPTER_TYPE;

    /// Create an adapter over any connector.
    pub fn new(credentials: AltertableCredentials, connector: Arc<dyn Connector>) -> Self {
        Self {
            connections: ConnectionManager::new(credentials, connector),
            quote_policy: QuotePolicy::default(),
            threads: 1,
        }
    }

    /// Create an adapter for a profile target using Flight SQL.
    pub fn from_target(target: &TargetConfig) -> Self {
        Self::with_connector(target, Arc::new(FlightSqlConnector::new()))
    }

    /// Create an adapter for a profile target with a specific connector.
    pub fn with_connector(target: &TargetConfig, connector: Arc<dyn Connector>) -> Self {
        let connections = ConnectionManager::new(target.credentials.clone(), connector)
            .with_retry(RetryPolicy::new(target.connect_retries));
        Self {
            connections,
            quote_policy: QuotePolicy::default(),
            threads: target.threads,
        }
    }

    /// Override the quoting policy for relations this adapter builds.
    pub fn with_quote_policy(mut self, policy: QuotePolicy) -> Self {
        self.quote_policy = policy;
        self
    }

    pub fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    /// SQL expression for the current timestamp.
    pub fn date_function() -> &'static str {
        "now()"
    }

    /// Quote an identifier.
    pub fn quote(identifier: &str) -> String {
        quote_identifier(identifier)
    }

    /// Quote a string literal.
    pub fn quote_string(value: &str) -> String {
        quote_literal(value)
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn credentials(&self) -> &AltertableCredentials {
        self.connections.credentials()
    }

    /// Configured worker thread count.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Build a relation using this adapter's quote policy.
    pub fn relation(&self, database: &str, schema: &str, identifier: &str) -> Relation {
        Relation::create(database, schema, identifier).with_quote_policy(self.quote_policy)
    }

    /// Run SQL on a named connection.
    pub async fn execute(
        &self,
        conn: &str,
        sql: &str,
        fetch: bool,
    ) -> Result<(AdapterResponse, Table), AdapterError> {
        self.connections.execute(conn, sql, fetch).await
    }

    /// Run the `dbt debug` connection check.
    pub async fn debug_query(&self, conn: &str) -> Result<(), AdapterError> {
        self.execute(conn, "select 1 as id", true).await?;
        Ok(())
    }

    /// Schemas in a database.
    pub async fn list_schemas(&self, conn: &str, database: &str) -> Result<Vec<String>, AdapterError> {
        let sql = format!(
            "select schema_name from information_schema.schemata \
             where lower(catalog_name) = lower({}) order by schema_name",
            quote_literal(database)
        );
        let (_, table) = self.execute(conn, &sql, true).await?;

        Ok((0..table.row_count())
            .filter_map(|row| table.get_str(row, "schema_name"))
            .collect())
    }

    /// Whether a schema exists in a database.
    pub async fn check_schema_exists(
        &self,
        conn: &str,
        database: &str,
        schema: &str,
    ) -> Result<bool, AdapterError> {
        let schemas = self.list_schemas(conn, database).await?;
        Ok(schemas.iter().any(|s| s.eq_ignore_ascii_case(schema)))
    }

    /// Tables and views in a schema.
    pub async fn list_relations(
        &self,
        conn: &str,
        database: &str,
        schema: &str,
    ) -> Result<Vec<Relation>, AdapterError> {
        let sql = format!(
            "select table_catalog, table_schema, table_name, table_type \
             from information_schema.tables \
             where lower(table_catalog) = lower({}) and lower(table_schema) = lower({}) \
             order by table_name",
            quote_literal(database),
            quote_literal(schema)
        );
        let (_, table) = self.execute(conn, &sql, true).await?;

        let mut relations = Vec::with_capacity(table.row_count());
        for row in 0..table.row_count() {
            let (Some(db), Some(sch), Some(name)) = (
                table.get_str(row, "table_catalog"),
                table.get_str(row, "table_schema"),
                table.get_str(row, "table_name"),
            ) else {
                continue;
            };

            let kind = table.get_str(row, "table_type").and_then(|t| {
                let kind = RelationType::from_table_type(&t);
                if kind.is_none() {
                    tracing::debug!(relation = %name, table_type = %t, "Unknown relation type");
                }
                kind
            });

            let mut relation = Relation::create(db, sch, name).with_quote_policy(self.quote_policy);
            relation.kind = kind;
            relations.push(relation);
        }

        Ok(relations)
    }

    /// Look up a single relation.
    pub async fn get_relation(
        &self,
        conn: &str,
        database: &str,
        schema: &str,
        identifier: &str,
    ) -> Result<Option<Relation>, AdapterError> {
        let relations = self.list_relations(conn, database, schema).await?;
        Ok(relations
            .into_iter()
            .find(|r| r.matches(Some(database), Some(schema), Some(identifier))))
    }

    /// Columns of a relation in ordinal order.
    pub async fn get_columns_in_relation(
        &self,
        conn: &str,
        relation: &Relation,
    ) -> Result<Vec<Column>, AdapterError> {
        let database = relation
            .database
            .as_deref()
            .unwrap_or(&self.credentials().database)
            .to_string();
        let schema = relation
            .schema
            .as_deref()
            .unwrap_or(&self.credentials().schema)
            .to_string();

        let sql = format!(
            "select column_name, data_type, character_maximum_length, numeric_precision, numeric_scale \
             from information_schema.columns \
             where lower(table_catalog) = lower({}) and lower(table_schema) = lower({}) \
             and lower(table_name) = lower({}) \
             order by ordinal_position",
            quote_literal(&database),
            quote_literal(&schema),
            quote_literal(relation.name())
        );
        let (_, table) = self.execute(conn, &sql, true).await?;

        let int_at = |row: usize, column: &str| table.get(row, column).and_then(|v| v.as_i64());

        Ok((0..table.row_count())
            .filter_map(|row| {
                let name = table.get_str(row, "column_name")?;
                let dtype = table.get_str(row, "data_type").unwrap_or_default();
                Some(Column {
                    name,
                    dtype,
                    char_size: int_at(row, "character_maximum_length"),
                    numeric_precision: int_at(row, "numeric_precision"),
                    numeric_scale: int_at(row, "numeric_scale"),
                })
            })
            .collect())
    }

    /// Create the schema a relation lives in.
    pub async fn create_schema(&self, conn: &str, relation: &Relation) -> Result<(), AdapterError> {
        let sql = format!("create schema if not exists {}", relation.without_identifier());
        self.execute(conn, &sql, false).await?;
        Ok(())
    }

    /// Drop the schema a relation lives in, with everything in it.
    pub async fn drop_schema(&self, conn: &str, relation: &Relation) -> Result<(), AdapterError> {
        let sql = format!("drop schema if exists {} cascade", relation.without_identifier());
        self.execute(conn, &sql, false).await?;
        Ok(())
    }

    /// Drop a table or view.
    pub async fn drop_relation(&self, conn: &str, relation: &Relation) -> Result<(), AdapterError> {
        let kind = relation.kind.ok_or_else(|| {
            AdapterError::Runtime(format!("Tried to drop relation {}, but its type is null.", relation))
        })?;
        let sql = format!("drop {} if exists {} cascade", kind.ddl_keyword(), relation);
        self.execute(conn, &sql, false).await?;
        Ok(())
    }

    /// Remove all rows from a table.
    pub async fn truncate_relation(&self, conn: &str, relation: &Relation) -> Result<(), AdapterError> {
        let sql = format!("truncate table {}", relation);
        self.execute(conn, &sql, false).await?;
        Ok(())
    }

    /// Rename a relation within its schema.
    pub async fn rename_relation(
        &self,
        conn: &str,
        from: &Relation,
        to: &Relation,
    ) -> Result<(), AdapterError> {
        let kind = from.kind.unwrap_or(RelationType::Table);
        let target = to.identifier.as_deref().ok_or_else(|| {
            AdapterError::Runtime(format!("Cannot rename {} to a relation without an identifier", from))
        })?;
        let sql = format!(
            "alter {} {} rename to {}",
            kind.ddl_keyword(),
            from,
            quote_identifier(target)
        );
        self.execute(conn, &sql, false).await?;
        Ok(())
    }
}

impl std::fmt::Debug for AltertableAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AltertableAdapter")
            .field("connections", &self.connections)
            .field("threads", &self.threads)
            .finish()
    }
}

//! Relations and columns.

use serde::{Deserialize, Serialize};

/// Kind of a database relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Table,
    View,
    Cte,
    External,
}

impl RelationType {
    /// Map an `information_schema.tables.table_type` value.
    pub fn from_table_type(table_type: &str) -> Option<Self> {
        match table_type.trim().to_uppercase().as_str() {
            "BASE TABLE" | "LOCAL TEMPORARY" | "TABLE" => Some(RelationType::Table),
            "VIEW" => Some(RelationType::View),
            "EXTERNAL" => Some(RelationType::External),
            _ => None,
        }
    }

    /// SQL keyword used in DDL for this relation type.
    pub fn ddl_keyword(&self) -> &'static str {
        match self {
            RelationType::View => "view",
            _ => "table",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationType::Table => write!(f, "table"),
            RelationType::View => write!(f, "view"),
            RelationType::Cte => write!(f, "cte"),
            RelationType::External => write!(f, "external"),
        }
    }
}

/// Which relation parts are quoted when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePolicy {
    #[serde(default = "default_true")]
    pub database: bool,
    #[serde(default = "default_true")]
    pub schema: bool,
    #[serde(default = "default_true")]
    pub identifier: bool,
}

fn default_true() -> bool {
    true
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self {
            database: true,
            schema: true,
            identifier: true,
        }
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote a string literal with single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// A database relation (`database.schema.identifier`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub identifier: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<RelationType>,
    #[serde(default)]
    pub quote_policy: QuotePolicy,
}

impl Relation {
    /// Create a fully qualified relation.
    pub fn create(
        database: impl Into<String>,
        schema: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            database: Some(database.into()),
            schema: Some(schema.into()),
            identifier: Some(identifier.into()),
            kind: None,
            quote_policy: QuotePolicy::default(),
        }
    }

    /// Create a schema-level relation.
    pub fn schema(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            schema: Some(schema.into()),
            identifier: None,
            kind: None,
            quote_policy: QuotePolicy::default(),
        }
    }

    pub fn with_type(mut self, kind: RelationType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_quote_policy(mut self, policy: QuotePolicy) -> Self {
        self.quote_policy = policy;
        self
    }

    /// Same relation without its identifier.
    pub fn without_identifier(&self) -> Self {
        Self {
            identifier: None,
            kind: None,
            ..self.clone()
        }
    }

    /// Identifier name, or an empty string for schema relations.
    pub fn name(&self) -> &str {
        self.identifier.as_deref().unwrap_or("")
    }

    pub fn is_table(&self) -> bool {
        self.kind == Some(RelationType::Table)
    }

    pub fn is_view(&self) -> bool {
        self.kind == Some(RelationType::View)
    }

    /// Case-insensitive match on the given parts; `None` matches anything.
    pub fn matches(
        &self,
        database: Option<&str>,
        schema: Option<&str>,
        identifier: Option<&str>,
    ) -> bool {
        fn part_matches(actual: &Option<String>, wanted: Option<&str>) -> bool {
            match (actual, wanted) {
                (_, None) => true,
                (Some(a), Some(w)) => a.eq_ignore_ascii_case(w),
                (None, Some(_)) => false,
            }
        }
        part_matches(&self.database, database)
            && part_matches(&self.schema, schema)
            && part_matches(&self.identifier, identifier)
    }

    /// Render as a dot-joined, quoted SQL name.
    pub fn render(&self) -> String {
        let parts = [
            (&self.database, self.quote_policy.database),
            (&self.schema, self.quote_policy.schema),
            (&self.identifier, self.quote_policy.identifier),
        ];
        parts
            .iter()
            .filter_map(|&(part, quote)| {
                part.as_ref().map(|p| if quote { quote_identifier(p) } else { p.clone() })
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// A column as reported by the information schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i64>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            char_size: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    /// Column name quoted for SQL.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.name)
    }

    fn base_type(&self) -> String {
        self.dtype
            .split('(')
            .next()
            .unwrap_or("")
            .trim()
            .to_uppercase()
    }

    /// Full data type, including size or precision when known.
    pub fn data_type(&self) -> String {
        if self.dtype.contains('(') {
            return self.dtype.clone();
        }
        if self.is_string() {
            if let Some(size) = self.char_size {
                return format!("{}({})", self.dtype, size);
            }
        }
        if self.base_type() == "DECIMAL" || self.base_type() == "NUMERIC" {
            if let (Some(p), Some(s)) = (self.numeric_precision, self.numeric_scale) {
                return format!("{}({},{})", self.dtype, p, s);
            }
        }
        self.dtype.clone()
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" | "CHARACTER VARYING"
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "TINYINT"
                | "SMALLINT"
                | "INTEGER"
                | "INT"
                | "BIGINT"
                | "HUGEINT"
                | "UTINYINT"
                | "USMALLINT"
                | "UINTEGER"
                | "UBIGINT"
                | "UHUGEINT"
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "FLOAT" | "REAL" | "DOUBLE" | "FLOAT4" | "FLOAT8"
        )
    }

    /// Fixed-point numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(self.base_type().as_str(), "DECIMAL" | "NUMERIC")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quoted() {
        let relation = Relation::create("test_db", "test_schema", "orders");
        assert_eq!(relation.render(), r#""test_db"."test_schema"."orders""#);
        assert_eq!(relation.to_string(), relation.render());
    }

    #[test]
    fn test_render_policy_and_escaping() {
        let relation = Relation::create("db", "my\"schema", "orders").with_quote_policy(QuotePolicy {
            database: false,
            schema: true,
            identifier: false,
        });
        assert_eq!(relation.render(), r#"db."my""schema".orders"#);
    }

    #[test]
    fn test_without_identifier() {
        let relation = Relation::create("db", "s", "t").with_type(RelationType::View);
        let schema = relation.without_identifier();
        assert_eq!(schema.render(), r#""db"."s""#);
        assert!(schema.kind.is_none());
        assert_eq!(schema, Relation::schema("db", "s"));
    }

    #[test]
    fn test_matches_case_insensitive() {
        let relation = Relation::create("DB", "Main", "Orders");
        assert!(relation.matches(Some("db"), Some("main"), Some("orders")));
        assert!(relation.matches(None, Some("MAIN"), None));
        assert!(!relation.matches(None, None, Some("customers")));
        assert!(!Relation::schema("db", "s").matches(None, None, Some("t")));
    }

    #[test]
    fn test_relation_type() {
        assert_eq!(RelationType::from_table_type("BASE TABLE"), Some(RelationType::Table));
        assert_eq!(RelationType::from_table_type("LOCAL TEMPORARY"), Some(RelationType::Table));
        assert_eq!(RelationType::from_table_type("view"), Some(RelationType::View));
        assert_eq!(RelationType::from_table_type("SYNONYM"), None);
        assert_eq!(RelationType::View.ddl_keyword(), "view");
        assert_eq!(RelationType::External.ddl_keyword(), "table");
    }

    #[test]
    fn test_quote_helpers() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_column_types() {
        let mut name = Column::new("name", "VARCHAR");
        assert!(name.is_string());
        assert_eq!(name.data_type(), "VARCHAR");
        name.char_size = Some(32);
        assert_eq!(name.data_type(), "VARCHAR(32)");

        let mut amount = Column::new("amount", "DECIMAL");
        amount.numeric_precision = Some(18);
        amount.numeric_scale = Some(3);
        assert!(amount.is_numeric());
        assert_eq!(amount.data_type(), "DECIMAL(18,3)");
        assert_eq!(Column::new("x", "DECIMAL(10,2)").data_type(), "DECIMAL(10,2)");

        assert!(Column::new("id", "BIGINT").is_integer());
        assert!(Column::new("v", "double").is_float());
        assert_eq!(Column::new("id", "INTEGER").quoted(), "\"id\"");
    }
}

//! Template rendering for profile values.
//!
//! Profile values may contain dbt-style Jinja such as
//! `{{ env_var('ALTERTABLE_PASSWORD') }}`. Rendering uses minijinja with the
//! `env_var` function and the `as_text`, `as_number`, `as_bool` filters.

use minijinja::{Environment, Error, ErrorKind, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AdapterError;

/// Renders templated profile values.
pub struct ProfileRenderer {
    env: Environment<'static>,
}

impl ProfileRenderer {
    /// Create a renderer that resolves `env_var` against the process environment.
    pub fn new() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    /// Create a renderer that resolves `env_var` against the given variables.
    pub fn with_env(vars: HashMap<String, String>) -> Self {
        let vars = Arc::new(vars);
        let mut env = Environment::new();

        env.add_function(
            "env_var",
            move |name: String, default: Option<Value>| -> Result<Value, Error> {
                if let Some(value) = vars.get(&name) {
                    return Ok(Value::from(value.clone()));
                }
                match default {
                    Some(default) if !default.is_none() => Ok(default),
                    _ => Err(Error::new(
                        ErrorKind::InvalidOperation,
                        format!("Env var required but not provided: '{}'", name),
                    )),
                }
            },
        );

        env.add_filter("as_text", filter_as_text);
        env.add_filter("as_number", filter_as_number);
        env.add_filter("as_bool", filter_as_bool);

        Self { env }
    }

    /// Render a template string.
    pub fn render(&self, template: &str) -> Result<String, AdapterError> {
        let tmpl = self.env.template_from_str(template)?;
        tmpl.render(()).map_err(|e| AdapterError::Template(e.to_string()))
    }

    /// Check if a string contains template syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render every templated string inside a JSON value.
    ///
    /// Rendered values stay strings; typed fields parse them during
    /// deserialization.
    pub fn render_value(&self, value: &serde_json::Value) -> Result<serde_json::Value, AdapterError> {
        match value {
            serde_json::Value::String(s) if Self::is_template(s) => {
                Ok(serde_json::Value::String(self.render(s)?))
            }
            serde_json::Value::Object(obj) => {
                let mut result = serde_json::Map::new();
                for (k, v) in obj {
                    result.insert(k.clone(), self.render_value(v)?);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(arr) => {
                let result: Result<Vec<_>, _> = arr.iter().map(|v| self.render_value(v)).collect();
                Ok(serde_json::Value::Array(result?))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for ProfileRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_as_text(value: Value) -> String {
    value.to_string()
}

fn filter_as_number(value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    if let Ok(n) = s.trim().parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(f) = s.trim().parse::<f64>() {
        return Ok(Value::from(f));
    }
    Err(Error::new(
        ErrorKind::InvalidOperation,
        format!("'{}' is not a number", s),
    ))
}

fn filter_as_bool(value: Value) -> Result<Value, Error> {
    if let Some(b) = value.as_str().map(|s| s.trim().to_lowercase()) {
        return match b.as_str() {
            "true" | "1" | "yes" => Ok(Value::from(true)),
            "false" | "0" | "no" => Ok(Value::from(false)),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("'{}' is not a boolean", b),
            )),
        };
    }
    Ok(Value::from(value.is_true()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> ProfileRenderer {
        let mut vars = HashMap::new();
        vars.insert("ALTERTABLE_PASSWORD".to_string(), "s3cret".to_string());
        vars.insert("ALTERTABLE_PORT".to_string(), "15002".to_string());
        ProfileRenderer::with_env(vars)
    }

    #[test]
    fn test_env_var() {
        let r = renderer();
        assert_eq!(r.render("{{ env_var('ALTERTABLE_PASSWORD') }}").unwrap(), "s3cret");
    }

    #[test]
    fn test_env_var_default() {
        let r = renderer();
        assert_eq!(
            r.render("{{ env_var('ALTERTABLE_HOST', 'localhost') }}").unwrap(),
            "localhost"
        );
    }

    #[test]
    fn test_env_var_missing() {
        let r = renderer();
        let err = r.render("{{ env_var('NOPE') }}").unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn test_filters() {
        let r = renderer();
        assert_eq!(r.render("{{ env_var('ALTERTABLE_PORT') | as_number }}").unwrap(), "15002");
        assert_eq!(r.render("{{ 'False' | as_bool }}").unwrap(), "false");
        assert!(r.render("{{ 'abc' | as_number }}").is_err());
    }

    #[test]
    fn test_is_template() {
        assert!(ProfileRenderer::is_template("{{ x }}"));
        assert!(ProfileRenderer::is_template("{% if x %}y{% endif %}"));
        assert!(!ProfileRenderer::is_template("plain"));
    }

    #[test]
    fn test_render_value_keeps_strings() {
        let r = renderer();
        let value = serde_json::json!({
            "port": "{{ env_var('ALTERTABLE_PORT') }}",
            "threads": 4,
            "hosts": ["{{ env_var('MISSING', 'a') }}", "b"]
        });

        let rendered = r.render_value(&value).unwrap();
        assert_eq!(rendered["port"], "15002");
        assert_eq!(rendered["threads"], 4);
        assert_eq!(rendered["hosts"][0], "a");
    }
}

//! `{{variable}}` interpolation over run variables.

use crate::error::WardenError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Variables bound during a run: `input` plus every step output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: BTreeMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Resolve a dotted path. Segments index into objects by key and arrays by position.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?.trim())?;
        for segment in segments {
            let segment = segment.trim();
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// All variables as one JSON object.
    pub fn to_object(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

/// Render `template`, replacing every `{{path}}` with the variable's text.
///
/// Strings are inserted as-is, other values as compact JSON. Unknown
/// variables are an error.
pub fn render(template: &str, vars: &Variables) -> Result<String, WardenError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            WardenError::Validation(format!("unterminated placeholder in template: {template}"))
        })?;
        let path = after[..end].trim();
        let value = vars
            .lookup(path)
            .ok_or_else(|| WardenError::Validation(format!("unknown variable '{path}'")))?;
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render a template into a JSON value.
///
/// A template that is exactly one placeholder keeps the variable's JSON type.
pub fn render_value(template: &str, vars: &Variables) -> Result<Value, WardenError> {
    let trimmed = template.trim();
    if let Some(inner) = trimmed
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
    {
        if !inner.contains("{{") && !inner.contains("}}") {
            let path = inner.trim();
            return vars
                .lookup(path)
                .cloned()
                .ok_or_else(|| WardenError::Validation(format!("unknown variable '{path}'")));
        }
    }
    render(template, vars).map(Value::String)
}

/// Render every string leaf of a JSON document.
pub fn render_json(value: &Value, vars: &Variables) -> Result<Value, WardenError> {
    match value {
        Value::String(s) => render_value(s, vars),
        Value::Array(items) => items
            .iter()
            .map(|item| render_json(item, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), render_json(v, vars)?)))
            .collect::<Result<Map<String, Value>, WardenError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Variables {
        let mut vars = Variables::new();
        vars.set("input", json!("Paris"));
        vars.set(
            "weather",
            json!({"temp": 21, "tags": ["sunny", "dry"], "city": {"name": "Paris"}}),
        );
        vars
    }

    #[test]
    fn test_render_interpolates_strings_and_json() {
        let out = render("Weather in {{ input }}: {{weather.temp}}C {{weather.tags}}", &vars()).unwrap();
        assert_eq!(out, "Weather in Paris: 21C [\"sunny\",\"dry\"]");
        assert_eq!(render("{{weather.tags.1}}", &vars()).unwrap(), "dry");
        assert_eq!(render("{{weather.city.name}}", &vars()).unwrap(), "Paris");
        assert_eq!(render("no placeholders", &vars()).unwrap(), "no placeholders");
    }

    #[test]
    fn test_render_errors() {
        assert!(matches!(
            render("{{missing}}", &vars()),
            Err(WardenError::Validation(msg)) if msg.contains("missing")
        ));
        assert!(render("{{input", &vars()).is_err());
        assert!(render("{{weather.tags.9}}", &vars()).is_err());
    }

    #[test]
    fn test_render_value_preserves_type() {
        assert_eq!(render_value("{{weather.temp}}", &vars()).unwrap(), json!(21));
        assert_eq!(
            render_value("{{input}} is {{weather.temp}}", &vars()).unwrap(),
            json!("Paris is 21")
        );
    }

    #[test]
    fn test_render_json_walks_documents() {
        let args = json!({
            "url": "https://api.example.com/weather?q={{input}}",
            "body": {"tags": "{{weather.tags}}", "n": 1},
        });
        let rendered = render_json(&args, &vars()).unwrap();
        assert_eq!(rendered["url"], "https://api.example.com/weather?q=Paris");
        assert_eq!(rendered["body"]["tags"], json!(["sunny", "dry"]));
        assert_eq!(rendered["body"]["n"], 1);
    }
}

//! Configuration template pass
//!
//! Pass 1 of the template engine: once the configuration JSON is parsed,
//! every string value in the tree has `{{APPLICATION_NAME}}` substituted
//! in place. Pass 2 (SQL text, including `{{WEBID}}`) lives with the SQL
//! executor. Substitution is plain, case-sensitive, and non-recursive.

use serde_json::Value;

const PLACEHOLDER: &str = "{{APPLICATION_NAME}}";

/// Expand `{{APPLICATION_NAME}}` through the whole configuration tree.
///
/// The `application_name` key itself is left untouched; an absent or
/// empty name leaves the document as-is.
pub fn expand_application_name(root: &mut Value) {
    let name = match root.get("application_name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return,
    };

    if let Value::Object(map) = root {
        for (key, value) in map.iter_mut() {
            if key != "application_name" {
                expand_value(value, &name);
            }
        }
    }
}

fn expand_value(value: &mut Value, name: &str) {
    match value {
        Value::String(s) => {
            if s.contains(PLACEHOLDER) {
                *s = s.replace(PLACEHOLDER, name);
            }
        }
        Value::Array(items) => {
            for item in items {
                expand_value(item, name);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                expand_value(item, name);
            }
        }
        _ => {}
    }
}

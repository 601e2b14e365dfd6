use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap()
});

/// Substitute `{{variable}}` placeholders from the variable map.
///
/// Strings render raw; other values render as JSON. Placeholders with
/// no matching variable render as the empty string.
pub fn render_template(template: &str, variables: &HashMap<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => render_value(value),
                None => {
                    tracing::debug!(variable = %name, "template variable not set");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Render a value the way templates and merge strategies see it.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

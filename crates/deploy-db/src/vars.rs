//! Template variable substitution for SQL text
//!
//! Plain, non-recursive textual replacement: placeholders are
//! case-sensitive, values containing other placeholders are not
//! re-expanded, and unknown placeholders pass through to the server.

/// An ordered set of `{{NAME}}` bindings applied to SQL text.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    bindings: Vec<(String, String)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `{{name}}` to a value; later bindings win on duplicate names.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.bindings.push((format!("{{{{{name}}}}}"), value.into()));
        self
    }

    /// Bind only when a value is present.
    pub fn set_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.set(name, v),
            None => self,
        }
    }

    /// Apply every binding to `text` in a single pass.
    ///
    /// Substituted values are never rescanned, so a value containing
    /// another placeholder is not re-expanded.
    pub fn apply(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start..];
            match after.find("}}") {
                Some(end) => {
                    let token = &after[..end + 2];
                    match self.bindings.iter().rev().find(|(p, _)| p == token) {
                        Some((_, value)) => result.push_str(value),
                        None => result.push_str(token),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    result.push_str(after);
                    rest = "";
                }
            }
        }

        result.push_str(rest);
        result
    }
}

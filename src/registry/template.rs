//! Command templates with `{name}` placeholders.
//!
//! Placeholders must be plain identifiers. `{{` and `}}` produce literal braces.
//! Rendering is delegated to `strfmt` once every placeholder has a value.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use strfmt::strfmt;

/// Escaped braces or a `{...}` placeholder (compiled once).
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("Invalid token regex"));

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

/// A parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    placeholders: Vec<String>,
}

impl Template {
    /// Parses `source`, rejecting unbalanced braces and non-identifier placeholders.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut placeholders: Vec<String> = Vec::new();
        let mut leftover = String::with_capacity(source.len());
        let mut last = 0;

        for caps in TOKEN_REGEX.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            leftover.push_str(&source[last..whole.start()]);
            last = whole.end();

            if let Some(name) = caps.get(1) {
                let name = name.as_str();
                if !IDENTIFIER_REGEX.is_match(name) {
                    return Err(format!(
                        "invalid placeholder '{{{name}}}' in \"{source}\", expected {{identifier}}"
                    ));
                }
                if !placeholders.iter().any(|p| p == name) {
                    placeholders.push(name.to_string());
                }
            }
        }
        leftover.push_str(&source[last..]);

        if leftover.contains('{') || leftover.contains('}') {
            return Err(format!("unbalanced brace in \"{source}\""));
        }

        Ok(Self {
            source: source.to_string(),
            placeholders,
        })
    }

    /// Template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// If the whole template is exactly one placeholder, its name.
    pub fn single_placeholder(&self) -> Option<&str> {
        match self.placeholders.as_slice() {
            [only] if self.source == format!("{{{only}}}") => Some(only),
            _ => None,
        }
    }

    /// Whether the template ends with the query marker.
    pub fn is_query(&self) -> bool {
        self.source.trim_end().ends_with('?')
    }

    /// Substitutes placeholders. Returns the name of the first missing one on failure.
    pub fn render(&self, values: &HashMap<String, String>) -> Result<String, String> {
        if let Some(missing) = self.placeholders.iter().find(|p| !values.contains_key(*p)) {
            return Err(missing.clone());
        }
        strfmt(&self.source, values).map_err(|e| e.to_string())
    }
}

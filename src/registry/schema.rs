//! YAML schema for method resources.
//!
//! ```yaml
//! name: keithley_2450
//! description: Keithley 2450 SourceMeter
//! bool_format: on_off
//! methods:
//!   - name: source_voltage
//!     description: Source a DC voltage
//!     parameters:
//!       - {name: voltage, type: float}
//!       - {name: compliance, type: float, required: false, default: 0.1}
//!     commands:
//!       - ":SOUR:FUNC VOLT"
//!       - ":SOUR:VOLT {voltage}"
//!       - {cmd: ":SENS:CURR:PROT {compliance}", wait_ms: 10}
//!       - {call: enable_source, args: {state: true}}
//! ```

use super::value::{BoolFormat, ParamType, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Top-level method resource document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    /// Resource name, defaults to the name it was loaded under
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Boolean convention for every method in the resource
    #[serde(default)]
    pub bool_format: Option<BoolFormat>,

    pub methods: Vec<MethodDocument>,
}

/// One method block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDocument {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub parameters: Vec<ParameterDocument>,

    pub commands: Vec<StepDocument>,
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDocument {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParamType,

    #[serde(default = "default_required")]
    pub required: bool,

    /// Used when the caller omits the argument
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
}

fn default_required() -> bool {
    true
}

/// Explicit kind of a command step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Sent through `write`
    Write,
    /// Sent through `query`; only valid as the last step
    Query,
}

/// One entry of a method's `commands` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDocument {
    /// Bare template; a trailing `?` makes it a query
    Plain(String),

    /// Template with explicit kind and/or settle delay
    Command {
        cmd: String,
        #[serde(default, rename = "type")]
        kind: Option<StepKind>,
        #[serde(default)]
        wait_ms: u64,
    },

    /// Invocation of another method in the same resource
    Call {
        call: String,
        #[serde(default)]
        args: BTreeMap<String, serde_yaml::Value>,
    },
}

/// A problem found while validating a resource document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Location of the problem, e.g. `methods[2].commands[0]`
    pub path: String,
    /// Human-readable error message
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Structural checks that need no cross-method knowledge.
///
/// Checks:
/// 1. Method and parameter names are non-empty and unique
/// 2. Defaults are scalars of the declared type
/// 3. Every method has at least one command
///
/// Placeholder and call-graph checks run when the document is compiled.
pub fn validate_document(doc: &ResourceDocument) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_methods = HashSet::new();

    if doc.methods.is_empty() {
        issues.push(ValidationIssue {
            path: "methods".to_string(),
            message: "Resource defines no methods".to_string(),
        });
    }

    for (i, method) in doc.methods.iter().enumerate() {
        let path = format!("methods[{i}]");

        if method.name.trim().is_empty() {
            issues.push(ValidationIssue {
                path: format!("{path}.name"),
                message: "Method name cannot be empty".to_string(),
            });
        } else if !seen_methods.insert(method.name.as_str()) {
            issues.push(ValidationIssue {
                path: format!("{path}.name"),
                message: format!("Duplicate method name '{}'", method.name),
            });
        }

        if method.commands.is_empty() {
            issues.push(ValidationIssue {
                path: format!("{path}.commands"),
                message: format!("Method '{}' has no commands", method.name),
            });
        }

        let mut seen_params = HashSet::new();
        for (j, param) in method.parameters.iter().enumerate() {
            let ppath = format!("{path}.parameters[{j}]");
            if param.name.trim().is_empty() {
                issues.push(ValidationIssue {
                    path: format!("{ppath}.name"),
                    message: "Parameter name cannot be empty".to_string(),
                });
            } else if !seen_params.insert(param.name.as_str()) {
                issues.push(ValidationIssue {
                    path: format!("{ppath}.name"),
                    message: format!("Duplicate parameter name '{}'", param.name),
                });
            }

            if let Some(raw) = &param.default {
                let typed = Value::from_yaml(raw).and_then(|v| param.kind.coerce(&v));
                if typed.is_none() {
                    issues.push(ValidationIssue {
                        path: format!("{ppath}.default"),
                        message: format!(
                            "Default {:?} does not match declared type {}",
                            raw, param.kind
                        ),
                    });
                }
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: sample
bool_format: one_zero
methods:
  - name: source_voltage
    parameters:
      - {name: voltage, type: float}
      - {name: limit, type: float, required: false, default: 0.1}
    commands:
      - ":SOUR:VOLT {voltage}"
      - {cmd: ":SENS:CURR:PROT {limit}", wait_ms: 5}
      - {cmd: ":READ", type: query}
      - {call: other, args: {state: true}}
"#;

    #[test]
    fn test_parses_all_step_forms() {
        let doc: ResourceDocument = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(doc.bool_format, Some(BoolFormat::OneZero));
        let steps = &doc.methods[0].commands;
        assert!(matches!(&steps[0], StepDocument::Plain(s) if s == ":SOUR:VOLT {voltage}"));
        assert!(matches!(&steps[1], StepDocument::Command { wait_ms: 5, kind: None, .. }));
        assert!(matches!(
            &steps[2],
            StepDocument::Command { kind: Some(StepKind::Query), .. }
        ));
        assert!(matches!(&steps[3], StepDocument::Call { call, .. } if call == "other"));
        assert!(doc.methods[0].parameters[0].required);
        assert!(!doc.methods[0].parameters[1].required);
    }

    #[test]
    fn test_missing_methods_key_is_a_parse_error() {
        assert!(serde_yaml::from_str::<ResourceDocument>("name: x").is_err());
    }

    #[test]
    fn test_unknown_type_is_a_parse_error() {
        let text = "methods:\n  - name: m\n    parameters: [{name: a, type: complex}]\n    commands: [\"A {a}\"]\n";
        assert!(serde_yaml::from_str::<ResourceDocument>(text).is_err());
    }

    #[test]
    fn test_flags_duplicates_and_bad_defaults() {
        let text = r#"
methods:
  - name: m
    parameters:
      - {name: a, type: int, default: 1.5}
      - {name: a, type: int}
    commands: ["X {a}"]
  - name: m
    commands: []
"#;
        let doc: ResourceDocument = serde_yaml::from_str(text).unwrap();
        let issues = validate_document(&doc);
        let messages: Vec<_> = issues.iter().map(|i| i.to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("Duplicate method name 'm'")));
        assert!(messages.iter().any(|m| m.contains("Duplicate parameter name 'a'")));
        assert!(messages.iter().any(|m| m.contains("methods[0].parameters[0].default")));
        assert!(messages.iter().any(|m| m.contains("has no commands")));
    }
}

//! Dynamic command paths for commands no driver or resource declares.
//!
//! A [`CommandPath`] is an immutable list of mnemonic segments. Appending a
//! segment returns a new path and leaves the original untouched, so partial
//! chains can be stored and extended in several directions:
//!
//! ```
//! use lab_control::proxy::CommandPath;
//!
//! let system = CommandPath::root().child("system");
//! let beeper = system.child("beeper");
//! let error = system.child("error");
//! assert_eq!(beeper.to_string(), "SYSTEM:BEEPER");
//! assert_eq!(error.to_string(), "SYSTEM:ERROR");
//! ```
//!
//! Invoking a path with no arguments queries `<PATH>?`; with arguments it writes
//! `<PATH> <a>,<b>`. Responses to proxy queries are coerced with
//! [`Reply::coerce`].

use crate::error::{InstrumentError, Result};
use crate::registry::{BoolFormat, Value};
use std::fmt;

/// Separator between path segments.
pub const HIERARCHY_SEPARATOR: &str = ":";
/// Separator between command arguments.
pub const ARGUMENT_SEPARATOR: &str = ",";
/// Suffix that turns a command into a query.
pub const QUERY_MARKER: &str = "?";

const FORBIDDEN: &[char] = &[':', '?', ',', ';', '\'', '"', '.'];

/// Immutable chain of command mnemonics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommandPath {
    segments: Vec<String>,
}

impl CommandPath {
    /// The empty path. Invoking it directly is a usage error.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from a dotted name such as `"system.beeper.state"`.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        dotted
            .split('.')
            .fold(Self::root(), |path, segment| path.child(segment))
    }

    /// New path with `segment` appended, upper-cased.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_ascii_uppercase());
        Self { segments }
    }

    /// New path with `n` appended to the last segment (`CHAN` → `CHAN2`).
    ///
    /// On the root this yields a bare numeric segment, which is rejected when
    /// the path is invoked.
    #[must_use]
    pub fn index(&self, n: u32) -> Self {
        let mut segments = self.segments.clone();
        match segments.last_mut() {
            Some(last) => last.push_str(&n.to_string()),
            None => segments.push(n.to_string()),
        }
        Self { segments }
    }

    /// Segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True for the empty path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Dotted form, as a user would have written it.
    pub fn dotted(&self) -> String {
        self.segments.join(".").to_ascii_lowercase()
    }

    /// Checks the path and returns its wire form.
    pub fn resolve(&self, instrument: &str) -> Result<String> {
        let usage = |message: String| InstrumentError::ProxyUsage {
            instrument: instrument.to_string(),
            path: self.to_string(),
            message,
        };

        if self.is_root() {
            return Err(usage("cannot invoke the root of a command chain".to_string()));
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(usage(format!("segment {i} is empty")));
            }
            if let Some(c) = segment
                .chars()
                .find(|c| c.is_whitespace() || FORBIDDEN.contains(c))
            {
                return Err(usage(format!("segment '{segment}' contains {c:?}")));
            }
            if segment.chars().all(|c| c.is_ascii_digit()) {
                return Err(usage(format!("segment '{segment}' is an index without a mnemonic")));
            }
        }
        Ok(self.segments.join(HIERARCHY_SEPARATOR))
    }

    /// The command an invocation with `args` sends.
    ///
    /// No arguments gives a query, otherwise a write.
    pub fn command(&self, instrument: &str, args: &[Value], bools: BoolFormat) -> Result<ProxyCommand> {
        let path = self.resolve(instrument)?;
        if args.is_empty() {
            Ok(ProxyCommand::Query(format!("{path}{QUERY_MARKER}")))
        } else {
            Ok(ProxyCommand::Write(format!("{path} {}", join_arguments(args, bools))))
        }
    }

    /// A query carrying arguments: `<PATH>? <a>,<b>`.
    pub fn query_command(&self, instrument: &str, args: &[Value], bools: BoolFormat) -> Result<String> {
        let path = self.resolve(instrument)?;
        if args.is_empty() {
            Ok(format!("{path}{QUERY_MARKER}"))
        } else {
            Ok(format!("{path}{QUERY_MARKER} {}", join_arguments(args, bools)))
        }
    }
}

impl fmt::Display for CommandPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join(HIERARCHY_SEPARATOR))
    }
}

fn join_arguments(args: &[Value], bools: BoolFormat) -> String {
    args.iter()
        .map(|a| a.render_argument(bools))
        .collect::<Vec<_>>()
        .join(ARGUMENT_SEPARATOR)
}

/// What invoking a [`CommandPath`] sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyCommand {
    /// Sent through `query`
    Query(String),
    /// Sent through `write`
    Write(String),
}

impl ProxyCommand {
    /// The command text.
    pub fn text(&self) -> &str {
        match self {
            ProxyCommand::Query(cmd) | ProxyCommand::Write(cmd) => cmd.as_str(),
        }
    }
}

/// Result of a dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The call sent commands only
    Empty,
    /// Integer response
    Int(i64),
    /// Decimal response
    Float(f64),
    /// Anything else, unchanged
    Text(String),
}

impl Reply {
    /// Opportunistic numeric reading of a raw response.
    ///
    /// Integers first, then decimals (including exponent forms like
    /// `3.140000E+00`). Anything else is kept as the raw text.
    pub fn coerce(raw: &str) -> Reply {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Reply::Int(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Reply::Float(f),
            _ => Reply::Text(raw.to_string()),
        }
    }

    /// `Empty` for `None`, raw text otherwise.
    pub fn from_response(response: Option<String>) -> Reply {
        response.map_or(Reply::Empty, Reply::Text)
    }

    /// True for [`Reply::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Reply::Empty)
    }

    /// Numeric value. Text is parsed on demand.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Reply::Float(v) => Some(*v),
            Reply::Int(v) => Some(*v as f64),
            Reply::Text(s) => s.trim().parse().ok(),
            Reply::Empty => None,
        }
    }

    /// Integer value. Text is parsed on demand; floats must be integral.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Reply::Int(v) => Some(*v),
            Reply::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Reply::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean reading of `1`/`0`/`ON`/`OFF`/`TRUE`/`FALSE`.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Reply::Int(1) => Some(true),
            Reply::Int(0) => Some(false),
            Reply::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "ON" | "TRUE" | "1" => Some(true),
                "OFF" | "FALSE" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// The text, for [`Reply::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Empty => Ok(()),
            Reply::Int(v) => write!(f, "{v}"),
            Reply::Float(v) => write!(f, "{v}"),
            Reply::Text(s) => f.write_str(s),
        }
    }
}

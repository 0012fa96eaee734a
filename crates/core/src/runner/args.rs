//! Command-line flag rendering for the generation scripts.
//!
//! The scripts take `argparse` flags in snake_case. Boolean flags are
//! switches (present when `true`, omitted when `false`); every other value
//! becomes `--flag value`.

use std::collections::BTreeMap;
use std::fmt;

/// Flag name to value. Ordered so the rendered command line is stable.
pub type FlagMap = BTreeMap<String, FlagValue>;

/// A single flag value.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(b) => write!(f, "{b}"),
            FlagValue::Int(n) => write!(f, "{n}"),
            FlagValue::Float(x) => write!(f, "{x}"),
            FlagValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<u32> for FlagValue {
    fn from(value: u32) -> Self {
        FlagValue::Int(i64::from(value))
    }
}

impl From<u64> for FlagValue {
    fn from(value: u64) -> Self {
        // Seeds above i64::MAX do not occur in practice; saturate rather than wrap.
        FlagValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Int(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Float(value)
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Str(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Str(value.to_string())
    }
}

/// Convert `camelCase`, `kebab-case`, or `Space Separated` names to
/// `snake_case`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in name.chars() {
        if ch == '-' || ch == ' ' || ch == '_' {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower_or_digit = false;
        } else if ch.is_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Render a flag map as an argument vector.
pub fn build_args(flags: &FlagMap) -> Vec<String> {
    let mut args = Vec::with_capacity(flags.len() * 2);
    for (name, value) in flags {
        match value {
            FlagValue::Bool(false) => {}
            FlagValue::Bool(true) => args.push(format!("--{}", snake_case(name))),
            other => {
                args.push(format!("--{}", snake_case(name)));
                args.push(other.to_string());
            }
        }
    }
    args
}

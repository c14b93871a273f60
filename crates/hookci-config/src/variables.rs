//! Variable interpolation for configuration values.
//!
//! Supports `${env.VAR_NAME}`, resolved from the process environment (or an
//! explicit map in tests). Unknown variables are left untouched.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

// Regex for matching ${namespace.name} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\}")
        .expect("variable regex is valid")
});

/// Values available for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub env: HashMap<String, String>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context populated from the current process environment.
    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn resolve(&self, namespace: &str, name: &str) -> Option<String> {
        match namespace {
            "env" => self.env.get(name).cloned(),
            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                self.resolve(&caps[1], &caps[2])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }
}

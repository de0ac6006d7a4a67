//! Secret redaction for job log lines.

use regex::Regex;
use std::collections::HashMap;

/// Replaces every redacted secret.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Environment variables whose values never reach a job log.
pub const SENSITIVE_ENV_KEYS: &[&str] = &[
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "GOOGLE_OAUTH_ACCESS_TOKEN",
    "ARM_CLIENT_SECRET",
    "ARM_ACCESS_TOKEN",
];

/// A set of labelled secret values checked against every log line.
///
/// Values are regex-escaped and combined into one alternation, longest
/// first, so a secret that contains another secret is replaced whole.
#[derive(Debug, Clone, Default)]
pub struct RedactionRegistry {
    entries: Vec<(String, String)>,
    pattern: Option<Regex>,
}

impl RedactionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from the sensitive keys of a credential env map.
    #[must_use]
    pub fn from_env_vars(env_vars: &HashMap<String, String>) -> Self {
        let mut registry = Self::new();
        registry.register_env_vars(env_vars);
        registry
    }

    /// Registers the sensitive keys of a credential env map.
    pub fn register_env_vars(&mut self, env_vars: &HashMap<String, String>) {
        for key in SENSITIVE_ENV_KEYS {
            if let Some(value) = env_vars.get(*key) {
                self.push(key, value);
            }
        }
        self.rebuild();
    }

    /// Registers one secret. Empty values are ignored.
    pub fn register(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.push(&label.into(), &value.into());
        self.rebuild();
    }

    /// Returns the registered labels.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Returns the number of registered secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every registered secret in `line` with [`REDACTION_MARKER`].
    #[must_use]
    pub fn redact(&self, line: &str) -> String {
        match &self.pattern {
            Some(re) => re.replace_all(line, REDACTION_MARKER).into_owned(),
            None => self
                .entries
                .iter()
                .fold(line.to_string(), |acc, (_, value)| acc.replace(value.as_str(), REDACTION_MARKER)),
        }
    }

    fn push(&mut self, label: &str, value: &str) {
        if value.is_empty() || self.entries.iter().any(|(_, v)| v == value) {
            return;
        }
        self.entries.push((label.to_string(), value.to_string()));
        self.entries.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    }

    fn rebuild(&mut self) {
        if self.entries.is_empty() {
            self.pattern = None;
            return;
        }
        let alternation = self
            .entries
            .iter()
            .map(|(_, value)| regex::escape(value))
            .collect::<Vec<_>>()
            .join("|");
        // Falls back to literal replacement if the combined pattern is too large.
        self.pattern = Regex::new(&alternation).ok();
    }
}

/// Redacts the sensitive values of `env_vars` from `line`.
#[must_use]
pub fn sanitize_log(line: &str, env_vars: &HashMap<String, String>) -> String {
    RedactionRegistry::from_env_vars(env_vars).redact(line)
}

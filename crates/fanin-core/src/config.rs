//! Resolver configuration.

use serde::{Deserialize, Serialize};

/// Behavioural knobs for a [`Resolver`](crate::Resolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Label attached to every log event of the resolver.
    pub label: String,
    /// Arm a fresh round after a cancelled or failed wait. When `false` the
    /// round stays as it was, and slots filled before the failure count
    /// towards the next wait.
    pub rearm_after_failure: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            label: "resolver".to_string(),
            rearm_after_failure: true,
        }
    }
}

impl ResolverConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_rearm_after_failure(mut self, rearm: bool) -> Self {
        self.rearm_after_failure = rearm;
        self
    }
}

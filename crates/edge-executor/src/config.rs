//! Composition configuration.

use serde::{Deserialize, Serialize};

use crate::ordering::OrderingStrategy;

/// Composition engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Emission order of slot content.
    #[serde(default)]
    pub ordering: OrderingStrategy,

    /// Events buffered ahead of a slow consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingStrategy::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ComposeConfig {
    pub fn with_ordering(mut self, ordering: OrderingStrategy) -> Self {
        self.ordering = ordering;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ComposeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ComposeConfig::default());
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.ordering, OrderingStrategy::Strict);
    }
}

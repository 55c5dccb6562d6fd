//! Flush configuration.

/// Configuration for a flush executor or session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushConfig {
    /// Maximum number of operations in one flush set (0 = unlimited).
    pub max_operations: usize,

    /// Whether `entity_updates` is reported in the change-set.
    pub capture_updates: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            capture_updates: true,
        }
    }
}

impl FlushConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = limit;
        self
    }

    /// Sets whether updated entities are reported.
    #[must_use]
    pub const fn capture_updates(mut self, value: bool) -> Self {
        self.capture_updates = value;
        self
    }

    /// Returns true if a batch of `count` operations is allowed.
    pub(crate) fn admits(&self, count: usize) -> bool {
        self.max_operations == 0 || count <= self.max_operations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FlushConfig::default();
        assert_eq!(config.max_operations, 0);
        assert!(config.capture_updates);
        assert!(config.admits(usize::MAX));
    }

    #[test]
    fn builder_pattern() {
        let config = FlushConfig::new().max_operations(3).capture_updates(false);

        assert!(!config.capture_updates);
        assert!(config.admits(3));
        assert!(!config.admits(4));
    }
}

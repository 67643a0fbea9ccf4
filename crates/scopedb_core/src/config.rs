//! Unit-of-work configuration.

use scopedb_store::IsolationLevel;

/// Configuration for a unit of work.
#[derive(Debug, Clone)]
pub struct Config {
    /// Isolation level for scopes opened without an explicit level.
    ///
    /// Serializable, by convention of the underlying store.
    pub scope_isolation: IsolationLevel,

    /// Isolation level for the short-lived transactions a unit of work
    /// opens when no ambient scope is active.
    pub autocommit_isolation: IsolationLevel,

    /// Whether `save()` verifies each snapshot against the store's
    /// current value before writing (optimistic concurrency check).
    pub optimistic_checks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope_isolation: IsolationLevel::Serializable,
            autocommit_isolation: IsolationLevel::ReadCommitted,
            optimistic_checks: false,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default scope isolation level.
    #[must_use]
    pub const fn scope_isolation(mut self, level: IsolationLevel) -> Self {
        self.scope_isolation = level;
        self
    }

    /// Sets the autocommit isolation level.
    #[must_use]
    pub const fn autocommit_isolation(mut self, level: IsolationLevel) -> Self {
        self.autocommit_isolation = level;
        self
    }

    /// Enables or disables optimistic concurrency checks.
    #[must_use]
    pub const fn optimistic_checks(mut self, value: bool) -> Self {
        self.optimistic_checks = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.scope_isolation, IsolationLevel::Serializable);
        assert_eq!(config.autocommit_isolation, IsolationLevel::ReadCommitted);
        assert!(!config.optimistic_checks);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .scope_isolation(IsolationLevel::ReadUncommitted)
            .optimistic_checks(true);

        assert_eq!(config.scope_isolation, IsolationLevel::ReadUncommitted);
        assert!(config.optimistic_checks);
    }
}

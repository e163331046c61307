use crate::config::LifecycleConfig;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

/// Recovery action to take after a server went down
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Relaunch after a delay
    RetryAfterDelay(Duration),
    /// Out of attempts; leave the server down
    GiveUp,
}

/// Recovery strategy configuration
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of restart attempts
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between restarts
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_backoff: true,
        }
    }
}

impl From<&LifecycleConfig> for RecoveryConfig {
    fn from(lifecycle: &LifecycleConfig) -> Self {
        Self {
            max_retries: lifecycle.max_restarts,
            base_delay: Duration::from_millis(lifecycle.restart_base_delay_ms),
            max_delay: Duration::from_millis(lifecycle.restart_max_delay_ms),
            exponential_backoff: true,
        }
    }
}

/// Per-process restart budget
#[derive(Debug)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    retry_counts: HashMap<String, u32>,
}

impl RecoveryManager {
    /// Create a new recovery manager with default configuration
    pub fn new() -> Self {
        Self::with_config(RecoveryConfig::default())
    }

    /// Create a new recovery manager with custom configuration
    pub fn with_config(config: RecoveryConfig) -> Self {
        Self {
            config,
            retry_counts: HashMap::new(),
        }
    }

    /// Record a failure of `process_name` and decide what to do about it
    pub fn handle_failure(&mut self, process_name: &str) -> RecoveryAction {
        let retry_count = self.get_retry_count(process_name);

        if retry_count >= self.config.max_retries {
            error!(
                "Maximum restarts ({}) exceeded for {}",
                self.config.max_retries, process_name
            );
            return RecoveryAction::GiveUp;
        }

        self.retry_counts
            .insert(process_name.to_string(), retry_count + 1);

        let delay = self.calculate_delay(retry_count);

        info!(
            "Scheduling restart of {} in {:?} (attempt {}/{})",
            process_name,
            delay,
            retry_count + 1,
            self.config.max_retries
        );

        RecoveryAction::RetryAfterDelay(delay)
    }

    /// Reset the count after the process came up again
    pub fn reset_retry_count(&mut self, process_name: &str) {
        if self.retry_counts.remove(process_name).is_some() {
            info!("{} recovered, reset restart count", process_name);
        }
    }

    /// Calculate delay for retry with exponential backoff
    fn calculate_delay(&self, retry_count: u32) -> Duration {
        if !self.config.exponential_backoff {
            return self.config.base_delay;
        }

        let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .checked_mul(factor)
            .map(|delay| delay.min(self.config.max_delay))
            .unwrap_or(self.config.max_delay)
    }

    /// Get current retry count for a process
    pub fn get_retry_count(&self, process_name: &str) -> u32 {
        self.retry_counts.get(process_name).copied().unwrap_or(0)
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_manager_basic() {
        let mut manager = RecoveryManager::new();

        let action = manager.handle_failure("Server:one");
        assert_eq!(action, RecoveryAction::RetryAfterDelay(Duration::from_secs(1)));
        assert_eq!(manager.get_retry_count("Server:one"), 1);

        manager.reset_retry_count("Server:one");
        assert_eq!(manager.get_retry_count("Server:one"), 0);
    }

    #[test]
    fn test_exponential_backoff() {
        let manager = RecoveryManager::new();

        assert_eq!(manager.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(manager.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(manager.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(manager.calculate_delay(3), Duration::from_secs(8));

        // Should cap at max_delay
        assert_eq!(manager.calculate_delay(10), Duration::from_secs(60));
        assert_eq!(manager.calculate_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_max_retries_exceeded() {
        let config = RecoveryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            exponential_backoff: true,
        };
        let mut manager = RecoveryManager::with_config(config);

        assert!(matches!(
            manager.handle_failure("Server:one"),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert!(matches!(
            manager.handle_failure("Server:one"),
            RecoveryAction::RetryAfterDelay(_)
        ));
        assert_eq!(manager.handle_failure("Server:one"), RecoveryAction::GiveUp);

        // Budgets are per process
        assert!(matches!(
            manager.handle_failure("Server:two"),
            RecoveryAction::RetryAfterDelay(_)
        ));
    }
}

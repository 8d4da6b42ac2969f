use chrono::Duration;

/// Tunables for the settlement coordinator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window each round gets before the forfeit timer fires.
    pub choice_deadline: Duration,
    /// How many times retryable failures (lost version races, failed
    /// custodian transfers) are re-attempted before surfacing.
    pub settle_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            choice_deadline: Duration::seconds(60),
            settle_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Short deadlines for tests and demos.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.choice_deadline = deadline;
        self
    }
}

//! Test configuration, overridable the way the teacher's `TestConfig` reads
//! `TEST_*` environment variables instead of hardcoding defaults.

#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Bearer secret the harness configures for `/cleanup_stale_locks`.
    pub cron_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            cron_secret: std::env::var("TEST_CRON_SECRET").unwrap_or_else(|_| "test-cron-secret".to_string()),
        }
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

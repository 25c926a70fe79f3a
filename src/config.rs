use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_optional_usize(key: &str) -> Option<usize> {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub const DEFAULT_TOTAL: usize = 100_000;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Where the container keeps its records.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Postgres connection string, from `DATABASE_URL`
    pub database_url: Option<String>,
    /// Pool size for the Postgres backend
    pub max_connections: u32,
    /// Use the volatile in-memory backend and ignore `database_url`
    pub in_memory: bool,
    /// Upper bound on committed records for the in-memory backend.
    pub memory_capacity: Option<usize>,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            max_connections: env_usize("STORE_MAX_CONNECTIONS", 5).max(1) as u32,
            in_memory: env_bool("STORE_IN_MEMORY", false),
            memory_capacity: env_optional_usize("STORE_MEMORY_CAPACITY"),
        }
    }

    /// In-memory store. `STORE_MEMORY_CAPACITY` still applies.
    pub fn in_memory() -> Self {
        Self {
            database_url: None,
            max_connections: 1,
            in_memory: true,
            memory_capacity: env_optional_usize("STORE_MEMORY_CAPACITY"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shape of one bulk import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Records to create over the whole run
    pub total: usize,
    /// Records per checkpoint
    pub batch_size: usize,
    /// Extra pause after each insertion, on top of the cooperative yield.
    pub insert_delay: Duration,
    /// Title of generated records, followed by their index
    pub title_prefix: String,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            total: env_usize("IMPORT_TOTAL", DEFAULT_TOTAL),
            batch_size: env_usize("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            insert_delay: env_duration_millis("IMPORT_INSERT_DELAY_MS", 0),
            title_prefix: env_string("IMPORT_TITLE_PREFIX", "Movie"),
        }
    }

    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            total,
            batch_size,
            insert_delay: Duration::ZERO,
            title_prefix: "Movie".to_string(),
        }
    }

    /// Number of checkpoints a complete run performs.
    pub fn batch_count(&self) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.batch_size)
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_count_rounds_up_for_remainder() {
        assert_eq!(ImportConfig::new(100_000, 1_000).batch_count(), 100);
        assert_eq!(ImportConfig::new(2_500, 1_000).batch_count(), 3);
        assert_eq!(ImportConfig::new(0, 1_000).batch_count(), 0);
        assert_eq!(ImportConfig::new(10, 0).batch_count(), 0);
    }

    #[test]
    fn in_memory_config_ignores_database_url() {
        let config = StoreConfig::in_memory();
        assert!(config.in_memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.max_connections, 1);
    }
}

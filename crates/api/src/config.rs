//! Application configuration loaded from environment variables.

use engine::EngineSettings;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` or `"text"` (default: `"text"`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `WEBHOOK_SECRET`: payment webhook signing secret; unset skips verification
/// - `HOLD_TTL_MINUTES`: hold lifetime (default: `15`)
/// - `PENDING_TTL_HOURS`: how long a booking waits for its payment (default: `24`)
/// - `REAPER_INTERVAL_SECS`: reaper period (default: `60`)
/// - `CURRENCY`: currency for new bookings (default: `"usd"`)
/// - `NOTIFY_FROM`: confirmation email sender (default: `"bookings@example.com"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub webhook_secret: Option<String>,
    pub hold_ttl_minutes: i64,
    pub pending_ttl_hours: i64,
    pub reaper_interval_secs: u64,
    pub currency: String,
    pub notify_from: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse_or(
                lookup("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            ),
            webhook_secret: non_empty("WEBHOOK_SECRET"),
            hold_ttl_minutes: parse_or(lookup("HOLD_TTL_MINUTES"), defaults.hold_ttl_minutes),
            pending_ttl_hours: parse_or(lookup("PENDING_TTL_HOURS"), defaults.pending_ttl_hours),
            reaper_interval_secs: parse_or(
                lookup("REAPER_INTERVAL_SECS"),
                defaults.reaper_interval_secs,
            ),
            currency: lookup("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.currency),
            notify_from: lookup("NOTIFY_FROM").unwrap_or(defaults.notify_from),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine tunables derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            hold_ttl: chrono::Duration::minutes(self.hold_ttl_minutes),
            pending_ttl: chrono::Duration::hours(self.pending_ttl_hours),
            currency: self.currency.clone(),
            notify_from: self.notify_from.clone(),
            ..EngineSettings::default()
        }
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            database_max_connections: 10,
            webhook_secret: None,
            hold_ttl_minutes: 15,
            pending_ttl_hours: 24,
            reaper_interval_secs: 60,
            currency: "usd".to_string(),
            notify_from: "bookings@example.com".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert!(config.database_url.is_none());
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.hold_ttl_minutes, 15);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/bookings"),
            ("WEBHOOK_SECRET", "whsec_test"),
            ("HOLD_TTL_MINUTES", "10"),
            ("CURRENCY", "EUR"),
        ]);
        assert_eq!(config.port, 8080);
        assert!(config.log_json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/bookings"));
        assert_eq!(config.webhook_secret.as_deref(), Some("whsec_test"));

        let settings = config.engine_settings();
        assert_eq!(settings.hold_ttl, chrono::Duration::minutes(10));
        assert_eq!(settings.pending_ttl, chrono::Duration::hours(24));
        assert_eq!(settings.currency, "eur");
    }

    #[test]
    fn test_unparseable_and_blank_values_fall_back() {
        let config = from_pairs(&[("PORT", "not-a-port"), ("WEBHOOK_SECRET", "  ")]);
        assert_eq!(config.port, 3000);
        assert!(config.webhook_secret.is_none());
    }
}

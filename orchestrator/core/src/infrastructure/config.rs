// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection configuration and bootstrap (C10, ambient).
//!
//! Read from the environment rather than a YAML file — this crate is a
//! library, not the orchestrator binary, so it has no `aegis-config.yaml` of
//! its own to parse. Grounded in the teacher's minimal `PostgresConfig`
//! (`domain::repository::PostgresConfig`, a bare `connection_string`), but
//! expanded with the decomposed host/port/user/password/db/sslmode fields
//! the external-interfaces section of the spec calls for.

use std::env;
use std::time::Duration;

/// Either a full connection string or its decomposed parts. `dsn()` prefers
/// the former and assembles the latter into a libpq keyword=value string
/// otherwise.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub connection_string: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub sslmode: String,

    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub health_check_period_secs: u64,
    pub startup_ping_timeout_secs: u64,
}

impl DbConfig {
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 5432;
    pub const DEFAULT_USER: &'static str = "postgres";
    pub const DEFAULT_DATABASE: &'static str = "postgres";
    pub const DEFAULT_SSLMODE: &'static str = "disable";

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_HEALTH_CHECK_PERIOD_SECS: u64 = 30;
    pub const DEFAULT_STARTUP_PING_TIMEOUT_SECS: u64 = 3;

    /// A config carrying an explicit connection string; decomposed fields
    /// are left at their defaults and ignored by `dsn()`.
    pub fn from_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            connection_string: None,
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            user: Self::DEFAULT_USER.to_string(),
            password: None,
            database: Self::DEFAULT_DATABASE.to_string(),
            sslmode: Self::DEFAULT_SSLMODE.to_string(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            min_connections: Self::DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: Self::DEFAULT_CONNECT_TIMEOUT_SECS,
            health_check_period_secs: Self::DEFAULT_HEALTH_CHECK_PERIOD_SECS,
            startup_ping_timeout_secs: Self::DEFAULT_STARTUP_PING_TIMEOUT_SECS,
        }
    }

    /// Read `DATABASE_URL` if present (takes precedence), else the
    /// decomposed `AEGIS_DB_*` variables, falling back to the documented
    /// defaults for anything unset. Pool-tuning variables apply regardless
    /// of which connection form is used.
    pub fn from_env() -> Self {
        let mut config = match env::var("DATABASE_URL") {
            Ok(url) => Self::from_connection_string(url),
            Err(_) => {
                let mut config = Self::defaults();
                if let Ok(host) = env::var("AEGIS_DB_HOST") {
                    config.host = host;
                }
                if let Ok(port) = env::var("AEGIS_DB_PORT") {
                    if let Ok(port) = port.parse() {
                        config.port = port;
                    }
                }
                if let Ok(user) = env::var("AEGIS_DB_USER") {
                    config.user = user;
                }
                if let Ok(password) = env::var("AEGIS_DB_PASSWORD") {
                    config.password = Some(password);
                }
                if let Ok(database) = env::var("AEGIS_DB_NAME") {
                    config.database = database;
                }
                if let Ok(sslmode) = env::var("AEGIS_DB_SSLMODE") {
                    config.sslmode = sslmode;
                }
                config
            }
        };

        if let Ok(raw) = env::var("AEGIS_DB_MAX_CONNECTIONS") {
            if let Ok(value) = raw.parse() {
                config.max_connections = value;
            }
        }
        if let Ok(raw) = env::var("AEGIS_DB_MIN_CONNECTIONS") {
            if let Ok(value) = raw.parse() {
                config.min_connections = value;
            }
        }
        if let Ok(raw) = env::var("AEGIS_DB_CONNECT_TIMEOUT_SECS") {
            if let Ok(value) = raw.parse() {
                config.connect_timeout_secs = value;
            }
        }

        config
    }

    /// The explicit connection string if set, else a libpq-compatible
    /// keyword=value string assembled from the decomposed fields.
    pub fn dsn(&self) -> String {
        if let Some(connection_string) = &self.connection_string {
            return connection_string.clone();
        }

        let mut parts = vec![
            format!("host={}", self.host),
            format!("port={}", self.port),
            format!("user={}", self.user),
            format!("dbname={}", self.database),
            format!("sslmode={}", self.sslmode),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={password}"));
        }
        parts.join(" ")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn health_check_period(&self) -> Duration {
        Duration::from_secs(self.health_check_period_secs)
    }

    pub fn startup_ping_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_ping_timeout_secs)
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_sane_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.min_connections, DbConfig::DEFAULT_MIN_CONNECTIONS);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.user, "postgres");
        assert_eq!(config.database, "postgres");
        assert_eq!(config.sslmode, "disable");
    }

    #[test]
    fn with_max_connections_overrides_default() {
        let config = DbConfig::default().with_max_connections(50);
        assert_eq!(config.max_connections, 50);
    }

    #[test]
    fn dsn_prefers_explicit_connection_string() {
        let config = DbConfig::from_connection_string("postgres://localhost/aegis");
        assert_eq!(config.dsn(), "postgres://localhost/aegis");
    }

    #[test]
    fn dsn_assembles_keyword_value_string_from_decomposed_fields() {
        let config = DbConfig::default();
        let dsn = config.dsn();
        assert!(dsn.contains("host=localhost"));
        assert!(dsn.contains("port=5432"));
        assert!(dsn.contains("user=postgres"));
        assert!(dsn.contains("dbname=postgres"));
        assert!(dsn.contains("sslmode=disable"));
        assert!(!dsn.contains("password="));
    }

    #[test]
    fn dsn_includes_password_when_set() {
        let mut config = DbConfig::default();
        config.password = Some("hunter2".to_string());
        assert!(config.dsn().contains("password=hunter2"));
    }
}

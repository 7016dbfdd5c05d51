//! Server configuration loaded from environment variables

use crate::session::SessionConfig;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP/WebSocket server listens on
    pub bind: SocketAddr,
    /// Artificial delay before store changes reach subscribers
    pub store_propagation_delay: Duration,
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.parse().unwrap_or(SocketAddr::from(([0, 0, 0, 0], 8080))),
            store_propagation_delay: Duration::ZERO,
            session: SessionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind = match std::env::var("CATHERD_BIND") {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid CATHERD_BIND {:?}, using {}", value, defaults.bind);
                defaults.bind
            }),
            Err(_) => defaults.bind,
        };

        let store_propagation_delay =
            millis_from_env("CATHERD_STORE_DELAY_MS", defaults.store_propagation_delay);
        let boot_grace = millis_from_env("CATHERD_BOOT_GRACE_MS", defaults.session.boot_grace);
        let eviction_delay =
            millis_from_env("CATHERD_EVICTION_DELAY_MS", defaults.session.eviction_delay);

        let admin_only_round_control = std::env::var("CATHERD_ADMIN_ONLY_ROUNDS")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(defaults.session.admin_only_round_control);

        if boot_grace <= store_propagation_delay {
            tracing::warn!(
                "Boot grace period ({:?}) does not exceed store propagation delay ({:?}); \
                 booted players may briefly reappear",
                boot_grace,
                store_propagation_delay
            );
        }

        tracing::info!(
            %bind,
            ?store_propagation_delay,
            ?boot_grace,
            ?eviction_delay,
            admin_only_round_control,
            "Config loaded"
        );

        Self {
            bind,
            store_propagation_delay,
            session: SessionConfig {
                boot_grace,
                eviction_delay,
                admin_only_round_control,
            },
        }
    }
}

fn millis_from_env(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                tracing::warn!("Invalid {} {:?}, using {:?}", key, value, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "CATHERD_BIND",
        "CATHERD_STORE_DELAY_MS",
        "CATHERD_BOOT_GRACE_MS",
        "CATHERD_EVICTION_DELAY_MS",
        "CATHERD_ADMIN_ONLY_ROUNDS",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = AppConfig::from_env();

        assert_eq!(config.bind, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.store_propagation_delay, Duration::ZERO);
        assert_eq!(config.session.boot_grace, Duration::from_millis(1500));
        assert_eq!(config.session.eviction_delay, Duration::from_secs(3));
        assert!(!config.session.admin_only_round_control);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("CATHERD_BIND", "127.0.0.1:9000");
        std::env::set_var("CATHERD_BOOT_GRACE_MS", "2500");
        std::env::set_var("CATHERD_ADMIN_ONLY_ROUNDS", "true");

        let config = AppConfig::from_env();
        clear_env();

        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.session.boot_grace, Duration::from_millis(2500));
        assert!(config.session.admin_only_round_control);
    }

    #[test]
    #[serial]
    fn test_malformed_values_fall_back() {
        clear_env();
        std::env::set_var("CATHERD_BIND", "not an address");
        std::env::set_var("CATHERD_EVICTION_DELAY_MS", "soon");

        let config = AppConfig::from_env();
        clear_env();

        assert_eq!(config.bind, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.session.eviction_delay, Duration::from_secs(3));
    }
}

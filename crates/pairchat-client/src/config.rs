//! Client configuration loaded from environment variables.
//!
//! Everything has a default, so the client starts with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use pairchat_media::PeerConfig;

/// Client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `PAIRCHAT_DB_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Settings for every peer session the client creates.
    /// Env: `PAIRCHAT_STUN_SERVERS` (comma separated, empty for none),
    /// `PAIRCHAT_ICE_GATHER_TIMEOUT_MS`
    pub peer: PeerConfig,
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("PAIRCHAT_DB_PATH") {
            if !path.trim().is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(servers) = lookup("PAIRCHAT_STUN_SERVERS") {
            config.peer.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(val) = lookup("PAIRCHAT_ICE_GATHER_TIMEOUT_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.peer.gather_timeout = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid PAIRCHAT_ICE_GATHER_TIMEOUT_MS, using default"
                    );
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert!(config.db_path.is_none());
        assert_eq!(config.peer.ice_servers.len(), 2);
        assert_eq!(config.peer.gather_timeout, Duration::from_secs(5));
    }

    #[test]
    fn overrides_from_env() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PAIRCHAT_DB_PATH", "/tmp/chat.db"),
            ("PAIRCHAT_STUN_SERVERS", "stun:a.example:3478, stun:b.example:3478"),
            ("PAIRCHAT_ICE_GATHER_TIMEOUT_MS", "1500"),
        ]));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/chat.db")));
        assert_eq!(
            config.peer.ice_servers,
            vec!["stun:a.example:3478", "stun:b.example:3478"]
        );
        assert_eq!(config.peer.gather_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn empty_stun_list_means_none() {
        let config = ClientConfig::from_lookup(lookup(&[("PAIRCHAT_STUN_SERVERS", "")]));
        assert!(config.peer.ice_servers.is_empty());
    }

    #[test]
    fn invalid_timeout_keeps_default() {
        let config =
            ClientConfig::from_lookup(lookup(&[("PAIRCHAT_ICE_GATHER_TIMEOUT_MS", "soon")]));
        assert_eq!(config.peer.gather_timeout, Duration::from_secs(5));
    }
}

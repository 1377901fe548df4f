use std::time::Duration;

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

use pairchat_shared::constants::{DATA_CHANNEL_LABEL, DEFAULT_STUN_SERVERS, ICE_GATHER_TIMEOUT_MS};

/// Settings for one [`PeerSession`](crate::PeerSession).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// STUN server URLs. No TURN relay is configured.
    pub ice_servers: Vec<String>,
    /// Upper bound on candidate gathering before the local description is
    /// returned as-is.
    pub gather_timeout: Duration,
    pub channel_label: String,
    /// Offer loopback host candidates. Only useful for in-process tests.
    pub include_loopback: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            gather_timeout: Duration::from_millis(ICE_GATHER_TIMEOUT_MS),
            channel_label: DATA_CHANNEL_LABEL.to_string(),
            include_loopback: false,
        }
    }
}

impl PeerConfig {
    /// No STUN servers and loopback candidates enabled: two sessions in the
    /// same process can reach each other without network access.
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            gather_timeout: Duration::from_secs(2),
            include_loopback: true,
            ..Self::default()
        }
    }

    pub(crate) fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_public_stun() {
        let config = PeerConfig::default();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.gather_timeout, Duration::from_secs(5));
        assert_eq!(config.channel_label, "chat");

        let rtc = config.rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 1);
        assert_eq!(rtc.ice_servers[0].urls.len(), 2);
    }

    #[test]
    fn local_only_has_no_servers() {
        let rtc = PeerConfig::local_only().rtc_configuration();
        assert!(rtc.ice_servers.is_empty());
    }
}

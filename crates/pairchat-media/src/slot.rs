use tokio::sync::Mutex;
use tracing::debug;

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::peer::PeerSession;

/// Owner of the one live [`PeerSession`].
///
/// Callers get a handle to the current session, or ask for a fresh one when
/// reconnecting. Replacing a session disconnects the previous one.
pub struct ConnectionSlot {
    config: PeerConfig,
    current: Mutex<Option<PeerSession>>,
}

impl ConnectionSlot {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// The current session, created on first use.
    pub async fn get_or_create(&self) -> Result<PeerSession, PeerError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }
        let session = PeerSession::new(self.config.clone()).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    pub async fn current(&self) -> Option<PeerSession> {
        self.current.lock().await.clone()
    }

    /// Disconnect the current session, if any, and leave the slot empty.
    pub async fn reset(&self) {
        let old = self.current.lock().await.take();
        if let Some(old) = old {
            debug!("Tearing down previous session");
            old.disconnect().await;
        }
    }

    /// Disconnect the current session and install a brand-new one.
    pub async fn replace(&self) -> Result<PeerSession, PeerError> {
        self.reset().await;
        self.get_or_create().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_shared::types::ConnectionState;

    #[tokio::test]
    async fn get_or_create_reuses_the_session() {
        let slot = ConnectionSlot::new(PeerConfig::local_only());
        assert!(slot.current().await.is_none());

        let a = slot.get_or_create().await.unwrap();
        let b = slot.get_or_create().await.unwrap();
        assert!(PeerSession::same(&a, &b));

        slot.reset().await;
    }

    #[tokio::test]
    async fn replace_disconnects_the_old_session() {
        let slot = ConnectionSlot::new(PeerConfig::local_only());
        let old = slot.get_or_create().await.unwrap();
        let new = slot.replace().await.unwrap();

        assert!(!PeerSession::same(&old, &new));
        assert_eq!(old.connection_state(), ConnectionState::Disconnected);
        assert_ne!(new.connection_state(), ConnectionState::Disconnected);

        let current = slot.current().await.unwrap();
        assert!(PeerSession::same(&current, &new));
        slot.reset().await;
        assert!(slot.current().await.is_none());
    }
}

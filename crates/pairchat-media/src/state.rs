//! Connection state fusion.
//!
//! The observable [`ConnectionState`] is never stored. It is computed from
//! the transport's ICE state and the chat channel's ready state, with an open
//! channel taking priority over whatever ICE reports at that moment.

use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

use pairchat_shared::types::ConnectionState;

/// Fuse the transport and channel states.
///
/// `ice` is `None` when there is no peer connection (never created or torn
/// down); `channel` is `None` when no data channel exists yet.
///
/// | condition                         | result         |
/// |-----------------------------------|----------------|
/// | no peer connection                | `Disconnected` |
/// | channel `open`                    | `Connected`    |
/// | ICE `connected` / `completed`     | `Connected`    |
/// | ICE `new` / `checking`            | `Connecting`   |
/// | ICE `failed`                      | `Failed`       |
/// | anything else                     | `Disconnected` |
pub fn fuse_state(
    ice: Option<RTCIceConnectionState>,
    channel: Option<RTCDataChannelState>,
) -> ConnectionState {
    let Some(ice) = ice else {
        return ConnectionState::Disconnected;
    };

    if channel == Some(RTCDataChannelState::Open) {
        return ConnectionState::Connected;
    }

    match ice {
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            ConnectionState::Connected
        }
        RTCIceConnectionState::New | RTCIceConnectionState::Checking => ConnectionState::Connecting,
        RTCIceConnectionState::Failed => ConnectionState::Failed,
        _ => ConnectionState::Disconnected,
    }
}

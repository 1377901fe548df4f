/// Application name
pub const APP_NAME: &str = "pairchat";

/// Public STUN servers used for candidate gathering. There is no TURN relay,
/// so peers behind symmetric NATs may never connect.
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Upper bound on candidate gathering before the local description is
/// shared as-is (milliseconds).
pub const ICE_GATHER_TIMEOUT_MS: u64 = 5_000;

/// Label of the single chat data channel
pub const DATA_CHANNEL_LABEL: &str = "chat";

/// Name given to a chat session before the user renames it
pub const DEFAULT_CONTACT_NAME: &str = "P2P Contact";

/// Maximum image attachment size in bytes (10 MiB)
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Maximum video attachment size in bytes (50 MiB)
pub const MAX_VIDEO_SIZE: usize = 50 * 1024 * 1024;

/// Maximum recorded voice clip size in bytes (5 MiB)
pub const MAX_AUDIO_SIZE: usize = 5 * 1024 * 1024;

/// Maximum recorded voice clip length in seconds
pub const MAX_VOICE_DURATION_SECS: f64 = 120.0;

/// Capacity of the call transition broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

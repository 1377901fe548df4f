//! # pairchat-client
//!
//! Session reconciliation and the event driver behind the `pairchat`
//! terminal client.

pub mod config;
pub mod driver;
pub mod error;
pub mod reconciler;

use pairchat_store::Database;

pub use config::ClientConfig;
pub use driver::{Command, Driver, Notice};
pub use error::{ClientError, Result};
pub use reconciler::{PeerLink, Reconnection, SessionReconciler};

/// Open the database named by `config`, or the platform default.
pub fn open_database(config: &ClientConfig) -> Result<Database> {
    match &config.db_path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            tracing::info!(path = %path.display(), "opening database");
            Ok(Database::open_at(path)?)
        }
        None => Ok(Database::new()?),
    }
}

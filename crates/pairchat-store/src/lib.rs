//! # pairchat-store
//!
//! Local persistence for pairchat, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers for every domain model, and
//! the [`ChatStore`] trait naming the read/write contract the session layer
//! relies on.

pub mod backup;
pub mod chat_store;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod sessions;
pub mod settings;

mod error;

pub use backup::{ExportDocument, ImportStats};
pub use chat_store::ChatStore;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

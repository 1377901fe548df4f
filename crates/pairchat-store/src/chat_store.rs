//! The read/write contract the session layer relies on.

use chrono::{DateTime, Utc};

use pairchat_shared::types::ContactId;

use crate::backup::ImportStats;
use crate::database::Database;
use crate::error::Result;
use crate::models::{ChatSession, Contact, Message, SavedContact};

/// Persistent storage of chat sessions, contacts and connection codes.
///
/// [`Database`] is the production implementation.
pub trait ChatStore {
    // Sessions and messages
    fn get_messages(&self, contact_id: &ContactId) -> Result<Vec<Message>>;
    fn add_message(&self, contact_id: &ContactId, message: &Message) -> Result<()>;
    fn get_chat_session(&self, contact_id: &ContactId) -> Result<Option<ChatSession>>;
    fn ensure_chat_session(&self, contact_id: &ContactId, contact_name: &str) -> Result<ChatSession>;
    fn save_chat_session(&self, session: &ChatSession) -> Result<()>;
    fn rename_chat_session(&self, contact_id: &ContactId, name: &str) -> Result<bool>;
    fn delete_chat_session(&self, contact_id: &ContactId) -> Result<bool>;
    fn list_chat_sessions(&self) -> Result<Vec<ChatSession>>;

    // Saved contacts
    fn get_saved_contact(&self, contact_id: &ContactId) -> Result<Option<SavedContact>>;
    fn save_saved_contact(&self, contact: &SavedContact) -> Result<()>;
    fn delete_saved_contact(&self, contact_id: &ContactId) -> Result<bool>;
    fn rename_saved_contact(&self, contact_id: &ContactId, name: &str) -> Result<bool>;
    fn set_answer_code(&self, contact_id: &ContactId, answer_code: &str) -> Result<()>;
    fn touch_last_connected(&self, contact_id: &ContactId, at: DateTime<Utc>) -> Result<bool>;
    fn list_saved_contacts(&self) -> Result<Vec<SavedContact>>;

    // Presence
    fn update_contact_status(&self, contact_id: &ContactId, name: &str, is_online: bool) -> Result<()>;
    fn list_contacts(&self) -> Result<Vec<Contact>>;

    // Current session pointer
    fn get_current_session(&self) -> Result<Option<ContactId>>;
    fn set_current_session(&self, contact_id: &ContactId) -> Result<()>;
    fn clear_current_session(&self) -> Result<()>;

    // Whole-store operations
    fn export_data(&self) -> Result<String>;
    fn import_data(&self, json: &str) -> Result<ImportStats>;
    fn clear_all_data(&self) -> Result<()>;
}

impl ChatStore for Database {
    fn get_messages(&self, contact_id: &ContactId) -> Result<Vec<Message>> {
        Database::get_messages(self, contact_id)
    }

    fn add_message(&self, contact_id: &ContactId, message: &Message) -> Result<()> {
        Database::add_message(self, contact_id, message)
    }

    fn get_chat_session(&self, contact_id: &ContactId) -> Result<Option<ChatSession>> {
        Database::get_chat_session(self, contact_id)
    }

    fn ensure_chat_session(&self, contact_id: &ContactId, contact_name: &str) -> Result<ChatSession> {
        Database::ensure_chat_session(self, contact_id, contact_name)
    }

    fn save_chat_session(&self, session: &ChatSession) -> Result<()> {
        Database::save_chat_session(self, session)
    }

    fn rename_chat_session(&self, contact_id: &ContactId, name: &str) -> Result<bool> {
        Database::rename_chat_session(self, contact_id, name)
    }

    fn delete_chat_session(&self, contact_id: &ContactId) -> Result<bool> {
        Database::delete_chat_session(self, contact_id)
    }

    fn list_chat_sessions(&self) -> Result<Vec<ChatSession>> {
        Database::list_chat_sessions(self)
    }

    fn get_saved_contact(&self, contact_id: &ContactId) -> Result<Option<SavedContact>> {
        Database::get_saved_contact(self, contact_id)
    }

    fn save_saved_contact(&self, contact: &SavedContact) -> Result<()> {
        Database::save_contact(self, contact)
    }

    fn delete_saved_contact(&self, contact_id: &ContactId) -> Result<bool> {
        Database::delete_saved_contact(self, contact_id)
    }

    fn rename_saved_contact(&self, contact_id: &ContactId, name: &str) -> Result<bool> {
        Database::rename_saved_contact(self, contact_id, name)
    }

    fn set_answer_code(&self, contact_id: &ContactId, answer_code: &str) -> Result<()> {
        Database::set_answer_code(self, contact_id, answer_code)
    }

    fn touch_last_connected(&self, contact_id: &ContactId, at: DateTime<Utc>) -> Result<bool> {
        Database::touch_last_connected(self, contact_id, at)
    }

    fn list_saved_contacts(&self) -> Result<Vec<SavedContact>> {
        Database::list_saved_contacts(self)
    }

    fn update_contact_status(&self, contact_id: &ContactId, name: &str, is_online: bool) -> Result<()> {
        Database::update_contact_status(self, contact_id, name, is_online)
    }

    fn list_contacts(&self) -> Result<Vec<Contact>> {
        Database::list_contacts(self)
    }

    fn get_current_session(&self) -> Result<Option<ContactId>> {
        Database::get_current_session(self)
    }

    fn set_current_session(&self, contact_id: &ContactId) -> Result<()> {
        Database::set_current_session(self, contact_id)
    }

    fn clear_current_session(&self) -> Result<()> {
        Database::clear_current_session(self)
    }

    fn export_data(&self) -> Result<String> {
        Database::export_data(self)
    }

    fn import_data(&self, json: &str) -> Result<ImportStats> {
        Database::import_data(self, json)
    }

    fn clear_all_data(&self) -> Result<()> {
        Database::clear_all_data(self)
    }
}

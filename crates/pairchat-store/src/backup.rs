//! JSON export and import of the whole local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contacts::{write_contact, write_saved_contact};
use crate::database::Database;
use crate::error::Result;
use crate::models::{ChatSession, Contact, SavedContact};
use crate::sessions::write_session;

/// Backup document. Collections that are absent on import are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<ChatSession>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<Contact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_contacts: Option<Vec<SavedContact>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub sessions_imported: usize,
    pub messages_imported: usize,
    pub contacts_imported: usize,
    pub saved_contacts_imported: usize,
}

impl Database {
    /// Collect every session, contact and saved contact into a document.
    pub fn export_document(&self) -> Result<ExportDocument> {
        Ok(ExportDocument {
            sessions: Some(self.list_chat_sessions()?),
            contacts: Some(self.list_contacts()?),
            saved_contacts: Some(self.list_saved_contacts()?),
            export_date: Some(Utc::now()),
        })
    }

    /// Pretty-printed JSON backup.
    pub fn export_data(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_document()?)?)
    }

    /// Parse a JSON backup and import it. Nothing is changed when the text is
    /// not a valid document.
    pub fn import_data(&self, json: &str) -> Result<ImportStats> {
        let doc: ExportDocument = serde_json::from_str(json)?;
        self.import_document(&doc)
    }

    /// Replace each collection present in `doc` wholesale, in one transaction.
    pub fn import_document(&self, doc: &ExportDocument) -> Result<ImportStats> {
        let mut stats = ImportStats::default();
        let tx = self.conn().unchecked_transaction()?;

        if let Some(sessions) = &doc.sessions {
            tx.execute("DELETE FROM chat_sessions", [])?;
            for session in sessions {
                write_session(&tx, session)?;
                stats.sessions_imported += 1;
                stats.messages_imported += session.messages.len();
            }
        }

        if let Some(contacts) = &doc.contacts {
            tx.execute("DELETE FROM contacts", [])?;
            for contact in contacts {
                write_contact(&tx, contact)?;
                stats.contacts_imported += 1;
            }
        }

        if let Some(saved) = &doc.saved_contacts {
            tx.execute("DELETE FROM saved_contacts", [])?;
            for contact in saved {
                write_saved_contact(&tx, contact)?;
                stats.saved_contacts_imported += 1;
            }
        }

        tx.commit()?;
        tracing::info!(?stats, "backup imported");
        Ok(stats)
    }

    /// Remove sessions, messages, contacts, saved contacts and the current
    /// session pointer.
    pub fn clear_all_data(&self) -> Result<()> {
        self.conn().execute_batch(
            "BEGIN;
             DELETE FROM messages;
             DELETE FROM chat_sessions;
             DELETE FROM contacts;
             DELETE FROM saved_contacts;
             DELETE FROM app_settings;
             COMMIT;",
        )?;
        tracing::info!("all local data cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_db;
    use crate::error::StoreError;
    use crate::models::Message;
    use pairchat_shared::types::{Author, ContactId, Role};

    fn seed(db: &Database) -> ContactId {
        let id = ContactId::from("peer-seed");
        db.ensure_chat_session(&id, "Seed").unwrap();
        db.add_message(&id, &Message::text(Author::Me, "hello")).unwrap();
        db.add_message(&id, &Message::text(Author::Peer, "hey")).unwrap();
        db.update_contact_status(&id, "Seed", false).unwrap();
        db.save_contact(&SavedContact::new(id.clone(), "Seed", Role::Initiator, "ans".into()))
            .unwrap();
        id
    }

    #[test]
    fn export_then_import_into_fresh_store() {
        let (_d1, source) = temp_db();
        let id = seed(&source);
        let json = source.export_data().unwrap();
        assert!(json.contains("exportDate"));
        assert!(json.contains("savedContacts"));

        let (_d2, target) = temp_db();
        let stats = target.import_data(&json).unwrap();
        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.messages_imported, 2);
        assert_eq!(stats.saved_contacts_imported, 1);

        let session = target.get_chat_session(&id).unwrap().unwrap();
        let texts: Vec<_> = session.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "hey"]);
        assert!(target.get_saved_contact(&id).unwrap().is_some());
    }

    #[test]
    fn import_leaves_missing_collections() {
        let (_dir, db) = temp_db();
        let id = seed(&db);

        let stats = db.import_data(r#"{"contacts": []}"#).unwrap();
        assert_eq!(stats.contacts_imported, 0);
        assert!(db.list_contacts().unwrap().is_empty());
        assert!(db.get_chat_session(&id).unwrap().is_some());
        assert!(db.get_saved_contact(&id).unwrap().is_some());
    }

    #[test]
    fn invalid_json_changes_nothing() {
        let (_dir, db) = temp_db();
        let id = seed(&db);
        let err = db.import_data("not json").unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
        assert_eq!(db.count_messages(&id).unwrap(), 2);
    }

    #[test]
    fn clear_all_data_empties_store() {
        let (_dir, db) = temp_db();
        let id = seed(&db);
        db.set_current_session(&id).unwrap();

        db.clear_all_data().unwrap();
        assert!(db.list_chat_sessions().unwrap().is_empty());
        assert!(db.list_saved_contacts().unwrap().is_empty());
        assert!(db.get_current_session().unwrap().is_none());
    }
}

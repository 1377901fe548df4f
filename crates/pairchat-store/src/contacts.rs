//! Saved contacts (reconnection codes) and the contact presence summary.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use pairchat_shared::types::{ContactId, Role};

use crate::database::{not_found, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{Contact, SavedContact};

const SAVED_COLUMNS: &str =
    "id, name, offer_code, answer_code, my_role, created_at, last_connected";

impl Database {
    // ------------------------------------------------------------------
    // Saved contacts
    // ------------------------------------------------------------------

    /// Insert or replace a saved contact.
    pub fn save_contact(&self, contact: &SavedContact) -> Result<()> {
        write_saved_contact(self.conn(), contact)?;
        tracing::debug!(contact = %contact.id, role = contact.my_role.as_str(), "contact saved");
        Ok(())
    }

    pub fn get_saved_contact(&self, id: &ContactId) -> Result<Option<SavedContact>> {
        let sql = format!("SELECT {SAVED_COLUMNS} FROM saved_contacts WHERE id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![id.as_str()], row_to_saved_contact)
            .optional()?)
    }

    /// All saved contacts, most recently created first.
    pub fn list_saved_contacts(&self) -> Result<Vec<SavedContact>> {
        let sql = format!("SELECT {SAVED_COLUMNS} FROM saved_contacts ORDER BY created_at DESC");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], row_to_saved_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    /// Rename a saved contact. Returns `true` if it existed.
    pub fn rename_saved_contact(&self, id: &ContactId, name: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE saved_contacts SET name = ?2 WHERE id = ?1",
            params![id.as_str(), name],
        )?;
        Ok(affected > 0)
    }

    /// Overwrite the stored answer code (receiver side after a reconnection).
    pub fn set_answer_code(&self, id: &ContactId, answer_code: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE saved_contacts SET answer_code = ?2 WHERE id = ?1",
            params![id.as_str(), answer_code],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Stamp the last successful connection time. A missing contact is not
    /// an error: unsaved peers have no row to update.
    pub fn touch_last_connected(&self, id: &ContactId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE saved_contacts SET last_connected = ?2 WHERE id = ?1",
            params![id.as_str(), at.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Remove a saved contact together with its chat session and presence
    /// entry.
    pub fn delete_saved_contact(&self, id: &ContactId) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;
        let affected = tx.execute("DELETE FROM saved_contacts WHERE id = ?1", params![id.as_str()])?;
        tx.execute("DELETE FROM chat_sessions WHERE contact_id = ?1", params![id.as_str()])?;
        tx.execute("DELETE FROM contacts WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Presence summary
    // ------------------------------------------------------------------

    /// Upsert the presence entry for a contact. The last-message preview is
    /// left as is.
    pub fn update_contact_status(&self, id: &ContactId, name: &str, is_online: bool) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (id, name, is_online) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, is_online = excluded.is_online",
            params![id.as_str(), name, is_online],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, id: &ContactId) -> Result<Contact> {
        self.conn()
            .query_row(
                "SELECT id, name, is_online, last_message, last_message_time
                 FROM contacts WHERE id = ?1",
                params![id.as_str()],
                row_to_contact,
            )
            .map_err(not_found)
    }

    /// Presence entries, most recent activity first.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, is_online, last_message, last_message_time
             FROM contacts
             ORDER BY last_message_time IS NULL, last_message_time DESC, name ASC",
        )?;
        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }
}

pub(crate) fn write_saved_contact(conn: &Connection, contact: &SavedContact) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO saved_contacts
             (id, name, offer_code, answer_code, my_role, created_at, last_connected)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            contact.id.as_str(),
            contact.name,
            contact.offer_code,
            contact.answer_code,
            contact.my_role.as_str(),
            contact.created_at.to_rfc3339(),
            contact.last_connected.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub(crate) fn write_contact(conn: &Connection, contact: &Contact) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO contacts (id, name, is_online, last_message, last_message_time)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            contact.id.as_str(),
            contact.name,
            contact.is_online,
            contact.last_message,
            contact.last_message_time.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn row_to_saved_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedContact> {
    let id: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    let created: String = row.get(5)?;
    let last_connected: Option<String> = row.get(6)?;

    let my_role = Role::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown role {role_str:?}").into(),
        )
    })?;

    Ok(SavedContact {
        id: ContactId(id),
        name: row.get(1)?,
        offer_code: row.get(2)?,
        answer_code: row.get(3)?,
        my_role,
        created_at: parse_timestamp(5, &created)?,
        last_connected: last_connected
            .map(|s| parse_timestamp(6, &s))
            .transpose()?,
    })
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id: String = row.get(0)?;
    let last_time: Option<String> = row.get(4)?;
    Ok(Contact {
        id: ContactId(id),
        name: row.get(1)?,
        is_online: row.get(2)?,
        last_message: row.get(3)?,
        last_message_time: last_time.map(|s| parse_timestamp(4, &s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_db;

    #[test]
    fn saved_contact_crud() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-x");
        let contact = SavedContact::new(id.clone(), "Xavier", Role::Initiator, "answer-1".into());
        db.save_contact(&contact).unwrap();

        let loaded = db.get_saved_contact(&id).unwrap().unwrap();
        assert_eq!(loaded.my_role, Role::Initiator);
        assert_eq!(loaded.answer_code.as_deref(), Some("answer-1"));

        assert!(db.rename_saved_contact(&id, "X").unwrap());
        db.set_answer_code(&id, "answer-2").unwrap();
        let loaded = db.get_saved_contact(&id).unwrap().unwrap();
        assert_eq!(loaded.name, "X");
        assert_eq!(loaded.answer_code.as_deref(), Some("answer-2"));

        assert_eq!(db.list_saved_contacts().unwrap().len(), 1);
    }

    #[test]
    fn set_code_on_missing_contact_is_not_found() {
        let (_dir, db) = temp_db();
        let err = db
            .set_answer_code(&ContactId::from("peer-none"), "a")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn touch_last_connected_only_for_saved() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-t");
        assert!(!db.touch_last_connected(&id, Utc::now()).unwrap());

        db.save_contact(&SavedContact::new(id.clone(), "T", Role::Receiver, "offer".into()))
            .unwrap();
        assert!(db.touch_last_connected(&id, Utc::now()).unwrap());
        assert!(db
            .get_saved_contact(&id)
            .unwrap()
            .unwrap()
            .last_connected
            .is_some());
    }

    #[test]
    fn delete_saved_contact_removes_session() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-d");
        db.save_contact(&SavedContact::new(id.clone(), "D", Role::Receiver, "offer".into()))
            .unwrap();
        db.ensure_chat_session(&id, "D").unwrap();

        assert!(db.delete_saved_contact(&id).unwrap());
        assert!(db.get_saved_contact(&id).unwrap().is_none());
        assert!(db.get_chat_session(&id).unwrap().is_none());
    }

    #[test]
    fn contact_status_upsert() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-s");
        db.update_contact_status(&id, "S", true).unwrap();
        assert!(db.get_contact(&id).unwrap().is_online);

        db.update_contact_status(&id, "S", false).unwrap();
        let contacts = db.list_contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert!(!contacts[0].is_online);
    }
}

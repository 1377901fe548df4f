//! CRUD operations for [`ChatSession`] records.

use rusqlite::{params, Connection, OptionalExtension};

use pairchat_shared::types::ContactId;

use crate::database::{parse_timestamp, Database};
use crate::error::Result;
use crate::messages::{insert_message, load_messages};
use crate::models::ChatSession;

impl Database {
    // ------------------------------------------------------------------
    // Create / replace
    // ------------------------------------------------------------------

    /// Store a session, replacing any existing session with the same contact
    /// id together with its message history.
    pub fn save_chat_session(&self, session: &ChatSession) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        write_session(&tx, session)?;
        tx.commit()?;
        Ok(())
    }

    /// Return the session for `contact_id`, creating an empty one named
    /// `contact_name` when none exists. An existing session is returned
    /// untouched.
    pub fn ensure_chat_session(&self, contact_id: &ContactId, contact_name: &str) -> Result<ChatSession> {
        if let Some(existing) = self.get_chat_session(contact_id)? {
            return Ok(existing);
        }
        let session = ChatSession::new(contact_id.clone(), contact_name);
        self.save_chat_session(&session)?;
        tracing::debug!(contact = %contact_id, "chat session created");
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a session with its full message history.
    pub fn get_chat_session(&self, contact_id: &ContactId) -> Result<Option<ChatSession>> {
        get_session(self.conn(), contact_id)
    }

    /// All sessions with their histories, newest first.
    pub fn list_chat_sessions(&self) -> Result<Vec<ChatSession>> {
        let ids: Vec<String> = {
            let mut stmt = self
                .conn()
                .prepare("SELECT contact_id FROM chat_sessions ORDER BY created_at DESC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = get_session(self.conn(), &ContactId(id))? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Change the display name of a session. Returns `true` if a row changed.
    pub fn rename_chat_session(&self, contact_id: &ContactId, name: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_sessions SET contact_name = ?2 WHERE contact_id = ?1",
            params![contact_id.as_str(), name],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a session and, via cascade, its messages.
    pub fn delete_chat_session(&self, contact_id: &ContactId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_sessions WHERE contact_id = ?1",
            params![contact_id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

pub(crate) fn write_session(conn: &Connection, session: &ChatSession) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_sessions (contact_id, contact_name, created_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(contact_id) DO UPDATE SET
             contact_name = excluded.contact_name,
             created_at   = excluded.created_at",
        params![
            session.contact_id.as_str(),
            session.contact_name,
            session.created_at.to_rfc3339(),
        ],
    )?;
    conn.execute(
        "DELETE FROM messages WHERE contact_id = ?1",
        params![session.contact_id.as_str()],
    )?;
    for message in &session.messages {
        insert_message(conn, &session.contact_id, message)?;
    }
    Ok(())
}

fn get_session(conn: &Connection, contact_id: &ContactId) -> Result<Option<ChatSession>> {
    let header = conn
        .query_row(
            "SELECT contact_name, created_at FROM chat_sessions WHERE contact_id = ?1",
            params![contact_id.as_str()],
            |row| {
                let name: String = row.get(0)?;
                let created: String = row.get(1)?;
                Ok((name, parse_timestamp(1, &created)?))
            },
        )
        .optional()?;

    let Some((contact_name, created_at)) = header else {
        return Ok(None);
    };

    Ok(Some(ChatSession {
        contact_id: contact_id.clone(),
        contact_name,
        messages: load_messages(conn, contact_id)?,
        created_at,
    }))
}

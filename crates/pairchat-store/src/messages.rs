//! Append-only message log, one stream per chat session.

use rusqlite::{params, Connection};

use pairchat_shared::types::{Author, ContactId};

use crate::database::{parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageContent};

impl Database {
    /// Append a message to the session's history.
    ///
    /// Fails with [`StoreError::NotFound`] when no session exists for
    /// `contact_id`. The contact's last-message preview is refreshed in the
    /// same transaction.
    pub fn add_message(&self, contact_id: &ContactId, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM chat_sessions WHERE contact_id = ?1)",
            params![contact_id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound);
        }

        insert_message(&tx, contact_id, message)?;
        tx.execute(
            "UPDATE contacts SET last_message = ?2, last_message_time = ?3 WHERE id = ?1",
            params![
                contact_id.as_str(),
                message.text,
                message.timestamp.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        tracing::trace!(contact = %contact_id, id = %message.id, "message stored");
        Ok(())
    }

    /// Full history of a session in insertion order.
    pub fn get_messages(&self, contact_id: &ContactId) -> Result<Vec<Message>> {
        load_messages(self.conn(), contact_id)
    }

    /// Number of messages stored for a session.
    pub fn count_messages(&self, contact_id: &ContactId) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE contact_id = ?1",
            params![contact_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

pub(crate) fn insert_message(conn: &Connection, contact_id: &ContactId, message: &Message) -> Result<()> {
    let payload = serde_json::to_string(&message.content)?;
    conn.execute(
        "INSERT INTO messages (id, contact_id, text, sender, kind, payload, delivered, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            message.id,
            contact_id.as_str(),
            message.text,
            message.sender.as_str(),
            message.content.kind_str(),
            payload,
            message.delivered,
            message.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn load_messages(conn: &Connection, contact_id: &ContactId) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, sender, payload, delivered, timestamp
         FROM messages
         WHERE contact_id = ?1
         ORDER BY seq ASC",
    )?;

    let rows = stmt.query_map(params![contact_id.as_str()], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let text: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let delivered: bool = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let sender = Author::parse(&sender_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown sender {sender_str:?}").into(),
        )
    })?;
    let content: MessageContent = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id,
        text,
        sender,
        timestamp: parse_timestamp(5, &ts_str)?,
        delivered,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_db;
    use crate::models::ChatSession;

    #[test]
    fn add_message_requires_session() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-missing");
        let err = db
            .add_message(&id, &Message::text(Author::Me, "hi"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn messages_keep_insertion_order() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-1");
        db.save_chat_session(&ChatSession::new(id.clone(), "Alice"))
            .unwrap();

        let first = Message::text(Author::Me, "one");
        let second = Message::audio(Author::Peer, "data:audio/webm;base64,AA==".into(), 2.5);
        let third = Message::text(Author::Peer, "three");
        for m in [&first, &second, &third] {
            db.add_message(&id, m).unwrap();
        }

        let loaded = db.get_messages(&id).unwrap();
        let ids: Vec<_> = loaded.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);
        assert_eq!(loaded[1], second);
        assert_eq!(db.count_messages(&id).unwrap(), 3);
    }

    #[test]
    fn add_message_updates_contact_preview() {
        let (_dir, db) = temp_db();
        let id = ContactId::from("peer-2");
        db.save_chat_session(&ChatSession::new(id.clone(), "Bob"))
            .unwrap();
        db.update_contact_status(&id, "Bob", true).unwrap();

        db.add_message(&id, &Message::text(Author::Peer, "latest"))
            .unwrap();

        let contact = db.get_contact(&id).unwrap();
        assert_eq!(contact.last_message.as_deref(), Some("latest"));
        assert!(contact.last_message_time.is_some());
    }
}

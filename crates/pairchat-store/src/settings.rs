//! Key/value application settings.

use rusqlite::{params, OptionalExtension};

use pairchat_shared::types::ContactId;

use crate::database::Database;
use crate::error::Result;

const CURRENT_SESSION_KEY: &str = "current_session";

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM app_settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Contact id of the session the user last opened.
    pub fn get_current_session(&self) -> Result<Option<ContactId>> {
        Ok(self.get_setting(CURRENT_SESSION_KEY)?.map(ContactId))
    }

    pub fn set_current_session(&self, contact_id: &ContactId) -> Result<()> {
        self.set_setting(CURRENT_SESSION_KEY, contact_id.as_str())
    }

    pub fn clear_current_session(&self) -> Result<()> {
        self.delete_setting(CURRENT_SESSION_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_db;

    #[test]
    fn current_session_pointer() {
        let (_dir, db) = temp_db();
        assert!(db.get_current_session().unwrap().is_none());

        db.set_current_session(&ContactId::from("peer-1")).unwrap();
        db.set_current_session(&ContactId::from("peer-2")).unwrap();
        assert_eq!(
            db.get_current_session().unwrap(),
            Some(ContactId::from("peer-2"))
        );

        db.clear_current_session().unwrap();
        assert!(db.get_current_session().unwrap().is_none());
    }
}

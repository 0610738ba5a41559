use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

const USER_COLUMNS: &str =
    "id, username, email, password, verify_code, verify_expires_at, verified, accepting_messages, created_at";

impl Database {
    // -- Users --

    /// Create or refresh a pending (unverified) registration, keyed by
    /// username. A stale unverified row holding the same email under another
    /// username is replaced; a re-register of the same username keeps its id
    /// and gets the new email, password hash, code, and expiry.
    ///
    /// Callers must have rejected verified-account conflicts first; this only
    /// enforces them through the UNIQUE constraints.
    pub fn upsert_pending_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        verify_code: &str,
        verify_expires_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM users WHERE email = ?1 AND verified = 0 AND username <> ?2",
                (email, username),
            )?;
            tx.execute(
                "INSERT INTO users (id, username, email, password, verify_code, verify_expires_at, verified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                 ON CONFLICT(username) DO UPDATE SET
                     email = excluded.email,
                     password = excluded.password,
                     verify_code = excluded.verify_code,
                     verify_expires_at = excluded.verify_expires_at",
                (id, username, email, password_hash, verify_code, verify_expires_at),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Lookup for sign-in: the identifier may be a username or an email.
    pub fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1 OR email = ?1", identifier))
    }

    /// Marks the account verified and invalidates the code (single-use).
    pub fn mark_verified(&self, username: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET verified = 1, verify_code = NULL, verify_expires_at = NULL
                 WHERE username = ?1",
                [username],
            )?;
            Ok(())
        })
    }

    /// Availability is judged against verified accounts only — a pending
    /// registration does not reserve the name.
    pub fn username_taken_by_verified(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1 AND verified = 1",
                [username],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn email_taken_by_verified(&self, email: &str, exclude_username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1 AND verified = 1 AND username <> ?2",
                (email, exclude_username),
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    // -- Accept-messages flag --

    /// Idempotent write; returns false when no such account exists.
    pub fn set_accepting_messages(&self, owner_id: &str, accepting: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET accepting_messages = ?2 WHERE id = ?1",
                (owner_id, accepting),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_accepting_messages(&self, owner_id: &str) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT accepting_messages FROM users WHERE id = ?1",
                [owner_id],
                |r| r.get(0),
            )
            .optional()
        })
    }

    // -- Messages --

    pub fn insert_message(&self, id: &str, owner_id: &str, content: &str, created_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, owner_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, owner_id, content, created_at),
            )?;
            Ok(())
        })
    }

    /// All of an owner's messages, newest first. Same-timestamp ties fall
    /// back to insertion order, newest first.
    pub fn get_messages_for_owner(&self, owner_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, content, created_at FROM messages
                 WHERE owner_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;

            let rows = stmt
                .query_map([owner_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        content: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Conditioned on both owner and id so a caller can never delete another
    /// account's message. Returns false when nothing matched.
    pub fn delete_message(&self, owner_id: &str, message_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND owner_id = ?2",
                (message_id, owner_id),
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, predicate: &str, param: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                verify_code: row.get(4)?,
                verify_expires_at: row.get(5)?,
                verified: row.get(6)?,
                accepting_messages: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

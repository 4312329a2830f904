use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::Database;
use crate::error::{StoreError, is_foreign_key_violation, is_unique_violation};
use crate::models::{MessageDetailRow, MessageRow, ReadRow, UserRow, UserSummaryRow};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        phone: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, first_name, last_name, phone, join_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![username, password_hash, first_name, last_name, phone, now_timestamp()],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("Username '{}' is taken", username))
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn touch_last_login(&self, username: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE username = ?2",
                (now_timestamp(), username),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("No such user: {}", username)));
            }
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message from `from_username` to `to_username`. `sent_at` is
    /// stamped here and `read_at` starts unset.
    pub fn create_message(
        &self,
        from_username: &str,
        to_username: &str,
        body: &str,
    ) -> Result<MessageRow, StoreError> {
        self.with_conn_mut(|conn| {
            let sent_at = now_timestamp();
            let inserted = conn.execute(
                "INSERT INTO messages (from_username, to_username, body, sent_at) VALUES (?1, ?2, ?3, ?4)",
                (from_username, to_username, body, &sent_at),
            );

            match inserted {
                Ok(_) => Ok(MessageRow {
                    id: conn.last_insert_rowid(),
                    from_username: from_username.to_string(),
                    to_username: to_username.to_string(),
                    body: body.to_string(),
                    sent_at,
                }),
                Err(e) if is_foreign_key_violation(&e) => {
                    // SQLite does not say which reference failed, so look it up.
                    if !user_exists(conn, to_username)? {
                        Err(StoreError::ForeignKeyViolation {
                            field: "to_username",
                            value: to_username.to_string(),
                        })
                    } else if !user_exists(conn, from_username)? {
                        Err(StoreError::ForeignKeyViolation {
                            field: "from_username",
                            value: from_username.to_string(),
                        })
                    } else {
                        Err(e.into())
                    }
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_message(&self, id: i64) -> Result<MessageDetailRow, StoreError> {
        self.with_conn(|conn| {
            query_message_detail(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("No such message: {}", id)))
        })
    }

    /// Stamp `read_at` on a message. A message that is already read keeps
    /// its original `read_at`.
    pub fn mark_read(&self, id: i64) -> Result<ReadRow, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE messages SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
                (now_timestamp(), id),
            )?;
            let row = tx
                .query_row("SELECT id, read_at FROM messages WHERE id = ?1", [id], |row| {
                    Ok(ReadRow {
                        id: row.get(0)?,
                        read_at: row.get(1)?,
                    })
                })
                .optional()?;
            tx.commit()?;

            row.ok_or_else(|| StoreError::NotFound(format!("No such message: {}", id)))
        })
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn user_exists(conn: &Connection, username: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE username = ?1", [username], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT username, password, first_name, last_name, phone, join_at, last_login_at
         FROM users WHERE username = ?1",
    )?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                username: row.get(0)?,
                password: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
                phone: row.get(4)?,
                join_at: row.get(5)?,
                last_login_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message_detail(conn: &Connection, id: i64) -> Result<Option<MessageDetailRow>, StoreError> {
    // Both participants in one query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.body, m.sent_at, m.read_at,
                f.username, f.first_name, f.last_name, f.phone,
                t.username, t.first_name, t.last_name, t.phone
         FROM messages m
         JOIN users f ON m.from_username = f.username
         JOIN users t ON m.to_username = t.username
         WHERE m.id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageDetailRow {
                id: row.get(0)?,
                body: row.get(1)?,
                sent_at: row.get(2)?,
                read_at: row.get(3)?,
                from_user: summary_at(row, 4)?,
                to_user: summary_at(row, 8)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn summary_at(row: &Row<'_>, start: usize) -> rusqlite::Result<UserSummaryRow> {
    Ok(UserSummaryRow {
        username: row.get(start)?,
        first_name: row.get(start + 1)?,
        last_name: row.get(start + 2)?,
        phone: row.get(start + 3)?,
    })
}

// 🔔 Notification Outbox - append-only per-user message log

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{format_timestamp, storage_time, timestamp_column};
use crate::error::{LedgerError, Result};

/// Message delivered to a card author when someone reveals the card
pub const REVEAL_MESSAGE: &str = "Someone took a look at your matching card.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, message, read, created_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        message: row.get(2)?,
        read: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

/// Append an unread message for `recipient_id`
pub fn append(
    conn: &Connection,
    recipient_id: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<Notification> {
    let notification = Notification {
        id: uuid::Uuid::new_v4().to_string(),
        recipient_id: recipient_id.to_string(),
        message: message.to_string(),
        read: false,
        created_at: storage_time(now),
    };

    conn.execute(
        "INSERT INTO notifications (id, recipient_id, message, read, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![
            notification.id,
            notification.recipient_id,
            notification.message,
            format_timestamp(&notification.created_at),
        ],
    )?;

    Ok(notification)
}

/// Messages for `recipient_id`, newest first
pub fn list_for(conn: &Connection, recipient_id: &str) -> Result<Vec<Notification>> {
    let sql = format!(
        "SELECT {} FROM notifications WHERE recipient_id = ?1
         ORDER BY created_at DESC, rowid DESC",
        NOTIFICATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let notifications = stmt
        .query_map([recipient_id], notification_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(notifications)
}

/// Mark a message read on behalf of `caller_id`.
///
/// Someone else's message and a missing message both report
/// `NotificationNotFound`, so callers cannot probe for other users' ids.
pub fn mark_read(conn: &Connection, notification_id: &str, caller_id: &str) -> Result<Notification> {
    let changed = conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
        params![notification_id, caller_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::NotificationNotFound);
    }

    let sql = format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS);
    conn.query_row(&sql, [notification_id], notification_from_row)
        .optional()?
        .ok_or(LedgerError::NotificationNotFound)
}

pub fn unread_count(conn: &Connection, recipient_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND read = 0",
        [recipient_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::entities::account::{insert_account, NewAccount};
    use chrono::{Duration, TimeZone};

    fn setup() -> (tempfile::TempDir, crate::db::Store) {
        let (dir, store) = test_store();
        store
            .write(|tx| {
                insert_account(tx, &NewAccount::member("alice", "Alice"), 2, Utc::now())?;
                insert_account(tx, &NewAccount::member("bob", "Bob"), 2, Utc::now())
            })
            .unwrap();
        (dir, store)
    }

    #[test]
    fn test_list_newest_first() {
        let (_dir, store) = setup();
        let now = Utc::now();

        store
            .write(|tx| {
                append(tx, "alice", "first", now - Duration::minutes(5))?;
                append(tx, "alice", "second", now)?;
                append(tx, "bob", "not yours", now)
            })
            .unwrap();

        let messages = store.read(|conn| list_for(conn, "alice")).unwrap();
        let texts: Vec<&str> = messages.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
        assert!(messages.iter().all(|n| !n.read));
    }

    #[test]
    fn test_returned_notification_matches_stored_row() {
        let (_dir, store) = setup();
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 10, 0, 0).unwrap() + Duration::nanoseconds(987_654_321);

        let sent = store
            .write(|tx| append(tx, "alice", REVEAL_MESSAGE, now))
            .unwrap();
        let stored = store.read(|conn| list_for(conn, "alice")).unwrap();
        assert_eq!(stored, vec![sent]);
    }

    #[test]
    fn test_mark_read_by_owner() {
        let (_dir, store) = setup();
        let sent = store
            .write(|tx| append(tx, "alice", REVEAL_MESSAGE, Utc::now()))
            .unwrap();

        assert_eq!(store.read(|conn| unread_count(conn, "alice")).unwrap(), 1);
        let updated = store.write(|tx| mark_read(tx, &sent.id, "alice")).unwrap();
        assert!(updated.read);
        assert_eq!(store.read(|conn| unread_count(conn, "alice")).unwrap(), 0);
    }

    #[test]
    fn test_foreign_and_missing_look_the_same() {
        let (_dir, store) = setup();
        let sent = store
            .write(|tx| append(tx, "alice", REVEAL_MESSAGE, Utc::now()))
            .unwrap();

        let foreign = store.write(|tx| mark_read(tx, &sent.id, "bob")).unwrap_err();
        let missing = store.write(|tx| mark_read(tx, "no-such-id", "bob")).unwrap_err();
        assert!(matches!(foreign, LedgerError::NotificationNotFound));
        assert!(matches!(missing, LedgerError::NotificationNotFound));

        // Bob's attempt left Alice's message unread
        let messages = store.read(|conn| list_for(conn, "alice")).unwrap();
        assert!(!messages[0].read);
    }
}

// 👁️ Reveal Record - permanent "viewer has paid to see this card's author"

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::db::{format_timestamp, is_unique_violation, storage_time, timestamp_column};
use crate::error::{LedgerError, Result};

/// Per (viewer, card) state. There is no edge back from `Revealed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevealState {
    Unrevealed,
    Revealed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealRecord {
    pub viewer_id: String,
    pub card_id: String,
    pub created_at: DateTime<Utc>,
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RevealRecord> {
    Ok(RevealRecord {
        viewer_id: row.get(0)?,
        card_id: row.get(1)?,
        created_at: timestamp_column(row, 2)?,
    })
}

pub fn reveal_state(conn: &Connection, viewer_id: &str, card_id: &str) -> Result<RevealState> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM reveal_records WHERE viewer_id = ?1 AND card_id = ?2)",
        params![viewer_id, card_id],
        |row| row.get(0),
    )?;

    Ok(if exists {
        RevealState::Revealed
    } else {
        RevealState::Unrevealed
    })
}

/// Insert the record; a duplicate pair trips the unique fence as `AlreadyRevealed`
pub(crate) fn insert_reveal(
    conn: &Connection,
    viewer_id: &str,
    card_id: &str,
    now: DateTime<Utc>,
) -> Result<RevealRecord> {
    let now = storage_time(now);
    let result = conn.execute(
        "INSERT INTO reveal_records (viewer_id, card_id, created_at) VALUES (?1, ?2, ?3)",
        params![viewer_id, card_id, format_timestamp(&now)],
    );

    match result {
        Ok(_) => Ok(RevealRecord {
            viewer_id: viewer_id.to_string(),
            card_id: card_id.to_string(),
            created_at: now,
        }),
        Err(e) if is_unique_violation(&e) => Err(LedgerError::AlreadyRevealed),
        Err(e) => Err(e.into()),
    }
}

/// Card ids `viewer_id` has revealed, oldest reveal first
pub fn revealed_card_ids(conn: &Connection, viewer_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT card_id FROM reveal_records WHERE viewer_id = ?1 ORDER BY id",
    )?;
    let ids = stmt
        .query_map([viewer_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub fn reveals_of_card(conn: &Connection, card_id: &str) -> Result<Vec<RevealRecord>> {
    let mut stmt = conn.prepare(
        "SELECT viewer_id, card_id, created_at FROM reveal_records
         WHERE card_id = ?1 ORDER BY id",
    )?;
    let records = stmt
        .query_map([card_id], record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

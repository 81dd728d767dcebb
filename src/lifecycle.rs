// 🧹 Account lifecycle - cascading deletion
//
// Removing an account removes everything that references it, inside the
// caller's transaction. Foreign keys are enforced, so a missed dependent row
// aborts the whole delete instead of leaving orphans behind.

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::entities::account::{delete_account_row, get_account};
use crate::error::Result;

/// Row counts removed by one account deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub reveals_as_viewer: usize,
    pub reveals_of_authored_cards: usize,
    pub cards: usize,
    pub notifications: usize,
}

/// Delete `account_id` and all rows that depend on it.
///
/// Must run inside a write transaction.
pub fn delete_account(conn: &Connection, account_id: &str) -> Result<CascadeReport> {
    get_account(conn, account_id)?;

    let reveals_as_viewer = conn.execute(
        "DELETE FROM reveal_records WHERE viewer_id = ?1",
        [account_id],
    )?;

    let reveals_of_authored_cards = conn.execute(
        "DELETE FROM reveal_records
         WHERE card_id IN (SELECT id FROM matching_cards WHERE author_id = ?1)",
        [account_id],
    )?;

    let cards = conn.execute(
        "DELETE FROM matching_cards WHERE author_id = ?1",
        [account_id],
    )?;

    let notifications = conn.execute(
        "DELETE FROM notifications WHERE recipient_id = ?1",
        [account_id],
    )?;

    delete_account_row(conn, account_id)?;

    let report = CascadeReport {
        reveals_as_viewer,
        reveals_of_authored_cards,
        cards,
        notifications,
    };
    info!(account_id, ?report, "account deleted with cascade");

    Ok(report)
}

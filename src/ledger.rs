// 🔓 Reveal Ledger - the credit-gated (viewer, card) state machine
//
//   UNREVEALED --reveal--> REVEALED   (terminal, no undo)
//
// Preconditions are checked in a fixed order, each with its own failure, and
// all of them before the first write. The effect (coin debit, notification,
// reveal record) is applied through the caller's transaction, so it commits
// or rolls back as one unit.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::entities::account::{debit_coin, get_account, AccountSnapshot};
use crate::entities::card::find_card;
use crate::entities::notification::{self, Notification, REVEAL_MESSAGE};
use crate::entities::reveal::{insert_reveal, reveal_state, revealed_card_ids, RevealRecord, RevealState};
use crate::error::{LedgerError, Result};
use crate::replenishment::ReplenishmentPolicy;

/// Coins spent per reveal
pub const REVEAL_COST: i64 = 1;

/// Everything a successful reveal produced
#[derive(Debug, Clone)]
pub struct RevealOutcome {
    /// Viewer after the debit, with the new card id included
    pub snapshot: AccountSnapshot,
    /// Message queued for the card author
    pub notification: Notification,
    pub record: RevealRecord,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RevealLedger {
    policy: ReplenishmentPolicy,
}

impl RevealLedger {
    pub fn new(policy: ReplenishmentPolicy) -> Self {
        RevealLedger { policy }
    }

    pub fn policy(&self) -> &ReplenishmentPolicy {
        &self.policy
    }

    /// Reveal `card_id` to `viewer_id`.
    ///
    /// `conn` must be an open IMMEDIATE transaction: the checks and the
    /// three writes are only atomic because they share it.
    pub fn reveal(
        &self,
        conn: &Connection,
        viewer_id: &str,
        card_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RevealOutcome> {
        // 1. Card must exist
        let card = find_card(conn, card_id)?
            .ok_or_else(|| LedgerError::CardNotFound(card_id.to_string()))?;

        // 2. Authors never pay for their own card
        if card.author_id == viewer_id {
            return Err(LedgerError::SelfRevealForbidden);
        }

        // 3. Viewer must exist; the balance is observed only after any owed
        // replenishment
        let viewer = self.policy.refresh(conn, viewer_id, now)?;

        // 4. One reveal per (viewer, card). Checked ahead of the balance so a
        // retried reveal reports AlreadyRevealed even after spending the last coin.
        if reveal_state(conn, viewer_id, card_id)? == RevealState::Revealed {
            return Err(LedgerError::AlreadyRevealed);
        }

        // 5. Something to spend
        if viewer.coins < REVEAL_COST {
            return Err(LedgerError::InsufficientCredit);
        }

        // Effect. The guarded debit and the unique reveal pair are fences in
        // their own right; if either trips, the caller's transaction rolls back.
        if !debit_coin(conn, viewer_id)? {
            return Err(LedgerError::InsufficientCredit);
        }
        let notification = notification::append(conn, &card.author_id, REVEAL_MESSAGE, now)?;
        let record = insert_reveal(conn, viewer_id, card_id, now)?;

        debug!(viewer_id, card_id, author_id = %card.author_id, "reveal effect staged");

        let snapshot = account_snapshot(conn, viewer_id)?;
        info!(
            viewer_id,
            card_id,
            coins = snapshot.account.coins,
            "card revealed"
        );

        Ok(RevealOutcome {
            snapshot,
            notification,
            record,
        })
    }

    /// Current account view, after any owed replenishment
    pub fn fresh_snapshot(
        &self,
        conn: &Connection,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AccountSnapshot> {
        let account = self.policy.refresh(conn, account_id, now)?;
        Ok(AccountSnapshot {
            account,
            revealed_card_ids: revealed_card_ids(conn, account_id)?,
            unread_notifications: notification::unread_count(conn, account_id)?,
        })
    }
}

/// Account plus its reveal list, exactly as stored
fn account_snapshot(conn: &Connection, account_id: &str) -> Result<AccountSnapshot> {
    Ok(AccountSnapshot {
        account: get_account(conn, account_id)?,
        revealed_card_ids: revealed_card_ids(conn, account_id)?,
        unread_notifications: notification::unread_count(conn, account_id)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

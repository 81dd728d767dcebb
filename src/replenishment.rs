// 🪙 Replenishment Policy - coin balance reset on read
//
// The trigger is a component-wise calendar comparison, not an elapsed-time
// check: the balance resets when ANY of year, month, day, or hour of the last
// replenishment is numerically smaller than the same component of "now",
// both read in the configured calendar offset.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::entities::account::{get_account, store_replenishment, Account};
use crate::db::storage_time;
use crate::error::Result;

/// Coins granted per replenishment
pub const DEFAULT_ALLOWANCE: i64 = 2;

/// Korea Standard Time, the campus calendar
pub const DEFAULT_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplenishmentPolicy {
    allowance: i64,
    offset: FixedOffset,
}

impl Default for ReplenishmentPolicy {
    fn default() -> Self {
        ReplenishmentPolicy {
            allowance: DEFAULT_ALLOWANCE,
            offset: FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
        }
    }
}

impl ReplenishmentPolicy {
    pub fn new(allowance: i64, offset: FixedOffset) -> Self {
        ReplenishmentPolicy { allowance, offset }
    }

    pub fn allowance(&self) -> i64 {
        self.allowance
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Whether a balance last reset at `last` is owed a reset at `now`
    pub fn is_due(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let last = last.with_timezone(&self.offset);
        let now = now.with_timezone(&self.offset);

        last.year() < now.year()
            || last.month() < now.month()
            || last.day() < now.day()
            || last.hour() < now.hour()
    }

    /// Load an account and apply any owed reset before returning it.
    ///
    /// Call inside the same write transaction that will read or spend the
    /// balance, so a reset is never observed as owed but not applied.
    pub fn refresh(&self, conn: &Connection, account_id: &str, now: DateTime<Utc>) -> Result<Account> {
        let mut account = get_account(conn, account_id)?;

        if self.is_due(account.last_replenished_at, now) {
            let now = storage_time(now);
            store_replenishment(conn, account_id, self.allowance, now)?;
            info!(
                account_id,
                previous = account.coins,
                coins = self.allowance,
                "coin balance replenished"
            );
            account.coins = self.allowance;
            account.last_replenished_at = now;
        }

        Ok(account)
    }
}

// 🧭 Match Service - one method per user-facing operation
//
// Each method opens its own transaction on the shared store and holds no
// in-process lock, so any number of instances can serve the same database.
// Methods are blocking; async callers run them on a blocking thread.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::Identity;
use crate::config::Config;
use crate::db::{storage_time, Store};
use crate::entities::account::{
    self, get_account, insert_account, list_accounts, Account, AccountSnapshot, AuthorProfile,
    NewAccount, ProfileUpdate,
};
use crate::entities::card::{
    self, create_card, delete_card, delete_card_by_author, get_card, list_all_cards,
    list_recent_cards, CardListing, MatchType, MatchingCard,
};
use crate::entities::notification::{self, Notification};
use crate::entities::reveal::{reveal_state, reveals_of_card, RevealRecord, RevealState};
use crate::error::{LedgerError, Result};
use crate::ledger::RevealLedger;
use crate::lifecycle::{self, CascadeReport};
use crate::replenishment::ReplenishmentPolicy;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Default public listing window
pub const DEFAULT_CARD_WINDOW_DAYS: i64 = 7;

/// Outcome of a bulk account import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// A card as seen by one viewer; the author appears only once revealed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub id: String,
    pub description: String,
    pub match_type: MatchType,
    pub created_at: DateTime<Utc>,
    pub reveal_state: RevealState,
    pub is_own: bool,
    pub author: Option<AuthorProfile>,
}

#[derive(Clone)]
pub struct MatchService {
    store: Store,
    ledger: RevealLedger,
    card_window: Duration,
    clock: Clock,
}

impl MatchService {
    pub fn new(store: Store, policy: ReplenishmentPolicy) -> Self {
        MatchService {
            store,
            ledger: RevealLedger::new(policy),
            card_window: Duration::days(DEFAULT_CARD_WINDOW_DAYS),
            clock: Arc::new(Utc::now),
        }
    }

    /// Open the configured database and build the service around it
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Store::open(&config.database_path)?;
        let service = Self::new(store, config.replenishment_policy()?)
            .with_card_window(Duration::days(config.card_window_days));
        Ok(service)
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_card_window(mut self, window: Duration) -> Self {
        self.card_window = window;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn policy(&self) -> &ReplenishmentPolicy {
        self.ledger.policy()
    }

    fn now(&self) -> DateTime<Utc> {
        storage_time((self.clock)())
    }

    // ========================================================================
    // ACCOUNTS
    // ========================================================================

    /// Create an account for an identity-provider id with a full allowance
    pub fn register_account(&self, new: &NewAccount) -> Result<Account> {
        let now = self.now();
        let allowance = self.policy().allowance();
        let account = self
            .store
            .write(|tx| insert_account(tx, new, allowance, now))?;
        info!(account_id = %account.id, role = account.role.as_str(), "account registered");
        Ok(account)
    }

    /// Register every roster entry; ids that already exist are skipped
    pub fn import_accounts(&self, accounts: &[NewAccount]) -> Result<ImportSummary> {
        let now = self.now();
        let allowance = self.policy().allowance();

        let summary = self.store.write(|tx| {
            let mut summary = ImportSummary::default();
            for new in accounts {
                match insert_account(tx, new, allowance, now) {
                    Ok(_) => summary.inserted += 1,
                    Err(LedgerError::DuplicateAccount(_)) => summary.duplicates += 1,
                    Err(e) => return Err(e),
                }
            }
            Ok(summary)
        })?;

        info!(inserted = summary.inserted, duplicates = summary.duplicates, "account roster imported");
        Ok(summary)
    }

    /// Caller's account with a freshly replenished balance
    pub fn me(&self, caller: &Identity) -> Result<AccountSnapshot> {
        let now = self.now();
        self.store
            .write(|tx| self.ledger.fresh_snapshot(tx, &caller.account_id, now))
    }

    pub fn update_profile(&self, caller: &Identity, update: &ProfileUpdate) -> Result<AccountSnapshot> {
        let now = self.now();
        self.store.write(|tx| {
            if !update.is_empty() {
                account::update_profile(tx, &caller.account_id, update)?;
            }
            self.ledger.fresh_snapshot(tx, &caller.account_id, now)
        })
    }

    // ========================================================================
    // CARDS
    // ========================================================================

    pub fn create_card(
        &self,
        caller: &Identity,
        description: &str,
        match_type: MatchType,
    ) -> Result<MatchingCard> {
        let now = self.now();
        let card = self.store.write(|tx| {
            get_account(tx, &caller.account_id)?;
            create_card(tx, &caller.account_id, description, match_type, now)
        })?;
        info!(card_id = %card.id, author_id = %card.author_id, "matching card created");
        Ok(card)
    }

    /// Delete the caller's own card together with its reveal records
    pub fn delete_own_card(&self, caller: &Identity) -> Result<MatchingCard> {
        let card = self
            .store
            .write(|tx| delete_card_by_author(tx, &caller.account_id))?;
        info!(card_id = %card.id, author_id = %card.author_id, "matching card deleted by author");
        Ok(card)
    }

    /// Cards inside the listing window, newest first, authors hidden
    pub fn list_recent_cards(&self) -> Result<Vec<CardListing>> {
        let since = self.now() - self.card_window;
        self.store.read(|conn| list_recent_cards(conn, since))
    }

    pub fn view_card(&self, caller: &Identity, card_id: &str) -> Result<CardView> {
        self.store.read(|conn| {
            let card = get_card(conn, card_id)?;
            let state = reveal_state(conn, &caller.account_id, card_id)?;
            let is_own = card.author_id == caller.account_id;

            let author = if is_own || caller.is_admin() || state == RevealState::Revealed {
                Some(AuthorProfile::from(get_account(conn, &card.author_id)?))
            } else {
                None
            };

            Ok(CardView {
                id: card.id,
                description: card.description,
                match_type: card.match_type,
                created_at: card.created_at,
                reveal_state: state,
                is_own,
                author,
            })
        })
    }

    // ========================================================================
    // REVEAL
    // ========================================================================

    /// Spend one coin to reveal `card_id`'s author; returns the updated caller
    pub fn reveal(&self, caller: &Identity, card_id: &str) -> Result<AccountSnapshot> {
        let now = self.now();
        let outcome = self
            .store
            .write(|tx| self.ledger.reveal(tx, &caller.account_id, card_id, now))?;
        Ok(outcome.snapshot)
    }

    // ========================================================================
    // NOTIFICATIONS
    // ========================================================================

    pub fn notifications(&self, caller: &Identity) -> Result<Vec<Notification>> {
        self.store
            .read(|conn| notification::list_for(conn, &caller.account_id))
    }

    pub fn mark_notification_read(&self, caller: &Identity, notification_id: &str) -> Result<Notification> {
        self.store
            .write(|tx| notification::mark_read(tx, notification_id, &caller.account_id))
    }

    // ========================================================================
    // ADMIN
    // ========================================================================

    /// Every account, each passed through the replenishment policy
    pub fn admin_list_accounts(&self, caller: &Identity) -> Result<Vec<Account>> {
        caller.require_admin()?;
        let now = self.now();
        self.store.write(|tx| {
            list_accounts(tx)?
                .iter()
                .map(|account| self.policy().refresh(tx, &account.id, now))
                .collect()
        })
    }

    pub fn admin_list_cards(&self, caller: &Identity) -> Result<Vec<MatchingCard>> {
        caller.require_admin()?;
        self.store.read(list_all_cards)
    }

    /// Who has revealed `card_id`, oldest first
    pub fn admin_card_reveals(&self, caller: &Identity, card_id: &str) -> Result<Vec<RevealRecord>> {
        caller.require_admin()?;
        self.store.read(|conn| {
            get_card(conn, card_id)?;
            reveals_of_card(conn, card_id)
        })
    }

    pub fn admin_delete_card(&self, caller: &Identity, card_id: &str) -> Result<()> {
        caller.require_admin()?;
        let reveals = self.store.write(|tx| delete_card(tx, card_id))?;
        info!(card_id, reveals, admin_id = %caller.account_id, "matching card deleted by admin");
        Ok(())
    }

    pub fn admin_delete_account(&self, caller: &Identity, account_id: &str) -> Result<CascadeReport> {
        caller.require_admin()?;
        if caller.account_id == account_id {
            return Err(LedgerError::SelfDeleteForbidden);
        }
        self.store
            .write(|tx| lifecycle::delete_account(tx, account_id))
    }

    /// Whether `author_id` currently has a live card
    pub fn has_card(&self, author_id: &str) -> Result<bool> {
        self.store
            .read(|conn| Ok(card::find_card_by_author(conn, author_id)?.is_some()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::entities::account::Role;
    use chrono::{FixedOffset, TimeZone};
    use std::sync::Mutex;

    fn fixed(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, h, m, 0).unwrap()
    }

    fn service_at(clock: Arc<Mutex<DateTime<Utc>>>) -> (tempfile::TempDir, MatchService) {
        let (dir, store) = test_store();
        let policy = ReplenishmentPolicy::new(2, FixedOffset::east_opt(0).unwrap());
        let service = MatchService::new(store, policy)
            .with_clock(move || *clock.lock().unwrap());
        (dir, service)
    }

    fn register(service: &MatchService, id: &str, role: Role) -> Identity {
        let mut new = NewAccount::member(id, id);
        new.role = role;
        service.register_account(&new).unwrap();
        Identity::new(id, role)
    }

    #[test]
    fn test_me_replenishes_on_next_hour() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock.clone());

        let author = register(&service, "author", Role::Member);
        let viewer = register(&service, "viewer", Role::Member);
        let card = service.create_card(&author, "hi", MatchType::Pair).unwrap();

        service.reveal(&viewer, &card.id).unwrap();
        assert_eq!(service.me(&viewer).unwrap().account.coins, 1);

        *clock.lock().unwrap() = fixed(10, 59);
        assert_eq!(service.me(&viewer).unwrap().account.coins, 1);

        *clock.lock().unwrap() = fixed(11, 0);
        let snapshot = service.me(&viewer).unwrap();
        assert_eq!(snapshot.account.coins, 2);
        assert_eq!(snapshot.revealed_card_ids, vec![card.id]);
    }

    #[test]
    fn test_returned_timestamps_match_storage() {
        let clock = Arc::new(Mutex::new(fixed(10, 0) + Duration::nanoseconds(123_456_789)));
        let (_dir, service) = service_at(clock.clone());
        let author = register(&service, "author", Role::Member);
        let admin = register(&service, "admin", Role::Admin);

        let card = service.create_card(&author, "hi", MatchType::Pair).unwrap();
        assert_eq!(service.admin_list_cards(&admin).unwrap()[0], card);

        // The read that triggers a replenishment returns the stored stamp
        *clock.lock().unwrap() = fixed(11, 0) + Duration::nanoseconds(987_654_321);
        let replenished = service.me(&author).unwrap();
        let stored = service
            .store()
            .read(|conn| get_account(conn, "author"))
            .unwrap();
        assert_eq!(replenished.account.last_replenished_at, stored.last_replenished_at);
        assert_eq!(replenished.account, stored);
    }

    #[test]
    fn test_card_view_hides_author_until_revealed() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);

        let author = register(&service, "author", Role::Member);
        let viewer = register(&service, "viewer", Role::Member);
        let admin = register(&service, "admin", Role::Admin);
        let card = service.create_card(&author, "hi", MatchType::Trio).unwrap();

        let before = service.view_card(&viewer, &card.id).unwrap();
        assert_eq!(before.reveal_state, RevealState::Unrevealed);
        assert!(before.author.is_none());

        assert!(service.view_card(&author, &card.id).unwrap().author.is_some());
        assert!(service.view_card(&admin, &card.id).unwrap().author.is_some());

        service.reveal(&viewer, &card.id).unwrap();
        let after = service.view_card(&viewer, &card.id).unwrap();
        assert_eq!(after.reveal_state, RevealState::Revealed);
        assert_eq!(after.author.unwrap().id, "author");

        let listing = service.list_recent_cards().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].reveal_count, 1);
    }

    #[test]
    fn test_own_card_lifecycle() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);
        let author = register(&service, "author", Role::Member);

        assert!(matches!(service.delete_own_card(&author), Err(LedgerError::CardNotFound(_))));

        service.create_card(&author, "first", MatchType::Pair).unwrap();
        assert!(matches!(
            service.create_card(&author, "second", MatchType::Pair),
            Err(LedgerError::DuplicateCard)
        ));
        assert!(service.has_card("author").unwrap());

        service.delete_own_card(&author).unwrap();
        assert!(!service.has_card("author").unwrap());
    }

    #[test]
    fn test_unknown_caller_cannot_post() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);
        let err = service
            .create_card(&Identity::member("ghost"), "hi", MatchType::Pair)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[test]
    fn test_admin_operations_require_role() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);
        let member = register(&service, "member", Role::Member);
        let admin = register(&service, "admin", Role::Admin);
        let card = service.create_card(&member, "hi", MatchType::Pair).unwrap();

        assert!(matches!(service.admin_list_accounts(&member), Err(LedgerError::Forbidden(_))));
        assert!(matches!(
            service.admin_delete_card(&member, &card.id),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            service.admin_delete_account(&admin, "admin"),
            Err(LedgerError::SelfDeleteForbidden)
        ));

        assert_eq!(service.admin_list_accounts(&admin).unwrap().len(), 2);
        assert_eq!(service.admin_list_cards(&admin).unwrap().len(), 1);

        assert!(matches!(
            service.admin_card_reveals(&member, &card.id),
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            service.admin_card_reveals(&admin, "missing"),
            Err(LedgerError::CardNotFound(_))
        ));
        let viewer = register(&service, "viewer", Role::Member);
        service.reveal(&viewer, &card.id).unwrap();
        let reveals = service.admin_card_reveals(&admin, &card.id).unwrap();
        assert_eq!(reveals.len(), 1);
        assert_eq!(reveals[0].viewer_id, "viewer");

        service.admin_delete_card(&admin, &card.id).unwrap();
        assert!(service.admin_list_cards(&admin).unwrap().is_empty());

        let report = service.admin_delete_account(&admin, "member").unwrap();
        assert_eq!(report.cards, 0);
        assert_eq!(service.admin_list_accounts(&admin).unwrap().len(), 2);
    }

    #[test]
    fn test_notifications_flow() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);
        let author = register(&service, "author", Role::Member);
        let viewer = register(&service, "viewer", Role::Member);
        let card = service.create_card(&author, "hi", MatchType::Pair).unwrap();

        service.reveal(&viewer, &card.id).unwrap();

        let inbox = service.notifications(&author).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(service.me(&author).unwrap().unread_notifications, 1);
        assert!(service.notifications(&viewer).unwrap().is_empty());

        assert!(matches!(
            service.mark_notification_read(&viewer, &inbox[0].id),
            Err(LedgerError::NotificationNotFound)
        ));
        assert!(service.mark_notification_read(&author, &inbox[0].id).unwrap().read);
        assert_eq!(service.me(&author).unwrap().unread_notifications, 0);
    }

    #[test]
    fn test_import_skips_existing_ids() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);
        register(&service, "2023001", Role::Member);

        let roster = vec![
            NewAccount::member("2023001", "Kim"),
            NewAccount::member("2023002", "Lee"),
            NewAccount::admin("admin01", "Park"),
        ];
        let summary = service.import_accounts(&roster).unwrap();
        assert_eq!(summary, ImportSummary { inserted: 2, duplicates: 1 });

        let admin = Identity::admin("admin01");
        let accounts = service.admin_list_accounts(&admin).unwrap();
        assert_eq!(accounts.len(), 3);
        assert!(accounts.iter().all(|a| a.coins == 2));
    }

    #[test]
    fn test_profile_update() {
        let clock = Arc::new(Mutex::new(fixed(10, 0)));
        let (_dir, service) = service_at(clock);
        let member = register(&service, "member", Role::Member);

        let update = ProfileUpdate {
            instagram_id: Some("member.gram".to_string()),
            interests: Some(vec!["tennis".to_string()]),
            photo_url: None,
        };
        let snapshot = service.update_profile(&member, &update).unwrap();
        assert_eq!(snapshot.account.instagram_id, "member.gram");
        assert_eq!(snapshot.account.interests, vec!["tennis"]);
        assert_eq!(snapshot.account.coins, 2);
    }
}

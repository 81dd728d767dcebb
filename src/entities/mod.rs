// Entity Models
//
// Each entity owns its table and the queries over it:
// - Account: identity, role, coin balance (Account Store)
// - MatchingCard: one live card per author (Card Registry)
// - RevealRecord: permanent (viewer, card) disclosure
// - Notification: per-user outbox

pub mod account;
pub mod card;
pub mod notification;
pub mod reveal;

pub use account::{load_accounts_csv, Account, AccountSnapshot, AuthorProfile, NewAccount, ProfileUpdate, Role};
pub use card::{CardListing, MatchType, MatchingCard};
pub use notification::Notification;
pub use reveal::{RevealRecord, RevealState};

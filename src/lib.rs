// Campus Match - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod db;
pub mod entities;
pub mod replenishment;  // Hourly coin top-up
pub mod ledger;         // Reveal state machine
pub mod lifecycle;      // Cascading account deletion
pub mod auth;
pub mod service;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{ErrorKind, LedgerError, Result};
pub use config::Config;
pub use db::{setup_database, Store};
pub use entities::{
    Account, AccountSnapshot, AuthorProfile, NewAccount, ProfileUpdate, Role,
    CardListing, MatchType, MatchingCard,
    Notification,
    RevealRecord, RevealState,
};
pub use replenishment::ReplenishmentPolicy;
pub use ledger::{RevealLedger, RevealOutcome, REVEAL_COST};
pub use lifecycle::CascadeReport;
pub use auth::{HmacTokenVerifier, Identity, TokenVerifier};
pub use service::{CardView, ImportSummary, MatchService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ⚠️ Error taxonomy for the reveal ledger
//
// Every failure carries a stable kind (for callers deciding whether to retry)
// and a stable code (for clients rendering a reason).

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Entity absent
    NotFound,
    /// Uniqueness fence tripped; do not retry without re-reading state
    Conflict,
    /// Request rejected before any mutation
    PreconditionFailed,
    /// Role or ownership mismatch
    Forbidden,
    /// No verified identity on the request
    Unauthenticated,
    /// Storage or transport failure; safe to retry
    Internal,
}

impl ErrorKind {
    /// Whether a caller may blindly retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Internal)
    }
}

// ============================================================================
// LEDGER ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("matching card not found: {0}")]
    CardNotFound(String),

    #[error("notification not found")]
    NotificationNotFound,

    #[error("author already has a live matching card")]
    DuplicateCard,

    #[error("card already revealed by this viewer")]
    AlreadyRevealed,

    #[error("account already exists: {0}")]
    DuplicateAccount(String),

    #[error("authors may not reveal their own card")]
    SelfRevealForbidden,

    #[error("not enough coins to reveal a card")]
    InsufficientCredit,

    #[error("administrators may not delete their own account")]
    SelfDeleteForbidden,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_)
            | LedgerError::CardNotFound(_)
            | LedgerError::NotificationNotFound => ErrorKind::NotFound,

            LedgerError::DuplicateCard
            | LedgerError::AlreadyRevealed
            | LedgerError::DuplicateAccount(_) => ErrorKind::Conflict,

            LedgerError::SelfRevealForbidden
            | LedgerError::InsufficientCredit
            | LedgerError::SelfDeleteForbidden
            | LedgerError::InvalidInput(_) => ErrorKind::PreconditionFailed,

            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            LedgerError::Storage(_) | LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "AccountNotFound",
            LedgerError::CardNotFound(_) => "CardNotFound",
            LedgerError::NotificationNotFound => "NotificationNotFound",
            LedgerError::DuplicateCard => "DuplicateCard",
            LedgerError::AlreadyRevealed => "AlreadyRevealed",
            LedgerError::DuplicateAccount(_) => "DuplicateAccount",
            LedgerError::SelfRevealForbidden => "SelfRevealForbidden",
            LedgerError::InsufficientCredit => "InsufficientCredit",
            LedgerError::SelfDeleteForbidden => "SelfDeleteForbidden",
            LedgerError::InvalidInput(_) => "InvalidInput",
            LedgerError::Forbidden(_) => "Forbidden",
            LedgerError::Unauthenticated(_) => "Unauthenticated",
            LedgerError::Storage(_) => "StorageFailure",
            LedgerError::Internal(_) => "InternalFailure",
        }
    }

    /// Message safe to show to the caller (internal detail stays in the logs)
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

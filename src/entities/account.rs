// 👤 Account Entity - identity, role, and coin balance
//
// The id comes from the identity provider and never changes. Profile fields
// are values the member may edit; the coin field is only ever written by the
// replenishment policy and the reveal ledger.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::{format_timestamp, is_unique_violation, timestamp_column};
use crate::error::{LedgerError, Result};

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "MEMBER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "MEMBER" | "" => Ok(Role::Member),
            "ADMIN" => Ok(Role::Admin),
            other => Err(LedgerError::InvalidInput(format!("unknown role: {}", other))),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "MEMBER" => Ok(Role::Member),
            "ADMIN" => Ok(Role::Admin),
            other => Err(FromSqlError::Other(format!("unknown role: {}", other).into())),
        }
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable identity issued by the identity provider
    pub id: String,

    pub display_name: String,
    pub department: String,
    pub instagram_id: String,

    /// URL handed back by the media store
    pub photo_url: Option<String>,

    pub interests: Vec<String>,

    /// Spendable reveal credit, never negative
    pub coins: i64,

    /// When the balance was last reset to the allowance
    pub last_replenished_at: DateTime<Utc>,

    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when an account is first registered
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub instagram_id: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub role: Role,
}

impl NewAccount {
    pub fn member(id: &str, display_name: &str) -> Self {
        NewAccount {
            id: id.to_string(),
            display_name: display_name.to_string(),
            role: Role::Member,
            ..Default::default()
        }
    }

    pub fn admin(id: &str, display_name: &str) -> Self {
        NewAccount {
            role: Role::Admin,
            ..Self::member(id, display_name)
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Member
    }
}

/// Non-coin profile edit; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub instagram_id: Option<String>,
    pub interests: Option<Vec<String>>,
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.instagram_id.is_none() && self.interests.is_none() && self.photo_url.is_none()
    }
}

/// What a viewer learns about a card's author once the card is revealed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorProfile {
    pub id: String,
    pub display_name: String,
    pub department: String,
    pub instagram_id: String,
    pub photo_url: Option<String>,
    pub interests: Vec<String>,
}

impl From<Account> for AuthorProfile {
    fn from(account: Account) -> Self {
        AuthorProfile {
            id: account.id,
            display_name: account.display_name,
            department: account.department,
            instagram_id: account.instagram_id,
            photo_url: account.photo_url,
            interests: account.interests,
        }
    }
}

/// An account together with every card id it has paid to reveal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    #[serde(flatten)]
    pub account: Account,
    pub revealed_card_ids: Vec<String>,
    pub unread_notifications: i64,
}

// ============================================================================
// ACCOUNT STORE
// ============================================================================

const ACCOUNT_COLUMNS: &str = "id, display_name, department, instagram_id, photo_url, interests,
     coins, last_replenished_at, role, created_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let interests_json: String = row.get(5)?;
    let interests = serde_json::from_str(&interests_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Account {
        id: row.get(0)?,
        display_name: row.get(1)?,
        department: row.get(2)?,
        instagram_id: row.get(3)?,
        photo_url: row.get(4)?,
        interests,
        coins: row.get(6)?,
        last_replenished_at: timestamp_column(row, 7)?,
        role: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
    })
}

/// Insert a new account holding `coins`, stamped as replenished at `now`
pub fn insert_account(
    conn: &Connection,
    new: &NewAccount,
    coins: i64,
    now: DateTime<Utc>,
) -> Result<Account> {
    if new.id.trim().is_empty() {
        return Err(LedgerError::InvalidInput("account id must not be empty".into()));
    }

    let interests_json = serde_json::to_string(&new.interests)
        .map_err(|e| LedgerError::Internal(e.to_string()))?;
    let now_str = format_timestamp(&now);

    let result = conn.execute(
        "INSERT INTO accounts (
            id, display_name, department, instagram_id, photo_url, interests,
            coins, last_replenished_at, role, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?8)",
        params![
            new.id,
            new.display_name,
            new.department,
            new.instagram_id,
            new.photo_url,
            interests_json,
            coins,
            now_str,
            new.role,
        ],
    );

    match result {
        Ok(_) => get_account(conn, &new.id),
        Err(e) if is_unique_violation(&e) => Err(LedgerError::DuplicateAccount(new.id.clone())),
        Err(e) => Err(e.into()),
    }
}

pub fn find_account(conn: &Connection, id: &str) -> Result<Option<Account>> {
    let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
    let account = conn
        .query_row(&sql, [id], account_from_row)
        .optional()?;
    Ok(account)
}

/// Like [`find_account`] but absence is an error
pub fn get_account(conn: &Connection, id: &str) -> Result<Account> {
    find_account(conn, id)?.ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
}

/// All accounts, newest first
pub fn list_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts ORDER BY created_at DESC, id",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(accounts)
}

/// Apply a profile edit; never touches coins
pub fn update_profile(conn: &Connection, id: &str, update: &ProfileUpdate) -> Result<()> {
    let interests_json = match &update.interests {
        Some(interests) => Some(
            serde_json::to_string(interests).map_err(|e| LedgerError::Internal(e.to_string()))?,
        ),
        None => None,
    };

    let changed = conn.execute(
        "UPDATE accounts
         SET instagram_id = COALESCE(?2, instagram_id),
             interests = COALESCE(?3, interests),
             photo_url = COALESCE(?4, photo_url)
         WHERE id = ?1",
        params![id, update.instagram_id, interests_json, update.photo_url],
    )?;

    if changed == 0 {
        return Err(LedgerError::AccountNotFound(id.to_string()));
    }
    Ok(())
}

/// Reset the balance; only the replenishment policy calls this
pub(crate) fn store_replenishment(
    conn: &Connection,
    id: &str,
    coins: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET coins = ?2, last_replenished_at = ?3 WHERE id = ?1",
        params![id, coins, format_timestamp(&at)],
    )?;
    if changed == 0 {
        return Err(LedgerError::AccountNotFound(id.to_string()));
    }
    Ok(())
}

/// Take one coin if one is available; only the reveal ledger calls this.
/// Returns false when the balance is already zero.
pub(crate) fn debit_coin(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE accounts SET coins = coins - 1 WHERE id = ?1 AND coins >= 1",
        [id],
    )?;
    Ok(changed == 1)
}

pub(crate) fn delete_account_row(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM accounts WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(LedgerError::AccountNotFound(id.to_string()));
    }
    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One row of an account roster: `id,display_name,department,instagram_id,role`
#[derive(Debug, Deserialize)]
struct RosterRow {
    id: String,
    display_name: String,
    #[serde(default)]
    department: String,
    #[serde(default)]
    instagram_id: String,
    #[serde(default)]
    role: String,
}

/// Parse an account roster. Blank roles default to MEMBER.
pub fn load_accounts_csv<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<NewAccount>> {
    use anyhow::Context;

    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut accounts = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: RosterRow = result.with_context(|| format!("Failed to parse roster row {}", line + 1))?;
        let role: Role = row
            .role
            .parse()
            .with_context(|| format!("Invalid role on roster row {}", line + 1))?;

        accounts.push(NewAccount {
            id: row.id,
            display_name: row.display_name,
            department: row.department,
            instagram_id: row.instagram_id,
            role,
            ..Default::default()
        });
    }

    Ok(accounts)
}

// ============================================================================
// TESTS
// ============================================================================

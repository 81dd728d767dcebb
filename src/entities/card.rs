// 🃏 Matching Card Entity + Card Registry
//
// One live card per author. The UNIQUE(author_id) constraint is the
// authority; a racing second insert surfaces as DuplicateCard.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::{format_timestamp, is_unique_violation, storage_time, timestamp_column};
use crate::error::{LedgerError, Result};

// ============================================================================
// MATCH TYPE
// ============================================================================

/// Desired group size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// One-on-one
    Pair,
    /// Group of three
    Trio,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Pair => "PAIR",
            MatchType::Trio => "TRIO",
        }
    }
}

impl FromStr for MatchType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PAIR" => Ok(MatchType::Pair),
            "TRIO" => Ok(MatchType::Trio),
            other => Err(LedgerError::InvalidInput(format!("unknown match type: {}", other))),
        }
    }
}

impl ToSql for MatchType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MatchType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "PAIR" => Ok(MatchType::Pair),
            "TRIO" => Ok(MatchType::Trio),
            other => Err(FromSqlError::Other(format!("unknown match type: {}", other).into())),
        }
    }
}

// ============================================================================
// MATCHING CARD ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingCard {
    pub id: String,
    pub author_id: String,
    pub description: String,
    pub match_type: MatchType,
    pub created_at: DateTime<Utc>,
}

/// Public listing entry: the card without its author, plus how often it was revealed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardListing {
    pub id: String,
    pub description: String,
    pub match_type: MatchType,
    pub created_at: DateTime<Utc>,
    pub reveal_count: i64,
}

impl MatchingCard {
    pub fn new(author_id: &str, description: &str, match_type: MatchType, now: DateTime<Utc>) -> Self {
        MatchingCard {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            description: description.trim().to_string(),
            match_type,
            created_at: storage_time(now),
        }
    }
}

// ============================================================================
// CARD REGISTRY
// ============================================================================

const CARD_COLUMNS: &str = "id, author_id, description, match_type, created_at";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<MatchingCard> {
    Ok(MatchingCard {
        id: row.get(0)?,
        author_id: row.get(1)?,
        description: row.get(2)?,
        match_type: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

/// Insert a card for `author_id`.
///
/// No find-then-create: the insert itself is the check, and the unique
/// constraint on `author_id` decides the winner of concurrent creations.
pub fn create_card(
    conn: &Connection,
    author_id: &str,
    description: &str,
    match_type: MatchType,
    now: DateTime<Utc>,
) -> Result<MatchingCard> {
    if description.trim().is_empty() {
        return Err(LedgerError::InvalidInput("description must not be empty".into()));
    }

    let card = MatchingCard::new(author_id, description, match_type, now);

    let result = conn.execute(
        "INSERT INTO matching_cards (id, author_id, description, match_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            card.id,
            card.author_id,
            card.description,
            card.match_type,
            format_timestamp(&card.created_at),
        ],
    );

    match result {
        Ok(_) => Ok(card),
        Err(e) if is_unique_violation(&e) => Err(LedgerError::DuplicateCard),
        Err(e) => Err(e.into()),
    }
}

pub fn find_card(conn: &Connection, card_id: &str) -> Result<Option<MatchingCard>> {
    let sql = format!("SELECT {} FROM matching_cards WHERE id = ?1", CARD_COLUMNS);
    Ok(conn.query_row(&sql, [card_id], card_from_row).optional()?)
}

pub fn get_card(conn: &Connection, card_id: &str) -> Result<MatchingCard> {
    find_card(conn, card_id)?.ok_or_else(|| LedgerError::CardNotFound(card_id.to_string()))
}

pub fn find_card_by_author(conn: &Connection, author_id: &str) -> Result<Option<MatchingCard>> {
    let sql = format!("SELECT {} FROM matching_cards WHERE author_id = ?1", CARD_COLUMNS);
    Ok(conn.query_row(&sql, [author_id], card_from_row).optional()?)
}

/// Cards created at or after `since`, newest first, without author identity
pub fn list_recent_cards(conn: &Connection, since: DateTime<Utc>) -> Result<Vec<CardListing>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.description, c.match_type, c.created_at,
                (SELECT COUNT(*) FROM reveal_records r WHERE r.card_id = c.id)
         FROM matching_cards c
         WHERE c.created_at >= ?1
         ORDER BY c.created_at DESC, c.id",
    )?;

    let listings = stmt
        .query_map([format_timestamp(&since)], |row| {
            Ok(CardListing {
                id: row.get(0)?,
                description: row.get(1)?,
                match_type: row.get(2)?,
                created_at: timestamp_column(row, 3)?,
                reveal_count: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(listings)
}

/// Every card with its author, newest first (admin view)
pub fn list_all_cards(conn: &Connection) -> Result<Vec<MatchingCard>> {
    let sql = format!(
        "SELECT {} FROM matching_cards ORDER BY created_at DESC, id",
        CARD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let cards = stmt
        .query_map([], card_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cards)
}

/// Delete a card and every reveal record pointing at it.
///
/// Must run inside a transaction; returns the number of reveal records removed.
pub fn delete_card(conn: &Connection, card_id: &str) -> Result<usize> {
    let reveals = conn.execute("DELETE FROM reveal_records WHERE card_id = ?1", [card_id])?;
    let deleted = conn.execute("DELETE FROM matching_cards WHERE id = ?1", [card_id])?;

    if deleted == 0 {
        return Err(LedgerError::CardNotFound(card_id.to_string()));
    }
    Ok(reveals)
}

/// Delete the caller's own card (with cascade); returns the removed card
pub fn delete_card_by_author(conn: &Connection, author_id: &str) -> Result<MatchingCard> {
    let card = find_card_by_author(conn, author_id)?
        .ok_or_else(|| LedgerError::CardNotFound(format!("no card authored by {}", author_id)))?;
    delete_card(conn, &card.id)?;
    Ok(card)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::entities::account::{insert_account, NewAccount};
    use chrono::{Duration, TimeZone};

    fn seed_author(store: &crate::db::Store, id: &str) {
        store
            .write(|tx| insert_account(tx, &NewAccount::member(id, id), 2, Utc::now()))
            .unwrap();
    }

    #[test]
    fn test_create_card() {
        let (_dir, store) = test_store();
        seed_author(&store, "alice");

        let card = store
            .write(|tx| create_card(tx, "alice", "  likes board games  ", MatchType::Pair, Utc::now()))
            .unwrap();
        assert_eq!(card.author_id, "alice");
        assert_eq!(card.description, "likes board games");

        let loaded = store.read(|conn| get_card(conn, &card.id)).unwrap();
        assert_eq!(loaded, card);
    }

    #[test]
    fn test_returned_card_matches_stored_row() {
        let (_dir, store) = test_store();
        seed_author(&store, "alice");
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 10, 0, 0).unwrap() + Duration::nanoseconds(123_456_789);

        let card = store
            .write(|tx| create_card(tx, "alice", "hello", MatchType::Pair, now))
            .unwrap();
        assert_eq!(card.created_at.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(store.read(|conn| get_card(conn, &card.id)).unwrap(), card);
    }

    #[test]
    fn test_second_card_is_duplicate() {
        let (_dir, store) = test_store();
        seed_author(&store, "alice");

        store
            .write(|tx| create_card(tx, "alice", "first", MatchType::Pair, Utc::now()))
            .unwrap();
        let err = store
            .write(|tx| create_card(tx, "alice", "second", MatchType::Trio, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateCard));
    }

    #[test]
    fn test_empty_description_rejected() {
        let (_dir, store) = test_store();
        seed_author(&store, "alice");

        let err = store
            .write(|tx| create_card(tx, "alice", "   ", MatchType::Pair, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn test_card_for_unknown_author_fails() {
        let (_dir, store) = test_store();
        let err = store
            .write(|tx| create_card(tx, "nobody", "hello", MatchType::Pair, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[test]
    fn test_delete_cascades_reveals_and_frees_author() {
        let (_dir, store) = test_store();
        seed_author(&store, "alice");
        seed_author(&store, "bob");

        let card = store
            .write(|tx| create_card(tx, "alice", "hello", MatchType::Pair, Utc::now()))
            .unwrap();
        store
            .write(|tx| {
                tx.execute(
                    "INSERT INTO reveal_records (viewer_id, card_id, created_at) VALUES ('bob', ?1, ?2)",
                    params![card.id, format_timestamp(&Utc::now())],
                )?;
                Ok(())
            })
            .unwrap();

        let removed = store.write(|tx| delete_card(tx, &card.id)).unwrap();
        assert_eq!(removed, 1);

        let orphans: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM reveal_records", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(orphans, 0);

        // Author may post again once the old card is gone
        store
            .write(|tx| create_card(tx, "alice", "again", MatchType::Trio, Utc::now()))
            .unwrap();
    }

    #[test]
    fn test_delete_missing_card() {
        let (_dir, store) = test_store();
        let err = store.write(|tx| delete_card(tx, "missing")).unwrap_err();
        assert!(matches!(err, LedgerError::CardNotFound(_)));

        seed_author(&store, "alice");
        let err = store.write(|tx| delete_card_by_author(tx, "alice")).unwrap_err();
        assert!(matches!(err, LedgerError::CardNotFound(_)));
    }

    #[test]
    fn test_recent_listing_window() {
        let (_dir, store) = test_store();
        seed_author(&store, "alice");
        seed_author(&store, "bob");
        let now = Utc::now();

        store
            .write(|tx| create_card(tx, "alice", "stale", MatchType::Pair, now - Duration::days(10)))
            .unwrap();
        let fresh = store
            .write(|tx| create_card(tx, "bob", "fresh", MatchType::Trio, now))
            .unwrap();

        let listings = store
            .read(|conn| list_recent_cards(conn, now - Duration::days(7)))
            .unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, fresh.id);
        assert_eq!(listings[0].reveal_count, 0);

        let all = store.read(list_all_cards).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].description, "fresh");
    }

    #[test]
    fn test_match_type_parsing() {
        assert_eq!("pair".parse::<MatchType>().unwrap(), MatchType::Pair);
        assert_eq!("TRIO".parse::<MatchType>().unwrap(), MatchType::Trio);
        assert!("QUARTET".parse::<MatchType>().is_err());
    }
}

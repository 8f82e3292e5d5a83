// SQLite persistence for drafts, with conditional writes and a change feed.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{CreatedDraft, DraftRepository, JoinOutcome, NewDraft};
use crate::draft::auction::{BidPlan, NominationPlan, SettlementPlan};
use crate::draft::ledger::{PickCommit, UndoPlan};
use crate::draft::model::{
    new_id, Auction, AuctionStatus, Bid, Draft, DraftMode, DraftStatus, Participant, Pick, Team,
    WishlistItem,
};
use crate::draft::room::{generate_room_code, normalize_room_code, validate_join, JoinRequest};
use crate::draft::store::Snapshot;
use crate::error::{Rejection, RepoError};
use crate::sync::event::{ChangeBatch, ChangeEvent, Table};

/// Batches buffered per subscriber before it is reported as lagged.
const CHANGE_CHANNEL_CAPACITY: usize = 512;

const ROOM_CODE_ATTEMPTS: usize = 8;

const DRAFT_COLUMNS: &str = "id, name, host_id, format, budget_per_team, max_teams, mode, status, \
     current_turn, current_round, settings, room_code, password";
const TEAM_COLUMNS: &str = "id, draft_id, name, owner_id, budget_remaining, draft_order";
const PARTICIPANT_COLUMNS: &str =
    "id, draft_id, user_id, display_name, team_id, is_host, is_admin, last_seen";
const PICK_COLUMNS: &str = "id, draft_id, team_id, item_id, item_name, cost, pick_order, round";
const AUCTION_COLUMNS: &str = "id, draft_id, item_id, item_name, starting_bid, current_bid, \
     current_bidder_id, time_remaining, status, nominated_by";
const WISHLIST_COLUMNS: &str = "id, draft_id, participant_id, item_id, priority, is_available, cost";

/// SQLite-backed [`DraftRepository`].
///
/// All access goes through one connection behind a mutex, so every
/// transaction is serialized. Each mutating transaction bumps the draft's
/// change sequence and, after commit, publishes its batch to subscribers.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeBatch>,
}

impl SqliteRepository {
    /// Open (or create) a database at `path` and ensure the schema exists.
    /// Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS drafts (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                host_id         TEXT NOT NULL,
                format          TEXT NOT NULL,
                budget_per_team INTEGER NOT NULL,
                max_teams       INTEGER NOT NULL,
                mode            TEXT NOT NULL,
                status          TEXT NOT NULL,
                current_turn    INTEGER NOT NULL DEFAULT 0,
                current_round   INTEGER NOT NULL DEFAULT 1,
                settings        TEXT NOT NULL,
                room_code       TEXT NOT NULL UNIQUE,
                password        TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS teams (
                id               TEXT PRIMARY KEY,
                draft_id         TEXT NOT NULL REFERENCES drafts(id),
                name             TEXT NOT NULL,
                owner_id         TEXT NOT NULL,
                budget_remaining INTEGER NOT NULL CHECK (budget_remaining >= 0),
                draft_order      INTEGER NOT NULL,
                UNIQUE(draft_id, draft_order)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_teams_name
                ON teams(draft_id, name COLLATE NOCASE);

            CREATE TABLE IF NOT EXISTS participants (
                id           TEXT PRIMARY KEY,
                draft_id     TEXT NOT NULL REFERENCES drafts(id),
                user_id      TEXT NOT NULL,
                display_name TEXT NOT NULL,
                team_id      TEXT,
                is_host      INTEGER NOT NULL DEFAULT 0,
                is_admin     INTEGER NOT NULL DEFAULT 0,
                last_seen    TEXT NOT NULL,
                UNIQUE(draft_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS picks (
                id         TEXT PRIMARY KEY,
                draft_id   TEXT NOT NULL REFERENCES drafts(id),
                team_id    TEXT NOT NULL REFERENCES teams(id),
                item_id    INTEGER NOT NULL,
                item_name  TEXT NOT NULL,
                cost       INTEGER NOT NULL,
                pick_order INTEGER NOT NULL,
                round      INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_picks_item ON picks(draft_id, item_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_picks_order ON picks(draft_id, pick_order);

            CREATE TABLE IF NOT EXISTS auctions (
                id                TEXT PRIMARY KEY,
                draft_id          TEXT NOT NULL REFERENCES drafts(id),
                item_id           INTEGER NOT NULL,
                item_name         TEXT NOT NULL,
                starting_bid      INTEGER NOT NULL,
                current_bid       INTEGER NOT NULL,
                current_bidder_id TEXT NOT NULL,
                time_remaining    INTEGER NOT NULL,
                status            TEXT NOT NULL,
                nominated_by      TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_auction
                ON auctions(draft_id) WHERE status = 'active';

            CREATE TABLE IF NOT EXISTS bids (
                id          TEXT PRIMARY KEY,
                auction_id  TEXT NOT NULL REFERENCES auctions(id),
                team_id     TEXT NOT NULL,
                amount      INTEGER NOT NULL,
                bidder_name TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS wishlist_items (
                id             TEXT PRIMARY KEY,
                draft_id       TEXT NOT NULL REFERENCES drafts(id),
                participant_id TEXT NOT NULL REFERENCES participants(id),
                item_id        INTEGER NOT NULL,
                priority       INTEGER NOT NULL,
                is_available   INTEGER NOT NULL,
                cost           INTEGER NOT NULL,
                UNIQUE(participant_id, item_id)
            );

            CREATE TABLE IF NOT EXISTS change_log (
                draft_id TEXT PRIMARY KEY,
                seq      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attempt_keys (
                key        TEXT PRIMARY KEY,
                draft_id   TEXT NOT NULL,
                batch      TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS host_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Persist an arbitrary JSON value under `key` (host bookkeeping such as
    /// the draft being hosted).
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO host_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a value saved with [`save_state`](Self::save_state).
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM host_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query host state")?;
        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }

    /// Run `body` in one transaction on behalf of `draft_id`.
    ///
    /// With a `key`, a previously committed batch for that key is returned
    /// without running `body`. Otherwise the events collected by `body` are
    /// stamped with the draft's next sequence number, recorded under the key,
    /// committed and published. Any error rolls the whole transaction back.
    fn write_tx(
        &self,
        draft_id: &str,
        key: Option<&str>,
        label: &str,
        body: impl FnOnce(&Connection, &mut Events) -> Result<(), RepoError>,
    ) -> Result<ChangeBatch, RepoError> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;

        if let Some(key) = key {
            if let Some(batch) = stored_batch(&tx, key)? {
                debug!("{} replayed for attempt {}", label, key);
                return Ok(batch);
            }
        }

        let mut events = Events::default();
        body(&tx, &mut events)?;

        let seq: i64 = tx
            .query_row(
                "INSERT INTO change_log (draft_id, seq) VALUES (?1, 1)
                 ON CONFLICT(draft_id) DO UPDATE SET seq = seq + 1
                 RETURNING seq",
                params![draft_id],
                |row| row.get(0),
            )
            .context("failed to advance change sequence")?;
        let batch = ChangeBatch {
            seq: seq as u64,
            draft_id: draft_id.to_string(),
            events: events.0,
        };

        if let Some(key) = key {
            let json = serde_json::to_string(&batch).context("failed to serialize change batch")?;
            tx.execute(
                "INSERT INTO attempt_keys (key, draft_id, batch) VALUES (?1, ?2, ?3)",
                params![key, draft_id, json],
            )
            .context("failed to record attempt key")?;
        }

        tx.commit()
            .with_context(|| format!("failed to commit {label}"))?;
        debug!("{} committed as seq {} on draft {}", label, batch.seq, draft_id);

        // Published under the lock so subscribers observe sequence order.
        let _ = self.changes.send(batch.clone());
        Ok(batch)
    }

    fn read<T>(&self, body: impl FnOnce(&Connection) -> Result<T, RepoError>) -> Result<T, RepoError> {
        let conn = self.conn();
        body(&conn)
    }
}

// ---------------------------------------------------------------------------
// Event collection
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Events(Vec<ChangeEvent>);

impl Events {
    fn insert<T: Serialize>(&mut self, table: Table, row: &T) -> Result<(), RepoError> {
        self.0
            .push(ChangeEvent::insert(table, row).context("failed to encode change event")?);
        Ok(())
    }

    fn update<T: Serialize>(&mut self, table: Table, row: &T) -> Result<(), RepoError> {
        self.0
            .push(ChangeEvent::update(table, row).context("failed to encode change event")?);
        Ok(())
    }

    fn delete<T: Serialize>(&mut self, table: Table, row: &T) -> Result<(), RepoError> {
        self.0
            .push(ChangeEvent::delete(table, row).context("failed to encode change event")?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn text_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    parse(&value).ok_or_else(|| conversion_error(idx, format!("unexpected value '{value}'")))
}

fn draft_row(row: &Row<'_>) -> rusqlite::Result<Draft> {
    let settings: String = row.get(10)?;
    Ok(Draft {
        id: row.get(0)?,
        name: row.get(1)?,
        host_id: row.get(2)?,
        format: row.get(3)?,
        budget_per_team: row.get(4)?,
        max_teams: row.get(5)?,
        mode: text_enum(row, 6, DraftMode::parse)?,
        status: text_enum(row, 7, DraftStatus::parse)?,
        current_turn: row.get(8)?,
        current_round: row.get(9)?,
        settings: serde_json::from_str(&settings)
            .map_err(|e| conversion_error(10, e.to_string()))?,
        room_code: row.get(11)?,
        password: row.get(12)?,
    })
}

fn team_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        draft_id: row.get(1)?,
        name: row.get(2)?,
        owner_id: row.get(3)?,
        budget_remaining: row.get(4)?,
        draft_order: row.get(5)?,
    })
}

fn participant_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    let last_seen: String = row.get(7)?;
    Ok(Participant {
        id: row.get(0)?,
        draft_id: row.get(1)?,
        user_id: row.get(2)?,
        display_name: row.get(3)?,
        team_id: row.get(4)?,
        is_host: row.get(5)?,
        is_admin: row.get(6)?,
        last_seen: DateTime::parse_from_rfc3339(&last_seen)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| conversion_error(7, e.to_string()))?,
    })
}

fn pick_row(row: &Row<'_>) -> rusqlite::Result<Pick> {
    Ok(Pick {
        id: row.get(0)?,
        draft_id: row.get(1)?,
        team_id: row.get(2)?,
        item_id: row.get(3)?,
        item_name: row.get(4)?,
        cost: row.get(5)?,
        pick_order: row.get(6)?,
        round: row.get(7)?,
    })
}

fn auction_row(row: &Row<'_>) -> rusqlite::Result<Auction> {
    Ok(Auction {
        id: row.get(0)?,
        draft_id: row.get(1)?,
        item_id: row.get(2)?,
        item_name: row.get(3)?,
        starting_bid: row.get(4)?,
        current_bid: row.get(5)?,
        current_bidder_id: row.get(6)?,
        time_remaining: row.get(7)?,
        status: text_enum(row, 8, AuctionStatus::parse)?,
        nominated_by: row.get(9)?,
    })
}

fn bid_row(row: &Row<'_>) -> rusqlite::Result<Bid> {
    Ok(Bid {
        id: row.get(0)?,
        auction_id: row.get(1)?,
        team_id: row.get(2)?,
        amount: row.get(3)?,
        bidder_name: row.get(4)?,
    })
}

fn wishlist_row(row: &Row<'_>) -> rusqlite::Result<WishlistItem> {
    Ok(WishlistItem {
        id: row.get(0)?,
        draft_id: row.get(1)?,
        participant_id: row.get(2)?,
        item_id: row.get(3)?,
        priority: row.get(4)?,
        is_available: row.get(5)?,
        cost: row.get(6)?,
    })
}

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

fn query_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("failed to prepare query: {sql}"))?;
    let rows = stmt
        .query_map(params, map)
        .context("failed to run query")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map rows")?;
    Ok(rows)
}

fn query_opt<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    conn.query_row(sql, params, map)
        .optional()
        .context("failed to run query")
}

fn load_draft(conn: &Connection, draft_id: &str) -> Result<Draft, RepoError> {
    query_opt(
        conn,
        &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?1"),
        params![draft_id],
        draft_row,
    )?
    .ok_or_else(|| RepoError::NotFound {
        entity: "draft",
        id: draft_id.to_string(),
    })
}

fn load_team(conn: &Connection, team_id: &str) -> Result<Team, RepoError> {
    query_opt(
        conn,
        &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?1"),
        params![team_id],
        team_row,
    )?
    .ok_or_else(|| RepoError::NotFound {
        entity: "team",
        id: team_id.to_string(),
    })
}

fn load_teams(conn: &Connection, draft_id: &str) -> Result<Vec<Team>> {
    query_all(
        conn,
        &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE draft_id = ?1 ORDER BY draft_order"),
        params![draft_id],
        team_row,
    )
}

fn load_participant(conn: &Connection, participant_id: &str) -> Result<Participant, RepoError> {
    query_opt(
        conn,
        &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"),
        params![participant_id],
        participant_row,
    )?
    .ok_or_else(|| RepoError::NotFound {
        entity: "participant",
        id: participant_id.to_string(),
    })
}

fn load_auction(conn: &Connection, auction_id: &str) -> Result<Auction, RepoError> {
    query_opt(
        conn,
        &format!("SELECT {AUCTION_COLUMNS} FROM auctions WHERE id = ?1"),
        params![auction_id],
        auction_row,
    )?
    .ok_or_else(|| RepoError::NotFound {
        entity: "auction",
        id: auction_id.to_string(),
    })
}

fn stored_batch(conn: &Connection, key: &str) -> Result<Option<ChangeBatch>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT batch FROM attempt_keys WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("failed to look up attempt key")?;
    json.map(|s| serde_json::from_str(&s).context("failed to decode stored change batch"))
        .transpose()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn item_taken(conn: &Connection, draft_id: &str, item_id: u32) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM picks WHERE draft_id = ?1 AND item_id = ?2)",
        params![draft_id, item_id],
        |row| row.get(0),
    )
    .context("failed to check pick existence")
}

fn insert_pick(conn: &Connection, pick: &Pick) -> Result<(), RepoError> {
    match conn.execute(
        &format!("INSERT INTO picks ({PICK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            pick.id,
            pick.draft_id,
            pick.team_id,
            pick.item_id,
            pick.item_name,
            pick.cost,
            pick.pick_order,
            pick.round,
        ],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            if item_taken(conn, &pick.draft_id, pick.item_id)? {
                Err(Rejection::AlreadyTaken {
                    item_id: pick.item_id,
                }
                .into())
            } else {
                Err(Rejection::StaleState.into())
            }
        }
        Err(e) => Err(anyhow::Error::new(e).context("failed to insert pick").into()),
    }
}

/// Debit `cost` from a team, refusing to go below zero.
fn debit_team(conn: &Connection, team_id: &str, cost: u32) -> Result<Team, RepoError> {
    let changed = conn
        .execute(
            "UPDATE teams SET budget_remaining = budget_remaining - ?2
             WHERE id = ?1 AND budget_remaining >= ?2",
            params![team_id, cost],
        )
        .context("failed to debit team budget")?;
    let team = load_team(conn, team_id)?;
    if changed == 0 {
        return Err(Rejection::InsufficientBudget {
            cost,
            remaining: team.budget_remaining,
        }
        .into());
    }
    Ok(team)
}

fn insert_participant(conn: &Connection, p: &Participant) -> Result<(), RepoError> {
    match conn.execute(
        &format!("INSERT INTO participants ({PARTICIPANT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            p.id,
            p.draft_id,
            p.user_id,
            p.display_name,
            p.team_id,
            p.is_host,
            p.is_admin,
            p.last_seen.to_rfc3339(),
        ],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(Rejection::JoinRefused {
            reason: "already joined".to_string(),
        }
        .into()),
        Err(e) => Err(anyhow::Error::new(e).context("failed to insert participant").into()),
    }
}

fn insert_team(conn: &Connection, t: &Team) -> Result<(), RepoError> {
    match conn.execute(
        &format!("INSERT INTO teams ({TEAM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![t.id, t.draft_id, t.name, t.owner_id, t.budget_remaining, t.draft_order],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(Rejection::JoinRefused {
            reason: format!("team name '{}' is taken", t.name),
        }
        .into()),
        Err(e) => Err(anyhow::Error::new(e).context("failed to insert team").into()),
    }
}

/// Create a participant (and team, if requested) for `request` inside an
/// open transaction.
fn add_member(
    conn: &Connection,
    draft: &Draft,
    request: &JoinRequest,
    is_host: bool,
) -> Result<(Participant, Option<Team>), RepoError> {
    let teams = load_teams(conn, &draft.id)?;
    validate_join(draft, &teams, request)?;

    let mut participant = Participant {
        id: new_id(),
        draft_id: draft.id.clone(),
        user_id: request.user_id.clone(),
        display_name: request.display_name.trim().to_string(),
        team_id: None,
        is_host,
        is_admin: is_host,
        last_seen: Utc::now(),
    };
    let team = request.team_name.as_deref().map(|name| Team {
        id: new_id(),
        draft_id: draft.id.clone(),
        name: name.trim().to_string(),
        owner_id: participant.id.clone(),
        budget_remaining: draft.budget_per_team,
        draft_order: teams.len() as u32 + 1,
    });
    participant.team_id = team.as_ref().map(|t| t.id.clone());

    insert_participant(conn, &participant)?;
    if let Some(team) = &team {
        insert_team(conn, team)?;
    }
    Ok((participant, team))
}

#[async_trait]
impl DraftRepository for SqliteRepository {
    async fn load_snapshot(&self, draft_id: &str) -> Result<Snapshot, RepoError> {
        self.read(|conn| {
            let draft = load_draft(conn, draft_id)?;
            let teams = load_teams(conn, draft_id)?;
            let participants = query_all(
                conn,
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE draft_id = ?1"),
                params![draft_id],
                participant_row,
            )?;
            let picks = query_all(
                conn,
                &format!("SELECT {PICK_COLUMNS} FROM picks WHERE draft_id = ?1 ORDER BY pick_order"),
                params![draft_id],
                pick_row,
            )?;
            let auctions = query_all(
                conn,
                &format!("SELECT {AUCTION_COLUMNS} FROM auctions WHERE draft_id = ?1"),
                params![draft_id],
                auction_row,
            )?;
            let bids = query_all(
                conn,
                "SELECT b.id, b.auction_id, b.team_id, b.amount, b.bidder_name
                 FROM bids b JOIN auctions a ON a.id = b.auction_id
                 WHERE a.draft_id = ?1 ORDER BY b.amount",
                params![draft_id],
                bid_row,
            )?;
            let wishlist = query_all(
                conn,
                &format!(
                    "SELECT {WISHLIST_COLUMNS} FROM wishlist_items WHERE draft_id = ?1 \
                     ORDER BY participant_id, priority"
                ),
                params![draft_id],
                wishlist_row,
            )?;
            let seq: i64 = conn
                .query_row(
                    "SELECT COALESCE((SELECT seq FROM change_log WHERE draft_id = ?1), 0)",
                    params![draft_id],
                    |row| row.get(0),
                )
                .context("failed to read change sequence")?;

            Ok(Snapshot {
                seq: seq as u64,
                draft,
                teams,
                participants,
                picks,
                auctions,
                bids,
                wishlist,
            })
        })
    }

    async fn create_draft(&self, new: NewDraft) -> Result<CreatedDraft, RepoError> {
        let mut conn = self.conn();
        for _ in 0..ROOM_CODE_ATTEMPTS {
            let draft = Draft {
                id: new_id(),
                name: new.name.clone(),
                host_id: new.host.user_id.clone(),
                format: new.format.clone(),
                budget_per_team: new.budget_per_team,
                max_teams: new.max_teams,
                mode: new.mode,
                status: DraftStatus::Setup,
                current_turn: 0,
                current_round: 1,
                settings: new.settings.clone(),
                room_code: generate_room_code(),
                password: new.password.clone().filter(|p| !p.is_empty()),
            };
            let settings =
                serde_json::to_string(&draft.settings).context("failed to serialize settings")?;

            let tx = conn.transaction().context("failed to begin transaction")?;
            let inserted = tx.execute(
                &format!(
                    "INSERT INTO drafts ({DRAFT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    draft.id,
                    draft.name,
                    draft.host_id,
                    draft.format,
                    draft.budget_per_team,
                    draft.max_teams,
                    draft.mode.as_str(),
                    draft.status.as_str(),
                    draft.current_turn,
                    draft.current_round,
                    settings,
                    draft.room_code,
                    draft.password,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    debug!("room code {} collided, retrying", draft.room_code);
                    continue;
                }
                Err(e) => return Err(anyhow::Error::new(e).context("failed to insert draft").into()),
            }

            let mut host_request = new.host.clone();
            host_request.password = draft.password.clone();
            let (host, team) = add_member(&tx, &draft, &host_request, true)?;
            tx.execute(
                "INSERT INTO change_log (draft_id, seq) VALUES (?1, 0)",
                params![draft.id],
            )
            .context("failed to start change sequence")?;
            tx.commit().context("failed to commit create_draft")?;

            info!(
                "created {} draft '{}' ({}), room code {}",
                draft.mode, draft.name, draft.id, draft.room_code
            );
            return Ok(CreatedDraft {
                draft,
                host,
                team,
            });
        }
        Err(anyhow::anyhow!("could not allocate a unique room code").into())
    }

    async fn find_by_room_code(&self, room_code: &str) -> Result<Draft, RepoError> {
        let code = normalize_room_code(room_code);
        self.read(|conn| {
            query_opt(
                conn,
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE room_code = ?1"),
                params![code],
                draft_row,
            )?
            .ok_or_else(|| RepoError::NotFound {
                entity: "room",
                id: code.clone(),
            })
        })
    }

    async fn join_draft(&self, room_code: &str, request: JoinRequest) -> Result<JoinOutcome, RepoError> {
        let draft = self.find_by_room_code(room_code).await?;

        let existing = self.read(|conn| {
            let p = query_opt(
                conn,
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE draft_id = ?1 AND user_id = ?2"
                ),
                params![draft.id, request.user_id],
                participant_row,
            )?;
            let team = match p.as_ref().and_then(|p| p.team_id.as_deref()) {
                Some(team_id) => Some(load_team(conn, team_id)?),
                None => None,
            };
            Ok(p.map(|p| (p, team)))
        })?;
        if let Some((participant, team)) = existing {
            debug!("{} rejoined draft {}", participant.display_name, draft.id);
            return Ok(JoinOutcome {
                draft_id: draft.id,
                participant,
                team,
                batch: None,
            });
        }

        let mut joined = None;
        let batch = self.write_tx(&draft.id, None, "join", |conn, events| {
            // Re-read inside the transaction; status or teams may have moved.
            let draft = load_draft(conn, &draft.id)?;
            let (participant, team) = add_member(conn, &draft, &request, false)?;
            events.insert(Table::Participants, &participant)?;
            if let Some(team) = &team {
                events.insert(Table::Teams, team)?;
            }
            joined = Some((participant, team));
            Ok(())
        })?;
        let (participant, team) =
            joined.ok_or_else(|| anyhow::anyhow!("join committed without a participant"))?;

        info!(
            "{} joined draft {}{}",
            participant.display_name,
            draft.id,
            team.as_ref()
                .map(|t| format!(" as '{}'", t.name))
                .unwrap_or_default()
        );
        Ok(JoinOutcome {
            draft_id: draft.id,
            participant,
            team,
            batch: Some(batch),
        })
    }

    async fn set_status(
        &self,
        draft_id: &str,
        from: DraftStatus,
        to: DraftStatus,
        key: &str,
    ) -> Result<ChangeBatch, RepoError> {
        let label = format!("{from} -> {to}");
        let batch = self.write_tx(draft_id, Some(key), &label, |conn, events| {
            let starting = from == DraftStatus::Setup && to == DraftStatus::Active;
            let changed = conn
                .execute(
                    "UPDATE drafts SET status = ?3,
                        current_turn  = CASE WHEN ?4 THEN 1 ELSE current_turn END,
                        current_round = CASE WHEN ?4 THEN 1 ELSE current_round END
                     WHERE id = ?1 AND status = ?2",
                    params![draft_id, from.as_str(), to.as_str(), starting],
                )
                .context("failed to update draft status")?;
            let draft = load_draft(conn, draft_id)?;
            if changed == 0 {
                return Err(Rejection::StaleState.into());
            }
            events.update(Table::Drafts, &draft)?;
            Ok(())
        })?;
        info!("draft {} moved {}", draft_id, label);
        Ok(batch)
    }

    async fn touch_participant(
        &self,
        participant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ChangeBatch, RepoError> {
        let draft_id = self.read(|conn| Ok(load_participant(conn, participant_id)?.draft_id))?;
        let batch = self.write_tx(&draft_id, None, "touch", |conn, events| {
            conn.execute(
                "UPDATE participants SET last_seen = ?2 WHERE id = ?1",
                params![participant_id, at.to_rfc3339()],
            )
            .context("failed to update last_seen")?;
            events.update(Table::Participants, &load_participant(conn, participant_id)?)?;
            Ok(())
        })?;
        Ok(batch)
    }

    async fn commit_pick(&self, commit: &PickCommit, key: &str) -> Result<ChangeBatch, RepoError> {
        let batch = self.write_tx(&commit.draft_id, Some(key), "pick", |conn, events| {
            if item_taken(conn, &commit.draft_id, commit.pick.item_id)? {
                return Err(Rejection::AlreadyTaken {
                    item_id: commit.pick.item_id,
                }
                .into());
            }
            let advanced = conn
                .execute(
                    "UPDATE drafts SET current_turn = ?3, current_round = ?4,
                        status = CASE WHEN ?5 THEN 'completed' ELSE status END
                     WHERE id = ?1 AND current_turn = ?2 AND status = 'active' AND mode = 'snake'",
                    params![
                        commit.draft_id,
                        commit.expected_turn,
                        commit.next_turn,
                        commit.next_round,
                        commit.completes,
                    ],
                )
                .context("failed to advance turn")?;
            if advanced == 0 {
                return Err(Rejection::StaleState.into());
            }
            insert_pick(conn, &commit.pick)?;
            let team = debit_team(conn, &commit.pick.team_id, commit.pick.cost)?;

            events.insert(Table::Picks, &commit.pick)?;
            events.update(Table::Teams, &team)?;
            events.update(Table::Drafts, &load_draft(conn, &commit.draft_id)?)?;
            Ok(())
        })?;
        info!(
            "pick #{} {} -> team {} for {}",
            commit.pick.pick_order, commit.pick.item_name, commit.pick.team_id, commit.pick.cost
        );
        Ok(batch)
    }

    async fn undo_pick(&self, plan: &UndoPlan, key: &str) -> Result<ChangeBatch, RepoError> {
        let batch = self.write_tx(&plan.draft_id, Some(key), "undo", |conn, events| {
            let removed = conn
                .execute(
                    "DELETE FROM picks WHERE id = ?1 AND draft_id = ?2
                       AND pick_order = (SELECT MAX(pick_order) FROM picks WHERE draft_id = ?2)",
                    params![plan.pick.id, plan.draft_id],
                )
                .context("failed to delete pick")?;
            if removed == 0 {
                return Err(Rejection::StaleState.into());
            }
            conn.execute(
                "UPDATE teams SET budget_remaining = budget_remaining + ?2 WHERE id = ?1",
                params![plan.pick.team_id, plan.pick.cost],
            )
            .context("failed to credit team budget")?;
            let retreated = conn
                .execute(
                    "UPDATE drafts SET current_turn = ?3, current_round = ?4,
                        status = CASE WHEN ?5 THEN 'active' ELSE status END
                     WHERE id = ?1 AND current_turn = ?2",
                    params![
                        plan.draft_id,
                        plan.expected_turn,
                        plan.restore_turn,
                        plan.restore_round,
                        plan.reopen,
                    ],
                )
                .context("failed to retreat turn")?;
            if retreated == 0 {
                return Err(Rejection::StaleState.into());
            }

            events.delete(Table::Picks, &plan.pick)?;
            events.update(Table::Teams, &load_team(conn, &plan.pick.team_id)?)?;
            events.update(Table::Drafts, &load_draft(conn, &plan.draft_id)?)?;
            Ok(())
        })?;
        info!("undid pick #{} ({})", plan.pick.pick_order, plan.pick.item_name);
        Ok(batch)
    }

    async fn open_auction(&self, plan: &NominationPlan, key: &str) -> Result<ChangeBatch, RepoError> {
        let auction = &plan.auction;
        let batch = self.write_tx(&plan.draft_id, Some(key), "nomination", |conn, events| {
            let draft = load_draft(conn, &plan.draft_id)?;
            if draft.status != DraftStatus::Active || draft.current_turn != plan.expected_turn {
                return Err(Rejection::StaleState.into());
            }
            if item_taken(conn, &plan.draft_id, auction.item_id)? {
                return Err(Rejection::AlreadyTaken {
                    item_id: auction.item_id,
                }
                .into());
            }
            let inserted = conn.execute(
                &format!(
                    "INSERT INTO auctions ({AUCTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    auction.id,
                    auction.draft_id,
                    auction.item_id,
                    auction.item_name,
                    auction.starting_bid,
                    auction.current_bid,
                    auction.current_bidder_id,
                    auction.time_remaining,
                    auction.status.as_str(),
                    auction.nominated_by,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => return Err(Rejection::AuctionInProgress.into()),
                Err(e) => return Err(anyhow::Error::new(e).context("failed to insert auction").into()),
            }
            events.insert(Table::Auctions, auction)?;
            Ok(())
        })?;
        info!(
            "team {} nominated {} at {}",
            auction.nominated_by, auction.item_name, auction.starting_bid
        );
        Ok(batch)
    }

    async fn place_bid(&self, plan: &BidPlan, key: &str) -> Result<ChangeBatch, RepoError> {
        let bid = &plan.bid;
        let batch = self.write_tx(&plan.draft_id, Some(key), "bid", |conn, events| {
            let team = load_team(conn, &bid.team_id)?;
            if bid.amount > team.budget_remaining {
                return Err(Rejection::InsufficientBudget {
                    cost: bid.amount,
                    remaining: team.budget_remaining,
                }
                .into());
            }
            let accepted = conn
                .execute(
                    "UPDATE auctions SET current_bid = ?4, current_bidder_id = ?5, time_remaining = ?6
                     WHERE id = ?1 AND status = 'active' AND time_remaining > 0
                       AND current_bid = ?2 AND current_bidder_id = ?3",
                    params![
                        plan.auction_id,
                        plan.expected_bid,
                        plan.expected_bidder,
                        bid.amount,
                        bid.team_id,
                        plan.reset_to,
                    ],
                )
                .context("failed to update auction bid")?;
            let auction = load_auction(conn, &plan.auction_id)?;
            if accepted == 0 {
                return Err(if !auction.is_active() || auction.time_remaining == 0 {
                    Rejection::AuctionNotActive
                } else if auction.current_bid >= bid.amount {
                    Rejection::BidTooLow {
                        amount: bid.amount,
                        current: auction.current_bid,
                    }
                } else {
                    Rejection::StaleState
                }
                .into());
            }
            conn.execute(
                "INSERT INTO bids (id, auction_id, team_id, amount, bidder_name)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![bid.id, bid.auction_id, bid.team_id, bid.amount, bid.bidder_name],
            )
            .context("failed to insert bid")?;

            events.update(Table::Auctions, &auction)?;
            events.insert(Table::Bids, bid)?;
            Ok(())
        })?;
        debug!("bid {} by {} on {}", bid.amount, bid.bidder_name, plan.auction_id);
        Ok(batch)
    }

    async fn update_auction_timer(
        &self,
        auction_id: &str,
        expected_bid: u32,
        time_remaining: u32,
    ) -> Result<ChangeBatch, RepoError> {
        let draft_id = self.read(|conn| Ok(load_auction(conn, auction_id)?.draft_id))?;
        let batch = self.write_tx(&draft_id, None, "timer", |conn, events| {
            let changed = conn
                .execute(
                    "UPDATE auctions SET time_remaining = ?3
                     WHERE id = ?1 AND status = 'active' AND current_bid = ?2",
                    params![auction_id, expected_bid, time_remaining],
                )
                .context("failed to update auction timer")?;
            if changed == 0 {
                return Err(Rejection::StaleState.into());
            }
            events.update(Table::Auctions, &load_auction(conn, auction_id)?)?;
            Ok(())
        })?;
        Ok(batch)
    }

    async fn settle_auction(&self, plan: &SettlementPlan, key: &str) -> Result<ChangeBatch, RepoError> {
        let batch = self.write_tx(&plan.draft_id, Some(key), "settlement", |conn, events| {
            let closed = conn
                .execute(
                    "UPDATE auctions SET status = 'completed', time_remaining = 0
                     WHERE id = ?1 AND status = 'active' AND current_bid = ?2 AND current_bidder_id = ?3",
                    params![plan.auction_id, plan.expected_bid, plan.expected_bidder],
                )
                .context("failed to close auction")?;
            if closed == 0 {
                return Err(Rejection::StaleState.into());
            }
            insert_pick(conn, &plan.pick)?;
            let team = debit_team(conn, &plan.pick.team_id, plan.pick.cost)?;
            let advanced = conn
                .execute(
                    "UPDATE drafts SET current_turn = ?3, current_round = ?4,
                        status = CASE WHEN ?5 THEN 'completed' ELSE status END
                     WHERE id = ?1 AND current_turn = ?2 AND status = 'active'",
                    params![
                        plan.draft_id,
                        plan.expected_turn,
                        plan.next_turn,
                        plan.next_round,
                        plan.completes,
                    ],
                )
                .context("failed to advance nomination")?;
            if advanced == 0 {
                return Err(Rejection::StaleState.into());
            }

            events.update(Table::Auctions, &load_auction(conn, &plan.auction_id)?)?;
            events.insert(Table::Picks, &plan.pick)?;
            events.update(Table::Teams, &team)?;
            events.update(Table::Drafts, &load_draft(conn, &plan.draft_id)?)?;
            Ok(())
        })?;
        info!(
            "auction settled: {} -> team {} for {}",
            plan.pick.item_name, plan.pick.team_id, plan.pick.cost
        );
        Ok(batch)
    }

    async fn cancel_auction(&self, draft_id: &str, auction_id: &str, key: &str) -> Result<ChangeBatch, RepoError> {
        let batch = self.write_tx(draft_id, Some(key), "cancel", |conn, events| {
            let changed = conn
                .execute(
                    "UPDATE auctions SET status = 'cancelled' WHERE id = ?1 AND draft_id = ?2 AND status = 'active'",
                    params![auction_id, draft_id],
                )
                .context("failed to cancel auction")?;
            if changed == 0 {
                return Err(Rejection::AuctionNotActive.into());
            }
            events.update(Table::Auctions, &load_auction(conn, auction_id)?)?;
            Ok(())
        })?;
        info!("auction {} cancelled", auction_id);
        Ok(batch)
    }

    async fn upsert_wishlist(
        &self,
        draft_id: &str,
        participant_id: &str,
        entries: &[WishlistItem],
    ) -> Result<ChangeBatch, RepoError> {
        let batch = self.write_tx(draft_id, None, "wishlist", |conn, events| {
            let existing = query_all(
                conn,
                &format!("SELECT {WISHLIST_COLUMNS} FROM wishlist_items WHERE participant_id = ?1"),
                params![participant_id],
                wishlist_row,
            )?;
            for old in existing.iter().filter(|o| !entries.iter().any(|e| e.id == o.id)) {
                conn.execute("DELETE FROM wishlist_items WHERE id = ?1", params![old.id])
                    .context("failed to delete wishlist entry")?;
                events.delete(Table::WishlistItems, old)?;
            }
            for entry in entries {
                match existing.iter().find(|o| o.id == entry.id) {
                    Some(old) if old == entry => {}
                    Some(_) => {
                        conn.execute(
                            "UPDATE wishlist_items SET priority = ?2, is_available = ?3, cost = ?4 WHERE id = ?1",
                            params![entry.id, entry.priority, entry.is_available, entry.cost],
                        )
                        .context("failed to update wishlist entry")?;
                        events.update(Table::WishlistItems, entry)?;
                    }
                    None => {
                        conn.execute(
                            &format!(
                                "INSERT INTO wishlist_items ({WISHLIST_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                            ),
                            params![
                                entry.id,
                                entry.draft_id,
                                entry.participant_id,
                                entry.item_id,
                                entry.priority,
                                entry.is_available,
                                entry.cost,
                            ],
                        )
                        .context("failed to insert wishlist entry")?;
                        events.insert(Table::WishlistItems, entry)?;
                    }
                }
            }
            Ok(())
        })?;
        Ok(batch)
    }

    async fn find_attempt(&self, key: &str) -> Result<Option<ChangeBatch>, RepoError> {
        self.read(|conn| Ok(stored_batch(conn, key)?))
    }

    async fn ping(&self) -> Result<(), RepoError> {
        self.read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .context("database ping failed")?;
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::model::DraftSettings;

    fn repo() -> SqliteRepository {
        SqliteRepository::open(":memory:").unwrap()
    }

    fn request(user: &str, team: Option<&str>) -> JoinRequest {
        JoinRequest {
            user_id: user.into(),
            display_name: format!("{user} name"),
            team_name: team.map(str::to_string),
            password: None,
        }
    }

    fn new_draft(mode: DraftMode) -> NewDraft {
        NewDraft {
            name: "Kanto Cup".into(),
            format: "ou".into(),
            mode,
            budget_per_team: 100,
            max_teams: 4,
            settings: DraftSettings {
                roster_size: 2,
                ..DraftSettings::default()
            },
            password: None,
            host: request("host", Some("Pallet")),
        }
    }

    #[tokio::test]
    async fn open_creates_tables() {
        let repo = repo();
        let conn = repo.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        for t in [
            "attempt_keys",
            "auctions",
            "bids",
            "change_log",
            "drafts",
            "participants",
            "picks",
            "teams",
            "wishlist_items",
        ] {
            assert!(tables.contains(&t.to_string()), "missing table {t}");
        }
    }

    #[tokio::test]
    async fn create_and_load_snapshot() {
        let repo = repo();
        let created = repo.create_draft(new_draft(DraftMode::Snake)).await.unwrap();
        assert_eq!(created.draft.status, DraftStatus::Setup);
        assert!(created.host.is_host);
        assert_eq!(created.team.as_ref().unwrap().draft_order, 1);

        let snap = repo.load_snapshot(&created.draft.id).await.unwrap();
        assert_eq!(snap.seq, 0);
        assert_eq!(snap.draft, created.draft);
        assert_eq!(snap.teams.len(), 1);
        assert_eq!(snap.participants.len(), 1);
        assert_eq!(snap.participants[0].team_id, created.team.map(|t| t.id));
    }

    #[tokio::test]
    async fn join_by_room_code_emits_batch() {
        let repo = repo();
        let created = repo.create_draft(new_draft(DraftMode::Snake)).await.unwrap();
        let mut rx = repo.subscribe();

        let code = created.draft.room_code.to_lowercase();
        let joined = repo.join_draft(&code, request("misty", Some("Cerulean"))).await.unwrap();
        assert_eq!(joined.team.as_ref().unwrap().draft_order, 2);
        let batch = joined.batch.unwrap();
        assert_eq!(batch.seq, 1);
        assert!(batch.touches(Table::Teams));
        assert_eq!(rx.recv().await.unwrap(), batch);

        // Rejoin returns the same participant without a new batch.
        let again = repo.join_draft(&code, request("misty", Some("Other"))).await.unwrap();
        assert_eq!(again.participant.id, joined.participant.id);
        assert!(again.batch.is_none());

        let dup = repo.join_draft(&code, request("brock", Some("CERULEAN"))).await;
        assert!(matches!(
            dup.unwrap_err().rejection(),
            Some(Rejection::JoinRefused { .. })
        ));
        assert!(matches!(
            repo.find_by_room_code("ZZZZZZ").await,
            Err(RepoError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn status_change_is_conditional() {
        let repo = repo();
        let created = repo.create_draft(new_draft(DraftMode::Snake)).await.unwrap();
        let id = &created.draft.id;
        repo.set_status(id, DraftStatus::Setup, DraftStatus::Active, "k1")
            .await
            .unwrap();
        let snap = repo.load_snapshot(id).await.unwrap();
        assert_eq!(snap.draft.status, DraftStatus::Active);
        assert_eq!(snap.draft.current_turn, 1);

        let err = repo
            .set_status(id, DraftStatus::Setup, DraftStatus::Active, "k2")
            .await
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::StaleState));

        // Same key replays the stored batch.
        let replay = repo
            .set_status(id, DraftStatus::Setup, DraftStatus::Active, "k1")
            .await
            .unwrap();
        assert_eq!(replay.seq, 1);
        assert_eq!(repo.find_attempt("k1").await.unwrap(), Some(replay));
        assert!(repo.find_attempt("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_round_trip() {
        let repo = repo();
        assert!(repo.load_state("hosted_draft").unwrap().is_none());
        repo.save_state("hosted_draft", &serde_json::json!("d-1")).unwrap();
        assert_eq!(
            repo.load_state("hosted_draft").unwrap(),
            Some(serde_json::json!("d-1"))
        );
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn wishlist_upsert_diffs_rows() {
        let repo = repo();
        let created = repo.create_draft(new_draft(DraftMode::Snake)).await.unwrap();
        let entry = |id: &str, item_id: u32, priority: u32| WishlistItem {
            id: id.into(),
            draft_id: created.draft.id.clone(),
            participant_id: created.host.id.clone(),
            item_id,
            priority,
            is_available: true,
            cost: 10,
        };
        let b1 = repo
            .upsert_wishlist(&created.draft.id, &created.host.id, &[entry("w1", 1, 1), entry("w2", 4, 2)])
            .await
            .unwrap();
        assert_eq!(b1.len(), 2);

        let b2 = repo
            .upsert_wishlist(&created.draft.id, &created.host.id, &[entry("w2", 4, 1)])
            .await
            .unwrap();
        let ops: Vec<_> = b2.events.iter().map(|e| e.operation).collect();
        assert_eq!(
            ops,
            vec![crate::sync::event::Operation::Delete, crate::sync::event::Operation::Update]
        );
        let snap = repo.load_snapshot(&created.draft.id).await.unwrap();
        assert_eq!(snap.wishlist.len(), 1);
        assert_eq!(snap.wishlist[0].priority, 1);
    }
}

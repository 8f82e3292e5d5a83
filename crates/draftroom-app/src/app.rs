// Host event loop.
//
// Owns the authoritative `DraftSession` for the hosted draft. Client frames,
// the repository's change feed, the one-second draft clock, the backend
// heartbeat and the debounced refetch are multiplexed in one
// `tokio::select!` loop, so the session and its store have a single writer.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use draftroom_core::config::Config;
use draftroom_core::draft::room::{normalize_room_code, JoinRequest};
use draftroom_core::draft::DraftStatus;
use draftroom_core::repository::{DraftRepository, SqliteRepository};
use draftroom_core::session::{AuctionTick, AutoPickOutcome, DraftSession};
use draftroom_core::sync::{ChangeBatch, ConnectionState, DraftAction};

use crate::protocol::{encode, ClientMessage, ServerMessage};
use crate::ws_server::{ClientId, WsEvent};

/// `host_state` key remembering which draft this database hosts.
pub const HOSTED_DRAFT_KEY: &str = "hosted_draft";

/// Resolution of the draft clock (auction countdown and pick timer).
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// User id of the hosting participant. Connecting with this id rejoins as
/// the host.
pub const HOST_USER_ID: &str = "host";

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Resume the draft this database was hosting, or create a new one from
/// the configured settings. Completed drafts are not resumed.
pub async fn open_or_create_draft(
    repo: &SqliteRepository,
    config: &Config,
    host_name: &str,
    host_team: Option<String>,
) -> anyhow::Result<String> {
    if let Some(value) = repo.load_state(HOSTED_DRAFT_KEY)? {
        if let Some(draft_id) = value.as_str() {
            match repo.load_snapshot(draft_id).await {
                Ok(snapshot) if snapshot.draft.status != DraftStatus::Completed => {
                    info!(
                        "Resuming draft '{}' ({}) at seq {}",
                        snapshot.draft.name, draft_id, snapshot.seq
                    );
                    return Ok(draft_id.to_string());
                }
                Ok(_) => info!("Previous draft {} is complete; creating a new one", draft_id),
                Err(e) => warn!("Could not resume draft {}: {}", draft_id, e),
            }
        }
    }

    let host = JoinRequest {
        user_id: HOST_USER_ID.to_string(),
        display_name: host_name.to_string(),
        team_name: host_team,
        password: config.draft.password.clone(),
    };
    let created = repo
        .create_draft(config.draft.new_draft(host))
        .await
        .context("failed to create draft")?;
    repo.save_state(HOSTED_DRAFT_KEY, &serde_json::Value::String(created.draft.id.clone()))?;
    info!(
        "Created draft '{}' ({}), room code {}",
        created.draft.name, created.draft.id, created.draft.room_code
    );
    Ok(created.draft.id)
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Client {
    addr: String,
    outbox: mpsc::Sender<String>,
    /// Set once `HELLO` is accepted.
    participant_id: Option<String>,
}

pub struct HostState {
    session: DraftSession,
    clients: HashMap<ClientId, Client>,
    heartbeat_interval: Duration,
    /// Last turn an absent owner was auto-picked (or flagged) on.
    absent_handled: Option<u32>,
}

impl HostState {
    pub fn new(session: DraftSession, heartbeat_interval: Duration) -> Self {
        HostState {
            session,
            clients: HashMap::new(),
            heartbeat_interval,
            absent_handled: None,
        }
    }

    fn send(&self, client: ClientId, message: &ServerMessage) {
        let Some(conn) = self.clients.get(&client) else {
            return;
        };
        let Some(json) = encode(message) else {
            return;
        };
        if let Err(e) = conn.outbox.try_send(json) {
            warn!("dropping frame for client {} ({}): {}", client, conn.addr, e);
        }
    }

    /// Send to every client that has been welcomed.
    fn broadcast(&self, message: &ServerMessage) {
        let Some(json) = encode(message) else {
            return;
        };
        for (id, conn) in &self.clients {
            if conn.participant_id.is_none() {
                continue;
            }
            if let Err(e) = conn.outbox.try_send(json.clone()) {
                warn!("dropping frame for client {} ({}): {}", id, conn.addr, e);
            }
        }
    }

    fn welcome(&self, client: ClientId) {
        let Some(participant_id) = self
            .clients
            .get(&client)
            .and_then(|c| c.participant_id.clone())
        else {
            return;
        };
        match self.session.store().snapshot() {
            Some(snapshot) => self.send(
                client,
                &ServerMessage::Welcome {
                    participant_id,
                    snapshot,
                },
            ),
            None => warn!("no snapshot to welcome client {} with", client),
        }
    }

    /// Push the full state to every welcomed client, after the host itself
    /// had to resynchronize.
    fn resync_all(&self) {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.welcome(id);
        }
    }

    fn team_name(&self, team_id: &str) -> String {
        self.session
            .store()
            .team(team_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| team_id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut feed: broadcast::Receiver<ChangeBatch>,
    mut state: HostState,
) -> anyhow::Result<()> {
    info!("Host event loop started for draft {}", state.session.draft_id());

    let mut clock = tokio::time::interval(TICK_INTERVAL);
    clock.tick().await;
    let mut heartbeat = tokio::time::interval(state.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        let refetch_at = state.session.refetch_deadline();
        tokio::select! {
            // --- WebSocket events ---
            event = ws_rx.recv() => {
                match event {
                    Some(event) => handle_ws_event(&mut state, event).await,
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Committed changes, fanned out to clients ---
            batch = feed.recv() => {
                match batch {
                    Ok(batch) => {
                        if batch.draft_id != state.session.draft_id() {
                            continue;
                        }
                        state.session.pump();
                        state.broadcast(&ServerMessage::Change(batch));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("change feed lagged by {} batches; resynchronizing clients", skipped);
                        match state.session.refetch().await {
                            Ok(()) => state.resync_all(),
                            Err(e) => warn!("refetch after lag failed: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(anyhow!("repository change feed closed"));
                    }
                }
            }

            // --- Draft clock ---
            _ = clock.tick() => {
                on_clock_tick(&mut state, Instant::now()).await;
            }

            // --- Backend heartbeat ---
            _ = heartbeat.tick() => {
                check_backend(&mut state).await;
            }

            // --- Debounced refetch ---
            _ = tokio::time::sleep_until(refetch_at.unwrap_or_else(Instant::now)), if refetch_at.is_some() => {
                match state.session.refetch_if_due().await {
                    Ok(true) => state.resync_all(),
                    Ok(false) => {}
                    Err(e) => warn!("scheduled refetch failed: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_ws_event(state: &mut HostState, event: WsEvent) {
    match event {
        WsEvent::Connected {
            client,
            addr,
            outbox,
        } => {
            info!("Client {} connected from {}", client, addr);
            state.clients.insert(
                client,
                Client {
                    addr,
                    outbox,
                    participant_id: None,
                },
            );
        }
        WsEvent::Disconnected { client } => {
            if let Some(conn) = state.clients.remove(&client) {
                info!(
                    "Client {} ({}) disconnected{}",
                    client,
                    conn.addr,
                    conn.participant_id
                        .map(|p| format!(" [participant {p}]"))
                        .unwrap_or_default()
                );
            }
        }
        WsEvent::Message { client, text } => handle_client_message(state, client, &text).await,
    }
}

async fn handle_client_message(state: &mut HostState, client: ClientId, json_str: &str) {
    let msg: ClientMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse message from client {}: {}", client, e);
            state.send(client, &ServerMessage::notice(format!("unreadable message: {e}")));
            return;
        }
    };

    match msg {
        ClientMessage::Hello { room_code, join } => handle_hello(state, client, &room_code, join).await,
        ClientMessage::Command { attempt_id, action } => {
            handle_command(state, client, &attempt_id, action).await
        }
        ClientMessage::Heartbeat => {
            if let Some(participant_id) = participant_of(state, client) {
                if let Err(e) = state.session.touch(&participant_id).await {
                    debug!("presence update for {} failed: {}", participant_id, e);
                }
            }
            state.send(client, &ServerMessage::Pong);
        }
        ClientMessage::Resync => state.welcome(client),
    }
}

fn participant_of(state: &HostState, client: ClientId) -> Option<String> {
    state
        .clients
        .get(&client)
        .and_then(|c| c.participant_id.clone())
}

async fn handle_hello(state: &mut HostState, client: ClientId, room_code: &str, join: JoinRequest) {
    let expected = state
        .session
        .store()
        .draft()
        .map(|d| d.room_code.clone())
        .unwrap_or_default();
    if normalize_room_code(room_code) != expected {
        state.send(
            client,
            &ServerMessage::Refused {
                reason: format!("no draft with room code {room_code} is hosted here"),
            },
        );
        return;
    }

    let display_name = join.display_name.clone();
    match state.session.admit(join).await {
        Ok(outcome) => {
            info!(
                "{} joined as participant {}{}",
                display_name,
                outcome.participant.id,
                if outcome.batch.is_none() { " (rejoin)" } else { "" }
            );
            if let Some(conn) = state.clients.get_mut(&client) {
                conn.participant_id = Some(outcome.participant.id.clone());
            }
            if let Err(e) = state.session.touch(&outcome.participant.id).await {
                debug!("presence update for {} failed: {}", outcome.participant.id, e);
            }
            state.welcome(client);
        }
        Err(e) => {
            info!("Refused {}: {}", display_name, e);
            state.send(
                client,
                &ServerMessage::Refused {
                    reason: e.to_string(),
                },
            );
        }
    }
}

async fn handle_command(state: &mut HostState, client: ClientId, attempt_id: &str, action: DraftAction) {
    let Some(participant_id) = participant_of(state, client) else {
        state.send(
            client,
            &ServerMessage::Rejected {
                attempt_id: attempt_id.to_string(),
                reason: "join the draft before sending commands".to_string(),
                retryable: false,
            },
        );
        return;
    };

    match state.session.execute(&participant_id, &action, attempt_id).await {
        Ok(()) => {
            debug!("{} by {} accepted ({})", action.label(), participant_id, attempt_id);
            state.send(
                client,
                &ServerMessage::Accepted {
                    attempt_id: attempt_id.to_string(),
                },
            );
        }
        Err(e) => {
            if e.is_backend() {
                warn!("{} by {} failed: {}", action.label(), participant_id, e);
            } else {
                debug!("{} by {} rejected: {}", action.label(), participant_id, e);
            }
            state.send(client, &ServerMessage::rejected(attempt_id, &e));
        }
    }
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

async fn on_clock_tick(state: &mut HostState, now: Instant) {
    match state.session.tick_auction(1).await {
        Ok(AuctionTick::Settled { pick, completes }) => {
            let team = state.team_name(&pick.team_id);
            info!("Auction closed: {} to {} for {}", pick.item_name, team, pick.cost);
            state.broadcast(&ServerMessage::notice(format!(
                "{} goes to {} for {}",
                pick.item_name, team, pick.cost
            )));
            if completes {
                state.broadcast(&ServerMessage::notice("The draft is complete"));
            }
        }
        Ok(AuctionTick::Counting { .. } | AuctionTick::Idle) => {}
        Err(e) => warn!("auction tick failed: {}", e),
    }

    if let Some(team_id) = state.session.pick_clock_expired(now) {
        info!("Pick timer expired for {}", state.team_name(&team_id));
        auto_pick(state, &team_id, now).await;
        return;
    }

    let turn = state.session.on_clock().map(|(turn, _)| turn);
    if turn.is_none() || turn == state.absent_handled {
        return;
    }
    if let Some(team_id) = state.session.absent_on_clock() {
        info!("{} is on the clock but absent", state.team_name(&team_id));
        state.absent_handled = turn;
        auto_pick(state, &team_id, now).await;
    }
}

async fn auto_pick(state: &mut HostState, team_id: &str, now: Instant) {
    let team = state.team_name(team_id);
    match state.session.auto_pick(team_id).await {
        Ok(AutoPickOutcome::Picked(pick)) => {
            state.broadcast(&ServerMessage::notice(format!(
                "Auto-picked {} for {}",
                pick.item_name, team
            )));
        }
        Ok(AutoPickOutcome::Nominated(auction)) => {
            state.broadcast(&ServerMessage::notice(format!(
                "Auto-nominated {} for {}",
                auction.item_name, team
            )));
        }
        Ok(AutoPickOutcome::ManualPickRequired { .. }) => {
            state.broadcast(&ServerMessage::notice(format!(
                "{team} has nothing viable on their wishlist and must pick manually"
            )));
            state.session.restart_pick_clock(now);
        }
        Err(e) => {
            warn!("auto-pick for {} failed: {}", team, e);
            state.session.restart_pick_clock(now);
        }
    }
}

/// Probe the backend. A failed probe, or the first good one after an
/// outage, goes through recovery.
async fn check_backend(state: &mut HostState) {
    let was_connected = state.session.connection_state() == ConnectionState::Connected;
    if state.session.heartbeat().await && was_connected {
        return;
    }
    match state.session.recover().await {
        Ok(report) => {
            info!(
                "Backend recovered; {} queued action(s) replayed",
                report.applied.len()
            );
            state.resync_all();
        }
        Err(e) => warn!("Backend recovery failed: {}", e),
    }
}

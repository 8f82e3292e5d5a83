// Remote participant client.
//
// Connects to a host over WebSocket, mirrors the draft into a local
// `DraftStore` from the welcome snapshot and the change stream, and sends the
// commands typed on stdin. A lost connection is re-established with jittered
// backoff. Commands typed while offline, and commands whose outcome was lost
// with the connection, wait in the offline queue and are replayed under
// their original attempt ids once the host welcomes us back.

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use draftroom_core::config::SyncConfig;
use draftroom_core::draft::auction;
use draftroom_core::draft::model::new_id;
use draftroom_core::draft::room::JoinRequest;
use draftroom_core::draft::{Auction, Bid, DraftMode, DraftStore, ItemId, Pick};
use draftroom_core::sync::{
    reconnect, ChangeBatch, ConnectionMonitor, Connector, DraftAction, OfflineQueue, Operation, QueuedAction,
    RealtimeSync, SyncDirective, Table,
};

use crate::protocol::{encode, ClientMessage, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const HELP: &str = "\
commands:
  pick <id>                 draft an item (snake)
  nominate <id> [bid]       put an item up for auction
  bid <amount>              raise the high bid
  undo                      undo the last pick (host)
  cancel                    cancel the open auction
  start | pause | resume    draft lifecycle (host)
  wish add <id>             append to your wishlist
  wish remove <id>          drop from your wishlist
  wish order <id> <id> ...  reorder your wishlist
  status                    show the board
  quit";

pub struct JoinOptions {
    pub url: String,
    pub room_code: String,
    pub request: JoinRequest,
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Action(DraftAction),
    /// Nomination without an explicit opening bid uses the draft's minimum.
    Nominate { item_id: ItemId, starting_bid: Option<u32> },
    Status,
    Help,
    Quit,
}

fn number<T: std::str::FromStr>(word: Option<&str>, what: &str) -> Result<T, String> {
    let word = word.ok_or_else(|| format!("missing {what}"))?;
    word.parse()
        .map_err(|_| format!("'{word}' is not a valid {what}"))
}

/// Parse one line typed by the user.
pub fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("type 'help' for commands".to_string());
    };
    let input = match verb.to_ascii_lowercase().as_str() {
        "pick" => Input::Action(DraftAction::Pick {
            item_id: number(words.next(), "item id")?,
        }),
        "nominate" | "nom" => Input::Nominate {
            item_id: number(words.next(), "item id")?,
            starting_bid: match words.next() {
                Some(w) => Some(number(Some(w), "bid")?),
                None => None,
            },
        },
        "bid" => Input::Action(DraftAction::Bid {
            amount: number(words.next(), "bid")?,
        }),
        "undo" => Input::Action(DraftAction::UndoLastPick),
        "cancel" => Input::Action(DraftAction::CancelAuction),
        "start" => Input::Action(DraftAction::Start),
        "pause" => Input::Action(DraftAction::Pause),
        "resume" => Input::Action(DraftAction::Resume),
        "wish" => match words.next() {
            Some("add") => Input::Action(DraftAction::AddToWishlist {
                item_id: number(words.next(), "item id")?,
            }),
            Some("remove" | "rm") => Input::Action(DraftAction::RemoveFromWishlist {
                item_id: number(words.next(), "item id")?,
            }),
            Some("order") => {
                let item_ids = words
                    .map(|w| number(Some(w), "item id"))
                    .collect::<Result<Vec<ItemId>, _>>()?;
                if item_ids.is_empty() {
                    return Err("list the wishlist items in their new order".to_string());
                }
                Input::Action(DraftAction::ReorderWishlist { item_ids })
            }
            _ => return Err("usage: wish add|remove|order <id>...".to_string()),
        },
        "status" | "s" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => return Err(format!("unknown command '{other}'; type 'help'")),
    };
    Ok(input)
}

fn resolve(input: Input, store: &DraftStore) -> Option<DraftAction> {
    match input {
        Input::Action(action) => Some(action),
        Input::Nominate {
            item_id,
            starting_bid,
        } => Some(DraftAction::Nominate {
            item_id,
            starting_bid: starting_bid.unwrap_or_else(|| {
                store
                    .draft()
                    .map_or(1, |d| d.settings.starting_bid_floor())
            }),
        }),
        Input::Status | Input::Help | Input::Quit => None,
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// The board as printed by `status`.
pub fn render_status(store: &DraftStore) -> String {
    let Some(draft) = store.draft() else {
        return "not connected to a draft yet".to_string();
    };
    let mut out = format!(
        "{} [{} draft, {}] room {} - round {}",
        draft.name, draft.mode, draft.status, draft.room_code, draft.current_round
    );
    match draft.mode {
        DraftMode::Snake => {
            if let Some(team) = store.current_team() {
                out.push_str(&format!("\non the clock: {}", team.name));
            }
        }
        DraftMode::Auction => {
            if let Some(a) = store.active_auction() {
                let leader = store
                    .team(&a.current_bidder_id)
                    .map_or(a.current_bidder_id.as_str(), |t| t.name.as_str());
                out.push_str(&format!(
                    "\nauction: {} at {} ({}), {}s left",
                    a.item_name, a.current_bid, leader, a.time_remaining
                ));
            } else if let Some((team, _)) = auction::nominator(store) {
                out.push_str(&format!("\nnominating: {}", team.name));
            }
        }
    }
    for team in store.teams_in_order() {
        let picks: Vec<&str> = store
            .team_picks(&team.id)
            .iter()
            .map(|p| p.item_name.as_str())
            .collect();
        out.push_str(&format!(
            "\n  {}. {:<16} {:>4} left  {}",
            team.draft_order,
            team.name,
            team.budget_remaining,
            picks.join(", ")
        ));
    }
    out
}

fn team_name(store: &DraftStore, team_id: &str) -> String {
    store
        .team(team_id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| team_id.to_string())
}

/// One line per change worth telling the user about.
pub fn describe_changes(store: &DraftStore, batch: &ChangeBatch) -> Vec<String> {
    let mut lines = Vec::new();
    for event in &batch.events {
        match (event.table, event.operation) {
            (Table::Picks, Operation::Insert) => {
                if let Ok(pick) = serde_json::from_value::<Pick>(event.row.clone()) {
                    lines.push(format!(
                        "{} drafted {} for {}",
                        team_name(store, &pick.team_id),
                        pick.item_name,
                        pick.cost
                    ));
                }
            }
            (Table::Picks, Operation::Delete) => {
                if let Ok(pick) = serde_json::from_value::<Pick>(event.row.clone()) {
                    lines.push(format!("pick of {} was undone", pick.item_name));
                }
            }
            (Table::Auctions, Operation::Insert) => {
                if let Ok(a) = serde_json::from_value::<Auction>(event.row.clone()) {
                    lines.push(format!(
                        "{} nominated {} at {}",
                        team_name(store, &a.nominated_by),
                        a.item_name,
                        a.starting_bid
                    ));
                }
            }
            (Table::Bids, Operation::Insert) => {
                if let Ok(bid) = serde_json::from_value::<Bid>(event.row.clone()) {
                    lines.push(format!("{} bids {}", bid.bidder_name, bid.amount));
                }
            }
            _ => {}
        }
    }
    lines
}

// ---------------------------------------------------------------------------
// Client state
// ---------------------------------------------------------------------------

/// What the loop should do after one event.
#[derive(Debug, Default)]
pub struct Step {
    pub send: Vec<ClientMessage>,
    pub say: Vec<String>,
    pub quit: bool,
}

impl Step {
    fn say(line: impl Into<String>) -> Self {
        Step {
            say: vec![line.into()],
            ..Step::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Reconnect,
    Quit,
}

/// A command sent to the host and not yet acknowledged.
#[derive(Debug)]
struct Pending {
    action: DraftAction,
    /// Set when the command is a replay from the offline queue.
    replayed: Option<QueuedAction>,
}

pub struct Remote {
    store: DraftStore,
    sync: RealtimeSync,
    monitor: ConnectionMonitor,
    queue: OfflineQueue,
    participant_id: Option<String>,
    awaiting: HashMap<String, Pending>,
    resync_requested: bool,
    ping_sent: Option<Instant>,
}

impl Remote {
    pub fn new(sync: &SyncConfig) -> Self {
        Remote {
            store: DraftStore::new(),
            sync: RealtimeSync::new(sync.sync_settings()),
            monitor: ConnectionMonitor::new(sync.reconnect_policy(), sync.heartbeat_timeout()),
            queue: OfflineQueue::new(sync.offline_max_retries),
            participant_id: None,
            awaiting: HashMap::new(),
            resync_requested: false,
            ping_sent: None,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// React to one frame from the host. A refused `HELLO` is an error.
    pub fn on_server_message(&mut self, message: ServerMessage, now: Instant) -> anyhow::Result<Step> {
        let mut step = Step::default();
        match message {
            ServerMessage::Welcome {
                participant_id,
                snapshot,
            } => {
                let first = self.participant_id.is_none();
                self.sync.complete_refetch(&mut self.store, snapshot);
                self.participant_id = Some(participant_id);
                self.resync_requested = false;
                if first {
                    step.say.push(render_status(&self.store));
                }
                let replay = self.queue.drain_ordered();
                if !replay.is_empty() {
                    step.say
                        .push(format!("replaying {} queued command(s)", replay.len()));
                }
                for queued in replay {
                    step.send.push(ClientMessage::Command {
                        attempt_id: queued.key.clone(),
                        action: queued.action.clone(),
                    });
                    self.awaiting.insert(
                        queued.key.clone(),
                        Pending {
                            action: queued.action.clone(),
                            replayed: Some(queued),
                        },
                    );
                }
            }
            ServerMessage::Change(batch) => {
                let status_before = self.store.draft().map(|d| d.status);
                match self.sync.ingest(&mut self.store, &batch, now) {
                    SyncDirective::Applied => {
                        step.say.extend(describe_changes(&self.store, &batch));
                        let status = self.store.draft().map(|d| d.status);
                        if status != status_before {
                            if let Some(status) = status {
                                step.say.push(format!("the draft is now {status}"));
                            }
                        }
                    }
                    SyncDirective::Deferred if !self.resync_requested => {
                        self.resync_requested = true;
                        step.send.push(ClientMessage::Resync);
                    }
                    _ => {}
                }
            }
            ServerMessage::Accepted { attempt_id } => {
                if let Some(pending) = self.awaiting.remove(&attempt_id) {
                    info!("{} ({}) accepted", pending.action.label(), attempt_id);
                }
            }
            ServerMessage::Rejected {
                attempt_id,
                reason,
                retryable,
            } => match self.awaiting.remove(&attempt_id) {
                Some(Pending {
                    action,
                    replayed: Some(queued),
                }) if retryable => match self.queue.requeue_failed(queued, &reason) {
                    Ok(()) => step
                        .say
                        .push(format!("{} will be retried: {}", action.label(), reason)),
                    Err(dropped) => step.say.push(dropped.to_string()),
                },
                Some(pending) => step
                    .say
                    .push(format!("{} rejected: {}", pending.action.label(), reason)),
                None => step.say.push(format!("rejected: {reason}")),
            },
            ServerMessage::Refused { reason } => {
                return Err(anyhow!("the host refused to admit us: {reason}"));
            }
            ServerMessage::Notice { message } => step.say.push(format!("* {message}")),
            ServerMessage::Pong => {
                if let Some(sent) = self.ping_sent.take() {
                    self.monitor
                        .record_heartbeat(now.saturating_duration_since(sent), now);
                }
            }
        }
        Ok(step)
    }

    /// React to a line typed while connected.
    pub fn on_line(&mut self, line: &str) -> Step {
        let input = match parse_input(line) {
            Ok(input) => input,
            Err(message) => return Step::say(message),
        };
        match input {
            Input::Status => return Step::say(render_status(&self.store)),
            Input::Help => return Step::say(HELP),
            Input::Quit => {
                return Step {
                    quit: true,
                    ..Step::default()
                }
            }
            _ => {}
        }
        let Some(action) = resolve(input, &self.store) else {
            return Step::default();
        };
        if self.participant_id.is_none() {
            return Step::say(queue_action(&mut self.queue, None, action));
        }
        let attempt_id = new_id();
        let command = ClientMessage::Command {
            attempt_id: attempt_id.clone(),
            action: action.clone(),
        };
        self.awaiting.insert(
            attempt_id,
            Pending {
                action,
                replayed: None,
            },
        );
        Step {
            send: vec![command],
            ..Step::default()
        }
    }

    /// The connection dropped. Unacknowledged commands may or may not have
    /// landed; they go back on the queue under the same attempt ids.
    fn connection_lost(&mut self) {
        self.monitor.connection_lost();
        self.ping_sent = None;
        let participant = self.participant_id.clone().unwrap_or_default();
        for (key, pending) in self.awaiting.drain() {
            match pending.replayed {
                Some(queued) => self.queue.restore(queued),
                None => {
                    self.queue.enqueue(key, &participant, pending.action);
                }
            }
        }
    }

    /// Run one connection until it drops or the user quits.
    async fn serve(
        &mut self,
        ws: WsStream,
        options: &JoinOptions,
        lines: &mut mpsc::Receiver<String>,
    ) -> anyhow::Result<Flow> {
        let (mut write, mut read) = ws.split();
        let hello = ClientMessage::Hello {
            room_code: options.room_code.clone(),
            join: options.request.clone(),
        };
        if !send_frame(&mut write, &hello).await {
            return Ok(Flow::Reconnect);
        }

        let mut heartbeat = tokio::time::interval(options.sync.heartbeat_interval());
        heartbeat.tick().await;

        loop {
            let step = tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => self.on_server_message(message, Instant::now())?,
                        Err(e) => {
                            warn!("Failed to parse message from host: {}", e);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(Flow::Reconnect),
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        return Ok(Flow::Reconnect);
                    }
                    Some(Ok(_)) => continue,
                },
                line = lines.recv() => match line {
                    Some(line) => self.on_line(&line),
                    None => return Ok(Flow::Quit),
                },
                _ = heartbeat.tick() => {
                    let now = Instant::now();
                    if self.monitor.check_stale(now) {
                        return Ok(Flow::Reconnect);
                    }
                    self.ping_sent.get_or_insert(now);
                    Step {
                        send: vec![ClientMessage::Heartbeat],
                        ..Step::default()
                    }
                }
            };

            for line in &step.say {
                println!("{line}");
            }
            for message in &step.send {
                if !send_frame(&mut write, message).await {
                    return Ok(Flow::Reconnect);
                }
            }
            if step.quit {
                let _ = write.close().await;
                return Ok(Flow::Quit);
            }
        }
    }
}

/// Queue an intent typed while offline.
fn queue_action(queue: &mut OfflineQueue, participant_id: Option<&str>, action: DraftAction) -> String {
    let label = action.label();
    queue.enqueue(new_id(), participant_id.unwrap_or_default(), action);
    format!("offline: {label} queued ({} waiting)", queue.len())
}

/// React to a line typed while reconnecting. Returns false on quit.
fn offline_line(queue: &mut OfflineQueue, store: &DraftStore, participant_id: Option<&str>, line: &str) -> bool {
    match parse_input(line) {
        Ok(Input::Quit) => return false,
        Ok(Input::Status) => println!("{}\n(offline)", render_status(store)),
        Ok(Input::Help) => println!("{HELP}"),
        Ok(input) => {
            if let Some(action) = resolve(input, store) {
                println!("{}", queue_action(queue, participant_id, action));
            }
        }
        Err(message) => println!("{message}"),
    }
    true
}

async fn send_frame(write: &mut SplitSink<WsStream, Message>, message: &ClientMessage) -> bool {
    let Some(json) = encode(message) else {
        return true;
    };
    match write.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!("send to host failed: {}", e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct WsConnector {
    url: String,
}

#[async_trait]
impl Connector for WsConnector {
    type Connection = WsStream;

    async fn connect(&mut self) -> anyhow::Result<WsStream> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        Ok(ws)
    }
}

async fn read_stdin(tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Join a hosted draft and run until the user quits or reconnection gives
/// up.
pub async fn run(options: JoinOptions) -> anyhow::Result<()> {
    let (line_tx, mut lines) = mpsc::channel::<String>(32);
    tokio::spawn(read_stdin(line_tx));

    let mut remote = Remote::new(&options.sync);
    let mut connector = WsConnector {
        url: options.url.clone(),
    };
    println!("connecting to {} ...", options.url);

    loop {
        let connected = {
            let connecting = reconnect(&mut connector, &mut remote.monitor);
            tokio::pin!(connecting);
            loop {
                tokio::select! {
                    result = &mut connecting => break result,
                    line = lines.recv() => {
                        let keep_going = match line {
                            Some(line) => offline_line(
                                &mut remote.queue,
                                &remote.store,
                                remote.participant_id.as_deref(),
                                &line,
                            ),
                            None => false,
                        };
                        if !keep_going {
                            return Ok(());
                        }
                    }
                }
            }
        };
        let ws = match connected {
            Ok(ws) => ws,
            Err(e) => {
                println!("could not reach the host: {e}");
                return Err(e.into());
            }
        };
        info!("Connected to {}", options.url);

        match remote.serve(ws, &options, &mut lines).await? {
            Flow::Quit => return Ok(()),
            Flow::Reconnect => {
                remote.connection_lost();
                println!(
                    "connection lost; reconnecting ({} command(s) waiting)",
                    remote.queued()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftroom_core::draft::store::Snapshot;
    use draftroom_core::draft::{Draft, DraftSettings, DraftStatus, Team};
    use draftroom_core::sync::ChangeEvent;

    // =======================================================================
    // Test helpers
    // =======================================================================

    fn draft(status: DraftStatus) -> Draft {
        Draft {
            id: "d1".into(),
            name: "Remote Cup".into(),
            host_id: "p1".into(),
            format: "ou".into(),
            budget_per_team: 100,
            max_teams: 4,
            mode: DraftMode::Snake,
            status,
            current_turn: 1,
            current_round: 1,
            settings: DraftSettings::default(),
            room_code: "ABCDEF".into(),
            password: None,
        }
    }

    fn team(id: &str, order: u32) -> Team {
        Team {
            id: id.into(),
            draft_id: "d1".into(),
            name: format!("Team {order}"),
            owner_id: format!("p{order}"),
            budget_remaining: 100,
            draft_order: order,
        }
    }

    fn snapshot(seq: u64) -> Snapshot {
        Snapshot {
            seq,
            draft: draft(DraftStatus::Active),
            teams: vec![team("t1", 1), team("t2", 2)],
            participants: vec![],
            picks: vec![],
            auctions: vec![],
            bids: vec![],
            wishlist: vec![],
        }
    }

    fn welcome(seq: u64) -> ServerMessage {
        ServerMessage::Welcome {
            participant_id: "p2".into(),
            snapshot: snapshot(seq),
        }
    }

    fn pick_batch(seq: u64) -> ChangeBatch {
        let pick = Pick {
            id: "k1".into(),
            draft_id: "d1".into(),
            team_id: "t1".into(),
            item_id: 25,
            item_name: "Pikachu".into(),
            cost: 12,
            pick_order: 1,
            round: 1,
        };
        ChangeBatch {
            seq,
            draft_id: "d1".into(),
            events: vec![ChangeEvent::insert(Table::Picks, &pick).unwrap()],
        }
    }

    fn remote() -> Remote {
        Remote::new(&SyncConfig::default())
    }

    // =======================================================================
    // Input parsing
    // =======================================================================

    #[test]
    fn parses_draft_commands() {
        assert_eq!(
            parse_input("pick 25").unwrap(),
            Input::Action(DraftAction::Pick { item_id: 25 })
        );
        assert_eq!(
            parse_input("  BID 14 ").unwrap(),
            Input::Action(DraftAction::Bid { amount: 14 })
        );
        assert_eq!(
            parse_input("nominate 7").unwrap(),
            Input::Nominate {
                item_id: 7,
                starting_bid: None
            }
        );
        assert_eq!(
            parse_input("nom 7 3").unwrap(),
            Input::Nominate {
                item_id: 7,
                starting_bid: Some(3)
            }
        );
        assert_eq!(
            parse_input("wish order 3 1 2").unwrap(),
            Input::Action(DraftAction::ReorderWishlist {
                item_ids: vec![3, 1, 2]
            })
        );
        assert_eq!(parse_input("q").unwrap(), Input::Quit);
    }

    #[test]
    fn bad_input_explains_itself() {
        assert_eq!(parse_input("pick").unwrap_err(), "missing item id");
        assert_eq!(
            parse_input("pick pikachu").unwrap_err(),
            "'pikachu' is not a valid item id"
        );
        assert!(parse_input("dance").unwrap_err().contains("unknown command"));
        assert!(parse_input("wish order").is_err());
        assert!(parse_input("").is_err());
    }

    // =======================================================================
    // Host frames
    // =======================================================================

    #[tokio::test]
    async fn welcome_installs_snapshot_and_changes_patch_it() {
        let mut r = remote();
        let now = Instant::now();
        let step = r.on_server_message(welcome(4), now).unwrap();
        assert!(step.say[0].contains("Remote Cup"));
        assert_eq!(r.store.last_seq(), 4);

        let step = r.on_server_message(ServerMessage::Change(pick_batch(5)), now).unwrap();
        assert_eq!(step.say, vec!["Team 1 drafted Pikachu for 12".to_string()]);
        assert!(r.store.is_picked(25));
        assert!(step.send.is_empty());
    }

    #[tokio::test]
    async fn sequence_gap_asks_for_one_resync() {
        let mut r = remote();
        let now = Instant::now();
        r.on_server_message(welcome(4), now).unwrap();

        let step = r.on_server_message(ServerMessage::Change(pick_batch(9)), now).unwrap();
        assert_eq!(step.send, vec![ClientMessage::Resync]);
        let step = r.on_server_message(ServerMessage::Change(pick_batch(10)), now).unwrap();
        assert!(step.send.is_empty());

        r.on_server_message(welcome(10), now).unwrap();
        assert_eq!(r.store.last_seq(), 10);
    }

    #[tokio::test]
    async fn refused_hello_is_fatal() {
        let mut r = remote();
        let err = r
            .on_server_message(
                ServerMessage::Refused {
                    reason: "draft is full".into(),
                },
                Instant::now(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("draft is full"));
    }

    // =======================================================================
    // Offline queue
    // =======================================================================

    #[tokio::test]
    async fn unacknowledged_commands_replay_under_the_same_id() {
        let mut r = remote();
        let now = Instant::now();
        r.on_server_message(welcome(1), now).unwrap();

        let step = r.on_line("pick 25");
        let sent_id = match &step.send[..] {
            [ClientMessage::Command { attempt_id, .. }] => attempt_id.clone(),
            other => panic!("expected one command, got {other:?}"),
        };

        r.connection_lost();
        assert_eq!(r.queued(), 1);

        let step = r.on_server_message(welcome(1), now).unwrap();
        assert_eq!(
            step.send,
            vec![ClientMessage::Command {
                attempt_id: sent_id.clone(),
                action: DraftAction::Pick { item_id: 25 },
            }]
        );
        assert_eq!(r.queued(), 0);

        r.on_server_message(ServerMessage::Accepted { attempt_id: sent_id }, now)
            .unwrap();
        assert!(r.awaiting.is_empty());
    }

    #[tokio::test]
    async fn replays_are_dropped_after_repeated_stale_rejections() {
        let mut r = remote();
        let now = Instant::now();
        queue_action(&mut r.queue, None, DraftAction::Bid { amount: 30 });

        let mut dropped = false;
        for _ in 0..3 {
            let step = r.on_server_message(welcome(1), now).unwrap();
            let Some(ClientMessage::Command { attempt_id, .. }) = step.send.first().cloned() else {
                break;
            };
            let step = r
                .on_server_message(
                    ServerMessage::Rejected {
                        attempt_id,
                        reason: "the draft changed".into(),
                        retryable: true,
                    },
                    now,
                )
                .unwrap();
            dropped = step.say.iter().any(|l| l.contains("dropped after"));
        }
        assert!(dropped);
        assert_eq!(r.queued(), 0);
    }

    #[test]
    fn lines_typed_before_welcome_are_queued() {
        let mut r = remote();
        let step = r.on_line("wish add 4");
        assert!(step.send.is_empty());
        assert!(step.say[0].starts_with("offline: wishlist add queued"));
        assert_eq!(r.queued(), 1);
    }

    #[test]
    fn status_renders_the_board() {
        let store = DraftStore::from_snapshot(snapshot(1));
        let board = render_status(&store);
        assert!(board.contains("on the clock: Team 1"));
        assert!(board.contains("Team 2"));
    }
}

//! Channel state and the broadcast/relay algorithm.
//!
//! A channel owns its membership set, the nickname bijection, a bounded
//! newest-first message history, the set of linked peer channels on other
//! servers, and the deduplication cache that keeps relayed messages from
//! looping through link cycles.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::registry::{ConnId, Registry};
use crate::proto::control::LinkRef;
use crate::proto::frame::{Frame, FrameType, MAX_NICK_LEN, NICKNAME_FIELD_LEN};
use crate::util::tokens::{rest_after, split_tokens};

/// Messages kept in history unless overridden with `/message_limit`.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Nickname used for channel announcements.
pub const CHANNEL_NICK: &str = "*";

/// How long a broadcast's identity is remembered after first sight.
pub const SEEN_TTL: Duration = Duration::from_secs(20);

/// How long a re-sighted identity lingers before eviction.
pub const RESIGHT_TTL: Duration = Duration::from_secs(10);

/// One directed link edge to a channel on a peer server.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    /// The channel's id on the remote server.
    pub remote_channel_id: u16,
    /// The server-peer connection the relay flows over.
    pub conn: ConnId,
}

/// Eviction deadlines for one remembered broadcast identity.
#[derive(Debug, Clone, Copy)]
struct SeenEntry {
    /// Unconditional eviction, set at first sight. Keeps identities that
    /// are never mirrored back from leaking.
    expires: Instant,
    /// Earlier eviction once the identity has been seen again, set at the
    /// first re-sight only.
    resight: Option<Instant>,
}

impl SeenEntry {
    fn deadline(&self) -> Instant {
        match self.resight {
            Some(r) if r < self.expires => r,
            _ => self.expires,
        }
    }
}

/// Outcome of an in-channel slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Recognized and handled.
    Handled,
    /// Recognized; the member left the channel.
    Left,
    /// Not a channel command; the server may try its own table.
    Unknown,
}

/// A named chat room local to one server.
pub struct Channel {
    /// Server-unique id, never the reserved server-scope id.
    pub id: u16,
    /// Server-unique name.
    pub name: String,
    /// The connection that created the channel; exempt from passwords.
    pub creator: ConnId,
    password: Option<String>,
    members: HashSet<ConnId>,
    nick_by_conn: HashMap<ConnId, String>,
    conn_by_nick: HashMap<String, ConnId>,
    /// Newest first.
    history: VecDeque<Frame>,
    history_limit: usize,
    linked_peers: HashMap<LinkRef, LinkInfo>,
    seen: HashMap<Frame, SeenEntry>,
}

impl Channel {
    /// Create a channel. The creator is not yet a member.
    pub fn new(id: u16, name: impl Into<String>, creator: ConnId, password: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            creator,
            password,
            members: HashSet::new(),
            nick_by_conn: HashMap::new(),
            conn_by_nick: HashMap::new(),
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            linked_peers: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    /// Add a member, assigning a collision-free nickname.
    ///
    /// Returns the assigned nickname, or `None` when the channel has a
    /// password the caller got wrong. The creator is exempt.
    pub fn add_member(&mut self, conn: ConnId, nickname: &str, password: &str) -> Option<String> {
        if let Some(expected) = &self.password
            && conn != self.creator
            && expected.as_str() != password
        {
            return None;
        }

        self.members.insert(conn);
        Some(self.set_nickname(conn, nickname))
    }

    /// Remove a member and its nickname mappings.
    pub fn remove_member(&mut self, conn: ConnId) {
        self.members.remove(&conn);
        if let Some(nick) = self.nick_by_conn.remove(&conn) {
            self.conn_by_nick.remove(&nick);
        }
    }

    /// Check membership.
    pub fn is_member(&self, conn: ConnId) -> bool {
        self.members.contains(&conn)
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// The member's current nickname.
    pub fn nickname_of(&self, conn: ConnId) -> Option<&str> {
        self.nick_by_conn.get(&conn).map(String::as_str)
    }

    /// Bind a nickname to a member, suffixing `(1)`, `(2)`, ... on collision.
    ///
    /// Returns the nickname actually assigned.
    pub fn set_nickname(&mut self, conn: ConnId, desired: &str) -> String {
        if let Some(old) = self.nick_by_conn.remove(&conn) {
            self.conn_by_nick.remove(&old);
        }

        let mut nick = desired.to_owned();
        let mut i = 0;
        while self.conn_by_nick.contains_key(&nick) {
            i += 1;
            nick = format!("{desired}({i})");
        }

        self.nick_by_conn.insert(conn, nick.clone());
        self.conn_by_nick.insert(nick.clone(), conn);
        nick
    }

    /// Change the history cap, trimming immediately.
    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit;
        self.history.truncate(limit);
    }

    /// The saved history, newest first.
    pub fn history(&self) -> &VecDeque<Frame> {
        &self.history
    }

    /// Replay history to one member, oldest first, skipping the most
    /// recent `skip` frames.
    pub fn send_history(&self, registry: &Registry, conn: ConnId, skip: usize) {
        let take = self.history.len().saturating_sub(skip);
        for frame in self.history.iter().rev().take(take) {
            registry.send(conn, frame.clone());
        }
    }

    /// Add a directed link edge.
    pub fn link(&mut self, key: LinkRef, info: LinkInfo) {
        self.linked_peers.insert(key, info);
    }

    /// Remove a directed link edge. Unknown keys fail.
    pub fn unlink(&mut self, key: &LinkRef) -> bool {
        self.linked_peers.remove(key).is_some()
    }

    /// Look up a link edge.
    pub fn linked_to(&self, key: &LinkRef) -> Option<&LinkInfo> {
        self.linked_peers.get(key)
    }

    /// Check whether any link edges exist.
    pub fn has_links(&self) -> bool {
        !self.linked_peers.is_empty()
    }

    /// Number of identities currently held in the dedup cache.
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Drop dedup identities whose deadline has passed.
    pub fn sweep_seen(&mut self, now: Instant) {
        self.seen.retain(|_, entry| now < entry.deadline());
    }

    /// Broadcast a frame to every member and, optionally, every linked peer.
    ///
    /// The frame is stamped with this channel's id first so the identity
    /// matches when a linked peer mirrors it back. A frame already in the
    /// dedup cache is dropped (and scheduled for earlier eviction); a new
    /// one is remembered for [`SEEN_TTL`], saved to history when `save`,
    /// sent to every member as-is, and when `relay` is set, cloned as a
    /// [`FrameType::Relay`] frame onto every link edge with the peer's
    /// channel id. The mirrored copy is not re-remembered here: when it
    /// comes back from a peer it is re-broadcast through this same path,
    /// where the cache breaks the cycle.
    pub fn broadcast(&mut self, registry: &Registry, mut frame: Frame, save: bool, relay: bool) {
        frame.channel_id = self.id;
        let now = Instant::now();

        if let Some(entry) = self.seen.get_mut(&frame) {
            if entry.resight.is_none() {
                entry.resight = Some(now + RESIGHT_TTL);
            }
            debug!(channel = %self.name, "suppressed relayed duplicate");
            return;
        }

        self.seen.insert(
            frame.clone(),
            SeenEntry {
                expires: now + SEEN_TTL,
                resight: None,
            },
        );

        if save {
            self.history.push_front(frame.clone());
            self.history.truncate(self.history_limit);
        }

        for &conn in &self.members {
            registry.send(conn, frame.clone());
        }

        if relay && !self.linked_peers.is_empty() {
            let mut mirrored = frame.clone();
            mirrored.frame_type = FrameType::Relay;
            for info in self.linked_peers.values() {
                mirrored.channel_id = info.remote_channel_id;
                registry.send(info.conn, mirrored.clone());
            }
        }
    }

    /// Broadcast a channel announcement under the `*` nickname.
    pub fn announce(&mut self, registry: &Registry, text: impl Into<String>) {
        let frame = Frame::new(self.id, CHANNEL_NICK, FrameType::Post, text);
        self.broadcast(registry, frame, true, true);
    }

    /// Announce that a member just joined.
    pub fn welcome(&mut self, registry: &Registry, conn: ConnId) {
        if let Some(nick) = self.nick_by_conn.get(&conn).cloned() {
            self.announce(registry, format!("{nick} joined the channel"));
        }
    }

    /// Send a channel-scope notice to a single member only.
    fn echo_to(&self, registry: &Registry, conn: ConnId, text: impl Into<String>) {
        registry.send(conn, Frame::new(self.id, CHANNEL_NICK, FrameType::Post, text));
    }

    /// Route a member's plain message: stamp their channel nickname and
    /// broadcast it (saved and relayed).
    pub fn handle_user_message(&mut self, registry: &Registry, conn: ConnId, mut frame: Frame) {
        if let Some(nick) = self.nick_by_conn.get(&conn) {
            frame.nickname = nick.clone();
        }
        frame.frame_type = FrameType::Post;
        self.broadcast(registry, frame, true, true);
    }

    /// Handle an in-channel slash command.
    pub fn handle_command(
        &mut self,
        registry: &Registry,
        conn: ConnId,
        frame: &Frame,
    ) -> CommandOutcome {
        let line = frame.payload.as_str();
        let splits = split_tokens(line);
        let Some(first) = splits.first() else {
            return CommandOutcome::Unknown;
        };
        let Some(command) = first.strip_prefix('/') else {
            return CommandOutcome::Unknown;
        };

        match command.to_ascii_lowercase().as_str() {
            "nick" => {
                if let Some(new_nick) = splits.get(1)
                    && new_nick.len() <= MAX_NICK_LEN
                {
                    self.set_nickname(conn, new_nick);
                }
            }
            "list" => {
                let nicks: Vec<&str> = self
                    .members
                    .iter()
                    .filter_map(|c| self.nickname_of(*c))
                    .collect();
                self.echo_to(registry, conn, nicks.join("\n"));
            }
            "emote" => {
                if let Some(action) = rest_after(line, 1)
                    && let Some(nick) = self.nick_by_conn.get(&conn).cloned()
                {
                    let text = format!("{nick} {action}");
                    self.announce(registry, text);
                }
            }
            "admin" => {
                if let Some(target) = splits.get(1) {
                    let echo = match self.conn_by_nick.get(*target) {
                        None => format!("{target} doesn't exist"),
                        Some(c) if *c == self.creator => format!("{target} is an operator"),
                        Some(_) => format!("{target} is a regular"),
                    };
                    self.echo_to(registry, conn, echo);
                }
            }
            "message_limit" => {
                if conn == self.creator
                    && let Some(limit) = splits.get(1).and_then(|s| s.parse::<usize>().ok())
                {
                    self.set_history_limit(limit);
                }
            }
            "pass" => {
                if conn != self.creator {
                    self.echo_to(registry, conn, "You are not the admin of the channel!");
                } else {
                    self.password = splits.get(1).map(|s| (*s).to_owned());
                }
            }
            "msg" => self.whisper(registry, conn, line, &splits),
            "quit" => {
                let reason = rest_after(line, 1);
                if let Some(nick) = self.nick_by_conn.get(&conn).cloned() {
                    let text = match reason {
                        Some(r) => format!("{nick} has quit ({r})"),
                        None => format!("{nick} has quit"),
                    };
                    self.announce(registry, text);
                }
                self.remove_member(conn);
                return CommandOutcome::Left;
            }
            _ => return CommandOutcome::Unknown,
        }

        CommandOutcome::Handled
    }

    /// `/msg <nick> <text>`: deliver to exactly the sender and the target.
    ///
    /// Not broadcast, not saved to history, still a channel-post frame.
    fn whisper(&self, registry: &Registry, conn: ConnId, line: &str, splits: &[&str]) {
        let Some(target_name) = splits.get(1) else {
            return;
        };
        let Some(&target) = self.conn_by_nick.get(*target_name) else {
            return;
        };
        let Some(text) = rest_after(line, 2) else {
            return;
        };
        let Some(sender_name) = self.nick_by_conn.get(&conn) else {
            return;
        };

        // Two 15-char nicks plus the arrow can overflow the 32-byte wire
        // field; truncate rather than fail the send.
        let mut pair = format!("{sender_name} -> {target_name}");
        pair.truncate(NICKNAME_FIELD_LEN);

        let frame = Frame::new(self.id, pair, FrameType::Post, text);
        registry.send(conn, frame.clone());
        registry.send(target, frame);
    }
}

//! Server state: every connection, channel, and routing decision.
//!
//! All mutation happens on the one task that owns [`ServerState`]; reader
//! tasks only feed it [`ServerEvent`]s. Outbound link handshakes dial on
//! short-lived spawned tasks and report back the same way, so the state
//! task never blocks on a remote server.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::channel::{Channel, CommandOutcome, LinkInfo};
use super::commands;
use super::registry::{ConnId, Registry};
use crate::alias::AliasMap;
use crate::proto::control::{ControlRecord, LinkRef};
use crate::proto::frame::{Frame, FrameType, SERVER_CHANNEL_ID};
use crate::proto::transport;
use crate::util::tokens::split_tokens;

/// Default directory for MOTD/HELP/RULES files, relative to the working
/// directory.
pub const CONFIG_DIR: &str = "config";

/// Events fed to the state task.
pub enum ServerEvent {
    /// A connection delivered one frame.
    Frame {
        /// Source connection.
        conn: ConnId,
        /// The decoded frame.
        frame: Frame,
    },
    /// A connection closed, reset, or sent the close sentinel.
    Disconnected {
        /// The connection that went away.
        conn: ConnId,
    },
    /// An outbound dial to a peer server completed.
    PeerDialed {
        /// The fresh peer socket.
        stream: TcpStream,
        /// Local channel id the directive concerns.
        channel_id: u16,
        /// Directive to send once the peer is registered.
        record: ControlRecord,
    },
    /// An outbound dial failed.
    DialFailed {
        /// The connection whose command requested the dial.
        requester: ConnId,
        /// Dial target host.
        host: String,
        /// Dial target port.
        port: u16,
        /// Human-readable failure.
        error: String,
    },
}

/// The server's entire mutable state.
pub struct ServerState {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) started: Instant,
    pub(crate) registry: Registry,
    pub(crate) channels: AliasMap<u16, String, Channel>,
    next_channel_id: u16,
    pub(crate) conn_channel: HashMap<ConnId, u16>,
    pub(crate) nick_conn: HashMap<String, ConnId>,
    pub(crate) quitting: bool,
    pub(crate) events_tx: mpsc::UnboundedSender<ServerEvent>,
    pub(crate) config_dir: PathBuf,
}

impl ServerState {
    /// Create state for a server advertised as `hostname:port`.
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        events_tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            started: Instant::now(),
            registry: Registry::new(),
            channels: AliasMap::new(),
            next_channel_id: 0,
            conn_channel: HashMap::new(),
            nick_conn: HashMap::new(),
            quitting: false,
            events_tx,
            config_dir: PathBuf::from(CONFIG_DIR),
        }
    }

    /// Queue a server-scope reply for a connection.
    pub(crate) fn reply(&self, conn: ConnId, text: impl Into<String>) {
        self.registry.reply(conn, text);
    }

    /// Next unused channel id, never the reserved server-scope id.
    pub(crate) fn alloc_channel_id(&mut self) -> u16 {
        loop {
            let id = self.next_channel_id;
            self.next_channel_id = self.next_channel_id.wrapping_add(1);
            if id != SERVER_CHANNEL_ID && !self.channels.contains_key(&id) {
                return id;
            }
        }
    }

    /// Move a connection into a channel: leave any previous channel, run
    /// the password check, replay history, announce the join.
    ///
    /// Returns false when the password was wrong; the previous channel has
    /// been left either way.
    pub(crate) fn join_channel(
        &mut self,
        conn: ConnId,
        nickname: &str,
        channel_id: u16,
        password: &str,
    ) -> bool {
        self.leave_current(conn);

        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return false;
        };
        if channel.add_member(conn, nickname, password).is_none() {
            return false;
        }

        self.conn_channel.insert(conn, channel_id);
        channel.send_history(&self.registry, conn, 0);
        channel.welcome(&self.registry, conn);
        true
    }

    /// Remove a connection from whatever channel it is in.
    pub(crate) fn leave_current(&mut self, conn: ConnId) {
        if let Some(channel_id) = self.conn_channel.remove(&conn)
            && let Some(channel) = self.channels.get_mut(&channel_id)
        {
            channel.remove_member(conn);
        }
    }

    /// Remove a channel entirely, clearing every member's mapping.
    pub(crate) fn destroy_channel(&mut self, channel_id: u16) {
        if let Some(channel) = self.channels.remove(&channel_id) {
            info!(channel = %channel.name, "channel destroyed");
        }
        self.conn_channel.retain(|_, id| *id != channel_id);
    }

    /// Tear down everything a departed connection owned.
    pub fn disconnect(&mut self, conn: ConnId) {
        self.leave_current(conn);
        self.nick_conn.retain(|_, c| *c != conn);
        if let Some(handle) = self.registry.remove(conn) {
            debug!(%conn, addr = %handle.addr, "connection closed");
        }
    }

    /// Evict expired relay-dedup identities in every channel.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        for channel in self.channels.values_mut() {
            channel.sweep_seen(now);
        }
    }

    /// Send the MOTD reply a fresh connection gets unsolicited.
    pub fn send_motd(&self, conn: ConnId) {
        self.reply(
            conn,
            commands::read_config_reply(&self.config_dir, "MOTD.txt", "No MOTD file"),
        );
    }

    /// Dispatch one decoded frame by its type.
    pub fn handle_frame(&mut self, conn: ConnId, frame: Frame) {
        match frame.frame_type {
            FrameType::Post | FrameType::ServerReply => self.handle_client_frame(conn, frame),
            FrameType::Control => self.handle_control(conn, frame),
            FrameType::Relay => self.handle_relay(conn, frame),
        }
    }

    /// User input: route to the connection's channel, or the server
    /// command table when it is not in one.
    fn handle_client_frame(&mut self, conn: ConnId, frame: Frame) {
        if !frame.nickname.is_empty() {
            // Best-effort nick -> connection map, used by /invite.
            self.nick_conn.insert(frame.nickname.clone(), conn);
        }

        let is_command = frame.payload.trim_start().starts_with('/');

        if let Some(&channel_id) = self.conn_channel.get(&conn) {
            if is_command {
                let outcome = match self.channels.get_mut(&channel_id) {
                    Some(channel) => channel.handle_command(&self.registry, conn, &frame),
                    None => CommandOutcome::Unknown,
                };
                match outcome {
                    CommandOutcome::Handled => {}
                    CommandOutcome::Left => {
                        self.conn_channel.remove(&conn);
                    }
                    // In-channel operators still get the server table
                    // (/link, /migrate, /join, ...).
                    CommandOutcome::Unknown => self.dispatch_server_command(conn, &frame),
                }
            } else if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.handle_user_message(&self.registry, conn, frame);
            }
        } else if is_command {
            self.dispatch_server_command(conn, &frame);
        } else {
            debug!(%conn, "dropping message from connection outside any channel");
        }
    }

    /// Look up the first token in the server command table.
    fn dispatch_server_command(&mut self, conn: ConnId, frame: &Frame) {
        let splits = split_tokens(&frame.payload);
        let Some(name) = splits.first().and_then(|t| t.strip_prefix('/')) else {
            return;
        };

        match commands::lookup(&name.to_ascii_lowercase()) {
            Some(handler) => handler(self, conn, frame, &splits),
            None => self.reply(conn, "Command not recognized"),
        }
    }

    /// Server-to-server control directives.
    fn handle_control(&mut self, conn: ConnId, frame: Frame) {
        self.registry.mark_server_peer(conn);

        let record = match ControlRecord::parse(&frame.payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(%conn, error = %e, "ignoring malformed control record");
                return;
            }
        };

        match record {
            ControlRecord::Link(r) => {
                let response = ControlRecord::Response(LinkRef::new(
                    r.channel.clone(),
                    self.hostname.clone(),
                    self.port,
                ));
                let response_id = match self.channels.get_by_alias_mut(&r.channel) {
                    Some(channel) => {
                        info!(channel = %r.channel, peer = %format!("{}:{}", r.host, r.port), "link established (inbound)");
                        channel.link(
                            r,
                            LinkInfo {
                                remote_channel_id: frame.channel_id,
                                conn,
                            },
                        );
                        channel.id
                    }
                    None => {
                        warn!(channel = %r.channel, "link request for unknown channel");
                        SERVER_CHANNEL_ID
                    }
                };
                self.registry.send(
                    conn,
                    Frame::new(response_id, "", FrameType::Control, response.encode()),
                );
            }
            ControlRecord::Unlink(r) => match self.channels.get_by_alias_mut(&r.channel) {
                Some(channel) => {
                    if !channel.unlink(&r) {
                        warn!(channel = %r.channel, "unlink for unknown edge");
                    }
                }
                None => warn!(channel = %r.channel, "unlink for unknown channel"),
            },
            ControlRecord::Response(r) => {
                if frame.channel_id == SERVER_CHANNEL_ID {
                    warn!(channel = %r.channel, peer = %format!("{}:{}", r.host, r.port), "link rejected by peer");
                    return;
                }
                if let Some(channel) = self.channels.get_by_alias_mut(&r.channel) {
                    info!(channel = %r.channel, peer = %format!("{}:{}", r.host, r.port), "link established (outbound)");
                    channel.link(
                        r,
                        LinkInfo {
                            remote_channel_id: frame.channel_id,
                            conn,
                        },
                    );
                }
            }
            ControlRecord::Migrate(_) => {
                warn!(%conn, "migrate directive addressed to a server; ignored");
            }
        }
    }

    /// A channel post mirrored from a linked server: flip it back to a
    /// plain post and re-broadcast. The dedup cache stops the cycle.
    fn handle_relay(&mut self, conn: ConnId, mut frame: Frame) {
        self.registry.mark_server_peer(conn);

        match self.channels.get_mut(&frame.channel_id) {
            Some(channel) => {
                frame.frame_type = FrameType::Post;
                channel.broadcast(&self.registry, frame, true, true);
            }
            None => {
                warn!(channel_id = frame.channel_id, "relay for unknown channel dropped");
            }
        }
    }

    /// Dial a peer server off-task; the result comes back as an event.
    pub(crate) fn spawn_peer_dial(
        &self,
        requester: ConnId,
        channel_id: u16,
        host: String,
        port: u16,
        record: ControlRecord,
    ) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match transport::dial(&host, port).await {
                Ok(stream) => {
                    let _ = events.send(ServerEvent::PeerDialed {
                        stream,
                        channel_id,
                        record,
                    });
                }
                Err(e) => {
                    let _ = events.send(ServerEvent::DialFailed {
                        requester,
                        host,
                        port,
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}

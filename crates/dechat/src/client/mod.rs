//! The multi-connection chat client.
//!
//! One event-loop task owns all client state and multiplexes two sources:
//! user input lines from stdin, and events from per-wrapper listener and
//! sender tasks. Dials (both `/connect` and migration) run on short-lived
//! spawned tasks that report back as events, so the loop never blocks on
//! a remote server.

pub mod commands;
pub mod render;
pub mod wrapper;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncBufReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use crate::error::Result;
use crate::proto::control::ControlRecord;
use crate::proto::frame::{Frame, FrameType, MAX_NICK_LEN};
use crate::proto::transport;
use crate::util::tokens::split_tokens;
use render::render_frame;
use wrapper::{ConnWrapper, WrapperId};

/// Client configuration from the command line.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Multi-connection mode: numbered displays, `display`/`list_displays`.
    pub ui: bool,
}

/// Events fed to the client event loop.
pub enum ClientEvent {
    /// A wrapper's listener decoded one frame.
    Received {
        /// Source wrapper.
        wrapper: WrapperId,
        /// The decoded frame.
        frame: Frame,
    },
    /// A wrapper's server went away (EOF or reset).
    ListenerClosed {
        /// The wrapper whose listener exited.
        wrapper: WrapperId,
    },
    /// A wrapper's sender shipped the close sentinel.
    CloseRequested {
        /// The wrapper to tear down.
        wrapper: WrapperId,
    },
    /// A `/connect` dial finished.
    Dialed {
        /// Dial target host.
        host: String,
        /// Dial target port.
        port: u16,
        /// Requested display number, if any.
        display: Option<u32>,
        /// Close every other wrapper first (single-connection mode).
        close_others: bool,
        /// The socket, or a human-readable failure.
        result: std::result::Result<TcpStream, String>,
    },
    /// A migration dial finished.
    MigrationDialed {
        /// The wrapper the migrate directive arrived on.
        from_wrapper: WrapperId,
        /// Channel to join on the new server.
        channel: String,
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// The socket, or a human-readable failure.
        result: std::result::Result<TcpStream, String>,
    },
}

/// Which command table applies to the next input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    /// No open wrappers.
    Disconnected,
    /// Wrappers exist but none is displayed.
    Limbo,
    /// This wrapper is displayed and receives plain input.
    Active(WrapperId),
}

/// All client state, owned by the event loop.
pub struct Client {
    config: ClientConfig,
    default_nickname: Arc<Mutex<String>>,
    wrappers: HashMap<WrapperId, ConnWrapper>,
    displays: BTreeMap<u32, WrapperId>,
    active: Option<WrapperId>,
    next_wrapper_id: WrapperId,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    /// Set by `/quit` in the disconnected context; ends the event loop.
    pub quitting: bool,
}

impl Client {
    /// Create a client with the default nickname `anon`.
    pub fn new(config: ClientConfig, events_tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            config,
            default_nickname: Arc::new(Mutex::new("anon".to_owned())),
            wrappers: HashMap::new(),
            displays: BTreeMap::new(),
            active: None,
            next_wrapper_id: 0,
            events_tx,
            quitting: false,
        }
    }

    fn context(&self) -> Context {
        match self.active {
            Some(id) if self.wrappers.contains_key(&id) => Context::Active(id),
            _ if self.wrappers.is_empty() => Context::Disconnected,
            _ => Context::Limbo,
        }
    }

    /// The current default nickname.
    pub fn nickname(&self) -> String {
        self.default_nickname
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|_| "anon".to_owned())
    }

    /// Set the default nickname, enforcing the length limit.
    pub fn set_nickname(&mut self, nick: &str) {
        if nick.len() > MAX_NICK_LEN {
            println!("Maximum nickname length is {MAX_NICK_LEN}");
            return;
        }
        if let Ok(mut n) = self.default_nickname.lock() {
            *n = nick.to_owned();
        }
        println!("Default nickname set to {nick}");
    }

    /// Dispatch one input line by context.
    pub fn handle_input(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let args = split_tokens(line);

        match self.context() {
            Context::Disconnected | Context::Limbo => {
                let limbo = self.context() == Context::Limbo;
                let Some(name) = args[0].strip_prefix('/') else {
                    println!("Not connected to any server. Try /connect host:port");
                    return;
                };
                let lookup = if limbo {
                    commands::limbo_lookup
                } else {
                    commands::disconnected_lookup
                };
                match lookup(&name.to_ascii_lowercase()) {
                    Some(handler) => handler(self, line, &args),
                    None => println!("Unknown command: /{name}"),
                }
            }
            Context::Active(id) => {
                if let Some(name) = args[0].strip_prefix('/')
                    && let Some(handler) =
                        commands::active_lookup(&name.to_ascii_lowercase(), self.config.ui)
                {
                    handler(self, line, &args);
                    return;
                }
                // Everything else, commands included, goes to the server.
                self.forward_to_wrapper(id, line, &args);
            }
        }
    }

    /// Queue a line on a wrapper, tracking in-flight joins.
    fn forward_to_wrapper(&mut self, id: WrapperId, line: &str, args: &[&str]) {
        let Some(w) = self.wrappers.get_mut(&id) else {
            return;
        };
        if let ("/join" | "/create", Some(channel)) = (args[0], args.get(1)) {
            w.pending_channel = Some((*channel).to_owned());
        }
        w.enqueue(line);
    }

    /// The active wrapper, if any.
    pub(crate) fn active_wrapper(&mut self) -> Option<&mut ConnWrapper> {
        let id = self.active?;
        self.wrappers.get_mut(&id)
    }

    /// Spawn a `/connect` dial; the result arrives as an event.
    pub(crate) fn start_connect(&mut self, host: String, port: u16, display: Option<u32>) {
        if let Some(n) = display
            && self.displays.contains_key(&n)
        {
            println!("{n} is already a display number!");
            return;
        }

        println!("Connecting to server...");
        let close_others = !self.config.ui;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport::dial(&host, port).await.map_err(|e| e.to_string());
            let _ = events.send(ClientEvent::Dialed {
                host,
                port,
                display,
                close_others,
                result,
            });
        });
    }

    /// Handle one event from a wrapper task or a dial task.
    pub fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Received { wrapper, frame } => self.process_received(wrapper, frame),
            ClientEvent::ListenerClosed { wrapper } | ClientEvent::CloseRequested { wrapper } => {
                self.close_wrapper(wrapper);
            }
            ClientEvent::Dialed {
                host,
                port,
                display,
                close_others,
                result,
            } => match result {
                Ok(stream) => {
                    if close_others {
                        let open: Vec<WrapperId> = self.wrappers.keys().copied().collect();
                        for id in open {
                            self.close_wrapper(id);
                        }
                    }
                    let id = self.add_wrapper(stream, host, port, display);
                    self.activate(id);
                    self.ping_info(id);
                }
                Err(e) => println!("Failed to connect to server {host}:{port} ({e})"),
            },
            ClientEvent::MigrationDialed {
                from_wrapper,
                channel,
                host,
                port,
                result,
            } => self.finish_migration(from_wrapper, channel, host, port, result),
        }
    }

    /// Register a wrapper on a display number (requested, or lowest free).
    fn add_wrapper(
        &mut self,
        stream: TcpStream,
        host: String,
        port: u16,
        display: Option<u32>,
    ) -> WrapperId {
        let id = self.next_wrapper_id;
        self.next_wrapper_id += 1;

        let wrapper = ConnWrapper::spawn(
            id,
            stream,
            host,
            port,
            Arc::clone(&self.default_nickname),
            self.events_tx.clone(),
        );

        let display = display
            .filter(|n| !self.displays.contains_key(n))
            .unwrap_or_else(|| self.lowest_free_display());
        self.displays.insert(display, id);
        self.wrappers.insert(id, wrapper);
        id
    }

    fn lowest_free_display(&self) -> u32 {
        let mut n = 0;
        while self.displays.contains_key(&n) {
            n += 1;
        }
        n
    }

    /// Make a wrapper the displayed one, replaying its history.
    pub(crate) fn activate(&mut self, id: WrapperId) {
        if let Some(old) = self.active.take()
            && let Some(w) = self.wrappers.get_mut(&old)
        {
            w.active = false;
        }
        if let Some(w) = self.wrappers.get_mut(&id) {
            w.active = true;
            self.active = Some(id);
            for frame in w.history().iter().rev() {
                println!("{}", render_frame(frame));
            }
        }
    }

    /// Silently ask the server for `/info` so the wrapper learns its
    /// canonical name.
    pub(crate) fn ping_info(&mut self, id: WrapperId) {
        if let Some(w) = self.wrappers.get_mut(&id) {
            w.pinging_for_info = true;
            w.enqueue("/info");
        }
    }

    /// Tear a wrapper down and forget it.
    pub(crate) fn close_wrapper(&mut self, id: WrapperId) {
        let Some(w) = self.wrappers.remove(&id) else {
            return;
        };
        w.close();
        self.displays.retain(|_, wid| *wid != id);
        if self.active == Some(id) {
            self.active = None;
        }
        println!("Closed connection to {}", w.display_name());
    }

    /// Print all open displays.
    pub(crate) fn list_displays(&self) {
        if self.wrappers.is_empty() {
            println!("Not connected to any server");
            return;
        }
        for (num, id) in &self.displays {
            let Some(w) = self.wrappers.get(id) else {
                continue;
            };
            let mut echo = format!("{num} : {}", w.display_name());
            if let Some(channel) = &w.confirmed_channel {
                echo.push_str(&format!(" | {channel}"));
            }
            if self.active == Some(*id) {
                echo.push_str(" <- current");
            }
            println!("{echo}");
        }
    }

    /// Switch the display to a numbered wrapper.
    pub(crate) fn switch_display(&mut self, num: u32) {
        match self.displays.get(&num).copied() {
            Some(id) => self.activate(id),
            None => println!("No display on {num}"),
        }
    }

    /// Route one received frame: migration directives, the info-ping
    /// interception, join confirmation, whisper tracking, history, display.
    fn process_received(&mut self, id: WrapperId, frame: Frame) {
        match frame.frame_type {
            FrameType::Control => {
                match ControlRecord::parse(&frame.payload) {
                    Ok(ControlRecord::Migrate(r)) => {
                        self.handle_migrate(id, r.channel, r.host, r.port)
                    }
                    Ok(_) => debug!(wrapper = id, "ignoring non-migrate control record"),
                    Err(e) => warn!(wrapper = id, error = %e, "malformed control record"),
                }
                return;
            }
            FrameType::Relay => {
                debug!(wrapper = id, "ignoring stray relay frame");
                return;
            }
            FrameType::Post | FrameType::ServerReply => {}
        }

        let me = self.nickname();
        let Some(w) = self.wrappers.get_mut(&id) else {
            return;
        };

        // A name probe's reply is consumed, not shown.
        if w.pinging_for_info
            && frame.frame_type == FrameType::ServerReply
            && let Some(name) = parse_server_name(&frame.payload)
        {
            w.remote_name = Some(name);
            w.pinging_for_info = false;
            return;
        }

        if w.pending_channel.is_some() {
            match frame.frame_type {
                // Channel frames only reach members: the join succeeded.
                FrameType::Post => {
                    w.confirmed_channel = w.pending_channel.take();
                    w.set_in_channel(true);
                }
                // A server-scope reply while a join is pending is the
                // rejection reason.
                FrameType::ServerReply => {
                    w.pending_channel = None;
                }
                _ => {}
            }
        }

        if let Some((left, right)) = frame.nickname.split_once("->") {
            let (left, right) = (left.trim(), right.trim());
            let other = if left == me { right } else { left };
            w.last_whisperer = Some(other.to_owned());
        }

        let show = w.active;
        w.store(frame.clone());
        if show {
            println!("{}", render_frame(&frame));
        }
    }

    /// A `--migrate` directive arrived on `from`: move to the equivalent
    /// channel on `host:port`.
    fn handle_migrate(&mut self, from: WrapperId, channel: String, host: String, port: u16) {
        let existing = self
            .wrappers
            .values()
            .find(|w| w.connects_to(&host, port))
            .map(|w| w.id);

        if let Some(target) = existing {
            let w = &self.wrappers[&target];
            if w.confirmed_channel.as_deref() == Some(channel.as_str()) {
                // Already where the migration points.
                return;
            }
            if w.in_channel() {
                println!(
                    "Channel {channel} migrated to {host}:{port}, but that connection is busy in another channel; staying put"
                );
                return;
            }

            let was_active = self.wrappers.get(&from).is_some_and(|w| w.active);
            self.close_wrapper(from);
            if was_active {
                self.activate(target);
            }
            self.enqueue_join(target, &channel);
            return;
        }

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport::dial(&host, port).await.map_err(|e| e.to_string());
            let _ = events.send(ClientEvent::MigrationDialed {
                from_wrapper: from,
                channel,
                host,
                port,
                result,
            });
        });
    }

    fn finish_migration(
        &mut self,
        from: WrapperId,
        channel: String,
        host: String,
        port: u16,
        result: std::result::Result<TcpStream, String>,
    ) {
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                println!("Migration to {host}:{port} failed ({e}); staying on the origin server");
                return;
            }
        };

        let was_active = self.wrappers.get(&from).is_some_and(|w| w.active);
        let new_id = self.add_wrapper(stream, host, port, None);
        self.ping_info(new_id);
        self.close_wrapper(from);
        if was_active {
            self.activate(new_id);
        }
        self.enqueue_join(new_id, &channel);
    }

    fn enqueue_join(&mut self, id: WrapperId, channel: &str) {
        if let Some(w) = self.wrappers.get_mut(&id) {
            w.pending_channel = Some(channel.to_owned());
            w.enqueue(format!("/join {channel}"));
        }
    }

    /// Ask every wrapper to close, then tear them all down.
    pub fn shutdown(&mut self) {
        for w in self.wrappers.values() {
            w.enqueue_close();
        }
        let open: Vec<WrapperId> = self.wrappers.keys().copied().collect();
        for id in open {
            self.close_wrapper(id);
        }
    }
}

/// Extract the `host:port` token after `"Server: "` in an `/info` reply.
fn parse_server_name(payload: &str) -> Option<String> {
    let idx = payload.find("Server: ")?;
    let rest = &payload[idx + "Server: ".len()..];
    rest.split_whitespace().next().map(str::to_owned)
}

/// Run the client until `/quit` or stdin closes.
pub async fn run(config: ClientConfig) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut client = Client::new(config, events_tx);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    loop {
        tokio::select! {
            maybe_line = lines.next() => match maybe_line {
                Some(Ok(line)) => client.handle_input(&line),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            Some(event) = events_rx.recv() => client.handle_event(event),
        }

        if client.quitting {
            break;
        }
    }

    client.shutdown();
    // Give the sender tasks a beat to ship the close sentinels.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}

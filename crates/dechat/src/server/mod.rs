//! The channel server.
//!
//! One task owns all state; everything else is plumbing around it. Each
//! accepted socket is split into a reader task (decodes frames, forwards
//! them as events) and a writer task (drains the connection's outgoing
//! queue). The run loop multiplexes accepts, events, and the periodic
//! dedup sweep, and exits when `/die` flips the quitting flag.
//!
//! # Example
//!
//! ```ignore
//! use dechat::server::Server;
//!
//! let server = Server::bind("localhost", 9996).await?;
//! server.run().await?;
//! ```

pub mod channel;
pub mod commands;
pub mod registry;
pub mod state;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use channel::{Channel, CommandOutcome, LinkInfo};
pub use registry::{ConnId, Registry};
pub use state::{ServerEvent, ServerState};

use crate::error::Result;
use crate::proto::frame::{Frame, FrameType};
use crate::proto::transport::{self, read_frame, send_frame};

/// How often expired dedup identities are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A bound chat server, ready to run.
pub struct Server {
    listener: tokio::net::TcpListener,
    state: ServerState,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// The server advertises itself to peers as `hostname:port`; when
    /// `port` is 0 the kernel-assigned port is advertised instead.
    pub async fn bind(hostname: &str, port: u16) -> Result<Self> {
        let listener = transport::bind_listener(hostname, port).await?;
        let bound_port = listener.local_addr()?.port();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = ServerState::new(hostname, bound_port, events_tx.clone());

        info!("listening on {hostname}:{bound_port}");

        Ok(Self {
            listener,
            state,
            events_tx,
            events_rx,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until `/die`.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            mut state,
            events_tx,
            mut events_rx,
        } = self;

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let conn = register_connection(&mut state, &events_tx, stream, false);
                        info!(%conn, %addr, "accepted connection");
                        state.send_motd(conn);
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(event) = events_rx.recv() => {
                    handle_event(&mut state, &events_tx, event);
                }
                _ = sweep.tick() => state.sweep(),
            }

            if state.quitting {
                info!("shutting down");
                break;
            }
        }

        Ok(())
    }
}

/// Split a socket into reader/writer tasks and register its handle.
fn register_connection(
    state: &mut ServerState,
    events_tx: &mpsc::UnboundedSender<ServerEvent>,
    stream: TcpStream,
    is_server_peer: bool,
) -> ConnId {
    let addr = stream
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let conn = state.registry.register(addr, tx, is_server_peer);
    tokio::spawn(reader_task(conn, read_half, events_tx.clone()));
    tokio::spawn(writer_task(conn, rx, write_half));
    conn
}

fn handle_event(
    state: &mut ServerState,
    events_tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ServerEvent,
) {
    match event {
        ServerEvent::Frame { conn, frame } => state.handle_frame(conn, frame),
        ServerEvent::Disconnected { conn } => state.disconnect(conn),
        ServerEvent::PeerDialed {
            stream,
            channel_id,
            record,
        } => {
            let conn = register_connection(state, events_tx, stream, true);
            info!(%conn, directive = record.tag(), "connected to peer server");
            state.registry.send(
                conn,
                Frame::new(channel_id, "", FrameType::Control, record.encode()),
            );
        }
        ServerEvent::DialFailed {
            requester,
            host,
            port,
            error,
        } => {
            warn!(peer = %format!("{host}:{port}"), error = %error, "peer dial failed");
            state.reply(requester, format!("Failed to reach {host}:{port}: {error}"));
        }
    }
}

/// Decode frames off one socket until it closes.
///
/// The close sentinel, a clean EOF, a reset, and a malformed frame all end
/// the same way: a `Disconnected` event for the state task.
async fn reader_task(
    conn: ConnId,
    mut read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(frame)) if frame.is_close() => {
                debug!(%conn, "close sentinel");
                break;
            }
            Ok(Some(frame)) => {
                if events.send(ServerEvent::Frame { conn, frame }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%conn, error = %e, "read failed");
                break;
            }
        }
    }
    let _ = events.send(ServerEvent::Disconnected { conn });
}

/// Drain a connection's outgoing queue onto its socket.
///
/// Write failures are swallowed; the reader path reaps the peer.
async fn writer_task(conn: ConnId, mut rx: mpsc::UnboundedReceiver<Frame>, mut write_half: OwnedWriteHalf) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = send_frame(&mut write_half, &frame).await {
            debug!(%conn, error = %e, "write failed; stopping writer");
            break;
        }
    }
}

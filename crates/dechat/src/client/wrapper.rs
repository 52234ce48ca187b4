//! One wrapper per open server connection.
//!
//! A wrapper owns the socket halves through two tasks: the listener
//! decodes incoming frames and forwards them to the client's event loop,
//! and the sender drains the input queue, stamping each line with the
//! current default nickname and the in-channel flag at send time. Neither
//! task ever closes the wrapper itself; they request closure through the
//! event loop, which is the only place wrappers are torn down.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ClientEvent;
use crate::proto::frame::{Frame, FrameType};
use crate::proto::transport::{read_frame, send_frame};

/// Received frames kept for display replay.
pub const HISTORY_LIMIT: usize = 50;

/// Identifier for one wrapper, unique for the client's lifetime.
pub type WrapperId = u64;

/// Flags the sender task reads at send time.
struct WrapperShared {
    in_channel: AtomicBool,
}

/// One server connection with its listener and sender tasks.
pub struct ConnWrapper {
    /// Wrapper id, used in events.
    pub id: WrapperId,
    /// Host the wrapper dialed.
    pub host: String,
    /// Port the wrapper dialed.
    pub port: u16,
    /// Canonical `host:port` the server reports via `/info`.
    pub remote_name: Option<String>,
    /// Channel the server confirmed we are in.
    pub confirmed_channel: Option<String>,
    /// Channel a `/join` is in flight for.
    pub pending_channel: Option<String>,
    /// Whether this wrapper is the one currently displayed.
    pub active: bool,
    /// Whether the next `/info` reply should be swallowed as a name probe.
    pub pinging_for_info: bool,
    /// Nickname of the most recent whisper counterpart, for `/reply`.
    pub last_whisperer: Option<String>,
    /// Newest first.
    history: VecDeque<Frame>,
    input_tx: mpsc::UnboundedSender<String>,
    shared: Arc<WrapperShared>,
    listener: JoinHandle<()>,
    sender: JoinHandle<()>,
}

impl ConnWrapper {
    /// Wrap an established socket, spawning the listener and sender tasks.
    pub fn spawn(
        id: WrapperId,
        stream: TcpStream,
        host: impl Into<String>,
        port: u16,
        default_nickname: Arc<Mutex<String>>,
        events_tx: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(WrapperShared {
            in_channel: AtomicBool::new(false),
        });

        let listener = tokio::spawn(listener_task(id, read_half, events_tx.clone()));
        let sender = tokio::spawn(sender_task(
            id,
            input_rx,
            write_half,
            Arc::clone(&shared),
            default_nickname,
            events_tx,
        ));

        Self {
            id,
            host: host.into(),
            port,
            remote_name: None,
            confirmed_channel: None,
            pending_channel: None,
            active: false,
            pinging_for_info: false,
            last_whisperer: None,
            history: VecDeque::new(),
            input_tx,
            shared,
            listener,
            sender,
        }
    }

    /// Queue a line for the sender task.
    pub fn enqueue(&self, line: impl Into<String>) {
        let _ = self.input_tx.send(line.into());
    }

    /// Queue the close sentinel; the sender requests closure afterwards.
    pub fn enqueue_close(&self) {
        let _ = self.input_tx.send(String::new());
    }

    /// Whether the server has us in a channel.
    pub fn in_channel(&self) -> bool {
        self.shared.in_channel.load(Ordering::Relaxed)
    }

    /// Flip the in-channel flag (shared with the sender task).
    pub fn set_in_channel(&self, value: bool) {
        self.shared.in_channel.store(value, Ordering::Relaxed);
    }

    /// Record a received frame, newest first, capped.
    pub fn store(&mut self, frame: Frame) {
        self.history.push_front(frame);
        self.history.truncate(HISTORY_LIMIT);
    }

    /// Received frames, newest first.
    pub fn history(&self) -> &VecDeque<Frame> {
        &self.history
    }

    /// The name shown in display listings.
    pub fn display_name(&self) -> String {
        match &self.remote_name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Whether this wrapper dialed the given server.
    pub fn connects_to(&self, host: &str, port: u16) -> bool {
        (self.host == host && self.port == port)
            || self.remote_name.as_deref() == Some(&format!("{host}:{port}"))
    }

    /// Tear both tasks down and drop the socket.
    ///
    /// Must only be called from the event loop, never from the listener or
    /// sender themselves.
    pub fn close(&self) {
        self.listener.abort();
        self.sender.abort();
    }
}

/// Decode frames until the server goes away, forwarding each as an event.
async fn listener_task(
    id: WrapperId,
    mut read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(frame)) => {
                if events
                    .send(ClientEvent::Received { wrapper: id, frame })
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(wrapper = id, error = %e, "listener read failed");
                break;
            }
        }
    }
    let _ = events.send(ClientEvent::ListenerClosed { wrapper: id });
}

/// Ship queued lines, stamping nickname and frame type at send time.
///
/// An empty line is the close signal: the close sentinel goes out and the
/// wrapper is scheduled for teardown by the event loop.
async fn sender_task(
    id: WrapperId,
    mut input_rx: mpsc::UnboundedReceiver<String>,
    mut write_half: OwnedWriteHalf,
    shared: Arc<WrapperShared>,
    default_nickname: Arc<Mutex<String>>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    while let Some(line) = input_rx.recv().await {
        if line.is_empty() {
            let _ = send_frame(&mut write_half, &Frame::close()).await;
            let _ = events.send(ClientEvent::CloseRequested { wrapper: id });
            break;
        }

        let nickname = default_nickname
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|_| "anon".to_owned());
        let frame_type = if shared.in_channel.load(Ordering::Relaxed) {
            FrameType::Post
        } else {
            FrameType::ServerReply
        };

        let frame = Frame::new(0, nickname, frame_type, line);
        if let Err(e) = send_frame(&mut write_half, &frame).await {
            debug!(wrapper = id, error = %e, "sender write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn wrapper_pair() -> (
        ConnWrapper,
        TcpStream,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_stream = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let nickname = Arc::new(Mutex::new("anon".to_owned()));
        let wrapper = ConnWrapper::spawn(1, client_stream, "127.0.0.1", addr.port(), nickname, events_tx);
        (wrapper, server_stream, events_rx)
    }

    #[tokio::test]
    async fn test_sender_stamps_nickname_and_type() {
        let (wrapper, mut server, _events) = wrapper_pair().await;

        wrapper.enqueue("hello");
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(frame.nickname, "anon");
        assert_eq!(frame.frame_type, FrameType::ServerReply);
        assert_eq!(frame.payload, "hello");

        wrapper.set_in_channel(true);
        wrapper.enqueue("in channel now");
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Post);
    }

    #[tokio::test]
    async fn test_enqueue_close_sends_sentinel_and_requests_closure() {
        let (wrapper, mut server, mut events) = wrapper_pair().await;

        wrapper.enqueue_close();
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert!(frame.is_close());

        match events.recv().await.unwrap() {
            ClientEvent::CloseRequested { wrapper: id } => assert_eq!(id, wrapper.id),
            _ => panic!("expected close request"),
        }
    }

    #[tokio::test]
    async fn test_listener_forwards_frames_and_reports_eof() {
        let (wrapper, mut server, mut events) = wrapper_pair().await;

        let frame = Frame::new(0, "srv", FrameType::ServerReply, "welcome");
        send_frame(&mut server, &frame).await.unwrap();

        match events.recv().await.unwrap() {
            ClientEvent::Received { wrapper: id, frame: got } => {
                assert_eq!(id, wrapper.id);
                assert_eq!(got.payload, "welcome");
            }
            _ => panic!("expected received frame"),
        }

        drop(server);
        match events.recv().await.unwrap() {
            ClientEvent::ListenerClosed { wrapper: id } => assert_eq!(id, wrapper.id),
            _ => panic!("expected listener closed"),
        }
    }

    #[tokio::test]
    async fn test_history_is_capped_newest_first() {
        let (mut wrapper, _server, _events) = wrapper_pair().await;
        for i in 0..(HISTORY_LIMIT + 10) {
            wrapper.store(Frame::new(0, "a", FrameType::Post, format!("m{i}")));
        }
        assert_eq!(wrapper.history().len(), HISTORY_LIMIT);
        assert_eq!(wrapper.history().front().unwrap().payload, "m59");
    }
}

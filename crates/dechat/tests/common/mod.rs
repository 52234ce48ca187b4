//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use dechat::proto::{Frame, FrameType, read_frame, send_frame};
use dechat::server::Server;
use tokio::net::TcpStream;

/// Bind a server on an ephemeral loopback port and run it in the
/// background. Returns the address peers and clients should dial.
pub async fn spawn_server() -> SocketAddr {
    let server = Server::bind("127.0.0.1", 0).await.expect("bind server");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

/// A raw protocol client: sends user lines as frames, reads frames back.
pub struct TestClient {
    /// Nickname stamped on outgoing frames.
    pub nick: String,
    stream: TcpStream,
}

impl TestClient {
    /// Connect and consume the unsolicited MOTD reply.
    pub async fn connect(addr: SocketAddr, nick: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut client = Self {
            nick: nick.to_owned(),
            stream,
        };
        let motd = client.expect().await;
        assert_eq!(motd.frame_type, FrameType::ServerReply, "expected MOTD");
        client
    }

    /// Send one user input line.
    pub async fn send(&mut self, line: &str) {
        let frame = Frame::new(0, self.nick.clone(), FrameType::ServerReply, line);
        send_frame(&mut self.stream, &frame).await.expect("send");
    }

    /// Read one frame, or `None` after a 2 second timeout or close.
    pub async fn recv(&mut self) -> Option<Frame> {
        match tokio::time::timeout(Duration::from_secs(2), read_frame(&mut self.stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => None,
            Err(_) => None,
        }
    }

    /// Read one frame, panicking on timeout.
    pub async fn expect(&mut self) -> Frame {
        self.recv().await.expect("timed out waiting for a frame")
    }

    /// Collect frames until the line stays quiet for `quiet_ms`.
    pub async fn collect_quiet(&mut self, quiet_ms: u64) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(Ok(Some(frame))) = tokio::time::timeout(
            Duration::from_millis(quiet_ms),
            read_frame(&mut self.stream),
        )
        .await
        {
            out.push(frame);
        }
        out
    }

    /// Send the close sentinel.
    pub async fn close(&mut self) {
        let _ = send_frame(&mut self.stream, &Frame::close()).await;
    }

    /// Check whether the server has closed this connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(2), read_frame(&mut self.stream)).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }
}

/// Payloads of the given frames, in order.
pub fn payloads(frames: &[Frame]) -> Vec<String> {
    frames.iter().map(|f| f.payload.clone()).collect()
}

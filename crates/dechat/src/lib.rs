//! Federated text-chat engine.
//!
//! Multiple independent servers host named channels; clients connect to
//! one or more servers concurrently, and channels on different servers
//! may be linked so that messages broadcast to one are mirrored to all
//! linked peers. A client may also be migrated from a channel on one
//! server to the equivalent channel on a peer.
//!
//! The crate splits into three layers:
//!
//! - [`proto`] - the fixed-header wire frame, transport helpers, and the
//!   server-to-server control records,
//! - [`server`] - the channel engine: connection lifecycle, membership,
//!   per-channel fan-out, the link protocol, loop suppression of relayed
//!   messages, and migration broadcasts,
//! - [`client`] - the multi-connection client engine: per-server listener
//!   and sender tasks, input routing, history buffering, display
//!   switching, and incoming migration directives.
//!
//! # Running a server
//!
//! ```ignore
//! use dechat::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> dechat::Result<()> {
//!     let server = Server::bind("localhost", 9996).await?;
//!     server.run().await
//! }
//! ```
//!
//! # Running a client
//!
//! ```ignore
//! use dechat::client::{self, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> dechat::Result<()> {
//!     client::run(ClientConfig { ui: true }).await
//! }
//! ```
//!
//! # Speaking the protocol directly
//!
//! ```ignore
//! use dechat::proto::{dial, read_frame, send_frame, Frame};
//!
//! let mut stream = dial("localhost", 9996).await?;
//! send_frame(&mut stream, &Frame::server_reply("/list")).await?;
//! while let Some(frame) = read_frame(&mut stream).await? {
//!     println!("{}", frame.payload);
//! }
//! ```

pub mod alias;
pub mod client;
pub mod error;
pub mod proto;
pub mod server;
pub mod util;

// Re-export common types at crate root for convenience
pub use error::{Error, Result};
pub use proto::{Frame, FrameType, SERVER_CHANNEL_ID};
pub use server::Server;

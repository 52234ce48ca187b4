//! Wire protocol: frame codec, transport helpers, control records.

pub mod control;
pub mod frame;
pub mod transport;

pub use control::{ControlRecord, LinkRef, SEP};
pub use frame::{
    Frame, FrameType, HEADER_LEN, MAX_NICK_LEN, MAX_PAYLOAD_LEN, NICKNAME_FIELD_LEN,
    SERVER_CHANNEL_ID,
};
pub use transport::{bind_listener, dial, read_frame, send_frame};

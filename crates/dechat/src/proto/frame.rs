//! Wire frame codec.
//!
//! Every message on the wire is one frame: a fixed 40-byte header followed
//! by an ASCII payload. All multi-byte integers are little-endian.
//!
//! ```text
//! [channel_id:2][nickname:32][timestamp:4][type_and_length:2][payload:N]
//! ```
//!
//! The `type_and_length` field packs a 2-bit frame type into the low bits
//! and a 14-bit payload length into the high bits.

use bytes::{BufMut, BytesMut};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};
use crate::util::time::unix_now;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 40;

/// Size of the nickname field inside the header.
pub const NICKNAME_FIELD_LEN: usize = 32;

/// Maximum payload length encodable in the 14-bit length field.
pub const MAX_PAYLOAD_LEN: usize = (u16::MAX >> 2) as usize;

/// Maximum effective nickname length users may pick.
pub const MAX_NICK_LEN: usize = 15;

/// Reserved channel id for server-scope frames.
pub const SERVER_CHANNEL_ID: u16 = 0xFFFF;

/// Frame header (wire layout, little-endian).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct WireHeader {
    channel_id: U16,
    nickname: [u8; NICKNAME_FIELD_LEN],
    timestamp: U32,
    type_and_length: U16,
}

/// The 2-bit frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// A message for all members of a channel.
    Post = 0b00,
    /// Control reply to a single connection; `channel_id` is the server scope.
    ServerReply = 0b01,
    /// Server-to-server control directive (link/unlink/response/migrate).
    Control = 0b10,
    /// A channel post mirrored between linked servers; the receiver
    /// re-broadcasts it locally as [`FrameType::Post`].
    Relay = 0b11,
}

impl FrameType {
    /// Decode a type from its 2-bit wire value.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(Self::Post),
            0b01 => Some(Self::ServerReply),
            0b10 => Some(Self::Control),
            0b11 => Some(Self::Relay),
            _ => None,
        }
    }

    /// The 2-bit wire value.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Check if this frame type marks the sender as a peer server.
    pub fn is_server_to_server(self) -> bool {
        matches!(self, Self::Control | Self::Relay)
    }
}

/// One decoded wire frame.
///
/// Equality (and hashing) is componentwise over every field; the relay
/// deduplication cache relies on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    /// Target channel, or [`SERVER_CHANNEL_ID`] for server scope.
    pub channel_id: u16,
    /// Sender nickname; whispers carry `"sender -> target"` here.
    pub nickname: String,
    /// Unix seconds, truncated to 32 bits.
    pub timestamp: u32,
    /// The 2-bit frame type.
    pub frame_type: FrameType,
    /// ASCII payload.
    pub payload: String,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(
        channel_id: u16,
        nickname: impl Into<String>,
        frame_type: FrameType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            channel_id,
            nickname: nickname.into(),
            timestamp: unix_now(),
            frame_type,
            payload: payload.into(),
        }
    }

    /// A server-scope reply to a single connection.
    pub fn server_reply(payload: impl Into<String>) -> Self {
        Self::new(SERVER_CHANNEL_ID, "", FrameType::ServerReply, payload)
    }

    /// The all-zero close sentinel.
    ///
    /// A client sends this to end its connection; on the wire it is a
    /// zero channel id, an empty nickname, a zero timestamp, type
    /// [`FrameType::Post`], and an empty payload.
    pub fn close() -> Self {
        Self {
            channel_id: 0,
            nickname: String::new(),
            timestamp: 0,
            frame_type: FrameType::Post,
            payload: String::new(),
        }
    }

    /// Check whether this frame is the close sentinel.
    pub fn is_close(&self) -> bool {
        self.channel_id == 0
            && self.nickname.is_empty()
            && self.timestamp == 0
            && self.frame_type == FrameType::Post
            && self.payload.is_empty()
    }

    /// Pack a frame type and payload length into the wire field.
    ///
    /// Fails if the length exceeds the 14-bit limit.
    pub fn pack_type_and_length(frame_type: FrameType, len: usize) -> Result<u16> {
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLong {
                len,
                limit: MAX_PAYLOAD_LEN,
            });
        }
        Ok(((len as u16) << 2) | u16::from(frame_type.bits()))
    }

    /// Unpack the wire field into a frame type and payload length.
    pub fn unpack_type_and_length(value: u16) -> (FrameType, usize) {
        // The low 2 bits cover every FrameType variant.
        let frame_type = match value & 0b11 {
            0b00 => FrameType::Post,
            0b01 => FrameType::ServerReply,
            0b10 => FrameType::Control,
            _ => FrameType::Relay,
        };
        (frame_type, (value >> 2) as usize)
    }

    /// Encode to wire bytes.
    ///
    /// Rejects payloads over the 14-bit length limit, nicknames over the
    /// 32-byte field, and non-ASCII content in either.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if !self.payload.is_ascii() {
            return Err(Error::InvalidFrame("payload is not ASCII".into()));
        }
        if !self.nickname.is_ascii() {
            return Err(Error::InvalidFrame("nickname is not ASCII".into()));
        }
        if self.nickname.len() > NICKNAME_FIELD_LEN {
            return Err(Error::NicknameTooLong {
                len: self.nickname.len(),
                limit: NICKNAME_FIELD_LEN,
            });
        }

        let type_and_length = Self::pack_type_and_length(self.frame_type, self.payload.len())?;

        let mut nickname = [0u8; NICKNAME_FIELD_LEN];
        nickname[..self.nickname.len()].copy_from_slice(self.nickname.as_bytes());

        let header = WireHeader {
            channel_id: U16::new(self.channel_id),
            nickname,
            timestamp: U32::new(self.timestamp),
            type_and_length: U16::new(type_and_length),
        };

        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(self.payload.as_bytes());

        Ok(buf.to_vec())
    }

    /// Decode one frame from wire bytes.
    ///
    /// The buffer must hold the whole header and the declared payload;
    /// anything shorter is rejected as truncated. Trailing bytes beyond
    /// the payload are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Truncated {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }

        let (header, rest) = WireHeader::ref_from_prefix(data)
            .map_err(|_| Error::InvalidFrame("unreadable header".into()))?;

        let (frame_type, length) = Self::unpack_type_and_length(header.type_and_length.get());

        if rest.len() < length {
            return Err(Error::Truncated {
                expected: HEADER_LEN + length,
                actual: data.len(),
            });
        }

        let payload = &rest[..length];
        if !payload.is_ascii() {
            return Err(Error::InvalidFrame("payload is not ASCII".into()));
        }

        let nickname = decode_nickname(&header.nickname)?;

        Ok(Self {
            channel_id: header.channel_id.get(),
            nickname,
            timestamp: header.timestamp.get(),
            frame_type,
            // ASCII verified above, so this cannot fail.
            payload: String::from_utf8_lossy(payload).into_owned(),
        })
    }
}

/// Strip the zero-byte padding from a nickname field.
fn decode_nickname(field: &[u8; NICKNAME_FIELD_LEN]) -> Result<String> {
    if !field.is_ascii() {
        return Err(Error::InvalidFrame("nickname is not ASCII".into()));
    }
    let s = String::from_utf8_lossy(field);
    Ok(s.trim_matches('\0').to_owned())
}

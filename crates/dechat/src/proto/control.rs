//! Server-to-server control records.
//!
//! Control frames ([`FrameType::Control`]) carry a textual record in their
//! payload: a tag and three fields separated by the ASCII Unit Separator.
//!
//! ```text
//! --link US channel US host US port
//! ```
//!
//! `--link`, `--unlink`, and `--response` drive the channel link
//! handshake; `--migrate` is broadcast to channel members to send them to
//! a peer server.
//!
//! [`FrameType::Control`]: crate::proto::frame::FrameType::Control

use winnow::combinator::{alt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_till;

use crate::error::{Error, Result};

/// Field separator inside control records (U+001F, ASCII Unit Separator).
pub const SEP: char = '\u{1f}';

/// Result type for winnow parsers.
type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// A `(channel, host, port)` triple naming one end of a link.
///
/// Which end depends on the record: `--link`, `--unlink`, and `--migrate`
/// carry the *sender's* identity (so the receiver knows whose edge to add
/// or drop), while `--response` carries the *responder's*.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkRef {
    /// Channel name (the same on both servers by convention).
    pub channel: String,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl LinkRef {
    /// Create a link reference.
    pub fn new(channel: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            channel: channel.into(),
            host: host.into(),
            port,
        }
    }
}

/// A decoded control record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRecord {
    /// Request to link the named channel; the frame's `channel_id` carries
    /// the sender's local channel id.
    Link(LinkRef),
    /// Request to drop a link edge.
    Unlink(LinkRef),
    /// Reply to `--link`; the frame's `channel_id` is the responder's
    /// channel id on success or the server-scope id on failure.
    Response(LinkRef),
    /// Directive to members: reconnect to this channel on this server.
    Migrate(LinkRef),
}

impl ControlRecord {
    /// The record's wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Link(_) => "--link",
            Self::Unlink(_) => "--unlink",
            Self::Response(_) => "--response",
            Self::Migrate(_) => "--migrate",
        }
    }

    /// The `(channel, host, port)` fields.
    pub fn link_ref(&self) -> &LinkRef {
        match self {
            Self::Link(r) | Self::Unlink(r) | Self::Response(r) | Self::Migrate(r) => r,
        }
    }

    /// Encode to the payload text.
    pub fn encode(&self) -> String {
        let r = self.link_ref();
        format!(
            "{tag}{SEP}{channel}{SEP}{host}{SEP}{port}",
            tag = self.tag(),
            channel = r.channel,
            host = r.host,
            port = r.port,
        )
    }

    /// Parse a control record from a frame payload.
    pub fn parse(payload: &str) -> Result<Self> {
        record
            .parse(payload)
            .map_err(|e| Error::InvalidControl(e.to_string()))
    }
}

/// One `SEP`-prefixed field.
fn field<'a>(input: &mut &'a str) -> PResult<&'a str> {
    preceded(SEP, take_till(0.., SEP)).parse_next(input)
}

fn link_ref(input: &mut &str) -> PResult<LinkRef> {
    let channel = field(input)?;
    let host = field(input)?;
    let port = field(input)?
        .parse::<u16>()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))?;
    Ok(LinkRef::new(channel, host, port))
}

fn record(input: &mut &str) -> PResult<ControlRecord> {
    let tag = alt(("--link", "--unlink", "--response", "--migrate")).parse_next(input)?;
    let r = link_ref(input)?;
    Ok(match tag {
        "--link" => ControlRecord::Link(r),
        "--unlink" => ControlRecord::Unlink(r),
        "--response" => ControlRecord::Response(r),
        _ => ControlRecord::Migrate(r),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_unit_separator() {
        let rec = ControlRecord::Link(LinkRef::new("room", "localhost", 9996));
        assert_eq!(rec.encode(), "--link\u{1f}room\u{1f}localhost\u{1f}9996");
    }

    #[test]
    fn test_round_trip_all_tags() {
        let r = LinkRef::new("room", "chat.example.org", 1234);
        for rec in [
            ControlRecord::Link(r.clone()),
            ControlRecord::Unlink(r.clone()),
            ControlRecord::Response(r.clone()),
            ControlRecord::Migrate(r.clone()),
        ] {
            assert_eq!(ControlRecord::parse(&rec.encode()).unwrap(), rec);
        }
    }

    #[test]
    fn test_rejects_unknown_tag() {
        assert!(ControlRecord::parse("--frobnicate\u{1f}a\u{1f}b\u{1f}1").is_err());
    }

    #[test]
    fn test_rejects_missing_fields() {
        assert!(ControlRecord::parse("--link\u{1f}room\u{1f}localhost").is_err());
        assert!(ControlRecord::parse("--link").is_err());
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(ControlRecord::parse("--link\u{1f}room\u{1f}h\u{1f}notaport").is_err());
        assert!(ControlRecord::parse("--link\u{1f}room\u{1f}h\u{1f}99999").is_err());
    }

    #[test]
    fn test_rejects_trailing_garbage() {
        assert!(ControlRecord::parse("--link\u{1f}room\u{1f}h\u{1f}1\u{1f}extra").is_err());
    }

    #[test]
    fn test_channel_names_may_contain_spaces() {
        let rec = ControlRecord::Migrate(LinkRef::new("the lounge", "h", 1));
        assert_eq!(ControlRecord::parse(&rec.encode()).unwrap(), rec);
    }
}

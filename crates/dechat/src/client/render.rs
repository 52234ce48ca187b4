//! Message rendering for the terminal.

use crate::proto::frame::{Frame, FrameType, MAX_NICK_LEN};
use crate::util::time::clock_time;

/// Width of the right-justified nickname column.
pub const NICK_COLUMN: usize = MAX_NICK_LEN * 2 + 2;

/// Render one frame as a display line.
///
/// `[HH:MM:SS]` then the nickname right-justified into its column, a
/// separator, and the payload. Whisper frames (nickname contains `->`)
/// use `:` instead of `|`; server-scope frames show `*` as the nickname.
/// Continuation lines of a multiline payload are indented under the
/// separator.
pub fn render_frame(frame: &Frame) -> String {
    let time = clock_time(frame.timestamp);
    let separator = if frame.nickname.contains("->") { ':' } else { '|' };
    let nickname = if frame.frame_type == FrameType::ServerReply {
        "*"
    } else {
        frame.nickname.as_str()
    };

    let mut out = String::new();
    for (i, line) in frame.payload.split('\n').enumerate() {
        if i == 0 {
            out = format!("{time}{nickname:>width$}{separator} {line}", width = NICK_COLUMN);
        } else {
            out.push('\n');
            // The time column is 10 characters wide.
            out.push_str(&" ".repeat(NICK_COLUMN + 10));
            out.push(separator);
            out.push(' ');
            out.push_str(line);
        }
    }
    out
}

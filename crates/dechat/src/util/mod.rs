//! Shared utilities for dechat.

pub mod addr;
pub mod time;
pub mod tokens;

pub use addr::split_host_port;
pub use time::{clock_time, format_uptime};
pub use tokens::split_tokens;

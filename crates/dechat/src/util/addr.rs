//! `host:port` parsing.

use crate::error::{Error, Result};

/// Split a `host:port` string into its parts.
///
/// The port must be a decimal integer in `0..=65535`. The host part is not
/// resolved here; it is handed to the connector as-is.
///
/// # Example
///
/// ```
/// use dechat::util::addr::split_host_port;
///
/// let (host, port) = split_host_port("irc.example.org:9996").unwrap();
/// assert_eq!(host, "irc.example.org");
/// assert_eq!(port, 9996);
/// ```
pub fn split_host_port(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(format!("expected host:port, got '{s}'")))?;

    if host.is_empty() {
        return Err(Error::InvalidAddress(format!("empty host in '{s}'")));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidAddress(format!("invalid port '{port}'")))?;

    Ok((host.to_owned(), port))
}

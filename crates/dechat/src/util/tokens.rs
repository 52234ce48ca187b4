//! User input tokenization.
//!
//! Client input is whitespace-delimited with no quoting; runs of spaces
//! collapse to a single separator.

/// Split a line into non-empty whitespace-delimited tokens.
///
/// # Example
///
/// ```
/// use dechat::util::tokens::split_tokens;
///
/// assert_eq!(split_tokens("/join  lobby   pw"), vec!["/join", "lobby", "pw"]);
/// assert_eq!(split_tokens("   "), Vec::<&str>::new());
/// ```
pub fn split_tokens(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Return everything after the first `n` tokens, trimmed.
///
/// Used by commands that take free-form trailing text (`/emote`, `/msg`,
/// `/quit <reason>`), where the tail must keep its internal spacing intact
/// apart from the collapsing `split_tokens` already applies to the head.
///
/// # Example
///
/// ```
/// use dechat::util::tokens::rest_after;
///
/// assert_eq!(rest_after("/msg bob hi there", 2), Some("hi there"));
/// assert_eq!(rest_after("/quit", 1), None);
/// ```
pub fn rest_after(line: &str, n: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..n {
        let idx = rest.find(char::is_whitespace)?;
        rest = rest[idx..].trim_start();
    }
    let rest = rest.trim_end();
    if rest.is_empty() { None } else { Some(rest) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tokens_collapses_spaces() {
        assert_eq!(split_tokens("a   b\t c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_tokens_empty() {
        assert!(split_tokens("").is_empty());
        assert!(split_tokens("  \t ").is_empty());
    }

    #[test]
    fn test_rest_after() {
        assert_eq!(rest_after("/emote waves at everyone", 1), Some("waves at everyone"));
        assert_eq!(rest_after("/msg bob  hi   there", 2), Some("hi   there"));
        assert_eq!(rest_after("/msg bob", 2), None);
        assert_eq!(rest_after("/quit  ", 1), None);
    }
}

//! Relay reply parsing.

use core::fmt::{self, Display};

use super::error::{ClientError, Result};

/// One line of a (possibly multi-line) reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// `false` for `250-...` continuation lines.
    pub is_last: bool,
    pub text: String,
}

impl ReplyLine {
    /// Parses a single line with its terminator already removed.
    ///
    /// # Errors
    ///
    /// [`ClientError::Parse`] if the line does not start with a three digit
    /// code followed by a space, a dash, or nothing.
    pub fn parse(line: &str) -> Result<Self> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::Parse(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(other) => {
                return Err(ClientError::Parse(format!(
                    "Invalid separator '{}' in '{line}'",
                    char::from(*other)
                )));
            }
        };

        Ok(Self {
            code,
            is_last,
            text: line.get(4..).unwrap_or_default().to_string(),
        })
    }
}

/// A complete reply from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined with `\n`.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, e.g. `354` after DATA or `334` during AUTH.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// 4xx
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the buffer does not yet hold a final line. Both CRLF and bare LF
    /// terminators are accepted.
    ///
    /// # Errors
    ///
    /// [`ClientError::Parse`] for malformed lines or a multi-line reply whose
    /// codes disagree, [`ClientError::Utf8`] for non UTF-8 text.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(&b"\r"[..]).unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = ReplyLine::parse(std::str::from_utf8(raw)?)?;
            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::Parse(format!(
                        "Status code mismatch in multi-line reply: expected {expected}, got {}",
                        line.code
                    )));
                }
                _ => code = Some(line.code),
            }

            lines.push(line.text);
            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} {}", self.code, self.lines.join(" "))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line() {
        let (reply, consumed) = Reply::parse(b"250 OK\r\n").unwrap().unwrap();
        assert_eq!(reply, Reply::new(250, vec!["OK".to_string()]));
        assert_eq!(consumed, 8);
        assert!(reply.is_positive());
    }

    #[test]
    fn test_parse_multi_line() {
        let data = b"250-relay.example\r\n250-SIZE 10000000\r\n250 HELP\r\n";
        let (reply, consumed) = Reply::parse(data).unwrap().unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.lines, ["relay.example", "SIZE 10000000", "HELP"]);
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_incomplete_reply_needs_more_data() {
        assert!(Reply::parse(b"250-relay.example\r\n250-SIZE").unwrap().is_none());
        assert!(Reply::parse(b"").unwrap().is_none());
    }

    #[test]
    fn test_trailing_bytes_are_left_unconsumed() {
        let (reply, consumed) = Reply::parse(b"220 ready\n354 go").unwrap().unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_bare_code() {
        let line = ReplyLine::parse("354").unwrap();
        assert_eq!(line.code, 354);
        assert!(line.is_last);
        assert_eq!(line.text, "");
    }

    #[test]
    fn test_malformed_lines() {
        assert!(ReplyLine::parse("ok").is_err());
        assert!(ReplyLine::parse("25x OK").is_err());
        assert!(ReplyLine::parse("250_OK").is_err());
        assert!(Reply::parse(b"250-a\r\n251 b\r\n").is_err());
    }

    #[test]
    fn test_classification() {
        assert!(Reply::new(334, vec![]).is_intermediate());
        assert!(Reply::new(451, vec![]).is_transient());
        assert!(Reply::new(550, vec![]).is_permanent());
        assert_eq!(
            Reply::new(550, vec!["No such".into(), "user".into()]).to_string(),
            "550 No such user"
        );
    }
}

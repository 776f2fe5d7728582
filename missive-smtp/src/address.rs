use core::{
    fmt::{self, Display},
    str::FromStr,
};
use std::net::IpAddr;

use serde::Deserialize;

use crate::error::SessionError;

/// A relay endpoint, parsed from `host:port`.
///
/// IPv6 literals must be bracketed: `[::1]:587`. Parsing never touches the
/// network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `localhost` or a loopback IP literal.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }
}

impl FromStr for ServerAddress {
    type Err = SessionError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            SessionError::Validation(format!("Invalid server address '{address}': {reason}"))
        };

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| invalid("expected host:port"))?;
            (host, port)
        } else {
            address
                .split_once(':')
                .ok_or_else(|| invalid("expected host:port"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if port.is_empty() {
            return Err(invalid("missing port"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = SessionError;

    fn try_from(address: String) -> Result<Self, Self::Error> {
        address.parse()
    }
}

impl Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(fmt, "[{}]:{}", self.host, self.port)
        } else {
            write!(fmt, "{}:{}", self.host, self.port)
        }
    }
}

//! Timeouts applied to each step of a relay conversation.
//!
//! Every network round-trip the session performs is wrapped in
//! `tokio::time::timeout` with the matching value from [`ClientTimeouts`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side timeout configuration, all values in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Establishing the TCP (or implicit TLS) connection and reading the greeting.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// EHLO/HELO, including the re-issued EHLO after STARTTLS.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::ehlo_secs")]
    pub ehlo_secs: u64,

    /// STARTTLS command and the TLS handshake that follows it.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::starttls_secs")]
    pub starttls_secs: u64,

    /// Each AUTH exchange round-trip.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::auth_secs")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::mail_from_secs")]
    pub mail_from_secs: u64,

    /// Applied to every RCPT TO individually.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::rcpt_to_secs")]
    pub rcpt_to_secs: u64,

    /// DATA command, payload transfer and the final acknowledgement.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// Best effort; expiry is logged, never reported.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            ehlo_secs: defaults::ehlo_secs(),
            starttls_secs: defaults::starttls_secs(),
            auth_secs: defaults::auth_secs(),
            mail_from_secs: defaults::mail_from_secs(),
            rcpt_to_secs: defaults::rcpt_to_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl ClientTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn ehlo(&self) -> Duration {
        Duration::from_secs(self.ehlo_secs)
    }

    #[must_use]
    pub const fn starttls(&self) -> Duration {
        Duration::from_secs(self.starttls_secs)
    }

    #[must_use]
    pub const fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    #[must_use]
    pub const fn mail_from(&self) -> Duration {
        Duration::from_secs(self.mail_from_secs)
    }

    #[must_use]
    pub const fn rcpt_to(&self) -> Duration {
        Duration::from_secs(self.rcpt_to_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }
    pub const fn ehlo_secs() -> u64 {
        30
    }
    pub const fn starttls_secs() -> u64 {
        30
    }
    pub const fn auth_secs() -> u64 {
        30
    }
    pub const fn mail_from_secs() -> u64 {
        30
    }
    pub const fn rcpt_to_secs() -> u64 {
        30
    }
    pub const fn data_secs() -> u64 {
        120 // 2 minutes
    }
    pub const fn quit_secs() -> u64 {
        10
    }
}

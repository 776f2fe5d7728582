//! TLS settings for the relay connection.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// When the client encrypts a plain connection via STARTTLS.
///
/// Connections opened directly over TLS ignore the policy; they are
/// encrypted from the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Upgrade when the relay advertises STARTTLS, stay plaintext otherwise.
    #[default]
    Opportunistic,

    /// Fail the session if the relay does not advertise STARTTLS.
    Required,

    /// Never issue STARTTLS.
    ///
    /// **WARNING**: credentials will only be sent to loopback relays.
    Disabled,
}

/// Complete TLS configuration for one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Default: `Opportunistic`
    #[serde(default)]
    pub policy: TlsPolicy,

    /// Accept self-signed, expired or mismatched certificates.
    ///
    /// **SECURITY WARNING**: makes the connection vulnerable to
    /// man-in-the-middle attacks. Only for testing.
    ///
    /// Default: `false`
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Name presented for SNI and checked against the certificate.
    ///
    /// Default: the host part of the server address.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Extra PEM bundle trusted in addition to the platform roots.
    #[serde(default)]
    pub ca_certificate: Option<PathBuf>,
}

impl TlsConfig {
    /// Opportunistic upgrade with full certificate validation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            policy: TlsPolicy::Opportunistic,
            accept_invalid_certs: false,
            server_name: None,
            ca_certificate: None,
        }
    }

    #[must_use]
    pub const fn required() -> Self {
        Self {
            policy: TlsPolicy::Required,
            accept_invalid_certs: false,
            server_name: None,
            ca_certificate: None,
        }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            policy: TlsPolicy::Disabled,
            accept_invalid_certs: false,
            server_name: None,
            ca_certificate: None,
        }
    }

    /// **WARNING**: Only use in test environments.
    #[must_use]
    pub const fn insecure() -> Self {
        Self {
            policy: TlsPolicy::Opportunistic,
            accept_invalid_certs: true,
            server_name: None,
            ca_certificate: None,
        }
    }

    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    #[must_use]
    pub fn with_ca_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_certificate = Some(path.into());
        self
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        matches!(self.policy, TlsPolicy::Required)
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self.policy, TlsPolicy::Disabled)
    }

    /// The name to verify the relay's certificate against: the explicit
    /// override if one is set, otherwise `host`.
    #[must_use]
    pub fn server_name_for<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }
}

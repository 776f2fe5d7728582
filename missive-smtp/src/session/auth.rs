//! SASL mechanisms used to authenticate to the relay.

use core::fmt::{self, Display};

use base64::Engine;

use crate::{
    client::{Capabilities, Client, Reply},
    credentials::Credentials,
    error::{Result, SessionError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// RFC 4616: `\0user\0password` in a single step.
    Plain,
    /// Username and password as two base64 challenge responses.
    Login,
}

impl Mechanism {
    /// In order of preference.
    pub const SUPPORTED: [Self; 2] = [Self::Plain, Self::Login];

    /// The most preferred mechanism the relay offers.
    #[must_use]
    pub fn select(capabilities: &Capabilities) -> Option<Self> {
        Self::SUPPORTED
            .into_iter()
            .find(|mechanism| capabilities.supports_auth(mechanism.name()))
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.name())
    }
}

fn encode(value: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn rejected(step: &str, reply: &Reply) -> SessionError {
    SessionError::Auth(format!("{step} rejected: {reply}"))
}

/// Runs the exchange for `mechanism`. Credentials are never logged.
pub(super) async fn authenticate(
    client: &mut Client,
    mechanism: Mechanism,
    credentials: &Credentials,
) -> Result<()> {
    match mechanism {
        Mechanism::Plain => {
            let token = encode(&format!(
                "\0{}\0{}",
                credentials.username(),
                credentials.password()
            ));
            let reply = client
                .secret_command(&format!("AUTH PLAIN {token}"), "AUTH PLAIN <redacted>")
                .await?;
            if !reply.is_positive() {
                return Err(rejected("AUTH PLAIN", &reply));
            }
        }
        Mechanism::Login => {
            let reply = client.command("AUTH LOGIN").await?;
            if !reply.is_intermediate() {
                return Err(rejected("AUTH LOGIN", &reply));
            }

            let reply = client
                .secret_command(&encode(credentials.username()), "<redacted username>")
                .await?;
            if !reply.is_intermediate() {
                return Err(rejected("AUTH LOGIN username", &reply));
            }

            let reply = client
                .secret_command(&encode(credentials.password()), "<redacted password>")
                .await?;
            if !reply.is_positive() {
                return Err(rejected("AUTH LOGIN password", &reply));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertising(mechanisms: &str) -> Capabilities {
        Capabilities::from_ehlo(&Reply::new(
            250,
            vec!["relay".to_string(), format!("AUTH {mechanisms}")],
        ))
    }

    #[test]
    fn test_plain_is_preferred() {
        assert_eq!(
            Mechanism::select(&advertising("LOGIN PLAIN")),
            Some(Mechanism::Plain)
        );
    }

    #[test]
    fn test_login_fallback() {
        assert_eq!(
            Mechanism::select(&advertising("CRAM-MD5 LOGIN")),
            Some(Mechanism::Login)
        );
    }

    #[test]
    fn test_no_common_mechanism() {
        assert_eq!(Mechanism::select(&advertising("XOAUTH2 CRAM-MD5")), None);
        assert_eq!(Mechanism::select(&Capabilities::default()), None);
    }

    #[test]
    fn test_plain_token() {
        assert_eq!(encode("\0alice\0secret"), "AGFsaWNlAHNlY3JldA==");
    }
}

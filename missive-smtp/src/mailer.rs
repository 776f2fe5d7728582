use missive_common::{
    config::{TlsConfig, TlsPolicy},
    internal,
};
use missive_mime::{EnvelopeBuilder, Message};
use serde::{Deserialize, Serialize};

use crate::{
    address::ServerAddress,
    credentials::Credentials,
    error::{Result, SessionError},
    session::{Receipt, Session, SessionConfig, State},
};

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Plain TCP, upgraded with STARTTLS as the TLS policy dictates.
    #[default]
    StartTls,
    /// TLS from the first byte (usually port 465).
    Implicit,
}

/// The client applications hold.
///
/// A `Mailer` owns at most one [`Session`]. It is opened on first use (or
/// explicitly with one of the `dial` methods) and reused for every
/// following [`send`](Self::send) until [`quit`](Self::quit) or a failure
/// closes it, after which the next send dials again.
#[derive(Debug)]
pub struct Mailer {
    address: ServerAddress,
    transport: Transport,
    config: SessionConfig,
    envelopes: EnvelopeBuilder,
    session: Option<Session>,
}

impl Mailer {
    /// A mailer for `address` (`host:port`) that upgrades with STARTTLS when
    /// the relay offers it. An empty `username` disables authentication.
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] if `address` is malformed. Nothing is
    /// sent over the network.
    pub fn new(address: &str, username: &str, password: &str) -> Result<Self> {
        Ok(Self::from_config(
            address.parse()?,
            Transport::StartTls,
            SessionConfig::new().with_credentials(Credentials::optional(username, password)),
        ))
    }

    /// Like [`new`](Self::new), but refuses to continue unless STARTTLS
    /// succeeds, verifying the relay as `tls` describes.
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] if `address` is malformed.
    pub fn with_starttls(
        address: &str,
        username: &str,
        password: &str,
        tls: TlsConfig,
    ) -> Result<Self> {
        Ok(Self::from_config(
            address.parse()?,
            Transport::StartTls,
            SessionConfig::new()
                .with_credentials(Credentials::optional(username, password))
                .with_tls(TlsConfig {
                    policy: TlsPolicy::Required,
                    ..tls
                }),
        ))
    }

    /// A mailer that connects over TLS from the first byte.
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] if `address` is malformed.
    pub fn with_implicit_tls(
        address: &str,
        username: &str,
        password: &str,
        tls: TlsConfig,
    ) -> Result<Self> {
        Ok(Self::from_config(
            address.parse()?,
            Transport::Implicit,
            SessionConfig::new()
                .with_credentials(Credentials::optional(username, password))
                .with_tls(tls),
        ))
    }

    #[must_use]
    pub fn from_config(address: ServerAddress, transport: Transport, config: SessionConfig) -> Self {
        Self {
            address,
            transport,
            config,
            envelopes: EnvelopeBuilder::new(),
            session: None,
        }
    }

    /// Replaces the serialiser handed to every new session.
    #[must_use]
    pub fn with_envelope_builder(mut self, envelopes: EnvelopeBuilder) -> Self {
        self.envelopes = envelopes;
        self
    }

    #[must_use]
    pub const fn address(&self) -> &ServerAddress {
        &self.address
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The current session state; `Unconnected` before the first dial.
    #[must_use]
    pub fn state(&self) -> State {
        self.session.as_ref().map_or(State::Unconnected, Session::state)
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Opens a session with the configured transport and TLS policy, then
    /// authenticates. Any open session is quit first.
    ///
    /// # Errors
    ///
    /// Anything [`Session::connect`], [`Session::negotiate_security`] or
    /// [`Session::authenticate`] can fail with.
    pub async fn dial(&mut self) -> Result<()> {
        self.establish(self.transport, self.config.tls.clone()).await
    }

    /// Connects in plain text and requires a successful STARTTLS upgrade.
    ///
    /// # Errors
    ///
    /// As [`dial`](Self::dial); a relay without STARTTLS is a
    /// [`SessionError::Security`] error.
    pub async fn dial_starttls(&mut self) -> Result<()> {
        let tls = TlsConfig {
            policy: TlsPolicy::Required,
            ..self.config.tls.clone()
        };
        self.establish(Transport::StartTls, tls).await
    }

    /// Connects over TLS from the first byte.
    ///
    /// # Errors
    ///
    /// As [`dial`](Self::dial).
    pub async fn dial_tls(&mut self) -> Result<()> {
        self.establish(Transport::Implicit, self.config.tls.clone()).await
    }

    async fn establish(&mut self, transport: Transport, tls: TlsConfig) -> Result<()> {
        if let Some(mut previous) = self.session.take() {
            previous.quit().await;
        }

        let config = self.config.clone().with_tls(tls);
        let session = match transport {
            Transport::StartTls => Session::connect(&self.address, config).await?,
            Transport::Implicit => Session::connect_tls(&self.address, config).await?,
        };
        let mut session = session.with_envelope_builder(self.envelopes.clone());

        let negotiated = match session.negotiate_security().await {
            Ok(()) => session.authenticate().await,
            Err(err) => Err(err),
        };
        if let Err(err) = negotiated {
            session.quit().await;
            return Err(err);
        }

        internal!(
            level = DEBUG,
            "Session with {} is {}",
            self.address,
            session.state()
        );
        self.session = Some(session);
        Ok(())
    }

    /// Returns the open session, dialling first if there is none or the
    /// last one was closed.
    ///
    /// # Errors
    ///
    /// As [`dial`](Self::dial).
    pub async fn ensure_session(&mut self) -> Result<&mut Session> {
        if self.state().needs_connection() {
            internal!(level = DEBUG, "No open session with {}, dialling", self.address);
            self.dial().await?;
        }

        self.session.as_mut().ok_or(SessionError::InvalidState {
            state: State::Unconnected,
            operation: "send",
        })
    }

    /// Sends `message`, dialling first if necessary.
    ///
    /// # Errors
    ///
    /// Dial failures and everything [`Session::send`] can fail with.
    pub async fn send(&mut self, message: &Message) -> Result<Receipt> {
        self.ensure_session().await?.send(message).await
    }

    /// Quits the open session, if any.
    pub async fn quit(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.quit().await;
        }
    }
}

//! One relay conversation over one connection.
//!
//! A [`Session`] is created connected and greeted. From there the caller
//! optionally [negotiates security](Session::negotiate_security) and
//! [authenticates](Session::authenticate), then [sends](Session::send) any
//! number of messages one after the other before [quitting](Session::quit).
//! Each step is bounded by the matching [`ClientTimeouts`] value.
//!
//! Failures that leave the connection in an unknown condition (transport
//! errors, timeouts, failed TLS) close the session. A rejected transaction
//! is reset and the session stays usable.

mod auth;
mod state;

use std::time::Duration;

use missive_common::{
    config::{ClientTimeouts, TlsConfig},
    internal,
    traits::fsm::FiniteStateMachine,
};
use missive_mime::{Envelope, EnvelopeBuilder, Message};
use serde::{Deserialize, Serialize};

pub use self::{
    auth::Mechanism,
    state::{Event, SessionState, State},
};
use crate::{
    address::ServerAddress,
    client::{Capabilities, Client, ClientError, Reply},
    credentials::Credentials,
    error::{ErrorKind, Result, SessionError, Stage},
};

/// The name announced in EHLO/HELO.
pub const DEFAULT_HELO_NAME: &str = "localhost";

/// Which message recipients are declared with `RCPT TO`.
///
/// Headers are unaffected: CC always appears there, BCC never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientScope {
    /// To, then CC, then BCC.
    #[default]
    All,
    /// Only the primary To recipients. CC and BCC addresses are shown in
    /// headers but never delivered to by this relay transaction.
    To,
}

impl RecipientScope {
    /// The addresses to declare for `message`, in declaration order.
    pub fn select(self, message: &Message) -> impl Iterator<Item = &str> {
        let copies = match self {
            Self::All => [message.cc(), message.bcc()],
            Self::To => [&[][..], &[][..]],
        };

        message
            .to()
            .iter()
            .chain(copies.into_iter().flatten())
            .map(String::as_str)
    }
}

/// Everything a session needs besides the relay address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// `None` skips authentication.
    pub credentials: Option<Credentials>,
    pub tls: TlsConfig,
    pub timeouts: ClientTimeouts,
    pub recipients: RecipientScope,
    pub helo_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            tls: TlsConfig::default(),
            timeouts: ClientTimeouts::default(),
            recipients: RecipientScope::default(),
            helo_name: DEFAULT_HELO_NAME.to_string(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_recipients(mut self, recipients: RecipientScope) -> Self {
        self.recipients = recipients;
        self
    }
}

/// Proof of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The `Message-Id` header that was sent.
    pub message_id: String,
    /// Every address declared with `RCPT TO`, all of which were accepted.
    pub recipients: Vec<String>,
    /// The relay's final reply text, often containing its queue id.
    pub reply: String,
}

async fn timed<T>(
    step: &'static str,
    after: Duration,
    operation: impl Future<Output = T>,
) -> Result<T> {
    tokio::time::timeout(after, operation)
        .await
        .map_err(|_| SessionError::Timeout { step, after })
}

fn connect_error(address: &ServerAddress, err: ClientError) -> SessionError {
    match err {
        ClientError::Tls(_) => SessionError::Client(err),
        err => SessionError::Connection(format!("Failed to connect to {address}: {err}")),
    }
}

/// Credentials travel only over TLS, or to a relay on this machine.
fn may_send_credentials(encrypted: bool, address: &ServerAddress) -> bool {
    encrypted || address.is_loopback()
}

pub struct Session {
    client: Client,
    address: ServerAddress,
    config: SessionConfig,
    envelopes: EnvelopeBuilder,
    capabilities: Capabilities,
    state: State,
    context: SessionState,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        fmt.debug_struct("Session")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("client", &self.client)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connects over plain TCP, reads the greeting and says EHLO (HELO if
    /// EHLO is refused).
    ///
    /// # Errors
    ///
    /// Connection, greeting and EHLO failures, or timeouts.
    #[tracing::instrument(level = "debug", skip(config), fields(server = %address))]
    pub async fn connect(address: &ServerAddress, config: SessionConfig) -> Result<Self> {
        let client = timed(
            "connect",
            config.timeouts.connect(),
            Client::connect(address.host(), address.port()),
        )
        .await?
        .map_err(|e| connect_error(address, e))?;

        Self::open(client, address, config).await
    }

    /// Connects over TLS from the first byte, then greets as
    /// [`connect`](Self::connect) does. The session starts out
    /// [`State::SecurityNegotiated`].
    ///
    /// # Errors
    ///
    /// As [`connect`](Self::connect), plus TLS handshake failures.
    #[tracing::instrument(level = "debug", skip(config), fields(server = %address))]
    pub async fn connect_tls(address: &ServerAddress, config: SessionConfig) -> Result<Self> {
        let client = timed(
            "connect",
            config.timeouts.connect(),
            Client::connect_tls(address.host(), address.port(), &config.tls),
        )
        .await?
        .map_err(|e| connect_error(address, e))?;

        let mut session = Self::open(client, address, config).await?;
        session.advance(Event::TlsEstablished);
        Ok(session)
    }

    async fn open(client: Client, address: &ServerAddress, config: SessionConfig) -> Result<Self> {
        let mut session = Self {
            client,
            address: address.clone(),
            config,
            envelopes: EnvelopeBuilder::new(),
            capabilities: Capabilities::default(),
            state: State::Unconnected,
            context: SessionState::new(),
        };

        let greeting = timed(
            "greeting",
            session.config.timeouts.connect(),
            session.client.read_reply(),
        )
        .await??;
        if greeting.code != 220 {
            session.client.close();
            return Err(SessionError::Connection(format!(
                "{address} refused the session: {greeting}"
            )));
        }

        session.hello().await?;
        session.advance(Event::Greeted);
        Ok(session)
    }

    /// Replaces the serialiser used by [`send`](Self::send).
    #[must_use]
    pub fn with_envelope_builder(mut self, envelopes: EnvelopeBuilder) -> Self {
        self.envelopes = envelopes;
        self
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// What the relay advertised in its most recent EHLO reply.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.client.is_encrypted()
    }

    #[must_use]
    pub const fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn advance(&mut self, event: Event) {
        self.state = self.state.transition(event, &mut self.context);
    }

    /// Closes the session if `result` leaves the connection unusable.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result
            && matches!(err.kind(), ErrorKind::Connection | ErrorKind::Security)
        {
            internal!(level = WARN, "Closing session with {}: {err}", self.address);
            self.client.close();
            self.advance(Event::Failed);
        }
        result
    }

    async fn hello(&mut self) -> Result<()> {
        let limit = self.config.timeouts.ehlo();

        let reply = timed("EHLO", limit, self.client.ehlo(&self.config.helo_name)).await??;
        if reply.is_positive() {
            self.capabilities = Capabilities::from_ehlo(&reply);
            return Ok(());
        }

        if reply.is_permanent() {
            internal!(level = DEBUG, "EHLO refused, falling back to HELO");
            let reply = timed("HELO", limit, self.client.helo(&self.config.helo_name)).await??;
            if reply.is_positive() {
                self.capabilities = Capabilities::default();
                return Ok(());
            }
            return Err(SessionError::Connection(format!("HELO rejected: {reply}")));
        }

        Err(SessionError::Connection(format!("EHLO rejected: {reply}")))
    }

    /// Upgrades the connection with STARTTLS according to the TLS policy.
    ///
    /// With the `Opportunistic` policy nothing happens unless the relay
    /// advertises STARTTLS. Already encrypted sessions are left alone.
    ///
    /// # Errors
    ///
    /// [`SessionError::Security`] if the `Required` policy cannot be met or
    /// the relay refuses an issued STARTTLS, handshake failures, and
    /// [`SessionError::InvalidState`] outside the connected state.
    #[tracing::instrument(level = "debug", skip_all, fields(server = %self.address))]
    pub async fn negotiate_security(&mut self) -> Result<()> {
        let result = self.try_negotiate_security().await;
        self.settle(result)
    }

    async fn try_negotiate_security(&mut self) -> Result<()> {
        match self.state {
            State::Connected => {}
            State::SecurityNegotiated | State::Authenticated if self.client.is_encrypted() => {
                return Ok(());
            }
            state => {
                return Err(SessionError::InvalidState {
                    state,
                    operation: "negotiate security",
                });
            }
        }

        if self.config.tls.is_disabled() {
            internal!(level = DEBUG, "STARTTLS disabled by policy");
            return Ok(());
        }

        if !self.capabilities.starttls() {
            if self.config.tls.is_required() {
                return Err(SessionError::Security(format!(
                    "{} does not advertise STARTTLS",
                    self.address
                )));
            }
            internal!(
                level = INFO,
                "{} does not advertise STARTTLS, continuing without encryption",
                self.address
            );
            return Ok(());
        }

        let server_name = self
            .config
            .tls
            .server_name_for(self.address.host())
            .to_string();
        let reply = timed(
            "STARTTLS",
            self.config.timeouts.starttls(),
            self.client.starttls(&server_name, &self.config.tls),
        )
        .await??;

        // Once STARTTLS is issued the relay's state is unknown unless it
        // agreed, so a refusal is fatal under every policy.
        if reply.code != 220 {
            return Err(SessionError::Security(format!("STARTTLS rejected: {reply}")));
        }

        // Anything learned before the handshake is discarded.
        self.hello().await?;
        self.advance(Event::TlsEstablished);
        Ok(())
    }

    /// Authenticates with the configured credentials.
    ///
    /// Skipped when no credentials are configured or the relay does not
    /// advertise AUTH. PLAIN is preferred over LOGIN.
    ///
    /// # Errors
    ///
    /// [`SessionError::Auth`] if the relay rejects the credentials, offers
    /// no supported mechanism, or the connection is unencrypted and the
    /// relay is not on this machine.
    #[tracing::instrument(level = "debug", skip_all, fields(server = %self.address))]
    pub async fn authenticate(&mut self) -> Result<()> {
        let result = self.try_authenticate().await;
        self.settle(result)
    }

    async fn try_authenticate(&mut self) -> Result<()> {
        match self.state {
            State::Connected | State::SecurityNegotiated => {}
            State::Authenticated => return Ok(()),
            state => {
                return Err(SessionError::InvalidState {
                    state,
                    operation: "authenticate",
                });
            }
        }

        let Some(credentials) = self.config.credentials.clone() else {
            internal!(level = DEBUG, "No credentials configured, skipping AUTH");
            return Ok(());
        };

        if self.capabilities.auth_mechanisms().is_empty() {
            internal!(
                level = INFO,
                "{} does not advertise AUTH, continuing unauthenticated",
                self.address
            );
            return Ok(());
        }

        if !may_send_credentials(self.client.is_encrypted(), &self.address) {
            return Err(SessionError::Auth(format!(
                "Refusing to send credentials to {} over an unencrypted connection",
                self.address
            )));
        }

        let mechanism = Mechanism::select(&self.capabilities).ok_or_else(|| {
            SessionError::Auth(format!(
                "No supported mechanism among {}",
                self.capabilities.auth_mechanisms().join(", ")
            ))
        })?;

        internal!(level = DEBUG, "Authenticating as {} with {mechanism}", credentials.username());
        timed(
            "AUTH",
            self.config.timeouts.auth(),
            auth::authenticate(&mut self.client, mechanism, &credentials),
        )
        .await??;

        self.advance(Event::Authenticated);
        Ok(())
    }

    /// Runs one complete transaction for `message`.
    ///
    /// The envelope is built before `MAIL FROM`, so a message that cannot be
    /// serialised never opens a transaction. A rejection at any step resets
    /// the transaction; no recipient is retried.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless the session is ready,
    /// [`SessionError::Envelope`] if serialisation fails,
    /// [`SessionError::Validation`] if the envelope exceeds the relay's SIZE
    /// limit, and [`SessionError::Transaction`] if the relay rejects it.
    #[tracing::instrument(level = "info", skip_all, fields(server = %self.address))]
    pub async fn send(&mut self, message: &Message) -> Result<Receipt> {
        if !self.state.is_ready() {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "send",
            });
        }

        let envelope = self.envelopes.build(message)?;

        if let Some(limit) = self.capabilities.size()
            && limit > 0
            && envelope.len() > limit
        {
            return Err(SessionError::Validation(format!(
                "Message is {} bytes, {} accepts at most {limit}",
                envelope.len(),
                self.address
            )));
        }

        let result = self.transaction(message, &envelope).await;
        self.settle(result)
    }

    async fn transaction(&mut self, message: &Message, envelope: &Envelope) -> Result<Receipt> {
        let timeouts = self.config.timeouts.clone();
        // SIZE counts the message as composed, not the dot-stuffed stream.
        let size = self.capabilities.size().map(|_| envelope.len());

        let reply = timed(
            "MAIL FROM",
            timeouts.mail_from(),
            self.client.mail_from(&message.from().address, size),
        )
        .await??;
        if !reply.is_positive() {
            return self.abort(Stage::MailFrom, &reply).await;
        }
        self.advance(Event::MailAccepted);

        let mut recipients = Vec::new();
        for recipient in self.config.recipients.select(message) {
            let reply = timed("RCPT TO", timeouts.rcpt_to(), self.client.rcpt_to(recipient)).await??;
            if !reply.is_positive() {
                return self.abort(Stage::RcptTo, &reply).await;
            }
            recipients.push(recipient.to_string());
        }

        let reply = timed("DATA", timeouts.data(), self.client.data()).await??;
        if reply.code != 354 {
            return self.abort(Stage::Data, &reply).await;
        }

        let reply = timed("DATA", timeouts.data(), self.client.send_data(envelope.as_bytes())).await??;

        // The final reply ends the transaction either way.
        self.advance(Event::TransactionEnded);
        if !reply.is_positive() {
            return Err(SessionError::Transaction {
                stage: Stage::DataEnd,
                code: reply.code,
                message: reply.text(),
            });
        }

        internal!(
            level = INFO,
            "{} accepted {} for {} recipient(s)",
            self.address,
            envelope.message_id(),
            recipients.len()
        );

        Ok(Receipt {
            message_id: envelope.message_id().to_string(),
            recipients,
            reply: reply.text(),
        })
    }

    /// Best-effort `RSET` after a rejection, bounded by the quit timeout.
    /// The session survives only if the relay acknowledges it.
    async fn abort<T>(&mut self, stage: Stage, reply: &Reply) -> Result<T> {
        let error = SessionError::Transaction {
            stage,
            code: reply.code,
            message: reply.text(),
        };

        match timed("RSET", self.config.timeouts.quit(), self.client.rset()).await {
            Ok(Ok(reset)) if reset.is_positive() => {
                if self.state == State::TransactionOpen {
                    self.advance(Event::TransactionEnded);
                }
            }
            _ => {
                internal!(level = WARN, "RSET failed after {stage} rejection, closing session");
                self.client.close();
                self.advance(Event::Failed);
            }
        }

        Err(error)
    }

    /// Says QUIT and closes the connection. Failures are logged, never
    /// returned.
    #[tracing::instrument(level = "debug", skip_all, fields(server = %self.address))]
    pub async fn quit(&mut self) {
        if self.state == State::Closed {
            return;
        }

        let limit = self.config.timeouts.quit();
        match timed("QUIT", limit, self.client.quit()).await {
            Ok(Ok(reply)) => internal!(level = DEBUG, "QUIT answered with {reply}"),
            Ok(Err(err)) => internal!(level = WARN, "QUIT failed: {err}"),
            Err(err) => internal!(level = WARN, "{err}"),
        }

        self.client.close();
        self.advance(Event::Quit);
    }
}

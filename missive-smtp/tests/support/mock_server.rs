//! Scriptable mock relay for session tests.
//!
//! Every connection is served the same script. Commands are recorded in the
//! order received, and the raw (still dot-stuffed) data phase is kept so
//! tests can inspect exactly what went over the wire.
//!
//! A relay built [`with_starttls`](MockRelayBuilder::with_starttls) or
//! [`with_implicit_tls`](MockRelayBuilder::with_implicit_tls) encrypts with a
//! freshly generated self-signed certificate for `localhost`.
//!
//! ```rust,ignore
//! let server = MockRelay::builder()
//!     .with_rcpt_to_rejection("nobody@y.com", 550, "No such user")
//!     .build()
//!     .await?;
//! ```
#![allow(dead_code)]

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// The connection as served: plain TCP, or TLS after a handshake.
type Stream = BufReader<Box<dyn Io>>;

/// How the relay offers encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    /// Advertise STARTTLS and upgrade on request.
    StartTls,
    /// Handshake before the greeting.
    Implicit,
}

/// A self-signed acceptor for `localhost`.
fn acceptor() -> std::io::Result<TlsAcceptor> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(std::io::Error::other)?;

    let chain = vec![CertificateDer::from(cert.der().to_vec())];
    let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(std::io::Error::other)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// A command as the relay saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ehlo(String),
    Helo(String),
    StartTls,
    /// The mechanism and anything following it on the AUTH line.
    Auth(String),
    /// A continuation line sent during AUTH LOGIN.
    AuthResponse(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Everything between `354` and the terminating `.`, dot-stuffing intact.
    Content(Vec<u8>),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub code: u16,
    pub message: String,
}

impl Response {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct Script {
    greeting: Response,
    ehlo_code: u16,
    capabilities: Vec<String>,
    helo: Response,
    starttls: Response,
    auth: Response,
    mail_from: Response,
    rcpt_to: Response,
    rcpt_rejections: HashMap<String, Response>,
    data: Response,
    data_end: Response,
    rset: Response,
    quit: Response,
    response_delay: Option<Duration>,
    hang_on_command: Option<usize>,
    tls: Option<TlsMode>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Response::new(220, "mock.relay ESMTP ready"),
            ehlo_code: 250,
            capabilities: vec!["SIZE 10000000".to_string(), "8BITMIME".to_string()],
            helo: Response::new(250, "mock.relay"),
            starttls: Response::new(454, "TLS not available"),
            auth: Response::new(235, "Authentication successful"),
            mail_from: Response::new(250, "OK"),
            rcpt_to: Response::new(250, "OK"),
            rcpt_rejections: HashMap::new(),
            data: Response::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Response::new(250, "OK: queued as MOCK1"),
            rset: Response::new(250, "Flushed"),
            quit: Response::new(221, "Bye"),
            response_delay: None,
            hang_on_command: None,
            tls: None,
        }
    }
}

impl Script {
    /// STARTTLS is added while the connection is plain if the relay
    /// upgrades, and never offered once encrypted.
    fn ehlo_reply(&self, encrypted: bool) -> Vec<u8> {
        if self.ehlo_code != 250 {
            return Response::new(self.ehlo_code, "EHLO not supported").to_bytes();
        }

        let mut lines = vec!["mock.relay greets you".to_string()];
        lines.extend(
            self.capabilities
                .iter()
                .filter(|capability| !(encrypted && capability.eq_ignore_ascii_case("STARTTLS")))
                .cloned(),
        );
        if self.tls == Some(TlsMode::StartTls)
            && !encrypted
            && !lines.iter().any(|line| line.eq_ignore_ascii_case("STARTTLS"))
        {
            lines.push("STARTTLS".to_string());
        }

        let mut reply = String::new();
        let last = lines.len() - 1;
        for (i, line) in lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(reply, "250{separator}{line}\r\n");
        }
        reply.into_bytes()
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<Command>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `127.0.0.1:<port>`, ready to hand to a mailer.
    #[must_use]
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub async fn commands(&self) -> Vec<Command> {
        self.commands.read().await.clone()
    }

    /// Recipients declared with `RCPT TO`, brackets removed.
    pub async fn recipients(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                Command::RcptTo(to) => Some(to.trim_start_matches('<').trim_end_matches('>').to_string()),
                _ => None,
            })
            .collect()
    }

    /// The raw data phase of the most recent transaction.
    pub async fn content(&self) -> Option<Vec<u8>> {
        self.commands()
            .await
            .into_iter()
            .rev()
            .find_map(|command| match command {
                Command::Content(content) => Some(content),
                _ => None,
            })
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[allow(clippy::too_many_lines)]
    async fn serve(
        mut stream: Stream,
        mut encrypted: bool,
        script: Arc<Script>,
        acceptor: Option<TlsAcceptor>,
        commands: Arc<RwLock<Vec<Command>>>,
    ) -> std::io::Result<()> {
        let mut line = Vec::new();
        let mut count = 0;

        stream.write_all(&script.greeting.to_bytes()).await?;
        stream.flush().await?;

        loop {
            line.clear();

            if script.hang_on_command == Some(count) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            let Ok(read) = timeout(Duration::from_secs(10), stream.read_until(b'\n', &mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }
            count += 1;

            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            let (verb, argument) = text
                .split_once(' ')
                .map_or((text.as_str(), ""), |(verb, rest)| (verb, rest));
            let verb = verb.to_ascii_uppercase();

            let (command, reply) = match verb.as_str() {
                "EHLO" => (Command::Ehlo(argument.to_string()), script.ehlo_reply(encrypted)),
                "HELO" => (Command::Helo(argument.to_string()), script.helo.to_bytes()),
                "STARTTLS" if !encrypted && script.tls == Some(TlsMode::StartTls) => {
                    let Some(acceptor) = &acceptor else {
                        return Ok(());
                    };
                    commands.write().await.push(Command::StartTls);
                    stream.write_all(b"220 Ready to start TLS\r\n").await?;
                    stream.flush().await?;

                    // The client waits for 220 before the handshake, so
                    // nothing is left in the read buffer.
                    let plain = stream.into_inner();
                    let tls: Box<dyn Io> = Box::new(acceptor.accept(plain).await?);
                    stream = BufReader::new(tls);
                    encrypted = true;
                    continue;
                }
                "STARTTLS" => (Command::StartTls, script.starttls.to_bytes()),
                "AUTH" if argument.eq_ignore_ascii_case("LOGIN") => {
                    commands.write().await.push(Command::Auth(argument.to_string()));
                    stream.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                    stream.flush().await?;

                    for prompt in [&b"334 UGFzc3dvcmQ6\r\n"[..], &script.auth.to_bytes()[..]] {
                        line.clear();
                        if stream.read_until(b'\n', &mut line).await? == 0 {
                            return Ok(());
                        }
                        let response = String::from_utf8_lossy(&line).trim_end().to_string();
                        commands.write().await.push(Command::AuthResponse(response));
                        stream.write_all(prompt).await?;
                        stream.flush().await?;
                    }
                    continue;
                }
                "AUTH" => (Command::Auth(argument.to_string()), script.auth.to_bytes()),
                "MAIL" => (
                    Command::MailFrom(argument.trim_start_matches("FROM:").to_string()),
                    script.mail_from.to_bytes(),
                ),
                "RCPT" => {
                    let to = argument.trim_start_matches("TO:").to_string();
                    let address = to.trim_start_matches('<').trim_end_matches('>');
                    let reply = script
                        .rcpt_rejections
                        .get(address)
                        .unwrap_or(&script.rcpt_to)
                        .to_bytes();
                    (Command::RcptTo(to), reply)
                }
                "DATA" => (Command::Data, script.data.to_bytes()),
                "RSET" => (Command::Rset, script.rset.to_bytes()),
                "QUIT" => {
                    commands.write().await.push(Command::Quit);
                    stream.write_all(&script.quit.to_bytes()).await?;
                    stream.flush().await?;
                    return Ok(());
                }
                _ => (
                    Command::Other(text.clone()),
                    Response::new(500, "Unknown command").to_bytes(),
                ),
            };

            commands.write().await.push(command.clone());

            if let Some(delay) = script.response_delay {
                tokio::time::sleep(delay).await;
            }
            stream.write_all(&reply).await?;
            stream.flush().await?;

            if command == Command::Data && script.data.code == 354 {
                let mut content = Vec::new();
                loop {
                    line.clear();
                    if stream.read_until(b'\n', &mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == b".\r\n" {
                        break;
                    }
                    content.extend_from_slice(&line);
                }

                commands.write().await.push(Command::Content(content));
                stream.write_all(&script.data_end.to_bytes()).await?;
                stream.flush().await?;
            }
        }
    }
}

pub struct MockRelayBuilder {
    script: Script,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Response::new(code, message);
        self
    }

    /// Extension lines advertised after the EHLO greeting line.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Answer EHLO with `code` instead of the capability list.
    #[must_use]
    pub fn with_ehlo_code(mut self, code: u16) -> Self {
        self.script.ehlo_code = code;
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.starttls = Response::new(code, message);
        self
    }

    /// The final AUTH verdict, for either mechanism.
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.auth = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_rejection(
        mut self,
        address: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.script
            .rcpt_rejections
            .insert(address.into(), Response::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rset_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.rset = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.script.response_delay = Some(delay);
        self
    }

    /// Stop answering before the Nth command (0-indexed).
    #[must_use]
    pub fn with_hang_on_command(mut self, index: usize) -> Self {
        self.script.hang_on_command = Some(index);
        self
    }

    /// Advertise STARTTLS and upgrade when asked.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.script.tls = Some(TlsMode::StartTls);
        self
    }

    /// Handshake on accept, before the greeting.
    #[must_use]
    pub fn with_implicit_tls(mut self) -> Self {
        self.script.tls = Some(TlsMode::Implicit);
        self
    }

    /// Binds `127.0.0.1:0` and starts serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn build(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let acceptor = self.script.tls.map(|_| acceptor()).transpose()?;
        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            let shutdown = Arc::clone(&shutdown);

            tokio::spawn(async move {
                while !shutdown.load(Ordering::Relaxed) {
                    let Ok(Ok((stream, _peer))) =
                        timeout(Duration::from_millis(100), listener.accept()).await
                    else {
                        continue;
                    };

                    connections.fetch_add(1, Ordering::Relaxed);
                    let script = Arc::clone(&script);
                    let acceptor = acceptor.clone();
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        let (stream, encrypted): (Box<dyn Io>, bool) =
                            match (script.tls, &acceptor) {
                                (Some(TlsMode::Implicit), Some(acceptor)) => {
                                    let Ok(tls) = acceptor.accept(stream).await else {
                                        return;
                                    };
                                    (Box::new(tls), true)
                                }
                                _ => (Box::new(stream), false),
                            };
                        let _ = MockRelay::serve(
                            BufReader::new(stream),
                            encrypted,
                            script,
                            acceptor,
                            commands,
                        )
                        .await;
                    });
                }
            });
        }

        Ok(MockRelay {
            addr,
            commands,
            connections,
            shutdown,
        })
    }
}

//! The relay connection: plain TCP or TLS, with command/reply framing.

use core::fmt;
use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use missive_common::{config::TlsConfig, incoming, outgoing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    reply::Reply,
};

/// Initial size of the reply buffer.
const BUFFER_SIZE: usize = 4096;

/// Upper bound on a single reply, so a misbehaving relay cannot exhaust memory.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum Connection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade(self, server_name: &str, tls: &TlsConfig) -> Result<Self> {
        match self {
            Self::Plain(stream) => Ok(Self::Tls(Box::new(handshake(stream, server_name, tls).await?))),
            Self::Tls(_) => Err(ClientError::Tls("Connection is already TLS".to_string())),
        }
    }
}

async fn handshake(
    stream: TcpStream,
    server_name: &str,
    tls: &TlsConfig,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = connector(tls)?;
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| ClientError::Tls(format!("Invalid server name {server_name}: {e}")))?;

    connector
        .connect(name, stream)
        .await
        .map_err(|e| ClientError::Tls(e.to_string()))
}

fn connector(tls: &TlsConfig) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        roots
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("Failed to add certificate: {e}")))?;
    }
    if !native.errors.is_empty() {
        tracing::warn!(?native.errors, "Some platform certificates could not be loaded");
    }

    if let Some(path) = &tls.ca_certificate {
        for cert in load_pem(path)? {
            roots
                .add(cert)
                .map_err(|e| ClientError::Tls(format!("Invalid certificate in {}: {e}", path.display())))?;
        }
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if tls.accept_invalid_certs {
        tracing::warn!("TLS certificate validation is disabled for this connection");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

fn load_pem(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        ClientError::Tls(format!("Unable to open certificate {}: {e}", path.display()))
    })?;

    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Tls(format!("Unable to parse certificate {}: {e}", path.display())))
}

/// Accepts any certificate. Only installed when `accept_invalid_certs` is set.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Doubles every `.` that starts a line and terminates the payload with
/// `CRLF.CRLF`, adding the final CRLF if the payload lacks one.
#[must_use]
pub fn dot_stuff(payload: &[u8]) -> Vec<u8> {
    let mut stuffed = Vec::with_capacity(payload.len() + payload.len() / 64 + 5);
    let mut line_start = true;

    for &byte in payload {
        if line_start && byte == b'.' {
            stuffed.push(b'.');
        }
        stuffed.push(byte);
        line_start = byte == b'\n';
    }

    if !stuffed.is_empty() && !stuffed.ends_with(b"\r\n") {
        stuffed.extend_from_slice(b"\r\n");
    }
    stuffed.extend_from_slice(b".\r\n");

    stuffed
}

/// Sends commands to a relay and reads its replies.
///
/// One command is outstanding at a time; there is no pipelining.
pub struct Client {
    connection: Option<Connection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl fmt::Debug for Client {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Client")
            .field("open", &self.connection.is_some())
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Opens a plain TCP connection. The greeting is left unread.
    ///
    /// # Errors
    ///
    /// [`ClientError::Io`] if the connection cannot be established.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::from_connection(Connection::Plain(stream)))
    }

    /// Opens a connection that is encrypted from the first byte.
    ///
    /// # Errors
    ///
    /// [`ClientError::Io`] if the TCP connection fails, [`ClientError::Tls`]
    /// if the handshake does.
    pub async fn connect_tls(host: &str, port: u16, tls: &TlsConfig) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let stream = handshake(stream, tls.server_name_for(host), tls).await?;
        Ok(Self::from_connection(Connection::Tls(Box::new(stream))))
    }

    fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0; BUFFER_SIZE],
            buffer_pos: 0,
        }
    }

    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self.connection, Some(Connection::Tls(_)))
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    /// Reads the next reply, typically the `220` greeting.
    ///
    /// # Errors
    ///
    /// Fails if the relay closes the connection or sends a malformed reply.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{reply}");
                return Ok(reply);
            }

            if self.buffer_pos >= self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "Reply too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let pos = self.buffer_pos;
            let n = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .read(&mut self.buffer[pos..])
                .await?;
            self.buffer_pos += n;
        }
    }

    /// Sends `command` followed by CRLF and reads the reply.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies. A negative reply is not an
    /// error at this level.
    pub async fn command(&mut self, command: &str) -> Result<Reply> {
        outgoing!("{command}");
        self.write_line(command).await?;
        self.read_reply().await
    }

    /// Like [`command`](Self::command), but logs `shown` in place of the
    /// real line. Used for anything carrying credentials.
    ///
    /// # Errors
    ///
    /// See [`command`](Self::command).
    pub async fn secret_command(&mut self, command: &str, shown: &str) -> Result<Reply> {
        outgoing!("{shown}");
        self.write_line(command).await?;
        self.read_reply().await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.connection()?.send(&data).await
    }

    /// `EHLO name`.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn ehlo(&mut self, name: &str) -> Result<Reply> {
        self.command(&format!("EHLO {name}")).await
    }

    /// `HELO name`, for relays that reject EHLO.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn helo(&mut self, name: &str) -> Result<Reply> {
        self.command(&format!("HELO {name}")).await
    }

    /// `MAIL FROM:<from>`, with `SIZE=` when a size is declared.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn mail_from(&mut self, from: &str, size: Option<usize>) -> Result<Reply> {
        match size {
            Some(size) => self.command(&format!("MAIL FROM:<{from}> SIZE={size}")).await,
            None => self.command(&format!("MAIL FROM:<{from}>")).await,
        }
    }

    /// `RCPT TO:<to>`.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Reply> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// `DATA`; a relay ready for the payload answers `354`.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn data(&mut self) -> Result<Reply> {
        self.command("DATA").await
    }

    /// Streams the payload after a `354`, dot-stuffed and terminated, and
    /// reads the relay's verdict.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn send_data(&mut self, payload: &[u8]) -> Result<Reply> {
        outgoing!(level = DEBUG, "<{} bytes of message data>", payload.len());
        let stuffed = dot_stuff(payload);
        self.connection()?.send(&stuffed).await?;
        self.read_reply().await
    }

    /// `RSET`, abandoning the current transaction.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn rset(&mut self) -> Result<Reply> {
        self.command("RSET").await
    }

    /// `QUIT`. The connection stays open until [`close`](Self::close) or drop.
    ///
    /// # Errors
    ///
    /// Transport failures and malformed replies.
    pub async fn quit(&mut self) -> Result<Reply> {
        self.command("QUIT").await
    }

    /// Issues STARTTLS and, on a `220`, performs the handshake over the
    /// existing connection. Any other reply is returned without upgrading.
    ///
    /// # Errors
    ///
    /// [`ClientError::Tls`] if the handshake fails; the connection is
    /// unusable afterwards.
    pub async fn starttls(&mut self, server_name: &str, tls: &TlsConfig) -> Result<Reply> {
        let reply = self.command("STARTTLS").await?;
        if reply.code != 220 {
            return Ok(reply);
        }

        // Anything buffered before the handshake was sent in the clear.
        self.buffer_pos = 0;

        let connection = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
        self.connection = Some(connection.upgrade(server_name, tls).await?);

        Ok(reply)
    }

    /// Drops the connection without saying goodbye.
    pub fn close(&mut self) {
        self.connection = None;
        self.buffer_pos = 0;
    }
}

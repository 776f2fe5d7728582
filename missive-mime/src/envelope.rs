use core::fmt::Write;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    attachment::AttachmentResolver,
    encoding,
    error::Result,
    message::Message,
};

/// Host name used in message ids when the local one cannot be determined.
const FALLBACK_HOSTNAME: &str = "localdomain";

const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// The structural layout chosen for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Text bodies followed by one part per attachment.
    Mixed,
    /// A plain-text and an HTML rendition of the same content.
    Alternative,
    Html,
    /// Also used when the message has no body at all.
    Plain,
}

impl Shape {
    /// Classifies `message` by content.
    #[must_use]
    pub fn of(message: &Message) -> Self {
        if !message.attachments().is_empty() {
            Self::Mixed
        } else if message.text().is_some() && message.html().is_some() {
            Self::Alternative
        } else if message.html().is_some() {
            Self::Html
        } else {
            Self::Plain
        }
    }

    #[must_use]
    pub const fn is_multipart(self) -> bool {
        matches!(self, Self::Mixed | Self::Alternative)
    }

    const fn content_type(self) -> &'static str {
        match self {
            Self::Mixed => "multipart/mixed",
            Self::Alternative => "multipart/alternative",
            Self::Html => "text/html; charset=UTF-8",
            Self::Plain => "text/plain; charset=UTF-8",
        }
    }
}

/// The serialised form of a [`Message`], ready for the data phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Vec<u8>,
    message_id: String,
    boundary: Option<String>,
    shape: Shape,
}

impl Envelope {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The `Message-Id` header value, angle brackets included.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The multipart delimiter, or `None` for single-part envelopes.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }
}

/// Serialises messages into envelopes.
///
/// Every call to [`build`](Self::build) draws a fresh boundary, so builders
/// can be shared between sessions freely.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    hostname: String,
    resolver: AttachmentResolver,
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeBuilder {
    /// A builder using the local host name for message ids.
    #[must_use]
    pub fn new() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string());

        Self::with_hostname(hostname)
    }

    #[must_use]
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            resolver: AttachmentResolver,
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Serialises `message`.
    ///
    /// All attachments are resolved before anything is written, so a missing
    /// or unreadable file fails the build without producing partial output.
    ///
    /// # Errors
    ///
    /// Propagates attachment resolution failures.
    #[tracing::instrument(level = "debug", skip_all, fields(subject = message.subject()))]
    pub fn build(&self, message: &Message) -> Result<Envelope> {
        let attachments = message
            .attachments()
            .iter()
            .map(|attachment| Ok((attachment, self.resolver.resolve(attachment)?)))
            .collect::<Result<Vec<_>>>()?;

        let shape = Shape::of(message);
        let boundary = shape.is_multipart().then(generate_boundary);
        let message_id = self.message_id();

        let mut out = String::new();
        write!(out, "Message-Id: {message_id}\r\n")?;
        out.push_str("Mime-Version: 1.0\r\n");
        write!(
            out,
            "Date: {}\r\n",
            chrono::Local::now().format(DATE_FORMAT)
        )?;
        write!(out, "From: {}\r\n", message.from())?;
        write!(out, "To: {}\r\n", message.to().join(", "))?;
        if !message.cc().is_empty() {
            write!(out, "CC: {}\r\n", message.cc().join(", "))?;
        }

        match &boundary {
            Some(boundary) => write!(
                out,
                "Content-Type: {};\r\n boundary=\"{boundary}\"\r\n",
                shape.content_type()
            )?,
            None => {
                write!(out, "Content-Type: {}\r\n", shape.content_type())?;
                out.push_str("Content-Transfer-Encoding: quoted-printable\r\n");
            }
        }
        write!(out, "Subject: {}\r\n", message.subject())?;
        out.push_str("\r\n");

        let Some(boundary) = &boundary else {
            let body = message.html().or(message.text()).unwrap_or_default();
            let encoded = encoding::quoted_printable(body);
            out.push_str(&encoded);
            if !encoded.is_empty() && !encoded.ends_with("\r\n") {
                out.push_str("\r\n");
            }

            return Ok(Envelope {
                bytes: out.into_bytes(),
                message_id,
                boundary: None,
                shape,
            });
        };

        for (content_type, body) in [("text/plain", message.text()), ("text/html", message.html())] {
            if let Some(body) = body {
                write!(out, "--{boundary}\r\n")?;
                write!(out, "Content-Type: {content_type}; charset=UTF-8\r\n")?;
                out.push_str("Content-Transfer-Encoding: quoted-printable\r\n\r\n");
                out.push_str(&encoding::quoted_printable(body));
                out.push_str("\r\n");
            }
        }

        for (attachment, content) in attachments {
            let name = quote(attachment.file_name());
            write!(out, "--{boundary}\r\n")?;
            write!(out, "Content-Disposition: attachment;\r\n filename=\"{name}\"\r\n")?;
            write!(out, "Content-Id: <{}>\r\n", attachment.file_name())?;
            out.push_str("Content-Transfer-Encoding: base64\r\n");
            write!(out, "Content-Type: {}\r\n\r\n", attachment.content_type())?;
            out.push_str(&encoding::base64_wrapped(content));
            out.push_str("\r\n");
        }

        write!(out, "--{boundary}--\r\n")?;

        tracing::debug!(size = out.len(), ?shape, "Built envelope");

        Ok(Envelope {
            bytes: out.into_bytes(),
            message_id,
            boundary: Some(boundary.clone()),
            shape,
        })
    }

    fn message_id(&self) -> String {
        format!(
            "<{}.{}@{}>",
            std::process::id(),
            unique_timestamp(),
            self.hostname
        )
    }
}

/// A fresh multipart delimiter. The `missive-` prefix and 128 random bits make
/// a collision with body content practically impossible.
fn generate_boundary() -> String {
    format!("missive-{:032x}", rand::random::<u128>())
}

/// Nanoseconds since the epoch, bumped so that no two calls in this process
/// return the same value.
fn unique_timestamp() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default();

    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

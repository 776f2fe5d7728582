//! The logical message: what is sent, independent of how it is encoded.

use core::fmt::{self, Display};
use std::path::Path;

use crate::{
    attachment::Attachment,
    error::{MimeError, Result},
};

/// Subject used when none (or an empty one) was set.
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// A sender: display name plus address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl Mailbox {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl Display for Mailbox {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            return fmt.write_str(&self.address);
        }

        if self.name.chars().any(|c| "()<>[]:;@\\,.\"".contains(c)) {
            let escaped = self.name.replace('\\', "\\\\").replace('"', "\\\"");
            write!(fmt, "\"{escaped}\" <{}>", self.address)
        } else {
            write!(fmt, "{} <{}>", self.name, self.address)
        }
    }
}

/// Mutable, reusable accumulator for a [`Message`].
///
/// Setters take `&mut self` so one builder can be refilled and
/// [`reset`](Self::reset) between sends. Nothing is validated until
/// [`build`](Self::build), except file attachments which are checked as
/// they are added.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    subject: String,
    from: Option<Mailbox>,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_from(&mut self, name: impl Into<String>, address: impl Into<String>) -> &mut Self {
        self.from = Some(Mailbox::new(name, address));
        self
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    pub fn add_to<I, S>(&mut self, addresses: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn add_cc(&mut self, address: impl Into<String>) -> &mut Self {
        self.cc.push(address.into());
        self
    }

    pub fn add_bcc(&mut self, address: impl Into<String>) -> &mut Self {
        self.bcc.push(address.into());
        self
    }

    /// An empty string clears the plain-text body.
    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into()).filter(|text| !text.is_empty());
        self
    }

    /// An empty string clears the HTML body.
    pub fn set_html(&mut self, html: impl Into<String>) -> &mut Self {
        self.html = Some(html.into()).filter(|html| !html.is_empty());
        self
    }

    pub fn add_attachment(&mut self, attachment: Attachment) -> &mut Self {
        self.attachments.push(attachment);
        self
    }

    /// Attaches a file from disk. Its bytes are read when the envelope is
    /// built, not here.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not exist or is a directory; the builder is left
    /// unchanged.
    pub fn attach_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let attachment = Attachment::from_path(path)?;
        self.attachments.push(attachment);
        Ok(self)
    }

    /// Returns the builder to its empty state.
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    /// Freezes the current contents into a validated [`Message`].
    ///
    /// # Errors
    ///
    /// [`MimeError::Validation`] if the sender is missing, there is no
    /// primary recipient, an address is malformed, or a header value
    /// (attachment names and content types included) contains a line break.
    pub fn build(&self) -> Result<Message> {
        let from = self
            .from
            .clone()
            .filter(|from| !from.address.is_empty())
            .ok_or_else(|| MimeError::Validation("Must specify the From address".to_string()))?;

        if self.to.is_empty() {
            return Err(MimeError::Validation(
                "Must specify at least one To address".to_string(),
            ));
        }

        validate_address("From", &from.address)?;
        validate_header_value("From name", &from.name)?;
        for (field, addresses) in [("To", &self.to), ("CC", &self.cc), ("BCC", &self.bcc)] {
            for address in addresses {
                validate_address(field, address)?;
            }
        }
        validate_header_value("Subject", &self.subject)?;
        for attachment in &self.attachments {
            validate_attachment(attachment)?;
        }

        let subject = if self.subject.is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            self.subject.clone()
        };

        Ok(Message {
            subject,
            from,
            to: self.to.clone(),
            cc: self.cc.clone(),
            bcc: self.bcc.clone(),
            text: self.text.clone(),
            html: self.html.clone(),
            attachments: self.attachments.clone(),
        })
    }
}

impl TryFrom<&MessageBuilder> for Message {
    type Error = MimeError;

    fn try_from(builder: &MessageBuilder) -> Result<Self> {
        builder.build()
    }
}

fn validate_header_value(field: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(MimeError::Validation(format!(
            "{field} must not contain line breaks"
        )));
    }
    Ok(())
}

/// The name lands in a quoted `filename` parameter and in `Content-Id`.
fn validate_attachment(attachment: &Attachment) -> Result<()> {
    validate_header_value("Attachment name", attachment.file_name())?;
    validate_header_value("Attachment content type", attachment.content_type())?;

    if attachment.file_name().contains(['"', '<', '>']) {
        return Err(MimeError::Validation(format!(
            "Attachment name {:?} contains invalid characters",
            attachment.file_name()
        )));
    }
    Ok(())
}

fn validate_address(field: &str, address: &str) -> Result<()> {
    if address.is_empty() {
        return Err(MimeError::Validation(format!("{field} address is empty")));
    }

    if address
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
    {
        return Err(MimeError::Validation(format!(
            "{field} address {address:?} contains invalid characters"
        )));
    }

    Ok(())
}

/// A validated, immutable message snapshot.
///
/// Only [`MessageBuilder::build`] creates one, so a `Message` always has a
/// sender, at least one primary recipient and a non-empty subject.
#[derive(Debug, Clone)]
pub struct Message {
    subject: String,
    from: Mailbox,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl Message {
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub const fn from(&self) -> &Mailbox {
        &self.from
    }

    #[must_use]
    pub fn to(&self) -> &[String] {
        &self.to
    }

    #[must_use]
    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    #[must_use]
    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    #[must_use]
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

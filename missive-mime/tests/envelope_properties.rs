#![allow(clippy::unwrap_used)]

use std::fs;

use base64::Engine;
use missive_mime::{
    Attachment, EnvelopeBuilder, MessageBuilder, MimeError, Shape, encoding,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn builder() -> EnvelopeBuilder {
    EnvelopeBuilder::with_hostname("client.example")
}

fn text_of(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap()
}

/// Splits a multipart body into its parts, each as (headers, content).
fn parts<'a>(envelope: &'a str, boundary: &str) -> Vec<(&'a str, &'a str)> {
    let body = envelope.split_once("\r\n\r\n").unwrap().1;
    let closing = format!("--{boundary}--\r\n");
    let body = body.strip_suffix(closing.as_str()).unwrap();

    // The CRLF before each delimiter belongs to the delimiter.
    body.split(&format!("--{boundary}\r\n"))
        .filter(|part| !part.is_empty())
        .map(|part| {
            let part = part.strip_suffix("\r\n").unwrap();
            part.split_once("\r\n\r\n").unwrap()
        })
        .collect()
}

#[test]
fn plain_text_message_is_single_part() {
    let message = MessageBuilder::new()
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .set_text("hi")
        .build()
        .unwrap();

    let envelope = builder().build(&message).unwrap();
    let text = text_of(envelope.as_bytes());

    assert_eq!(envelope.shape(), Shape::Plain);
    assert!(envelope.boundary().is_none());
    assert!(text.contains("Content-Type: text/plain; charset=UTF-8\r\n"));
    assert!(text.contains("\r\nTo: b@y.com\r\n"));
    assert!(!text.contains("\r\n--"));
    assert_eq!(text.split_once("\r\n\r\n").unwrap().1, "hi\r\n");
}

#[test]
fn text_and_html_make_an_alternative() {
    let message = MessageBuilder::new()
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .set_text("hello")
        .set_html("<p>hello</p>")
        .build()
        .unwrap();

    let envelope = builder().build(&message).unwrap();
    let boundary = envelope.boundary().unwrap();
    let text = text_of(envelope.as_bytes());

    assert_eq!(envelope.shape(), Shape::Alternative);
    assert!(text.contains(&format!(
        "Content-Type: multipart/alternative;\r\n boundary=\"{boundary}\"\r\n"
    )));

    let parts = parts(text, boundary);
    assert_eq!(parts.len(), 2);
    assert!(parts[0].0.starts_with("Content-Type: text/plain"));
    assert_eq!(parts[0].1, "hello");
    assert!(parts[1].0.starts_with("Content-Type: text/html"));
    assert_eq!(parts[1].1, "<p>hello</p>");
}

#[test]
fn html_with_attachment_is_mixed() {
    let message = MessageBuilder::new()
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .set_html("<b>hi</b>")
        .add_attachment(Attachment::from_bytes("f.txt", "text/plain", b"AB".to_vec()))
        .build()
        .unwrap();

    let envelope = builder().build(&message).unwrap();
    let boundary = envelope.boundary().unwrap();
    let text = text_of(envelope.as_bytes());

    assert_eq!(envelope.shape(), Shape::Mixed);
    assert!(text.contains("Content-Type: multipart/mixed;\r\n"));

    let parts = parts(text, boundary);
    assert_eq!(parts.len(), 2);

    let (headers, content) = parts[1];
    assert_eq!(
        headers,
        "Content-Disposition: attachment;\r\n filename=\"f.txt\"\r\n\
         Content-Id: <f.txt>\r\n\
         Content-Transfer-Encoding: base64\r\n\
         Content-Type: text/plain"
    );
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(content)
        .unwrap();
    assert_eq!(decoded, b"AB");
}

#[test]
fn multipart_body_is_closed() {
    let message = MessageBuilder::new()
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .set_text("a")
        .set_html("b")
        .build()
        .unwrap();

    let envelope = builder().build(&message).unwrap();
    let closing = format!("--{}--\r\n", envelope.boundary().unwrap());
    assert!(text_of(envelope.as_bytes()).ends_with(&closing));
}

#[test]
fn every_build_draws_a_fresh_boundary() {
    let message = MessageBuilder::new()
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .set_text("a")
        .set_html("b")
        .build()
        .unwrap();

    let first = builder().build(&message).unwrap();
    let second = builder().build(&message).unwrap();
    assert_ne!(first.boundary(), second.boundary());
    assert_ne!(first.message_id(), second.message_id());
}

#[test]
fn unreadable_attachment_produces_no_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.pdf");
    fs::write(&path, b"%PDF").unwrap();

    let mut builder_ = MessageBuilder::new();
    builder_
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .attach_file(&path)
        .unwrap();
    let message = builder_.build().unwrap();

    fs::remove_file(&path).unwrap();
    let err = builder().build(&message).unwrap_err();
    assert!(matches!(err, MimeError::NotFound(_)));
}

#[test]
fn file_attachment_content_type_is_inferred() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.pdf");
    fs::write(&path, b"%PDF-1.7").unwrap();

    let mut builder_ = MessageBuilder::new();
    builder_
        .set_from("", "a@x.com")
        .add_to(["b@y.com"])
        .attach_file(&path)
        .unwrap();
    let message = builder_.build().unwrap();

    let envelope = builder().build(&message).unwrap();
    let text = text_of(envelope.as_bytes());
    assert!(text.contains("Content-Type: application/pdf\r\n"));
    assert!(text.contains("Content-Id: <report.pdf>\r\n"));
    assert_eq!(message.attachments()[0].content(), Some(&b"%PDF-1.7"[..]));
}

proptest! {
    #[test]
    fn attachment_bytes_survive_base64(content in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let message = MessageBuilder::new()
            .set_from("", "a@x.com")
            .add_to(["b@y.com"])
            .add_attachment(Attachment::from_bytes("blob.bin", "application/octet-stream", content.clone()))
            .build()
            .unwrap();

        let envelope = builder().build(&message).unwrap();
        let parts = parts(text_of(envelope.as_bytes()), envelope.boundary().unwrap());
        prop_assert_eq!(parts.len(), 1);

        let encoded = parts[0].1;
        prop_assert!(encoded.split("\r\n").all(|line| line.len() <= encoding::MAX_LINE_LENGTH));

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.replace("\r\n", ""))
            .unwrap();
        prop_assert_eq!(decoded, content);
    }

    #[test]
    fn quoted_printable_is_reversible(text in "[ -~\u{e0}-\u{ff}\n]{0,300}") {
        let encoded = encoding::quoted_printable(&text);
        prop_assert!(encoded.is_ascii());
        prop_assert!(encoded.split("\r\n").all(|line| line.len() <= encoding::MAX_LINE_LENGTH));

        let decoded = quoted_printable::decode(encoded.as_bytes(), quoted_printable::ParseMode::Robust).unwrap();
        prop_assert_eq!(String::from_utf8(decoded).unwrap(), encoding::normalize_line_endings(&text));
    }
}

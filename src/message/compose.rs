/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Streaming MIME composition.
//!
//! A message is laid out as a `multipart/mixed` document:
//!
//! - an optional body part, which is a `multipart/alternative` part holding
//!   the plain text rendering followed by the HTML rendering when both are
//!   present (clients display the last alternative they support), or a single
//!   text part otherwise;
//! - one base64 encoded part per attachment, in insertion order.
//!
//! Everything except attachment content is rendered up front. Attachment
//! streams are opened only when the reader reaches their part and are closed
//! before the next one is opened. The stream holds its own handles to the
//! attachments, so it can be moved to another thread while the message
//! stays with the caller.

use std::{
    borrow::Cow,
    collections::VecDeque,
    io::{self, Read, Write},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use mail_builder::headers::{
    address::Address, content_type::ContentType, text::Text, Header,
};
use rand::RngCore;

use crate::{
    attachment::{Attachment, ContentStream},
    Error,
};

use super::{Mailbox, Message};

// Input bytes per base64 line (76 output characters).
const LINE_LEN: usize = 57;
const CHUNK_LEN: usize = LINE_LEN * 64;

/// MIME document produced lazily from a [`Message`].
pub struct MimeStream {
    boundary: String,
    parts: VecDeque<Part>,
    current: Option<OpenAttachment>,
    buf: Vec<u8>,
    pos: usize,
    failed: bool,
}

enum Part {
    Raw(Vec<u8>),
    Attachment(Attachment),
}

struct OpenAttachment {
    attachment: Attachment,
    stream: ContentStream,
    first_line: bool,
}

impl Message {
    /// Returns a reader over the MIME representation of this message.
    pub fn compose(&self) -> crate::Result<MimeStream> {
        MimeStream::new(self)
    }
}

impl MimeStream {
    pub fn new(message: &Message) -> crate::Result<Self> {
        let boundary = make_boundary();
        let mut parts = VecDeque::with_capacity(message.attachments.len() * 2 + 1);
        let mut raw = write_headers(message, &boundary)?;
        let mut has_parts = false;

        let has_text = !message.text_body.is_empty();
        let has_html = !message.html_body.is_empty();
        if has_text && has_html {
            let alternative = make_boundary();
            open_part(&mut raw, &boundary, &mut has_parts);
            write!(
                raw,
                "Content-Type: multipart/alternative; boundary=\"{alternative}\"\r\n\r\n"
            )?;
            write!(raw, "--{alternative}\r\n")?;
            write_text_part(&mut raw, "text/plain", &message.text_body);
            write!(raw, "\r\n--{alternative}\r\n")?;
            write_text_part(&mut raw, "text/html", &message.html_body);
            write!(raw, "\r\n--{alternative}--\r\n")?;
        } else if has_html {
            open_part(&mut raw, &boundary, &mut has_parts);
            write_text_part(&mut raw, "text/html", &message.html_body);
        } else if has_text {
            open_part(&mut raw, &boundary, &mut has_parts);
            write_text_part(&mut raw, "text/plain", &message.text_body);
        }

        for attachment in &message.attachments {
            open_part(&mut raw, &boundary, &mut has_parts);
            write_attachment_headers(&mut raw, attachment)?;
            parts.push_back(Part::Raw(std::mem::take(&mut raw)));
            parts.push_back(Part::Attachment(attachment.clone()));
        }

        if has_parts {
            raw.extend_from_slice(b"\r\n");
        }
        write!(raw, "--{boundary}--\r\n")?;
        parts.push_back(Part::Raw(raw));

        Ok(MimeStream {
            boundary,
            parts,
            current: None,
            buf: Vec::new(),
            pos: 0,
            failed: false,
        })
    }

    /// Boundary of the top-level `multipart/mixed` part.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    // Refills the buffer, returns false once the document is complete.
    fn fill(&mut self) -> crate::Result<bool> {
        self.buf.clear();
        self.pos = 0;

        if let Some(current) = &mut self.current {
            if current.next_chunk(&mut self.buf)? {
                return Ok(true);
            }
            log::trace!("Closing attachment {:?}", current.attachment.name());
            self.current = None;
        }

        match self.parts.pop_front() {
            Some(Part::Raw(bytes)) => {
                self.buf = bytes;
                Ok(true)
            }
            Some(Part::Attachment(attachment)) => {
                log::trace!("Opening attachment {:?}", attachment.name());
                self.current = Some(OpenAttachment {
                    stream: attachment.open_stream()?,
                    attachment,
                    first_line: true,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Read for MimeStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.buf.len() {
                let len = out.len().min(self.buf.len() - self.pos);
                out[..len].copy_from_slice(&self.buf[self.pos..self.pos + len]);
                self.pos += len;
                return Ok(len);
            }
            if self.failed {
                return Err(io::Error::other("message composition failed"));
            }
            match self.fill() {
                Ok(true) => (),
                Ok(false) => return Ok(0),
                Err(err) => {
                    self.failed = true;
                    self.current = None;
                    self.parts.clear();
                    return Err(err.into());
                }
            }
        }
    }
}

impl OpenAttachment {
    // Encodes the next chunk of content, returns false at end of stream.
    fn next_chunk(&mut self, buf: &mut Vec<u8>) -> crate::Result<bool> {
        let mut chunk = [0u8; CHUNK_LEN];
        let mut len = 0;
        while len < CHUNK_LEN {
            match self.stream.read(&mut chunk[len..]) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(error) => {
                    return Err(Error::ExternalRead {
                        locator: self.attachment.name().to_string(),
                        error,
                    })
                }
            }
        }
        if len == 0 {
            return Ok(false);
        }

        for line in chunk[..len].chunks(LINE_LEN) {
            if !self.first_line {
                buf.extend_from_slice(b"\r\n");
            }
            self.first_line = false;
            buf.extend_from_slice(STANDARD.encode(line).as_bytes());
        }
        Ok(true)
    }
}

fn make_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn write_headers(message: &Message, boundary: &str) -> io::Result<Vec<u8>> {
    let mut headers: Vec<(Cow<'_, str>, Vec<u8>)> = Vec::with_capacity(6);

    headers.push(("From".into(), render(&mailbox(&message.from))?));
    headers.push((
        "Return-Path".into(),
        format!("<{}>\r\n", message.from.address).into_bytes(),
    ));
    if !message.to.is_empty() {
        headers.push((
            "To".into(),
            render(&Address::new_list(
                message.to.iter().map(mailbox).collect::<Vec<_>>(),
            ))?,
        ));
    }
    headers.push((
        "Subject".into(),
        render(&Text::new(message.subject.as_str()))?,
    ));
    headers.push(("MIME-Version".into(), b"1.0\r\n".to_vec()));

    // Raw headers replace generated ones with the same name, compared
    // case-insensitively. Distinct raw keys are all written. The multipart
    // Content-Type is fixed by the document structure.
    let generated = headers.len();
    let mut overridden = vec![false; generated];
    for (name, value) in message.raw_headers.iter() {
        if name.eq_ignore_ascii_case("Content-Type") {
            log::warn!("Ignoring raw Content-Type header {:?}", value);
            continue;
        }
        let value = format!("{value}\r\n").into_bytes();
        match headers[..generated]
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(pos) => {
                if overridden[pos] {
                    log::warn!(
                        "Raw header {name:?} replaces an earlier override of {:?}",
                        headers[pos].0
                    );
                }
                overridden[pos] = true;
                headers[pos].1 = value;
            }
            None => headers.push((name.into(), value)),
        }
    }

    let mut raw = Vec::with_capacity(512);
    for (name, value) in headers {
        raw.extend_from_slice(name.as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(&value);
    }
    write!(
        raw,
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    )?;
    Ok(raw)
}

fn mailbox(mailbox: &Mailbox) -> Address<'_> {
    Address::new_address(
        (!mailbox.name.is_empty()).then_some(mailbox.name.as_str()),
        mailbox.address.as_str(),
    )
}

fn render(header: &impl Header) -> io::Result<Vec<u8>> {
    let mut value = Vec::new();
    header.write_header(&mut value, 0)?;
    Ok(value)
}

fn open_part(raw: &mut Vec<u8>, boundary: &str, has_parts: &mut bool) {
    if *has_parts {
        raw.extend_from_slice(b"\r\n");
    }
    *has_parts = true;
    raw.extend_from_slice(b"--");
    raw.extend_from_slice(boundary.as_bytes());
    raw.extend_from_slice(b"\r\n");
}

fn write_text_part(raw: &mut Vec<u8>, content_type: &str, body: &str) {
    raw.extend_from_slice(b"Content-Type: ");
    raw.extend_from_slice(content_type.as_bytes());
    raw.extend_from_slice(
        b"; charset=UTF-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n",
    );
    raw.extend_from_slice(&quoted_printable::encode(crlf(body).as_bytes()));
}

fn write_attachment_headers(raw: &mut Vec<u8>, attachment: &Attachment) -> io::Result<()> {
    let mime_type = match attachment.mime_type() {
        "" => "application/octet-stream",
        mime_type => mime_type,
    };
    for (name, header) in [
        (
            "Content-Type: ",
            ContentType::new(mime_type).attribute("name", attachment.name()),
        ),
        (
            "Content-Disposition: ",
            ContentType::new(attachment.content_disposition().as_str())
                .attribute("filename", attachment.name()),
        ),
    ] {
        raw.extend_from_slice(name.as_bytes());
        header.write_header(&mut *raw, name.len())?;
    }
    raw.extend_from_slice(b"Content-Transfer-Encoding: base64\r\n\r\n");
    Ok(())
}

// Normalizes line endings to CRLF.
fn crlf(text: &str) -> Cow<'_, str> {
    let bare_lf = text
        .match_indices('\n')
        .any(|(pos, _)| pos == 0 || text.as_bytes()[pos - 1] != b'\r');
    if !bare_lf {
        return text.into();
    }
    text.replace("\r\n", "\n").replace('\n', "\r\n").into()
}

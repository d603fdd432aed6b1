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

//! # mail-compose-send
//!
//! _mail-compose-send_ builds MIME messages with lazily loaded attachments and
//! streams them to an SMTP server. It includes the following features:
//!
//! - Composes `multipart/mixed` documents (_RFC 2045 - 2049_) with an optional
//!   nested `multipart/alternative` body and one part per attachment.
//! - Attachments are backed by memory, files, open file handles or custom
//!   providers and are only opened while their part is being written, one at a time.
//! - MIME types are resolved from the file extension or, failing that, by sniffing
//!   the first 512 bytes of content.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) delivery with the
//!   message streamed straight into the `DATA` command.
//! - SMTP Service Extension for Secure SMTP over **TLS** (_RFC 3207_), either forced
//!   with an explicit configuration or negotiated opportunistically.
//! - SMTP Service Extension for Authentication (_RFC 4954_) with automatic mechanism
//!   negotiation (CRAM-MD5, XOAUTH2, LOGIN and PLAIN).
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! Send a message with an attachment via an SMTP server that requires authentication:
//!
//! ```rust
//!     let mut attachments = Attachments::new();
//!     attachments.push(Attachment::from_path("./report.pdf", None, None));
//!
//!     let message = Message::new()
//!         .from(("John Doe", "john@example.com"))
//!         .to(("Jane Doe", "jane@example.com"))
//!         .subject("Quarterly report")
//!         .text_body("Report attached.")
//!         .html_body("<p>Report <b>attached</b>.</p>")
//!         .attachments(attachments);
//!
//!     let bytes_sent = SmtpClientBuilder::new("smtp.example.com", 587)
//!         .credentials(("john", "p4ssw0rd"))
//!         .submit_message(&message)
//!         .await
//!         .unwrap();
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod attachment;
pub mod message;
pub mod smtp;
pub mod submit;

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rustls::ClientConfig;
use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};

pub use attachment::{list::Attachments, Attachment, Disposition};
pub use message::{Mailbox, Message};
pub use smtp::{auth::Credentials, envelope::Envelope};
pub use smtp_proto;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    // SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Timeout while waiting for the server.
    Timeout,

    /// The attachment has no readable content.
    ContentUnavailable(String),

    /// Failed to open or read external attachment content.
    ExternalRead {
        locator: String,
        error: std::io::Error,
    },

    /// Malformed attachment descriptor.
    InvalidStreamKind(String),

    /// The SMTP session failed before the message transfer started.
    Session { stage: Stage, source: Box<Error> },

    /// The message transfer failed after `bytes_written` bytes of the document were sent.
    DataTransfer {
        bytes_written: usize,
        source: Box<Error>,
    },
}

/// SMTP session stage in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Dial,
    Greeting,
    Tls,
    Auth,
    Envelope,
    Data,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client.
pub struct SmtpClient<T: AsyncRead + AsyncWrite> {
    pub stream: T,
    pub timeout: Duration,
}

/// SMTP session settings.
#[derive(Clone)]
pub struct SmtpClientBuilder {
    pub addr: String,
    pub tls_hostname: String,
    pub helo_host: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
    pub tls_config: Option<Arc<ClientConfig>>,
    pub allow_invalid_certs: bool,
}

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Buffers and logs every composed document before it is transmitted.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

impl Error {
    /// Returns the session stage that failed, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Session { stage, .. } => Some(*stage),
            Error::DataTransfer { .. } => Some(Stage::Data),
            _ => None,
        }
    }

    /// Number of document bytes sent before the failure.
    pub fn bytes_written(&self) -> usize {
        match self {
            Error::DataTransfer { bytes_written, .. } => *bytes_written,
            _ => 0,
        }
    }

    pub(crate) fn at(stage: Stage) -> impl FnOnce(Error) -> Error {
        move |err| Error::Session {
            stage,
            source: Box::new(err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::ExternalRead { error, .. } => Some(error),
            Error::Session { source, .. } | Error::DataTransfer { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code, e.message)
            }
            Error::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {} {}", e.code, e.message)
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Timeout while waiting for server"),
            Error::ContentUnavailable(name) => {
                write!(f, "Attachment {name:?} has no readable content")
            }
            Error::ExternalRead { locator, error } => {
                write!(f, "Failed to read {locator}: {error}")
            }
            Error::InvalidStreamKind(kind) => write!(f, "Invalid attachment kind {kind:?}"),
            Error::Session { stage, source } => write!(f, "{stage} failed: {source}"),
            Error::DataTransfer {
                bytes_written,
                source,
            } => write!(
                f,
                "Message transfer failed after {bytes_written} bytes: {source}"
            ),
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Dial => "Connection",
            Stage::Greeting => "Greeting",
            Stage::Tls => "STARTTLS",
            Stage::Auth => "Authentication",
            Stage::Envelope => "Envelope",
            Stage::Data => "Data transfer",
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // Composition errors travel through `std::io::Read` wrapped in an I/O error.
        if err.get_ref().is_none() {
            return Error::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(err)) => *err,
            Some(Err(inner)) => Error::Io(std::io::Error::new(kind, inner)),
            None => Error::Io(kind.into()),
        }
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            err => std::io::Error::other(err),
        }
    }
}

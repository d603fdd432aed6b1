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

//! Message submission helpers.

use std::io::{self, Read};

use crate::{smtp::envelope::Envelope, Attachments, Mailbox, Message, SmtpClientBuilder};

impl SmtpClientBuilder {
    /// Composes `message` and delivers it to its recipients. The envelope
    /// sender is the `Sender` raw header when present, otherwise `From`.
    ///
    /// Returns the number of message bytes transferred.
    ///
    /// When [`crate::set_verbose`] is enabled the whole document is composed
    /// and logged before connecting, so attachment errors surface before any
    /// network activity.
    pub async fn submit_message(&self, message: &Message) -> crate::Result<usize> {
        self.submit_composed(message, crate::is_verbose()).await
    }

    async fn submit_composed(&self, message: &Message, verbose: bool) -> crate::Result<usize> {
        let envelope = Envelope::from(message);
        let mut document = message.compose()?;

        if verbose {
            let mut buf = Vec::new();
            document.read_to_end(&mut buf)?;
            log::debug!(
                "Submitting message to {}:\n{}",
                self.addr,
                String::from_utf8_lossy(&buf)
            );
            self.send(&envelope, io::Cursor::new(buf)).await
        } else {
            self.send(&envelope, document).await
        }
    }

    /// Sends an HTML message to a single recipient.
    pub async fn submit_html(
        &self,
        from: impl Into<Mailbox>,
        to: impl Into<Mailbox>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        attachments: &Attachments,
    ) -> crate::Result<usize> {
        self.submit_mixed(from, to, subject, String::new(), html_body, attachments)
            .await
    }

    /// Sends a plain text message to a single recipient.
    pub async fn submit_plaintext(
        &self,
        from: impl Into<Mailbox>,
        to: impl Into<Mailbox>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
        attachments: &Attachments,
    ) -> crate::Result<usize> {
        self.submit_mixed(from, to, subject, text_body, String::new(), attachments)
            .await
    }

    /// Sends a message with both plain text and HTML bodies to a single recipient.
    pub async fn submit_mixed(
        &self,
        from: impl Into<Mailbox>,
        to: impl Into<Mailbox>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
        html_body: impl Into<String>,
        attachments: &Attachments,
    ) -> crate::Result<usize> {
        let message = Message::new()
            .from(from)
            .to(to)
            .subject(subject)
            .text_body(text_body)
            .html_body(html_body)
            .attachments(attachments.clone());
        self.submit_message(&message).await
    }
}

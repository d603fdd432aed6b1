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

use crate::{Attachment, Attachments};

pub mod compose;

/// Display name and e-mail address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

/// Headers written verbatim after the generated ones.
///
/// Keys are case-sensitive; setting an existing key replaces its value
/// and keeps its position. When composing, a key that matches a generated
/// header (`From`, `Return-Path`, `To`, `Subject`, `MIME-Version`) ignoring
/// case replaces it in place, so `from` and `From` both target the same
/// header and the later one wins. All other keys are written as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHeaders {
    headers: Vec<(String, String)>,
}

/// An e-mail message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub raw_headers: RawHeaders,
    pub attachments: Attachments,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender of the message.
    pub fn from(mut self, from: impl Into<Mailbox>) -> Self {
        self.from = from.into();
        self
    }

    /// Add a message recipient.
    pub fn to(mut self, to: impl Into<Mailbox>) -> Self {
        self.to.push(to.into());
        self
    }

    pub fn add_recipient(&mut self, to: impl Into<Mailbox>) {
        self.to.push(to.into());
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = body.into();
        self
    }

    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = body.into();
        self
    }

    /// Set a raw header, see [`RawHeaders`].
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_headers.set(name, value);
        self
    }

    pub fn attachments(mut self, attachments: Attachments) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Address used in `MAIL FROM`: the `Sender` raw header when set,
    /// otherwise the `From` address.
    pub fn envelope_sender(&self) -> &str {
        match self.raw_headers.get("Sender") {
            Some(sender) if !sender.is_empty() => sender,
            _ => &self.from.address,
        }
    }

    /// Addresses used in `RCPT TO`, in order.
    pub fn envelope_recipients(&self) -> impl Iterator<Item = &str> {
        self.to.iter().map(|mailbox| mailbox.address.as_str())
    }
}

impl RawHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl Mailbox {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Mailbox {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl From<&str> for Mailbox {
    fn from(address: &str) -> Self {
        Mailbox::new("", address)
    }
}

impl From<String> for Mailbox {
    fn from(address: String) -> Self {
        Mailbox::new("", address)
    }
}

impl From<(&str, &str)> for Mailbox {
    fn from((name, address): (&str, &str)) -> Self {
        Mailbox::new(name, address)
    }
}

impl From<(String, String)> for Mailbox {
    fn from((name, address): (String, String)) -> Self {
        Mailbox::new(name, address)
    }
}

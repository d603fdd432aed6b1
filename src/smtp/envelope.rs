/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{borrow::Cow, fmt::Display};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{Message, SmtpClient};

use super::AssertReply;

/// SMTP envelope of a single transaction.
#[derive(Debug, Default, Clone)]
pub struct Envelope<'x> {
    pub mail_from: Address<'x>,
    pub rcpt_to: Vec<Address<'x>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Address<'x> {
    pub email: Cow<'x, str>,
    pub parameters: Parameters<'x>,
}

/// ESMTP parameters appended to `MAIL FROM` or `RCPT TO`, in insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Parameters<'x> {
    params: Vec<(Cow<'x, str>, Option<Cow<'x, str>>)>,
}

impl<'x> Envelope<'x> {
    pub fn new(from: impl Into<Address<'x>>) -> Self {
        Envelope {
            mail_from: from.into(),
            rcpt_to: Vec::new(),
        }
    }

    /// Add a recipient.
    pub fn to(mut self, address: impl Into<Address<'x>>) -> Self {
        self.rcpt_to.push(address.into());
        self
    }
}

impl<'x> From<&'x Message> for Envelope<'x> {
    fn from(message: &'x Message) -> Self {
        Envelope {
            mail_from: message.envelope_sender().into(),
            rcpt_to: message.envelope_recipients().map(Into::into).collect(),
        }
    }
}

impl<'x> From<&'x str> for Address<'x> {
    fn from(email: &'x str) -> Self {
        Address {
            email: email.into(),
            parameters: Parameters::default(),
        }
    }
}

impl<'x> From<String> for Address<'x> {
    fn from(email: String) -> Self {
        Address {
            email: email.into(),
            parameters: Parameters::default(),
        }
    }
}

impl<'x> Address<'x> {
    pub fn new(email: impl Into<Cow<'x, str>>, parameters: Parameters<'x>) -> Self {
        Address {
            email: email.into(),
            parameters,
        }
    }
}

impl<'x> Parameters<'x> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<Cow<'x, str>>, value: impl Into<Cow<'x, str>>) -> Self {
        self.params.push((key.into(), Some(value.into())));
        self
    }

    pub fn keyword(mut self, key: impl Into<Cow<'x, str>>) -> Self {
        self.params.push((key.into(), None));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl Display for Parameters<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (key, value) in &self.params {
            f.write_str(" ")?;
            f.write_str(key)?;
            if let Some(value) = value {
                f.write_str("=")?;
                f.write_str(value)?;
            }
        }
        Ok(())
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a MAIL FROM command to the server.
    pub async fn mail_from(&mut self, addr: &str, params: &Parameters<'_>) -> crate::Result<()> {
        self.cmd(format!("MAIL FROM:<{addr}>{params}\r\n"))
            .await?
            .assert_positive_completion()
    }

    /// Sends a RCPT TO command to the server.
    pub async fn rcpt_to(&mut self, addr: &str, params: &Parameters<'_>) -> crate::Result<()> {
        self.cmd(format!("RCPT TO:<{addr}>{params}\r\n"))
            .await?
            .assert_positive_completion()
    }

    /// Sends the envelope, stopping at the first rejected address.
    pub async fn envelope(&mut self, envelope: &Envelope<'_>) -> crate::Result<()> {
        self.mail_from(&envelope.mail_from.email, &envelope.mail_from.parameters)
            .await?;
        for rcpt in &envelope.rcpt_to {
            self.rcpt_to(&rcpt.email, &rcpt.parameters).await?;
        }
        Ok(())
    }

    /// Sends a QUIT command to the server and shuts the connection down.
    pub async fn quit(&mut self) -> crate::Result<()> {
        let result = self
            .cmd(b"QUIT\r\n")
            .await
            .and_then(|reply| reply.assert_positive_completion());
        self.stream.shutdown().await?;
        result
    }
}

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

use std::fmt::Display;

use base64::{engine::general_purpose::STANDARD, Engine};
#[cfg(feature = "cram-md5")]
use smtp_proto::AUTH_CRAM_MD5;
use smtp_proto::{EhloResponse, AUTH_LOGIN, AUTH_PLAIN, AUTH_XOAUTH2};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl From<(&str, &str)> for Credentials {
    fn from(credentials: (&str, &str)) -> Self {
        Credentials::new(credentials.0, credentials.1)
    }
}

impl From<(String, String)> for Credentials {
    fn from(credentials: (String, String)) -> Self {
        Credentials::new(credentials.0, credentials.1)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge received"),
        }
    }
}

/// Authentication mechanism, ordered from most to least preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mechanism {
    /// Challenge-Response Authentication Mechanism (CRAM)
    #[cfg(feature = "cram-md5")]
    CramMD5,

    /// SASL XOAUTH2 (used by Google)
    XOauth2,

    /// Login
    Login,

    /// Plain
    Plain,
}

impl Mechanism {
    #[cfg(feature = "cram-md5")]
    pub const ALL: &'static [Mechanism] = &[
        Mechanism::CramMD5,
        Mechanism::XOauth2,
        Mechanism::Login,
        Mechanism::Plain,
    ];
    #[cfg(not(feature = "cram-md5"))]
    pub const ALL: &'static [Mechanism] = &[Mechanism::XOauth2, Mechanism::Login, Mechanism::Plain];

    /// Bit used by `EhloResponse::auth_mechanisms`.
    pub fn flag(&self) -> u64 {
        match self {
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => AUTH_CRAM_MD5,
            Mechanism::XOauth2 => AUTH_XOAUTH2,
            Mechanism::Login => AUTH_LOGIN,
            Mechanism::Plain => AUTH_PLAIN,
        }
    }

    /// Mechanisms advertised by the server, in order of preference.
    pub fn supported(capabilities: &EhloResponse<String>) -> Vec<Mechanism> {
        Mechanism::ALL
            .iter()
            .copied()
            .filter(|mechanism| capabilities.auth_mechanisms & mechanism.flag() != 0)
            .collect()
    }
}

impl TryFrom<&str> for Mechanism {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "PLAIN" => Ok(Mechanism::Plain),
            "LOGIN" => Ok(Mechanism::Login),
            #[cfg(feature = "cram-md5")]
            "CRAM-MD5" => Ok(Mechanism::CramMD5),
            "XOAUTH2" => Ok(Mechanism::XOauth2),
            _ => Err(()),
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mechanism::Plain => write!(f, "PLAIN"),
            Mechanism::Login => write!(f, "LOGIN"),
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => write!(f, "CRAM-MD5"),
            Mechanism::XOauth2 => write!(f, "XOAUTH2"),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates with the first advertised mechanism this client
    /// supports. A rejected exchange is reported as
    /// [`crate::Error::AuthenticationFailed`].
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<()> {
        let mechanism = Mechanism::supported(capabilities)
            .into_iter()
            .next()
            .ok_or(crate::Error::UnsupportedAuthMechanism)?;
        log::debug!("Authenticating as {:?} using {mechanism}", credentials.username);

        // Answer at most three challenges before giving up on the exchange.
        let mut reply = self.cmd(format!("AUTH {mechanism}\r\n")).await?;
        for _ in 0..3 {
            if reply.code != 334 {
                break;
            }
            let response = credentials.encode(mechanism, &reply.message)?;
            reply = self.cmd(format!("{response}\r\n")).await?;
        }

        if reply.code == 235 {
            Ok(())
        } else {
            Err(crate::Error::AuthenticationFailed(reply))
        }
    }
}

impl Credentials {
    /// Creates a new `Credentials` instance.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Credentials {
        Credentials {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Base64 response to a `334` challenge. `challenge` is the reply text
    /// as sent by the server, still base64 encoded.
    pub(crate) fn encode(&self, mechanism: Mechanism, challenge: &str) -> crate::Result<String> {
        let response = match mechanism {
            Mechanism::Plain => format!("\0{}\0{}", self.username, self.secret),
            Mechanism::Login => self.login_prompt(&STANDARD.decode(challenge)?)?.to_string(),
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => self.cram_md5(&STANDARD.decode(challenge)?),
            Mechanism::XOauth2 => format!(
                "user={}\x01auth=Bearer {}\x01\x01",
                self.username, self.secret
            ),
        };
        Ok(STANDARD.encode(response))
    }

    /// LOGIN prompts for the user name first, then the password. Some
    /// servers spell the first prompt `Username`.
    fn login_prompt(&self, prompt: &[u8]) -> Result<&str, Error> {
        let starts_with = |expected: &[u8]| {
            prompt
                .get(..expected.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(expected))
        };
        if starts_with(b"user name") || starts_with(b"username") {
            Ok(&self.username)
        } else if starts_with(b"password") {
            Ok(&self.secret)
        } else {
            Err(Error::InvalidChallenge)
        }
    }

    /// HMAC-MD5 keyed by the secret (RFC 2195).
    #[cfg(feature = "cram-md5")]
    fn cram_md5(&self, challenge: &[u8]) -> String {
        let mut key = [0u8; 64];
        if self.secret.len() > key.len() {
            key[..16].copy_from_slice(&md5::compute(self.secret.as_bytes()).0);
        } else {
            key[..self.secret.len()].copy_from_slice(self.secret.as_bytes());
        }

        let mut inner = key.iter().map(|byte| byte ^ 0x36).collect::<Vec<_>>();
        inner.extend_from_slice(challenge);
        let mut outer = key.iter().map(|byte| byte ^ 0x5c).collect::<Vec<_>>();
        outer.extend_from_slice(&md5::compute(&inner).0);

        format!("{} {:x}", self.username, md5::compute(&outer))
    }
}

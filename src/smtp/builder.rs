/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{sync::Arc, time::Duration};

use rustls::ClientConfig;

use crate::SmtpClientBuilder;

use super::auth::Credentials;

impl SmtpClientBuilder {
    pub fn new(hostname: impl AsRef<str>, port: u16) -> Self {
        let hostname = hostname.as_ref();
        let addr = if hostname.contains(':') && !hostname.starts_with('[') {
            format!("[{hostname}]:{port}")
        } else {
            format!("{hostname}:{port}")
        };
        SmtpClientBuilder {
            addr,
            tls_hostname: hostname
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            helo_host: "localhost".to_string(),
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(5 * 60),
            credentials: None,
            tls_config: None,
            allow_invalid_certs: false,
        }
    }

    /// Upgrade with this configuration even if the server does not advertise STARTTLS.
    pub fn tls_config(mut self, config: impl Into<Arc<ClientConfig>>) -> Self {
        self.tls_config = Some(config.into());
        self
    }

    /// Allow invalid TLS certificates on opportunistic STARTTLS.
    pub fn allow_invalid_certs(mut self, allow_invalid_certs: bool) -> Self {
        self.allow_invalid_certs = allow_invalid_certs;
        self
    }

    /// Name checked against the server certificate, defaults to the hostname.
    pub fn tls_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.tls_hostname = hostname.into();
        self
    }

    /// Set the EHLO/HELO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.helo_host = host.into();
        self
    }

    /// Authenticate when the server advertises AUTH.
    pub fn credentials(mut self, credentials: impl Into<Credentials>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Sets the timeout for each SMTP command
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the TCP connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

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

//! A complete SMTP transaction:
//!
//! ```text
//! connect -> greeting -> [STARTTLS] -> [AUTH] -> MAIL FROM -> RCPT TO... -> DATA -> QUIT
//! ```
//!
//! Any failure ends the transaction. The connection is always released:
//! with `QUIT` while it is at the command level, or by closing it when the
//! failure left it in an unknown state (a broken TLS handshake or an
//! aborted message payload).

use std::io::Read;

use smtp_proto::{EhloResponse, EXT_AUTH, EXT_START_TLS};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::{Error, SmtpClient, SmtpClientBuilder, Stage};

use super::{envelope::Envelope, stream::SmtpStream, tls::build_tls_connector, AssertReply};

impl SmtpClientBuilder {
    /// Connects to the server, runs one transaction for `envelope` streaming
    /// `document` as the message content, and disconnects.
    ///
    /// Returns the number of document bytes transferred.
    pub async fn send(
        &self,
        envelope: &Envelope<'_>,
        document: impl Read + Send + 'static,
    ) -> crate::Result<usize> {
        let mut client = self.connect().await?;
        let result = self.transaction(&mut client, envelope, document).await;
        client.close().await;
        result
    }

    /// Opens the TCP connection, bounded by the connect timeout.
    pub async fn connect(&self) -> crate::Result<SmtpClient<SmtpStream>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::Timeout)
            .and_then(|result| result.map_err(Error::from))
            .map_err(Error::at(Stage::Dial))?;
        log::debug!("Connected to {}", self.addr);

        Ok(SmtpClient {
            stream: SmtpStream::Plain(stream),
            timeout: self.timeout,
        })
    }

    async fn transaction(
        &self,
        client: &mut SmtpClient<SmtpStream>,
        envelope: &Envelope<'_>,
        document: impl Read + Send + 'static,
    ) -> crate::Result<usize> {
        // Greeting
        client
            .read_reply()
            .await
            .and_then(|reply| reply.assert_positive_completion())
            .map_err(Error::at(Stage::Greeting))?;
        let mut capabilities = client
            .hello(&self.helo_host)
            .await
            .map_err(Error::at(Stage::Greeting))?;

        // STARTTLS
        if let Some(tls_connector) = self.tls_connector(&capabilities) {
            log::debug!("Upgrading connection to {} to TLS", self.addr);
            client
                .start_tls(&tls_connector, &self.tls_hostname)
                .await
                .map_err(Error::at(Stage::Tls))?;
            capabilities = client
                .hello(&self.helo_host)
                .await
                .map_err(Error::at(Stage::Tls))?;
        }

        // AUTH
        match &self.credentials {
            Some(credentials) if capabilities.has_capability(EXT_AUTH) => {
                client
                    .authenticate(credentials, &capabilities)
                    .await
                    .map_err(Error::at(Stage::Auth))?;
            }
            Some(_) => {
                log::debug!("Server does not advertise AUTH, sending without authentication");
            }
            None => (),
        }

        // Envelope
        client
            .envelope(envelope)
            .await
            .map_err(Error::at(Stage::Envelope))?;

        // Message
        let bytes_written = client.data(document).await?;
        log::debug!(
            "Delivered {bytes_written} bytes to {} recipient(s)",
            envelope.rcpt_to.len()
        );
        Ok(bytes_written)
    }

    fn tls_connector(&self, capabilities: &EhloResponse<String>) -> Option<TlsConnector> {
        if let Some(config) = &self.tls_config {
            Some(TlsConnector::from(config.clone()))
        } else if capabilities.has_capability(EXT_START_TLS) {
            Some(build_tls_connector(self.allow_invalid_certs))
        } else {
            None
        }
    }
}

impl SmtpClient<SmtpStream> {
    /// Sends QUIT if the connection is still open, then releases it.
    pub async fn close(&mut self) {
        if self.stream.is_closed() {
            return;
        }
        if let Err(err) = self.quit().await {
            log::debug!("Failed to close SMTP connection cleanly: {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::{self, Read},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    };

    use base64::{engine::general_purpose::STANDARD, Engine};

    use crate::{
        attachment::{ContentProvider, ContentStream},
        smtp::{
            envelope::Envelope,
            test_server::{client_tls_config, Script, Transcript},
        },
        Attachment, Error, Message, SmtpClientBuilder, Stage,
    };

    fn builder(addr: std::net::SocketAddr) -> SmtpClientBuilder {
        SmtpClientBuilder::new(addr.ip().to_string(), addr.port())
            .timeout(Duration::from_secs(10))
    }

    fn envelope() -> Envelope<'static> {
        Envelope::new("john@example.com")
            .to("jane@example.com")
            .to("bill@example.com")
            .to("james@example.com")
    }

    fn commands(transcript: &Transcript) -> Vec<&str> {
        transcript
            .commands
            .iter()
            .map(|(_, command)| command.as_str())
            .collect()
    }

    const DOCUMENT: &str = "Subject: hi\r\n\r\n.dot\r\nbody\r\n";

    #[tokio::test]
    async fn plain_session_without_extensions() {
        let (addr, server) = Script::default().spawn().await;
        let bytes_written = builder(addr)
            .credentials(("john", "secret"))
            .send(&envelope(), DOCUMENT.as_bytes())
            .await
            .unwrap();
        let transcript = server.await.unwrap();

        assert_eq!(bytes_written, DOCUMENT.len());
        assert_eq!(
            commands(&transcript),
            [
                "EHLO localhost",
                "MAIL FROM:<john@example.com>",
                "RCPT TO:<jane@example.com>",
                "RCPT TO:<bill@example.com>",
                "RCPT TO:<james@example.com>",
                "DATA",
                "QUIT"
            ]
        );
        assert_eq!(transcript.data, DOCUMENT.as_bytes());
        assert_eq!((transcript.quit, transcript.eof), (1, 1));
    }

    #[tokio::test]
    async fn helo_fallback() {
        let (addr, server) = Script::default()
            .reply("EHLO", "502 Command not implemented")
            .spawn()
            .await;
        builder(addr)
            .send(&Envelope::new("a@example.com").to("b@example.com"), &b"x"[..])
            .await
            .unwrap();
        let transcript = server.await.unwrap();
        assert_eq!(
            &commands(&transcript)[..3],
            ["EHLO localhost", "HELO localhost", "MAIL FROM:<a@example.com>"]
        );
    }

    #[tokio::test]
    async fn explicit_tls_then_auth() {
        let (addr, server) = Script::default()
            .extension("STARTTLS")
            .extension("AUTH PLAIN")
            .spawn()
            .await;
        builder(addr)
            .tls_config(client_tls_config())
            .credentials(("john", "secret"))
            .helo_host("client.example.com")
            .send(
                &Envelope::new("john@example.com").to("jane@example.com"),
                DOCUMENT.as_bytes(),
            )
            .await
            .unwrap();
        let transcript = server.await.unwrap();

        assert_eq!(
            transcript.commands,
            [
                (false, "EHLO client.example.com".to_string()),
                (false, "STARTTLS".to_string()),
                (true, "EHLO client.example.com".to_string()),
                (true, "AUTH PLAIN".to_string()),
                (true, STANDARD.encode("\0john\0secret")),
                (true, "MAIL FROM:<john@example.com>".to_string()),
                (true, "RCPT TO:<jane@example.com>".to_string()),
                (true, "DATA".to_string()),
                (true, "QUIT".to_string()),
            ]
        );
        assert_eq!((transcript.quit, transcript.eof), (1, 1));
    }

    #[tokio::test]
    async fn explicit_tls_without_advertisement() {
        let (addr, server) = Script::default().spawn().await;
        builder(addr)
            .tls_config(client_tls_config())
            .send(&Envelope::new("a@example.com").to("b@example.com"), &b"x"[..])
            .await
            .unwrap();
        let transcript = server.await.unwrap();
        assert_eq!(transcript.commands[1], (false, "STARTTLS".to_string()));
        assert!(transcript.commands[2..].iter().all(|(tls, _)| *tls));
    }

    #[tokio::test]
    async fn opportunistic_tls_verifies_certificates() {
        let (addr, server) = Script::default().extension("STARTTLS").spawn().await;
        let err = builder(addr)
            .send(&envelope(), DOCUMENT.as_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Tls));
        let transcript = server.await.unwrap();
        assert_eq!(commands(&transcript), ["EHLO localhost", "STARTTLS"]);
        assert_eq!((transcript.quit, transcript.eof), (0, 1));

        let (addr, server) = Script::default().extension("STARTTLS").spawn().await;
        builder(addr)
            .allow_invalid_certs(true)
            .send(&envelope(), DOCUMENT.as_bytes())
            .await
            .unwrap();
        let transcript = server.await.unwrap();
        assert!(transcript.commands[2..].iter().all(|(tls, _)| *tls));
        assert_eq!(transcript.data, DOCUMENT.as_bytes());
    }

    #[tokio::test]
    async fn rejected_recipient_aborts_before_data() {
        let (addr, server) = Script::default()
            .reply("RCPT TO:<bill@", "550 No such user")
            .spawn()
            .await;
        let err = builder(addr)
            .send(&envelope(), DOCUMENT.as_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Envelope));
        assert!(matches!(
            &err,
            Error::Session { source, .. }
                if matches!(source.as_ref(), Error::UnexpectedReply(reply) if reply.code == 550)
        ));

        let transcript = server.await.unwrap();
        assert_eq!(
            commands(&transcript),
            [
                "EHLO localhost",
                "MAIL FROM:<john@example.com>",
                "RCPT TO:<jane@example.com>",
                "RCPT TO:<bill@example.com>",
                "QUIT"
            ]
        );
        assert!(transcript.data.is_empty());
    }

    #[tokio::test]
    async fn dial_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = builder(addr)
            .send(&envelope(), DOCUMENT.as_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Dial));
    }

    #[tokio::test]
    async fn failures_close_connection_once() {
        for (script, credentials, stage, expected_quit) in [
            (
                Script::default().greeting("554 Go away"),
                false,
                Stage::Greeting,
                1,
            ),
            (
                Script::default()
                    .extension("STARTTLS")
                    .reply("STARTTLS", "454 TLS not available"),
                false,
                Stage::Tls,
                1,
            ),
            (
                Script::default()
                    .extension("AUTH PLAIN")
                    .reply("AUTH", "535 Invalid credentials"),
                true,
                Stage::Auth,
                1,
            ),
            (
                Script::default().extension("AUTH GSSAPI"),
                true,
                Stage::Auth,
                1,
            ),
            (
                Script::default().reply("MAIL FROM", "550 Sender rejected"),
                false,
                Stage::Envelope,
                1,
            ),
            (
                Script::default().reply("DATA", "554 No valid recipients"),
                false,
                Stage::Data,
                1,
            ),
            (
                Script::default().reply("END-OF-DATA", "552 Message too big"),
                false,
                Stage::Data,
                1,
            ),
        ] {
            let (addr, server) = script.clone().spawn().await;
            let mut client = builder(addr);
            if credentials {
                client = client.credentials(("john", "secret"));
            }
            let err = client
                .send(&envelope(), DOCUMENT.as_bytes())
                .await
                .unwrap_err();
            assert_eq!(err.stage(), Some(stage), "{script:?}: {err}");

            let transcript = server.await.unwrap();
            assert_eq!(transcript.quit, expected_quit, "{script:?}");
            assert_eq!(transcript.eof, 1, "{script:?}");
            assert_eq!(
                commands(&transcript).last(),
                Some(&"QUIT"),
                "{script:?}"
            );
        }
    }

    struct Unreadable;

    impl ContentProvider for Unreadable {
        fn open(&self) -> io::Result<ContentStream> {
            Ok(Box::new(Unreadable))
        }
    }

    impl Read for Unreadable {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "storage offline"))
        }
    }

    #[tokio::test]
    async fn attachment_error_aborts_transfer() {
        let message = Message::new()
            .from("john@example.com")
            .to("jane@example.com")
            .subject("Report")
            .text_body("See attached")
            .attach(Attachment::from_provider(
                Unreadable,
                "report.pdf",
                Some("application/pdf"),
            ));

        let (addr, server) = Script::default().spawn().await;
        let err = builder(addr)
            .send(&Envelope::from(&message), message.compose().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Data));
        assert!(err.bytes_written() > 0);
        assert!(matches!(
            &err,
            Error::DataTransfer { source, .. }
                if matches!(source.as_ref(), Error::ExternalRead { locator, .. } if locator == "report.pdf")
        ));

        let transcript = server.await.unwrap();
        assert_eq!(commands(&transcript).last(), Some(&"DATA"));
        assert_eq!((transcript.quit, transcript.eof), (0, 1));
        assert_eq!(transcript.data.len(), err.bytes_written());
    }

    #[tokio::test]
    async fn composed_message_bytes() {
        let message = Message::new()
            .from(("John Doe", "john@example.com"))
            .to("jane@example.com")
            .subject("Report")
            .text_body(".Leading dot\r\n")
            .html_body("<p>Report</p>")
            .attach(Attachment::from_bytes(vec![7u8; 4000], "data.bin", None));
        let mut document = Vec::new();
        message
            .compose()
            .unwrap()
            .read_to_end(&mut document)
            .unwrap();

        let (addr, server) = Script::default().spawn().await;
        let bytes_written = builder(addr)
            .send(&Envelope::from(&message), message.compose().unwrap())
            .await
            .unwrap();
        let transcript = server.await.unwrap();

        assert_eq!(bytes_written, document.len());
        assert_eq!(transcript.data.len(), document.len());
        assert!(String::from_utf8_lossy(&transcript.data)
            .contains("Content-Disposition: attachment; filename=\"data.bin\""));
    }

    // Content whose first read blocks the calling thread.
    struct SlowStorage(Duration);

    struct SlowStream {
        delay: Duration,
        content: io::Cursor<Vec<u8>>,
    }

    impl ContentProvider for SlowStorage {
        fn open(&self) -> io::Result<ContentStream> {
            Ok(Box::new(SlowStream {
                delay: self.0,
                content: io::Cursor::new(vec![b'x'; 100]),
            }))
        }
    }

    impl Read for SlowStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.content.position() == 0 {
                std::thread::sleep(self.delay);
            }
            self.content.read(buf)
        }
    }

    fn slow_message(delay: Duration) -> Message {
        Message::new()
            .from("john@example.com")
            .to("jane@example.com")
            .text_body("See attached")
            .attach(Attachment::from_provider(
                SlowStorage(delay),
                "archive.bin",
                Some("application/octet-stream"),
            ))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_attachment_keeps_runtime_responsive() {
        let message = slow_message(Duration::from_millis(300));
        let (addr, server) = Script::default().spawn().await;

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        let bytes_written = builder(addr)
            .send(&Envelope::from(&message), message.compose().unwrap())
            .await
            .unwrap();
        ticker.abort();

        let ticks = ticks.load(Ordering::SeqCst);
        assert!(ticks >= 10, "runtime stalled, {ticks} ticks");
        let transcript = server.await.unwrap();
        assert_eq!(transcript.data.len(), bytes_written);
        assert_eq!(transcript.quit, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_attachment_times_out() {
        let message = slow_message(Duration::from_millis(1500));
        let (addr, server) = Script::default().spawn().await;

        let started = Instant::now();
        let err = builder(addr)
            .timeout(Duration::from_millis(200))
            .send(&Envelope::from(&message), message.compose().unwrap())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.stage(), Some(Stage::Data));
        assert!(matches!(
            &err,
            Error::DataTransfer { source, .. } if matches!(source.as_ref(), Error::Timeout)
        ));

        let transcript = server.await.unwrap();
        assert_eq!((transcript.quit, transcript.eof), (0, 1));
    }
}

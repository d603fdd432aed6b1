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

//! Scripted SMTP server for session tests.

use std::{net::SocketAddr, sync::Arc};

use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

const CA_CERT: &[u8] = include_bytes!("../../resources/tests/ca.der");
const SERVER_CERT: &[u8] = include_bytes!("../../resources/tests/server.der");
const SERVER_KEY: &[u8] = include_bytes!("../../resources/tests/server.key.der");

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Server behaviour. Replies are looked up by command prefix, the first
/// match wins; `END-OF-DATA` matches the end of the message payload.
#[derive(Debug, Clone)]
pub struct Script {
    pub greeting: &'static str,
    pub extensions: Vec<&'static str>,
    pub replies: Vec<(&'static str, &'static str)>,
}

#[derive(Debug, Default)]
pub struct Transcript {
    /// Commands received, flagged with whether TLS was active.
    pub commands: Vec<(bool, String)>,
    pub data: Vec<u8>,
    pub quit: usize,
    pub eof: usize,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            greeting: "220 mx.example.com ESMTP ready",
            extensions: vec!["8BITMIME"],
            replies: Vec::new(),
        }
    }
}

impl Script {
    pub fn extension(mut self, extension: &'static str) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn reply(mut self, command: &'static str, reply: &'static str) -> Self {
        self.replies.push((command, reply));
        self
    }

    pub fn greeting(mut self, greeting: &'static str) -> Self {
        self.greeting = greeting;
        self
    }

    fn reply_for(&self, command: &str, default: &'static str) -> &'static str {
        self.replies
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix))
            .map_or(default, |(_, reply)| reply)
    }

    /// Accepts a single connection and serves it until the client disconnects.
    pub async fn spawn(self) -> (SocketAddr, JoinHandle<Transcript>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            self.serve(Box::new(stream)).await
        });
        (addr, handle)
    }

    async fn serve(self, stream: Box<dyn Io>) -> Transcript {
        let mut transcript = Transcript::default();
        let mut conn = BufReader::new(stream);
        let mut tls = false;
        let mut line = Vec::new();

        write(&mut conn, self.greeting).await;

        loop {
            line.clear();
            if !matches!(conn.read_until(b'\n', &mut line).await, Ok(len) if len > 0) {
                transcript.eof += 1;
                break;
            }
            let command = String::from_utf8_lossy(&line).trim_end().to_string();
            transcript.commands.push((tls, command.clone()));
            let verb = command
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();

            match verb.as_str() {
                "EHLO" => {
                    let reply = self.reply_for(&command, "");
                    if reply.is_empty() {
                        let mut reply = String::from("250-mx.example.com");
                        for extension in &self.extensions {
                            reply.push_str("\r\n250-");
                            reply.push_str(extension);
                        }
                        reply.push_str("\r\n250 HELP");
                        write(&mut conn, &reply).await;
                    } else {
                        write(&mut conn, reply).await;
                    }
                }
                "HELO" => write(&mut conn, self.reply_for(&command, "250 mx.example.com")).await,
                "STARTTLS" => {
                    let reply = self.reply_for(&command, "220 Ready to start TLS");
                    write(&mut conn, reply).await;
                    if reply.starts_with('2') {
                        match acceptor().accept(conn.into_inner()).await {
                            Ok(stream) => {
                                conn = BufReader::new(Box::new(stream));
                                tls = true;
                            }
                            Err(_) => {
                                transcript.eof += 1;
                                return transcript;
                            }
                        }
                    }
                }
                "AUTH" => {
                    let reply = self.reply_for(&command, "334 ");
                    write(&mut conn, reply).await;
                    if reply.starts_with("334") {
                        line.clear();
                        if !matches!(conn.read_until(b'\n', &mut line).await, Ok(len) if len > 0) {
                            transcript.eof += 1;
                            break;
                        }
                        let response = String::from_utf8_lossy(&line).trim_end().to_string();
                        transcript.commands.push((tls, response));
                        write(&mut conn, "235 Authenticated").await;
                    }
                }
                "DATA" => {
                    let reply = self.reply_for(&command, "354 Start mail input");
                    write(&mut conn, reply).await;
                    if reply.starts_with("354") {
                        loop {
                            line.clear();
                            if !matches!(conn.read_until(b'\n', &mut line).await, Ok(len) if len > 0)
                            {
                                transcript.eof += 1;
                                return transcript;
                            }
                            if line == b".\r\n" {
                                break;
                            }
                            let unstuffed = if line.starts_with(b"..") {
                                &line[1..]
                            } else {
                                &line[..]
                            };
                            transcript.data.extend_from_slice(unstuffed);
                        }
                        write(&mut conn, self.reply_for("END-OF-DATA", "250 Queued")).await;
                    }
                }
                "QUIT" => {
                    transcript.quit += 1;
                    write(&mut conn, "221 Bye").await;
                }
                _ => write(&mut conn, self.reply_for(&command, "250 OK")).await,
            }
        }

        transcript
    }
}

async fn write(conn: &mut BufReader<Box<dyn Io>>, reply: &str) {
    let _ = conn.write_all(format!("{reply}\r\n").as_bytes()).await;
    let _ = conn.flush().await;
}

fn acceptor() -> TlsAcceptor {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(SERVER_CERT.to_vec())],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(SERVER_KEY.to_vec())),
        )
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Client configuration trusting the test CA.
pub fn client_tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add(CertificateDer::from(CA_CERT.to_vec())).unwrap();
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

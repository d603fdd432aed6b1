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

use std::{
    io::{self, Read},
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{Error, SmtpClient};

use super::AssertReply;

const CHUNK_LEN: usize = 8192;

/// Transparency procedure (RFC 5321, section 4.5.2) applied across
/// chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct DotStuffing {
    state: State,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    LineStart,
    Cr,
    Text,
}

impl DotStuffing {
    pub fn stuff(&mut self, chunk: &[u8], out: &mut Vec<u8>) {
        for &byte in chunk {
            if byte == b'.' && self.state == State::LineStart {
                out.push(b'.');
            }
            out.push(byte);
            self.state = match byte {
                b'\r' => State::Cr,
                b'\n' if self.state == State::Cr => State::LineStart,
                _ => State::Text,
            };
        }
    }

    /// End-of-data marker; a line break is added unless the payload ended with one.
    pub fn terminator(&self) -> &'static [u8] {
        if self.state == State::LineStart {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        }
    }
}

/// Pulls a synchronous document from the blocking thread pool, one chunk
/// at a time, so slow attachment storage never stalls the runtime.
struct BlockingReader<R> {
    reader: Option<R>,
    buf: Vec<u8>,
}

impl<R: Read + Send + 'static> BlockingReader<R> {
    fn new(reader: R) -> Self {
        BlockingReader {
            reader: Some(reader),
            buf: vec![0u8; CHUNK_LEN],
        }
    }

    /// Next chunk of the document, `None` at end of stream. Gives up after
    /// `timeout`, leaving the pending read to finish in the background.
    async fn next_chunk(&mut self, timeout: Duration) -> crate::Result<Option<&[u8]>> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(None);
        };
        let mut buf = std::mem::take(&mut self.buf);
        let task = tokio::task::spawn_blocking(move || {
            let result = loop {
                match reader.read(&mut buf) {
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                    result => break result,
                }
            };
            (reader, buf, result)
        });

        let (reader, buf, result) = tokio::time::timeout(timeout, task)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|err| Error::Io(io::Error::other(err)))?;
        self.buf = buf;
        match result? {
            0 => Ok(None),
            len => {
                self.reader = Some(reader);
                Ok(Some(&self.buf[..len]))
            }
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a DATA command and streams the document to the server.
    ///
    /// Returns the number of document bytes transferred, which excludes the
    /// dots added by the transparency procedure and the end-of-data marker.
    /// Failures are reported as [`Error::DataTransfer`]. If the transfer fails
    /// after the server accepted DATA, the connection is shut down before the
    /// end-of-data marker is sent, so the server discards the message.
    ///
    /// The document is read on the blocking thread pool and each read is
    /// bounded by the command timeout.
    pub async fn data(&mut self, document: impl Read + Send + 'static) -> crate::Result<usize> {
        self.cmd(b"DATA\r\n")
            .await
            .and_then(|reply| reply.assert_code(354))
            .map_err(|err| transfer_error(0, err))?;

        let mut bytes_written = 0;
        if let Err(err) = self.write_payload(document, &mut bytes_written).await {
            log::debug!("Aborting message transfer after {bytes_written} bytes: {err}");
            let _ = self.stream.shutdown().await;
            return Err(transfer_error(bytes_written, err));
        }

        self.read_reply()
            .await
            .and_then(|reply| reply.assert_positive_completion())
            .map_err(|err| transfer_error(bytes_written, err))?;

        Ok(bytes_written)
    }

    async fn write_payload(
        &mut self,
        document: impl Read + Send + 'static,
        bytes_written: &mut usize,
    ) -> crate::Result<()> {
        let mut stuffing = DotStuffing::default();
        let mut document = BlockingReader::new(document);
        let mut out = Vec::with_capacity(CHUNK_LEN + CHUNK_LEN / 8);

        while let Some(chunk) = document.next_chunk(self.timeout).await? {
            out.clear();
            stuffing.stuff(chunk, &mut out);
            self.write_all(&out).await?;
            *bytes_written += chunk.len();
        }

        self.write_all(stuffing.terminator()).await?;
        tokio::time::timeout(self.timeout, self.stream.flush())
            .await
            .map_err(|_| Error::Timeout)??;
        Ok(())
    }
}

fn transfer_error(bytes_written: usize, err: Error) -> Error {
    Error::DataTransfer {
        bytes_written,
        source: Box::new(err),
    }
}

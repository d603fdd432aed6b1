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

use smtp_proto::{
    response::parser::{ResponseReceiver, MAX_RESPONSE_LENGTH as MAX_REPONSE_LENGTH},
    EhloResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

use super::AssertReply;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Greets the server with EHLO, falling back to HELO if the server
    /// rejects EHLO. A HELO greeting yields an empty capability set.
    pub async fn hello(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        match self.ehlo(hostname).await {
            Ok(capabilities) => Ok(capabilities),
            Err(crate::Error::UnexpectedReply(reply)) if (500..=599).contains(&reply.code) => {
                log::debug!("EHLO rejected ({} {}), trying HELO", reply.code, reply.message);
                self.cmd(format!("HELO {hostname}\r\n"))
                    .await?
                    .assert_positive_completion()?;
                Ok(EhloResponse::default())
            }
            Err(err) => Err(err),
        }
    }

    /// Sends a EHLO command to the server.
    pub async fn ehlo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        log::trace!("C: EHLO {hostname}");
        tokio::time::timeout(self.timeout, async {
            self.stream
                .write_all(format!("EHLO {hostname}\r\n").as_bytes())
                .await?;
            self.stream.flush().await?;
            self.read_ehlo().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Reads a multi-line EHLO reply. Any reply other than 250 is returned
    /// as [`crate::Error::UnexpectedReply`].
    pub async fn read_ehlo(&mut self) -> crate::Result<EhloResponse<String>> {
        let mut buf = vec![0u8; 1024];
        let mut pending = Vec::new();

        loop {
            let br = self.stream.read(&mut buf).await?;
            if br == 0 || pending.len() + br >= MAX_REPONSE_LENGTH {
                return Err(crate::Error::UnparseableReply);
            }
            pending.extend_from_slice(&buf[..br]);

            let mut iter = pending.iter();
            match EhloResponse::parse(&mut iter) {
                Ok(capabilities) => return Ok(capabilities),
                Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                Err(smtp_proto::Error::InvalidResponse { code }) => {
                    match ResponseReceiver::from_code(code).parse(&mut iter) {
                        Ok(reply) => return Err(crate::Error::UnexpectedReply(reply)),
                        Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                        Err(_) => return Err(crate::Error::UnparseableReply),
                    }
                }
                Err(_) => return Err(crate::Error::UnparseableReply),
            }
        }
    }
}

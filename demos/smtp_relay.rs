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

use mail_compose_send::{Attachment, Attachments, SmtpClientBuilder};

#[tokio::main]
async fn main() {
    env_logger::init();

    // A plain text message with a single in-memory attachment
    let attachments = Attachments::new().attach(Attachment::from_bytes(
        [1, 2, 3, 4],
        "kittens.png",
        Some("image/png"),
    ));

    // Connect to an SMTP relay server.
    // The library will upgrade the connection to TLS if the server supports it.
    let bytes_sent = SmtpClientBuilder::new("mail.smtp2go.com", 2525)
        .submit_plaintext(
            ("John Doe", "john@example.com"),
            "jane@example.com",
            "Hello, world!",
            "Hello, world!",
            &attachments,
        )
        .await
        .unwrap();
    println!("Sent {bytes_sent} bytes");
}

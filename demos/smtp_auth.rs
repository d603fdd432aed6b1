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

use mail_compose_send::{Message, SmtpClientBuilder};

#[tokio::main]
async fn main() {
    env_logger::init();

    // Build a simple multipart message
    let message = Message::new()
        .from(("John Doe", "john@example.com"))
        .to(("Jane Doe", "jane@example.com"))
        .to(("James Smith", "james@test.com"))
        .subject("Hi!")
        .html_body("<h1>Hello, world!</h1>")
        .text_body("Hello world!");

    // Connect to the SMTP submissions port, upgrade to TLS and
    // authenticate using the provided credentials.
    SmtpClientBuilder::new("smtp.gmail.com", 587)
        .credentials(("john", "p4ssw0rd"))
        .submit_message(&message)
        .await
        .unwrap();
}

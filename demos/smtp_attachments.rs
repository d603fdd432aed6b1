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

use std::io::Write;

use mail_compose_send::{Attachment, Message, SmtpClientBuilder};

#[tokio::main]
async fn main() {
    env_logger::init();
    mail_compose_send::set_verbose(std::env::var("VERBOSE").is_ok());

    // Files are only opened while their part is being sent
    let mut upload = tempfile::NamedTempFile::new().unwrap();
    upload.write_all(b"name,amount\r\nwidgets,42\r\n").unwrap();
    let (_, upload_path) = upload.keep().unwrap();

    let mut message = Message::new()
        .from(("John Doe", "john@example.com"))
        .to("jane@example.com")
        .subject("Quarterly report")
        .text_body("Figures attached.")
        .html_body("<p>Figures <b>attached</b>.</p>")
        .header("Reply-To", "reports@example.com")
        .attach(Attachment::from_path("./Cargo.toml", None, None))
        .attach(Attachment::from_temp_file(
            upload_path,
            Some("figures.csv"),
            None,
        ))
        .attach(Attachment::from_bytes(&b"GIF89a"[..], "logo.gif", None).inline());

    println!("Attaching {:?}", message.attachments.filenames());

    let result = SmtpClientBuilder::new("localhost", 2525)
        .submit_message(&message)
        .await;

    // The uploaded file is deleted, Cargo.toml is left alone
    message.attachments.release_backing_resources().unwrap();

    match result {
        Ok(bytes_sent) => println!("Sent {bytes_sent} bytes"),
        Err(err) => println!("Delivery failed at {:?}: {err}", err.stage()),
    }
}

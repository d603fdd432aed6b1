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

use std::{borrow::Cow, collections::HashMap, path::Path, sync::OnceLock};

/// Number of leading bytes inspected when sniffing content.
pub const SNIFF_LEN: usize = 512;

/// Extension to MIME type table.
///
/// Entries added with [`MimeTypes::insert`] take precedence over the
/// built-in `mime_guess` database.
#[derive(Debug, Clone, Default)]
pub struct MimeTypes {
    extensions: HashMap<String, String>,
}

impl MimeTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table, initialized on first use and read-only afterwards.
    pub fn global() -> &'static MimeTypes {
        static GLOBAL: OnceLock<MimeTypes> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            log::trace!("Initializing MIME type table");
            MimeTypes::new()
        })
    }

    /// Maps an extension (with or without the leading dot) to a MIME type.
    pub fn insert(&mut self, extension: impl AsRef<str>, mime_type: impl Into<String>) {
        self.extensions
            .insert(normalize(extension.as_ref()), mime_type.into());
    }

    pub fn by_extension(&self, extension: &str) -> Option<Cow<'_, str>> {
        let extension = normalize(extension);
        if extension.is_empty() {
            return None;
        }
        if let Some(mime_type) = self.extensions.get(&extension) {
            return Some(mime_type.as_str().into());
        }
        mime_guess::from_ext(&extension).first_raw().map(Cow::Borrowed)
    }

    pub fn by_path(&self, path: impl AsRef<Path>) -> Option<Cow<'_, str>> {
        path.as_ref()
            .extension()
            .and_then(|extension| extension.to_str())
            .and_then(|extension| self.by_extension(extension))
    }
}

fn normalize(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

enum Signature {
    Exact(&'static [u8], &'static str),
    // Bytes at the given offset, after an arbitrary prefix such as a RIFF size.
    Offset(usize, &'static [u8], &'static str),
    // Case-insensitive HTML tag followed by a space or '>'.
    Html(&'static [u8]),
}

const SIGNATURES: &[Signature] = &[
    Signature::Html(b"<!DOCTYPE HTML"),
    Signature::Html(b"<HTML"),
    Signature::Html(b"<HEAD"),
    Signature::Html(b"<SCRIPT"),
    Signature::Html(b"<IFRAME"),
    Signature::Html(b"<H1"),
    Signature::Html(b"<DIV"),
    Signature::Html(b"<FONT"),
    Signature::Html(b"<TABLE"),
    Signature::Html(b"<A"),
    Signature::Html(b"<STYLE"),
    Signature::Html(b"<TITLE"),
    Signature::Html(b"<B"),
    Signature::Html(b"<BODY"),
    Signature::Html(b"<BR"),
    Signature::Html(b"<P"),
    Signature::Html(b"<!--"),
    Signature::Exact(b"<?xml", "text/xml; charset=utf-8"),
    Signature::Exact(b"%PDF-", "application/pdf"),
    Signature::Exact(b"%!PS-Adobe-", "application/postscript"),
    Signature::Exact(b"\xFE\xFF", "text/plain; charset=utf-16be"),
    Signature::Exact(b"\xFF\xFE", "text/plain; charset=utf-16le"),
    Signature::Exact(b"\xEF\xBB\xBF", "text/plain; charset=utf-8"),
    Signature::Exact(b"GIF87a", "image/gif"),
    Signature::Exact(b"GIF89a", "image/gif"),
    Signature::Exact(b"\x89PNG\r\n\x1A\n", "image/png"),
    Signature::Exact(b"\xFF\xD8\xFF", "image/jpeg"),
    Signature::Exact(b"BM", "image/bmp"),
    Signature::Exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Signature::Offset(8, b"WEBPVP", "image/webp"),
    Signature::Offset(8, b"WAVE", "audio/wave"),
    Signature::Offset(8, b"AVI ", "video/avi"),
    Signature::Offset(4, b"ftyp", "video/mp4"),
    Signature::Exact(b"ID3", "audio/mpeg"),
    Signature::Exact(b"OggS\x00", "application/ogg"),
    Signature::Exact(b"\x1A\x45\xDF\xA3", "video/webm"),
    Signature::Exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Signature::Exact(b"PK\x03\x04", "application/zip"),
    Signature::Exact(b"Rar!\x1A\x07", "application/x-rar-compressed"),
    Signature::Exact(b"\x00asm", "application/wasm"),
];

/// Guesses the MIME type of `content` from its leading bytes.
///
/// Only the first [`SNIFF_LEN`] bytes are considered. Unrecognized content is
/// reported as UTF-8 text unless it contains control bytes, in which case it
/// is `application/octet-stream`.
pub fn sniff(content: &[u8]) -> &'static str {
    let content = &content[..content.len().min(SNIFF_LEN)];
    let trimmed = match content
        .iter()
        .position(|&byte| !matches!(byte, b'\t' | b'\n' | 0x0C | b'\r' | b' '))
    {
        Some(pos) => &content[pos..],
        None => &[],
    };

    for signature in SIGNATURES {
        match signature {
            Signature::Html(tag) => {
                if trimmed.len() > tag.len()
                    && trimmed[..tag.len()].eq_ignore_ascii_case(tag)
                    && matches!(trimmed[tag.len()], b' ' | b'>')
                {
                    return "text/html; charset=utf-8";
                }
            }
            Signature::Exact(prefix, mime_type) => {
                let haystack = if prefix.starts_with(b"<") {
                    trimmed
                } else {
                    content
                };
                if haystack.starts_with(prefix) {
                    return mime_type;
                }
            }
            Signature::Offset(offset, magic, mime_type) => {
                if content
                    .get(*offset..)
                    .is_some_and(|rest| rest.starts_with(magic))
                {
                    return mime_type;
                }
            }
        }
    }

    if content
        .iter()
        .any(|&byte| matches!(byte, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F))
    {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

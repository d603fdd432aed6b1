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

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::Error;

use super::{Attachment, Disposition};

/// Attachments of a message, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
    items: Vec<Attachment>,
}

/// Fully materialized copy of an attachment list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedAttachments {
    pub files: Vec<SerializedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedFile {
    pub content: Vec<u8>,
    pub name: String,
    pub mime_type: String,
    pub content_disposition: Disposition,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attachment and returns its index.
    pub fn push(&mut self, attachment: Attachment) -> usize {
        self.items.push(attachment);
        self.items.len() - 1
    }

    /// Adds an attachment.
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.items.push(attachment);
        self
    }

    pub fn get(&self, index: usize) -> Option<&Attachment> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attachment> {
        self.items.iter()
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name()).collect()
    }

    /// Deletes temporary files and closes file handles owned by the
    /// attachments. Entries stay in place but their content becomes
    /// unavailable. Calling this more than once is harmless.
    ///
    /// Every entry is processed; the first failure is returned.
    pub fn release_backing_resources(&mut self) -> crate::Result<()> {
        let mut result = Ok(());
        for item in &mut self.items {
            if let Err(err) = item.release() {
                log::warn!("Failed to release attachment {:?}: {}", item.name(), err);
                if result.is_ok() {
                    result = Err(Error::Io(err));
                }
            }
        }
        result
    }

    /// Reads every attachment into memory.
    pub fn serialize(&self) -> crate::Result<SerializedAttachments> {
        let mut files = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let mut content = Vec::with_capacity(item.size().unwrap_or_default() as usize);
            item.open_stream()?
                .read_to_end(&mut content)
                .map_err(|error| Error::ExternalRead {
                    locator: item.name().to_string(),
                    error,
                })?;
            files.push(SerializedFile {
                content,
                name: item.name().to_string(),
                mime_type: item.mime_type().to_string(),
                content_disposition: item.content_disposition(),
            });
        }
        Ok(SerializedAttachments { files })
    }
}

impl SerializedAttachments {
    /// Rebuilds an attachment list. Every entry becomes an in-memory attachment.
    pub fn into_attachments(self) -> Attachments {
        self.files
            .into_iter()
            .map(|file| {
                Attachment::from_bytes(
                    file.content,
                    file.name,
                    Some(file.mime_type.as_str()).filter(|mime_type| !mime_type.is_empty()),
                )
                .disposition(file.content_disposition)
            })
            .collect()
    }
}

impl<'x> IntoIterator for &'x Attachments {
    type Item = &'x Attachment;
    type IntoIter = std::slice::Iter<'x, Attachment>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Attachment> for Attachments {
    fn from_iter<T: IntoIterator<Item = Attachment>>(iter: T) -> Self {
        Attachments {
            items: iter.into_iter().collect(),
        }
    }
}

impl Extend<Attachment> for Attachments {
    fn extend<T: IntoIterator<Item = Attachment>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

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
    fmt::{Debug, Display},
    fs::File,
    io::{self, Cursor, Read, Seek, SeekFrom},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::Error;

use self::mime_type::{sniff, MimeTypes, SNIFF_LEN};

pub mod list;
pub mod mime_type;

/// Readable attachment content.
pub type ContentStream = Box<dyn Read + Send>;

/// Content-Disposition of an attachment part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Attachment,
    Inline,
}

/// Where attachment content is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Bytes,
    Path,
    Handle,
    Provider,
}

/// Supplies attachment content from custom storage.
pub trait ContentProvider: Send + Sync {
    /// Opens a fresh stream positioned at the start of the content.
    fn open(&self) -> io::Result<ContentStream>;

    /// Content length, when known without opening a stream.
    fn size(&self) -> Option<u64> {
        None
    }
}

#[derive(Clone)]
pub enum Content {
    Bytes(Arc<[u8]>),
    Path {
        path: Option<PathBuf>,
        temporary: bool,
    },
    Handle(Option<Arc<File>>),
    Provider(Arc<dyn ContentProvider>),
}

/// A single message attachment.
#[derive(Clone)]
pub struct Attachment {
    content: Content,
    name: String,
    mime_type: String,
    disposition: Disposition,
}

impl Attachment {
    /// Creates an attachment, resolving its MIME type against `mime_types`
    /// when `mime_type` is not provided.
    pub fn new(
        content: Content,
        name: impl Into<String>,
        mime_type: Option<&str>,
        mime_types: &MimeTypes,
    ) -> Self {
        let mut attachment = Attachment {
            content,
            name: name.into(),
            mime_type: mime_type.unwrap_or_default().to_string(),
            disposition: Disposition::Attachment,
        };
        attachment.resolve_mime_type(mime_types);
        attachment
    }

    /// Attachment held in memory.
    pub fn from_bytes(
        bytes: impl Into<Vec<u8>>,
        name: impl Into<String>,
        mime_type: Option<&str>,
    ) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Attachment::new(
            Content::Bytes(bytes.into()),
            name,
            mime_type,
            MimeTypes::global(),
        )
    }

    /// Attachment read from `path` each time its content is needed.
    /// The name defaults to the file name.
    pub fn from_path(
        path: impl Into<PathBuf>,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Self {
        Self::path_content(path.into(), false, name, mime_type)
    }

    /// Like [`Attachment::from_path`], but the file is owned by the attachment
    /// and deleted by [`Attachments::release_backing_resources`](list::Attachments::release_backing_resources).
    pub fn from_temp_file(
        path: impl Into<PathBuf>,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Self {
        Self::path_content(path.into(), true, name, mime_type)
    }

    fn path_content(
        path: PathBuf,
        temporary: bool,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> Self {
        let name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        Attachment::new(
            Content::Path {
                path: Some(path),
                temporary,
            },
            name,
            mime_type,
            MimeTypes::global(),
        )
    }

    /// Attachment read from an already open file. The handle is rewound
    /// every time a stream is opened and closed on release.
    pub fn from_file(file: File, name: impl Into<String>, mime_type: Option<&str>) -> Self {
        Attachment::new(
            Content::Handle(Some(Arc::new(file))),
            name,
            mime_type,
            MimeTypes::global(),
        )
    }

    pub fn from_provider(
        provider: impl ContentProvider + 'static,
        name: impl Into<String>,
        mime_type: Option<&str>,
    ) -> Self {
        Attachment::new(
            Content::Provider(Arc::new(provider)),
            name,
            mime_type,
            MimeTypes::global(),
        )
    }

    /// Sets the content disposition.
    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    /// Marks the attachment as inline.
    pub fn inline(self) -> Self {
        self.disposition(Disposition::Inline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn content_disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn kind(&self) -> ContentKind {
        match &self.content {
            Content::Bytes(_) => ContentKind::Bytes,
            Content::Path { .. } => ContentKind::Path,
            Content::Handle(_) => ContentKind::Handle,
            Content::Provider(_) => ContentKind::Provider,
        }
    }

    /// Content length, available without opening a stream for in-memory
    /// and provider-backed content.
    pub fn size(&self) -> Option<u64> {
        match &self.content {
            Content::Bytes(bytes) => Some(bytes.len() as u64),
            Content::Provider(provider) => provider.size(),
            Content::Path { .. } | Content::Handle(_) => None,
        }
    }

    /// Opens a new stream over the attachment content.
    pub fn open_stream(&self) -> crate::Result<ContentStream> {
        match &self.content {
            Content::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Content::Path {
                path: Some(path), ..
            } => match File::open(path) {
                Ok(file) => Ok(Box::new(file)),
                Err(error) => Err(Error::ExternalRead {
                    locator: path.display().to_string(),
                    error,
                }),
            },
            Content::Handle(Some(file)) => file
                .try_clone()
                .and_then(|mut file| {
                    file.seek(SeekFrom::Start(0))?;
                    Ok(Box::new(file) as ContentStream)
                })
                .map_err(|error| Error::ExternalRead {
                    locator: self.name.clone(),
                    error,
                }),
            Content::Provider(provider) => {
                provider.open().map_err(|error| Error::ExternalRead {
                    locator: self.name.clone(),
                    error,
                })
            }
            Content::Path { path: None, .. } | Content::Handle(None) => {
                Err(Error::ContentUnavailable(self.name.clone()))
            }
        }
    }

    /// Fills in the MIME type when it is missing: first from the name or path
    /// extension, then by sniffing the first bytes of content. A failure to
    /// open the content leaves the type empty.
    pub fn resolve_mime_type(&mut self, mime_types: &MimeTypes) {
        if !self.mime_type.is_empty() {
            return;
        }

        let by_extension = mime_types.by_path(&self.name).or_else(|| match &self.content {
            Content::Path {
                path: Some(path), ..
            } => mime_types.by_path(path),
            _ => None,
        });
        if let Some(mime_type) = by_extension {
            self.mime_type = mime_type.into_owned();
            return;
        }

        match self.open_stream() {
            Ok(stream) => {
                let mut head = Vec::with_capacity(SNIFF_LEN);
                match stream.take(SNIFF_LEN as u64).read_to_end(&mut head) {
                    Ok(_) => self.mime_type = sniff(&head).to_string(),
                    Err(err) => log::debug!("Failed to sniff {:?}: {}", self.name, err),
                }
            }
            Err(err) => log::debug!("Failed to sniff {:?}: {}", self.name, err),
        }
    }

    /// Deletes owned temporary files and closes held handles, clearing
    /// their locators.
    pub(crate) fn release(&mut self) -> io::Result<()> {
        match &mut self.content {
            Content::Path {
                path,
                temporary: true,
            } => {
                if let Some(path) = path.take() {
                    log::debug!("Removing temporary attachment {}", path.display());
                    match std::fs::remove_file(&path) {
                        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err),
                        _ => (),
                    }
                }
            }
            Content::Handle(file) => {
                file.take();
            }
            _ => (),
        }
        Ok(())
    }
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
        }
    }
}

impl Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("attachment") {
            Ok(Disposition::Attachment)
        } else if s.eq_ignore_ascii_case("inline") {
            Ok(Disposition::Inline)
        } else {
            Err(Error::InvalidStreamKind(s.to_string()))
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContentKind::Bytes => "bytes",
            ContentKind::Path => "path",
            ContentKind::Handle => "handle",
            ContentKind::Provider => "provider",
        })
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(ContentKind::Bytes),
            "path" => Ok(ContentKind::Path),
            "handle" => Ok(ContentKind::Handle),
            "provider" => Ok(ContentKind::Provider),
            _ => Err(Error::InvalidStreamKind(s.to_string())),
        }
    }
}

impl Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Content::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Content::Path { path, temporary } => f
                .debug_struct("Path")
                .field("path", path)
                .field("temporary", temporary)
                .finish(),
            Content::Handle(file) => f.debug_tuple("Handle").field(file).finish(),
            Content::Provider(provider) => f
                .debug_tuple("Provider")
                .field(&provider.size())
                .finish(),
        }
    }
}

impl Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("disposition", &self.disposition)
            .field("content", &self.content)
            .finish()
    }
}

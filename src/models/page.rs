//! The static page baked into the image.

use bytes::Bytes;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page `{}` does not exist", .0.display())]
    Missing(PathBuf),
    #[error("failed to read page `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An immutable HTML document, read once at startup and served from memory.
#[derive(Clone, Debug)]
pub struct PageAsset {
    /// File the page was loaded from.
    pub source: PathBuf,

    pub body: Bytes,

    /// Quoted MD5 of the body.
    pub etag: String,
}

impl PageAsset {
    /// Read the document from disk. A missing file is an error, the server
    /// must not start without its page.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PageError> {
        let path = path.as_ref();
        let body = fs::read(path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                PageError::Missing(path.to_path_buf())
            } else {
                PageError::Read {
                    path: path.to_path_buf(),
                    source: err,
                }
            }
        })?;
        Ok(Self::from_bytes(path, body))
    }

    pub fn from_bytes(source: impl Into<PathBuf>, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let etag = format!("\"{:x}\"", md5::compute(&body));
        Self {
            source: source.into(),
            body,
            etag,
        }
    }

    pub fn content_type(&self) -> &'static str {
        HTML_CONTENT_TYPE
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

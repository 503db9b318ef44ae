//! Upload bodies for POST and PUT.
//!
//! A body has to be replayable: every retry streams it again from the start, so
//! it is described by where its bytes live rather than by an open stream.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::error::RequestError;

/// Payload sent by POST or PUT.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// In-memory bytes.
    Bytes(Bytes),
    /// A file reopened for every attempt.
    File(PathBuf),
}

impl RequestBody {
    /// Creates a body from in-memory bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    /// Creates a body streamed from a file.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Checks the body can be read before a transfer is scheduled.
    pub(crate) fn validate(&self) -> Result<(), RequestError> {
        match self {
            Self::Bytes(_) => Ok(()),
            Self::File(path) => {
                let metadata = std::fs::metadata(path).map_err(|e| {
                    RequestError::invalid_argument(format!(
                        "body file {} is not readable: {e}",
                        path.display()
                    ))
                })?;
                if !metadata.is_file() {
                    return Err(RequestError::invalid_argument(format!(
                        "body path {} is not a regular file",
                        path.display()
                    )));
                }
                std::fs::File::open(path).map_err(|e| {
                    RequestError::invalid_argument(format!(
                        "body file {} is not readable: {e}",
                        path.display()
                    ))
                })?;
                Ok(())
            }
        }
    }

    /// Opens a fresh reader positioned at the first byte.
    pub(crate) async fn open(&self) -> Result<BodySource, RequestError> {
        match self {
            Self::Bytes(data) => Ok(BodySource::Memory {
                data: data.clone(),
                offset: 0,
            }),
            Self::File(path) => {
                let file = File::open(path)
                    .await
                    .map_err(|e| RequestError::io(path.display().to_string(), e))?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| RequestError::io(path.display().to_string(), e))?
                    .len();
                Ok(BodySource::File {
                    file,
                    len,
                    path: path.clone(),
                })
            }
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(data: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(data))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&Path> for RequestBody {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

/// Open reader over a [`RequestBody`] for one attempt.
#[derive(Debug)]
pub(crate) enum BodySource {
    Memory { data: Bytes, offset: usize },
    File { file: File, len: u64, path: PathBuf },
}

impl BodySource {
    pub(crate) fn len(&self) -> u64 {
        match self {
            Self::Memory { data, .. } => data.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    /// Fills `buf` with the next bytes; returns 0 at the end of the body.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize, RequestError> {
        match self {
            Self::Memory { data, offset } => {
                let remaining = &data[*offset..];
                let n = remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                *offset += n;
                Ok(n)
            }
            Self::File { file, path, .. } => file
                .read(buf)
                .await
                .map_err(|e| RequestError::io(path.display().to_string(), e)),
        }
    }
}

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Forward-only byte stream over the source document. A fresh stream is
/// required per extraction pass; streams are never rewound.
pub trait SourceStream: Send {
    /// Total length when known, for progress percentages.
    fn len_hint(&self) -> Option<u64>;
    /// Read the next bytes into `buf`. Returns 0 at end of stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;
}

/// Blob-store boundary: source download plus upload of derived chunk files.
pub trait BlobStore: Send + Sync {
    fn open_stream(&self) -> Result<Box<dyn SourceStream>, SourceError>;
    fn put_object(&self, rel_path: &str, bytes: &[u8]) -> Result<(), SourceError>;
}

pub struct FileStream {
    file: File,
    len: u64,
}

impl SourceStream for FileStream {
    fn len_hint(&self) -> Option<u64> {
        Some(self.len)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        Ok(self.file.read(buf)?)
    }
}

/// Filesystem-backed blob store: the source document is a local file and
/// derived objects land under an output root.
pub struct FsBlobStore {
    input: PathBuf,
    output_root: PathBuf,
}

impl FsBlobStore {
    pub fn new(input: &Path, output_root: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            output_root: output_root.to_path_buf(),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn open_stream(&self) -> Result<Box<dyn SourceStream>, SourceError> {
        let file = File::open(&self.input)?;
        let len = file.metadata()?.len();
        Ok(Box::new(FileStream { file, len }))
    }

    fn put_object(&self, rel_path: &str, bytes: &[u8]) -> Result<(), SourceError> {
        let path = self.output_root.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Hash the full source in a dedicated pass.
pub fn compute_sha256(store: &dyn BlobStore, buf_size: usize) -> Result<String, SourceError> {
    let mut stream = store.open_stream()?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = stream.read_chunk(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

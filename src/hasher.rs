//! Content digests used for change detection.
//!
//! `hash_file` is the source of truth for "has this file changed": a SHA-256
//! over the raw bytes, streamed in fixed blocks so large files are never
//! loaded whole. `git_blob_sha` computes the id the remote assigns to a blob,
//! which lets the uploader compare local bytes against a remote object
//! without downloading it.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha1::Sha1;
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 64 * 1024;

/// Hash a file on the blocking pool. Returns lowercase hex SHA-256.
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path))
        .await
        .map_err(io::Error::other)?
}

/// Synchronous streaming hash. Fails if the file vanishes, or if the bytes
/// read differ in count from its size at open (it was truncated or grew
/// mid-read).
pub fn hash_file_sync(path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    let expected = file.metadata()?.len();
    hash_stream(file, expected)
}

fn hash_stream(mut reader: impl Read, expected: u64) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        hasher.update(&buf[..n]);
    }
    if total != expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read {total} bytes, expected {expected}; file changed while hashing"),
        ));
    }
    Ok(to_hex(&hasher.finalize()))
}

pub fn hash_bytes(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

/// Git blob id: `sha1("blob <len>\0" ++ data)`.
pub fn git_blob_sha(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", data.len()).as_bytes());
    hasher.update(data);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

//! Content keys: a block-wise SHA-1 digest of file bytes, framed and URL-safe
//! base64 encoded.
//!
//! Content of at most one block hashes to `0x16 || sha1(bytes)`. Larger content
//! hashes to `0x96 || sha1(sha1(block_1) || ... || sha1(block_n))`. 0x16 is 22
//! (blocks are 2^22 bytes) and the 0x80 bit flags the doubled hash. Stored
//! objects are named by these keys, so the framing must stay bit-for-bit stable.

use serde::Serialize;
use sha1::{Digest, Sha1};
use std::{
    fmt,
    io::{self, ErrorKind, SeekFrom},
    path::Path,
    str::FromStr,
};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt},
};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::services::codec;

/// Fixed block size of the framing. Part of the key format; never change it.
pub const BLOCK_SIZE: u64 = 1 << 22;

pub const SINGLE_BLOCK_MARKER: u8 = 0x16;
pub const MULTI_BLOCK_MARKER: u8 = 0x96;

/// Key of zero-byte content.
pub const EMPTY_CONTENT_KEY: &str = "Fto5o-5ea0sNMlW_75VgGJCv2AcJ";

const SHA1_LEN: usize = 20;
const ENCODED_LEN: usize = 28;
const CRC_CHUNK: usize = 64 * 1024;

/// Deterministic key derived from content bytes only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn empty() -> Self {
        Self(EMPTY_CONTENT_KEY.to_string())
    }

    /// Validate a key read back from storage.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != ENCODED_LEN {
            return Err(Error::Decode(format!(
                "content key must be {ENCODED_LEN} characters, got {}",
                s.len()
            )));
        }
        let frame = codec::decode(s)?;
        match frame.first() {
            Some(&SINGLE_BLOCK_MARKER | &MULTI_BLOCK_MARKER) if frame.len() == 1 + SHA1_LEN => {
                Ok(Self(s.to_string()))
            }
            _ => Err(Error::Decode(format!("`{s}` is not a framed content key"))),
        }
    }

    /// True when the key was produced by the multi-block framing.
    pub fn is_multi_block(&self) -> bool {
        codec::decode(&self.0)
            .ok()
            .and_then(|frame| frame.first().copied())
            == Some(MULTI_BLOCK_MARKER)
    }

    /// Build an object key: `directory/<key>.extension`.
    ///
    /// The directory is trimmed of slashes and omitted when empty; an empty
    /// extension produces no trailing dot.
    pub fn object_key(&self, directory: &str, extension: &str) -> String {
        let directory = directory.trim_matches('/');
        let extension = extension.trim_start_matches('.');
        let mut key = String::with_capacity(directory.len() + ENCODED_LEN + extension.len() + 2);
        if !directory.is_empty() {
            key.push_str(directory);
            key.push('/');
        }
        key.push_str(&self.0);
        if !extension.is_empty() {
            key.push('.');
            key.push_str(extension);
        }
        key
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Number of blocks `size` bytes occupy. Exact multiples do not round up.
pub fn block_count(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE)
}

/// Key of an in-memory payload.
pub fn digest_bytes(data: &[u8]) -> ContentKey {
    if data.is_empty() {
        return ContentKey::empty();
    }
    let mut block_digests = Vec::new();
    let mut blocks = 0u64;
    for block in data.chunks(BLOCK_SIZE as usize) {
        block_digests.extend_from_slice(&Sha1::digest(block));
        blocks += 1;
    }
    finish(blocks, &block_digests)
}

/// Key of the file at `path`.
pub async fn digest_file(path: impl AsRef<Path>) -> Result<ContentKey> {
    let mut file = open_regular(path.as_ref()).await?;
    digest_reader(&mut file).await
}

/// Key of a seekable source. The size is taken from the end position; blocks
/// are then read strictly in order from the start.
pub async fn digest_reader<R>(reader: &mut R) -> Result<ContentKey>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let size = reader.seek(SeekFrom::End(0)).await?;
    if size == 0 {
        return Ok(ContentKey::empty());
    }
    reader.seek(SeekFrom::Start(0)).await?;

    let blocks = block_count(size);
    let mut buf = vec![0u8; size.min(BLOCK_SIZE) as usize];
    let mut block_digests = Vec::with_capacity(blocks as usize * SHA1_LEN);
    let mut offset = 0u64;
    for _ in 0..blocks {
        let len = (size - offset).min(BLOCK_SIZE) as usize;
        let block = &mut buf[..len];
        read_block(reader, block, offset).await?;
        block_digests.extend_from_slice(&Sha1::digest(&*block));
        offset += len as u64;
    }

    debug!(size, blocks, "computed content key");
    Ok(finish(blocks, &block_digests))
}

async fn read_block<R>(reader: &mut R, block: &mut [u8], offset: u64) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(block).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Err(Error::Io(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!(
                "source ended inside the {}-byte block at offset {offset}",
                block.len()
            ),
        ))),
        Err(source) => Err(Error::Digest { offset, source }),
    }
}

/// CRC-32 (IEEE) checksum of an in-memory payload.
pub fn crc32_data(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC-32 (IEEE) checksum of the file at `path`, read in fixed-size chunks.
pub async fn crc32_file(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    let mut file = open_regular(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CRC_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

async fn open_regular(path: &Path) -> Result<File> {
    let file = File::open(path).await?;
    if !file.metadata().await?.is_file() {
        return Err(Error::Io(io::Error::new(
            ErrorKind::InvalidInput,
            format!("cannot open {} as a file", path.display()),
        )));
    }
    Ok(file)
}

/// Frame the per-block digests. With one block its digest is the file digest.
fn finish(blocks: u64, block_digests: &[u8]) -> ContentKey {
    let mut frame = Vec::with_capacity(1 + SHA1_LEN);
    if blocks <= 1 {
        frame.push(SINGLE_BLOCK_MARKER);
        frame.extend_from_slice(block_digests);
    } else {
        frame.push(MULTI_BLOCK_MARKER);
        frame.extend_from_slice(&Sha1::digest(block_digests));
    }
    ContentKey(codec::encode(frame))
}

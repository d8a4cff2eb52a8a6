//! Descriptor persistence.
//!
//! Binary single descriptor: 128 little-endian `f64`, 1024 bytes, no framing.
//! Binary stream: little-endian `u32` count, then `count` single descriptors.
//! JSON: a descriptor is an array of 128 numbers; a gallery is an array of
//! `{ "name", "encoding", "metadata"? }` records.

use crate::types::{Descriptor, NamedDescriptor, DESCRIPTOR_LEN};
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Size of one binary descriptor.
pub const DESCRIPTOR_BYTES: usize = DESCRIPTOR_LEN * 8;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("truncated data: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },
    #[error("{0} unexpected trailing bytes after descriptor data")]
    TrailingBytes(usize),
    #[error("descriptor value {index} is {value}; JSON cannot represent it")]
    NonFinite { index: usize, value: f64 },
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode one descriptor as 1024 little-endian bytes.
pub fn encoding_to_bytes(encoding: &Descriptor) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DESCRIPTOR_BYTES);
    for v in encoding.iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Decode exactly one binary descriptor.
pub fn bytes_to_encoding(data: &[u8]) -> Result<Descriptor, CodecError> {
    if data.len() < DESCRIPTOR_BYTES {
        return Err(CodecError::TruncatedData {
            expected: DESCRIPTOR_BYTES,
            actual: data.len(),
        });
    }
    if data.len() > DESCRIPTOR_BYTES {
        return Err(CodecError::TrailingBytes(data.len() - DESCRIPTOR_BYTES));
    }
    Ok(decode_block(data))
}

fn decode_block(block: &[u8]) -> Descriptor {
    let mut d = Descriptor::zeros();
    for (v, chunk) in d.values_mut().iter_mut().zip(block.chunks_exact(8)) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *v = f64::from_le_bytes(raw);
    }
    d
}

/// Write a count-prefixed stream of descriptors.
pub fn write_encodings<W: Write>(mut w: W, encodings: &[Descriptor]) -> Result<(), CodecError> {
    let count = u32::try_from(encodings.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} descriptors exceed the u32 count field", encodings.len()),
        )
    })?;
    w.write_all(&count.to_le_bytes())?;
    for e in encodings {
        w.write_all(&encoding_to_bytes(e))?;
    }
    Ok(())
}

/// Read a count-prefixed stream. A stream that ends early fails with
/// [`CodecError::TruncatedData`]; nothing is returned partially filled.
pub fn read_encodings<R: Read>(mut r: R) -> Result<Vec<Descriptor>, CodecError> {
    let mut header = [0u8; 4];
    read_full(&mut r, &mut header, 0)?;
    let count = u32::from_le_bytes(header) as usize;

    // Cap the preallocation; the count comes from untrusted input.
    let mut encodings = Vec::with_capacity(count.min(1024));
    let mut block = [0u8; DESCRIPTOR_BYTES];
    for i in 0..count {
        read_full(&mut r, &mut block, 4 + i * DESCRIPTOR_BYTES)?;
        encodings.push(decode_block(&block));
    }
    Ok(encodings)
}

/// Fill `buf`, reporting a short read as truncation at stream offset `offset`.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8], offset: usize) -> Result<(), CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(CodecError::TruncatedData {
                    expected: offset + buf.len(),
                    actual: offset + filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Stream helpers over byte vectors.
pub fn encodings_to_bytes(encodings: &[Descriptor]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(4 + encodings.len() * DESCRIPTOR_BYTES);
    write_encodings(&mut buf, encodings)?;
    Ok(buf)
}

/// Decode a complete stream; bytes past the last record are rejected.
pub fn bytes_to_encodings(data: &[u8]) -> Result<Vec<Descriptor>, CodecError> {
    let mut rest = data;
    let encodings = read_encodings(&mut rest)?;
    if !rest.is_empty() {
        return Err(CodecError::TrailingBytes(rest.len()));
    }
    Ok(encodings)
}

/// JSON has no NaN or infinity; serde_json would write them as `null`.
fn ensure_finite(encoding: &Descriptor) -> Result<(), CodecError> {
    match encoding.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(CodecError::NonFinite {
            index,
            value: encoding[index],
        }),
        None => Ok(()),
    }
}

pub fn encoding_to_json(encoding: &Descriptor) -> Result<String, CodecError> {
    ensure_finite(encoding)?;
    Ok(serde_json::to_string(encoding)?)
}

pub fn json_to_encoding(data: &str) -> Result<Descriptor, CodecError> {
    Ok(serde_json::from_str(data)?)
}

/// Pretty-printed JSON gallery.
pub fn encode_named(encodings: &[NamedDescriptor]) -> Result<String, CodecError> {
    for record in encodings {
        ensure_finite(&record.encoding)?;
    }
    Ok(serde_json::to_string_pretty(encodings)?)
}

pub fn decode_named(data: &str) -> Result<Vec<NamedDescriptor>, CodecError> {
    Ok(serde_json::from_str(data)?)
}

/// Write a gallery file, replacing any existing one.
pub fn save_gallery(path: impl AsRef<Path>, gallery: &[NamedDescriptor]) -> Result<(), CodecError> {
    let path = path.as_ref();
    std::fs::write(path, encode_named(gallery)?)?;
    tracing::debug!(path = %path.display(), records = gallery.len(), "saved gallery");
    Ok(())
}

pub fn load_gallery(path: impl AsRef<Path>) -> Result<Vec<NamedDescriptor>, CodecError> {
    let path = path.as_ref();
    let gallery = decode_named(&std::fs::read_to_string(path)?)?;
    tracing::debug!(path = %path.display(), records = gallery.len(), "loaded gallery");
    Ok(gallery)
}

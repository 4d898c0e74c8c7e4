//! Binary delta patches between two versions of an archive.
//!
//! The stock [`BlockDelta`] codec indexes the base in fixed-size blocks,
//! scans the target with an rsync-style rolling checksum and emits a stream
//! of COPY (from base) and DATA (literal) operations. The patch header
//! records the target length and SHA-256 so a wrong base is detected on
//! apply instead of producing a corrupt archive.
//!
//! Layout (little endian):
//!
//! ```text
//! "UPKD" | format u8 | block_size u32 | target_len u64 | sha256 [32]
//! ops: 0x01 offset u64 len u32  (copy from base)
//!      0x02 len u32 bytes[len]   (literal data)
//! ```

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"UPKD";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 8 + 32;
const OP_COPY: u8 = 0x01;
const OP_DATA: u8 = 0x02;
const DEFAULT_BLOCK_SIZE: usize = 2048;
const MAX_LITERAL_CHUNK: usize = 1 << 20;
const MAX_PREALLOC: usize = 64 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("not a delta patch (bad magic)")]
    BadMagic,
    #[error("unsupported delta format version {0}")]
    UnsupportedFormat(u8),
    #[error("delta patch is truncated")]
    Truncated,
    #[error("unknown delta operation 0x{0:02x}")]
    UnknownOp(u8),
    #[error("copy of {len} bytes at {offset} exceeds base length {base_len}")]
    OutOfBounds {
        offset: u64,
        len: u32,
        base_len: usize,
    },
    #[error("patched output is {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("patched output does not match the recorded digest")]
    DigestMismatch,
}

/// Computes and applies binary patches.
pub trait DeltaCodec: Send + Sync {
    /// Produce a patch that turns `base` into `target`.
    fn compute(&self, base: &[u8], target: &[u8]) -> Vec<u8>;

    /// Rebuild the target from `base` and a patch made by [`compute`].
    ///
    /// # Errors
    /// Returns an error when the patch is malformed or was made against a
    /// different base.
    ///
    /// [`compute`]: DeltaCodec::compute
    fn apply(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BlockDelta {
    block_size: usize,
}

impl BlockDelta {
    #[must_use]
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: block_size.clamp(16, u32::MAX as usize),
        }
    }
}

impl Default for BlockDelta {
    fn default() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }
}

struct Rolling {
    a: u32,
    b: u32,
    len: u32,
}

impl Rolling {
    fn new(window: &[u8]) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let len = window.len() as u32;
        let mut a = 0_u32;
        let mut b = 0_u32;
        for (i, &byte) in window.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let weight = len.wrapping_sub(i as u32);
            a = a.wrapping_add(u32::from(byte));
            b = b.wrapping_add(weight.wrapping_mul(u32::from(byte)));
        }
        Self {
            a: a & 0xffff,
            b: b & 0xffff,
            len,
        }
    }

    fn roll(&mut self, outgoing: u8, incoming: u8) {
        self.a = self
            .a
            .wrapping_sub(u32::from(outgoing))
            .wrapping_add(u32::from(incoming))
            & 0xffff;
        self.b = self
            .b
            .wrapping_sub(self.len.wrapping_mul(u32::from(outgoing)))
            .wrapping_add(self.a)
            & 0xffff;
    }

    fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

struct PatchWriter {
    out: Vec<u8>,
    pending_copy: Option<(u64, u64)>,
}

impl PatchWriter {
    fn copy(&mut self, offset: usize, len: usize) {
        let (offset, len) = (offset as u64, len as u64);
        if let Some((start, run)) = self.pending_copy.as_mut()
            && *start + *run == offset
            && *run + len <= u64::from(u32::MAX)
        {
            *run += len;
            return;
        }
        self.flush_copy();
        self.pending_copy = Some((offset, len));
    }

    fn data(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.flush_copy();
        for chunk in bytes.chunks(MAX_LITERAL_CHUNK) {
            self.out.push(OP_DATA);
            #[allow(clippy::cast_possible_truncation)]
            self.out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            self.out.extend_from_slice(chunk);
        }
    }

    fn flush_copy(&mut self) {
        if let Some((offset, len)) = self.pending_copy.take() {
            self.out.push(OP_COPY);
            self.out.extend_from_slice(&offset.to_le_bytes());
            #[allow(clippy::cast_possible_truncation)]
            self.out.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush_copy();
        self.out
    }
}

impl DeltaCodec for BlockDelta {
    fn compute(&self, base: &[u8], target: &[u8]) -> Vec<u8> {
        let block = self.block_size;
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(FORMAT_VERSION);
        #[allow(clippy::cast_possible_truncation)]
        header.extend_from_slice(&(block as u32).to_le_bytes());
        header.extend_from_slice(&(target.len() as u64).to_le_bytes());
        header.extend_from_slice(&Sha256::digest(target));

        let mut writer = PatchWriter {
            out: header,
            pending_copy: None,
        };

        if base.len() < block || target.len() < block {
            writer.data(target);
            return writer.finish();
        }

        let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
        for start in (0..=base.len() - block).step_by(block) {
            index
                .entry(Rolling::new(&base[start..start + block]).digest())
                .or_default()
                .push(start);
        }

        let mut pos = 0;
        let mut literal_start = 0;
        let mut rolling = Rolling::new(&target[..block]);
        while pos + block <= target.len() {
            let window = &target[pos..pos + block];
            let matched = index.get(&rolling.digest()).and_then(|candidates| {
                candidates
                    .iter()
                    .copied()
                    .find(|&start| &base[start..start + block] == window)
            });

            if let Some(start) = matched {
                writer.data(&target[literal_start..pos]);
                let mut len = block;
                while len < u32::MAX as usize
                    && start + len < base.len()
                    && pos + len < target.len()
                    && base[start + len] == target[pos + len]
                {
                    len += 1;
                }
                writer.copy(start, len);
                pos += len;
                literal_start = pos;
                if pos + block <= target.len() {
                    rolling = Rolling::new(&target[pos..pos + block]);
                }
                continue;
            }

            if pos + block < target.len() {
                rolling.roll(target[pos], target[pos + block]);
            }
            pos += 1;
        }

        writer.data(&target[literal_start..]);
        writer.finish()
    }

    fn apply(&self, base: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
        if delta.len() < HEADER_LEN {
            return Err(if delta.starts_with(MAGIC) || MAGIC.starts_with(delta) {
                DeltaError::Truncated
            } else {
                DeltaError::BadMagic
            });
        }
        if &delta[..4] != MAGIC {
            return Err(DeltaError::BadMagic);
        }
        if delta[4] != FORMAT_VERSION {
            return Err(DeltaError::UnsupportedFormat(delta[4]));
        }

        let mut reader = Reader {
            bytes: delta,
            pos: 9,
        };
        let expected_len = reader.u64()?;
        let expected_digest = reader.take(32)?.to_vec();

        let mut out =
            Vec::with_capacity(usize::try_from(expected_len).map_or(0, |len| len.min(MAX_PREALLOC)));
        while !reader.is_empty() {
            match reader.u8()? {
                OP_COPY => {
                    let offset = reader.u64()?;
                    let len = reader.u32()?;
                    let start = usize::try_from(offset).ok();
                    let end = start.and_then(|s| s.checked_add(len as usize));
                    match (start, end) {
                        (Some(start), Some(end)) if end <= base.len() => {
                            out.extend_from_slice(&base[start..end]);
                        }
                        _ => {
                            return Err(DeltaError::OutOfBounds {
                                offset,
                                len,
                                base_len: base.len(),
                            });
                        }
                    }
                }
                OP_DATA => {
                    let len = reader.u32()? as usize;
                    out.extend_from_slice(reader.take(len)?);
                }
                other => return Err(DeltaError::UnknownOp(other)),
            }
        }

        if out.len() as u64 != expected_len {
            return Err(DeltaError::LengthMismatch {
                expected: expected_len,
                actual: out.len() as u64,
            });
        }
        if Sha256::digest(&out).as_slice() != expected_digest.as_slice() {
            return Err(DeltaError::DigestMismatch);
        }
        Ok(out)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DeltaError> {
        let end = self.pos.checked_add(len).ok_or(DeltaError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DeltaError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DeltaError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, DeltaError> {
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, DeltaError> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

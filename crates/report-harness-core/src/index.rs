//! Exact nearest-neighbour index over squared L2 distance.
//!
//! Vectors get sequential ids in insertion order, so id *i* is the *i*-th
//! chunk of the chunk list the index was built from. Search is a brute-force
//! scan, fine for corpora of a few hundred thousand chunks.
//!
//! # On-disk format
//!
//! All integers little endian:
//!
//! ```text
//! offset  size   field
//! 0       4      magic "RHIX"
//! 4       4      version (u32, currently 1)
//! 8       4      dims (u32)
//! 12      8      count (u64)
//! 20      32     SHA-256 digest of the chunk list
//! 52      4·d·n  vectors, f32, row-major
//! ```

use crate::embedding::{blob_to_vec, l2_distance_squared, vec_to_blob};
use crate::error::IndexError;
use crate::models::SearchHit;

pub const MAGIC: &[u8; 4] = b"RHIX";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 32;

/// Flat (exhaustive) L2 index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dims: usize,
    data: Vec<f32>,
}

/// An index read back from bytes, with the chunk digest recorded at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedIndex {
    pub index: FlatL2Index,
    pub chunk_digest: [u8; 32],
}

impl FlatL2Index {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors. Ids continue from the current length.
    ///
    /// Nothing is added if any vector has the wrong dimensionality.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Vector stored under `id`.
    pub fn get(&self, id: usize) -> Option<&[f32]> {
        if id >= self.len() {
            return None;
        }
        Some(&self.data[id * self.dims..(id + 1) * self.dims])
    }

    /// The `k` nearest vectors, closest first.
    ///
    /// Ties are broken by ascending id. `k > len` returns every entry,
    /// `k == 0` returns nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(id, v)| SearchHit {
                id,
                distance: l2_distance_squared(query, v),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize the index together with the digest of its chunk list.
    pub fn encode(&self, chunk_digest: &[u8; 32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(chunk_digest);
        out.extend_from_slice(&vec_to_blob(&self.data));
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<DecodedIndex, IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Corrupt(format!(
                "file is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let dims = usize::try_from(read_u32(&bytes[8..12]))
            .map_err(|_| IndexError::Corrupt("dimension does not fit in memory".to_string()))?;
        let count = read_u64(&bytes[12..20]);
        let count_usize = usize::try_from(count)
            .map_err(|_| IndexError::Corrupt(format!("entry count {} does not fit in memory", count)))?;

        let mut chunk_digest = [0u8; 32];
        chunk_digest.copy_from_slice(&bytes[20..52]);

        let expected = count_usize
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("header sizes overflow".to_string()))?;
        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {} bytes of vectors for {} x {}, found {}",
                expected,
                count,
                dims,
                body.len()
            )));
        }
        if dims == 0 && count > 0 {
            return Err(IndexError::Corrupt(
                "zero-dimensional vectors with non-zero count".to_string(),
            ));
        }

        Ok(DecodedIndex {
            index: FlatL2Index {
                dims,
                data: blob_to_vec(body),
            },
            chunk_digest,
        })
    }
}

fn read_u32(b: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(b);
    u32::from_le_bytes(buf)
}

fn read_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    u64::from_le_bytes(buf)
}

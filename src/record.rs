//! Record blobs and their validity codec.
//!
//! The directory stores each DNS record as an opaque binary attribute
//! value: a fixed little-endian header followed by the record's wire-form
//! rdata. Interpreting the rdata is somebody else's job; what this engine
//! needs is to check that a blob is well-formed, split off the header
//! fields it cares about (record type, TTL, version serial) and carry the
//! rdata along untouched. The [`RecordCodec`] trait is the seam through
//! which an embedder can substitute the full codec.

use core::fmt;
use std::fmt::Debug;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Size of the fixed header preceding the rdata.
const HEADER_LEN: usize = 24;

/// The one header layout revision this engine understands.
const SUPPORTED_BLOB_VERSION: u8 = 5;

//------------ RecordType ----------------------------------------------------

/// The numeric type of a DNS record, carried through uninterpreted.
#[derive(
    Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Deserialize,
    Serialize,
)]
#[serde(transparent)]
pub struct RecordType(pub u16);

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TYPE{}", self.0)
    }
}

//------------ RecordData ----------------------------------------------------

/// One decoded record: validated header fields plus opaque rdata.
///
/// Every value independently owns its rdata; nothing is shared with the
/// blob it was decoded from or with sibling records.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RecordData {
    /// The record type.
    pub rtype: RecordType,

    /// Time to live in seconds.
    pub ttl_secs: u32,

    /// The zone version serial the record was written under.
    pub serial: u32,

    /// The record's wire-form rdata, uninterpreted.
    pub rdata: Bytes,
}

//------------ RecordDecodeError ---------------------------------------------

/// A record blob failed its validity check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordDecodeError {
    /// The blob is shorter than the fixed header.
    Truncated,

    /// The header's data length disagrees with the blob length.
    LengthMismatch,

    /// The blob uses a header layout revision this engine does not know.
    UnsupportedVersion(u8),
}

impl fmt::Display for RecordDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordDecodeError::Truncated => {
                write!(f, "Record blob shorter than its header")
            }
            RecordDecodeError::LengthMismatch => {
                write!(f, "Record blob length disagrees with its header")
            }
            RecordDecodeError::UnsupportedVersion(version) => {
                write!(f, "Unsupported record blob revision {version}")
            }
        }
    }
}

impl std::error::Error for RecordDecodeError {}

//------------ RecordCodec ---------------------------------------------------

/// The consumed capability of validating and splitting record blobs.
pub trait RecordCodec: Debug + Send + Sync {
    /// Validates a blob and splits it into header fields and rdata.
    fn decode(&self, blob: &Bytes)
        -> Result<RecordData, RecordDecodeError>;
}

//------------ WireRecordCodec -----------------------------------------------

/// The default codec for the directory's record blob layout.
///
/// Header layout, all integers little-endian:
///
/// ```text
///  offset  size  field
///       0     2  rdata length
///       2     2  record type
///       4     1  layout revision (must be 5)
///       5     1  rank
///       6     2  flags
///       8     4  zone version serial
///      12     4  TTL in seconds
///      16     4  reserved
///      20     4  timestamp
///      24     …  rdata
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct WireRecordCodec;

impl WireRecordCodec {
    fn u16_at(blob: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([blob[offset], blob[offset + 1]])
    }

    fn u32_at(blob: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            blob[offset],
            blob[offset + 1],
            blob[offset + 2],
            blob[offset + 3],
        ])
    }
}

impl RecordCodec for WireRecordCodec {
    fn decode(
        &self,
        blob: &Bytes,
    ) -> Result<RecordData, RecordDecodeError> {
        if blob.len() < HEADER_LEN {
            return Err(RecordDecodeError::Truncated);
        }
        let data_len = usize::from(Self::u16_at(blob, 0));
        if blob.len() != HEADER_LEN + data_len {
            return Err(RecordDecodeError::LengthMismatch);
        }
        let version = blob[4];
        if version != SUPPORTED_BLOB_VERSION {
            return Err(RecordDecodeError::UnsupportedVersion(version));
        }
        Ok(RecordData {
            rtype: RecordType(Self::u16_at(blob, 2)),
            serial: Self::u32_at(blob, 8),
            ttl_secs: Self::u32_at(blob, 12),
            rdata: blob.slice(HEADER_LEN..),
        })
    }
}

//============ Testing =======================================================

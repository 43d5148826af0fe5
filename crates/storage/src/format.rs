//! Index log record format.
//!
//! The index log (`index.log`) is a sequence of records, one per committed
//! batch. There is no file header.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//!
//! Payload:
//! ┌──────────────┬──────────────────────────────────────────────────────────┐
//! │ Count (4)    │ Count × [BucketLen (2) Bucket KeyLen (4) Key ValLen (4) Val]│
//! └──────────────┴──────────────────────────────────────────────────────────┘
//! ```
//!
//! The length field covers version + payload + CRC. The CRC covers version +
//! payload. All integers are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use haystack_core::{BatchPut, WriteBatch};
use std::io::{Cursor, Read};

/// Current index log record format version
pub const LOG_RECORD_FORMAT_VERSION: u8 = 1;

/// Records larger than this are treated as garbage when framing
pub const MAX_RECORD_LEN: usize = 1 << 30;

/// One committed batch in the index log
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogRecord {
    /// Puts in commit order
    pub puts: Vec<BatchPut>,
}

impl LogRecord {
    /// Create a record from a batch
    pub fn from_batch(batch: WriteBatch) -> Self {
        LogRecord {
            puts: batch.into_ops(),
        }
    }

    /// Serialize record to bytes.
    ///
    /// Format: length (4) + format_version (1) + payload + crc32 (4)
    pub fn to_bytes(&self) -> Result<Vec<u8>, LogRecordError> {
        let mut body = Vec::with_capacity(
            5 + self
                .puts
                .iter()
                .map(|p| 10 + p.bucket.len() + p.key.len() + p.value.len())
                .sum::<usize>(),
        );
        body.push(LOG_RECORD_FORMAT_VERSION);
        let count = u32::try_from(self.puts.len()).map_err(|_| LogRecordError::TooLarge)?;
        body.write_u32::<LittleEndian>(count)?;
        for put in &self.puts {
            let bucket_len = u16::try_from(put.bucket.len()).map_err(|_| LogRecordError::TooLarge)?;
            let key_len = u32::try_from(put.key.len()).map_err(|_| LogRecordError::TooLarge)?;
            let value_len = u32::try_from(put.value.len()).map_err(|_| LogRecordError::TooLarge)?;
            body.write_u16::<LittleEndian>(bucket_len)?;
            body.extend_from_slice(put.bucket.as_bytes());
            body.write_u32::<LittleEndian>(key_len)?;
            body.extend_from_slice(&put.key);
            body.write_u32::<LittleEndian>(value_len)?;
            body.extend_from_slice(&put.value);
        }

        let crc = compute_crc(&body);
        let total_len = body.len() + 4;
        if total_len > MAX_RECORD_LEN {
            return Err(LogRecordError::TooLarge);
        }

        let mut record = Vec::with_capacity(4 + total_len);
        record.write_u32::<LittleEndian>(total_len as u32)?;
        record.extend_from_slice(&body);
        record.write_u32::<LittleEndian>(crc)?;
        Ok(record)
    }

    /// Deserialize one record from the front of `bytes`.
    ///
    /// Returns (record, bytes_consumed) on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), LogRecordError> {
        let length = Self::framed_len(bytes)?;
        let framed = &bytes[4..4 + length];
        let (body, crc_bytes) = framed.split_at(length - 4);

        let stored = Cursor::new(crc_bytes).read_u32::<LittleEndian>()?;
        let computed = compute_crc(body);
        if stored != computed {
            return Err(LogRecordError::ChecksumMismatch {
                expected: stored,
                computed,
            });
        }

        let mut cursor = Cursor::new(body);
        let version = cursor.read_u8()?;
        if version != LOG_RECORD_FORMAT_VERSION {
            return Err(LogRecordError::UnsupportedVersion(version));
        }

        let count = cursor.read_u32::<LittleEndian>()? as usize;
        // Each put occupies at least 10 bytes, so a count beyond that is garbage
        if count > body.len() / 10 {
            return Err(LogRecordError::InvalidFormat);
        }
        let mut puts = Vec::with_capacity(count);
        for _ in 0..count {
            let bucket_len = cursor.read_u16::<LittleEndian>()? as usize;
            let bucket = read_vec(&mut cursor, bucket_len)?;
            let bucket = String::from_utf8(bucket).map_err(|_| LogRecordError::InvalidFormat)?;
            let key_len = cursor.read_u32::<LittleEndian>()? as usize;
            let key = read_vec(&mut cursor, key_len)?;
            let value_len = cursor.read_u32::<LittleEndian>()? as usize;
            let value = read_vec(&mut cursor, value_len)?;
            puts.push(BatchPut { bucket, key, value });
        }
        if cursor.position() as usize != body.len() {
            return Err(LogRecordError::InvalidFormat);
        }

        Ok((LogRecord { puts }, 4 + length))
    }

    /// Length of the record at the front of `bytes`, excluding the length
    /// prefix, once the whole record is available
    pub fn framed_len(bytes: &[u8]) -> Result<usize, LogRecordError> {
        if bytes.len() < 4 {
            return Err(LogRecordError::InsufficientData);
        }
        let length = Cursor::new(&bytes[..4]).read_u32::<LittleEndian>()? as usize;
        // Minimum: 1 byte format version + 4 bytes count + 4 bytes CRC
        if !(9..=MAX_RECORD_LEN).contains(&length) {
            return Err(LogRecordError::InvalidFormat);
        }
        if bytes.len() < 4 + length {
            return Err(LogRecordError::InsufficientData);
        }
        Ok(length)
    }
}

fn read_vec(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, LogRecordError> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(LogRecordError::InvalidFormat);
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Index log record parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum LogRecordError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Record format is invalid
    #[error("Invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// A field does not fit its length prefix
    #[error("Record field exceeds its length prefix")]
    TooLarge,

    /// Reading a fixed-width field failed
    #[error("Record I/O error: {0}")]
    Io(#[from] std::io::Error),
}

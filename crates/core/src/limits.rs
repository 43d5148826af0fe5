//! Size limits for keys and payloads
//!
//! The needle format stores `key_size` and `data_size` as `u32`, so neither
//! can exceed `u32::MAX`. Keys are further bounded so a corrupt `key_size`
//! read during a scan cannot request an unbounded allocation.

use crate::error::HaystackError;
use thiserror::Error;

/// Largest key a needle may carry by default (64 KiB)
pub const MAX_KEY_SIZE: usize = 64 * 1024;

/// Largest payload the `u32` `data_size` field can describe
pub const MAX_DATA_SIZE: usize = u32::MAX as usize;

/// Size limits for keys and payloads
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum key length in bytes (default: 64 KiB)
    pub max_key_bytes: usize,

    /// Maximum payload length in bytes (default: `u32::MAX`)
    pub max_data_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_key_bytes: MAX_KEY_SIZE,
            max_data_bytes: MAX_DATA_SIZE,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_key_bytes: 100,
            max_data_bytes: 1000,
        }
    }

    /// Validate a key
    ///
    /// Keys must be non-empty and no longer than `max_key_bytes`.
    pub fn validate_key(&self, key: &[u8]) -> Result<(), LimitError> {
        if key.is_empty() {
            return Err(LimitError::EmptyKey);
        }
        let max = self.max_key_bytes.min(MAX_KEY_SIZE);
        if key.len() > max {
            return Err(LimitError::KeyTooLong {
                actual: key.len(),
                max,
            });
        }
        Ok(())
    }

    /// Validate a payload length
    pub fn validate_data(&self, data: &[u8]) -> Result<(), LimitError> {
        let max = self.max_data_bytes.min(MAX_DATA_SIZE);
        if data.len() > max {
            return Err(LimitError::DataTooLarge {
                actual: data.len(),
                max,
            });
        }
        Ok(())
    }
}

/// Limit validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    /// Zero-length key
    #[error("Key must not be empty")]
    EmptyKey,

    /// Key exceeds maximum length
    #[error("Key too long: {actual} bytes exceeds maximum {max}")]
    KeyTooLong {
        /// Actual key length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Payload exceeds maximum length
    #[error("Data too large: {actual} bytes exceeds maximum {max}")]
    DataTooLarge {
        /// Actual payload length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },
}

impl From<LimitError> for HaystackError {
    fn from(e: LimitError) -> Self {
        HaystackError::InvalidInput(e.to_string())
    }
}

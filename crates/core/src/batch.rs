//! Atomic write sets for a [`KeyValueStore`](crate::KeyValueStore)
//!
//! A [`WriteBatch`] collects puts across any number of named buckets. The
//! engine commits the whole batch or none of it.

/// A single put inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPut {
    /// Target bucket name
    pub bucket: String,
    /// Key within the bucket
    pub key: Vec<u8>,
    /// Value to store
    pub value: Vec<u8>,
}

/// Ordered collection of puts committed as one transaction
///
/// When a batch writes the same bucket/key twice, the later put wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchPut>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put to the batch
    pub fn put(
        &mut self,
        bucket: impl Into<String>,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.ops.push(BatchPut {
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Number of puts in the batch
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if the batch has no puts
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterate puts in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &BatchPut> {
        self.ops.iter()
    }

    /// Consume the batch, returning its puts in insertion order
    pub fn into_ops(self) -> Vec<BatchPut> {
        self.ops
    }
}

impl FromIterator<BatchPut> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = BatchPut>>(iter: I) -> Self {
        WriteBatch {
            ops: iter.into_iter().collect(),
        }
    }
}

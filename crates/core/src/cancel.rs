//! Caller-supplied cancellation
//!
//! A [`CancelToken`] combines an explicit cancel flag shared between clones
//! with an optional deadline. Store operations check it between phases; a
//! fired token makes the operation return [`HaystackError::Cancelled`]
//! without committing anything.

use crate::error::{HaystackError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation flag plus optional deadline
///
/// Clones share the flag, so one thread can cancel an operation running on
/// another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that only fires when [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that fires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// A token that fires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Fire the token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the token has been cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` if the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(HaystackError::Cancelled);
        }
        Ok(())
    }
}

//! On-disk byte formats for pile files.
//!
//! Serialization lives here, separate from the logic that manages piles, so
//! the record layout can be reviewed and evolved in one place.
//!
//! # Module Structure
//!
//! - `needle`: the needle record written for every put

pub mod needle;

pub use needle::{Needle, NeedleHeader, MAGIC_FOOT, MAGIC_HEAD, NEEDLE_HEADER_SIZE, NEEDLE_OVERHEAD};

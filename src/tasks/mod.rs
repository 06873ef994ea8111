//! Background Tasks Module
//!
//! Contains background tasks that run periodically for drivers that do not
//! expire data natively.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired cache entries at configured intervals

mod cleanup;

pub use cleanup::{Janitor, Sweep};

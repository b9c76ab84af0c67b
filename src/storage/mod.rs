//! Progress persistence for Stillpoint.
//!
//! This module provides the boundary to the remote progress store, with
//! file-based and in-memory implementations, and the sync driver that
//! keeps the local projection consistent with it.

pub mod file;
pub mod memory;
pub mod sync;
pub mod traits;

pub use file::FileProgressRemote;
pub use memory::MemoryProgressRemote;
pub use sync::{resolve, ProgressSync, ReconcileReport};
pub use traits::ProgressRemote;

//! Sandbox module for isolated scene execution.
//!
//! Every attempt renders inside its own [`WorkDir`], created by a
//! [`WorkDirProvider`] and never reused, so a half-written or corrupted
//! attempt cannot leak cached state into the next one.

mod workdir;

pub use workdir::{WorkDir, WorkDirProvider};

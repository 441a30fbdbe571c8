//! This module contains utilities that are useful for testing code based on the delivery engine.
//!  They are used for testing the engine itself, but they are also exported for application
//!  testing, which is why they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod delivery;
pub mod packet;

//! Engine-wide constants and tunables.

mod constants;

pub use constants::*;

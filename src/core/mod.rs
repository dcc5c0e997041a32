//! ncoap - Core traits, types, and constants.
//!
//! This module provides the protocol constants, the error taxonomy and the
//! application-facing traits. It has no I/O and no runtime dependencies.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;

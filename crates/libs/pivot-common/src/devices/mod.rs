//! Device-specific functionality.

pub mod rpi;

//! Bootloader-specific functionality.

pub mod tryboot;

//! Common utilities shared by the Pivot tools.

pub mod boot;
pub mod devices;
pub mod fsx;

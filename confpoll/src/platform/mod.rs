//! Platform definitions for multi-vendor support.
//!
//! A platform maps a device type from the credentials file to the
//! read-only command that prints its running configuration, plus the
//! output patterns that mean the command was rejected.

mod definition;
mod registry;
pub mod vendors;

pub use definition::PlatformDefinition;
pub use registry::PlatformRegistry;

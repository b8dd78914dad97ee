//! Compile-time configuration defaults
//!
//! Generated by build.rs. Set `FIBERPOOL_CONFIG_RS=/path/to/file.rs` at build
//! time to override any of these with `pub const NAME: TYPE = VALUE;` lines.

include!(concat!(env!("OUT_DIR"), "/fiberpool_defaults.rs"));

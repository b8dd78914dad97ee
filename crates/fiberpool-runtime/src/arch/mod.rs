//! Architecture-specific context switching
//!
//! Each backend exposes the same surface:
//! - `Registers` - callee-saved state of a suspended context
//! - `init_context` - prepare a fresh stack to start at an entry function
//! - `switch_context` - save the current context and resume another

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{init_context, switch_context, Registers};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{init_context, switch_context, Registers};
    } else {
        compile_error!("fiberpool supports x86_64 and aarch64 only");
    }
}

/// Entry point a new context starts in, receiving the `arg` given to
/// `init_context`. It must never return; it ends by switching away.
pub type EntryFn = extern "C" fn(usize);

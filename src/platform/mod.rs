//! Platform shim: the register-save layout and the `switch` contract.
//!
//! This is the one part of the runtime that is inherently architecture
//! assembly (base spec §4.1, §9). Everything above this module is
//! platform-independent; it only ever touches [`Registers`] and
//! [`switch`] through this module's safe-ish wrappers.

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{init_stack, init_stack_with_arg, switch, Registers};

#[cfg(not(target_arch = "x86_64"))]
compile_error!("weft's register-switch shim is only implemented for x86_64; port src/platform before targeting another architecture");

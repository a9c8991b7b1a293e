//! The loaded image's entrypoint, typed to force the right calling
//! convention.
//!
//! On an x86_64 target whose host calling convention is not already the
//! System V AMD64 ABI (i.e. Windows), the entrypoint must be called through
//! a `sysv64` function pointer — the loaded object was built expecting that
//! ABI regardless of what the host toolchain defaults to. Everywhere else
//! the native convention already matches.
//!
//! The function pointer returns `()`, not `!`: a well-formed entrypoint
//! never returns, but a caller must still be able to observe a return
//! rather than invoke undefined behavior if one happens.

#[cfg(all(windows, target_arch = "x86_64"))]
pub type EntryFn = unsafe extern "sysv64" fn();

#[cfg(not(all(windows, target_arch = "x86_64")))]
pub type EntryFn = unsafe extern "C" fn();

//! The host library collaborator: a single shared library opened once at
//! startup, consulted for every relocation's symbol.
//!
//! The original loader did this with `__attribute__((constructor))`
//! functions that ran before `main`; here the equivalent state lives behind
//! an explicit [`HostContext::open`] the front-end calls at the top of
//! `main`, torn down by [`HostContext`]'s `Drop` impl when it goes out of
//! scope.

mod paths;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

use std::path::PathBuf;

use tmixdynld_core::SymbolResolver;

const LIBC_PATH_ENV: &str = "TMIXDYNLD_LIBC_PATH";

/// An opened host library, or the recorded reason it couldn't be opened.
/// Recording the failure rather than propagating it immediately matches the
/// source's constructor, which could not fail `main` directly: failure only
/// ever surfaces later, as [`tmixdynld_core::LoaderError::ResolverUnavailable`]
/// from the relocator.
pub struct HostContext {
    handle: Option<imp::Handle>,
}

impl HostContext {
    /// Resolves the library path (from `TMIXDYNLD_LIBC_PATH`, or the program
    /// directory plus the default relative subpath) and opens it. Failure is
    /// logged and recorded rather than returned, since the loader always
    /// continues past this point.
    pub fn open() -> Self {
        let path = match std::env::var(LIBC_PATH_ENV) {
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => program_default_path(),
        };

        let Some(path) = path else {
            log::error!("could not determine host library path");
            return HostContext { handle: None };
        };

        match imp::open(&path) {
            Ok(handle) => HostContext {
                handle: Some(handle),
            },
            Err(e) => {
                log::error!("error opening host library {}: {e}", path.display());
                HostContext { handle: None }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }
}

impl SymbolResolver for HostContext {
    fn resolve(&self, name: &str) -> Option<usize> {
        imp::resolve(self.handle.as_ref()?, name)
    }
}

fn program_default_path() -> Option<PathBuf> {
    let dir = paths::program_dir()?;
    Some(paths::join(&dir, &paths::default_libc_relative_path()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_records_unavailable_rather_than_panicking() {
        // SAFETY: test-only env mutation, no other threads touch this var.
        unsafe {
            std::env::set_var(LIBC_PATH_ENV, "/nonexistent/path/to/lib.so");
        }
        let ctx = HostContext::open();
        assert!(!ctx.is_available());
        // SAFETY: see above.
        unsafe {
            std::env::remove_var(LIBC_PATH_ENV);
        }
    }
}

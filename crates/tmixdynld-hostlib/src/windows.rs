use std::ffi::CString;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows_sys::Win32::Foundation::{FreeLibrary, HMODULE};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

pub struct Handle(HMODULE);

// SAFETY: a loaded-module handle has no thread affinity; only read via
// `GetProcAddress`.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

pub fn open(path: &Path) -> Result<Handle, String> {
    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    // SAFETY: `wide` is a nul-terminated UTF-16 string for the call's
    // duration.
    let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
    if handle.is_null() {
        return Err(std::io::Error::last_os_error().to_string());
    }
    Ok(Handle(handle))
}

pub fn resolve(handle: &Handle, name: &str) -> Option<usize> {
    let cname = CString::new(name).ok()?;
    // SAFETY: `handle.0` was returned by a successful `LoadLibraryW` and has
    // not been freed yet.
    let addr = unsafe { GetProcAddress(handle.0, cname.as_ptr() as *const u8) };
    addr.map(|f| f as usize)
}

impl Drop for Handle {
    fn drop(&mut self) {
        // SAFETY: `self.0` was returned by a successful `LoadLibraryW` and
        // is freed at most once.
        unsafe {
            FreeLibrary(self.0);
        }
    }
}

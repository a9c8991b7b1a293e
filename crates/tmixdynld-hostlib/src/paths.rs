//! Self-executable discovery and the default host-library path it anchors.

use std::path::{Path, PathBuf};

#[cfg(all(unix, not(target_os = "macos")))]
fn exe_path() -> std::io::Result<PathBuf> {
    std::fs::read_link("/proc/self/exe")
}

#[cfg(target_os = "macos")]
fn exe_path() -> std::io::Result<PathBuf> {
    use std::os::unix::ffi::OsStringExt;

    let mut len: u32 = 0;
    // SAFETY: a null buffer with length 0 only queries the required size.
    unsafe { libc::_NSGetExecutablePath(std::ptr::null_mut(), &mut len) };
    let mut buf = vec![0u8; len as usize];
    // SAFETY: `buf` is sized exactly to `len`, as just reported.
    let ret = unsafe { libc::_NSGetExecutablePath(buf.as_mut_ptr() as *mut i8, &mut len) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }
    Ok(PathBuf::from(std::ffi::OsString::from_vec(buf)))
}

#[cfg(windows)]
fn exe_path() -> std::io::Result<PathBuf> {
    use windows_sys::Win32::System::LibraryLoader::GetModuleFileNameW;

    let mut buf = vec![0u16; 4096];
    // SAFETY: `buf` is a valid, correctly-sized UTF-16 buffer.
    let len = unsafe { GetModuleFileNameW(std::ptr::null_mut(), buf.as_mut_ptr(), buf.len() as u32) };
    if len == 0 {
        return Err(std::io::Error::last_os_error());
    }
    buf.truncate(len as usize);
    Ok(PathBuf::from(String::from_utf16_lossy(&buf)))
}

/// Absolute directory containing the running executable, or `None` if the
/// platform query failed (mirrors `___tmix_progdir` possibly being null).
pub fn program_dir() -> Option<PathBuf> {
    let exe = exe_path().ok()?;
    exe.parent().map(Path::to_path_buf)
}

#[cfg(any(windows, target_os = "cygwin"))]
const LIB_SUBDIR: &str = ".";
#[cfg(not(any(windows, target_os = "cygwin")))]
const LIB_SUBDIR: &str = "../lib";

#[cfg(windows)]
const SHLIB_PREFIX: &str = "";
#[cfg(not(windows))]
const SHLIB_PREFIX: &str = "lib";

#[cfg(windows)]
const SHLIB_SUFFIX: &str = ".dll";
#[cfg(target_os = "macos")]
const SHLIB_SUFFIX: &str = ".dylib";
#[cfg(not(any(windows, target_os = "macos")))]
const SHLIB_SUFFIX: &str = ".so";

const LIBC_STEM: &str = "tmixfakelibc";

/// The relative path (from the program directory) to the default host
/// library, platform-appropriate prefix and suffix included.
pub fn default_libc_relative_path() -> PathBuf {
    Path::new(LIB_SUBDIR).join(format!("{SHLIB_PREFIX}{LIBC_STEM}{SHLIB_SUFFIX}"))
}

pub fn join(a: &Path, b: &Path) -> PathBuf {
    a.join(b)
}

use std::ffi::CString;
use std::os::raw::c_void;
use std::path::Path;

pub struct Handle(*mut c_void);

// SAFETY: a `dlopen` handle has no thread affinity; the underlying library
// is loaded once and only ever read from via `dlsym`.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

pub fn open(path: &Path) -> Result<Handle, String> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| "library path contains an interior nul byte".to_string())?;
    // SAFETY: `cpath` is a valid, nul-terminated C string for the call's
    // duration.
    let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_LAZY) };
    if handle.is_null() {
        return Err(dl_error());
    }
    Ok(Handle(handle))
}

pub fn resolve(handle: &Handle, name: &str) -> Option<usize> {
    let cname = CString::new(name).ok()?;
    // SAFETY: `handle.0` was returned by a successful `dlopen` and has not
    // been closed yet.
    let sym = unsafe { libc::dlsym(handle.0, cname.as_ptr()) };
    if sym.is_null() { None } else { Some(sym as usize) }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // SAFETY: `self.0` was returned by a successful `dlopen` and is
        // closed at most once.
        unsafe {
            libc::dlclose(self.0);
        }
    }
}

fn dl_error() -> String {
    // SAFETY: `dlerror` returns either null or a pointer to a
    // statically-owned message valid until the next `dl*` call.
    let ptr = unsafe { libc::dlerror() };
    if ptr.is_null() {
        "unknown dlopen error".to_string()
    } else {
        // SAFETY: `ptr` is a valid nul-terminated C string per `dlerror`'s
        // contract when non-null.
        unsafe { std::ffi::CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }
}

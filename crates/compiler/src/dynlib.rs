//! Dynamic symbol resolution for external words

use crate::error::CompileError;
use std::ffi::CString;

/// Address of `name` in the process or any library it has loaded.
pub fn lookup(name: &str) -> Result<usize, CompileError> {
    let symbol = CString::new(name).map_err(|_| CompileError::UnresolvedExternal(name.to_string()))?;
    // SAFETY: `symbol` is a valid NUL-terminated string for the duration of the call
    let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, symbol.as_ptr()) };
    if address.is_null() {
        return Err(CompileError::UnresolvedExternal(name.to_string()));
    }
    tracing::trace!(name, address = ?address, "resolved external");
    Ok(address as usize)
}

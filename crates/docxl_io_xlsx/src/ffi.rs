//! C call boundary: build a workbook from NUL-terminated document text and
//! release the returned buffer.

use std::ffi::{CStr, CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use crate::writer::build_workbook_base64;

/// Build a workbook and return it as NUL-terminated base64 text.
///
/// Returns null on failure; the cause is logged. A non-null result must be
/// released with [`docxl_free_cstring`].
///
/// # Safety
///
/// `text` must be null or point to a valid NUL-terminated string that stays
/// alive for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docxl_build_workbook(text: *const c_char) -> *mut c_char {
    if text.is_null() {
        log::error!("docxl_build_workbook: input pointer is null");
        return ptr::null_mut();
    }
    let text = match unsafe { CStr::from_ptr(text) }.to_str() {
        Ok(val) => val,
        Err(err) => {
            log::error!("docxl_build_workbook: input is not UTF-8: {err}");
            return ptr::null_mut();
        }
    };

    let encoded = match catch_unwind(AssertUnwindSafe(|| build_workbook_base64(text))) {
        Ok(Ok(val)) => val,
        Ok(Err(err)) => {
            log::error!("docxl_build_workbook: {err}");
            return ptr::null_mut();
        }
        Err(_) => {
            log::error!("docxl_build_workbook: build panicked");
            return ptr::null_mut();
        }
    };
    match CString::new(encoded) {
        Ok(val) => val.into_raw(),
        Err(err) => {
            log::error!("docxl_build_workbook: output holds a NUL byte: {err}");
            ptr::null_mut()
        }
    }
}

/// Release a buffer returned by [`docxl_build_workbook`]. Null is a no-op.
///
/// # Safety
///
/// `text` must be null or a pointer returned by [`docxl_build_workbook`] that
/// has not been released yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docxl_free_cstring(text: *mut c_char) {
    if text.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(text) });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_free_round_trip() {
        let text = CString::new(r#"{"content": {"S": {"Data": [["x", 1]]}}}"#).unwrap();
        let encoded = unsafe { docxl_build_workbook(text.as_ptr()) };
        assert!(!encoded.is_null());
        let value = unsafe { CStr::from_ptr(encoded) }.to_str().unwrap().to_string();
        assert!(value.starts_with("UEsDB"));
        unsafe { docxl_free_cstring(encoded) };
    }

    #[test]
    fn test_build_returns_null_on_error() {
        let text = CString::new(r#"{"sheet_order": ["missing"], "content": {}}"#).unwrap();
        assert!(unsafe { docxl_build_workbook(text.as_ptr()) }.is_null());
        assert!(unsafe { docxl_build_workbook(ptr::null()) }.is_null());
        unsafe { docxl_free_cstring(ptr::null_mut()) };
    }
}

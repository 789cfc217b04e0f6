//! Statement execution and the row/value accessors.

use std::ffi::CString;
use std::os::raw::c_char;

use trellis_engine::Params;

use crate::database::{handle_ref, out_ptr};
use crate::error::{TrellisStatus, guarded, guarded_or, set_failure, set_last_error, str_from_ptr};
use crate::types::{TrellisResult, TrellisRow, TrellisSession, TrellisValue, TrellisValueType, parse_params};

fn run(session: &TrellisSession, query: &str, params: &Params, out: *mut *mut TrellisResult) -> TrellisStatus {
    match session.inner.lock().execute_with_params(query, params) {
        Ok(result) => {
            // SAFETY: Callers check out for null before running.
            unsafe { *out = Box::into_raw(Box::new(TrellisResult::new(result))) };
            TrellisStatus::Ok
        }
        Err(e) => set_failure(&e),
    }
}

/// Executes a statement. On success `*out` receives a result cursor to free
/// with `trellis_free_result`; statements without output yield an empty one.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_execute(
    session: *const TrellisSession,
    query: *const c_char,
    out: *mut *mut TrellisResult,
) -> TrellisStatus {
    guarded(|| {
        let out = out_ptr!(out);
        let session = handle_ref!(session, "session");
        match str_from_ptr(query) {
            Ok(query) => run(session, query, &Params::new(), out),
            Err(status) => status,
        }
    })
}

/// Executes a statement with parameters given as a JSON object, e.g.
/// `{"name": "Ann", "age": 30}`. NULL `params_json` means no parameters.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_execute_with_params(
    session: *const TrellisSession,
    query: *const c_char,
    params_json: *const c_char,
    out: *mut *mut TrellisResult,
) -> TrellisStatus {
    guarded(|| {
        let out = out_ptr!(out);
        let session = handle_ref!(session, "session");
        let query = match str_from_ptr(query) {
            Ok(q) => q,
            Err(status) => return status,
        };
        let params = if params_json.is_null() {
            Params::new()
        } else {
            let json = match str_from_ptr(params_json) {
                Ok(j) => j,
                Err(status) => return status,
            };
            match parse_params(json) {
                Ok(p) => p,
                Err(msg) => return set_last_error(&msg, TrellisStatus::ErrorInvalidArgument),
            }
        };
        run(session, query, &params, out)
    })
}

/// Returns true while another row can be fetched. False on NULL, on
/// exhaustion, after a failure and once the database is closed.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_result_has_next(result: *const TrellisResult) -> bool {
    guarded_or(false, || {
        if result.is_null() {
            return false;
        }
        // SAFETY: Caller guarantees a valid pointer from trellis_execute*.
        unsafe { &*result }.inner.lock().has_next()
    })
}

/// Fetches the next row into `*out`, to free with `trellis_free_row`.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_result_get_next(result: *const TrellisResult, out: *mut *mut TrellisRow) -> TrellisStatus {
    guarded(|| {
        let out = out_ptr!(out);
        let result = handle_ref!(result, "result");
        match result.inner.lock().get_next() {
            Ok(row) => {
                // SAFETY: out was checked for null above.
                unsafe { *out = Box::into_raw(Box::new(TrellisRow { inner: row })) };
                TrellisStatus::Ok
            }
            Err(e) => set_failure(&e),
        }
    })
}

/// Number of result columns; 0 for NULL.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_result_column_count(result: *const TrellisResult) -> usize {
    if result.is_null() {
        return 0;
    }
    // SAFETY: Caller guarantees a valid pointer from trellis_execute*.
    unsafe { &*result }.column_names.len()
}

/// Name of column `index`, or NULL when out of range. The string is owned
/// by the result and must NOT be freed.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_result_column_name(result: *const TrellisResult, index: usize) -> *const c_char {
    if result.is_null() {
        return std::ptr::null();
    }
    // SAFETY: Caller guarantees a valid pointer from trellis_execute*.
    unsafe { &*result }
        .column_names
        .get(index)
        .map_or(std::ptr::null(), |name| name.as_ptr())
}

/// Copies cell `index` of a row into `*out`, to free with `trellis_free_value`.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_row_get_value(row: *const TrellisRow, index: usize, out: *mut *mut TrellisValue) -> TrellisStatus {
    guarded(|| {
        let out = out_ptr!(out);
        let row = handle_ref!(row, "row");
        match row.inner.get_value(index) {
            Ok(value) => {
                let value = TrellisValue { inner: value.clone() };
                // SAFETY: out was checked for null above.
                unsafe { *out = Box::into_raw(Box::new(value)) };
                TrellisStatus::Ok
            }
            Err(e) => set_failure(&e),
        }
    })
}

/// Renders a value in its canonical form. Free the string with
/// `trellis_free_string`. Returns NULL only for a NULL value pointer.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_value_to_string(value: *const TrellisValue) -> *mut c_char {
    guarded_or(std::ptr::null_mut(), || {
        if value.is_null() {
            set_last_error("Null value pointer", TrellisStatus::ErrorNullPointer);
            return std::ptr::null_mut();
        }
        // SAFETY: Caller guarantees a valid pointer from trellis_row_get_value.
        let text = unsafe { &*value }.inner.to_string();
        CString::new(text.replace('\0', "")).unwrap_or_default().into_raw()
    })
}

/// Type tag of a value; `Null` for a NULL pointer.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_value_type(value: *const TrellisValue) -> TrellisValueType {
    if value.is_null() {
        return TrellisValueType::Null;
    }
    // SAFETY: Caller guarantees a valid pointer from trellis_row_get_value.
    TrellisValueType::from(&unsafe { &*value }.inner)
}

/// Frees a result cursor, releasing its snapshot.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_free_result(result: *mut TrellisResult) {
    if !result.is_null() {
        // SAFETY: We take ownership back and drop it.
        unsafe { drop(Box::from_raw(result)) };
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn trellis_free_row(row: *mut TrellisRow) {
    if !row.is_null() {
        // SAFETY: We take ownership back and drop it.
        unsafe { drop(Box::from_raw(row)) };
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn trellis_free_value(value: *mut TrellisValue) {
    if !value.is_null() {
        // SAFETY: We take ownership back and drop it.
        unsafe { drop(Box::from_raw(value)) };
    }
}

/// Frees a string returned by `trellis_value_to_string`.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: The string was created by CString::into_raw in this library.
        unsafe { drop(CString::from_raw(s)) };
    }
}

//! Thread-local error handling for the C layer.
//!
//! Functions return a status code and leave the details of the last failure
//! in thread-local storage, the way SQLite and libgit2 do.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};

use trellis_engine::{ErrorKind, Failure};

/// Status codes returned by C functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrellisStatus {
    Ok = 0,
    ErrorStorageOpen = 1,
    ErrorInvalidHandle = 2,
    ErrorSyntax = 3,
    ErrorBinding = 4,
    ErrorExecution = 5,
    ErrorWriteConflict = 6,
    ErrorFetch = 7,
    ErrorCursorExhausted = 8,
    ErrorIndexOutOfRange = 9,
    ErrorNullPointer = 10,
    ErrorInvalidUtf8 = 11,
    ErrorInvalidArgument = 12,
    ErrorPanic = 13,
}

impl From<ErrorKind> for TrellisStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::StorageOpen => Self::ErrorStorageOpen,
            ErrorKind::InvalidHandle => Self::ErrorInvalidHandle,
            ErrorKind::Syntax => Self::ErrorSyntax,
            ErrorKind::Binding => Self::ErrorBinding,
            ErrorKind::Execution => Self::ErrorExecution,
            ErrorKind::WriteConflict => Self::ErrorWriteConflict,
            ErrorKind::Fetch => Self::ErrorFetch,
            ErrorKind::CursorExhausted => Self::ErrorCursorExhausted,
            ErrorKind::IndexOutOfRange => Self::ErrorIndexOutOfRange,
        }
    }
}

struct LastError {
    message: CString,
    stage: Option<CString>,
    kind: CString,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

fn c_string(s: &str) -> CString {
    // Interior NULs cannot cross the boundary; cut the message there.
    let end = s.find('\0').unwrap_or(s.len());
    CString::new(&s[..end]).unwrap_or_default()
}

fn store(message: &str, stage: Option<&str>, kind: &str) {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(LastError {
            message: c_string(message),
            stage: stage.map(c_string),
            kind: c_string(kind),
        });
    });
}

/// Records an error raised by the binding itself (bad pointer, bad argument).
pub(crate) fn set_last_error(msg: &str, status: TrellisStatus) -> TrellisStatus {
    let kind = match status {
        TrellisStatus::ErrorNullPointer => "NullPointerError",
        TrellisStatus::ErrorInvalidUtf8 => "InvalidUtf8Error",
        TrellisStatus::ErrorPanic => "PanicError",
        _ => "InvalidArgumentError",
    };
    store(msg, None, kind);
    status
}

/// Records a library failure and returns the matching status.
pub(crate) fn set_failure(failure: &Failure) -> TrellisStatus {
    store(&failure.message(), Some(failure.stage().as_str()), failure.kind().as_str());
    TrellisStatus::from(failure.kind())
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Runs `f` with a clean error slot, turning a panic into [`TrellisStatus::ErrorPanic`].
pub(crate) fn guarded(f: impl FnOnce() -> TrellisStatus) -> TrellisStatus {
    guarded_or(TrellisStatus::ErrorPanic, f)
}

/// Like [`guarded`] for functions that do not return a status: a panic
/// yields `on_panic` and leaves the details in the error slot.
pub(crate) fn guarded_or<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    clear_last_error();
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%detail, "panic caught at the C boundary");
            set_last_error(&format!("internal panic: {detail}"), TrellisStatus::ErrorPanic);
            on_panic
        }
    }
}

/// Extracts a `&str` from a C string pointer.
pub(crate) fn str_from_ptr<'a>(ptr: *const c_char) -> Result<&'a str, TrellisStatus> {
    if ptr.is_null() {
        return Err(set_last_error("Null string pointer", TrellisStatus::ErrorNullPointer));
    }
    // SAFETY: Caller guarantees ptr is a valid, NUL-terminated C string.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| set_last_error("Invalid UTF-8 in string", TrellisStatus::ErrorInvalidUtf8))
}

/// Returns the last error message, or null if there is none.
///
/// The pointer stays valid until the next call on this thread and must NOT
/// be freed.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(std::ptr::null(), |e| e.message.as_ptr()))
}

/// Returns the stage of the last failure (`"open"`, `"connect"`, `"compile"`,
/// `"execute"`, `"fetch"`), or null when there is no failure or it was raised
/// by the binding itself.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_last_error_stage() -> *const c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .and_then(|e| e.stage.as_ref())
            .map_or(std::ptr::null(), |s| s.as_ptr())
    })
}

/// Returns the kind of the last failure, e.g. `"BindingError"`, or null.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_last_error_kind() -> *const c_char {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(std::ptr::null(), |e| e.kind.as_ptr()))
}

/// Clears the last error.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_clear_error() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use trellis_engine::Stage;

    use super::*;

    fn read(ptr: *const c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string())
    }

    #[test]
    fn test_no_error_is_null() {
        clear_last_error();
        assert!(trellis_last_error().is_null());
        assert!(trellis_last_error_stage().is_null());
        assert!(trellis_last_error_kind().is_null());
    }

    #[test]
    fn test_failure_is_recorded() {
        let failure = Failure::new(
            Stage::Fetch,
            trellis_common::utils::error::Error::CursorExhausted,
        );
        assert_eq!(set_failure(&failure), TrellisStatus::ErrorCursorExhausted);
        assert_eq!(read(trellis_last_error_stage()).as_deref(), Some("fetch"));
        assert_eq!(read(trellis_last_error_kind()).as_deref(), Some("CursorExhaustedError"));
        assert!(read(trellis_last_error()).is_some());

        trellis_clear_error();
        assert!(trellis_last_error().is_null());
    }

    #[test]
    fn test_panic_is_caught() {
        let status = guarded(|| panic!("boom"));
        assert_eq!(status, TrellisStatus::ErrorPanic);
        assert_eq!(read(trellis_last_error()).as_deref(), Some("internal panic: boom"));
        assert!(trellis_last_error_stage().is_null());
    }

    #[test]
    fn test_interior_nul_is_cut() {
        set_last_error("bad\0tail", TrellisStatus::ErrorInvalidArgument);
        assert_eq!(read(trellis_last_error()).as_deref(), Some("bad"));
    }

    #[test]
    fn test_null_string_pointer() {
        assert_eq!(str_from_ptr(std::ptr::null()).unwrap_err(), TrellisStatus::ErrorNullPointer);
    }
}

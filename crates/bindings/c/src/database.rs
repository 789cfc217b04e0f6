//! Handle lifecycle: configuration, open, connect, close and free.

use std::os::raw::c_char;

use trellis_engine::{Config, Database};

use crate::error::{TrellisStatus, guarded, set_failure, set_last_error, str_from_ptr};
use crate::types::{TrellisConfig, TrellisDatabase, TrellisSession};

/// Dereferences an opaque handle, returning `ErrorNullPointer` on null.
macro_rules! handle_ref {
    ($ptr:expr, $what:literal) => {{
        if $ptr.is_null() {
            return set_last_error(concat!("Null ", $what, " pointer"), TrellisStatus::ErrorNullPointer);
        }
        // SAFETY: Caller guarantees the pointer came from this library and was not freed.
        unsafe { &*$ptr }
    }};
}
pub(crate) use handle_ref;

/// Checks an out-parameter before any work is done.
macro_rules! out_ptr {
    ($ptr:expr) => {{
        if $ptr.is_null() {
            return set_last_error("Null output pointer", TrellisStatus::ErrorNullPointer);
        }
        $ptr
    }};
}
pub(crate) use out_ptr;

/// Returns the default configuration.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_default_config() -> TrellisConfig {
    TrellisConfig::from(&Config::default())
}

/// Opens (or creates) the database at `path`. Pass `":memory:"` or NULL for
/// an in-memory database and NULL `config` for the defaults.
///
/// On success `*out` receives a handle to free with `trellis_free_database`.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_open(
    path: *const c_char,
    config: *const TrellisConfig,
    out: *mut *mut TrellisDatabase,
) -> TrellisStatus {
    guarded(|| {
        let out = out_ptr!(out);
        let path = if path.is_null() {
            ":memory:"
        } else {
            match str_from_ptr(path) {
                Ok(p) => p,
                Err(status) => return status,
            }
        };
        let config = if config.is_null() {
            Config::default()
        } else {
            // SAFETY: Caller guarantees a valid, initialized TrellisConfig.
            Config::from(unsafe { &*config })
        };
        match Database::open(path, config) {
            Ok(db) => {
                // SAFETY: out was checked for null above.
                unsafe { *out = Box::into_raw(Box::new(TrellisDatabase { inner: db })) };
                TrellisStatus::Ok
            }
            Err(e) => set_failure(&e),
        }
    })
}

/// Creates a session on an open database.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_connect(db: *const TrellisDatabase, out: *mut *mut TrellisSession) -> TrellisStatus {
    guarded(|| {
        let out = out_ptr!(out);
        let db = handle_ref!(db, "database");
        match db.inner.connect() {
            Ok(session) => {
                let session = TrellisSession {
                    inner: parking_lot::Mutex::new(session),
                };
                // SAFETY: out was checked for null above.
                unsafe { *out = Box::into_raw(Box::new(session)) };
                TrellisStatus::Ok
            }
            Err(e) => set_failure(&e),
        }
    })
}

/// Closes the database. Idempotent; NULL is accepted and ignored.
///
/// Sessions and results created from this handle stay allocated but every
/// later call on them fails with `ErrorInvalidHandle`.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_close(db: *const TrellisDatabase) -> TrellisStatus {
    guarded(|| {
        if db.is_null() {
            return TrellisStatus::Ok;
        }
        // SAFETY: Caller guarantees a valid pointer from trellis_open.
        let db = unsafe { &*db };
        match db.inner.close() {
            Ok(()) => TrellisStatus::Ok,
            Err(e) => set_failure(&e),
        }
    })
}

/// Frees a database handle, closing it first if needed.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_free_database(db: *mut TrellisDatabase) {
    if !db.is_null() {
        // SAFETY: We take ownership back and drop it.
        unsafe { drop(Box::from_raw(db)) };
    }
}

/// Frees a session, rolling back its open transaction.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_free_session(session: *mut TrellisSession) {
    if !session.is_null() {
        // SAFETY: We take ownership back and drop it.
        unsafe { drop(Box::from_raw(session)) };
    }
}

/// Returns the library version. The pointer is static and must NOT be freed.
#[unsafe(no_mangle)]
pub extern "C" fn trellis_version() -> *const c_char {
    // Include a trailing NUL in the byte literal.
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr().cast::<c_char>()
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};
    use std::ptr;

    use super::*;
    use crate::error::{trellis_last_error_kind, trellis_last_error_stage};

    fn text(ptr: *const c_char) -> String {
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
    }

    #[test]
    fn test_version() {
        assert_eq!(text(trellis_version()), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_open_connect_close() {
        let path = CString::new(":memory:").unwrap();
        let mut db = ptr::null_mut();
        assert_eq!(trellis_open(path.as_ptr(), ptr::null(), &mut db), TrellisStatus::Ok);
        assert!(!db.is_null());

        let mut session = ptr::null_mut();
        assert_eq!(trellis_connect(db, &mut session), TrellisStatus::Ok);
        assert!(!session.is_null());

        assert_eq!(trellis_close(db), TrellisStatus::Ok);
        assert_eq!(trellis_close(db), TrellisStatus::Ok);
        assert_eq!(trellis_close(ptr::null()), TrellisStatus::Ok);

        let mut again = ptr::null_mut();
        assert_eq!(trellis_connect(db, &mut again), TrellisStatus::ErrorInvalidHandle);
        assert_eq!(text(trellis_last_error_stage()), "connect");
        assert!(again.is_null());

        trellis_free_session(session);
        trellis_free_database(db);
    }

    #[test]
    fn test_open_with_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("ro").to_str().unwrap()).unwrap();
        let mut config = trellis_default_config();
        config.read_only = true;
        let mut db = ptr::null_mut();
        let status = trellis_open(path.as_ptr(), &config, &mut db);
        assert_eq!(status, TrellisStatus::ErrorStorageOpen);
        assert_eq!(text(trellis_last_error_stage()), "open");
        assert_eq!(text(trellis_last_error_kind()), "StorageOpenError");
        assert!(db.is_null());
    }

    #[test]
    fn test_null_path_opens_in_memory() {
        let mut db = ptr::null_mut();
        assert_eq!(trellis_open(ptr::null(), ptr::null(), &mut db), TrellisStatus::Ok);
        assert!(!db.is_null());
        assert!(unsafe { &*db }.inner.is_in_memory());
        assert_eq!(trellis_close(db), TrellisStatus::Ok);
        trellis_free_database(db);
    }

    #[test]
    fn test_null_arguments() {
        let path = CString::new(":memory:").unwrap();
        assert_eq!(
            trellis_open(path.as_ptr(), ptr::null(), ptr::null_mut()),
            TrellisStatus::ErrorNullPointer
        );
        let mut session = ptr::null_mut();
        assert_eq!(trellis_connect(ptr::null(), &mut session), TrellisStatus::ErrorNullPointer);
        assert!(trellis_last_error_stage().is_null());
        trellis_free_database(ptr::null_mut());
        trellis_free_session(ptr::null_mut());
    }
}

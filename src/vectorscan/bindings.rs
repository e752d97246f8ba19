//! RAII wrappers over the native vectorscan handles.
//!
//! Each wrapper owns exactly one native handle and frees it exactly once on
//! drop; no handle is ever read after release. Match callbacks cross the
//! FFI boundary through a trampoline that must never panic or unwind.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::Arc;

use libc::{c_char, c_int, c_uint, c_void};
use vectorscan_rs_sys as vs;

use super::{assert_success, VectorscanError, VectorscanErrorKind};

/// Database compile mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Whole-buffer scanning; matches cannot span scan calls.
    Block,
    /// Streaming scanning; matches may span chunk boundaries.
    Stream,
}

impl ScanMode {
    fn as_raw(self) -> c_uint {
        match self {
            Self::Block => vs::HS_MODE_BLOCK as c_uint,
            Self::Stream => vs::HS_MODE_STREAM as c_uint,
        }
    }
}

/// A match reported by the native scan loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchEvent {
    /// Pattern id assigned at compile time (the signature identifier).
    pub identifier: u32,
    /// Match start offset when the engine tracks it, otherwise 0.
    pub start: u64,
    /// Offset one past the last matched byte.
    pub end: u64,
}

/// Callback invoked per match. Returning `true` asks the engine to stop
/// scanning (surfaced as [`VectorscanErrorKind::ScanTerminated`]).
pub type MatchHandler<'a> = dyn FnMut(MatchEvent) -> bool + 'a;

/// A compiled, immutable pattern database.
///
/// Owns one `hs_database_t`, freed on drop. Immutable after compilation and
/// therefore shareable across threads; each scanning thread must still use
/// its own [`Scratch`].
#[derive(Debug)]
pub struct Database {
    db: *mut vs::hs_database_t,
}

// Safe because hs_database_t is immutable after compilation, and we require
// per-thread scratch.
unsafe impl Send for Database {}
unsafe impl Sync for Database {}

impl Drop for Database {
    fn drop(&mut self) {
        unsafe {
            if !self.db.is_null() {
                vs::hs_free_database(self.db);
            }
        }
    }
}

impl Database {
    /// Compiles `patterns` (identifier -> expression) with uniform `flags`.
    ///
    /// Pattern ids in the database are the map keys, so match events report
    /// signature identifiers directly. Compilation failure carries the
    /// compiler's diagnostic and the index of the rejected expression in
    /// identifier order.
    pub fn compile(
        patterns: &BTreeMap<u32, String>,
        mode: ScanMode,
        flags: u32,
    ) -> Result<Self, VectorscanError> {
        if patterns.is_empty() {
            return Err(VectorscanError::Runtime(VectorscanErrorKind::Invalid));
        }

        let mut c_patterns: Vec<CString> = Vec::with_capacity(patterns.len());
        let mut ids: Vec<c_uint> = Vec::with_capacity(patterns.len());
        for (&id, rule) in patterns {
            let c_pat = CString::new(rule.as_str()).map_err(|_| VectorscanError::Compiler {
                message: format!("pattern for signature {id} contains an interior NUL byte"),
                expression: ids.len() as i32,
            })?;
            c_patterns.push(c_pat);
            ids.push(id as c_uint);
        }
        let expr_ptrs: Vec<*const c_char> = c_patterns.iter().map(|p| p.as_ptr()).collect();
        let flag_vec: Vec<c_uint> = vec![flags as c_uint; c_patterns.len()];

        let mut platform = MaybeUninit::<vs::hs_platform_info_t>::zeroed();
        unsafe {
            // Best-effort: on failure the library falls back to defaults.
            let _ = vs::hs_populate_platform(platform.as_mut_ptr());
        }
        let platform = unsafe { platform.assume_init() };

        let mut db: *mut vs::hs_database_t = ptr::null_mut();
        let mut compile_err: *mut vs::hs_compile_error_t = ptr::null_mut();
        let rc = unsafe {
            vs::hs_compile_multi(
                expr_ptrs.as_ptr(),
                flag_vec.as_ptr(),
                ids.as_ptr(),
                expr_ptrs.len() as c_uint,
                mode.as_raw(),
                &platform as *const vs::hs_platform_info_t,
                &mut db as *mut *mut vs::hs_database_t,
                &mut compile_err as *mut *mut vs::hs_compile_error_t,
            )
        };

        if rc != vs::HS_SUCCESS as c_int {
            if rc == vs::HS_COMPILER_ERROR as c_int && !compile_err.is_null() {
                let (message, expression) = unsafe {
                    let expression = (*compile_err).expression;
                    let message = if (*compile_err).message.is_null() {
                        "hs_compile_multi failed (null error message)".to_string()
                    } else {
                        std::ffi::CStr::from_ptr((*compile_err).message)
                            .to_string_lossy()
                            .into_owned()
                    };
                    vs::hs_free_compile_error(compile_err);
                    (message, expression)
                };
                return Err(VectorscanError::Compiler {
                    message,
                    expression,
                });
            }
            if !compile_err.is_null() {
                unsafe { vs::hs_free_compile_error(compile_err) };
            }
            return Err(VectorscanError::Runtime(VectorscanErrorKind::from_raw(rc)));
        }

        Ok(Self { db })
    }

    /// Serializes the database to a byte blob that round-trips through
    /// [`Database::deserialize`] on the same library version, mode, and
    /// platform.
    pub fn serialize(&self) -> Result<Vec<u8>, VectorscanError> {
        let mut bytes_ptr: *mut c_char = ptr::null_mut();
        let mut bytes_len: usize = 0;
        let rc = unsafe {
            vs::hs_serialize_database(
                self.db,
                &mut bytes_ptr as *mut *mut c_char,
                &mut bytes_len as *mut usize,
            )
        };
        if rc != vs::HS_SUCCESS as c_int || bytes_ptr.is_null() || bytes_len == 0 {
            if !bytes_ptr.is_null() {
                unsafe { libc::free(bytes_ptr.cast()) };
            }
            return Err(VectorscanError::Runtime(VectorscanErrorKind::from_raw(rc)));
        }
        // SAFETY: the library allocated bytes_len bytes at bytes_ptr; we copy
        // them out and free the native buffer exactly once.
        let blob = unsafe { std::slice::from_raw_parts(bytes_ptr.cast::<u8>(), bytes_len) }.to_vec();
        unsafe { libc::free(bytes_ptr.cast()) };
        Ok(blob)
    }

    /// Deserializes a blob produced by [`Database::serialize`].
    ///
    /// Fails closed on any mismatch: incompatible library version, platform,
    /// or corrupt input yield the corresponding [`VectorscanErrorKind`],
    /// never a silently wrong database.
    pub fn deserialize(blob: &[u8]) -> Result<Self, VectorscanError> {
        let mut db: *mut vs::hs_database_t = ptr::null_mut();
        let rc = unsafe {
            vs::hs_deserialize_database(
                blob.as_ptr().cast::<c_char>(),
                blob.len(),
                &mut db as *mut *mut vs::hs_database_t,
            )
        };
        if rc != vs::HS_SUCCESS as c_int || db.is_null() {
            return Err(VectorscanError::Runtime(VectorscanErrorKind::from_raw(rc)));
        }
        Ok(Self { db })
    }

    /// Allocates a scratch space bound to this database.
    pub fn alloc_scratch(&self) -> Result<Scratch, VectorscanError> {
        let mut scratch: *mut vs::hs_scratch_t = ptr::null_mut();
        let rc =
            unsafe { vs::hs_alloc_scratch(self.db, &mut scratch as *mut *mut vs::hs_scratch_t) };
        assert_success(rc)?;
        Ok(Scratch {
            scratch,
            db: self.db,
        })
    }

    fn db_ptr(&self) -> *mut vs::hs_database_t {
        self.db
    }
}

/// Per-thread scratch space bound to a specific database.
///
/// Must only be used with the database it was allocated for and must not be
/// shared across threads. Dropping it releases the underlying
/// `hs_scratch_t`.
#[derive(Debug)]
pub struct Scratch {
    scratch: *mut vs::hs_scratch_t,
    /// Database this scratch was allocated for (binding check only).
    db: *mut vs::hs_database_t,
}

impl Drop for Scratch {
    fn drop(&mut self) {
        unsafe {
            if !self.scratch.is_null() {
                vs::hs_free_scratch(self.scratch);
            }
        }
    }
}

/// A streaming scan session: one scratch plus one open stream, both bound
/// to a shared database.
///
/// Confined to the creating thread (raw handles are not `Send`). The stream
/// is reusable across files via [`StreamScanner::reset`], which clears
/// stream state without reallocating.
#[derive(Debug)]
pub struct StreamScanner {
    database: Arc<Database>,
    scratch: Scratch,
    stream: *mut vs::hs_stream_t,
}

impl StreamScanner {
    /// Opens a stream and allocates scratch for `database`.
    ///
    /// Fails with [`VectorscanErrorKind::DbModeError`] when the database was
    /// not compiled in stream mode.
    pub fn new(database: Arc<Database>) -> Result<Self, VectorscanError> {
        let scratch = database.alloc_scratch()?;
        debug_assert_eq!(scratch.db, database.db_ptr());
        let mut stream: *mut vs::hs_stream_t = ptr::null_mut();
        let rc = unsafe { vs::hs_open_stream(database.db_ptr(), 0, &mut stream) };
        assert_success(rc)?;
        Ok(Self {
            database,
            scratch,
            stream,
        })
    }

    /// Resets stream state for a new logical stream without reallocating
    /// the stream or scratch. Pending end-of-stream matches are discarded.
    pub fn reset(&mut self) -> Result<(), VectorscanError> {
        let rc = unsafe {
            vs::hs_reset_stream(self.stream, 0, self.scratch.scratch, None, ptr::null_mut())
        };
        assert_success(rc)
    }

    /// Scans one chunk of the current stream, delivering matches to
    /// `handler`. A handler returning `true` stops the scan; that stop is
    /// reported as a [`VectorscanErrorKind::ScanTerminated`] error, which
    /// callers treat as the benign early-stop signal.
    ///
    /// The handler must not panic: it is invoked from a native callback and
    /// unwinding across the FFI boundary is undefined behavior.
    pub fn scan(
        &mut self,
        data: &[u8],
        handler: &mut MatchHandler<'_>,
    ) -> Result<(), VectorscanError> {
        let len_u32: c_uint = data
            .len()
            .try_into()
            .map_err(|_| VectorscanError::BufferTooLarge(data.len()))?;
        let mut ctx = CallbackCtx { handler };
        let rc = unsafe {
            vs::hs_scan_stream(
                self.stream,
                data.as_ptr().cast::<c_char>(),
                len_u32,
                0,
                self.scratch.scratch,
                Some(on_match_trampoline),
                (&mut ctx as *mut CallbackCtx<'_, '_>).cast::<c_void>(),
            )
        };
        assert_success(rc)
    }

    /// The database this scanner is bound to.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

impl Drop for StreamScanner {
    fn drop(&mut self) {
        // Close before the scratch is freed; pending end-of-stream matches
        // are discarded.
        unsafe {
            if !self.stream.is_null() {
                let _ = vs::hs_close_stream(self.stream, self.scratch.scratch, None, ptr::null_mut());
            }
        }
    }
}

/// Callback context for `hs_scan_stream`.
///
/// Safety invariants:
/// - `handler` remains valid and is not accessed concurrently for the
///   duration of the scan call.
/// - The trampoline never panics or unwinds across the FFI boundary.
struct CallbackCtx<'h, 'a> {
    handler: &'h mut MatchHandler<'a>,
}

extern "C" fn on_match_trampoline(
    id: c_uint,
    from: u64,
    to: u64,
    _flags: c_uint,
    ctx: *mut c_void,
) -> c_int {
    // Absolutely no panics across FFI.
    let c = unsafe { &mut *(ctx as *mut CallbackCtx<'_, '_>) };
    let terminate = (c.handler)(MatchEvent {
        identifier: id as u32,
        start: from,
        end: to,
    });
    if terminate {
        1
    } else {
        0
    }
}

//! Vectorscan backend plumbing: error model, compile flags, and RAII
//! wrappers over the native library.
//!
//! The contract this module satisfies:
//! - A compiled [`Database`] owns exactly one `hs_database_t`, freed once on
//!   drop, immutable after compilation and shareable across threads.
//! - A [`StreamScanner`] owns one scratch allocation and one open stream,
//!   both bound to a single database and confined to the thread that
//!   created them.
//! - Every native return code maps into the closed [`VectorscanErrorKind`]
//!   set; codes the wrapper does not recognize normalize to
//!   [`VectorscanErrorKind::UnknownError`] instead of leaking raw integers.
//! - Serialized databases fail closed on version, platform, or mode
//!   mismatch when deserialized.

mod bindings;

pub use bindings::{Database, MatchEvent, ScanMode, Scratch, StreamScanner};

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::sync::{Arc, OnceLock};

use libc::c_int;
use thiserror::Error;
use vectorscan_rs_sys as vs;

/// Per-pattern compile flags, mirroring the native `HS_FLAG_*` values.
pub mod flags {
    use vectorscan_rs_sys as vs;

    pub const CASELESS: u32 = vs::HS_FLAG_CASELESS;
    pub const DOTALL: u32 = vs::HS_FLAG_DOTALL;
    pub const MULTILINE: u32 = vs::HS_FLAG_MULTILINE;
    pub const SINGLEMATCH: u32 = vs::HS_FLAG_SINGLEMATCH;
    pub const ALLOWEMPTY: u32 = vs::HS_FLAG_ALLOWEMPTY;
    pub const UTF8: u32 = vs::HS_FLAG_UTF8;
    pub const PREFILTER: u32 = vs::HS_FLAG_PREFILTER;
}

/// The fixed set of native failure codes.
///
/// [`VectorscanErrorKind::ScanTerminated`] is the benign early-stop signal
/// raised when a match callback requests termination; every other member is
/// a genuine failure of the current operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VectorscanErrorKind {
    /// A parameter was invalid (null pointer, bad mode, empty pattern set).
    Invalid,
    /// Memory allocation failed inside the library.
    Nomem,
    /// Scan stopped early because a callback returned nonzero.
    ScanTerminated,
    /// Pattern compilation failed.
    CompilerError,
    /// Serialized database was built by an incompatible library version.
    DbVersionError,
    /// Serialized database was built for an incompatible platform.
    DbPlatformError,
    /// Database mode does not match the requested operation.
    DbModeError,
    /// A buffer was not correctly aligned.
    BadAlign,
    /// The library's allocator returned unusable memory.
    BadAlloc,
    /// The scratch region is already in use by another scan.
    ScratchInUse,
    /// The current CPU lacks features the database requires.
    ArchError,
    /// A provided output buffer was too small.
    InsufficientSpace,
    /// Any return code outside the recognized set.
    UnknownError,
}

impl VectorscanErrorKind {
    /// Maps a raw `hs_error_t` to the closed kind set. Unrecognized codes
    /// become [`VectorscanErrorKind::UnknownError`].
    pub(crate) fn from_raw(rc: c_int) -> Self {
        match rc {
            x if x == vs::HS_INVALID as c_int => Self::Invalid,
            x if x == vs::HS_NOMEM as c_int => Self::Nomem,
            x if x == vs::HS_SCAN_TERMINATED as c_int => Self::ScanTerminated,
            x if x == vs::HS_COMPILER_ERROR as c_int => Self::CompilerError,
            x if x == vs::HS_DB_VERSION_ERROR as c_int => Self::DbVersionError,
            x if x == vs::HS_DB_PLATFORM_ERROR as c_int => Self::DbPlatformError,
            x if x == vs::HS_DB_MODE_ERROR as c_int => Self::DbModeError,
            x if x == vs::HS_BAD_ALIGN as c_int => Self::BadAlign,
            x if x == vs::HS_BAD_ALLOC as c_int => Self::BadAlloc,
            x if x == vs::HS_SCRATCH_IN_USE as c_int => Self::ScratchInUse,
            x if x == vs::HS_ARCH_ERROR as c_int => Self::ArchError,
            x if x == vs::HS_INSUFFICIENT_SPACE as c_int => Self::InsufficientSpace,
            _ => Self::UnknownError,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid parameter",
            Self::Nomem => "out of memory",
            Self::ScanTerminated => "scan terminated by callback",
            Self::CompilerError => "pattern compiler error",
            Self::DbVersionError => "database built by incompatible library version",
            Self::DbPlatformError => "database built for incompatible platform",
            Self::DbModeError => "database mode mismatch",
            Self::BadAlign => "buffer alignment error",
            Self::BadAlloc => "allocator returned unusable memory",
            Self::ScratchInUse => "scratch already in use",
            Self::ArchError => "cpu lacks required features",
            Self::InsufficientSpace => "insufficient output space",
            Self::UnknownError => "unknown error code",
        }
    }
}

impl std::fmt::Display for VectorscanErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the vectorscan wrapper layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VectorscanError {
    /// Pattern compilation failed; carries the compiler's own diagnostic and
    /// the index of the offending expression (-1 when not attributable).
    #[error("vectorscan compile failed at expression {expression}: {message}")]
    Compiler { message: String, expression: i32 },
    /// A native call returned a failure code.
    #[error("vectorscan error: {0}")]
    Runtime(VectorscanErrorKind),
    /// Scan input exceeded the native length limit.
    #[error("buffer too large for vectorscan scan: {0} bytes")]
    BufferTooLarge(usize),
    /// The deployment self-test did not match its probe pattern.
    #[error("vectorscan self-test did not match the probe pattern")]
    SelfTestFailed,
}

impl VectorscanError {
    /// True for the benign early-stop signal; all other values are genuine
    /// failures.
    pub fn is_scan_terminated(&self) -> bool {
        matches!(self, Self::Runtime(VectorscanErrorKind::ScanTerminated))
    }

    pub fn kind(&self) -> Option<VectorscanErrorKind> {
        match self {
            Self::Runtime(kind) => Some(*kind),
            Self::Compiler { .. } => Some(VectorscanErrorKind::CompilerError),
            _ => None,
        }
    }
}

pub(crate) fn assert_success(rc: c_int) -> Result<(), VectorscanError> {
    if rc == vs::HS_SUCCESS as c_int {
        Ok(())
    } else {
        Err(VectorscanError::Runtime(VectorscanErrorKind::from_raw(rc)))
    }
}

/// Runtime version string of the linked vectorscan library.
pub fn version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        // SAFETY: hs_version returns a pointer to a static NUL-terminated
        // string owned by the library.
        let raw = unsafe { CStr::from_ptr(vs::hs_version()) };
        raw.to_string_lossy().into_owned()
    })
}

/// Whether the current CPU can run vectorscan databases at all.
pub fn is_available() -> bool {
    let rc = unsafe { vs::hs_valid_platform() };
    rc == vs::HS_SUCCESS as c_int
}

/// Compiles a single probe pattern and scans a known-matching input,
/// validating that the library is functional on this host.
pub fn self_test() -> Result<(), VectorscanError> {
    let mut patterns = BTreeMap::new();
    patterns.insert(1u32, "Test".to_string());
    let database = Arc::new(Database::compile(
        &patterns,
        ScanMode::Stream,
        flags::CASELESS | flags::SINGLEMATCH | flags::ALLOWEMPTY,
    )?);
    let mut scanner = StreamScanner::new(database)?;
    let mut seen = false;
    scanner.scan(b"probe: Test", &mut |event| {
        if event.identifier == 1 {
            seen = true;
        }
        false
    })?;
    if seen {
        Ok(())
    } else {
        Err(VectorscanError::SelfTestFailed)
    }
}

//! Signature scanning engine with interchangeable match backends and a
//! path-classification layer that attributes scanned files to a known
//! software installation.
//!
//! ## Scope
//! This crate provides the matching core of a filesystem malware scanner:
//! signature sets compile into immutable, shareable databases; per-thread
//! scan sessions stream file content through a backend in chunks; and a
//! lazily populated path trie attributes each scanned file to an
//! installation component (core, plugin, theme) or marks it unclassified.
//!
//! ## Key invariants
//! - A compiled database is immutable once built and safe to share
//!   read-only across threads; it owns exactly one backend handle, released
//!   exactly once when dropped.
//! - Scan sessions are per-thread and never cross threads; each binds its
//!   own scratch state to the shared database.
//! - `prepare()` is idempotent but not internally synchronized; callers
//!   coordinate the at-most-once compile/load (single coordinating thread,
//!   or an external lock).
//! - Evaluation timeouts and discovery failures are absorbed into the data
//!   model (timeout set, `Unclassified` identity), never raised as errors.
//!
//! ## Scan flow (single file)
//! 1) Select an engine by configuration token ([`MatchEngine`]).
//! 2) Build or deserialize the compiled database (`Matcher::prepare`).
//! 3) Obtain a per-thread session, open one context per file.
//! 4) Feed the file in chunks; collect the match map and timeout set.
//! 5) Resolve the path through the [`FileIdentifier`] trie and join both
//!    into a [`FileScanReport`].
//!
//! ## Notable entry points
//! - [`MatchEngine`] / [`MatchOptions`]: backend selection and tuning.
//! - [`Matcher`] / [`MatchSession`] / [`MatcherContext`]: the backend
//!   contract.
//! - [`SignatureSet`]: external signature input.
//! - [`FileIdentifier`] / [`FileIdentity`]: path attribution.
//! - [`scan_file`] / [`scan_and_identify`]: chunked per-file drivers.

pub mod identifier;
pub mod installation;
pub mod matching;
pub mod scanner;
pub mod signatures;
pub mod vectorscan;

pub use identifier::{FileIdentifier, FileIdentity, FileType, GroupIdentity, KnownFileIdentity};
pub use installation::{DiscoveryFailure, Extension, Installation, InstallationResolver};
pub use matching::{
    Compiler, EngineSelectError, MatchEngine, MatchError, MatchOptions, MatchSession, Matcher,
    MatcherContext, ScanResults, DEFAULT_TIMEOUT,
};
pub use scanner::{scan_and_identify, scan_file, FileScanReport, DEFAULT_CHUNK_SIZE};
pub use signatures::{Signature, SignatureSet};

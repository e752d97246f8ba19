//! Backend-agnostic matching contracts and the engine selector.
//!
//! A [`Matcher`] owns a compiled database; `prepare()` is idempotent but
//! deliberately not synchronized internally — callers either prepare from a
//! single coordinating thread before spawning workers, or wrap the matcher
//! in an external lock. Each worker thread obtains its own
//! [`MatchSession`] (the per-thread scratch state bound to the shared
//! database) and opens one [`MatcherContext`] per scanned file.
//!
//! Errors are stage-specific: [`EngineSelectError`] aborts before scanning
//! starts, [`MatchError`] aborts the current file's scan only. Evaluation
//! timeouts are absorbed into [`ScanResults::timeouts`] and are never
//! errors.

mod regex_engine;
mod vectorscan_engine;

pub(crate) use regex_engine::RegexMatcher;
pub(crate) use vectorscan_engine::{VectorscanCompiler, VectorscanMatcher};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::signatures::SignatureSet;
use crate::vectorscan::{self, VectorscanError};

/// Default per-signature-per-chunk evaluation budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised while selecting or instantiating a backend. Fatal to the
/// selection, not to the process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineSelectError {
    /// The configuration token does not name a supported backend.
    #[error("unrecognized engine option: {0}")]
    UnrecognizedEngine(String),
    /// The backend exists but cannot run on this host.
    #[error("matching backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Errors that abort the current database build or file scan.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MatchError {
    /// A signature pattern was rejected by the backend compiler; carries
    /// the compiler's own diagnostic. `identifier` is the offending
    /// signature when the backend can attribute the failure.
    #[error("pattern compilation failed: {message}")]
    Compilation {
        identifier: Option<u32>,
        message: String,
    },
    /// The signature set contains no signatures to compile.
    #[error("signature set is empty")]
    EmptySignatureSet,
    /// A context or session was requested before preparation.
    #[error("matcher is not prepared")]
    NotPrepared,
    /// This backend has no serialized database format.
    #[error("engine does not support serialized databases")]
    SerializationUnsupported,
    /// A native backend call failed.
    #[error(transparent)]
    Backend(#[from] VectorscanError),
    /// File content could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Match options shared by all backends.
#[derive(Clone)]
pub struct MatchOptions {
    /// Signatures to compile, treated as read-only input.
    pub signature_set: Arc<SignatureSet>,
    /// Report every matching signature instead of stopping at the first.
    pub match_all: bool,
    /// Defer database acquisition until the first session is created.
    pub lazy: bool,
    /// Per-signature-per-chunk evaluation budget for backends capable of
    /// runaway evaluation.
    pub timeout: Duration,
    /// Precompiled database blob; when present, preparation deserializes it
    /// instead of compiling the signature set.
    pub database_source: Option<Vec<u8>>,
}

impl MatchOptions {
    pub fn new(signature_set: Arc<SignatureSet>) -> Self {
        Self {
            signature_set,
            match_all: false,
            lazy: false,
            timeout: DEFAULT_TIMEOUT,
            database_source: None,
        }
    }

    pub fn match_all(mut self, match_all: bool) -> Self {
        self.match_all = match_all;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn database_source(mut self, blob: Vec<u8>) -> Self {
        self.database_source = Some(blob);
        self
    }
}

/// Accumulated output of one file's scan: the match map plus the set of
/// signatures whose evaluation timed out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanResults {
    /// Signature identifier -> matched bytes (empty for engines that report
    /// presence only). Later matches for an identifier overwrite earlier
    /// ones.
    pub matches: BTreeMap<u32, Vec<u8>>,
    /// Signatures abandoned because an evaluation exceeded its budget.
    pub timeouts: BTreeSet<u32>,
}

impl ScanResults {
    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// A matcher owns signature input and, once prepared, a compiled database.
///
/// `prepare()` is idempotent. It is not internally synchronized: callers
/// must not invoke it concurrently from multiple threads on the same
/// matcher (prepare from one coordinating thread, or hold an external
/// lock). `create_session` takes `&mut self` so that lazy matchers can
/// prepare on first use under the same caller-owned discipline.
pub trait Matcher: Send {
    /// Acquires the compiled database: compiles the signature set, or
    /// deserializes the precompiled blob when one was supplied. No-op when
    /// already prepared.
    fn prepare(&mut self) -> Result<(), MatchError>;

    fn is_prepared(&self) -> bool;

    /// Creates a per-thread scan session bound to the shared database.
    ///
    /// Lazy matchers prepare here on first use; non-lazy matchers must
    /// already be prepared. Sessions are confined to the creating thread.
    fn create_session(&mut self) -> Result<Box<dyn MatchSession>, MatchError>;
}

/// Per-thread scan state bound to one compiled database. Never shared
/// between threads; owns whatever scratch the backend requires.
pub trait MatchSession: std::fmt::Debug {
    /// Opens a streaming scan context for one file's content. The context
    /// borrows the session's scratch until dropped; dropping it releases
    /// any backend-held stream state.
    fn create_context<'s>(&'s mut self) -> Result<Box<dyn MatcherContext + 's>, MatchError>;
}

/// A streaming scan conversation for one file's content.
pub trait MatcherContext {
    /// Feeds one chunk of a logically contiguous byte stream.
    /// `start_of_stream` marks the first chunk of a new logical stream and
    /// resets backend stream state without reallocating. Returns `true`
    /// when at least one signature matched within this call (including the
    /// backend's benign early-stop signal).
    fn process_chunk(&mut self, data: &[u8], start_of_stream: bool) -> Result<bool, MatchError>;

    /// Takes the accumulated match map and timeout set, leaving the
    /// context empty.
    fn take_results(&mut self) -> ScanResults;
}

/// Compiles signature sets into portable precompiled database blobs.
pub trait Compiler {
    /// Compiles `signatures` and returns the serialized database. The blob
    /// is valid only for the same backend version, mode, and platform.
    fn compile_serializable(&self, signatures: &SignatureSet) -> Result<Vec<u8>, MatchError>;
}

/// The closed set of supported match backends, each identified by a stable
/// configuration token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchEngine {
    /// Portable general-purpose engine built on `regex`; evaluates each
    /// signature independently per chunk and records matched text.
    Regex,
    /// Hardware-accelerated streaming multi-pattern engine; matches may
    /// span chunk boundaries, matched text is reported empty.
    Vectorscan,
}

impl MatchEngine {
    const ALL: [MatchEngine; 2] = [MatchEngine::Regex, MatchEngine::Vectorscan];

    /// The deterministic default backend.
    pub fn default_engine() -> Self {
        MatchEngine::Regex
    }

    /// Stable configuration token for this backend.
    pub fn option(&self) -> &'static str {
        match self {
            MatchEngine::Regex => "regex",
            MatchEngine::Vectorscan => "vectorscan",
        }
    }

    /// All supported configuration tokens, in registry order.
    pub fn options() -> Vec<&'static str> {
        Self::ALL.iter().map(MatchEngine::option).collect()
    }

    /// Validates a configuration token against the supported set.
    pub fn for_option(option: &str) -> Result<Self, EngineSelectError> {
        Self::ALL
            .into_iter()
            .find(|engine| engine.option() == option)
            .ok_or_else(|| EngineSelectError::UnrecognizedEngine(option.to_string()))
    }

    /// Instantiates a matcher implementing this backend.
    pub fn create_matcher(
        &self,
        options: MatchOptions,
    ) -> Result<Box<dyn Matcher>, EngineSelectError> {
        match self {
            MatchEngine::Regex => Ok(Box::new(RegexMatcher::new(options))),
            MatchEngine::Vectorscan => {
                if !vectorscan::is_available() {
                    return Err(EngineSelectError::BackendUnavailable(
                        "vectorscan is not supported on this cpu".to_string(),
                    ));
                }
                Ok(Box::new(VectorscanMatcher::new(options)))
            }
        }
    }

    /// Returns the backend's precompiled-blob compiler, or `None` for
    /// backends without a serialized database format.
    pub fn create_compiler(&self) -> Option<Box<dyn Compiler>> {
        match self {
            MatchEngine::Regex => None,
            MatchEngine::Vectorscan => Some(Box::new(VectorscanCompiler)),
        }
    }
}

impl std::fmt::Display for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.option())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{Signature, SignatureSet};

    #[test]
    fn for_option_accepts_every_registered_token() {
        for option in MatchEngine::options() {
            let engine = MatchEngine::for_option(option).unwrap();
            assert_eq!(engine.option(), option);
        }
    }

    #[test]
    fn for_option_rejects_unknown_token() {
        let err = MatchEngine::for_option("hyperscan").unwrap_err();
        match err {
            EngineSelectError::UnrecognizedEngine(token) => assert_eq!(token, "hyperscan"),
            other => panic!("expected UnrecognizedEngine, got {other:?}"),
        }
    }

    #[test]
    fn default_engine_is_registered() {
        let default = MatchEngine::default_engine();
        assert!(MatchEngine::options().contains(&default.option()));
    }

    #[test]
    fn regex_engine_has_no_blob_compiler() {
        assert!(MatchEngine::Regex.create_compiler().is_none());
        assert!(MatchEngine::Vectorscan.create_compiler().is_some());
    }

    #[test]
    fn session_before_prepare_fails_for_non_lazy_matcher() {
        let set = Arc::new(SignatureSet::from_signatures([Signature::new(1, "abc")]));
        let mut matcher = MatchEngine::Regex
            .create_matcher(MatchOptions::new(set))
            .unwrap();
        assert!(!matcher.is_prepared());
        assert!(matches!(
            matcher.create_session().unwrap_err(),
            MatchError::NotPrepared
        ));
    }
}

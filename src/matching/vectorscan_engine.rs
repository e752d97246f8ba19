//! Streaming multi-pattern backend over the vectorscan wrapper layer.
//!
//! The compiled database is stream-mode, case-insensitive, single-match
//! per pattern, empty matches allowed. Matched text is recorded as empty:
//! the engine reports offsets, not captures. The engine is linear-time, so
//! contexts never populate the timeout set.
//!
//! Early-stop semantics: with match-all off, the match callback asks the
//! engine to terminate after the first match; the resulting
//! `ScanTerminated` signal collapses into `process_chunk -> Ok(true)`, the
//! same as an ordinary match. The two causes are deliberately not
//! distinguished.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::signatures::SignatureSet;
use crate::vectorscan::{flags, Database, ScanMode, StreamScanner, VectorscanError};

use super::{Compiler, MatchError, MatchOptions, MatchSession, Matcher, MatcherContext, ScanResults};

/// Compile flags for signature databases: streaming, case-insensitive,
/// first match per pattern, empty matches allowed.
const SIGNATURE_FLAGS: u32 = flags::CASELESS | flags::SINGLEMATCH | flags::ALLOWEMPTY;

/// Compiles a signature set into a stream-mode vectorscan database,
/// attributing compile failures back to the offending signature.
fn compile_database(signatures: &SignatureSet) -> Result<Database, MatchError> {
    if signatures.is_empty() {
        return Err(MatchError::EmptySignatureSet);
    }
    let patterns: BTreeMap<u32, String> = signatures
        .rules()
        .map(|(id, rule)| (id, rule.to_string()))
        .collect();
    debug!(patterns = patterns.len(), "compiling vectorscan database");
    let database = Database::compile(&patterns, ScanMode::Stream, SIGNATURE_FLAGS).map_err(
        |err| match err {
            VectorscanError::Compiler {
                message,
                expression,
            } => {
                // The compiler reports the expression index in identifier
                // order; map it back to the signature identifier.
                let identifier = usize::try_from(expression)
                    .ok()
                    .and_then(|idx| patterns.keys().nth(idx).copied());
                MatchError::Compilation {
                    identifier,
                    message,
                }
            }
            other => MatchError::Backend(other),
        },
    )?;
    debug!("vectorscan database ready");
    Ok(database)
}

pub(crate) struct VectorscanMatcher {
    signature_set: Arc<SignatureSet>,
    match_all: bool,
    lazy: bool,
    database_source: Option<Vec<u8>>,
    database: Option<Arc<Database>>,
}

impl VectorscanMatcher {
    pub(crate) fn new(options: MatchOptions) -> Self {
        Self {
            signature_set: options.signature_set,
            match_all: options.match_all,
            lazy: options.lazy,
            database_source: options.database_source,
            database: None,
        }
    }
}

impl Matcher for VectorscanMatcher {
    fn prepare(&mut self) -> Result<(), MatchError> {
        if self.database.is_some() {
            return Ok(());
        }
        let database = match &self.database_source {
            Some(blob) => {
                debug!(bytes = blob.len(), "deserializing precompiled vectorscan database");
                Database::deserialize(blob)?
            }
            None => compile_database(&self.signature_set)?,
        };
        self.database = Some(Arc::new(database));
        debug!("vectorscan matcher prepared");
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.database.is_some()
    }

    fn create_session(&mut self) -> Result<Box<dyn MatchSession>, MatchError> {
        if !self.is_prepared() {
            if self.lazy {
                self.prepare()?;
            } else {
                return Err(MatchError::NotPrepared);
            }
        }
        let database = self.database.as_ref().cloned().ok_or(MatchError::NotPrepared)?;
        debug!("preparing thread-local vectorscan session");
        let scanner = StreamScanner::new(database)?;
        Ok(Box::new(VectorscanSession {
            scanner,
            match_all: self.match_all,
        }))
    }
}

/// Per-thread session: one scratch allocation and one reusable stream.
#[derive(Debug)]
struct VectorscanSession {
    scanner: StreamScanner,
    match_all: bool,
}

impl MatchSession for VectorscanSession {
    fn create_context<'s>(&'s mut self) -> Result<Box<dyn MatcherContext + 's>, MatchError> {
        Ok(Box::new(VectorscanContext {
            session: self,
            results: ScanResults::default(),
            stream_dirty: false,
        }))
    }
}

struct VectorscanContext<'s> {
    session: &'s mut VectorscanSession,
    results: ScanResults,
    /// True once the underlying stream has consumed bytes for the current
    /// logical stream; governs when a reset is required.
    stream_dirty: bool,
}

impl MatcherContext for VectorscanContext<'_> {
    fn process_chunk(&mut self, data: &[u8], start_of_stream: bool) -> Result<bool, MatchError> {
        if start_of_stream && self.stream_dirty {
            self.session.scanner.reset()?;
            self.stream_dirty = false;
        }
        self.stream_dirty = true;

        let mut matched = false;
        let match_all = self.session.match_all;
        let matches = &mut self.results.matches;
        let mut handler = |event: crate::vectorscan::MatchEvent| {
            // The engine reports presence, not captured text.
            matches.insert(event.identifier, Vec::new());
            matched = true;
            // Terminate after the first match unless every match is wanted.
            !match_all
        };
        match self.session.scanner.scan(data, &mut handler) {
            Ok(()) => Ok(matched),
            Err(err) if err.is_scan_terminated() => Ok(true),
            Err(err) => Err(MatchError::Backend(err)),
        }
    }

    fn take_results(&mut self) -> ScanResults {
        std::mem::take(&mut self.results)
    }
}

impl Drop for VectorscanContext<'_> {
    fn drop(&mut self) {
        // Leave the session's stream clean for the next context even when
        // the scan ends early or fails.
        if self.stream_dirty {
            let _ = self.session.scanner.reset();
        }
    }
}

/// Precompiled-blob compiler for the vectorscan backend.
pub(crate) struct VectorscanCompiler;

impl Compiler for VectorscanCompiler {
    fn compile_serializable(&self, signatures: &SignatureSet) -> Result<Vec<u8>, MatchError> {
        let database = compile_database(signatures)?;
        Ok(database.serialize()?)
    }
}

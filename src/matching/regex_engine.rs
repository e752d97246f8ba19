//! General-purpose match backend built on `regex::bytes`.
//!
//! Each signature compiles to its own case-insensitive regex; every chunk
//! is evaluated against every signature independently, so this backend
//! records matched text but cannot match a pattern that spans a chunk
//! boundary (documented limitation of block evaluation).
//!
//! The per-signature-per-chunk timeout is enforced at evaluation
//! granularity: the `regex` engine cannot be interrupted mid-search, so an
//! evaluation that overruns its budget has its result discarded and the
//! signature recorded in the timeout set. Scanning always continues with
//! the remaining signatures; a timeout is never fatal to the file's scan.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::bytes::{Regex, RegexBuilder};
use tracing::debug;

use crate::signatures::SignatureSet;

use super::{MatchError, MatchOptions, MatchSession, Matcher, MatcherContext, ScanResults};

/// One signature compiled for this backend.
#[derive(Debug)]
struct CompiledSignature {
    identifier: u32,
    regex: Regex,
}

/// The backend's compiled database: signatures in identifier order.
type CompiledSet = Arc<Vec<CompiledSignature>>;

pub(crate) struct RegexMatcher {
    signature_set: Arc<SignatureSet>,
    match_all: bool,
    lazy: bool,
    timeout: Duration,
    database_source: Option<Vec<u8>>,
    database: Option<CompiledSet>,
}

impl RegexMatcher {
    pub(crate) fn new(options: MatchOptions) -> Self {
        Self {
            signature_set: options.signature_set,
            match_all: options.match_all,
            lazy: options.lazy,
            timeout: options.timeout,
            database_source: options.database_source,
            database: None,
        }
    }
}

impl Matcher for RegexMatcher {
    fn prepare(&mut self) -> Result<(), MatchError> {
        if self.database.is_some() {
            return Ok(());
        }
        // This backend has no serialized database format; a supplied blob
        // cannot be honored and must not be silently ignored.
        if self.database_source.is_some() {
            return Err(MatchError::SerializationUnsupported);
        }
        if self.signature_set.is_empty() {
            return Err(MatchError::EmptySignatureSet);
        }
        debug!(
            signatures = self.signature_set.len(),
            "compiling regex signature database"
        );
        let mut compiled = Vec::with_capacity(self.signature_set.len());
        for (identifier, rule) in self.signature_set.rules() {
            let regex = RegexBuilder::new(rule)
                .case_insensitive(true)
                .unicode(false)
                .build()
                .map_err(|e| MatchError::Compilation {
                    identifier: Some(identifier),
                    message: e.to_string(),
                })?;
            compiled.push(CompiledSignature { identifier, regex });
        }
        self.database = Some(Arc::new(compiled));
        debug!("regex signature database ready");
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
        Ok(Box::new(RegexSession {
            database,
            match_all: self.match_all,
            timeout: self.timeout,
        }))
    }
}

/// Per-thread session: a shared handle on the compiled set plus the match
/// options the contexts need. The regexes themselves carry their own
/// internal scratch.
#[derive(Debug)]
struct RegexSession {
    database: CompiledSet,
    match_all: bool,
    timeout: Duration,
}

impl MatchSession for RegexSession {
    fn create_context<'s>(&'s mut self) -> Result<Box<dyn MatcherContext + 's>, MatchError> {
        Ok(Box::new(RegexContext {
            session: self,
            results: ScanResults::default(),
        }))
    }
}

struct RegexContext<'s> {
    session: &'s mut RegexSession,
    results: ScanResults,
}

impl MatcherContext for RegexContext<'_> {
    fn process_chunk(&mut self, data: &[u8], _start_of_stream: bool) -> Result<bool, MatchError> {
        let mut matched = false;
        for signature in self.session.database.iter() {
            let started = Instant::now();
            let found = signature.regex.find(data);
            if started.elapsed() > self.session.timeout {
                // Budget exceeded: abandon this evaluation's result and keep
                // going with the remaining signatures.
                self.results.timeouts.insert(signature.identifier);
                continue;
            }
            if let Some(m) = found {
                self.results
                    .matches
                    .insert(signature.identifier, m.as_bytes().to_vec());
                matched = true;
                if !self.session.match_all {
                    break;
                }
            }
        }
        Ok(matched)
    }

    fn take_results(&mut self) -> ScanResults {
        std::mem::take(&mut self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::Signature;

    fn matcher(signatures: &[(u32, &str)], configure: impl FnOnce(MatchOptions) -> MatchOptions) -> RegexMatcher {
        let set = Arc::new(SignatureSet::from_signatures(
            signatures
                .iter()
                .map(|&(id, rule)| Signature::new(id, rule)),
        ));
        RegexMatcher::new(configure(MatchOptions::new(set)))
    }

    fn scan_once(matcher: &mut RegexMatcher, data: &[u8]) -> ScanResults {
        let mut session = matcher.create_session().unwrap();
        let mut context = session.create_context().unwrap();
        context.process_chunk(data, true).unwrap();
        context.take_results()
    }

    #[test]
    fn match_all_reports_every_signature_with_text() {
        let mut m = matcher(&[(1, "evil-string"), (2, "Test")], |o| o.match_all(true));
        m.prepare().unwrap();
        let results = scan_once(&mut m, b"...Test and evil-string...");
        assert_eq!(results.matches.len(), 2);
        assert_eq!(results.matches[&1], b"evil-string".to_vec());
        assert_eq!(results.matches[&2], b"Test".to_vec());
        assert!(results.timeouts.is_empty());
    }

    #[test]
    fn first_match_stops_after_one_signature() {
        let mut m = matcher(&[(1, "alpha"), (2, "beta")], |o| o.match_all(false));
        m.prepare().unwrap();
        let results = scan_once(&mut m, b"alpha beta");
        assert_eq!(results.matches.len(), 1);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let mut m = matcher(&[(5, "EVIL")], |o| o.match_all(true));
        m.prepare().unwrap();
        let results = scan_once(&mut m, b"very evil content");
        assert_eq!(results.matches[&5], b"evil".to_vec());
    }

    #[test]
    fn later_match_overwrites_earlier_record() {
        let mut m = matcher(&[(3, "num[0-9]")], |o| o.match_all(true));
        m.prepare().unwrap();
        let mut session = m.create_session().unwrap();
        let mut context = session.create_context().unwrap();
        context.process_chunk(b"num1 ...", true).unwrap();
        context.process_chunk(b"num2 ...", false).unwrap();
        let results = context.take_results();
        assert_eq!(results.matches[&3], b"num2".to_vec());
    }

    #[test]
    fn prepare_is_idempotent() {
        let mut m = matcher(&[(1, "x")], |o| o);
        m.prepare().unwrap();
        assert!(m.is_prepared());
        m.prepare().unwrap();
        assert!(m.is_prepared());
    }

    #[test]
    fn malformed_pattern_reports_identifier_and_message() {
        let mut m = matcher(&[(1, "fine"), (9, "broken(")], |o| o);
        match m.prepare().unwrap_err() {
            MatchError::Compilation {
                identifier,
                message,
            } => {
                assert_eq!(identifier, Some(9));
                assert!(!message.is_empty());
            }
            other => panic!("expected Compilation, got {other:?}"),
        }
    }

    #[test]
    fn lazy_matcher_prepares_on_first_session() {
        let mut m = matcher(&[(1, "abc")], |o| o.lazy(true));
        assert!(!m.is_prepared());
        let results = scan_once(&mut m, b"abc");
        assert!(m.is_prepared());
        assert!(results.has_matches());
    }

    #[test]
    fn database_source_is_rejected() {
        let mut m = matcher(&[(1, "abc")], |o| o.database_source(vec![1, 2, 3]));
        assert!(matches!(
            m.prepare().unwrap_err(),
            MatchError::SerializationUnsupported
        ));
    }

    #[test]
    fn timeout_does_not_abort_remaining_signatures() {
        // A zero budget forces every evaluation over its limit; the loop
        // must still visit every signature and record each timeout.
        let haystack = vec![b'x'; 64 * 1024];
        let mut m = matcher(&[(1, "needle-a"), (2, "needle-b")], |o| {
            o.match_all(true).timeout(Duration::ZERO)
        });
        m.prepare().unwrap();
        let results = scan_once(&mut m, &haystack);
        assert!(results.matches.is_empty());
        assert_eq!(
            results.timeouts.iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn overrunning_evaluation_discards_its_match() {
        let haystack = {
            let mut h = vec![b'x'; 64 * 1024];
            h.extend_from_slice(b"needle");
            h
        };
        let mut m = matcher(&[(1, "needle")], |o| o.match_all(true).timeout(Duration::ZERO));
        m.prepare().unwrap();
        let results = scan_once(&mut m, &haystack);
        assert!(results.matches.is_empty());
        assert!(results.timeouts.contains(&1));
    }

    #[test]
    fn empty_signature_set_fails_preparation() {
        let set = Arc::new(SignatureSet::new());
        let mut m = RegexMatcher::new(MatchOptions::new(set));
        assert!(matches!(
            m.prepare().unwrap_err(),
            MatchError::EmptySignatureSet
        ));
    }
}

//! Chunked per-file scan driver.
//!
//! Reads file content sequentially and feeds it through a matcher context,
//! then joins the match output with the path identifier into the per-file
//! report consumed by reporting/remediation collaborators.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::identifier::{FileIdentifier, FileIdentity};
use crate::matching::{MatchError, MatchSession, MatcherContext, ScanResults};

/// Default read size for streaming file content.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Per-file scanner output: the path, its installation attribution, and the
/// match map plus timeout set from the matching core.
#[derive(Debug)]
pub struct FileScanReport {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub results: ScanResults,
}

impl FileScanReport {
    pub fn has_matches(&self) -> bool {
        self.results.has_matches()
    }
}

/// Streams `path`'s content through `context` in `chunk_size` reads and
/// returns the accumulated results. The first read is flagged as the start
/// of a new logical stream.
pub fn scan_file(
    path: &Path,
    context: &mut dyn MatcherContext,
    chunk_size: usize,
) -> Result<ScanResults, MatchError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut start_of_stream = true;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.process_chunk(&buf[..n], start_of_stream)?;
        start_of_stream = false;
    }
    let results = context.take_results();
    debug!(
        path = %path.display(),
        matches = results.matches.len(),
        timeouts = results.timeouts.len(),
        "file scan complete"
    );
    Ok(results)
}

/// Scans one file and resolves its identity in a single step: opens a
/// context on `session`, streams the content, then classifies the path.
pub fn scan_and_identify(
    path: &Path,
    session: &mut dyn MatchSession,
    identifier: &mut FileIdentifier,
    chunk_size: usize,
) -> Result<FileScanReport, MatchError> {
    let results = {
        let mut context = session.create_context()?;
        scan_file(path, context.as_mut(), chunk_size)?
    };
    let identity = identifier.identify(path, true);
    Ok(FileScanReport {
        path: path.to_path_buf(),
        identity,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{MatchEngine, MatchOptions};
    use crate::signatures::{Signature, SignatureSet};
    use std::io::Write;
    use std::sync::Arc;

    #[test]
    fn scan_file_streams_every_chunk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // Content larger than the chunk size, with the pattern near the end.
        file.write_all(&vec![b'a'; 4096]).unwrap();
        file.write_all(b"evil-string").unwrap();
        file.flush().unwrap();

        let set = Arc::new(SignatureSet::from_signatures([Signature::new(
            1,
            "evil-string",
        )]));
        let mut matcher = MatchEngine::Regex
            .create_matcher(MatchOptions::new(set).match_all(true))
            .unwrap();
        matcher.prepare().unwrap();
        let mut session = matcher.create_session().unwrap();
        let mut context = session.create_context().unwrap();
        let results = scan_file(file.path(), context.as_mut(), 1024).unwrap();
        assert!(results.matches.contains_key(&1));
    }

    #[test]
    fn missing_file_surfaces_io_error() {
        let set = Arc::new(SignatureSet::from_signatures([Signature::new(1, "x")]));
        let mut matcher = MatchEngine::Regex
            .create_matcher(MatchOptions::new(set))
            .unwrap();
        matcher.prepare().unwrap();
        let mut session = matcher.create_session().unwrap();
        let mut context = session.create_context().unwrap();
        let err = scan_file(
            Path::new("/nonexistent/sigscan-test-file"),
            context.as_mut(),
            DEFAULT_CHUNK_SIZE,
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::Io(_)));
    }
}

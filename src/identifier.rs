//! Path-classification trie: attributes filesystem paths to installation
//! components.
//!
//! The trie is populated lazily. The first query for a path outside any
//! known subtree triggers installation discovery; success seeds a
//! non-final core identity at the installation root and a final identity
//! at each extension root, failure seeds an unclassified identity at the
//! exact queried path. Either way, discovery runs at most once per query
//! and its result is memoized for the process lifetime.
//!
//! Finality governs traversal: a final identity applies uniformly to every
//! path beneath its node, so lookups stop there without per-file storage.
//! The core identity is deliberately non-final — paths deeper than any
//! discovered child still resolve to the core identity, which is what
//! distinguishes core files from unattributed files.
//!
//! Concurrency: `identify` takes `&mut self`, making the trie single-writer
//! by construction. Callers that scan from multiple threads share one
//! `FileIdentifier` behind their own lock.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::installation::{Extension, Installation, InstallationResolver};

/// Component classification for an attributed file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Core,
    Plugin,
    Theme,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Core => "core",
            FileType::Plugin => "plugin",
            FileType::Theme => "theme",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory-level attribution: applies to paths at or beneath `base_path`.
#[derive(Clone, Debug)]
pub struct GroupIdentity {
    pub file_type: FileType,
    /// Root directory this group covers.
    pub base_path: PathBuf,
    pub installation: Arc<Installation>,
    /// The plugin/theme this group belongs to; `None` for the core group.
    pub extension: Option<Arc<Extension>>,
    /// Final groups apply uniformly to everything beneath them; non-final
    /// groups (the core) allow more specific children.
    pub is_final: bool,
}

/// File-level attribution; always terminal.
#[derive(Clone, Debug)]
pub struct KnownFileIdentity {
    pub file_type: FileType,
    /// Path relative to the owning group's base path (the bare file name
    /// when the queried path was the base path itself).
    pub local_path: PathBuf,
    pub installation: Arc<Installation>,
    pub extension: Option<Arc<Extension>>,
}

impl fmt::Display for KnownFileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (software, version) = match &self.extension {
            Some(ext) => (ext.name.as_str(), ext.version.as_deref()),
            None => ("core", self.installation.version.as_deref()),
        };
        write!(
            f,
            "{} of {} {} ({})",
            self.local_path.display(),
            self.file_type,
            software,
            version.unwrap_or("unknown version"),
        )
    }
}

/// Attribution of one filesystem path.
#[derive(Clone, Debug)]
pub enum FileIdentity {
    /// No installation attribution.
    Unclassified,
    /// Directory-level attribution, not yet resolved to a specific file.
    Group(GroupIdentity),
    /// File-level attribution.
    Known(KnownFileIdentity),
}

impl FileIdentity {
    /// Final identities apply to every path beneath their trie node;
    /// traversal stops at them.
    pub fn is_final(&self) -> bool {
        match self {
            FileIdentity::Unclassified => false,
            FileIdentity::Group(group) => group.is_final,
            FileIdentity::Known(_) => true,
        }
    }

    pub fn file_type(&self) -> FileType {
        match self {
            FileIdentity::Unclassified => FileType::Unknown,
            FileIdentity::Group(group) => group.file_type,
            FileIdentity::Known(known) => known.file_type,
        }
    }
}

/// One trie node keyed by path component.
#[derive(Default)]
struct PathNode {
    identity: Option<FileIdentity>,
    children: BTreeMap<OsString, PathNode>,
}

impl PathNode {
    /// Walks the trie along `path`, stopping at a final identity or at the
    /// deepest existing node, and returns that node's identity.
    fn find_identity(&self, path: &Path) -> Option<&FileIdentity> {
        let mut node = self;
        for component in path.components() {
            if node.identity.as_ref().is_some_and(FileIdentity::is_final) {
                break;
            }
            match node.children.get(component.as_os_str()) {
                Some(child) => node = child,
                None => break,
            }
        }
        node.identity.as_ref()
    }

    /// Creates intermediate nodes as needed and sets `identity` at the node
    /// for `path`.
    fn set_identity(&mut self, path: &Path, identity: FileIdentity) {
        let mut node = self;
        for component in path.components() {
            node = node
                .children
                .entry(component.as_os_str().to_os_string())
                .or_default();
        }
        node.identity = Some(identity);
    }
}

/// Classifies filesystem paths by trie lookup, discovering and caching
/// installation metadata on demand.
pub struct FileIdentifier {
    known_paths: PathNode,
    resolver: Box<dyn InstallationResolver>,
}

impl FileIdentifier {
    pub fn new(resolver: Box<dyn InstallationResolver>) -> Self {
        Self {
            known_paths: PathNode::default(),
            resolver,
        }
    }

    /// Resolves `path` to its identity.
    ///
    /// Two explicit phases: resolve-or-discover (a trie lookup, with one
    /// discovery attempt when the lookup finds nothing), then resolve
    /// (group identities promote to file-level identities, cached at the
    /// exact queried path). With `allow_discovery` off, an unknown path
    /// resolves to [`FileIdentity::Unclassified`] without probing.
    pub fn identify(&mut self, path: &Path, allow_discovery: bool) -> FileIdentity {
        let path = normalize_path(path);

        // Phase 1: resolve, discovering at most once.
        let identity = match self.known_paths.find_identity(&path).cloned() {
            Some(identity) => identity,
            None => {
                if !allow_discovery {
                    return FileIdentity::Unclassified;
                }
                self.discover(&path);
                match self.known_paths.find_identity(&path).cloned() {
                    Some(identity) => identity,
                    None => return FileIdentity::Unclassified,
                }
            }
        };

        // Phase 2: promote a group hit to a file-level identity and cache
        // it at the exact queried path so repeat queries are O(1).
        match identity {
            FileIdentity::Group(group) => {
                let known = FileIdentity::Known(resolve_group(&group, &path));
                self.known_paths.set_identity(&path, known.clone());
                known
            }
            other => other,
        }
    }

    /// Probes the discovery service for an installation containing `path`
    /// and seeds the trie with the outcome.
    fn discover(&mut self, path: &Path) {
        match self.resolver.resolve(path) {
            Ok(installation) => {
                let root = normalize_path(&installation.root_path);
                debug!(root = %root.display(), "discovered installation");
                let installation = Arc::new(installation);
                self.known_paths.set_identity(
                    &root,
                    FileIdentity::Group(GroupIdentity {
                        file_type: FileType::Core,
                        base_path: root.clone(),
                        installation: Arc::clone(&installation),
                        extension: None,
                        is_final: false,
                    }),
                );
                let extensions = installation
                    .plugins
                    .iter()
                    .map(|ext| (FileType::Plugin, ext.clone()))
                    .chain(
                        installation
                            .themes
                            .iter()
                            .map(|ext| (FileType::Theme, ext.clone())),
                    );
                for (file_type, extension) in extensions {
                    let base = normalize_path(&extension.path);
                    self.known_paths.set_identity(
                        &base,
                        FileIdentity::Group(GroupIdentity {
                            file_type,
                            base_path: base.clone(),
                            installation: Arc::clone(&installation),
                            extension: Some(Arc::new(extension)),
                            is_final: true,
                        }),
                    );
                }
            }
            Err(failure) => {
                debug!(path = %failure.path.display(), "path is not part of an installation");
                // Memoize the miss so this path never probes again.
                self.known_paths
                    .set_identity(path, FileIdentity::Unclassified);
            }
        }
    }
}

/// Computes the file-level identity for `path` within `group`.
fn resolve_group(group: &GroupIdentity, path: &Path) -> KnownFileIdentity {
    let local_path = if path == group.base_path {
        path.file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| path.to_path_buf())
    } else {
        path.strip_prefix(&group.base_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    };
    KnownFileIdentity {
        file_type: group.file_type,
        local_path,
        installation: Arc::clone(&group.installation),
        extension: group.extension.clone(),
    }
}

/// Normalizes a path before any trie traversal or storage: resolves
/// symlinks for the nearest existing ancestor and lexically removes `.` and
/// `..` segments for the rest, so queries about not-yet-existing paths
/// still land on consistent trie slots.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let lexical = lexical_normalize(&absolute);

    let mut prefix = lexical.as_path();
    let mut suffix: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = prefix.canonicalize() {
            let mut out = canonical;
            for part in suffix.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (prefix.parent(), prefix.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_os_string());
                prefix = parent;
            }
            _ => return lexical,
        }
    }
}

/// Removes `.` segments and resolves `..` against the already-built prefix.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

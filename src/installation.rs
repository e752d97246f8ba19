//! Installation discovery interface.
//!
//! Discovery itself is an external collaborator: given a filesystem path,
//! it either returns a structured descriptor of the installation the path
//! belongs to, or signals that no installation exists there. This module
//! defines only that boundary; the identifier consumes it opaquely.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// An installed extension (plugin or theme) within an installation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// Human-readable name.
    pub name: String,
    /// Stable directory slug.
    pub slug: String,
    /// Root directory of the extension.
    pub path: PathBuf,
    /// Declared version, when the metadata carries one.
    pub version: Option<String>,
}

/// A discovered software installation with enumerable sub-components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Installation {
    /// Root directory of the core installation.
    pub root_path: PathBuf,
    /// Core version, when determinable.
    pub version: Option<String>,
    pub plugins: Vec<Extension>,
    pub themes: Vec<Extension>,
}

/// Discovery found no valid installation at the probed path.
///
/// Not an error to identification callers: it resolves the path to an
/// unclassified identity.
#[derive(Clone, Debug, Error)]
#[error("no installation found at {}", path.display())]
pub struct DiscoveryFailure {
    pub path: PathBuf,
}

/// The external discovery service: probes a path that may lie inside an
/// installation and returns its descriptor.
pub trait InstallationResolver: Send {
    fn resolve(&self, path: &Path) -> Result<Installation, DiscoveryFailure>;
}

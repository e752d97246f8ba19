//! Integration tests for lazy path classification: discovery runs at most
//! once per unknown subtree and every resolution is memoized.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sigscan::{
    DiscoveryFailure, Extension, FileIdentifier, FileIdentity, FileType, Installation,
    InstallationResolver,
};

/// Resolver that counts probes, so tests can assert on discovery frequency.
struct CountingResolver {
    installation: Installation,
    probes: Arc<AtomicUsize>,
}

impl InstallationResolver for CountingResolver {
    fn resolve(&self, path: &Path) -> Result<Installation, DiscoveryFailure> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if path.starts_with(&self.installation.root_path) {
            Ok(self.installation.clone())
        } else {
            Err(DiscoveryFailure {
                path: path.to_path_buf(),
            })
        }
    }
}

fn sample_installation() -> Installation {
    Installation {
        root_path: PathBuf::from("/srv/app"),
        version: Some("6.4.2".to_string()),
        plugins: vec![Extension {
            name: "Example Plugin".to_string(),
            slug: "plugin-x".to_string(),
            path: PathBuf::from("/srv/app/extensions/plugins/plugin-x"),
            version: Some("1.2.0".to_string()),
        }],
        themes: vec![Extension {
            name: "Example Theme".to_string(),
            slug: "theme-y".to_string(),
            path: PathBuf::from("/srv/app/extensions/themes/theme-y"),
            version: None,
        }],
    }
}

fn counting_identifier() -> (FileIdentifier, Arc<AtomicUsize>) {
    let probes = Arc::new(AtomicUsize::new(0));
    let identifier = FileIdentifier::new(Box::new(CountingResolver {
        installation: sample_installation(),
        probes: Arc::clone(&probes),
    }));
    (identifier, probes)
}

#[test]
fn repeat_queries_for_the_same_path_probe_once() {
    let (mut identifier, probes) = counting_identifier();
    let path = Path::new("/srv/app/extensions/plugins/plugin-x/readme.txt");

    let first = identifier.identify(path, true);
    assert!(matches!(first, FileIdentity::Known(_)));
    assert_eq!(probes.load(Ordering::SeqCst), 1);

    let second = identifier.identify(path, true);
    assert!(matches!(second, FileIdentity::Known(_)));
    assert_eq!(probes.load(Ordering::SeqCst), 1);
}

#[test]
fn paths_directly_under_the_core_root_reuse_the_seeded_subtree() {
    let (mut identifier, probes) = counting_identifier();
    identifier.identify(Path::new("/srv/app/index.php"), true);
    assert_eq!(probes.load(Ordering::SeqCst), 1);

    // A sibling core file is covered by the discovered root; no new probe.
    let identity = identifier.identify(Path::new("/srv/app/license.txt"), true);
    assert_eq!(probes.load(Ordering::SeqCst), 1);
    match identity {
        FileIdentity::Known(known) => {
            assert_eq!(known.file_type, FileType::Core);
            assert_eq!(known.local_path, PathBuf::from("license.txt"));
        }
        other => panic!("expected Known, got {other:?}"),
    }
}

#[test]
fn plugin_and_theme_groups_are_final() {
    let (mut identifier, _probes) = counting_identifier();
    let plugin = identifier.identify(
        Path::new("/srv/app/extensions/plugins/plugin-x/deep/nested/code.php"),
        true,
    );
    match plugin {
        FileIdentity::Known(known) => {
            assert_eq!(known.file_type, FileType::Plugin);
            assert_eq!(known.local_path, PathBuf::from("deep/nested/code.php"));
        }
        other => panic!("expected Known, got {other:?}"),
    }

    let theme = identifier.identify(
        Path::new("/srv/app/extensions/themes/theme-y/style.css"),
        true,
    );
    match theme {
        FileIdentity::Known(known) => {
            assert_eq!(known.file_type, FileType::Theme);
            assert_eq!(known.extension.as_ref().unwrap().slug, "theme-y");
        }
        other => panic!("expected Known, got {other:?}"),
    }
}

#[test]
fn failed_discovery_is_memoized_at_the_queried_path() {
    let (mut identifier, probes) = counting_identifier();
    let outside = Path::new("/opt/other/file.bin");

    assert!(matches!(
        identifier.identify(outside, true),
        FileIdentity::Unclassified
    ));
    assert_eq!(probes.load(Ordering::SeqCst), 1);

    // The exact path never probes again.
    assert!(matches!(
        identifier.identify(outside, true),
        FileIdentity::Unclassified
    ));
    assert_eq!(probes.load(Ordering::SeqCst), 1);
}

#[test]
fn core_and_extension_attribution_coexist_after_one_discovery() {
    let (mut identifier, probes) = counting_identifier();
    let core = identifier.identify(Path::new("/srv/app/includes/functions.php"), true);
    let plugin = identifier.identify(
        Path::new("/srv/app/extensions/plugins/plugin-x/main.php"),
        true,
    );
    assert_eq!(probes.load(Ordering::SeqCst), 1);
    assert_eq!(core.file_type(), FileType::Core);
    assert_eq!(plugin.file_type(), FileType::Plugin);
}

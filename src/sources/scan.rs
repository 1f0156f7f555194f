//! File-tree listing for a single source.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use vitrine_common::{paths::detect_media_type, Error, MediaType, Result};
use walkdir::WalkDir;

/// Media files of one source, keyed by `/`-separated path relative to the
/// scan root. Ordered, so iteration is lexical.
pub type Catalog = BTreeMap<String, MediaType>;

/// Walk `root` and collect every image and video below it.
///
/// Fails when the root is missing or unreadable, or on any I/O error other
/// than a permission denial on a nested entry (those folders are skipped).
pub fn scan_tree(source_name: &str, root: &Path) -> Result<Catalog> {
    info!("Scanning source '{}' at {:?}", source_name, root);

    let metadata = std::fs::metadata(root)
        .map_err(|e| Error::scan(source_name, format!("cannot read {:?}: {}", root, e)))?;
    if !metadata.is_dir() {
        return Err(Error::scan(
            source_name,
            format!("{:?} is not a directory", root),
        ));
    }

    let mut catalog = Catalog::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let permission_denied = e
                    .io_error()
                    .map(|io| io.kind() == ErrorKind::PermissionDenied)
                    .unwrap_or(false);
                if permission_denied && e.depth() > 0 {
                    warn!("Skipping unreadable entry in '{}': {}", source_name, e);
                    continue;
                }
                return Err(Error::scan(source_name, e.to_string()));
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let Some(media_type) = detect_media_type(entry.path()) else {
            skipped += 1;
            continue;
        };

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        catalog.insert(to_catalog_key(relative), media_type);
    }

    debug!(
        "Source '{}': {} media files, {} other files skipped",
        source_name,
        catalog.len(),
        skipped
    );

    Ok(catalog)
}

/// Run [`scan_tree`] on the blocking pool.
pub async fn scan_tree_blocking(source_name: String, root: PathBuf) -> Result<Catalog> {
    let name = source_name.clone();
    tokio::task::spawn_blocking(move || scan_tree(&source_name, &root))
        .await
        .map_err(|e| Error::scan(name, format!("scan task failed: {e}")))?
}

fn to_catalog_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

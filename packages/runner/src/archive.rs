// ABOUTME: Build context archiving for per-run image builds
// ABOUTME: Snapshots a package tree into an in-memory tar holding exactly one root Dockerfile

use crate::error::ArchiveError;
use bytes::Bytes;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Reserved name of the build recipe at the archive root
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Recipe used when the caller does not supply one
pub const DEFAULT_DOCKERFILE: &str = include_str!("../assets/Dockerfile.tmpl");

/// Immutable tar build context.
///
/// Cheap to clone; every call to [`ContextArchive::reader`] starts from the
/// first byte, so the archive can be replayed.
#[derive(Clone, PartialEq, Eq)]
pub struct ContextArchive {
    bytes: Bytes,
}

impl ContextArchive {
    /// Seekable reader positioned at the start of the archive
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.bytes.clone())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ContextArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextArchive")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Archive `context_path` and add the Dockerfile from `dockerfile`.
///
/// `dockerfile` may be absolute or relative to `context_path`. When it is
/// `None` or empty the embedded [`DEFAULT_DOCKERFILE`] is used. Any
/// `Dockerfile` already present in the tree is left out so the supplied or
/// default recipe is the only one in the archive.
pub fn build_context(
    context_path: &Path,
    dockerfile: Option<&Path>,
) -> Result<ContextArchive, ArchiveError> {
    let recipe = read_dockerfile(context_path, dockerfile)?;

    std::fs::read_dir(context_path).map_err(|source| ArchiveError::UnreadableDirectory {
        path: context_path.to_path_buf(),
        source,
    })?;

    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.mode(HeaderMode::Complete);

    let walker = WalkDir::new(context_path)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_root_dockerfile(entry));

    let mut entries = 0usize;
    for entry in walker {
        let entry = entry?;

        if !entry.file_type().is_dir() && entry.file_name() == DOCKERFILE_NAME {
            continue;
        }

        let name = entry
            .path()
            .strip_prefix(context_path)
            .map_err(|e| ArchiveError::Entry {
                path: entry.path().to_path_buf(),
                source: std::io::Error::other(e),
            })?;

        builder
            .append_path_with_name(entry.path(), name)
            .map_err(|source| ArchiveError::Entry {
                path: name.to_path_buf(),
                source,
            })?;
        entries += 1;
    }

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(recipe.len() as u64);
    builder
        .append_data(&mut header, DOCKERFILE_NAME, recipe.as_slice())
        .map_err(|source| ArchiveError::Write {
            what: "Dockerfile",
            source,
        })?;

    let bytes = builder.into_inner().map_err(|source| ArchiveError::Write {
        what: "tar archive",
        source,
    })?;

    debug!(
        "Built context for {} ({} entries + Dockerfile, {} bytes)",
        context_path.display(),
        entries,
        bytes.len()
    );

    Ok(ContextArchive {
        bytes: Bytes::from(bytes),
    })
}

fn is_root_dockerfile(entry: &DirEntry) -> bool {
    entry.depth() == 1 && entry.file_name() == DOCKERFILE_NAME
}

fn read_dockerfile(context_path: &Path, dockerfile: Option<&Path>) -> Result<Vec<u8>, ArchiveError> {
    let Some(path) = dockerfile.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(DEFAULT_DOCKERFILE.as_bytes().to_vec());
    };

    let full_path = resolve_dockerfile(context_path, path);
    std::fs::read(&full_path).map_err(|source| ArchiveError::UnreadableDockerfile {
        path: full_path,
        source,
    })
}

fn resolve_dockerfile(context_path: &Path, dockerfile: &Path) -> PathBuf {
    if dockerfile.is_absolute() {
        dockerfile.to_path_buf()
    } else {
        context_path.join(dockerfile)
    }
}

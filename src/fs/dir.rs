use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::vfs::VirtualTree;
use crate::{Error, Result};

/// Read access to some storage that can be enumerated into a tree.
///
/// Paths handed to a listing are host paths built by joining the enumeration root with the
/// names returned from [`Listing::list_directory`].
pub trait Listing {
    /// Names (not paths) of the direct children of a directory.
    fn list_directory(&self, path: &Path) -> Result<Vec<String>>;

    fn is_directory(&self, path: &Path) -> Result<bool>;

    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
}

/// How file contents are brought into a tree built from storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Loading {
    /// Read every file immediately; each one is logged as a `Create`.
    Eager,
    /// Read a file on its first access; each one is logged as an `Exists` marker.
    #[default]
    Lazy,
}

/// Listing over the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalListing;

impl Listing for LocalListing {
    fn list_directory(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path).map_err(Error::io(path))? {
            let entry = entry.map_err(Error::io(path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn is_directory(&self, path: &Path) -> Result<bool> {
        let metadata = std::fs::metadata(path).map_err(Error::io(path))?;
        Ok(metadata.is_dir())
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(Error::io(path))
    }
}

impl VirtualTree {
    /// Builds a tree from every file under `root`.
    ///
    /// Directories are walked depth-first with children in name order. Tree paths are relative
    /// to `root` with a leading `/`; if `root` is itself a file the tree holds that single file
    /// under its name.
    pub fn from_listing<L>(listing: Arc<L>, root: &Path, loading: Loading) -> Result<VirtualTree>
    where
        L: Listing + Send + Sync + 'static,
    {
        let mut files = Vec::new();
        if listing.is_directory(root)? {
            collect_files(listing.as_ref(), root, String::new(), &mut files)?;
        } else {
            let name = root
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::PathInvalid(root.display().to_string()))?;
            files.push((format!("/{name}"), root.to_path_buf()));
        }
        debug!(root = %root.display(), files = files.len(), ?loading, "tree from storage");

        let mut tree = VirtualTree::new();
        for (path, host) in files {
            match loading {
                Loading::Eager => {
                    let content = listing.read_file(&host)?;
                    tree.create(&path, content)?;
                }
                Loading::Lazy => {
                    let listing = listing.clone();
                    tree.track_lazy(
                        &path,
                        Box::new(move |_| Ok(listing.read_file(&host)?)),
                    )?;
                }
            }
        }
        Ok(tree)
    }

    /// Builds a tree from a directory on the local file system.
    pub fn from_dir<P: AsRef<Path>>(root: P, loading: Loading) -> Result<VirtualTree> {
        Self::from_listing(Arc::new(LocalListing), root.as_ref(), loading)
    }
}

fn collect_files<L: Listing + ?Sized>(
    listing: &L,
    host: &Path,
    inner: String,
    files: &mut Vec<(String, PathBuf)>,
) -> Result<()> {
    let mut names = listing.list_directory(host)?;
    names.sort();
    for name in names {
        let host_child = host.join(&name);
        let inner_child = format!("{inner}/{name}");
        if listing.is_directory(&host_child)? {
            collect_files(listing, &host_child, inner_child, files)?;
        } else {
            files.push((inner_child, host_child));
        }
    }
    Ok(())
}

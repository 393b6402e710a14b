use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::Result;

/// Produces the content of a lazy entry. Receives the entry path.
pub type Loader = Box<dyn Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync>;

enum Source {
    Materialized(Vec<u8>),
    Lazy {
        path: String,
        loader: Mutex<Option<Loader>>,
        cache: OnceLock<Vec<u8>>,
    },
}

/// Immutable, cheaply clonable handle to file content.
///
/// Lazy content runs its loader on first access only; the loaded bytes are cached and shared
/// by every clone of the handle. A failed load leaves the loader in place so a later read may
/// retry.
#[derive(Clone)]
pub struct Content(Arc<Source>);

impl Content {
    pub fn new<C: Into<Vec<u8>>>(bytes: C) -> Self {
        Self(Arc::new(Source::Materialized(bytes.into())))
    }

    pub fn lazy<P: Into<String>>(path: P, loader: Loader) -> Self {
        Self(Arc::new(Source::Lazy {
            path: path.into(),
            loader: Mutex::new(Some(loader)),
            cache: OnceLock::new(),
        }))
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        match self.0.as_ref() {
            Source::Materialized(bytes) => Ok(bytes),
            Source::Lazy {
                path,
                loader,
                cache,
            } => {
                if let Some(bytes) = cache.get() {
                    return Ok(bytes);
                }
                let mut guard = loader.lock().unwrap_or_else(PoisonError::into_inner);
                // another reader may have finished while we waited for the lock
                if let Some(bytes) = cache.get() {
                    return Ok(bytes);
                }
                let load = guard.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("loader for \"{path}\" is gone before content was cached")
                })?;
                let bytes = load(path)?;
                *guard = None;
                Ok(cache.get_or_init(|| bytes))
            }
        }
    }

    /// True if the bytes are available without running a loader.
    pub fn is_loaded(&self) -> bool {
        match self.0.as_ref() {
            Source::Materialized(_) => true,
            Source::Lazy { cache, .. } => cache.get().is_some(),
        }
    }

    /// Compares bytes; two handles to the same allocation are equal without loading.
    pub fn same_as(&self, other: &Content) -> Result<bool> {
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ok(true);
        }
        Ok(self.bytes()? == other.bytes()?)
    }
}

impl PartialEq for Content {
    /// Content that cannot be loaded is never equal to anything but itself.
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other).unwrap_or(false)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_ref() {
            Source::Materialized(bytes) => write!(f, "Content({} bytes)", bytes.len()),
            Source::Lazy { cache, .. } => match cache.get() {
                Some(bytes) => write!(f, "Content(lazy, {} bytes)", bytes.len()),
                None => write!(f, "Content(lazy, not loaded)"),
            },
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::new(value.as_bytes())
    }
}

impl From<&[u8]> for Content {
    fn from(value: &[u8]) -> Self {
        Content::new(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content::new(value)
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::new(value.into_bytes())
    }
}

/// A tracked file: its normalized path and its content.
///
/// Entries are never mutated; overwriting a path replaces its entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    path: String,
    content: Content,
}

impl FileEntry {
    pub fn new<P: Into<String>, C: Into<Content>>(path: P, content: C) -> FileEntry {
        FileEntry {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Creates an entry whose content is loaded on first read.
    pub fn lazy<P: Into<String>>(path: P, loader: Loader) -> FileEntry {
        let path = path.into();
        FileEntry {
            content: Content::lazy(path.clone(), loader),
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        self.content.bytes()
    }

    /// Same content under another path (used by renames).
    pub fn moved_to<P: Into<String>>(&self, path: P) -> FileEntry {
        FileEntry {
            path: path.into(),
            content: self.content.clone(),
        }
    }
}

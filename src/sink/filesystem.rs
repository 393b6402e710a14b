use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::sink::{NoHooks, Sink, SinkHooks, StagingArea};
use crate::{Error, Result};

/// Storage operations the real file system sink needs. Paths are host paths.
///
/// Every call blocks until the operation has finished; none of them is retried.
pub trait Host {
    fn unlink(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> Result<bool>;

    /// True for regular files only.
    fn is_file(&self, path: &Path) -> Result<bool>;

    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replaces the file content, creating missing parent directories first.
    fn write(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Moves a file, creating missing parent directories of `to` first.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

/// [`Host`] over the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalHost;

impl LocalHost {
    /// Makes directories recursively.
    /// Returns the directories that had to be created, outermost first.
    fn mkdir_all(path: &Path) -> Result<Vec<PathBuf>> {
        // Looking for the first existing parent
        let mut existing = path.to_path_buf();
        while !std::fs::exists(&existing).map_err(Error::io(&existing))? {
            match existing.parent() {
                Some(parent) => existing = parent.to_path_buf(),
                None => break,
            }
        }

        // Create from the closest existing parent to the target path
        let missing = path.strip_prefix(&existing).unwrap_or(Path::new(""));
        let mut created = Vec::new();
        let mut built = existing;
        for component in missing.components() {
            built.push(component);
            if !std::fs::exists(&built).map_err(Error::io(&built))? {
                std::fs::create_dir(&built).map_err(Error::io(&built))?;
                created.push(built.clone());
            }
        }
        Ok(created)
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            let created = Self::mkdir_all(parent)?;
            if !created.is_empty() {
                trace!(?created, "created directories");
            }
        }
        Ok(())
    }
}

impl Host for LocalHost {
    fn unlink(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(Error::io(path))
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        std::fs::exists(path).map_err(Error::io(path))
    }

    fn is_file(&self, path: &Path) -> Result<bool> {
        Ok(path.is_file())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(Error::io(path))
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        Self::ensure_parent(path)?;
        std::fs::write(path, content).map_err(Error::io(path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_parent(to)?;
        std::fs::rename(from, to).map_err(Error::io(from))
    }
}

/// Sink that applies a commit to a directory.
///
/// Validation consults the directory as well as the staged actions. The flush runs deletes,
/// then renames, then creates, then updates, so content staged for a rename target lands
/// after the file has moved. Partial failures are not rolled back.
pub struct FileSystemSink<H: Host = LocalHost> {
    root: PathBuf,
    host: H,
    staging: StagingArea,
    hooks: Box<dyn SinkHooks>,
}

impl FileSystemSink<LocalHost> {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_host(root, LocalHost)
    }
}

impl<H: Host> FileSystemSink<H> {
    pub fn with_host<P: AsRef<Path>>(root: P, host: H) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            host,
            staging: StagingArea::default(),
            hooks: Box::new(NoHooks),
        }
    }

    pub fn with_hooks<S: SinkHooks + 'static>(mut self, hooks: S) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn to_host(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl<H: Host> Sink for FileSystemSink<H> {
    fn staging(&self) -> &StagingArea {
        &self.staging
    }

    fn staging_mut(&mut self) -> &mut StagingArea {
        &mut self.staging
    }

    fn hooks(&mut self) -> &mut dyn SinkHooks {
        self.hooks.as_mut()
    }

    fn destination_exists(&self, path: &str) -> Result<bool> {
        self.host.exists(&self.to_host(path))
    }

    fn destination_is_file(&self, path: &str) -> Result<bool> {
        self.host.is_file(&self.to_host(path))
    }

    fn done(&mut self) -> Result<()> {
        // lazy content may live at paths about to be moved or removed
        let mut writes = Vec::new();
        for (path, content) in self.staging.creations().chain(self.staging.updates()) {
            writes.push((self.to_host(path), content.bytes()?.to_vec()));
        }

        let deletions: Vec<PathBuf> = self.staging.deletions().map(|p| self.to_host(p)).collect();
        for path in &deletions {
            trace!(path = %path.display(), "unlink");
            self.host.unlink(path)?;
        }
        let renames: Vec<(PathBuf, PathBuf)> = self
            .staging
            .renames()
            .map(|(from, to)| (self.to_host(from), self.to_host(to)))
            .collect();
        for (from, to) in &renames {
            trace!(from = %from.display(), to = %to.display(), "rename");
            self.host.rename(from, to)?;
        }
        for (path, content) in &writes {
            trace!(path = %path.display(), bytes = content.len(), "write");
            self.host.write(path, content)?;
        }
        debug!(
            deleted = deletions.len(),
            renamed = renames.len(),
            written = writes.len(),
            "flushed to {}",
            self.root.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Loading;
    use crate::vfs::VirtualTree;
    use std::cell::RefCell;
    use tempdir::TempDir;

    fn setup_test_dir() -> TempDir {
        let tmp = TempDir::new("sink_test").unwrap();
        std::fs::write(tmp.path().join("keep.txt"), b"keep").unwrap();
        std::fs::write(tmp.path().join("old.txt"), b"old").unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/trash.txt"), b"trash").unwrap();
        tmp
    }

    fn read(tmp: &TempDir, path: &str) -> Option<String> {
        std::fs::read_to_string(tmp.path().join(path)).ok()
    }

    mod local_host {
        use super::*;

        #[test]
        fn test_write_creates_parents() {
            let tmp = TempDir::new("host_test").unwrap();
            let path = tmp.path().join("a/b/c/file.txt");
            LocalHost.write(&path, b"deep").unwrap();
            assert_eq!(LocalHost.read(&path).unwrap(), b"deep");
            assert!(LocalHost.exists(&path).unwrap());
        }

        #[test]
        fn test_mkdir_all_reports_created() {
            let tmp = TempDir::new("host_test").unwrap();
            let created = LocalHost::mkdir_all(&tmp.path().join("x/y")).unwrap();
            assert_eq!(created, vec![tmp.path().join("x"), tmp.path().join("x/y")]);
            assert!(LocalHost::mkdir_all(&tmp.path().join("x/y")).unwrap().is_empty());
        }

        #[test]
        fn test_rename_and_unlink() {
            let tmp = TempDir::new("host_test").unwrap();
            let from = tmp.path().join("from.txt");
            let to = tmp.path().join("nested/to.txt");
            LocalHost.write(&from, b"x").unwrap();
            LocalHost.rename(&from, &to).unwrap();
            assert!(!LocalHost.exists(&from).unwrap());
            LocalHost.unlink(&to).unwrap();
            assert!(!LocalHost.exists(&to).unwrap());
            assert!(matches!(LocalHost.unlink(&to), Err(Error::Io { .. })));
        }
    }

    mod commit {
        use super::*;

        #[test]
        fn test_commit_lazy_tree_back_to_its_directory() {
            let tmp = setup_test_dir();
            let mut tree = VirtualTree::from_dir(tmp.path(), Loading::Lazy).unwrap();
            tree.overwrite("/keep.txt", "kept").unwrap();
            tree.rename("/old.txt", "/moved/new.txt").unwrap();
            tree.delete("/docs/trash.txt").unwrap();
            tree.create("/docs/fresh.txt", "fresh").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            sink.commit(&tree, false).unwrap();

            assert_eq!(read(&tmp, "keep.txt").as_deref(), Some("kept"));
            assert_eq!(read(&tmp, "old.txt"), None);
            assert_eq!(read(&tmp, "moved/new.txt").as_deref(), Some("old"));
            assert_eq!(read(&tmp, "docs/trash.txt"), None);
            assert_eq!(read(&tmp, "docs/fresh.txt").as_deref(), Some("fresh"));
        }

        #[test]
        fn test_copy_of_moved_file() {
            let tmp = setup_test_dir();
            let mut tree = VirtualTree::from_dir(tmp.path(), Loading::Lazy).unwrap();
            tree.copy("/old.txt", "/copy.txt").unwrap();
            tree.delete("/old.txt").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            sink.commit(&tree, false).unwrap();
            assert_eq!(read(&tmp, "copy.txt").as_deref(), Some("old"));
            assert_eq!(read(&tmp, "old.txt"), None);
        }

        #[test]
        fn test_rename_then_overwrite() {
            let tmp = setup_test_dir();
            let mut tree = VirtualTree::from_dir(tmp.path(), Loading::Lazy).unwrap();
            tree.rename("/old.txt", "/new.txt").unwrap();
            tree.overwrite("/new.txt", "rewritten").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            sink.commit(&tree, false).unwrap();
            assert_eq!(read(&tmp, "new.txt").as_deref(), Some("rewritten"));
            assert_eq!(read(&tmp, "old.txt"), None);
        }

        #[test]
        fn test_validation_leaves_disk_untouched() {
            let tmp = setup_test_dir();
            let mut tree = VirtualTree::new();
            tree.create("/fresh.txt", "fresh").unwrap();
            tree.create("/keep.txt", "clash").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            let result = sink.commit(&tree, false);
            assert!(matches!(result, Err(Error::AlreadyExists(p)) if p == "/keep.txt"));
            assert_eq!(read(&tmp, "fresh.txt"), None);
            assert_eq!(read(&tmp, "keep.txt").as_deref(), Some("keep"));
        }

        #[test]
        fn test_swap_through_temporary_name() {
            let tmp = TempDir::new("sink_test").unwrap();
            std::fs::write(tmp.path().join("a"), b"A").unwrap();
            std::fs::write(tmp.path().join("b"), b"B").unwrap();
            let mut tree = VirtualTree::from_dir(tmp.path(), Loading::Lazy).unwrap();
            tree.rename("/a", "/tmp").unwrap();
            tree.rename("/b", "/a").unwrap();
            tree.rename("/tmp", "/b").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            sink.commit(&tree, false).unwrap();
            assert_eq!(read(&tmp, "a").as_deref(), Some("B"));
            assert_eq!(read(&tmp, "b").as_deref(), Some("A"));
            assert_eq!(read(&tmp, "tmp"), None);
        }

        #[test]
        fn test_file_below_existing_file() {
            let tmp = setup_test_dir();
            let mut tree = VirtualTree::from_dir(tmp.path(), Loading::Lazy).unwrap();
            tree.create("/docs/inside.txt", "fine").unwrap();
            tree.create("/keep.txt/inner.txt", "clash").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            assert!(matches!(
                sink.commit(&tree, false),
                Err(Error::PathConflict { file, .. }) if file == "/keep.txt"
            ));
            assert_eq!(read(&tmp, "docs/inside.txt"), None);
            assert_eq!(read(&tmp, "keep.txt").as_deref(), Some("keep"));
        }

        #[test]
        fn test_force_skips_disk_checks() {
            let tmp = setup_test_dir();
            let mut tree = VirtualTree::new();
            tree.create("/keep.txt", "forced").unwrap();

            let mut sink = FileSystemSink::new(tmp.path());
            sink.commit(&tree, true).unwrap();
            assert_eq!(read(&tmp, "keep.txt").as_deref(), Some("forced"));
        }

        #[test]
        fn test_eager_tree_commits_as_creates() {
            let tmp = TempDir::new("sink_test").unwrap();
            std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
            let mut tree = VirtualTree::from_dir(tmp.path(), Loading::Eager).unwrap();
            tree.overwrite("/a.txt", "b").unwrap();
            std::fs::remove_file(tmp.path().join("a.txt")).unwrap();

            // eager trees describe their files as creates
            let mut sink = FileSystemSink::new(tmp.path());
            sink.commit(&tree, false).unwrap();
            assert_eq!(read(&tmp, "a.txt").as_deref(), Some("b"));
        }
    }

    mod custom_host {
        use super::*;

        /// Host that records calls instead of touching the disk.
        #[derive(Default)]
        struct JournalHost {
            calls: RefCell<Vec<String>>,
        }

        impl Host for JournalHost {
            fn unlink(&self, path: &Path) -> Result<()> {
                self.calls.borrow_mut().push(format!("unlink {}", path.display()));
                Ok(())
            }

            fn exists(&self, path: &Path) -> Result<bool> {
                Ok(path.ends_with("base"))
            }

            fn is_file(&self, path: &Path) -> Result<bool> {
                self.exists(path)
            }

            fn read(&self, _path: &Path) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }

            fn write(&self, path: &Path, _content: &[u8]) -> Result<()> {
                self.calls.borrow_mut().push(format!("write {}", path.display()));
                Ok(())
            }

            fn rename(&self, from: &Path, to: &Path) -> Result<()> {
                self.calls
                    .borrow_mut()
                    .push(format!("rename {} {}", from.display(), to.display()));
                Ok(())
            }
        }

        #[test]
        fn test_flush_order() {
            let mut tree = VirtualTree::new();
            tree.track_existing("/base", "b").unwrap();
            tree.track_existing("/gone", "g").unwrap();
            tree.create("/new", "n").unwrap();
            tree.rename("/base", "/renamed").unwrap();
            tree.overwrite("/renamed", "changed").unwrap();
            tree.delete("/gone").unwrap();

            let mut sink = FileSystemSink::with_host("/r", JournalHost::default());
            sink.commit(&tree, true).unwrap();
            assert_eq!(
                *sink.host().calls.borrow(),
                vec![
                    "unlink /r/gone",
                    "rename /r/base /r/renamed",
                    "write /r/new",
                    "write /r/renamed",
                ]
            );
        }

        #[test]
        fn test_validation_uses_host() {
            let mut tree = VirtualTree::new();
            tree.create("/base", "clash").unwrap();
            let mut sink = FileSystemSink::with_host("/r", JournalHost::default());
            assert!(matches!(
                sink.commit(&tree, false),
                Err(Error::AlreadyExists(_))
            ));
            assert!(sink.host().calls.borrow().is_empty());
        }
    }

    mod flush_properties {
        use super::*;
        use crate::Tree;
        use crate::vfs::action::tests::replay;
        use crate::vfs::{Action, compact};
        use proptest::prelude::*;
        use std::borrow::Cow;
        use std::collections::{BTreeMap, HashSet};

        const NAMES: [&str; 4] = ["/a", "/b", "/c", "/d"];

        /// In-memory host that refuses to replace a file by renaming onto it.
        #[derive(Default)]
        struct MapHost {
            files: RefCell<BTreeMap<PathBuf, Vec<u8>>>,
        }

        impl Host for MapHost {
            fn unlink(&self, path: &Path) -> Result<()> {
                match self.files.borrow_mut().remove(path) {
                    Some(_) => Ok(()),
                    None => Err(Error::NotFound(path.display().to_string())),
                }
            }

            fn exists(&self, path: &Path) -> Result<bool> {
                Ok(self.files.borrow().contains_key(path))
            }

            fn is_file(&self, path: &Path) -> Result<bool> {
                self.exists(path)
            }

            fn read(&self, path: &Path) -> Result<Vec<u8>> {
                self.files
                    .borrow()
                    .get(path)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(path.display().to_string()))
            }

            fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
                self.files
                    .borrow_mut()
                    .insert(path.to_path_buf(), content.to_vec());
                Ok(())
            }

            fn rename(&self, from: &Path, to: &Path) -> Result<()> {
                let mut files = self.files.borrow_mut();
                if files.contains_key(to) {
                    return Err(Error::AlreadyExists(to.display().to_string()));
                }
                let content = files
                    .remove(from)
                    .ok_or_else(|| Error::NotFound(from.display().to_string()))?;
                files.insert(to.to_path_buf(), content);
                Ok(())
            }
        }

        /// Tree that is nothing but a log.
        struct LogTree(Vec<Action>);

        impl Tree for LogTree {
            fn find(&self, _glob: &str) -> Result<Vec<String>> {
                Ok(Vec::new())
            }

            fn exists(&self, _path: &str) -> bool {
                false
            }

            fn read(&self, _path: &str) -> Result<Option<Cow<'_, [u8]>>> {
                Ok(None)
            }

            fn actions(&self) -> Option<&[Action]> {
                Some(&self.0)
            }
        }

        fn base(name: &str) -> String {
            format!("base {name}")
        }

        /// Random log over the base files `/a` and `/b`, only issuing valid actions.
        fn drive(ops: &[(u8, usize, usize, u8)]) -> Vec<Action> {
            let mut files: HashSet<&str> = ["/a", "/b"].into_iter().collect();
            let mut log: Vec<Action> = ["/a", "/b"]
                .into_iter()
                .map(|path| Action::Exists {
                    path: path.to_string(),
                    content: base(path).into(),
                })
                .collect();
            for &(op, x, y, byte) in ops {
                let (p, q) = (NAMES[x % 4], NAMES[y % 4]);
                let content = vec![b'a' + byte % 26];
                let action = match op % 4 {
                    0 if !files.contains(p) => {
                        files.insert(p);
                        Action::Create {
                            path: p.to_string(),
                            content: content.into(),
                        }
                    }
                    1 if files.contains(p) => Action::Overwrite {
                        path: p.to_string(),
                        content: content.into(),
                    },
                    2 if files.contains(p) && !files.contains(q) => {
                        files.remove(p);
                        files.insert(q);
                        Action::Rename {
                            path: p.to_string(),
                            to: q.to_string(),
                        }
                    }
                    3 if files.contains(p) => {
                        files.remove(p);
                        Action::Delete {
                            path: p.to_string(),
                        }
                    }
                    _ => continue,
                };
                log.push(action);
            }
            log
        }

        proptest! {
            #[test]
            fn flush_reproduces_log(
                ops in proptest::collection::vec((0u8..4, 0usize..4, 0usize..4, any::<u8>()), 0..24),
                compacted in any::<bool>(),
            ) {
                let raw = drive(&ops);
                let expected: BTreeMap<String, Vec<u8>> = replay(&raw)
                    .expect("generated log replays")
                    .into_iter()
                    .collect();
                let log = if compacted {
                    raw.iter().cloned().fold(Vec::new(), compact)
                } else {
                    raw
                };

                let host = MapHost::default();
                for path in ["/a", "/b"] {
                    host.files
                        .borrow_mut()
                        .insert(PathBuf::from(format!("/w{path}")), base(path).into_bytes());
                }
                let mut sink = FileSystemSink::with_host("/w", host);
                let result = sink.commit(&LogTree(log), false);
                prop_assert!(result.is_ok(), "commit failed: {:?}", result);

                let actual: BTreeMap<String, Vec<u8>> = sink
                    .host()
                    .files
                    .borrow()
                    .iter()
                    .map(|(path, content)| {
                        let path = path.to_string_lossy().trim_start_matches("/w").to_string();
                        (path, content.clone())
                    })
                    .collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}

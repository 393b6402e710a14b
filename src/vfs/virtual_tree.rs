//! This module provides the in-memory staged tree: a map of tracked files plus the action log
//! that reproduces them from the tree's base.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use hashlink::LinkedHashMap;
use tracing::{debug, trace};

use crate::core::utils::{Glob, normalize};
use crate::vfs::{Action, ActionLog, Content, FileEntry, Loader, UpdateBuffer};
use crate::{Error, Result, Tree};

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// Policy for paths present in both trees of a merge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Resolved by context; without an override it behaves as `Error`.
    #[default]
    Default,
    /// Conflicting creates fail with [`Error::AlreadyExists`].
    Error,
    /// Conflicting creates replace the existing content.
    Overwrite,
    /// Only content changes transfer; creates, renames and deletes are ignored.
    ContentOnly,
}

impl MergeStrategy {
    /// Replaces `Default` with `fallback`, or with `Error` if the fallback is `Default` too.
    pub fn resolve(self, fallback: MergeStrategy) -> MergeStrategy {
        match (self, fallback) {
            (MergeStrategy::Default, MergeStrategy::Default) => MergeStrategy::Error,
            (MergeStrategy::Default, fallback) => fallback,
            (strategy, _) => strategy,
        }
    }
}

/// Pending in-place edit of one file, started by [`VirtualTree::begin_update`].
///
/// Indices refer to the content as it was when the update began.
#[derive(Debug, Clone)]
pub struct UpdateRecorder {
    tree: u64,
    path: String,
    buffer: UpdateBuffer,
}

impl UpdateRecorder {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Content snapshot taken by `begin_update`.
    pub fn original(&self) -> &[u8] {
        self.buffer.original()
    }

    pub fn insert_left<C: AsRef<[u8]>>(&mut self, index: usize, content: C) -> Result<&mut Self> {
        self.buffer.insert_left(index, content.as_ref())?;
        Ok(self)
    }

    pub fn insert_right<C: AsRef<[u8]>>(&mut self, index: usize, content: C) -> Result<&mut Self> {
        self.buffer.insert_right(index, content.as_ref())?;
        Ok(self)
    }

    pub fn remove(&mut self, index: usize, length: usize) -> Result<&mut Self> {
        self.buffer.remove(index, length)?;
        Ok(self)
    }

    /// Content the file will have once the update is committed.
    pub fn preview(&self) -> Vec<u8> {
        self.buffer.generate()
    }
}

/// A staged file hierarchy held entirely in memory.
///
/// ### Internal state
///
/// * `entries`: tracked files keyed by normalized path, in insertion order.
/// * `actions`: the compacted log that turns the tree's base into `entries`.
///
/// ### Invariants
///
/// 1. Replaying `actions` in order from the base reproduces `entries` exactly.
/// 2. All keys are normalized (see [`normalize`]).
/// 3. A tree never shares mutable state with another tree; [`VirtualTree::branch`] copies.
///
/// Update handles are bound to the tree that produced them.
#[derive(Debug)]
pub struct VirtualTree {
    id: u64,
    entries: LinkedHashMap<String, FileEntry>,
    actions: ActionLog,
}

impl Default for VirtualTree {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualTree {
    /// Creates an empty tree with an empty log.
    pub fn new() -> Self {
        Self {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            entries: LinkedHashMap::new(),
            actions: ActionLog::new(),
        }
    }

    /// Tracked paths in insertion order.
    pub fn files(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, path: &str) -> Option<&FileEntry> {
        let path = normalize(path).ok()?;
        self.entries.get(&path)
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.actions
    }

    /// Replaces the content of a tracked file.
    pub fn overwrite<C: Into<Content>>(&mut self, path: &str, content: C) -> Result<()> {
        let path = normalize(path)?;
        let content = content.into();
        let entry = self
            .entries
            .get_mut(&path)
            .ok_or_else(|| Error::NotFound(path.clone()))?;
        *entry = FileEntry::new(path.clone(), content.clone());
        trace!(%path, "overwrite");
        self.actions.record(Action::Overwrite { path, content });
        Ok(())
    }

    /// Starts an in-place edit of `path`, snapshotting its current content.
    pub fn begin_update(&self, path: &str) -> Result<UpdateRecorder> {
        let path = normalize(path)?;
        let entry = self
            .entries
            .get(&path)
            .ok_or_else(|| Error::NotFound(path.clone()))?;
        let buffer = UpdateBuffer::new(entry.bytes()?);
        Ok(UpdateRecorder {
            tree: self.id,
            path,
            buffer,
        })
    }

    /// Applies an update if the file still holds the content it started from.
    pub fn commit_update(&mut self, recorder: UpdateRecorder) -> Result<()> {
        if recorder.tree != self.id {
            return Err(Error::InvalidUpdateHandle(recorder.path));
        }
        let current = self
            .entries
            .get(&recorder.path)
            .ok_or_else(|| Error::ContentMutated(recorder.path.clone()))?;
        if current.bytes()? != recorder.original() {
            return Err(Error::ContentMutated(recorder.path));
        }
        let content = recorder.buffer.generate();
        self.overwrite(&recorder.path, content)
    }

    /// Starts tracking a new file.
    pub fn create<C: Into<Content>>(&mut self, path: &str, content: C) -> Result<()> {
        let path = normalize(path)?;
        if self.entries.contains_key(&path) {
            return Err(Error::AlreadyExists(path));
        }
        let content = content.into();
        self.entries
            .insert(path.clone(), FileEntry::new(path.clone(), content.clone()));
        trace!(%path, "create");
        self.actions.record(Action::Create { path, content });
        Ok(())
    }

    /// Starts tracking a file that already exists in the base, loading its content on demand.
    pub fn track_lazy(&mut self, path: &str, loader: Loader) -> Result<()> {
        let path = normalize(path)?;
        let entry = FileEntry::lazy(path.clone(), loader);
        self.track_existing(&path, entry.content().clone())
    }

    /// Starts tracking a file that already exists in the base. Logged as an `Exists` marker.
    pub fn track_existing<C: Into<Content>>(&mut self, path: &str, content: C) -> Result<()> {
        let path = normalize(path)?;
        if self.entries.contains_key(&path) {
            return Err(Error::AlreadyExists(path));
        }
        let content = content.into();
        self.entries
            .insert(path.clone(), FileEntry::new(path.clone(), content.clone()));
        trace!(%path, "exists");
        self.actions.record(Action::Exists { path, content });
        Ok(())
    }

    pub fn copy(&mut self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let content = self
            .entries
            .get(&from)
            .map(|entry| entry.content().clone())
            .ok_or(Error::NotFound(from))?;
        self.create(to, content)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        if !self.entries.contains_key(&from) {
            return Err(Error::NotFound(from));
        }
        if from == to {
            return Ok(());
        }
        if self.entries.contains_key(&to) {
            return Err(Error::AlreadyExists(to));
        }
        if let Some(entry) = self.entries.remove(&from) {
            self.entries.insert(to.clone(), entry.moved_to(to.clone()));
        }
        trace!(%from, %to, "rename");
        self.actions.record(Action::Rename { path: from, to });
        Ok(())
    }

    pub fn delete(&mut self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        if self.entries.remove(&path).is_none() {
            return Err(Error::NotFound(path));
        }
        trace!(%path, "delete");
        self.actions.record(Action::Delete { path });
        Ok(())
    }

    /// Replays one action of another tree on top of this one.
    pub fn apply(&mut self, action: Action, strategy: MergeStrategy) -> Result<()> {
        let strategy = strategy.resolve(MergeStrategy::Error);
        let content_only = strategy == MergeStrategy::ContentOnly;
        match action {
            Action::Exists { path, content } => match self.entries.get(&path) {
                Some(entry) if entry.content().same_as(&content)? => Ok(()),
                Some(_) => match strategy {
                    MergeStrategy::Overwrite => self.overwrite(&path, content),
                    MergeStrategy::ContentOnly => Ok(()),
                    _ => Err(Error::AlreadyExists(path)),
                },
                // this tree already moved or removed its own copy of the base file
                None if content_only || self.actions.mentions(&path) => Ok(()),
                None => self.track_existing(&path, content),
            },
            Action::Overwrite { path, content } => {
                if content_only && !self.entries.contains_key(&path) {
                    debug!(%path, "skip overwrite of untracked path");
                    return Ok(());
                }
                self.overwrite(&path, content)
            }
            Action::Create { path, content } => {
                if content_only {
                    return Ok(());
                }
                if self.entries.contains_key(&path) {
                    match strategy {
                        MergeStrategy::Overwrite => self.overwrite(&path, content),
                        _ => Err(Error::AlreadyExists(path)),
                    }
                } else {
                    self.create(&path, content)
                }
            }
            Action::Rename { path, to } if !content_only => self.rename(&path, &to),
            Action::Delete { path } if !content_only => self.delete(&path),
            Action::Rename { .. } | Action::Delete { .. } => Ok(()),
        }
    }

    /// Independent copy of the files of `tree` matching `glob`.
    pub fn branch<T: Tree + ?Sized>(tree: &T, glob: &str) -> Result<VirtualTree> {
        let paths = tree.find(glob)?;
        debug!(glob, files = paths.len(), "branch");
        let glob = Glob::new(glob)?;
        Self::copy_of(tree, &paths, |path| glob.matches(path))
    }

    /// Splits `tree` into the files outside `glob` and the files inside it.
    pub fn partition<T: Tree + ?Sized>(
        tree: &T,
        glob: &str,
    ) -> Result<(VirtualTree, VirtualTree)> {
        let inside = tree.find(glob)?;
        let selected: HashSet<&str> = inside.iter().map(String::as_str).collect();
        let outside: Vec<String> = tree
            .find("**")?
            .into_iter()
            .filter(|path| !selected.contains(path.as_str()))
            .collect();
        debug!(glob, inside = inside.len(), outside = outside.len(), "partition");
        let glob = Glob::new(glob)?;
        Ok((
            Self::copy_of(tree, &outside, |path| !glob.matches(path))?,
            Self::copy_of(tree, &inside, |path| glob.matches(path))?,
        ))
    }

    /// New tree holding `base` with the changes of `other` applied on top.
    ///
    /// When `other` keeps an action log it is replayed entry by entry; otherwise each of its
    /// files is created or overwritten according to `strategy`.
    pub fn merge<A, B>(base: &A, other: &B, strategy: MergeStrategy) -> Result<VirtualTree>
    where
        A: Tree + ?Sized,
        B: Tree + ?Sized,
    {
        let strategy = strategy.resolve(MergeStrategy::Error);
        let mut tree = Self::branch(base, "**")?;
        match other.actions() {
            Some(actions) => {
                debug!(?strategy, actions = actions.len(), "merge by replay");
                for action in actions {
                    tree.apply(action.clone(), strategy)?;
                }
            }
            None => {
                debug!(?strategy, "merge by content");
                for path in other.find("**")? {
                    let content = other
                        .content(&path)?
                        .ok_or_else(|| Error::NotFound(path.clone()))?;
                    if tree.entries.contains_key(&path) {
                        match strategy {
                            MergeStrategy::Overwrite | MergeStrategy::ContentOnly => {
                                tree.overwrite(&path, content)?
                            }
                            _ => return Err(Error::AlreadyExists(path)),
                        }
                    } else if strategy != MergeStrategy::ContentOnly {
                        tree.create(&path, content)?;
                    }
                }
            }
        }
        Ok(tree)
    }

    /// Copies `paths` out of `tree`. `owns` tells which paths, past or present, belong to the
    /// copy and selects the log entries it keeps.
    fn copy_of<T, F>(tree: &T, paths: &[String], owns: F) -> Result<VirtualTree>
    where
        T: Tree + ?Sized,
        F: Fn(&str) -> bool,
    {
        let mut result = VirtualTree::new();
        match tree.actions() {
            Some(actions) => {
                for path in paths {
                    let content = tree
                        .content(path)?
                        .ok_or_else(|| Error::NotFound(path.clone()))?;
                    result
                        .entries
                        .insert(path.clone(), FileEntry::new(path.clone(), content));
                }
                result.actions = ActionLog::from_actions(actions.to_vec()).restricted_to(owns);
            }
            None => {
                for path in paths {
                    let content = tree
                        .content(path)?
                        .ok_or_else(|| Error::NotFound(path.clone()))?;
                    result.create(path, content)?;
                }
            }
        }
        Ok(result)
    }
}

impl Tree for VirtualTree {
    fn find(&self, glob: &str) -> Result<Vec<String>> {
        let glob = Glob::new(glob)?;
        if glob.is_everything() {
            return Ok(self.files());
        }
        Ok(self
            .entries
            .keys()
            .filter(|path| glob.matches(path))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &str) -> bool {
        normalize(path).is_ok_and(|path| self.entries.contains_key(&path))
    }

    fn read(&self, path: &str) -> Result<Option<Cow<'_, [u8]>>> {
        let path = normalize(path)?;
        match self.entries.get(&path) {
            Some(entry) => Ok(Some(Cow::Borrowed(entry.bytes()?))),
            None => Ok(None),
        }
    }

    fn content(&self, path: &str) -> Result<Option<Content>> {
        let path = normalize(path)?;
        Ok(self.entries.get(&path).map(|entry| entry.content().clone()))
    }

    fn actions(&self) -> Option<&[Action]> {
        Some(self.actions.as_slice())
    }
}

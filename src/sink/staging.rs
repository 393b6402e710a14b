use std::collections::HashMap;

use hashlink::{LinkedHashMap, LinkedHashSet};
use tracing::debug;

use crate::sink::SinkState;
use crate::vfs::{Action, Content};

/// Live renames that moved one base file, and where that file started.
#[derive(Debug, Clone)]
struct Moves {
    origin: String,
    pairs: Vec<usize>,
}

/// Net effect of the actions committed to a sink so far.
///
/// Actions are folded in log order into four batches: files to create, files to update,
/// files to delete and renames. A file created and then renamed is simply created under its
/// final name. Deletions name the place a base file started, so they can run before any rename.
/// Renames keep their staging order; the renames of one file collapse into a single pair unless
/// another file has been moved into the place it started from.
#[derive(Debug, Clone, Default)]
pub struct StagingArea {
    state: SinkState,
    known: HashMap<String, bool>,
    to_create: LinkedHashMap<String, Content>,
    to_update: LinkedHashMap<String, Content>,
    to_delete: LinkedHashSet<String>,
    renames: Vec<Option<(String, String)>>,
    moves: HashMap<String, Moves>,
}

impl StagingArea {
    pub fn state(&self) -> SinkState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SinkState) {
        debug!(from = ?self.state, to = ?state, "sink state");
        self.state = state;
    }

    /// Whether `path` exists after the staged actions, if staging knows it at all.
    /// `None` means the answer depends on the destination.
    pub fn known(&self, path: &str) -> Option<bool> {
        self.known.get(path).copied()
    }

    /// A staged file below `path`, if any.
    pub fn present_under(&self, path: &str) -> Option<&str> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.known
            .iter()
            .find(|(known, present)| **present && known.starts_with(&prefix))
            .map(|(known, _)| known.as_str())
    }

    pub fn stage(&mut self, action: &Action) {
        debug!(kind = %action.kind(), path = action.path(), "stage");
        match action {
            Action::Exists { path, .. } => {
                self.known.entry(path.clone()).or_insert(true);
            }
            Action::Create { path, content } => {
                self.known.insert(path.clone(), true);
                self.to_create.insert(path.clone(), content.clone());
            }
            Action::Overwrite { path, content } => {
                self.known.insert(path.clone(), true);
                if let Some(created) = self.to_create.get_mut(path) {
                    *created = content.clone();
                } else {
                    self.to_update.insert(path.clone(), content.clone());
                }
            }
            Action::Rename { path, to } => self.stage_rename(path, to),
            Action::Delete { path } => self.stage_delete(path),
        }
    }

    fn stage_rename(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        self.known.insert(from.to_string(), false);
        self.known.insert(to.to_string(), true);
        if let Some(content) = self.to_update.remove(from) {
            self.to_update.insert(to.to_string(), content);
        }
        if let Some(content) = self.to_create.remove(from) {
            self.to_create.insert(to.to_string(), content);
            return;
        }

        let mut moves = self.moves.remove(from).unwrap_or_else(|| Moves {
            origin: from.to_string(),
            pairs: Vec::new(),
        });
        // the file stays at its origin until its last rename runs
        let occupied = self.renames.iter().enumerate().any(|(index, pair)| {
            matches!(pair, Some((_, target)) if *target == moves.origin)
                && !moves.pairs.contains(&index)
        });
        let source = if occupied {
            from.to_string()
        } else {
            for &index in &moves.pairs {
                self.renames[index] = None;
            }
            moves.pairs.clear();
            if moves.origin == to {
                debug!(path = to, "renamed back to its origin");
                return;
            }
            moves.origin.clone()
        };
        moves.pairs.push(self.renames.len());
        self.renames.push(Some((source, to.to_string())));
        self.moves.insert(to.to_string(), moves);
    }

    fn stage_delete(&mut self, path: &str) {
        self.known.insert(path.to_string(), false);
        self.to_update.remove(path);
        if self.to_create.remove(path).is_some() {
            return;
        }
        match self.moves.remove(path) {
            Some(moves) => {
                for index in moves.pairs {
                    self.renames[index] = None;
                }
                self.to_delete.insert(moves.origin);
            }
            None => {
                self.to_delete.insert(path.to_string());
            }
        }
    }

    /// Base files to remove, named by where they started.
    pub fn deletions(&self) -> impl Iterator<Item = &str> {
        self.to_delete.iter().map(String::as_str)
    }

    /// New files with their final content, in staging order.
    pub fn creations(&self) -> impl Iterator<Item = (&str, &Content)> {
        self.to_create
            .iter()
            .map(|(path, content)| (path.as_str(), content))
    }

    /// Files whose content changes, in staging order.
    pub fn updates(&self) -> impl Iterator<Item = (&str, &Content)> {
        self.to_update
            .iter()
            .map(|(path, content)| (path.as_str(), content))
    }

    /// Renames in the order they have to run.
    pub fn renames(&self) -> impl Iterator<Item = (&str, &str)> {
        self.renames
            .iter()
            .flatten()
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty()
            && self.to_update.is_empty()
            && self.to_delete.is_empty()
            && self.renames().next().is_none()
    }
}

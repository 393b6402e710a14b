//! Structural operations recorded by a tree, and the log that keeps them compact.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::Error;
use crate::vfs::Content;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Asserts that a file exists in the base with the given content. Mutates nothing.
    Exists { path: String, content: Content },
    /// Replaces the content of a file. The file must exist.
    Overwrite { path: String, content: Content },
    /// Creates a file. The file must not exist.
    Create { path: String, content: Content },
    /// Moves a file. The source must exist and the target must not.
    Rename { path: String, to: String },
    /// Deletes a file. The file must exist.
    Delete { path: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Exists,
    Overwrite,
    Create,
    Rename,
    Delete,
}

impl ActionKind {
    /// Single character tag of the kind.
    pub fn code(self) -> char {
        match self {
            ActionKind::Exists => 'f',
            ActionKind::Overwrite => 'o',
            ActionKind::Create => 'c',
            ActionKind::Rename => 'r',
            ActionKind::Delete => 'd',
        }
    }
}

impl TryFrom<char> for ActionKind {
    type Error = Error;

    fn try_from(code: char) -> Result<Self, Self::Error> {
        match code {
            'f' => Ok(ActionKind::Exists),
            'o' => Ok(ActionKind::Overwrite),
            'c' => Ok(ActionKind::Create),
            'r' => Ok(ActionKind::Rename),
            'd' => Ok(ActionKind::Delete),
            other => Err(Error::UnknownAction(other)),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Action {
    /// The path the action applies to (the source path for renames).
    pub fn path(&self) -> &str {
        match self {
            Action::Exists { path, .. }
            | Action::Overwrite { path, .. }
            | Action::Create { path, .. }
            | Action::Rename { path, .. }
            | Action::Delete { path } => path,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Exists { .. } => ActionKind::Exists,
            Action::Overwrite { .. } => ActionKind::Overwrite,
            Action::Create { .. } => ActionKind::Create,
            Action::Rename { .. } => ActionKind::Rename,
            Action::Delete { .. } => ActionKind::Delete,
        }
    }

    pub fn content(&self) -> Option<&Content> {
        match self {
            Action::Exists { content, .. }
            | Action::Overwrite { content, .. }
            | Action::Create { content, .. } => Some(content),
            Action::Rename { .. } | Action::Delete { .. } => None,
        }
    }

    /// True if the action reads or writes `path` in any role.
    pub fn touches(&self, path: &str) -> bool {
        match self {
            Action::Rename { path: from, to } => from == path || to == path,
            other => other.path() == path,
        }
    }

    /// True for actions that only change the bytes of an existing file.
    pub fn is_content_only(&self) -> bool {
        matches!(self, Action::Overwrite { .. })
    }
}

/// Where the current incarnation of a path started, plus the content rewrites made since.
struct History {
    origin: Option<usize>,
    overwrites: Vec<usize>,
}

fn history(log: &[Action], path: &str) -> History {
    let mut overwrites = Vec::new();
    for (index, action) in log.iter().enumerate().rev() {
        match action {
            Action::Overwrite { path: p, .. } if p == path => overwrites.push(index),
            action if action.touches(path) => {
                return History {
                    origin: Some(index),
                    overwrites,
                };
            }
            _ => {}
        }
    }
    History {
        origin: None,
        overwrites,
    }
}

/// Removes the given indices; `indices` must be sorted in descending order.
fn remove_descending(log: &mut Vec<Action>, indices: &[usize]) {
    for &index in indices {
        log.remove(index);
    }
}

/// Appends `action` to `log`, folding it into earlier entries where possible.
///
/// * An overwrite of a path created earlier becomes that create's content.
/// * A wholesale overwrite drops earlier overwrites of the same incarnation of the path.
/// * Renaming a path created (or renamed-to) earlier retargets that entry, as long as nothing
///   after it refers to the new name.
/// * Deleting a path created earlier erases its whole history.
///
/// Replaying the returned log from the base yields the same files as replaying `log` and then
/// `action`.
pub fn compact(mut log: Vec<Action>, action: Action) -> Vec<Action> {
    match action {
        Action::Overwrite { path, content } => {
            let history = history(&log, &path);
            remove_descending(&mut log, &history.overwrites);
            match history.origin {
                Some(origin) if matches!(log[origin], Action::Create { .. }) => {
                    debug!(%path, "fold overwrite into create");
                    log[origin] = Action::Create { path, content };
                }
                _ => log.push(Action::Overwrite { path, content }),
            }
        }
        Action::Rename { path, to } => {
            if path == to {
                return log;
            }
            let history = history(&log, &path);
            let retarget = history.origin.filter(|&origin| {
                let introduces = match &log[origin] {
                    Action::Create { path: p, .. } => p == &path,
                    Action::Rename { to: t, .. } => t == &path,
                    _ => false,
                };
                introduces && !log[origin + 1..].iter().any(|a| a.touches(&to))
            });
            match retarget {
                Some(origin) => {
                    debug!(%path, %to, "retarget earlier entry");
                    for &index in &history.overwrites {
                        if let Action::Overwrite { path: p, .. } = &mut log[index] {
                            *p = to.clone();
                        }
                    }
                    let cancelled = match &mut log[origin] {
                        Action::Create { path: p, .. } => {
                            *p = to;
                            false
                        }
                        Action::Rename { path: from, to: t } => {
                            *t = to;
                            from == t
                        }
                        _ => false,
                    };
                    if cancelled {
                        log.remove(origin);
                    }
                }
                None => log.push(Action::Rename { path, to }),
            }
        }
        Action::Delete { path } => {
            let history = history(&log, &path);
            match history.origin {
                Some(origin) if matches!(log[origin], Action::Create { .. }) => {
                    debug!(%path, "drop history of created file");
                    remove_descending(&mut log, &history.overwrites);
                    log.remove(origin);
                }
                _ => log.push(Action::Delete { path }),
            }
        }
        other => log.push(other),
    }
    log
}

/// Projects `log` onto the paths accepted by `owns`.
///
/// Entries on owned paths are kept as they are, deletions of base files included. A rename
/// crossing the boundary becomes a create of the target with the content it moved when only the
/// target is owned, and a delete of the source when only the source is. The result refers to
/// owned paths only and replays to exactly the owned files of the full log.
pub fn restrict<F>(log: &[Action], owns: F) -> Vec<Action>
where
    F: Fn(&str) -> bool,
{
    let mut current: HashMap<&str, &Content> = HashMap::new();
    let mut kept = Vec::new();
    for action in log {
        match action {
            Action::Exists { path, content }
            | Action::Create { path, content }
            | Action::Overwrite { path, content } => {
                current.insert(path.as_str(), content);
                if owns(path.as_str()) {
                    kept.push(action.clone());
                }
            }
            Action::Rename { path, to } => {
                let moved = current.remove(path.as_str());
                if let Some(content) = moved {
                    current.insert(to.as_str(), content);
                }
                match (owns(path.as_str()), owns(to.as_str()), moved) {
                    (true, true, _) | (false, true, None) => kept.push(action.clone()),
                    (false, true, Some(content)) => kept.push(Action::Create {
                        path: to.clone(),
                        content: content.clone(),
                    }),
                    (true, false, _) => kept.push(Action::Delete { path: path.clone() }),
                    (false, false, _) => {}
                }
            }
            Action::Delete { path } => {
                current.remove(path.as_str());
                if owns(path.as_str()) {
                    kept.push(action.clone());
                }
            }
        }
    }
    debug!(before = log.len(), after = kept.len(), "restrict log");
    kept
}

/// Ordered, self-compacting record of the actions that produced a tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionLog {
    actions: Vec<Action>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_actions(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Records `action`, compacting the log.
    pub fn record(&mut self, action: Action) {
        let actions = std::mem::take(&mut self.actions);
        self.actions = compact(actions, action);
    }

    pub fn as_slice(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// True if any entry refers to `path`.
    pub fn mentions(&self, path: &str) -> bool {
        self.actions.iter().any(|a| a.touches(path))
    }

    /// See [`restrict`].
    pub fn restricted_to<F>(&self, owns: F) -> ActionLog
    where
        F: Fn(&str) -> bool,
    {
        ActionLog {
            actions: restrict(&self.actions, owns),
        }
    }
}

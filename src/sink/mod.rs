//! Consumers of staged trees.
//!
//! A sink takes the action log of a tree and applies it to a destination in three phases:
//!
//! 1. **validate** every action against the destination as it would look after the actions
//!    before it, collecting all failures (skipped in force mode);
//! 2. **commit** every action, in log order, into the sink's [`StagingArea`];
//! 3. **finalize** by flushing the staged net effect to the destination ([`Sink::done`]).
//!
//! Nothing reaches the destination before validation has fully succeeded. Finalizing is
//! best-effort: if a write fails halfway, earlier writes are not rolled back.

mod dry_run;
mod filesystem;
mod staging;

pub use dry_run::{DryRunEvent, DryRunSink};
pub use filesystem::{FileSystemSink, Host, LocalHost};
pub use staging::StagingArea;

use tracing::{info, warn};

use crate::vfs::Action;
use crate::{Error, Result, Tree};

/// Lifecycle of a sink. A sink commits at most one tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SinkState {
    #[default]
    Idle,
    Validating,
    Committing,
    Finalizing,
    Done,
    Failed,
}

/// Caller-supplied callbacks around the phases of a commit. Every method defaults to a no-op.
pub trait SinkHooks {
    fn pre_validate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Extra check for one action; runs next to the built-in structural check.
    fn validate_action(&mut self, _action: &Action) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_validate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn pre_commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// May return a different action to commit in place of `action`.
    fn pre_commit_action(&mut self, action: Action) -> anyhow::Result<Action> {
        Ok(action)
    }

    fn post_commit_action(&mut self, _action: &Action) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_commit(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SinkHooks for NoHooks {}

pub trait Sink {
    fn staging(&self) -> &StagingArea;

    fn staging_mut(&mut self) -> &mut StagingArea;

    fn hooks(&mut self) -> &mut dyn SinkHooks;

    /// Whether `path` exists on the destination before anything is committed.
    fn destination_exists(&self, _path: &str) -> Result<bool> {
        Ok(false)
    }

    /// Whether `path` is a regular file on the destination. Directories are not.
    fn destination_is_file(&self, _path: &str) -> Result<bool> {
        Ok(false)
    }

    /// Flushes the staged net effect to the destination.
    fn done(&mut self) -> Result<()>;

    /// Called once the commit ended, whatever the outcome.
    fn finish(&mut self) {}

    /// Validates (unless `force`) and commits the action log of `tree`.
    ///
    /// Trees without a log are committed as one `Create` per file.
    fn commit<T: Tree + ?Sized>(&mut self, tree: &T, force: bool) -> Result<()>
    where
        Self: Sized,
    {
        let state = self.staging().state();
        if state != SinkState::Idle {
            return Err(Error::SinkState(state));
        }
        let actions = actions_of(tree)?;
        info!(actions = actions.len(), force, "commit started");

        let result = run(self, actions, force);
        match &result {
            Ok(()) => {
                self.staging_mut().set_state(SinkState::Done);
                info!("commit finished");
            }
            Err(error) => {
                self.staging_mut().set_state(SinkState::Failed);
                warn!(%error, "commit failed");
            }
        }
        self.finish();
        result
    }
}

fn actions_of<T: Tree + ?Sized>(tree: &T) -> Result<Vec<Action>> {
    if let Some(actions) = tree.actions() {
        return Ok(actions.to_vec());
    }
    let mut actions = Vec::new();
    for path in tree.find("**")? {
        let content = tree
            .content(&path)?
            .ok_or_else(|| Error::NotFound(path.clone()))?;
        actions.push(Action::Create { path, content });
    }
    Ok(actions)
}

fn run<S: Sink + ?Sized>(sink: &mut S, actions: Vec<Action>, force: bool) -> Result<()> {
    if !force {
        sink.staging_mut().set_state(SinkState::Validating);
        validate(sink, &actions)?;
    }

    sink.staging_mut().set_state(SinkState::Committing);
    sink.hooks().pre_commit()?;
    for action in actions {
        let action = sink.hooks().pre_commit_action(action)?;
        sink.staging_mut().stage(&action);
        sink.hooks().post_commit_action(&action)?;
    }

    sink.staging_mut().set_state(SinkState::Finalizing);
    sink.done()?;
    sink.hooks().post_commit()?;
    Ok(())
}

/// Checks every action against a shadow of the staging area, so each action sees the
/// destination as the earlier actions left it.
fn validate<S: Sink + ?Sized>(sink: &mut S, actions: &[Action]) -> Result<()> {
    sink.hooks().pre_validate()?;

    let mut shadow = sink.staging().clone();
    let mut failures = Vec::new();
    for action in actions {
        if let Err(error) = sink.hooks().validate_action(action) {
            warn!(path = action.path(), %error, "action rejected by hook");
            failures.push(Error::Other(error));
        }
        match check(sink, &shadow, action) {
            Ok(()) => shadow.stage(action),
            Err(error) => {
                warn!(path = action.path(), %error, "action failed validation");
                failures.push(error);
            }
        }
    }

    sink.hooks().post_validate()?;
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(Error::Validation(failures)),
    }
}

fn check<S: Sink + ?Sized>(sink: &S, shadow: &StagingArea, action: &Action) -> Result<()> {
    let exists = |path: &str| match shadow.known(path) {
        Some(known) => Ok(known),
        None => sink.destination_exists(path),
    };
    match action {
        // a claim about the base, not a change
        Action::Exists { .. } => Ok(()),
        Action::Overwrite { path, .. } | Action::Delete { path } => {
            if !exists(path)? {
                return Err(Error::NotFound(path.clone()));
            }
            Ok(())
        }
        Action::Create { path, .. } => {
            if exists(path)? {
                return Err(Error::AlreadyExists(path.clone()));
            }
            check_placement(sink, shadow, path)
        }
        Action::Rename { path, to } => {
            if !exists(path)? {
                return Err(Error::NotFound(path.clone()));
            }
            if exists(to)? {
                return Err(Error::AlreadyExists(to.clone()));
            }
            check_placement(sink, shadow, to)
        }
    }
}

/// A new file needs its parents to be directories and must not be the parent of a file.
fn check_placement<S: Sink + ?Sized>(sink: &S, shadow: &StagingArea, path: &str) -> Result<()> {
    let conflict = |file: &str| Error::PathConflict {
        path: path.to_string(),
        file: file.to_string(),
    };
    for (end, _) in path.match_indices('/').skip(1) {
        let parent = &path[..end];
        let is_file = match shadow.known(parent) {
            Some(known) => known,
            None => sink.destination_is_file(parent)?,
        };
        if is_file {
            return Err(conflict(parent));
        }
    }
    match shadow.present_under(path) {
        Some(file) => Err(conflict(file)),
        None => Ok(()),
    }
}

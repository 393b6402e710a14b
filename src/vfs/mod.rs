//! In-memory staging: content handles, the action log and the staged tree built on them.

pub(crate) mod action;
mod buffer;
mod entry;
mod null_tree;
mod virtual_tree;

pub use action::{Action, ActionKind, ActionLog, compact, restrict};
pub use buffer::UpdateBuffer;
pub use entry::{Content, FileEntry, Loader};
pub use null_tree::NullTree;
pub use virtual_tree::{MergeStrategy, UpdateRecorder, VirtualTree};

//! Transactional in-memory staging of file system changes.
//!
//! ### Overview
//!
//! `vfs-stage` lets code describe a batch of file changes against an in-memory
//! [`VirtualTree`](vfs::VirtualTree) instead of touching the disk. The tree keeps a compact,
//! replayable log of what was done. Once the batch is complete, a [`Sink`](sink::Sink)
//! validates the whole log and only then applies it, either to a real directory
//! ([`FileSystemSink`](sink::FileSystemSink)) or to an event stream describing what would
//! happen ([`DryRunSink`](sink::DryRunSink)).
//!
//! **Key ideas**:
//! - **Staging**: every change lives in memory until a sink commits it.
//! - **Compact log**: overwrites fold into creates, chained renames collapse, and a file
//!   created then deleted leaves no trace.
//! - **Composition**: trees can be branched, partitioned and merged, and transformations
//!   chained with a [`Pipeline`](pipeline::Pipeline).
//! - **Validate first**: a failed validation leaves the destination untouched.
//!
//! ```no_run
//! use vfs_stage::fs::Loading;
//! use vfs_stage::sink::{FileSystemSink, Sink};
//! use vfs_stage::vfs::VirtualTree;
//!
//! # fn main() -> vfs_stage::Result<()> {
//! let mut tree = VirtualTree::from_dir("./project", Loading::Lazy)?;
//! tree.create("/src/generated.rs", "// generated")?;
//! tree.rename("/README", "/README.md")?;
//!
//! let mut sink = FileSystemSink::new("./project");
//! sink.commit(&tree, false)?;
//! # Ok(())
//! # }
//! ```

mod core;
mod error;
pub mod fs;
pub mod pipeline;
pub mod sink;
pub mod vfs;

pub use crate::core::{Result, Tree, utils};
pub use error::Error;

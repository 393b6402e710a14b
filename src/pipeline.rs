//! Sequential composition of tree transformations.
//!
//! A [`Pipeline`] is an ordered list of rules. Each rule takes ownership of the current tree
//! and returns the tree for the next rule; rules run strictly one after another.

use std::fmt;
use std::path::PathBuf;

use anyhow::anyhow;
use tracing::debug;

use crate::core::utils::normalize;
use crate::fs::Loading;
use crate::vfs::{MergeStrategy, VirtualTree};
use crate::{Result, Tree};

/// Settings shared by every rule of a run.
#[derive(Debug, Default)]
pub struct Context {
    /// Used wherever a rule asks for [`MergeStrategy::Default`].
    pub strategy: MergeStrategy,
    /// Tree that [`Source::Host`] reads from.
    pub host: Option<VirtualTree>,
}

impl Context {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            host: None,
        }
    }

    pub fn with_host(mut self, host: VirtualTree) -> Self {
        self.host = Some(host);
        self
    }
}

pub type Rule = Box<dyn FnMut(VirtualTree, &Context) -> Result<VirtualTree>>;

#[derive(Default)]
pub struct Pipeline {
    rules: Vec<Rule>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule.
    pub fn then<R>(mut self, rule: R) -> Self
    where
        R: FnMut(VirtualTree, &Context) -> Result<VirtualTree> + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule in order. The first failing rule stops the run.
    pub fn run(&mut self, tree: VirtualTree, context: &Context) -> Result<VirtualTree> {
        let mut tree = tree;
        for (index, rule) in self.rules.iter_mut().enumerate() {
            debug!(rule = index, files = tree.len(), "run rule");
            tree = rule(tree, context)?;
        }
        Ok(tree)
    }
}

/// Where the input tree of a pipeline comes from.
pub enum Source {
    Empty,
    /// Directory read eagerly.
    Directory(PathBuf),
    /// Directory read on demand.
    LazyDirectory(PathBuf),
    /// Files of the context's host tree under the given prefix.
    Host(String),
    /// Independent copy of an existing tree.
    Tree(VirtualTree),
    Custom(Box<dyn Fn(&Context) -> Result<VirtualTree>>),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Empty => write!(f, "Empty"),
            Source::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            Source::LazyDirectory(path) => f.debug_tuple("LazyDirectory").field(path).finish(),
            Source::Host(prefix) => f.debug_tuple("Host").field(prefix).finish(),
            Source::Tree(tree) => f.debug_tuple("Tree").field(&tree.len()).finish(),
            Source::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl Source {
    pub fn build(&self, context: &Context) -> Result<VirtualTree> {
        debug!(source = ?self, "build source");
        match self {
            Source::Empty => Ok(VirtualTree::new()),
            Source::Directory(path) => VirtualTree::from_dir(path, Loading::Eager),
            Source::LazyDirectory(path) => VirtualTree::from_dir(path, Loading::Lazy),
            Source::Host(prefix) => {
                let host = context
                    .host
                    .as_ref()
                    .ok_or_else(|| anyhow!("no host tree to read \"{prefix}\" from"))?;
                let prefix = normalize(prefix)?;
                let glob = if prefix == "/" {
                    "**".to_string()
                } else {
                    format!("{prefix}/**")
                };
                VirtualTree::branch(host, &glob)
            }
            Source::Tree(tree) => VirtualTree::branch(tree, "**"),
            Source::Custom(build) => build(context),
        }
    }
}

/// Builds the tree of `source` and runs `pipeline` over it.
pub fn apply(source: &Source, pipeline: &mut Pipeline, context: &Context) -> Result<VirtualTree> {
    let tree = source.build(context)?;
    pipeline.run(tree, context)
}

/// Merges the trees of all `sources`, in order, into one tree.
pub fn merge_sources(
    sources: &[Source],
    strategy: MergeStrategy,
    context: &Context,
) -> Result<VirtualTree> {
    merge_into(VirtualTree::new(), sources, strategy, context)
}

fn merge_into(
    tree: VirtualTree,
    sources: &[Source],
    strategy: MergeStrategy,
    context: &Context,
) -> Result<VirtualTree> {
    let strategy = strategy.resolve(context.strategy);
    let mut result = tree;
    for source in sources {
        let other = source.build(context)?;
        result = VirtualTree::merge(&result, &other, strategy)?;
    }
    Ok(result)
}

pub mod rules {
    //! Ready-made rules for [`Pipeline::then`](super::Pipeline::then).

    use super::*;

    pub fn noop() -> impl FnMut(VirtualTree, &Context) -> Result<VirtualTree> {
        |tree, _| Ok(tree)
    }

    /// Keeps only the files matching `glob`.
    pub fn filter(glob: &str) -> impl FnMut(VirtualTree, &Context) -> Result<VirtualTree> + use<> {
        let glob = glob.to_string();
        move |tree, _| VirtualTree::branch(&tree, &glob)
    }

    /// Moves every file under `root`, keeping its relative path.
    pub fn move_to(root: &str) -> impl FnMut(VirtualTree, &Context) -> Result<VirtualTree> + use<> {
        let root = root.to_string();
        move |mut tree, _| {
            let root = normalize(&root)?;
            if root == "/" {
                return Ok(tree);
            }
            for path in tree.find("**")? {
                tree.rename(&path, &format!("{root}{path}"))?;
            }
            Ok(tree)
        }
    }

    /// Merges the trees of `sources`, in order, into the current tree.
    pub fn merge_with(
        sources: Vec<Source>,
        strategy: MergeStrategy,
    ) -> impl FnMut(VirtualTree, &Context) -> Result<VirtualTree> {
        move |tree, context| merge_into(tree, &sources, strategy, context)
    }

    /// Runs `inside` over the files matching `glob` and `outside` over the rest, then merges
    /// the two results back together.
    pub fn partition_and_apply(
        glob: &str,
        mut inside: Pipeline,
        mut outside: Pipeline,
    ) -> impl FnMut(VirtualTree, &Context) -> Result<VirtualTree> + use<> {
        let glob = glob.to_string();
        move |tree, context| {
            let (rest, selected) = VirtualTree::partition(&tree, &glob)?;
            let selected = inside.run(selected, context)?;
            let rest = outside.run(rest, context)?;
            VirtualTree::merge(&rest, &selected, context.strategy)
        }
    }
}

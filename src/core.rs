use std::borrow::Cow;

use crate::vfs::{Action, Content};

pub type Result<T> = std::result::Result<T, crate::Error>;

/// Read-only view over a staged file hierarchy.
///
/// Implementors that can describe how they were built expose their action log through
/// [`Tree::actions`]; combinators and sinks replay that log instead of synthesizing fresh
/// creates from the current contents.
pub trait Tree {
    /// Returns the tracked paths matching `glob`, in insertion order.
    /// `"**"` matches everything.
    fn find(&self, glob: &str) -> Result<Vec<String>>;

    /// Returns true if `path` is tracked. Invalid paths are never tracked.
    fn exists(&self, path: &str) -> bool;

    /// Reads the content of `path`, or `None` if it is not tracked.
    fn read(&self, path: &str) -> Result<Option<Cow<'_, [u8]>>>;

    /// Content handle of `path`. Trees holding lazy content override this to avoid loading it.
    fn content(&self, path: &str) -> Result<Option<Content>> {
        Ok(self
            .read(path)?
            .map(|bytes| Content::new(bytes.into_owned())))
    }

    /// Ordered log of actions that reproduces this tree from its base, if the tree keeps one.
    fn actions(&self) -> Option<&[Action]> {
        None
    }
}

pub mod utils {
    use glob::{MatchOptions, Pattern};

    use crate::{Error, Result};

    const MATCH_OPTIONS: MatchOptions = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    /// Normalizes a tree path.
    ///
    /// The result always starts with `/`, has no `.`, `..` or empty segments and has no
    /// trailing `/` unless it is the root. A `..` that climbs above the root is rejected.
    pub fn normalize(path: &str) -> Result<String> {
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::PathInvalid(path.to_string()));
                    }
                }
                other => segments.push(other),
            }
        }
        Ok(format!("/{}", segments.join("/")))
    }

    /// Shell-style glob over normalized paths. Dotfiles match wildcards.
    #[derive(Debug, Clone)]
    pub struct Glob {
        pattern: Option<Pattern>,
    }

    impl Glob {
        pub fn new(glob: &str) -> Result<Self> {
            if glob == "**" {
                return Ok(Self { pattern: None });
            }
            let normalized = normalize(glob)?;
            let pattern = Pattern::new(&normalized).map_err(|e| Error::InvalidGlob {
                glob: glob.to_string(),
                reason: e.msg.to_string(),
            })?;
            Ok(Self {
                pattern: Some(pattern),
            })
        }

        /// True for the match-everything fast path.
        pub fn is_everything(&self) -> bool {
            self.pattern.is_none()
        }

        pub fn matches(&self, path: &str) -> bool {
            match &self.pattern {
                None => true,
                Some(pattern) => pattern.matches_with(path, MATCH_OPTIONS),
            }
        }
    }
}

//! Positional edits over a frozen byte buffer.
//!
//! Every edit index addresses a *boundary* of the original content: boundary `i` sits between
//! original bytes `i - 1` and `i`, so valid indices are `0..=original.len()`. Edits never move
//! each other; all of them are expressed in original offsets and replayed by
//! [`UpdateBuffer::generate`].
//!
//! At a single boundary the output is laid out as
//!
//! ```text
//! <left inserts, oldest first> <right inserts, newest first> <original byte i>
//! ```
//!
//! i.e. a left insert always lands immediately to the left of the boundary and a right insert
//! immediately to its right, pushing earlier inserts of the same side away from the cursor.
//! Removed original bytes vanish, while inserts at boundaries inside a removed range survive.

use std::collections::BTreeMap;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Edit {
    InsertLeft { index: usize, content: Vec<u8> },
    InsertRight { index: usize, content: Vec<u8> },
    Remove { index: usize, length: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBuffer {
    original: Vec<u8>,
    edits: Vec<Edit>,
}

impl UpdateBuffer {
    pub fn new<C: Into<Vec<u8>>>(original: C) -> Self {
        Self {
            original: original.into(),
            edits: Vec::new(),
        }
    }

    /// The content this buffer was created from. Never changes.
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Length of the original content.
    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    /// True if at least one edit is pending.
    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn insert_left(&mut self, index: usize, content: &[u8]) -> Result<()> {
        self.check_index(index)?;
        self.edits.push(Edit::InsertLeft {
            index,
            content: content.to_vec(),
        });
        Ok(())
    }

    pub fn insert_right(&mut self, index: usize, content: &[u8]) -> Result<()> {
        self.check_index(index)?;
        self.edits.push(Edit::InsertRight {
            index,
            content: content.to_vec(),
        });
        Ok(())
    }

    /// Removes the original bytes in `[index, index + length)`.
    pub fn remove(&mut self, index: usize, length: usize) -> Result<()> {
        self.check_index(index)?;
        let end = index.checked_add(length).ok_or(Error::IndexOutOfBounds {
            index: usize::MAX,
            length: self.original.len(),
        })?;
        self.check_index(end)?;
        self.edits.push(Edit::Remove { index, length });
        Ok(())
    }

    /// Replays all pending edits over the original content.
    /// Calling it repeatedly always yields the same bytes.
    pub fn generate(&self) -> Vec<u8> {
        if self.edits.is_empty() {
            return self.original.clone();
        }

        let mut removed = vec![false; self.original.len()];
        let mut boundaries: BTreeMap<usize, (Vec<&[u8]>, Vec<&[u8]>)> = BTreeMap::new();
        let mut extra = 0;
        for edit in &self.edits {
            match edit {
                Edit::InsertLeft { index, content } => {
                    extra += content.len();
                    boundaries.entry(*index).or_default().0.push(content);
                }
                Edit::InsertRight { index, content } => {
                    extra += content.len();
                    boundaries.entry(*index).or_default().1.push(content);
                }
                Edit::Remove { index, length } => {
                    removed[*index..*index + *length].fill(true);
                }
            }
        }

        let mut result = Vec::with_capacity(self.original.len() + extra);
        let mut cursor = 0;
        for (index, (left, right)) in boundaries {
            Self::copy_kept(&mut result, &self.original[cursor..index], &removed[cursor..index]);
            cursor = index;
            for content in left {
                result.extend_from_slice(content);
            }
            for content in right.into_iter().rev() {
                result.extend_from_slice(content);
            }
        }
        let end = self.original.len();
        Self::copy_kept(&mut result, &self.original[cursor..end], &removed[cursor..end]);
        result
    }

    fn copy_kept(result: &mut Vec<u8>, bytes: &[u8], removed: &[bool]) {
        result.extend(
            bytes
                .iter()
                .zip(removed)
                .filter(|(_, removed)| !**removed)
                .map(|(byte, _)| *byte),
        );
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index > self.original.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                length: self.original.len(),
            });
        }
        Ok(())
    }
}

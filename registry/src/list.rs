//! Ordered registry of discovered ptests.
//!
//! Entries live in an index-linked arena: every slot carries `prev`/`next`
//! indices and slot 0 is a sentinel whose entry is always empty. The list is
//! circular through the sentinel, so the first entry's `prev` and the last
//! entry's `next` both point at it. All link surgery goes through
//! [`Registry::link_before`] and [`Registry::unlink`].

use crate::entry::{FileIdentity, TestEntry};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by registry operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A name, key or name list was empty
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The name is already present in the registry
    #[error("ptest '{name}' is already registered")]
    DuplicateName { name: String },

    /// A requested name is not present in the registry
    #[error("ptest {name} not found.")]
    NotFound { name: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

const HEAD: usize = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    entry: TestEntry,
    prev: usize,
    next: usize,
}

/// Insertion-ordered, name-unique collection of [`TestEntry`] values.
#[derive(Debug, Clone)]
pub struct Registry {
    nodes: Vec<Node>,
    vacant: Vec<usize>,
    len: usize,
}

impl Registry {
    /// Create an empty registry holding only the sentinel.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            vacant: Vec::new(),
            len: 0,
        }
    }

    /// Number of entries, not counting the sentinel.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a new entry built from `name` and `runner_path`.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        runner_path: impl Into<PathBuf>,
    ) -> RegistryResult<&TestEntry> {
        self.insert(TestEntry::new(name, runner_path))
    }

    /// Append an already-built entry, taking ownership of it.
    pub fn insert(&mut self, entry: TestEntry) -> RegistryResult<&TestEntry> {
        if entry.name.is_empty() {
            return Err(RegistryError::InvalidArgument {
                reason: "ptest name must not be empty".to_string(),
            });
        }
        if self.position(&entry.name).is_some() {
            return Err(RegistryError::DuplicateName { name: entry.name });
        }

        let idx = self.allocate(entry);
        self.link_before(idx, HEAD);
        self.len += 1;
        Ok(&self.nodes[idx].entry)
    }

    /// Linear search by name; an empty key never matches.
    pub fn search(&self, name: &str) -> Option<&TestEntry> {
        self.position(name).map(|idx| &self.nodes[idx].entry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Find the entry whose runner is the same file as `identity`,
    /// regardless of the path it was registered under.
    pub fn search_by_identity(&self, identity: FileIdentity) -> Option<&TestEntry> {
        self.iter().find(|entry| entry.identity == Some(identity))
    }

    /// Unlink the named entry and hand it back to the caller.
    ///
    /// Dropping the returned value releases it; keeping it moves ownership out
    /// of the registry.
    pub fn remove(&mut self, name: &str) -> Option<TestEntry> {
        let idx = self.position(name)?;
        self.unlink(idx);
        self.len -= 1;
        self.vacant.push(idx);
        Some(std::mem::take(&mut self.nodes[idx].entry))
    }

    /// Move every entry of `other` to the tail of `self`.
    ///
    /// `other` is consumed. Entries whose name is already present are dropped
    /// so the uniqueness invariant holds. Returns the number of entries moved.
    pub fn extend(&mut self, other: Registry) -> usize {
        let mut moved = 0;
        for entry in other {
            let name = entry.name.clone();
            match self.insert(entry) {
                Ok(_) => moved += 1,
                Err(e) => tracing::warn!("Skipping ptest {} while merging: {}", name, e),
            }
        }
        moved
    }

    /// Release every entry and the registry itself, returning how many
    /// entries were released.
    pub fn free_all(self) -> usize {
        self.len
    }

    pub fn first(&self) -> Option<&TestEntry> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<&TestEntry> {
        self.iter().next_back()
    }

    /// Iterate entries in insertion order; reversible.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            front: self.nodes[HEAD].next,
            back: self.nodes[HEAD].prev,
            remaining: self.len,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|entry| entry.name.as_str())
    }

    fn position(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        let mut idx = self.nodes[HEAD].next;
        while idx != HEAD {
            if self.nodes[idx].entry.name == name {
                return Some(idx);
            }
            idx = self.nodes[idx].next;
        }
        None
    }

    fn allocate(&mut self, entry: TestEntry) -> usize {
        let node = Node {
            entry,
            prev: HEAD,
            next: HEAD,
        };
        match self.vacant.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn link_before(&mut self, idx: usize, at: usize) {
        let prev = self.nodes[at].prev;
        self.nodes[idx].prev = prev;
        self.nodes[idx].next = at;
        self.nodes[prev].next = idx;
        self.nodes[at].prev = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let Node { prev, next, .. } = self.nodes[idx];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = idx;
        self.nodes[idx].next = idx;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowing iterator over a [`Registry`]
pub struct Iter<'a> {
    registry: &'a Registry,
    front: usize,
    back: usize,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a TestEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = &self.registry.nodes[self.front];
        self.front = node.next;
        self.remaining -= 1;
        Some(&node.entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = &self.registry.nodes[self.back];
        self.back = node.prev;
        self.remaining -= 1;
        Some(&node.entry)
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a TestEntry;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owning iterator; yields entries in insertion order.
pub struct IntoIter {
    registry: Registry,
}

impl Iterator for IntoIter {
    type Item = TestEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.registry.nodes[HEAD].next;
        if idx == HEAD {
            return None;
        }
        self.registry.unlink(idx);
        self.registry.len -= 1;
        Some(std::mem::take(&mut self.registry.nodes[idx].entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.registry.len, Some(self.registry.len))
    }
}

impl IntoIterator for Registry {
    type Item = TestEntry;
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { registry: self }
    }
}

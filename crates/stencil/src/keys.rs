//! Slot keys and the statics layout of template blocks.
//!
//! Every block of a resolved template (the root, each branch body, each
//! range item body, each included definition) is laid out independently:
//! literal text between dynamic nodes is merged into statics, and each
//! dynamic node gets the next [`SlotKey`] of its block, counting from zero in
//! document order. Keys depend only on the template, never on data, so two
//! renders of one template always address the same node with the same key.

use crate::error::InvariantViolation;
use crate::template::{ResolvedBlock, ResolvedNode, Template};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(u32);

impl SlotKey {
    pub fn new(key: u32) -> Self {
        Self(key)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out the slot keys of one block.
#[derive(Debug, Default)]
pub struct KeyGenerator {
    next: u32,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> SlotKey {
        let key = SlotKey(self.next);
        self.next += 1;
        key
    }

    pub fn allocated(&self) -> usize {
        self.next as usize
    }
}

/// Address of a node in a render tree, one slot key per nesting level.
/// Prints as the dot-joined form used for fragment ids; the root is `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(SmallVec<[SlotKey; 4]>);

impl KeyPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, key: SlotKey) -> Self {
        let mut path = self.clone();
        path.0.push(key);
        path
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[SlotKey] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, key) in self.0.iter().enumerate() {
            if depth > 0 {
                f.write_str(".")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Literal fragments of one block, shared by every render of it.
#[derive(Clone)]
pub struct Statics(Arc<[Arc<str>]>);

impl Statics {
    pub fn new(parts: impl IntoIterator<Item = impl Into<Arc<str>>>) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Same literal content. Statics cloned from one block compare by pointer.
    pub fn same_shape(&self, other: &Statics) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }

    pub fn ptr_eq(&self, other: &Statics) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Statics {
    type Target = [Arc<str>];

    fn deref(&self) -> &[Arc<str>] {
        &self.0
    }
}

impl PartialEq for Statics {
    fn eq(&self, other: &Self) -> bool {
        self.same_shape(other)
    }
}

impl fmt::Debug for Statics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    statics: Statics,
    keys: Vec<Option<SlotKey>>,
}

impl Layout {
    pub fn statics(&self) -> &Statics {
        &self.statics
    }

    /// Slot key of the node at `index` in the block, `None` for literals and
    /// bindings.
    pub fn key(&self, index: usize) -> Option<SlotKey> {
        self.keys.get(index).copied().flatten()
    }

    pub fn slot_count(&self) -> usize {
        self.statics.len() - 1
    }
}

pub(crate) fn layout(nodes: &[ResolvedNode]) -> Layout {
    let mut generator = KeyGenerator::new();
    let mut statics = Vec::new();
    let mut current = String::new();
    let mut keys = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            ResolvedNode::Literal(text) => {
                current.push_str(text);
                keys.push(None);
            }
            ResolvedNode::Binding { .. } => keys.push(None),
            _ => {
                statics.push(std::mem::take(&mut current));
                keys.push(Some(generator.allocate()));
            }
        }
    }
    statics.push(current);
    debug_assert_eq!(statics.len(), generator.allocated() + 1);
    Layout {
        statics: Statics::new(statics),
        keys,
    }
}

/// One step from a block to a node or to one of a node's bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    Node(u32),
    // `if` then-branch, `range` item body, `with` body, included definition.
    Body,
    // `else` branch.
    Else,
}

/// Structural position of a node in the resolved template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePosition(SmallVec<[Step; 8]>);

impl NodePosition {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, step: Step) -> Self {
        let mut position = self.clone();
        position.0.push(step);
        position
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }
}

impl fmt::Display for NodePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, step) in self.0.iter().enumerate() {
            if depth > 0 {
                f.write_str("/")?;
            }
            match step {
                Step::Node(index) => write!(f, "{index}")?,
                Step::Body => f.write_str("body")?,
                Step::Else => f.write_str("else")?,
            }
        }
        Ok(())
    }
}

/// Slot key of every dynamic node, by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMap(BTreeMap<NodePosition, SlotKey>);

impl KeyMap {
    pub fn get(&self, position: &NodePosition) -> Option<SlotKey> {
        self.0.get(position).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodePosition, SlotKey)> {
        self.0.iter().map(|(position, key)| (position, *key))
    }
}

/// Lists the slot key of every dynamic node reachable from the template
/// root, following inclusions into their definitions.
pub fn assign(template: &Template) -> Result<KeyMap, InvariantViolation> {
    let mut map = KeyMap::default();
    walk(template.root(), &NodePosition::root(), &mut map)?;
    Ok(map)
}

fn walk(block: &ResolvedBlock, position: &NodePosition, map: &mut KeyMap) -> Result<(), InvariantViolation> {
    let mut seen = HashSet::new();
    for (index, node) in block.nodes().iter().enumerate() {
        let here = position.child(Step::Node(index as u32));
        if let Some(key) = block.layout().key(index) {
            if !seen.insert(key) {
                return Err(InvariantViolation::KeyCollision {
                    path: here.to_string(),
                    key: key.get(),
                });
            }
            map.0.insert(here.clone(), key);
        }
        let (body, else_body) = match node {
            ResolvedNode::Conditional {
                then_body,
                else_body,
                ..
            } => (Some(then_body), else_body.as_ref()),
            ResolvedNode::Iteration {
                item_body,
                else_body,
                ..
            } => (Some(item_body), else_body.as_ref()),
            ResolvedNode::Scope { body, else_body, .. } => (Some(body), else_body.as_ref()),
            ResolvedNode::Include { body, .. } => (Some(body.as_ref()), None),
            _ => (None, None),
        };
        if let Some(body) = body {
            walk(body, &here.child(Step::Body), map)?;
        }
        if let Some(else_body) = else_body {
            walk(else_body, &here.child(Step::Else), map)?;
        }
    }
    Ok(())
}

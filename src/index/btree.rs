//! Path Index (B+tree)
//!
//! Ordered map from document path to document id.
//!
//! ## Layout
//! Nodes live in an arena (`Vec<Node>`) and refer to each other by index;
//! freed slots are recycled through a free list. Values are stored only in
//! leaves, and leaves are chained left to right for ordered scans.
//!
//! ```text
//!                  ┌──────────────┐
//!                  │  [ /m ]      │   internal: separators + children
//!                  └──┬────────┬──┘
//!          ┌──────────▼──┐  ┌──▼──────────┐
//!          │ /a  /c  /f  │─▶│ /m  /r  /x  │   leaves: keys + ids, next link
//!          └─────────────┘  └─────────────┘
//! ```
//!
//! ## Invariants
//! - keys sorted within every node; every leaf at the same depth
//! - at most `order` keys per node; at least `order / 2` outside the root
//! - keys in child `i` of an internal node lie in `[keys[i-1], keys[i])`
//!
//! Separators may go stale after a leaf removal; they still route correctly.

use std::ops::Bound;

use crate::document::DocumentId;
use crate::error::{EngineError, Result};

type NodeId = usize;

#[derive(Debug, Clone, Default)]
struct Leaf {
    keys: Vec<String>,
    values: Vec<DocumentId>,
    next: Option<NodeId>,
}

#[derive(Debug, Clone, Default)]
struct Internal {
    keys: Vec<String>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Leaf),
    Internal(Internal),
}

impl Default for Node {
    fn default() -> Self {
        Node::Leaf(Leaf::default())
    }
}

impl Node {
    fn key_count(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.keys.len(),
            Node::Internal(node) => node.keys.len(),
        }
    }
}

/// B+tree index over document paths
#[derive(Debug)]
pub struct PathIndex {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Maximum keys per node
    order: usize,
    len: usize,
}

impl PathIndex {
    /// Create an empty index; `order` is the maximum keys per node (at least 3)
    pub fn new(order: usize) -> Self {
        Self {
            nodes: vec![Node::default()],
            free: Vec::new(),
            root: 0,
            order: order.max(3),
            len: 0,
        }
    }

    /// Exact lookup
    pub fn lookup(&self, path: &str) -> Result<DocumentId> {
        let leaf = self.leaf(self.find_leaf(path));
        match leaf.keys.binary_search_by(|k| k.as_str().cmp(path)) {
            Ok(pos) => Ok(leaf.values[pos]),
            Err(_) => Err(EngineError::path_not_found(path)),
        }
    }

    /// Index `path` for `id`
    ///
    /// Fails with `Conflict` if the path is held by a different id.
    /// Re-inserting an existing pair is a no-op.
    pub fn insert(&mut self, path: &str, id: DocumentId) -> Result<()> {
        match self.lookup(path) {
            Ok(existing) if existing == id => return Ok(()),
            Ok(existing) => {
                return Err(EngineError::Conflict {
                    path: path.to_string(),
                    existing,
                })
            }
            Err(_) => {}
        }

        if let Some((separator, right)) = self.insert_into(self.root, path.to_string(), id) {
            let old_root = self.root;
            self.root = self.alloc(Node::Internal(Internal {
                keys: vec![separator],
                children: vec![old_root, right],
            }));
        }
        self.len += 1;
        Ok(())
    }

    /// Remove `path`, returning the id it mapped to
    pub fn remove(&mut self, path: &str) -> Option<DocumentId> {
        let removed = self.remove_from(self.root, path)?;

        // An internal root left with a single child gives way to that child
        if let Node::Internal(node) = &self.nodes[self.root] {
            if node.keys.is_empty() {
                let child = node.children[0];
                let old_root = self.root;
                self.root = child;
                self.release(old_root);
            }
        }

        self.len -= 1;
        Some(removed)
    }

    /// Ordered scan of every path starting with `prefix`
    pub fn prefix_scan(&self, prefix: &str) -> PathRange<'_> {
        let (leaf, pos) = self.seek(Bound::Included(prefix));
        PathRange {
            index: self,
            leaf,
            pos,
            upper: Upper::Prefix(prefix.to_string()),
        }
    }

    /// Ordered scan of paths within `(start, end)`
    pub fn range(&self, start: Bound<&str>, end: Bound<&str>) -> PathRange<'_> {
        let (leaf, pos) = self.seek(start);
        let upper = match end {
            Bound::Included(key) => Upper::Included(key.to_string()),
            Bound::Excluded(key) => Upper::Excluded(key.to_string()),
            Bound::Unbounded => Upper::Unbounded,
        };
        PathRange {
            index: self,
            leaf,
            pos,
            upper,
        }
    }

    /// Ordered scan of every entry
    pub fn iter(&self) -> PathRange<'_> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Levels from root to leaves (1 for a lone leaf)
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut id = self.root;
        while let Node::Internal(node) = &self.nodes[id] {
            id = node.children[0];
            height += 1;
        }
        height
    }

    /// Nodes currently in use
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn clear(&mut self) {
        self.nodes = vec![Node::default()];
        self.free.clear();
        self.root = 0;
        self.len = 0;
    }

    /// Check every structural invariant
    pub fn validate(&self) -> Result<()> {
        let (_, count) = self.check_node(self.root, None, None, true)?;
        if count != self.len {
            return Err(EngineError::corruption(format!(
                "path index holds {} keys, length says {}",
                count, self.len
            )));
        }

        // The leaf chain must visit every key in order
        let mut chained = 0;
        let mut previous: Option<&str> = None;
        for (key, _) in self.iter() {
            if previous.is_some_and(|p| p >= key) {
                return Err(EngineError::corruption(format!(
                    "leaf chain out of order at '{}'",
                    key
                )));
            }
            previous = Some(key);
            chained += 1;
        }
        if chained != self.len {
            return Err(EngineError::corruption(format!(
                "leaf chain visits {} keys, expected {}",
                chained, self.len
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn min_keys(&self) -> usize {
        self.order / 2
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::default();
        self.free.push(id);
    }

    fn take(&mut self, id: NodeId) -> Node {
        std::mem::take(&mut self.nodes[id])
    }

    fn leaf(&self, id: NodeId) -> &Leaf {
        match &self.nodes[id] {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => unreachable!("find_leaf always ends at a leaf"),
        }
    }

    fn find_leaf(&self, key: &str) -> NodeId {
        let mut id = self.root;
        while let Node::Internal(node) = &self.nodes[id] {
            id = node.children[child_index(&node.keys, key)];
        }
        id
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut id = self.root;
        while let Node::Internal(node) = &self.nodes[id] {
            id = node.children[0];
        }
        id
    }

    /// Leaf and position of the first key satisfying `start`
    fn seek(&self, start: Bound<&str>) -> (Option<NodeId>, usize) {
        match start {
            Bound::Unbounded => (Some(self.leftmost_leaf()), 0),
            Bound::Included(key) => {
                let id = self.find_leaf(key);
                (Some(id), self.leaf(id).keys.partition_point(|k| k.as_str() < key))
            }
            Bound::Excluded(key) => {
                let id = self.find_leaf(key);
                (Some(id), self.leaf(id).keys.partition_point(|k| k.as_str() <= key))
            }
        }
    }

    /// Insert below `id`; returns a separator and new right sibling on split
    fn insert_into(&mut self, id: NodeId, key: String, value: DocumentId) -> Option<(String, NodeId)> {
        let order = self.order;
        let child = match &mut self.nodes[id] {
            Node::Leaf(leaf) => {
                let pos = leaf.keys.partition_point(|k| *k < key);
                leaf.keys.insert(pos, key);
                leaf.values.insert(pos, value);
                if leaf.keys.len() <= order {
                    return None;
                }

                let mid = leaf.keys.len() / 2;
                let right = Leaf {
                    keys: leaf.keys.split_off(mid),
                    values: leaf.values.split_off(mid),
                    next: leaf.next,
                };
                let separator = right.keys[0].clone();
                let right_id = self.alloc(Node::Leaf(right));
                if let Node::Leaf(leaf) = &mut self.nodes[id] {
                    leaf.next = Some(right_id);
                }
                return Some((separator, right_id));
            }
            Node::Internal(node) => {
                let idx = child_index(&node.keys, &key);
                (idx, node.children[idx])
            }
        };

        let (idx, child_id) = child;
        let (separator, right_child) = self.insert_into(child_id, key, value)?;

        let Node::Internal(node) = &mut self.nodes[id] else {
            return None;
        };
        node.keys.insert(idx, separator);
        node.children.insert(idx + 1, right_child);
        if node.keys.len() <= order {
            return None;
        }

        // Middle key moves up; it stays in neither half
        let mid = node.keys.len() / 2;
        let right_keys = node.keys.split_off(mid + 1);
        let up = node.keys.pop()?;
        let right_children = node.children.split_off(mid + 1);
        let right_id = self.alloc(Node::Internal(Internal {
            keys: right_keys,
            children: right_children,
        }));
        Some((up, right_id))
    }

    /// Remove below `id`, fixing any child left underfull
    fn remove_from(&mut self, id: NodeId, key: &str) -> Option<DocumentId> {
        let (idx, child_id) = match &mut self.nodes[id] {
            Node::Leaf(leaf) => {
                let pos = leaf.keys.binary_search_by(|k| k.as_str().cmp(key)).ok()?;
                leaf.keys.remove(pos);
                return Some(leaf.values.remove(pos));
            }
            Node::Internal(node) => {
                let idx = child_index(&node.keys, key);
                (idx, node.children[idx])
            }
        };

        let removed = self.remove_from(child_id, key)?;
        if self.nodes[child_id].key_count() < self.min_keys() {
            self.rebalance(id, idx);
        }
        Some(removed)
    }

    /// Refill child `idx` of `parent_id`: borrow from a sibling, else merge
    fn rebalance(&mut self, parent_id: NodeId, idx: usize) {
        let mut parent = match self.take(parent_id) {
            Node::Internal(node) => node,
            leaf => {
                self.nodes[parent_id] = leaf;
                return;
            }
        };

        let min = self.min_keys();
        let left = idx.checked_sub(1).map(|i| parent.children[i]);
        let right = parent.children.get(idx + 1).copied();

        if left.is_some_and(|l| self.nodes[l].key_count() > min) {
            self.borrow_from_left(&mut parent, idx);
        } else if right.is_some_and(|r| self.nodes[r].key_count() > min) {
            self.borrow_from_right(&mut parent, idx);
        } else if left.is_some() {
            self.merge_children(&mut parent, idx - 1);
        } else if right.is_some() {
            self.merge_children(&mut parent, idx);
        }

        self.nodes[parent_id] = Node::Internal(parent);
    }

    fn borrow_from_left(&mut self, parent: &mut Internal, idx: usize) {
        let left_id = parent.children[idx - 1];
        let child_id = parent.children[idx];
        let left = self.take(left_id);
        let child = self.take(child_id);

        let (left, child) = match (left, child) {
            (Node::Leaf(mut l), Node::Leaf(mut c)) => {
                if let (Some(k), Some(v)) = (l.keys.pop(), l.values.pop()) {
                    c.keys.insert(0, k.clone());
                    c.values.insert(0, v);
                    parent.keys[idx - 1] = k;
                }
                (Node::Leaf(l), Node::Leaf(c))
            }
            (Node::Internal(mut l), Node::Internal(mut c)) => {
                if let (Some(k), Some(grandchild)) = (l.keys.pop(), l.children.pop()) {
                    let separator = std::mem::replace(&mut parent.keys[idx - 1], k);
                    c.keys.insert(0, separator);
                    c.children.insert(0, grandchild);
                }
                (Node::Internal(l), Node::Internal(c))
            }
            pair => pair,
        };

        self.nodes[left_id] = left;
        self.nodes[child_id] = child;
    }

    fn borrow_from_right(&mut self, parent: &mut Internal, idx: usize) {
        let child_id = parent.children[idx];
        let right_id = parent.children[idx + 1];
        let child = self.take(child_id);
        let right = self.take(right_id);

        let (child, right) = match (child, right) {
            (Node::Leaf(mut c), Node::Leaf(mut r)) => {
                if !r.keys.is_empty() {
                    c.keys.push(r.keys.remove(0));
                    c.values.push(r.values.remove(0));
                }
                if let Some(first) = r.keys.first() {
                    parent.keys[idx] = first.clone();
                }
                (Node::Leaf(c), Node::Leaf(r))
            }
            (Node::Internal(mut c), Node::Internal(mut r)) => {
                if !r.keys.is_empty() {
                    let k = r.keys.remove(0);
                    let separator = std::mem::replace(&mut parent.keys[idx], k);
                    c.keys.push(separator);
                    c.children.push(r.children.remove(0));
                }
                (Node::Internal(c), Node::Internal(r))
            }
            pair => pair,
        };

        self.nodes[child_id] = child;
        self.nodes[right_id] = right;
    }

    /// Merge child `left_idx + 1` into child `left_idx`
    fn merge_children(&mut self, parent: &mut Internal, left_idx: usize) {
        let left_id = parent.children[left_idx];
        let right_id = parent.children.remove(left_idx + 1);
        let separator = parent.keys.remove(left_idx);

        let left = self.take(left_id);
        let right = self.take(right_id);

        self.nodes[left_id] = match (left, right) {
            (Node::Leaf(mut l), Node::Leaf(r)) => {
                l.keys.extend(r.keys);
                l.values.extend(r.values);
                l.next = r.next;
                Node::Leaf(l)
            }
            (Node::Internal(mut l), Node::Internal(r)) => {
                l.keys.push(separator);
                l.keys.extend(r.keys);
                l.children.extend(r.children);
                Node::Internal(l)
            }
            (l, _) => l,
        };
        self.release(right_id);
    }

    /// Returns (depth, key count) of the subtree at `id`
    fn check_node(
        &self,
        id: NodeId,
        lower: Option<&str>,
        upper: Option<&str>,
        is_root: bool,
    ) -> Result<(usize, usize)> {
        let node = &self.nodes[id];
        let keys = match node {
            Node::Leaf(leaf) => &leaf.keys,
            Node::Internal(internal) => &internal.keys,
        };

        if keys.len() > self.order {
            return Err(EngineError::corruption(format!(
                "node {} has {} keys, order is {}",
                id,
                keys.len(),
                self.order
            )));
        }
        if !is_root && keys.len() < self.min_keys() {
            return Err(EngineError::corruption(format!(
                "node {} has {} keys, minimum is {}",
                id,
                keys.len(),
                self.min_keys()
            )));
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::corruption(format!("node {} keys out of order", id)));
        }
        let in_bounds = |k: &String| {
            lower.map_or(true, |lo| k.as_str() >= lo) && upper.map_or(true, |hi| k.as_str() < hi)
        };
        if !keys.iter().all(in_bounds) {
            return Err(EngineError::corruption(format!(
                "node {} holds keys outside its separator bounds",
                id
            )));
        }

        match node {
            Node::Leaf(leaf) => {
                if leaf.values.len() != leaf.keys.len() {
                    return Err(EngineError::corruption(format!(
                        "leaf {} has {} keys but {} values",
                        id,
                        leaf.keys.len(),
                        leaf.values.len()
                    )));
                }
                Ok((1, leaf.keys.len()))
            }
            Node::Internal(internal) => {
                if internal.children.len() != internal.keys.len() + 1 {
                    return Err(EngineError::corruption(format!(
                        "internal node {} has {} keys but {} children",
                        id,
                        internal.keys.len(),
                        internal.children.len()
                    )));
                }
                if is_root && internal.keys.is_empty() {
                    return Err(EngineError::corruption("internal root without keys"));
                }

                let mut depth = None;
                let mut count = 0;
                for (i, &child) in internal.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(internal.keys[i - 1].as_str()) };
                    let hi = internal.keys.get(i).map(String::as_str).or(upper);
                    let (child_depth, child_count) = self.check_node(child, lo, hi, false)?;
                    if depth.is_some_and(|d| d != child_depth) {
                        return Err(EngineError::corruption(format!(
                            "children of node {} end at different depths",
                            id
                        )));
                    }
                    depth = Some(child_depth);
                    count += child_count;
                }
                Ok((depth.unwrap_or(0) + 1, count))
            }
        }
    }
}

/// Index of the child whose range holds `key`
fn child_index(keys: &[String], key: &str) -> usize {
    keys.partition_point(|k| k.as_str() <= key)
}

/// Where an ordered scan stops
#[derive(Debug, Clone)]
enum Upper {
    Unbounded,
    Included(String),
    Excluded(String),
    Prefix(String),
}

impl Upper {
    fn admits(&self, key: &str) -> bool {
        match self {
            Upper::Unbounded => true,
            Upper::Included(end) => key <= end.as_str(),
            Upper::Excluded(end) => key < end.as_str(),
            Upper::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

/// Lazy ordered iterator over `(path, id)` pairs, walking the leaf chain
pub struct PathRange<'a> {
    index: &'a PathIndex,
    leaf: Option<NodeId>,
    pos: usize,
    upper: Upper,
}

impl<'a> Iterator for PathRange<'a> {
    type Item = (&'a str, DocumentId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.index.leaf(self.leaf?);
            if self.pos < leaf.keys.len() {
                let key = leaf.keys[self.pos].as_str();
                if !self.upper.admits(key) {
                    self.leaf = None;
                    return None;
                }
                let value = leaf.values[self.pos];
                self.pos += 1;
                return Some((key, value));
            }
            self.leaf = leaf.next;
            self.pos = 0;
        }
    }
}

//! In-memory tree of vault entries.
//!
//! The tree mirrors the storage hierarchy: one node per file or folder,
//! addressed by a [`NodeId`] that stays stable across renames and moves.
//! Ids are never reused, so a stale id held across a mutation resolves
//! to nothing instead of to an unrelated entry.
//!
//! The tree is pure bookkeeping. It performs no I/O; the vault keeps it
//! in sync with storage.

use std::collections::{BTreeMap, HashMap};

use crate::error::{VaultError, VaultResult};

/// Stable identifier for a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Node payload: files are leaves, folders hold a name-sorted child map.
#[derive(Debug, Clone)]
pub enum NodeKind {
    File,
    Folder { children: BTreeMap<String, NodeId> },
}

impl NodeKind {
    /// An empty folder.
    pub fn folder() -> Self {
        NodeKind::Folder {
            children: BTreeMap::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, NodeKind::Folder { .. })
    }
}

/// A single entry in the tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }
}

/// The vault hierarchy.
#[derive(Debug)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl Tree {
    /// A tree holding only the root folder. The root has the empty name
    /// and the empty path.
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::folder(),
            },
        );
        Tree {
            nodes,
            root,
            next_id: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn is_file(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_file)
    }

    pub fn is_folder(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_folder)
    }

    /// Path of a node relative to the root, `/`-separated. The root maps
    /// to the empty string.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = id;
        loop {
            let node = self.nodes.get(&current)?;
            match node.parent {
                Some(parent) => {
                    segments.push(node.name.as_str());
                    current = parent;
                }
                None => break,
            }
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Walk a path down from the root. The empty path resolves to the
    /// root itself.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let node = self.nodes.get(&current)?;
            let NodeKind::Folder { children } = &node.kind else {
                return None;
            };
            current = *children.get(segment)?;
        }
        Some(current)
    }

    /// Children of a folder in name order. Empty for files and unknown
    /// ids.
    pub fn children_of(&self, id: NodeId) -> Vec<(String, NodeId)> {
        match self.get(id) {
            Some(Node {
                kind: NodeKind::Folder { children },
                ..
            }) => children
                .iter()
                .map(|(name, id)| (name.clone(), *id))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True when `ancestor` lies on the parent chain of `id` (or is `id`
    /// itself).
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.get(node_id).and_then(|n| n.parent);
        }
        false
    }

    /// Insert a new node under `parent`. Fails when the parent is
    /// missing or a file, or when the name is already taken.
    pub fn attach(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> VaultResult<NodeId> {
        let name = name.into();
        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| VaultError::not_found("parent folder"))?;
        let NodeKind::Folder { children } = &mut parent_node.kind else {
            return Err(VaultError::other("parent is not a folder"));
        };
        if children.contains_key(&name) {
            return Err(VaultError::collision(&name));
        }

        let id = NodeId(self.next_id);
        self.next_id += 1;
        children.insert(name.clone(), id);
        self.nodes.insert(
            id,
            Node {
                name,
                parent: Some(parent),
                kind,
            },
        );
        Ok(id)
    }

    /// Remove a node and its whole subtree. Returns the removed node.
    pub fn remove_subtree(&mut self, id: NodeId) -> VaultResult<Node> {
        if id == self.root {
            return Err(VaultError::other("cannot remove the root"));
        }
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| VaultError::not_found("node"))?;
        let name = node.name.clone();

        if let Some(parent) = node.parent {
            if let Some(Node {
                kind: NodeKind::Folder { children },
                ..
            }) = self.nodes.get_mut(&parent)
            {
                children.remove(&name);
            }
        }

        let mut stack = vec![id];
        let mut removed = None;
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                if let NodeKind::Folder { children } = &node.kind {
                    stack.extend(children.values().copied());
                }
                if current == id {
                    removed = Some(node);
                }
            }
        }
        removed.ok_or_else(|| VaultError::not_found("node"))
    }

    /// Change a node's name in place. The new name must be free among
    /// its siblings.
    pub fn rename_node(&mut self, id: NodeId, new_name: impl Into<String>) -> VaultResult<()> {
        let new_name = new_name.into();
        if id == self.root {
            return Err(VaultError::other("cannot rename the root"));
        }
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| VaultError::not_found("node"))?;
        let parent = node
            .parent
            .ok_or_else(|| VaultError::other("cannot rename the root"))?;
        let old_name = node.name.clone();
        if old_name == new_name {
            return Ok(());
        }

        let Some(Node {
            kind: NodeKind::Folder { children },
            ..
        }) = self.nodes.get_mut(&parent)
        else {
            return Err(VaultError::not_found("parent folder"));
        };
        if children.contains_key(&new_name) {
            return Err(VaultError::collision(&new_name));
        }
        children.remove(&old_name);
        children.insert(new_name.clone(), id);

        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = new_name;
        }
        Ok(())
    }

    /// Re-parent a node. Refuses to move the root, to move a node into
    /// its own subtree, or to shadow an existing sibling name.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> VaultResult<()> {
        if id == self.root {
            return Err(VaultError::other("cannot move the root"));
        }
        if self.is_ancestor(id, new_parent) {
            return Err(VaultError::other("cannot move a node into its own subtree"));
        }
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| VaultError::not_found("node"))?;
        let name = node.name.clone();
        let old_parent = node
            .parent
            .ok_or_else(|| VaultError::other("cannot move the root"))?;
        if old_parent == new_parent {
            return Ok(());
        }

        {
            let target = self
                .nodes
                .get_mut(&new_parent)
                .ok_or_else(|| VaultError::not_found("destination folder"))?;
            let NodeKind::Folder { children } = &mut target.kind else {
                return Err(VaultError::other("destination is not a folder"));
            };
            if children.contains_key(&name) {
                return Err(VaultError::collision(&name));
            }
            children.insert(name.clone(), id);
        }

        if let Some(Node {
            kind: NodeKind::Folder { children },
            ..
        }) = self.nodes.get_mut(&old_parent)
        {
            children.remove(&name);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(new_parent);
        }
        Ok(())
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

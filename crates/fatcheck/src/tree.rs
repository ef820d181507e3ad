//! The in-memory directory tree built by a walk (spec §3, §4.5).
//!
//! Nodes live in a process-wide arena and are addressed by [`NodeId`]
//! rather than by owning pointers, so a directory and its parent can be
//! mutated independently of Rust's aliasing rules — the tree is rebuilt
//! from scratch every pass anyway, so there is no need for anything
//! fancier than an index into a `Vec`.

use crate::structures::directory_entry::{FileAttributes, RawShortEntry};

/// A handle into a [`Tree`]'s arena. Never reused once allocated within
/// a pass; the whole arena is discarded at pass end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One non-LFN directory entry, plus the tree links that place it.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub entry: RawShortEntry,
    /// Absolute byte offset of this entry on the device (0 for the
    /// synthetic FAT32 root node, which has no on-disk slot of its
    /// own).
    pub offset: u64,
    /// Assembled VFAT long name, if an LFN sequence bound to this
    /// entry.
    pub long_name: Option<String>,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    /// True only for the single synthetic FAT32 root node, which has no
    /// backing directory entry and must never be deleted or renamed.
    pub is_synthetic_root: bool,
}

impl FileNode {
    pub fn is_directory(&self) -> bool {
        self.entry.attrs().contains(FileAttributes::DIRECTORY)
    }

    pub fn is_volume_label(&self) -> bool {
        self.entry.attrs().contains(FileAttributes::VOLUME_LABEL)
    }

    pub fn start_cluster(&self) -> u32 {
        self.entry.cluster()
    }

    pub fn short_name_trimmed(&self) -> String {
        let name = self.entry.short_name();
        let bytes = name.as_bytes();
        let base = String::from_utf8_lossy(bytes[0..8].trim_ascii_end_custom())
            .trim_end()
            .to_string();
        let ext = String::from_utf8_lossy(bytes[8..11].trim_ascii_end_custom())
            .trim_end()
            .to_string();
        if ext.is_empty() {
            base
        } else {
            format!("{base}.{ext}")
        }
    }

    /// The best display name: the assembled long name if one bound, the
    /// short name otherwise.
    pub fn display_name(&self) -> String {
        self.long_name
            .clone()
            .unwrap_or_else(|| self.short_name_trimmed())
    }
}

/// Small helper trimming trailing `0x20` bytes without pulling in a
/// crate; short-name halves are always space-padded, never `\0`-padded.
trait TrimAsciiEnd {
    fn trim_ascii_end_custom(&self) -> &[u8];
}

impl TrimAsciiEnd for [u8] {
    fn trim_ascii_end_custom(&self) -> &[u8] {
        let end = self.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        &self[..end]
    }
}

/// The process-wide directory arena for one walk.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<FileNode>,
}

impl Tree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Allocate the single synthetic FAT32 root node (offset 0, no
    /// parent, start cluster taken from the boot sector).
    pub fn alloc_fat32_root(&mut self, root_cluster: u32) -> NodeId {
        let mut entry = RawShortEntry::zeroed_directory();
        entry.set_cluster(root_cluster);
        entry.attributes = FileAttributes::DIRECTORY.bits();
        self.push(FileNode {
            entry,
            offset: 0,
            long_name: None,
            parent: None,
            first_child: None,
            next_sibling: None,
            is_synthetic_root: true,
        })
    }

    /// Allocate the flat FAT12/16 root "node", used only as the
    /// tree-walk anchor; its own `entry`/`offset` are never inspected.
    pub fn alloc_fixed_root(&mut self) -> NodeId {
        self.push(FileNode {
            entry: RawShortEntry::zeroed_directory(),
            offset: 0,
            long_name: None,
            parent: None,
            first_child: None,
            next_sibling: None,
            is_synthetic_root: true,
        })
    }

    fn push(&mut self, node: FileNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Allocate a new node for `entry` and link it as the last child of
    /// `parent`.
    pub fn alloc_child(
        &mut self,
        parent: NodeId,
        entry: RawShortEntry,
        offset: u64,
        long_name: Option<String>,
    ) -> NodeId {
        let id = self.push(FileNode {
            entry,
            offset,
            long_name,
            parent: Some(parent),
            first_child: None,
            next_sibling: None,
            is_synthetic_root: false,
        });
        self.append_child(parent, id);
        id
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) {
        match self.nodes[parent.index()].first_child {
            None => self.nodes[parent.index()].first_child = Some(child),
            Some(first) => {
                let mut cursor = first;
                loop {
                    let next = self.nodes[cursor.index()].next_sibling;
                    match next {
                        Some(n) => cursor = n,
                        None => break,
                    }
                }
                self.nodes[cursor.index()].next_sibling = Some(child);
            }
        }
    }

    pub fn get(&self, id: NodeId) -> &FileNode {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut FileNode {
        &mut self.nodes[id.index()]
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).parent
    }

    /// The grandparent's start cluster, or `0` if `id`'s parent is the
    /// root (matching the "parent of root is cluster 0" convention).
    pub fn grandparent_start(&self, id: NodeId) -> u32 {
        match self.parent_of(id).and_then(|p| self.parent_of(p)) {
            Some(gp) => self.get(gp).start_cluster(),
            None => 0,
        }
    }

    /// In-order children of `parent`, as allocated.
    pub fn children(&self, parent: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.get(parent).first_child;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.get(current).next_sibling;
            Some(current)
        })
    }

    /// Depth-first pre-order over every node below (and including)
    /// `root`, used by the cross-link search to find which node already
    /// owns a cluster.
    pub fn walk_from(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let mut kids: Vec<NodeId> = self.children(id).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl RawShortEntry {
    /// A zeroed entry pre-stamped as a directory, used for synthetic
    /// root nodes that have no backing on-disk slot.
    fn zeroed_directory() -> Self {
        use bytemuck::Zeroable;
        Self::zeroed()
    }
}

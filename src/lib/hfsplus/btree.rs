//! Generic HFS+ B-tree walker.
//!
//! The catalog, extents overflow and attributes files share one node
//! format and differ only in their key and record payloads, so the
//! engine is generic over a `Key`/`Record` pair and reads nodes
//! through the tree file's fork reader. The engine holds no cache and
//! no cursor state of its own; lookups are `&self` and safe to run
//! concurrently.

use std::fmt;
use std::io::{Cursor, Read};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fork::Fork;
use crate::ondisk::{
    NodeDescriptor, TreeHeader, NODE_HEADER, NODE_INDEX, NODE_LEAF, NODE_MAP,
};

/// Upper bound on index descent; real HFS+ trees stay in single
/// digits, so anything deeper is a cycle.
const MAX_DEPTH: u32 = 16;

/// A tree key: parses itself (including its length prefix) and defines
/// the tree's total order.
pub trait Key: fmt::Debug + Ord + Eq + Clone {
    fn import(source: &mut dyn Read) -> Result<Self>
    where
        Self: Sized;
}

/// A leaf payload, parsed after its key.
pub trait Record<K>: Sized {
    fn import(source: &mut dyn Read, key: K) -> Result<Self>;
    fn key(&self) -> &K;
}

pub struct HeaderNode {
    pub descriptor: NodeDescriptor,
    pub header: TreeHeader,
}

pub struct IndexEntry<K> {
    pub key: K,
    pub child: u32,
}

pub struct IndexNode<K> {
    pub descriptor: NodeDescriptor,
    pub entries: Vec<IndexEntry<K>>,
}

pub struct LeafNode<R> {
    pub descriptor: NodeDescriptor,
    pub records: Vec<Arc<R>>,
}

pub enum Node<K, R> {
    Header(HeaderNode),
    Map(NodeDescriptor),
    Index(IndexNode<K>),
    Leaf(LeafNode<R>),
}

impl<K: Key, R: Record<K>> Node<K, R> {
    /// Parse one `node_size`-byte node. The record-offset table at the
    /// node tail must be strictly increasing and stay inside the node;
    /// anything else is corruption, not an I/O problem.
    fn load(data: &[u8]) -> Result<Node<K, R>> {
        if data.len() < NodeDescriptor::SIZE {
            return Err(Error::Corrupt("node smaller than its descriptor"));
        }
        let mut cursor = Cursor::new(data);
        let descriptor = NodeDescriptor::import(&mut cursor)?;

        let num_offsets = descriptor.num_records as usize + 1;
        let table_start = data
            .len()
            .checked_sub(num_offsets * 2)
            .filter(|&start| start >= NodeDescriptor::SIZE)
            .ok_or(Error::Corrupt("record offset table overruns node"))?;

        let mut offsets = Vec::with_capacity(num_offsets);
        for idx in 0..num_offsets {
            let at = data.len() - 2 * (idx + 1);
            let offset = u16::from_be_bytes([data[at], data[at + 1]]) as usize;
            if offset < NodeDescriptor::SIZE || offset > table_start {
                return Err(Error::Corrupt("record offset outside node"));
            }
            if let Some(&prev) = offsets.last() {
                if offset <= prev {
                    return Err(Error::Corrupt("record offset table not monotonic"));
                }
            }
            offsets.push(offset);
        }

        let records: Vec<&[u8]> = offsets
            .windows(2)
            .map(|pair| &data[pair[0]..pair[1]])
            .collect();

        match descriptor.kind {
            NODE_HEADER => {
                let first = records
                    .first()
                    .ok_or(Error::Corrupt("header node without a header record"))?;
                let header = TreeHeader::import(&mut Cursor::new(first))?;
                Ok(Node::Header(HeaderNode { descriptor, header }))
            }
            NODE_MAP => Ok(Node::Map(descriptor)),
            NODE_INDEX => {
                let mut entries = Vec::with_capacity(records.len());
                for raw in &records {
                    let mut cursor = Cursor::new(*raw);
                    let key = K::import(&mut cursor)?;
                    let mut child = [0u8; 4];
                    cursor.read_exact(&mut child)?;
                    entries.push(IndexEntry {
                        key,
                        child: u32::from_be_bytes(child),
                    });
                }
                Ok(Node::Index(IndexNode { descriptor, entries }))
            }
            NODE_LEAF => {
                let mut leaf_records = Vec::with_capacity(records.len());
                for raw in &records {
                    let mut cursor = Cursor::new(*raw);
                    let key = K::import(&mut cursor)?;
                    leaf_records.push(Arc::new(R::import(&mut cursor, key)?));
                }
                Ok(Node::Leaf(LeafNode {
                    descriptor,
                    records: leaf_records,
                }))
            }
            _ => Err(Error::Corrupt("unknown node kind")),
        }
    }
}

pub struct BTree<K, R> {
    fork: Fork,
    header: TreeHeader,
    _marker: PhantomData<fn() -> (K, R)>,
}

impl<K: Key, R: Record<K>> BTree<K, R> {
    /// Reads and validates the header node of the tree file.
    pub fn open(fork: Fork) -> Result<BTree<K, R>> {
        let mut prefix = [0u8; 512];
        fork.read_exact_at(&mut prefix, 0)?;
        let mut cursor = Cursor::new(&prefix[..]);
        let descriptor = NodeDescriptor::import(&mut cursor)?;
        if descriptor.kind != NODE_HEADER {
            return Err(Error::Corrupt("tree does not start with a header node"));
        }
        let header = TreeHeader::import(&mut cursor)?;
        let node_size = header.node_size;
        if !node_size.is_power_of_two() || node_size < 512 {
            return Err(Error::Corrupt("invalid tree node size"));
        }
        Ok(BTree {
            fork,
            header,
            _marker: PhantomData,
        })
    }

    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    fn load_node(&self, node: u32) -> Result<Node<K, R>> {
        if node >= self.header.total_nodes {
            return Err(Error::Corrupt("node number out of range"));
        }
        let node_size = self.header.node_size as usize;
        let mut buf = vec![0u8; node_size];
        self.fork
            .read_exact_at(&mut buf, node as u64 * node_size as u64)?;
        Node::load(&buf)
    }

    /// Exact-match lookup.
    pub fn find(&self, key: &K) -> Result<Arc<R>> {
        let mut cursor = self.cursor_at(key)?;
        match cursor.next() {
            Some(record) => {
                let record = record?;
                if record.key() == key {
                    Ok(record)
                } else {
                    Err(Error::NotFound)
                }
            }
            None => Err(Error::NotFound),
        }
    }

    /// Forward cursor positioned at the first record whose key is not
    /// below `key`. Descends picking the rightmost child whose
    /// separator is ≤ the target, falling back to the leftmost child
    /// when the target precedes the whole subtree.
    pub fn cursor_at(&self, key: &K) -> Result<LeafCursor<'_, K, R>> {
        let mut node_id = self.header.root_node;
        if node_id == 0 {
            return Ok(LeafCursor::exhausted(self));
        }
        let mut depth = 0;
        loop {
            depth += 1;
            if depth > MAX_DEPTH {
                return Err(Error::Corrupt("b-tree descent does not terminate"));
            }
            match self.load_node(node_id)? {
                Node::Index(index) => {
                    let first = index
                        .entries
                        .first()
                        .ok_or(Error::Corrupt("index node without entries"))?;
                    let mut chosen = first.child;
                    for entry in &index.entries {
                        if &entry.key <= key {
                            chosen = entry.child;
                        } else {
                            break;
                        }
                    }
                    node_id = chosen;
                }
                Node::Leaf(leaf) => {
                    let position = leaf.records.iter().position(|r| r.key() >= key);
                    return match position {
                        Some(index) => Ok(LeafCursor {
                            tree: self,
                            leaf: Some(leaf),
                            index,
                            hops: 0,
                        }),
                        // Every record here is below the target; the
                        // first match, if any, starts the next leaf.
                        None => {
                            let mut cursor = LeafCursor {
                                tree: self,
                                leaf: Some(leaf),
                                index: usize::MAX,
                                hops: 0,
                            };
                            cursor.advance_leaf()?;
                            Ok(cursor)
                        }
                    };
                }
                Node::Header(_) | Node::Map(_) => {
                    return Err(Error::Corrupt("descent reached a non-index node"))
                }
            }
        }
    }

    /// Backward cursor positioned at the last record whose key is not
    /// above `key`. The mirror image of `cursor_at`, following
    /// backward sibling links.
    pub fn cursor_before(&self, key: &K) -> Result<LeafCursorRev<'_, K, R>> {
        let mut node_id = self.header.root_node;
        if node_id == 0 {
            return Ok(LeafCursorRev::exhausted(self));
        }
        let mut depth = 0;
        loop {
            depth += 1;
            if depth > MAX_DEPTH {
                return Err(Error::Corrupt("b-tree descent does not terminate"));
            }
            match self.load_node(node_id)? {
                Node::Index(index) => {
                    let first = index
                        .entries
                        .first()
                        .ok_or(Error::Corrupt("index node without entries"))?;
                    let mut chosen = first.child;
                    for entry in &index.entries {
                        if &entry.key <= key {
                            chosen = entry.child;
                        } else {
                            break;
                        }
                    }
                    node_id = chosen;
                }
                Node::Leaf(leaf) => {
                    let position = leaf.records.iter().rposition(|r| r.key() <= key);
                    return match position {
                        Some(index) => Ok(LeafCursorRev {
                            tree: self,
                            leaf: Some(leaf),
                            index: index as isize,
                            hops: 0,
                        }),
                        None => {
                            let mut cursor = LeafCursorRev {
                                tree: self,
                                leaf: Some(leaf),
                                index: -1,
                                hops: 0,
                            };
                            cursor.retreat_leaf()?;
                            Ok(cursor)
                        }
                    };
                }
                Node::Header(_) | Node::Map(_) => {
                    return Err(Error::Corrupt("descent reached a non-index node"))
                }
            }
        }
    }
}

/// Forward leaf iteration, bounded by the zero sibling link.
pub struct LeafCursor<'a, K, R> {
    tree: &'a BTree<K, R>,
    leaf: Option<LeafNode<R>>,
    index: usize,
    hops: u32,
}

impl<'a, K: Key, R: Record<K>> LeafCursor<'a, K, R> {
    fn exhausted(tree: &'a BTree<K, R>) -> Self {
        LeafCursor {
            tree,
            leaf: None,
            index: 0,
            hops: 0,
        }
    }

    fn advance_leaf(&mut self) -> Result<()> {
        let Some(leaf) = self.leaf.take() else {
            return Ok(());
        };
        let next = leaf.descriptor.forward_link;
        if next == 0 {
            return Ok(());
        }
        self.hops += 1;
        if self.hops > self.tree.header.total_nodes {
            return Err(Error::Corrupt("leaf sibling links form a cycle"));
        }
        match self.tree.load_node(next)? {
            Node::Leaf(leaf) => {
                self.leaf = Some(leaf);
                self.index = 0;
                Ok(())
            }
            _ => Err(Error::Corrupt("leaf sibling is not a leaf")),
        }
    }
}

impl<'a, K: Key, R: Record<K>> Iterator for LeafCursor<'a, K, R> {
    type Item = Result<Arc<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;
            if self.index < leaf.records.len() {
                let record = Arc::clone(&leaf.records[self.index]);
                self.index += 1;
                return Some(Ok(record));
            }
            if let Err(err) = self.advance_leaf() {
                return Some(Err(err));
            }
            self.leaf.as_ref()?;
        }
    }
}

/// Backward leaf iteration, bounded by the zero sibling link.
pub struct LeafCursorRev<'a, K, R> {
    tree: &'a BTree<K, R>,
    leaf: Option<LeafNode<R>>,
    index: isize,
    hops: u32,
}

impl<'a, K: Key, R: Record<K>> LeafCursorRev<'a, K, R> {
    fn exhausted(tree: &'a BTree<K, R>) -> Self {
        LeafCursorRev {
            tree,
            leaf: None,
            index: -1,
            hops: 0,
        }
    }

    fn retreat_leaf(&mut self) -> Result<()> {
        let Some(leaf) = self.leaf.take() else {
            return Ok(());
        };
        let prev = leaf.descriptor.backward_link;
        if prev == 0 {
            return Ok(());
        }
        self.hops += 1;
        if self.hops > self.tree.header.total_nodes {
            return Err(Error::Corrupt("leaf sibling links form a cycle"));
        }
        match self.tree.load_node(prev)? {
            Node::Leaf(leaf) => {
                self.index = leaf.records.len() as isize - 1;
                self.leaf = Some(leaf);
                Ok(())
            }
            _ => Err(Error::Corrupt("leaf sibling is not a leaf")),
        }
    }
}

impl<'a, K: Key, R: Record<K>> Iterator for LeafCursorRev<'a, K, R> {
    type Item = Result<Arc<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;
            if self.index >= 0 {
                let record = Arc::clone(&leaf.records[self.index as usize]);
                self.index -= 1;
                return Some(Ok(record));
            }
            if let Err(err) = self.retreat_leaf() {
                return Some(Err(err));
            }
            self.leaf.as_ref()?;
        }
    }
}

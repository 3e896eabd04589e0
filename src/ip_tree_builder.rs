//! IP Tree Builder for MMDB Format
//!
//! Builds the binary search tree of an MMDB file from CIDR networks.
//! IPv4 networks inserted into an IPv6 tree live under `::/96`, which is
//! where readers start IPv4 lookups.

use crate::error::{MmdbError, Result};
use crate::mmdb::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use std::net::IpAddr;

/// IP tree builder using arena allocation
pub struct IpTreeBuilder {
    /// Record size for the tree
    record_size: RecordSize,
    /// All nodes in the tree (arena); node 0 is the root
    nodes: Vec<Node>,
    /// IP version (determines tree depth)
    ip_version: IpVersion,
}

/// A node in the IP tree
#[derive(Debug, Clone, Copy)]
struct Node {
    /// Left child (bit 0)
    left: NodePointer,
    /// Right child (bit 1)
    right: NodePointer,
}

/// Node pointer - can point to another node, data, or be empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    /// Points to another node (value is node ID)
    Node(u32),
    /// Data section offset and the prefix length it was inserted with.
    /// The prefix length only steers building; it is not written out.
    Data(u32, u8),
    /// Empty (not found marker)
    Empty,
}

impl IpTreeBuilder {
    /// Create a tree builder for `ip_version` addresses
    pub fn new(ip_version: IpVersion, record_size: RecordSize) -> Self {
        Self {
            record_size,
            nodes: vec![Node::new_empty()],
            ip_version,
        }
    }

    /// Create a new IPv4 tree builder
    pub fn new_v4(record_size: RecordSize) -> Self {
        Self::new(IpVersion::V4, record_size)
    }

    /// Create a new IPv6 tree builder (can include IPv4)
    pub fn new_v6(record_size: RecordSize) -> Self {
        Self::new(IpVersion::V6, record_size)
    }

    /// Number of nodes allocated so far
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Change the record size used when serializing
    pub fn set_record_size(&mut self, record_size: RecordSize) {
        self.record_size = record_size;
    }

    /// Insert a network with associated data offset
    ///
    /// Longer prefixes win over shorter ones regardless of insertion order.
    /// Re-inserting the same prefix replaces its data.
    ///
    /// # Arguments
    /// * `addr` - Network address (v4 or v6); host bits are ignored
    /// * `prefix_len` - Network prefix length (netmask)
    /// * `data_offset` - Offset into the data section
    pub fn insert(&mut self, addr: IpAddr, prefix_len: u8, data_offset: u32) -> Result<()> {
        match addr {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return Err(MmdbError::InvalidInput(format!(
                        "IPv4 prefix length {} exceeds 32",
                        prefix_len
                    )));
                }
                let bits = u32::from(v4) as u128;
                match self.ip_version {
                    // IPv4 in an IPv6 tree sits under ::/96
                    IpVersion::V6 => self.insert_bits(bits, 96 + prefix_len, data_offset),
                    IpVersion::V4 => self.insert_bits(bits << 96, prefix_len, data_offset),
                }
            }
            IpAddr::V6(v6) => {
                if self.ip_version == IpVersion::V4 {
                    return Err(MmdbError::InvalidInput(format!(
                        "cannot insert IPv6 network {} into an IPv4 tree",
                        v6
                    )));
                }
                if prefix_len > 128 {
                    return Err(MmdbError::InvalidInput(format!(
                        "IPv6 prefix length {} exceeds 128",
                        prefix_len
                    )));
                }
                self.insert_bits(u128::from(v6), prefix_len, data_offset)
            }
        }
    }

    /// Insert a left-aligned bit string of `prefix_len` bits
    fn insert_bits(&mut self, bits: u128, prefix_len: u8, data_offset: u32) -> Result<()> {
        if prefix_len == 0 {
            // Everything is covered: fill the root's gaps
            self.backfill(0, data_offset, 0);
            return Ok(());
        }

        let mut node_id = 0u32;
        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.nodes[node_id as usize].child(bit);

            if depth + 1 == prefix_len {
                match child {
                    NodePointer::Empty => {
                        self.nodes[node_id as usize]
                            .set_child(bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(_, existing_len) => {
                        if prefix_len >= existing_len {
                            self.nodes[node_id as usize]
                                .set_child(bit, NodePointer::Data(data_offset, prefix_len));
                        }
                    }
                    // More specific networks exist below: fill around them
                    NodePointer::Node(child_id) => {
                        self.backfill(child_id, data_offset, prefix_len);
                    }
                }
                return Ok(());
            }

            node_id = match child {
                NodePointer::Node(child_id) => child_id,
                NodePointer::Empty => {
                    let new_id = self.allocate_node(Node::new_empty())?;
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
                // A shorter prefix covers this path: push it down one level
                // so both halves keep it, then keep descending
                existing @ NodePointer::Data(..) => {
                    let new_id = self.allocate_node(Node {
                        left: existing,
                        right: existing,
                    })?;
                    self.nodes[node_id as usize].set_child(bit, NodePointer::Node(new_id));
                    new_id
                }
            };
        }

        Ok(())
    }

    fn allocate_node(&mut self, node: Node) -> Result<u32> {
        let id = u32::try_from(self.nodes.len())
            .map_err(|_| MmdbError::InvalidInput("search tree exceeds 2^32 nodes".to_string()))?;
        self.nodes.push(node);
        Ok(id)
    }

    /// Fill a subtree with less-specific data
    ///
    /// Empty edges take the new data. Data edges take it when their prefix
    /// is no longer than `prefix_len`. Iterative so deep IPv6 subtrees do
    /// not recurse.
    fn backfill(&mut self, root: u32, data_offset: u32, prefix_len: u8) {
        let mut pending = vec![root];
        while let Some(node_id) = pending.pop() {
            for bit in 0..2u8 {
                match self.nodes[node_id as usize].child(bit) {
                    NodePointer::Empty => self.nodes[node_id as usize]
                        .set_child(bit, NodePointer::Data(data_offset, prefix_len)),
                    NodePointer::Data(_, existing_len) if prefix_len >= existing_len => self.nodes
                        [node_id as usize]
                        .set_child(bit, NodePointer::Data(data_offset, prefix_len)),
                    NodePointer::Data(..) => {}
                    NodePointer::Node(child_id) => pending.push(child_id),
                }
            }
        }
    }

    /// Serialize the tree
    ///
    /// `data_section_size` is used to check that every data record fits the
    /// configured record size.
    ///
    /// Returns: (tree_bytes, node_count)
    pub fn build(&self, data_section_size: u64) -> Result<(Vec<u8>, u32)> {
        let node_count = self.node_count();
        let largest = Self::largest_record(node_count, data_section_size);
        if largest > self.record_size.max_record() as u64 {
            return Err(MmdbError::InvalidInput(format!(
                "{} nodes and {} data bytes need records up to {}, beyond {}-bit capacity",
                node_count,
                data_section_size,
                largest,
                self.record_size.bits()
            )));
        }

        let node_size = self.record_size.node_bytes();
        let mut tree_bytes = Vec::with_capacity(node_count as usize * node_size);
        for node in &self.nodes {
            let left = self.pointer_to_value(node.left, node_count)?;
            let right = self.pointer_to_value(node.right, node_count)?;
            self.write_node(&mut tree_bytes, left, right);
        }

        Ok((tree_bytes, node_count))
    }

    /// Largest record value a tree of this shape can contain
    pub fn largest_record(node_count: u32, data_section_size: u64) -> u64 {
        node_count as u64 + DATA_SECTION_SEPARATOR_SIZE + data_section_size
    }

    /// Convert node pointer to its on-disk record value
    fn pointer_to_value(&self, pointer: NodePointer, node_count: u32) -> Result<u32> {
        let value = match pointer {
            NodePointer::Empty => node_count as u64,
            NodePointer::Node(id) => id as u64,
            // Reader does: record - node_count - 16
            NodePointer::Data(offset, _) => {
                node_count as u64 + DATA_SECTION_SEPARATOR_SIZE + offset as u64
            }
        };

        u32::try_from(value)
            .ok()
            .filter(|&v| v <= self.record_size.max_record())
            .ok_or_else(|| {
                MmdbError::InvalidInput(format!(
                    "record value {} does not fit in {} bits",
                    value,
                    self.record_size.bits()
                ))
            })
    }

    /// Append one node's two records
    fn write_node(&self, tree: &mut Vec<u8>, left: u32, right: u32) {
        match self.record_size {
            RecordSize::Bits24 => {
                tree.extend_from_slice(&left.to_be_bytes()[1..]);
                tree.extend_from_slice(&right.to_be_bytes()[1..]);
            }
            RecordSize::Bits28 => {
                // Middle byte: left high 4 bits in upper nibble, right high 4 bits in lower nibble
                tree.extend_from_slice(&left.to_be_bytes()[1..]);
                tree.push((((left >> 24) & 0x0F) as u8) << 4 | ((right >> 24) & 0x0F) as u8);
                tree.extend_from_slice(&right.to_be_bytes()[1..]);
            }
            RecordSize::Bits32 => {
                tree.extend_from_slice(&left.to_be_bytes());
                tree.extend_from_slice(&right.to_be_bytes());
            }
        }
    }
}

impl Node {
    fn new_empty() -> Self {
        Self {
            left: NodePointer::Empty,
            right: NodePointer::Empty,
        }
    }

    fn child(&self, bit: u8) -> NodePointer {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    fn set_child(&mut self, bit: u8, pointer: NodePointer) {
        if bit == 0 {
            self.left = pointer;
        } else {
            self.right = pointer;
        }
    }
}

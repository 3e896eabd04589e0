//! MMDB Search Tree Traversal
//!
//! Implements binary search tree traversal for IP address lookups.
//! The tree uses a compact binary representation where each node contains
//! two records (left and right) that point to either:
//! - Another node (record < node_count, continue traversal)
//! - The "not found" marker (record == node_count)
//! - A data section offset (record > node_count, found)

use super::format::MmdbHeader;
use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::error::{MmdbError, Result};
use crate::source::ByteSource;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::trace;

/// Result of an IP lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start)
    pub data_offset: u64,
    /// Network prefix length, in bits of the queried address family
    pub prefix_len: u8,
}

/// Where IPv4 lookups begin
///
/// For IPv4 trees this is the root. For IPv6 trees it is whatever record
/// 96 zero bits lead to, which may already be terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Start {
    /// Record value reached (a node index, or a terminal record)
    pub record: u32,
    /// Number of bits followed to reach it
    pub depth: u8,
}

/// Search tree for IP address lookups
pub struct SearchTree<'a, S: ByteSource + ?Sized> {
    /// The source containing the tree at offset 0
    source: &'a S,
    node_count: u32,
    record_size: RecordSize,
    ip_version: IpVersion,
    data_section_size: u64,
}

impl<'a, S: ByteSource + ?Sized> SearchTree<'a, S> {
    /// Create a new search tree
    pub fn new(source: &'a S, header: &MmdbHeader) -> Self {
        Self {
            source,
            node_count: header.node_count,
            record_size: header.record_size,
            ip_version: header.ip_version,
            data_section_size: header.data_section_size(),
        }
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Follow 96 zero bits from the root of an IPv6 tree
    pub fn find_ipv4_start(&self) -> Result<Ipv4Start> {
        if self.ip_version == IpVersion::V4 {
            return Ok(Ipv4Start {
                record: 0,
                depth: 0,
            });
        }

        let mut record = 0u32;
        let mut depth = 0u8;
        while depth < 96 && record < self.node_count {
            record = self.read_node(record)?.0;
            depth += 1;
        }
        Ok(Ipv4Start { record, depth })
    }

    /// Look up an IP address
    ///
    /// `ipv4_start` comes from [`find_ipv4_start`](Self::find_ipv4_start),
    /// computed once per database.
    pub fn lookup(&self, ip: IpAddr, ipv4_start: Ipv4Start) -> Result<Option<LookupResult>> {
        match (ip, self.ip_version) {
            (IpAddr::V4(addr), _) => {
                self.walk(ipv4_start.record, u32::from(addr) as u128, 32)
            }
            (IpAddr::V6(addr), IpVersion::V6) => self.walk(0, u128::from(addr), 128),
            (IpAddr::V6(_), IpVersion::V4) => Err(MmdbError::AddressFamilyMismatch),
        }
    }

    /// Walk `bit_count` bits of `address`, most significant first
    fn walk(&self, start: u32, address: u128, bit_count: u8) -> Result<Option<LookupResult>> {
        let mut record = start;
        let mut depth = 0u8;

        while record < self.node_count {
            if depth == bit_count {
                trace!(
                    "address bits exhausted at internal node {} (depth {})",
                    record,
                    depth
                );
                return Ok(None);
            }

            let (left, right) = self.read_node(record)?;
            let bit = (address >> (bit_count - 1 - depth)) & 1;
            record = if bit == 0 { left } else { right };
            depth += 1;
        }

        self.resolve_record(record, depth)
    }

    /// Classify a terminal record reached at `depth`
    pub fn resolve_record(&self, record: u32, depth: u8) -> Result<Option<LookupResult>> {
        if record == self.node_count {
            trace!("no data at depth {}", depth);
            return Ok(None);
        }

        let data_offset = self.data_offset(record)?;
        trace!("record {} -> data offset {} (/{})", record, data_offset, depth);
        Ok(Some(LookupResult {
            data_offset,
            prefix_len: depth,
        }))
    }

    /// Convert a data record to an offset relative to the data section
    ///
    /// Records count from the start of the separator, so the smallest valid
    /// data record is `node_count + 16`.
    pub fn data_offset(&self, record: u32) -> Result<u64> {
        let relative = (record as u64)
            .checked_sub(self.node_count as u64)
            .and_then(|r| r.checked_sub(DATA_SECTION_SEPARATOR_SIZE))
            .ok_or_else(|| {
                MmdbError::corrupt(format!(
                    "record {} points into the data section separator (node count {})",
                    record, self.node_count
                ))
            })?;

        if relative >= self.data_section_size {
            return Err(MmdbError::corrupt(format!(
                "record {} points to offset {} beyond the {} byte data section",
                record, relative, self.data_section_size
            )));
        }
        Ok(relative)
    }

    /// Read the (left, right) records of `node`
    pub fn read_node(&self, node: u32) -> Result<(u32, u32)> {
        if node >= self.node_count {
            return Err(MmdbError::corrupt(format!(
                "node index {} exceeds node count {}",
                node, self.node_count
            )));
        }

        let node_bytes = self.record_size.node_bytes();
        let bytes = self.source.read(node as u64 * node_bytes as u64, node_bytes)?;
        Ok(self.record_size.split_node(&bytes))
    }

    /// Iterate every network that has data, in address order
    pub fn networks(self) -> Networks<'a, S> {
        let bit_count = self.ip_version.bit_count();
        Networks {
            tree: self,
            stack: vec![(0, 0, 0)],
            bit_count,
            done: false,
        }
    }
}

/// A network with data, as yielded by [`Networks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    /// First address of the network
    pub addr: IpAddr,
    /// Prefix length in bits of `addr`'s family
    pub prefix_len: u8,
    /// Offset into the data section
    pub data_offset: u64,
}

/// Depth-first walk over the whole tree
///
/// The stack never holds more than one pending sibling per level. Stops
/// after the first error.
pub struct Networks<'a, S: ByteSource + ?Sized> {
    tree: SearchTree<'a, S>,
    /// (record, address bits so far, depth)
    stack: Vec<(u32, u128, u8)>,
    bit_count: u8,
    done: bool,
}

impl<S: ByteSource + ?Sized> Networks<'_, S> {
    fn network(&self, bits: u128, prefix_len: u8, data_offset: u64) -> Network {
        let addr = match self.bit_count {
            32 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
            _ => IpAddr::V6(Ipv6Addr::from(bits)),
        };
        Network {
            addr,
            prefix_len,
            data_offset,
        }
    }

    fn step(&mut self) -> Result<Option<Network>> {
        while let Some((record, bits, depth)) = self.stack.pop() {
            if record < self.tree.node_count {
                if depth == self.bit_count {
                    return Err(MmdbError::corrupt(format!(
                        "search tree deeper than {} bits at node {}",
                        self.bit_count, record
                    )));
                }
                let (left, right) = self.tree.read_node(record)?;
                let right_bits = bits | (1u128 << (self.bit_count - 1 - depth));
                self.stack.push((right, right_bits, depth + 1));
                self.stack.push((left, bits, depth + 1));
                continue;
            }

            if let Some(found) = self.tree.resolve_record(record, depth)? {
                return Ok(Some(self.network(bits, found.prefix_len, found.data_offset)));
            }
        }
        Ok(None)
    }
}

impl<S: ByteSource + ?Sized> Iterator for Networks<'_, S> {
    type Item = Result<Network>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(network)) => Some(Ok(network)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(node_count: u32, record_size: RecordSize, ip_version: IpVersion) -> MmdbHeader {
        let tree_size = node_count as u64 * record_size.node_bytes() as u64;
        MmdbHeader {
            node_count,
            record_size,
            ip_version,
            tree_size,
            data_section_start: tree_size + 16,
            data_section_end: tree_size + 16 + 64,
            metadata_start: tree_size + 16 + 64 + 14,
        }
    }

    fn node24(left: u32, right: u32) -> Vec<u8> {
        let mut out = left.to_be_bytes()[1..].to_vec();
        out.extend_from_slice(&right.to_be_bytes()[1..]);
        out
    }

    #[test]
    fn test_24bit_lookup_and_prefix() {
        // node 0: left -> node 1, right -> absent
        // node 1: left -> data offset 0, right -> absent
        let mut tree = node24(1, 2);
        tree.extend(node24(2 + 16, 2));
        let header = header(2, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        let start = search.find_ipv4_start().unwrap();

        let hit = search
            .lookup("1.2.3.4".parse().unwrap(), start)
            .unwrap()
            .unwrap();
        assert_eq!(hit, LookupResult { data_offset: 0, prefix_len: 2 });

        assert_eq!(search.lookup("128.0.0.1".parse().unwrap(), start).unwrap(), None);
        assert_eq!(search.lookup("64.0.0.1".parse().unwrap(), start).unwrap(), None);
    }

    #[test]
    fn test_ipv6_query_on_ipv4_tree() {
        let tree = node24(1, 1);
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        assert_eq!(
            search.lookup("::1".parse().unwrap(), Ipv4Start { record: 0, depth: 0 }),
            Err(MmdbError::AddressFamilyMismatch)
        );
    }

    #[test]
    fn test_record_in_separator_is_corrupt() {
        let tree = node24(1 + 5, 1);
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        let err = search
            .lookup("1.1.1.1".parse().unwrap(), Ipv4Start { record: 0, depth: 0 })
            .unwrap_err();
        assert!(matches!(err, MmdbError::CorruptFormat(ref m) if m.contains("separator")));
    }

    #[test]
    fn test_record_past_data_section_is_corrupt() {
        let tree = node24(1 + 16 + 64, 1);
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        assert!(matches!(
            search.lookup("1.1.1.1".parse().unwrap(), Ipv4Start { record: 0, depth: 0 }),
            Err(MmdbError::CorruptFormat(_))
        ));
    }

    #[test]
    fn test_node_index_out_of_range() {
        let tree = node24(1, 1);
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        assert!(matches!(search.read_node(1), Err(MmdbError::CorruptFormat(_))));
    }

    #[test]
    fn test_truncated_tree() {
        let tree = vec![0u8; 4];
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        assert!(matches!(search.read_node(0), Err(MmdbError::Truncated { .. })));
    }

    #[test]
    fn test_bits_exhausted_on_internal_node() {
        // A self-loop: every record of node 0 points back to node 0
        let tree = node24(0, 0);
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);
        assert_eq!(
            search
                .lookup("9.9.9.9".parse().unwrap(), Ipv4Start { record: 0, depth: 0 })
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_ipv4_start_terminal_in_ipv6_tree() {
        // ::/1 holds data directly, so IPv4 start is a data record
        let tree = node24(1 + 16, 1);
        let header = header(1, RecordSize::Bits24, IpVersion::V6);
        let search = SearchTree::new(tree.as_slice(), &header);

        let start = search.find_ipv4_start().unwrap();
        assert_eq!(start, Ipv4Start { record: 17, depth: 1 });

        let hit = search
            .lookup("10.0.0.1".parse().unwrap(), start)
            .unwrap()
            .unwrap();
        assert_eq!(hit.prefix_len, 0);
        assert_eq!(hit.data_offset, 0);
    }

    #[test]
    fn test_networks_in_address_order() {
        // 0.0.0.0/1 -> data 0, 128.0.0.0/2 -> data 4, 192.0.0.0/2 -> absent
        let mut tree = node24(2 + 16, 1);
        tree.extend(node24(2 + 16 + 4, 2));
        let header = header(2, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);

        let networks: Vec<Network> = search.networks().map(|n| n.unwrap()).collect();
        assert_eq!(
            networks,
            vec![
                Network {
                    addr: "0.0.0.0".parse().unwrap(),
                    prefix_len: 1,
                    data_offset: 0
                },
                Network {
                    addr: "128.0.0.0".parse().unwrap(),
                    prefix_len: 2,
                    data_offset: 4
                },
            ]
        );
    }

    #[test]
    fn test_networks_stops_after_error() {
        let tree = node24(0, 0);
        let header = header(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(tree.as_slice(), &header);

        let mut networks = search.networks();
        assert!(matches!(networks.next(), Some(Err(MmdbError::CorruptFormat(_)))));
        assert!(networks.next().is_none());
    }
}

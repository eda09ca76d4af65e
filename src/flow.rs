//! Direction-insensitive flow identification.
//!
//! Both directions of a TCP conversation must land on the same connection
//! state, so the flow key orders the two endpoints canonically before
//! hashing. The hash is 32-bit FNV-1a over the ordered 5-tuple.

use std::net::IpAddr;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// IP protocol number for TCP, mixed into the hash input.
const IP_PROTO_TCP: u8 = 6;

/// Newtype for the 4-byte hash key identifying a TCP connection.
///
/// The key is direction-insensitive: packets of both directions of the same
/// conversation produce the same `FlowKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey(pub u32);

impl FlowKey {
    /// Compute the flow key for a (src, dst) endpoint pair.
    ///
    /// The smaller `(address, port)` tuple is hashed first, so swapping
    /// source and destination yields the same key.
    pub fn from_endpoints(
        src_addr: IpAddr,
        src_port: u16,
        dst_addr: IpAddr,
        dst_port: u16,
    ) -> Self {
        let src = (addr_bytes(src_addr), src_port.to_be_bytes());
        let dst = (addr_bytes(dst_addr), dst_port.to_be_bytes());

        // Lexicographic comparison of the whole address:port tuple
        let (first, second) = if src <= dst { (&src, &dst) } else { (&dst, &src) };

        let mut hash = FNV_OFFSET_BASIS;
        hash = fnv1a_update(hash, &first.0);
        hash = fnv1a_update(hash, &second.0);
        hash = fnv1a_update(hash, &[IP_PROTO_TCP, 0]);
        hash = fnv1a_update(hash, &first.1);
        hash = fnv1a_update(hash, &second.1);
        Self(hash)
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Convert an IP address to network-byte-order bytes.
fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn fnv1a_update(mut hash: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

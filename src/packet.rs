//! Traits for abstracting packet sources
//!
//! The engine does not capture or parse packets itself. Implement
//! [`PacketData`] for whatever your capture layer produces (pcap records,
//! AF_PACKET buffers, eBPF events) to feed it into the reassembler.

use std::net::IpAddr;

/// Newtype for capture timestamps, in microseconds since the epoch.
///
/// Connection start/end times and the purge clock all derive from capture
/// timestamps, never from the wall clock, so replaying a capture yields
/// identical behavior every run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Build a timestamp from whole seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000)
    }

    /// Seconds since the epoch, truncating sub-second precision.
    pub const fn as_secs(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns `self - other` in microseconds, clamped to zero on underflow.
    pub fn saturating_sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Trait for parsed packets that can be fed to the reassembler.
///
/// Implement this for your capture source. The reassembler only reads the
/// fields below; link-layer and IP headers are assumed to be already parsed
/// and validated by the caller.
///
/// Packets for which [`is_tcp()`](Self::is_tcp) returns false, or for which
/// either address accessor returns `None`, are silently ignored: live
/// captures are full of ARP, ICMP and truncated frames, and none of them is
/// an error.
pub trait PacketData {
    /// Capture timestamp of this packet.
    fn timestamp(&self) -> Timestamp;

    /// Whether this packet carries a TCP segment over IPv4 or IPv6.
    fn is_tcp(&self) -> bool;

    /// L3 source address, `None` if the packet has no usable IP layer.
    fn src_addr(&self) -> Option<IpAddr>;

    /// L3 destination address, `None` if the packet has no usable IP layer.
    fn dst_addr(&self) -> Option<IpAddr>;

    /// TCP source port.
    fn src_port(&self) -> u16;

    /// TCP destination port.
    fn dst_port(&self) -> u16;

    /// Raw TCP sequence number of this segment.
    fn sequence(&self) -> u32;

    /// SYN flag bit.
    fn syn(&self) -> bool;

    /// FIN flag bit.
    fn fin(&self) -> bool;

    /// RST flag bit.
    fn rst(&self) -> bool;

    /// TCP payload bytes (may be empty).
    fn payload(&self) -> &[u8];
}

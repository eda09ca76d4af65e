//! Connection state tracking for TCP reassembly

use std::net::IpAddr;

use bytes::Bytes;

use crate::flow::FlowKey;
use crate::packet::Timestamp;
use crate::seq;

/// One direction of a TCP connection.
///
/// `First` is the side whose traffic was observed first on the tap, `Second`
/// is the opposite direction. Neither is necessarily the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The direction observed first.
    First,
    /// The opposite direction.
    Second,
}

impl Side {
    /// Index of this side into per-connection arrays (0 or 1).
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    /// The other direction of the same connection.
    pub fn opposite(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEndReason {
    /// The endpoints terminated the connection with FIN or RST packets.
    FinOrRst,
    /// The embedder closed the connection through the engine API.
    Manual,
}

/// Answer of [`Reassembler::connection_status`](crate::Reassembler::connection_status).
///
/// The discriminants follow the classic +1 / 0 / −1 contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ConnectionStatus {
    /// The connection is tracked and still active.
    Open = 1,
    /// The connection is tracked but has been closed (not yet purged).
    Closed = 0,
    /// The connection is not tracked by this engine instance.
    Unknown = -1,
}

impl ConnectionStatus {
    /// The numeric form of this status: +1 open, 0 closed, −1 unknown.
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

/// Basic TCP/IP connection data, as seen by callbacks and the info snapshot.
///
/// The "source" endpoint is the one observed first on the tap. All fields are
/// plain values; cloning a `ConnectionData` is a deep copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionData {
    /// Address of the side observed first.
    pub src_addr: IpAddr,
    /// Address of the opposite side.
    pub dst_addr: IpAddr,
    /// Port of the side observed first.
    pub src_port: u16,
    /// Port of the opposite side.
    pub dst_port: u16,
    /// The 4-byte hash key identifying this connection.
    pub flow_key: FlowKey,
    /// Capture timestamp of the first packet of the connection.
    pub start_time: Timestamp,
    /// Capture timestamp of the most recent data delivery or close.
    pub end_time: Timestamp,
}

impl ConnectionData {
    /// Time between the first packet and the most recent delivery or close,
    /// in microseconds.
    pub fn duration_micros(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// A single out-of-order byte range queued until its predecessors arrive.
#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub(crate) sequence: u32,
    pub(crate) data:     Bytes,
}

impl Fragment {
    pub(crate) fn new(sequence: u32, payload: &[u8]) -> Self {
        Self {
            sequence,
            data: Bytes::copy_from_slice(payload),
        }
    }

    /// Sequence number one past the last byte of this fragment.
    pub(crate) fn end(&self) -> u32 {
        self.sequence.wrapping_add(self.data.len() as u32)
    }
}

/// Per-direction reassembly state.
///
/// `next_seq == 0` doubles as the "no data seen yet" sentinel: the first data
/// segment on a side adopts its own sequence number as the stream origin.
#[derive(Debug, Default)]
pub(crate) struct SideState {
    pub(crate) endpoint_addr:   Option<IpAddr>,
    pub(crate) endpoint_port:   u16,
    pub(crate) next_seq:        u32,
    pub(crate) pending:         Vec<Fragment>,
    pub(crate) fin_or_rst_seen: bool,
}

impl SideState {
    pub(crate) fn set_endpoint(&mut self, addr: IpAddr, port: u16) {
        self.endpoint_addr = Some(addr);
        self.endpoint_port = port;
    }

    pub(crate) fn matches(&self, addr: IpAddr, port: u16) -> bool {
        self.endpoint_addr == Some(addr) && self.endpoint_port == port
    }

    /// Insert an out-of-order fragment at its sorted position.
    ///
    /// Ordering is wraparound-aware relative to the other queued sequence
    /// numbers. A fragment that duplicates a queued one in both sequence and
    /// length is rejected; returns whether the fragment was stored.
    pub(crate) fn queue_fragment(&mut self, fragment: Fragment) -> bool {
        let duplicate = self
            .pending
            .iter()
            .any(|f| f.sequence == fragment.sequence && f.data.len() == fragment.data.len());
        if duplicate {
            return false;
        }

        let insert_at = self
            .pending
            .iter()
            .position(|f| seq::lt(fragment.sequence, f.sequence))
            .unwrap_or(self.pending.len());
        self.pending.insert(insert_at, fragment);
        true
    }
}

/// Tracks state for a single TCP connection: both directions plus metadata.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub(crate) conn_data:      ConnectionData,
    pub(crate) sides:          [SideState; 2],
    pub(crate) num_sides_seen: u8,
    pub(crate) last_side:      Option<Side>,
    pub(crate) closed:         bool,
}

impl ConnectionState {
    pub(crate) fn new(
        src_addr: IpAddr,
        src_port: u16,
        dst_addr: IpAddr,
        dst_port: u16,
        flow_key: FlowKey,
        timestamp: Timestamp,
    ) -> Self {
        let mut first_side = SideState::default();
        first_side.set_endpoint(src_addr, src_port);
        Self {
            conn_data: ConnectionData {
                src_addr,
                dst_addr,
                src_port,
                dst_port,
                flow_key,
                start_time: timestamp,
                end_time: timestamp,
            },
            sides: [first_side, SideState::default()],
            num_sides_seen: 1,
            last_side: None,
            closed: false,
        }
    }

    /// Classify a packet's source endpoint into side 0 or side 1.
    ///
    /// The first packet seen from the opposite direction claims side 1 and
    /// records its endpoint identity.
    pub(crate) fn classify_side(&mut self, addr: IpAddr, port: u16) -> Side {
        if self.sides[0].matches(addr, port) {
            return Side::First;
        }
        if self.num_sides_seen < 2 {
            self.num_sides_seen = 2;
            self.sides[1].set_endpoint(addr, port);
        }
        Side::Second
    }
}

#![warn(missing_docs)]
//! Stateful TCP stream reassembly for passive traffic monitoring.
//!
//! This crate reconstructs, per connection and per direction, the contiguous
//! byte stream the two endpoints agreed upon at the TCP layer, from packets
//! observed on a passive tap in arbitrary capture order. Consumers parse
//! higher-level protocols (HTTP, TLS, FTP, ...) from the emitted bytes
//! without tracking sequence numbers, retransmissions, reordering, or
//! connection teardown themselves.
//!
//! # Key types
//!
//! - [`Reassembler`] — the engine. Feed it packets via
//!   [`reassemble_packet()`](Reassembler::reassemble_packet); it manages all
//!   connections seen on the tap and drives your consumer.
//! - [`PacketData`] — implement for your capture source (pcap records, eBPF
//!   events, ...) so the engine can read addresses, flags and payload.
//! - [`StreamConsumer`] — implement to receive contiguous byte ranges and
//!   connection start/end events. The implementor carries whatever state the
//!   C-style "user cookie" would; reach it through
//!   [`consumer()`](Reassembler::consumer) /
//!   [`consumer_mut()`](Reassembler::consumer_mut).
//!
//! # Behavior
//!
//! - In-order payload is delivered immediately; the fast path borrows the
//!   packet's own buffer, so no bytes are copied.
//! - Out-of-order payload is queued per direction and delivered once the
//!   preceding bytes arrive.
//! - Retransmissions and duplicates are dropped.
//! - When a gap can no longer be filled (the other side answered, the
//!   connection closed, or the embedder forced a flush), queued bytes are
//!   delivered with the literal marker `"[N bytes missing]"` spliced in
//!   where the absent bytes belong.
//! - Connections end naturally on FIN/RST or manually through
//!   [`close_connection()`](Reassembler::close_connection) /
//!   [`close_all_connections()`](Reassembler::close_all_connections). Closed
//!   connections are purged after a configurable delay.
//!
//! # Usage
//!
//! ```ignore
//! use tcp_reassembly::{ConnectionData, Reassembler, Side, StreamConsumer};
//!
//! struct Printer;
//!
//! impl StreamConsumer for Printer {
//!     fn on_message_ready(&mut self, side: Side, data: &[u8], conn: &ConnectionData) {
//!         println!("{} side {side}: {} bytes", conn.flow_key, data.len());
//!     }
//! }
//!
//! let mut engine = Reassembler::new(Printer);
//! for packet in capture {
//!     engine.reassemble_packet(&packet);
//! }
//! engine.close_all_connections();
//! ```
//!
//! # Concurrency
//!
//! The engine is single-threaded and cooperative: it holds no locks, never
//! blocks, and invokes the consumer synchronously on the calling thread.
//! Feed it from one thread, or shard traffic by flow key across independent
//! instances.
//!
//! # Feature flags
//!
//! - **`tracing`** — emit `tracing::warn!` events for soft errors (double
//!   close, duplicate out-of-order fragments)

mod connection;
mod flow;
mod packet;
mod seq;


#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

pub use connection::{ConnectionData, ConnectionEndReason, ConnectionStatus, Side};
pub use flow::FlowKey;
pub use packet::{PacketData, Timestamp};

use connection::{ConnectionState, Fragment};

/// Default delay between closing a connection and purge eligibility.
pub const DEFAULT_CLOSED_CONNECTION_DELAY_SECS: u64 = 5;

/// Default cap on connections removed per purge pass.
pub const DEFAULT_MAX_NUM_TO_CLEAN: usize = 30;

/// Consumer of reassembled streams and connection lifecycle events.
///
/// All methods are invoked synchronously from the engine entry points and
/// must not fail; their return type is `()`. Byte slices passed to
/// [`on_message_ready`](Self::on_message_ready) are borrowed for the
/// duration of the call; copy them if you need to keep them.
pub trait StreamConsumer {
    /// A contiguous byte range is ready on one side of a connection.
    ///
    /// Within a side, successive calls carry strictly contiguous, monotonic
    /// ranges of the TCP stream. Unrecoverable holes appear as the literal
    /// bytes `"[N bytes missing]"`.
    fn on_message_ready(&mut self, side: Side, data: &[u8], conn: &ConnectionData);

    /// A connection was seen for the first time (with or without a SYN).
    fn on_connection_start(&mut self, _conn: &ConnectionData) {}

    /// A connection ended, either naturally (FIN/RST) or manually.
    ///
    /// Invoked at most once per connection, after all of its
    /// [`on_message_ready`](Self::on_message_ready) calls.
    fn on_connection_end(&mut self, _conn: &ConnectionData, _reason: ConnectionEndReason) {}
}

/// Configuration for the [`Reassembler`].
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Whether purging also deletes the connection-information entry, and
    /// whether the automatic once-per-second purge runs at all.
    pub remove_conn_info: bool,
    /// Seconds between closing a connection and purge eligibility.
    /// 0 selects the default; the effective minimum is 1.
    pub closed_connection_delay_secs: u64,
    /// Cap on connections removed per purge pass when the caller passes 0.
    /// 0 selects the default.
    pub max_num_to_clean: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            remove_conn_info: true,
            closed_connection_delay_secs: DEFAULT_CLOSED_CONNECTION_DELAY_SECS,
            max_num_to_clean: DEFAULT_MAX_NUM_TO_CLEAN,
        }
    }
}

/// The literal byte sequence spliced into a stream where bytes are missing.
pub(crate) fn missing_data_message(missing: u32) -> String {
    format!("[{missing} bytes missing]")
}

/// TCP reassembly engine.
///
/// Classifies each fed packet into a connection and a direction, tracks the
/// expected sequence number per direction, queues out-of-order segments, and
/// drives the [`StreamConsumer`] with contiguous byte ranges and lifecycle
/// events. See the crate docs for the overall model.
pub struct Reassembler<C: StreamConsumer> {
    consumer: C,
    config: ReassemblyConfig,
    connections: HashMap<FlowKey, ConnectionState>,
    connection_info: HashMap<FlowKey, ConnectionData>,
    /// Closed connections scheduled for removal, keyed by expiry second.
    purge_schedule: BTreeMap<u64, Vec<FlowKey>>,
    /// Engine clock: the highest capture timestamp observed so far.
    now: Timestamp,
    next_purge_secs: u64,
}

impl<C: StreamConsumer> Reassembler<C> {
    /// Create an engine with default configuration.
    pub fn new(consumer: C) -> Self {
        Self::with_config(consumer, ReassemblyConfig::default())
    }

    /// Create an engine with a custom configuration.
    ///
    /// Zero values in the configuration select the documented defaults.
    pub fn with_config(consumer: C, mut config: ReassemblyConfig) -> Self {
        if config.closed_connection_delay_secs == 0 {
            config.closed_connection_delay_secs = DEFAULT_CLOSED_CONNECTION_DELAY_SECS;
        }
        if config.max_num_to_clean == 0 {
            config.max_num_to_clean = DEFAULT_MAX_NUM_TO_CLEAN;
        }
        Self {
            consumer,
            config,
            connections: HashMap::new(),
            connection_info: HashMap::new(),
            purge_schedule: BTreeMap::new(),
            now: Timestamp(0),
            next_purge_secs: 0,
        }
    }

    /// Shared access to the consumer.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Mutable access to the consumer.
    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    /// Consume the engine and return the consumer.
    ///
    /// Dropping the engine this way fires no end events; call
    /// [`close_all_connections()`](Self::close_all_connections) first if the
    /// consumer should observe connection ends.
    pub fn into_consumer(self) -> C {
        self.consumer
    }

    /// Feed one captured packet into the engine.
    ///
    /// Non-TCP and unparseable packets are ignored silently. Any resulting
    /// data deliveries and lifecycle events are invoked synchronously before
    /// this method returns. At most once per clock second this also runs an
    /// automatic purge pass (when `remove_conn_info` is set).
    pub fn reassemble_packet(&mut self, packet: &impl PacketData) {
        if !packet.is_tcp() {
            return;
        }
        let (Some(src_addr), Some(dst_addr)) = (packet.src_addr(), packet.dst_addr()) else {
            return;
        };

        let timestamp = packet.timestamp();
        if timestamp > self.now {
            self.now = timestamp;
        }

        self.process_segment(packet, src_addr, dst_addr, timestamp);

        if self.config.remove_conn_info && self.now.as_secs() >= self.next_purge_secs {
            self.purge_closed_connections(0);
            self.next_purge_secs = self.now.as_secs() + 1;
        }
    }

    fn process_segment(
        &mut self,
        packet: &impl PacketData,
        src_addr: IpAddr,
        dst_addr: IpAddr,
        timestamp: Timestamp,
    ) {
        let src_port = packet.src_port();
        let dst_port = packet.dst_port();
        let flow_key = FlowKey::from_endpoints(src_addr, src_port, dst_addr, dst_port);

        if !self.connections.contains_key(&flow_key) {
            let conn =
                ConnectionState::new(src_addr, src_port, dst_addr, dst_port, flow_key, timestamp);
            self.connection_info.insert(flow_key, conn.conn_data.clone());
            self.connections.insert(flow_key, conn);
            if let Some(conn) = self.connections.get(&flow_key) {
                self.consumer.on_connection_start(&conn.conn_data);
            }
        }

        let Some(conn) = self.connections.get_mut(&flow_key) else {
            return;
        };
        // Traffic after the close is not re-opened; it ages out with the
        // connection at purge time.
        if conn.closed {
            return;
        }

        let side = conn.classify_side(src_addr, src_port);

        let mut delivered = false;

        // A message from the other side means the previous side will not
        // fill its gaps in the foreseeable future: surface everything it
        // has queued, bridging holes with gap markers, before reporting the
        // new direction.
        if let Some(prev) = conn.last_side {
            if prev != side {
                delivered |= Self::drain(&mut self.consumer, conn, prev, true);
            }
        }
        conn.last_side = Some(side);

        let payload = packet.payload();
        let mut seg_seq = packet.sequence();

        // A bare SYN only seeds the expected sequence; FIN/RST bits on it
        // are not acted upon.
        let bare_syn = packet.syn() && payload.is_empty();

        if packet.syn() {
            // The SYN occupies one sequence number; payload (TCP Fast Open)
            // starts right after it.
            seg_seq = seg_seq.wrapping_add(1);
            conn.sides[side.index()].next_seq = seg_seq;
        }

        if packet.rst() && !bare_syn {
            conn.sides[side.index()].fin_or_rst_seen = true;
            delivered |= Self::drain(&mut self.consumer, conn, side, true);
            delivered |= self.handle_fin_or_rst(flow_key, side);
            if delivered {
                self.touch_end_time(flow_key, timestamp);
            }
            return;
        }

        if !payload.is_empty() {
            delivered |= Self::classify_payload(&mut self.consumer, conn, side, seg_seq, payload);
        }

        if packet.fin() && !bare_syn {
            conn.sides[side.index()].fin_or_rst_seen = true;
            delivered |= self.handle_fin_or_rst(flow_key, side);
        }

        if delivered {
            self.touch_end_time(flow_key, timestamp);
        }
    }

    /// Record the capture time of a packet that caused bytes to reach the
    /// consumer, on the connection and its info-snapshot entry. A connection
    /// that closed meanwhile already stamped its end time.
    fn touch_end_time(&mut self, flow_key: FlowKey, timestamp: Timestamp) {
        let Some(conn) = self.connections.get_mut(&flow_key) else {
            return;
        };
        if conn.closed {
            return;
        }
        conn.conn_data.end_time = timestamp;
        if let Some(info) = self.connection_info.get_mut(&flow_key) {
            info.end_time = timestamp;
        }
    }

    /// Decide what a data segment is relative to the side's expected
    /// sequence number: in order, duplicate, partially overlapping, or
    /// future. Returns whether any bytes were delivered.
    fn classify_payload(
        consumer: &mut C,
        conn: &mut ConnectionState,
        side: Side,
        seg_seq: u32,
        payload: &[u8],
    ) -> bool {
        let state = &mut conn.sides[side.index()];
        let expected = state.next_seq;
        let seg_end = seg_seq.wrapping_add(payload.len() as u32);

        // First data on this side adopts the segment's own sequence number
        // as the stream origin.
        if expected == 0 || seg_seq == expected {
            state.next_seq = seg_end;
            consumer.on_message_ready(side, payload, &conn.conn_data);
            Self::drain(consumer, conn, side, false);
            return true;
        }

        // Entirely at or before the expected sequence: retransmission.
        if seq::lte(seg_end, expected) {
            return false;
        }

        // Straddles the expected sequence: only the tail is new.
        if seq::lt(seg_seq, expected) {
            let skip = expected.wrapping_sub(seg_seq) as usize;
            state.next_seq = seg_end;
            consumer.on_message_ready(side, &payload[skip..], &conn.conn_data);
            Self::drain(consumer, conn, side, false);
            return true;
        }

        // Future data: queue until the gap before it fills.
        if !state.queue_fragment(Fragment::new(seg_seq, payload)) {
            trace_warn!("dropping duplicate out-of-order fragment at seq {seg_seq}");
        }
        false
    }

    /// Move queued fragments to the consumer in contiguous order.
    ///
    /// With `clean_whole_list` the queue is emptied completely, bridging
    /// gaps with synthetic `"[N bytes missing]"` markers; otherwise draining
    /// stops at the first gap. Returns whether any bytes were delivered.
    fn drain(
        consumer: &mut C,
        conn: &mut ConnectionState,
        side: Side,
        clean_whole_list: bool,
    ) -> bool {
        let mut delivered = false;
        loop {
            let state = &mut conn.sides[side.index()];
            let (head_seq, head_end) = match state.pending.first() {
                Some(fragment) => (fragment.sequence, fragment.end()),
                None => break,
            };
            let next = state.next_seq;

            if head_seq == next {
                let fragment = state.pending.remove(0);
                state.next_seq = head_end;
                consumer.on_message_ready(side, &fragment.data, &conn.conn_data);
                delivered = true;
            } else if seq::lt(head_seq, next) {
                if seq::gt(head_end, next) {
                    // The head overlaps data already delivered; only its
                    // suffix is new.
                    let fragment = state.pending.remove(0);
                    let skip = next.wrapping_sub(head_seq) as usize;
                    state.next_seq = head_end;
                    consumer.on_message_ready(side, &fragment.data[skip..], &conn.conn_data);
                    delivered = true;
                } else {
                    // Fully stale duplicate.
                    state.pending.remove(0);
                }
            } else if clean_whole_list {
                let missing = head_seq.wrapping_sub(next);
                state.next_seq = head_seq;
                let marker = missing_data_message(missing);
                consumer.on_message_ready(side, marker.as_bytes(), &conn.conn_data);
                delivered = true;
            } else {
                break;
            }
        }
        delivered
    }

    /// Natural close policy: a FIN/RST closes the connection once the peer
    /// has also signalled FIN/RST, or when only one side was ever observed.
    /// A FIN/RST that does not close yet still flushes its own side: that
    /// side is done sending, so its gaps can no longer fill. Returns whether
    /// the non-closing flush delivered any bytes.
    fn handle_fin_or_rst(&mut self, flow_key: FlowKey, side: Side) -> bool {
        let Some(conn) = self.connections.get_mut(&flow_key) else {
            return false;
        };
        if conn.closed {
            return false;
        }
        let peer_done = conn.sides[side.opposite().index()].fin_or_rst_seen;
        if peer_done || conn.num_sides_seen < 2 {
            self.close_connection_internal(flow_key, ConnectionEndReason::FinOrRst);
            false
        } else {
            Self::drain(&mut self.consumer, conn, side, true)
        }
    }

    /// Close a connection manually.
    ///
    /// Queued out-of-order data is flushed (with gap markers) and the end
    /// event fires with reason [`ConnectionEndReason::Manual`]. Closing an
    /// unknown or already-closed flow key is a soft error: it logs a
    /// diagnostic and invokes no callbacks.
    pub fn close_connection(&mut self, flow_key: FlowKey) {
        self.close_connection_internal(flow_key, ConnectionEndReason::Manual);
    }

    /// Close every currently active connection.
    ///
    /// Each active connection receives exactly one end event with reason
    /// [`ConnectionEndReason::Manual`]; iteration order is unspecified.
    pub fn close_all_connections(&mut self) {
        let open: Vec<FlowKey> = self
            .connections
            .iter()
            .filter(|(_, conn)| !conn.closed)
            .map(|(&key, _)| key)
            .collect();
        for flow_key in open {
            self.close_connection_internal(flow_key, ConnectionEndReason::Manual);
        }
    }

    fn close_connection_internal(&mut self, flow_key: FlowKey, reason: ConnectionEndReason) {
        let Some(conn) = self.connections.get_mut(&flow_key) else {
            trace_warn!("ignoring close of unknown flow {flow_key}");
            return;
        };
        if conn.closed {
            trace_warn!("ignoring close of already-closed flow {flow_key}");
            return;
        }

        Self::drain(&mut self.consumer, conn, Side::First, true);
        Self::drain(&mut self.consumer, conn, Side::Second, true);

        conn.conn_data.end_time = self.now;
        self.consumer.on_connection_end(&conn.conn_data, reason);
        conn.closed = true;
        if let Some(info) = self.connection_info.get_mut(&flow_key) {
            info.end_time = conn.conn_data.end_time;
        }

        let expiry = self.now.as_secs() + self.config.closed_connection_delay_secs;
        self.purge_schedule.entry(expiry).or_default().push(flow_key);
    }

    /// Remove closed connections whose purge delay has elapsed.
    ///
    /// Walks the purge schedule in ascending expiry order and removes at
    /// most `max_num_to_clean` connections (0 selects the configured
    /// default). When `remove_conn_info` is set, the connection-information
    /// entries are dropped too. Returns the number of removed connections.
    pub fn purge_closed_connections(&mut self, max_num_to_clean: usize) -> usize {
        let cap = if max_num_to_clean == 0 {
            self.config.max_num_to_clean
        } else {
            max_num_to_clean
        };
        let now_secs = self.now.as_secs();

        let expired: Vec<u64> = self
            .purge_schedule
            .range(..=now_secs)
            .map(|(&expiry, _)| expiry)
            .collect();

        let mut removed = 0;
        for expiry in expired {
            if removed >= cap {
                break;
            }
            let Some(keys) = self.purge_schedule.get_mut(&expiry) else {
                continue;
            };
            while removed < cap {
                let Some(flow_key) = keys.pop() else {
                    break;
                };
                self.connections.remove(&flow_key);
                if self.config.remove_conn_info {
                    self.connection_info.remove(&flow_key);
                }
                removed += 1;
            }
            if self
                .purge_schedule
                .get(&expiry)
                .is_some_and(|keys| keys.is_empty())
            {
                self.purge_schedule.remove(&expiry);
            }
        }
        removed
    }

    /// Whether a connection is currently open, closed, or unknown.
    pub fn connection_status(&self, connection: &ConnectionData) -> ConnectionStatus {
        match self.connections.get(&connection.flow_key) {
            Some(conn) if !conn.closed => ConnectionStatus::Open,
            Some(_) => ConnectionStatus::Closed,
            None => ConnectionStatus::Unknown,
        }
    }

    /// Read-only snapshot of all connections this engine has seen.
    ///
    /// Entries appear when a connection is first observed and disappear only
    /// at purge time (and only when `remove_conn_info` is set).
    pub fn connection_information(&self) -> &HashMap<FlowKey, ConnectionData> {
        &self.connection_info
    }

    /// Number of tracked connections (open and closed-but-not-purged).
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether the engine currently tracks no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether a connection with this flow key is currently tracked.
    pub fn contains(&self, flow_key: FlowKey) -> bool {
        self.connections.contains_key(&flow_key)
    }
}

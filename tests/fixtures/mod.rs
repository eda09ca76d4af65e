#![allow(dead_code)]
//! Packet-building helpers for integration tests
//!
//! These construct synthetic captured packets and a recording consumer for
//! precise testing of reassembly, lifecycle and purge behavior.

use std::net::{IpAddr, Ipv4Addr};

use tcp_reassembly::{
    ConnectionData, ConnectionEndReason, FlowKey, PacketData, Side, StreamConsumer, Timestamp,
};

/// Endpoint "A" used by most tests (the side that usually speaks first).
pub const ENDPOINT_A: (IpAddr, u16) = (IpAddr::V4(Ipv4Addr::new(192, 168, 0, 10)), 40000);

/// Endpoint "B", the opposite side.
pub const ENDPOINT_B: (IpAddr, u16) = (IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)), 80);

/// Flow key of the A<->B conversation.
pub fn flow_key_ab() -> FlowKey {
    FlowKey::from_endpoints(ENDPOINT_A.0, ENDPOINT_A.1, ENDPOINT_B.0, ENDPOINT_B.1)
}

/// A synthetic captured packet.
#[derive(Debug, Clone)]
pub struct TestPacket {
    pub timestamp: Timestamp,
    pub tcp: bool,
    pub src: Option<IpAddr>,
    pub dst: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Vec<u8>,
}

impl PacketData for TestPacket {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn is_tcp(&self) -> bool {
        self.tcp
    }

    fn src_addr(&self) -> Option<IpAddr> {
        self.src
    }

    fn dst_addr(&self) -> Option<IpAddr> {
        self.dst
    }

    fn src_port(&self) -> u16 {
        self.src_port
    }

    fn dst_port(&self) -> u16 {
        self.dst_port
    }

    fn sequence(&self) -> u32 {
        self.sequence
    }

    fn syn(&self) -> bool {
        self.syn
    }

    fn fin(&self) -> bool {
        self.fin
    }

    fn rst(&self) -> bool {
        self.rst
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl TestPacket {
    /// Set the capture timestamp in whole seconds.
    pub fn at_secs(mut self, secs: u64) -> Self {
        self.timestamp = Timestamp::from_secs(secs);
        self
    }

    /// Set the SYN flag.
    pub fn syn_flag(mut self) -> Self {
        self.syn = true;
        self
    }

    /// Set the FIN flag.
    pub fn fin_flag(mut self) -> Self {
        self.fin = true;
        self
    }

    /// Set the RST flag.
    pub fn rst_flag(mut self) -> Self {
        self.rst = true;
        self
    }
}

/// Build a data packet between arbitrary endpoints.
pub fn segment(
    src: (IpAddr, u16),
    dst: (IpAddr, u16),
    sequence: u32,
    payload: &[u8],
) -> TestPacket {
    TestPacket {
        timestamp: Timestamp::from_secs(1),
        tcp: true,
        src: Some(src.0),
        dst: Some(dst.0),
        src_port: src.1,
        dst_port: dst.1,
        sequence,
        syn: false,
        fin: false,
        rst: false,
        payload: payload.to_vec(),
    }
}

/// Build an A->B data packet.
pub fn a_to_b(sequence: u32, payload: &[u8]) -> TestPacket {
    segment(ENDPOINT_A, ENDPOINT_B, sequence, payload)
}

/// Build a B->A data packet.
pub fn b_to_a(sequence: u32, payload: &[u8]) -> TestPacket {
    segment(ENDPOINT_B, ENDPOINT_A, sequence, payload)
}

/// A recorded consumer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start {
        flow_key: FlowKey,
    },
    Message {
        flow_key: FlowKey,
        side: Side,
        data: Vec<u8>,
    },
    End {
        flow_key: FlowKey,
        reason: ConnectionEndReason,
    },
}

/// Consumer recording every event in arrival order.
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
}

impl StreamConsumer for Recorder {
    fn on_message_ready(&mut self, side: Side, data: &[u8], conn: &ConnectionData) {
        self.events.push(Event::Message {
            flow_key: conn.flow_key,
            side,
            data: data.to_vec(),
        });
    }

    fn on_connection_start(&mut self, conn: &ConnectionData) {
        self.events.push(Event::Start {
            flow_key: conn.flow_key,
        });
    }

    fn on_connection_end(&mut self, conn: &ConnectionData, reason: ConnectionEndReason) {
        self.events.push(Event::End {
            flow_key: conn.flow_key,
            reason,
        });
    }
}

impl Recorder {
    /// All message payloads delivered on one side of one connection.
    pub fn messages(&self, flow_key: FlowKey, side: Side) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Message {
                    flow_key: k,
                    side: s,
                    data,
                } if *k == flow_key && *s == side => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// The reconstructed byte stream of one side of one connection.
    pub fn stream(&self, flow_key: FlowKey, side: Side) -> Vec<u8> {
        self.messages(flow_key, side).concat()
    }

    /// Number of start events recorded for a connection.
    pub fn starts(&self, flow_key: FlowKey) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, Event::Start { flow_key: k } if *k == flow_key))
            .count()
    }

    /// End reasons recorded for a connection, in order.
    pub fn ends(&self, flow_key: FlowKey) -> Vec<ConnectionEndReason> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::End { flow_key: k, reason } if *k == flow_key => Some(*reason),
                _ => None,
            })
            .collect()
    }

    /// Position of the first event matching a predicate.
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }
}

//! Fuzz target: raw byte carving
//!
//! This fuzz target carves completely random bytes into packet fields.
//! The goal is to ensure the engine never panics on arbitrary input.

#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use libfuzzer_sys::fuzz_target;
use tcp_reassembly::{ConnectionData, PacketData, Reassembler, Side, StreamConsumer, Timestamp};

struct Discard;

impl StreamConsumer for Discard {
    fn on_message_ready(&mut self, _side: Side, _data: &[u8], _conn: &ConnectionData) {}
}

struct CarvedPacket<'a> {
    header: [u8; 8],
    payload: &'a [u8],
}

impl PacketData for CarvedPacket<'_> {
    fn timestamp(&self) -> Timestamp {
        Timestamp::from_secs(u64::from(self.header[0]))
    }

    fn is_tcp(&self) -> bool {
        self.header[1] & 0x80 == 0
    }

    fn src_addr(&self) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, self.header[1] & 0x03)))
    }

    fn dst_addr(&self) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, self.header[2] & 0x03)))
    }

    fn src_port(&self) -> u16 {
        u16::from(self.header[1] & 0x07)
    }

    fn dst_port(&self) -> u16 {
        u16::from(self.header[2] & 0x07)
    }

    fn sequence(&self) -> u32 {
        u32::from_be_bytes([self.header[4], self.header[5], self.header[6], self.header[7]])
    }

    fn syn(&self) -> bool {
        self.header[3] & 0x01 != 0
    }

    fn fin(&self) -> bool {
        self.header[3] & 0x02 != 0
    }

    fn rst(&self) -> bool {
        self.header[3] & 0x04 != 0
    }

    fn payload(&self) -> &[u8] {
        self.payload
    }
}

fuzz_target!(|data: &[u8]| {
    let mut engine = Reassembler::new(Discard);

    // Carve fixed-size records: 8 header bytes + up to 23 payload bytes.
    // Few distinct addresses/ports keep packets colliding into the same
    // handful of connections, exercising the stateful paths.
    for record in data.chunks(31) {
        if record.len() < 8 {
            break;
        }
        let mut header = [0u8; 8];
        header.copy_from_slice(&record[..8]);
        let packet = CarvedPacket {
            header,
            payload: &record[8..],
        };
        engine.reassemble_packet(&packet);
    }

    engine.close_all_connections();
    engine.purge_closed_connections(0);
});
